use mote_lib::testing::TestResult;
use mote_lib::{assert_eq_test, assert_err, assert_ok, assert_some, assert_test, fail, pass};

use super::binding::{BindingTable, ListBindings};
use super::config::{ARP_TABLE_SIZE, ARP_WAIT_MAX, StackConfig};
use super::ipv4::{self, OutputFlags};
use super::neighbor::{ArpCache, ArpWaitList};
use super::packetbuf::PacketBuf;
use super::pool::{PacketPool, PoolKind};
use super::tcp::{TcpEngine, TcpFlags};
use super::testutil::*;
use super::timer::{NetTimers, TimerKind};
use super::types::{IpProtocol, Ipv4Addr, MacAddr, NetError, Port, SockAddr};
use super::{ARP_OPER_REPLY, ETH_HEADER_LEN, arp, udp};

const RETRY_US: u64 = 3_000_000;

fn send_udp<'p, B, T>(net: &mut TestStack<'p, B, T>, dst: Ipv4Addr, payload: &[u8]) -> Result<(), NetError>
where
    B: BindingTable,
    T: TcpEngine<'p>,
{
    let mut pkt = PacketBuf::alloc(net.pool())?;
    pkt.append(payload)?;
    udp::output(net, pkt, Port(40000), SockAddr::new(dst, Port(7)))
}

fn mac(last: u8) -> MacAddr {
    MacAddr([0x02, 0, 0, 0, 0, last])
}

// =============================================================================
// Cache
// =============================================================================

pub fn test_cache_updates_in_place() -> TestResult {
    let mut cache = ArpCache::new();
    cache.insert(PEER_IP, mac(1), IF0);
    cache.insert(PEER_IP, mac(2), IF0);

    assert_eq_test!(cache.len(), 1, "one entry per address");
    let entry = assert_some!(cache.lookup(PEER_IP));
    assert_eq_test!(entry.mac, mac(2));
    pass!()
}

pub fn test_cache_ring_evicts_oldest_insertion() -> TestResult {
    let mut cache = ArpCache::new();
    for i in 0..=ARP_TABLE_SIZE as u8 {
        cache.insert(Ipv4Addr::new(10, 0, 0, 10 + i), mac(i), IF0);
    }

    assert_eq_test!(cache.len(), ARP_TABLE_SIZE);
    assert_test!(cache.lookup(Ipv4Addr::new(10, 0, 0, 10)).is_none(), "first insertion evicted");
    assert_test!(cache.lookup(Ipv4Addr::new(10, 0, 0, 11)).is_some());
    assert_test!(cache.lookup(Ipv4Addr::new(10, 0, 0, 10 + ARP_TABLE_SIZE as u8)).is_some());
    pass!()
}

pub fn test_cache_sweep_is_mark_and_sweep() -> TestResult {
    let mut cache = ArpCache::new();
    cache.insert(PEER_IP, PEER_MAC, IF0);
    cache.insert(GATEWAY_IP, mac(1), IF0);

    assert_eq_test!(cache.sweep(), 0, "fresh entries survive one sweep");
    cache.insert(GATEWAY_IP, mac(1), IF0);
    assert_eq_test!(cache.sweep(), 1);
    assert_test!(cache.lookup(PEER_IP).is_none());
    assert_test!(cache.lookup(GATEWAY_IP).is_some(), "refreshed entry kept");
    pass!()
}

// =============================================================================
// Wait list
// =============================================================================

pub fn test_wait_list_ignores_stale_token() -> TestResult {
    let pool = PacketPool::new();
    let mut timers = NetTimers::new();
    let mut wait = ArpWaitList::new();

    let old = assert_ok!(timers.schedule(RETRY_US, TimerKind::ArpRetry, 0));
    let current = assert_ok!(timers.schedule(RETRY_US, TimerKind::ArpRetry, 0));
    let slot = assert_some!(wait.vacant());
    let pkt = assert_ok!(PacketBuf::alloc(&pool));
    if wait.insert(slot, pkt, IF0, PEER_IP, 0, current).is_err() {
        return fail!("vacant slot rejected the entry");
    }

    assert_test!(wait.take_if_timer(slot, old).is_none());
    assert_eq_test!(wait.len(), 1, "stale fire leaves the entry alone");
    let entry = assert_some!(wait.take_if_timer(slot, current));
    assert_eq_test!(entry.target, PEER_IP);
    drop(entry);
    assert_eq_test!(pool.in_use(), 0);
    pass!()
}

// =============================================================================
// Resolution
// =============================================================================

pub fn test_reply_releases_waiting_packet() -> TestResult {
    let pool = PacketPool::new();
    let mut net = stack(&pool);

    assert_ok!(send_udp(&mut net, PEER_IP, b"hi"));
    let sent = net.device_mut().take_sent();
    assert_eq_test!(sent.len(), 1);
    assert_test!(is_arp_request(&sent[0]));
    assert_eq_test!(dst_mac(&sent[0]), MacAddr::BROADCAST);
    assert_eq_test!(net.arp_wait().pending_for(PEER_IP), 1);
    assert_eq_test!(pool.in_use(), 1, "only the parked packet is held");

    inject(&mut net, &arp_reply_frame(PEER_IP));

    let sent = net.device_mut().take_sent();
    assert_eq_test!(sent.len(), 1, "exactly one packet forwarded");
    assert_eq_test!(ethertype(&sent[0]), ETHERTYPE_IPV4);
    assert_eq_test!(dst_mac(&sent[0]), PEER_MAC);
    assert_eq_test!(&l4_of(&sent[0])[8..], &b"hi"[..]);

    assert_test!(net.arp_wait().is_empty());
    assert_eq_test!(net.timers().pending_count(), 0, "retry timer cancelled");
    assert_eq_test!(pool.in_use(), 0);
    assert_eq_test!(assert_some!(net.neighbors().lookup(PEER_IP)).mac, PEER_MAC);
    pass!()
}

pub fn test_gratuitous_reply_releases_waiting_packet() -> TestResult {
    let pool = PacketPool::new();
    let mut net = stack(&pool);

    assert_ok!(send_udp(&mut net, PEER_IP, b"gr"));
    net.device_mut().take_sent();
    assert_eq_test!(net.arp_wait().pending_for(PEER_IP), 1);

    // Broadcast reply announcing the peer's own address; the target is not us.
    let announce = arp_packet(ARP_OPER_REPLY, PEER_MAC, PEER_IP, MacAddr::BROADCAST, PEER_IP);
    inject(&mut net, &eth_frame(MacAddr::BROADCAST, PEER_MAC, ETHERTYPE_ARP, &announce));

    assert_eq_test!(assert_some!(net.neighbors().lookup(PEER_IP)).mac, PEER_MAC);
    assert_test!(net.arp_wait().is_empty());
    assert_eq_test!(net.timers().pending_count(), 0);
    let sent = net.device_mut().take_sent();
    assert_eq_test!(sent.len(), 1, "parked packet forwarded");
    assert_eq_test!(ethertype(&sent[0]), ETHERTYPE_IPV4);
    assert_eq_test!(dst_mac(&sent[0]), PEER_MAC);
    assert_eq_test!(net.stats().arp_replies_sent, 0, "replies are not answered");
    assert_eq_test!(pool.in_use(), 0);
    pass!()
}

pub fn test_reply_from_unspecified_sender_is_ignored() -> TestResult {
    let pool = PacketPool::new();
    let mut net = stack(&pool);

    let anonymous = arp_packet(ARP_OPER_REPLY, PEER_MAC, Ipv4Addr::UNSPECIFIED, OUR_MAC, OUR_IP);
    inject(&mut net, &eth_frame(OUR_MAC, PEER_MAC, ETHERTYPE_ARP, &anonymous));

    assert_test!(net.neighbors().is_empty());
    assert_eq_test!(net.device_mut().take_sent().len(), 0);
    pass!()
}

pub fn test_waiting_packets_leave_in_order() -> TestResult {
    let pool = PacketPool::new();
    let mut net = stack(&pool);

    assert_ok!(send_udp(&mut net, PEER_IP, b"one"));
    assert_ok!(send_udp(&mut net, PEER_IP, b"two"));
    net.device_mut().take_sent();

    inject(&mut net, &arp_reply_frame(PEER_IP));
    let sent = net.device_mut().take_sent();
    assert_eq_test!(sent.len(), 2);
    assert_eq_test!(&l4_of(&sent[0])[8..], &b"one"[..]);
    assert_eq_test!(&l4_of(&sent[1])[8..], &b"two"[..]);
    pass!()
}

pub fn test_cached_neighbor_skips_resolution() -> TestResult {
    let pool = PacketPool::new();
    let mut net = stack(&pool);
    assert_ok!(net.add_neighbor(PEER_IP, PEER_MAC, IF0));

    assert_ok!(send_udp(&mut net, PEER_IP, b"x"));
    let sent = net.device_mut().take_sent();
    assert_eq_test!(sent.len(), 1);
    assert_eq_test!(ethertype(&sent[0]), ETHERTYPE_IPV4);
    assert_test!(net.arp_wait().is_empty());
    assert_eq_test!(net.stats().arp_requests_sent, 0);
    pass!()
}

pub fn test_unanswered_resolution_gives_up() -> TestResult {
    let pool = PacketPool::new();
    let mut net = stack(&pool);

    assert_ok!(send_udp(&mut net, PEER_IP, b"lost"));
    assert_eq_test!(net.stats().arp_requests_sent, 1);

    net.process_timers(RETRY_US);
    assert_eq_test!(net.stats().arp_requests_sent, 2);
    assert_eq_test!(net.arp_wait().len(), 1);

    net.process_timers(2 * RETRY_US);
    assert_eq_test!(net.stats().arp_requests_sent, 3);

    net.process_timers(3 * RETRY_US - 1);
    assert_eq_test!(net.arp_wait().len(), 1, "still waiting just before the last deadline");

    net.process_timers(3 * RETRY_US);
    assert_eq_test!(net.stats().arp_requests_sent, 3, "no request after retries are spent");
    assert_eq_test!(net.stats().arp_exhausted, 1);
    assert_test!(net.arp_wait().is_empty());
    assert_eq_test!(net.timers().pending_count(), 0);
    assert_eq_test!(pool.in_use(), 0, "dropped packet returned to the pool");

    let requests = net.device_mut().take_sent();
    assert_eq_test!(requests.len(), 3);
    assert_test!(requests.iter().all(|f| is_arp_request(f)));
    pass!()
}

pub fn test_retry_fire_after_resolution_is_ignored() -> TestResult {
    let pool = PacketPool::new();
    let mut net = stack(&pool);

    assert_ok!(send_udp(&mut net, PEER_IP, b"first"));

    // Collect the retry fire without dispatching it, then let the reply win.
    let fired = net.timers.advance_to(RETRY_US);
    assert_eq_test!(fired.len(), 1);
    let stale = fired[0];
    inject(&mut net, &arp_reply_frame(PEER_IP));
    assert_test!(net.arp_wait().is_empty());

    // A different destination reuses the freed wait-list slot.
    let other = Ipv4Addr::new(10, 0, 0, 9);
    assert_ok!(send_udp(&mut net, other, b"second"));
    net.device_mut().take_sent();
    assert_eq_test!(net.arp_wait().pending_for(other), 1);

    arp::on_retry_timer(&mut net, stale.key as usize, stale.token);

    assert_eq_test!(net.arp_wait().pending_for(other), 1, "live entry untouched");
    assert_eq_test!(net.stats().arp_exhausted, 0);
    assert_eq_test!(net.device_mut().take_sent().len(), 0);
    assert_eq_test!(pool.in_use(), 1);
    pass!()
}

pub fn test_tcp_dropped_when_transport_retransmits() -> TestResult {
    let pool = PacketPool::new();
    let tcp = ScriptedTcp {
        retransmit: true,
        ..ScriptedTcp::default()
    };
    let mut net = stack_with(&pool, ListBindings::new(), tcp, StackConfig::default());

    let mut pkt = assert_ok!(PacketBuf::alloc(&pool));
    assert_ok!(pkt.append(&tcp_segment(40000, 80, TcpFlags::SYN, &[])));
    assert_ok!(ipv4::push_header(&mut pkt, IpProtocol::Tcp as u8, Ipv4Addr::UNSPECIFIED, PEER_IP));
    assert_ok!(ipv4::output(&mut net, pkt, None, OutputFlags::empty()));

    assert_eq_test!(net.stats().arp_requests_sent, 1, "request still goes out");
    assert_eq_test!(net.stats().arp_transport_drops, 1);
    assert_test!(net.arp_wait().is_empty());
    assert_eq_test!(pool.in_use(), 0);

    // UDP is still parked.
    assert_ok!(send_udp(&mut net, PEER_IP, b"udp"));
    assert_eq_test!(net.arp_wait().len(), 1);
    pass!()
}

pub fn test_wait_list_full_drops_packet() -> TestResult {
    let pool = PacketPool::new();
    let mut net = stack(&pool);

    for i in 0..ARP_WAIT_MAX as u8 {
        assert_ok!(send_udp(&mut net, Ipv4Addr::new(10, 0, 0, 20 + i), b"q"));
    }
    assert_err!(
        send_udp(&mut net, Ipv4Addr::new(10, 0, 0, 99), b"q"),
        NetError::TableFull
    );
    assert_eq_test!(net.stats().arp_wait_full, 1);
    assert_eq_test!(net.arp_wait().len(), ARP_WAIT_MAX);
    assert_eq_test!(pool.in_use(), ARP_WAIT_MAX);
    pass!()
}

// =============================================================================
// Input
// =============================================================================

pub fn test_request_for_us_is_answered() -> TestResult {
    let pool = PacketPool::new();
    let mut net = stack(&pool);

    inject(&mut net, &arp_request_frame());

    let sent = net.device_mut().take_sent();
    assert_eq_test!(sent.len(), 1);
    let reply = &sent[0];
    assert_eq_test!(ethertype(reply), ETHERTYPE_ARP);
    assert_eq_test!(dst_mac(reply), PEER_MAC);
    let arp = assert_ok!(arp::ArpPacket::parse(&reply[ETH_HEADER_LEN..]));
    assert_eq_test!(arp.oper, ARP_OPER_REPLY);
    assert_eq_test!(arp.sha, OUR_MAC);
    assert_eq_test!(arp.spa, OUR_IP);
    assert_eq_test!(arp.tha, PEER_MAC);
    assert_eq_test!(arp.tpa, PEER_IP);

    assert_test!(net.neighbors().lookup(PEER_IP).is_some(), "requester learned");
    assert_eq_test!(net.stats().arp_replies_sent, 1);
    assert_eq_test!(pool.in_use(), 0);
    pass!()
}

pub fn test_reply_to_request_falls_back_to_reserve() -> TestResult {
    let pool = PacketPool::new();
    let mut net = stack(&pool);

    let mut held = std::vec::Vec::new();
    while let Ok(pkt) = PacketBuf::alloc(&pool) {
        held.push(pkt);
    }
    assert_eq_test!(pool.available(), 0);

    // Received into a reserve buffer, as a driver does when the main pool is dry.
    let mut rx = assert_ok!(PacketBuf::alloc_emergency(&pool));
    assert_ok!(rx.reserve(0));
    assert_ok!(rx.append(&arp_request_frame()));
    net.receive(IF0, rx);

    assert_eq_test!(net.device().origins.clone(), std::vec![PoolKind::Emergency]);
    let sent = net.device_mut().take_sent();
    assert_eq_test!(sent.len(), 1);
    let reply = assert_ok!(arp::ArpPacket::parse(&sent[0][ETH_HEADER_LEN..]));
    assert_eq_test!(reply.oper, ARP_OPER_REPLY);
    assert_eq_test!(reply.tpa, PEER_IP);
    assert_eq_test!(net.stats().arp_replies_sent, 1);

    drop(held);
    assert_eq_test!(pool.in_use(), 0);
    pass!()
}

pub fn test_arp_for_other_hosts_is_ignored() -> TestResult {
    let pool = PacketPool::new();
    let mut net = stack(&pool);

    let other = Ipv4Addr::new(10, 0, 0, 77);
    let frame = eth_frame(
        MacAddr::BROADCAST,
        PEER_MAC,
        ETHERTYPE_ARP,
        &arp_packet(super::ARP_OPER_REQUEST, PEER_MAC, PEER_IP, MacAddr::ZERO, other),
    );
    inject(&mut net, &frame);

    assert_eq_test!(net.device_mut().take_sent().len(), 0);
    assert_test!(net.neighbors().is_empty());
    pass!()
}

pub fn test_truncated_arp_is_counted() -> TestResult {
    let pool = PacketPool::new();
    let mut net = stack(&pool);

    let mut body = arp_packet(super::ARP_OPER_REQUEST, PEER_MAC, PEER_IP, MacAddr::ZERO, OUR_IP);
    body.truncate(20);
    inject(&mut net, &eth_frame(MacAddr::BROADCAST, PEER_MAC, ETHERTYPE_ARP, &body));

    assert_eq_test!(net.stats().arp_malformed, 1);
    assert_eq_test!(net.device_mut().take_sent().len(), 0);
    pass!()
}

pub fn test_expiry_timer_sweeps_cache() -> TestResult {
    let pool = PacketPool::new();
    let config = StackConfig {
        arp_expiry_us: Some(1_000_000),
        ..StackConfig::default()
    };
    let mut net = stack_with(&pool, ListBindings::new(), super::tcp::NullTcp, config);
    assert_ok!(net.add_neighbor(PEER_IP, PEER_MAC, IF0));

    net.process_timers(1_000_000);
    assert_test!(net.neighbors().lookup(PEER_IP).is_some(), "first sweep only clears the mark");

    net.process_timers(2_000_000);
    assert_test!(net.neighbors().lookup(PEER_IP).is_none());
    assert_eq_test!(net.stats().arp_expired, 1);
    assert_eq_test!(net.timers().pending_count(), 1, "expiry re-armed");
    pass!()
}

mote_lib::define_test_suite!(
    arp,
    [
        test_cache_updates_in_place,
        test_cache_ring_evicts_oldest_insertion,
        test_cache_sweep_is_mark_and_sweep,
        test_wait_list_ignores_stale_token,
        test_reply_releases_waiting_packet,
        test_gratuitous_reply_releases_waiting_packet,
        test_reply_from_unspecified_sender_is_ignored,
        test_waiting_packets_leave_in_order,
        test_cached_neighbor_skips_resolution,
        test_unanswered_resolution_gives_up,
        test_retry_fire_after_resolution_is_ignored,
        test_tcp_dropped_when_transport_retransmits,
        test_wait_list_full_drops_packet,
        test_request_for_us_is_answered,
        test_reply_to_request_falls_back_to_reserve,
        test_arp_for_other_hosts_is_ignored,
        test_truncated_arp_is_counted,
        test_expiry_timer_sweeps_cache,
    ]
);
