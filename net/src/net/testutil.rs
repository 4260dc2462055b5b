//! Host-side fixtures: a capturing device, frame builders and a minimal TCP
//! engine for driving the stack end to end.

use std::collections::VecDeque;
use std::vec::Vec;

use super::binding::{BindingTable, ListBindings};
use super::config::StackConfig;
use super::netdev::{NetDevice, NetDeviceFeatures};
use super::netstack::{IfaceConfig, NetStack};
use super::packetbuf::PacketBuf;
use super::pool::{PacketPool, PoolKind};
use super::tcp::{ConnStatus, NullTcp, TcpConn, TcpContext, TcpEngine, TcpFlags, TcpHeader, TcpSegment};
use super::types::{IfaceId, Ipv4Addr, MacAddr, NetError, SockAddr};
use super::{
    ARP_OPER_REPLY, ARP_OPER_REQUEST, ETH_HEADER_LEN, IPV4_HEADER_LEN, TCP_HEADER_LEN, UDP_HEADER_LEN,
    checksum, fold_checksum, ones_complement_sum, pseudo_header_sum,
};

pub const OUR_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x01]);
pub const OUR_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
pub const NETMASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);
pub const PEER_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x07]);
pub const PEER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 7);
pub const GATEWAY_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
pub const REMOTE_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 50, 9);
pub const IF0: IfaceId = IfaceId(0);

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;

// =============================================================================
// Device
// =============================================================================

/// Records transmitted frames and replays injected ones.
#[derive(Default)]
pub struct CaptureDevice {
    pub sent: Vec<Vec<u8>>,
    /// Pool part of each transmitted buffer, parallel to `sent` until taken.
    pub origins: Vec<PoolKind>,
    pub rx: VecDeque<(IfaceId, Vec<u8>)>,
    pub features: Option<NetDeviceFeatures>,
    pub fail_tx: bool,
}

impl CaptureDevice {
    pub fn take_sent(&mut self) -> Vec<Vec<u8>> {
        self.origins.clear();
        std::mem::take(&mut self.sent)
    }
}

impl<'p> NetDevice<'p> for CaptureDevice {
    fn tx(&mut self, _iface: IfaceId, pkt: PacketBuf<'p>) -> Result<(), NetError> {
        if self.fail_tx {
            return Err(NetError::OutOfPackets);
        }
        self.sent.push(pkt.payload().to_vec());
        self.origins.push(pkt.origin());
        Ok(())
    }

    fn poll_rx(&mut self, iface: IfaceId, pool: &'p PacketPool) -> Option<PacketBuf<'p>> {
        let idx = self.rx.iter().position(|(i, _)| *i == iface)?;
        let (_, frame) = self.rx.remove(idx)?;
        PacketBuf::from_raw_copy(pool, &frame).ok()
    }

    fn features(&self) -> NetDeviceFeatures {
        self.features.unwrap_or(NetDeviceFeatures::empty())
    }
}

pub type TestStack<'p, B = ListBindings, T = NullTcp> = NetStack<'p, CaptureDevice, B, T>;

/// Stack with one interface `OUR_IP/24` and the default config.
pub fn stack(pool: &PacketPool) -> TestStack<'_> {
    stack_with(pool, ListBindings::new(), NullTcp, StackConfig::default())
}

pub fn stack_with<'p, B: BindingTable, T: TcpEngine<'p>>(
    pool: &'p PacketPool,
    bindings: B,
    tcp: T,
    config: StackConfig,
) -> TestStack<'p, B, T> {
    let mut stack = NetStack::new(pool, CaptureDevice::default(), bindings, tcp, config).expect("stack config");
    stack
        .add_iface(IfaceConfig::new(OUR_MAC, OUR_IP, NETMASK))
        .expect("iface");
    stack
}

/// Hand `frame` to the stack as if it had been received on interface 0.
pub fn inject<'p, B, T>(stack: &mut TestStack<'p, B, T>, frame: &[u8])
where
    B: BindingTable,
    T: TcpEngine<'p>,
{
    let pkt = PacketBuf::from_raw_copy(stack.pool(), frame).expect("rx buffer");
    stack.receive(IF0, pkt);
}

// =============================================================================
// Frame builders
// =============================================================================

pub fn eth_frame(dst: MacAddr, src: MacAddr, ethertype: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(ETH_HEADER_LEN + payload.len());
    frame.extend_from_slice(dst.as_bytes());
    frame.extend_from_slice(src.as_bytes());
    frame.extend_from_slice(&ethertype.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// IPv4 packet with a valid header checksum.
pub fn ipv4_packet(src: Ipv4Addr, dst: Ipv4Addr, proto: u8, payload: &[u8]) -> Vec<u8> {
    let total = (IPV4_HEADER_LEN + payload.len()) as u16;
    let mut pkt = vec![0u8; IPV4_HEADER_LEN];
    pkt[0] = 0x45;
    pkt[2..4].copy_from_slice(&total.to_be_bytes());
    pkt[8] = 64;
    pkt[9] = proto;
    pkt[12..16].copy_from_slice(src.as_bytes());
    pkt[16..20].copy_from_slice(dst.as_bytes());
    fix_ipv4_checksum(&mut pkt);
    pkt.extend_from_slice(payload);
    pkt
}

/// Recompute the header checksum after a test edits header bytes.
pub fn fix_ipv4_checksum(ip: &mut [u8]) {
    let ihl = (ip[0] & 0x0f) as usize * 4;
    ip[10..12].fill(0);
    let csum = checksum(&ip[..ihl.min(ip.len())]);
    ip[10..12].copy_from_slice(&csum.to_be_bytes());
}

/// Ethernet frame carrying an IPv4 packet from the peer to us.
pub fn ipv4_frame(src: Ipv4Addr, dst: Ipv4Addr, proto: u8, payload: &[u8]) -> Vec<u8> {
    eth_frame(OUR_MAC, PEER_MAC, ETHERTYPE_IPV4, &ipv4_packet(src, dst, proto, payload))
}

pub fn icmp_echo(icmp_type: u8, id: u16, seq: u16, data: &[u8]) -> Vec<u8> {
    let mut msg = vec![icmp_type, 0, 0, 0];
    msg.extend_from_slice(&id.to_be_bytes());
    msg.extend_from_slice(&seq.to_be_bytes());
    msg.extend_from_slice(data);
    let csum = checksum(&msg);
    msg[2..4].copy_from_slice(&csum.to_be_bytes());
    msg
}

/// UDP datagram with a valid pseudo-header checksum.
pub fn udp_datagram(src: SockAddr, dst: SockAddr, payload: &[u8]) -> Vec<u8> {
    let len = UDP_HEADER_LEN + payload.len();
    let mut dgram = Vec::with_capacity(len);
    dgram.extend_from_slice(&src.port.to_network_bytes());
    dgram.extend_from_slice(&dst.port.to_network_bytes());
    dgram.extend_from_slice(&(len as u16).to_be_bytes());
    dgram.extend_from_slice(&[0, 0]);
    dgram.extend_from_slice(payload);

    let sum = pseudo_header_sum(src.ip, dst.ip, 17, len);
    let csum = match fold_checksum(ones_complement_sum(sum, &dgram)) {
        0 => 0xffff,
        c => c,
    };
    dgram[6..8].copy_from_slice(&csum.to_be_bytes());
    dgram
}

/// Bare TCP header; the engine under test does not verify checksums.
pub fn tcp_segment(src_port: u16, dst_port: u16, flags: TcpFlags, payload: &[u8]) -> Vec<u8> {
    let mut seg = vec![0u8; TCP_HEADER_LEN];
    seg[0..2].copy_from_slice(&src_port.to_be_bytes());
    seg[2..4].copy_from_slice(&dst_port.to_be_bytes());
    seg[12] = ((TCP_HEADER_LEN / 4) as u8) << 4;
    seg[13] = flags.bits();
    seg[14..16].copy_from_slice(&1024u16.to_be_bytes());
    seg.extend_from_slice(payload);
    seg
}

pub fn arp_packet(oper: u16, sha: MacAddr, spa: Ipv4Addr, tha: MacAddr, tpa: Ipv4Addr) -> Vec<u8> {
    let mut arp = vec![0, 1, 0x08, 0x00, 6, 4];
    arp.extend_from_slice(&oper.to_be_bytes());
    arp.extend_from_slice(sha.as_bytes());
    arp.extend_from_slice(spa.as_bytes());
    arp.extend_from_slice(tha.as_bytes());
    arp.extend_from_slice(tpa.as_bytes());
    arp
}

/// The peer answering a request for `ip` with its own MAC.
pub fn arp_reply_frame(ip: Ipv4Addr) -> Vec<u8> {
    eth_frame(
        OUR_MAC,
        PEER_MAC,
        ETHERTYPE_ARP,
        &arp_packet(ARP_OPER_REPLY, PEER_MAC, ip, OUR_MAC, OUR_IP),
    )
}

/// The peer asking who has `OUR_IP`.
pub fn arp_request_frame() -> Vec<u8> {
    eth_frame(
        MacAddr::BROADCAST,
        PEER_MAC,
        ETHERTYPE_ARP,
        &arp_packet(ARP_OPER_REQUEST, PEER_MAC, PEER_IP, MacAddr::ZERO, OUR_IP),
    )
}

// =============================================================================
// Frame inspection
// =============================================================================

pub fn ethertype(frame: &[u8]) -> u16 {
    u16::from_be_bytes([frame[12], frame[13]])
}

pub fn dst_mac(frame: &[u8]) -> MacAddr {
    MacAddr::from_slice(frame).unwrap_or_default()
}

/// IPv4 header and payload of an Ethernet frame.
pub fn ip_of(frame: &[u8]) -> &[u8] {
    &frame[ETH_HEADER_LEN..]
}

/// Transport payload of an Ethernet/IPv4 frame.
pub fn l4_of(frame: &[u8]) -> &[u8] {
    let ip = ip_of(frame);
    &ip[(ip[0] & 0x0f) as usize * 4..]
}

pub fn ip_src(frame: &[u8]) -> Ipv4Addr {
    Ipv4Addr::from_slice(&ip_of(frame)[12..]).unwrap_or_default()
}

pub fn ip_dst(frame: &[u8]) -> Ipv4Addr {
    Ipv4Addr::from_slice(&ip_of(frame)[16..]).unwrap_or_default()
}

pub fn is_arp_request(frame: &[u8]) -> bool {
    ethertype(frame) == ETHERTYPE_ARP && frame[ETH_HEADER_LEN + 7] == ARP_OPER_REQUEST as u8
}

// =============================================================================
// TCP engine
// =============================================================================

/// Minimal engine: a SYN to a listening port becomes an established
/// connection in the backlog, payload is queued, FIN closes.  Nothing is
/// ever sent in response.
#[derive(Default)]
pub struct ScriptedTcp {
    pub retransmit: bool,
    pub reset_on_terminate: bool,
    pub terminated: Vec<SockAddr>,
    pub encapsulated: Vec<TcpFlags>,
}

impl<'p> TcpEngine<'p> for ScriptedTcp {
    fn retransmits(&self) -> bool {
        self.retransmit
    }

    fn input<B: BindingTable>(
        &mut self,
        ctx: TcpContext<'_, 'p, B>,
        _iface: IfaceId,
        src: Ipv4Addr,
        _dst: Ipv4Addr,
        mut pkt: PacketBuf<'p>,
    ) -> Option<TcpSegment<'p>> {
        let hdr = TcpHeader::parse(pkt.payload())?;
        let remote = SockAddr::new(src, hdr.src_port);

        if hdr.flags.contains(TcpFlags::SYN) {
            let listener = ctx.sockets.listener_for(hdr.dst_port)?;
            let cid = ctx
                .sockets
                .alloc_conn(hdr.dst_port, remote, ConnStatus::Connected)
                .ok()?;
            if ctx.sockets.add_backlog(listener, cid).is_err() {
                ctx.sockets.take_conn(cid);
            }
            return None;
        }

        let cid = ctx.sockets.conn_lookup(hdr.dst_port, remote)?;
        if hdr.flags.contains(TcpFlags::FIN) {
            ctx.sockets.set_conn_status(cid, ConnStatus::Closed);
        }
        pkt.pull_header(hdr.header_len).ok()?;
        if !pkt.is_empty() {
            let _ = ctx.sockets.deliver_to_conn(cid, pkt);
        }
        None
    }

    fn encapsulate(
        &mut self,
        conn: &mut TcpConn<'p>,
        flags: TcpFlags,
        pkt: &mut PacketBuf<'p>,
    ) -> Result<(), NetError> {
        self.encapsulated.push(flags);
        TcpHeader {
            src_port: conn.local_port,
            dst_port: conn.remote.port,
            seq: conn.seqid,
            ack: conn.ackid,
            flags,
            window: 1024,
            header_len: TCP_HEADER_LEN,
        }
        .push(pkt)
    }

    fn terminate(&mut self, conn: &TcpConn<'p>) -> Option<TcpFlags> {
        self.terminated.push(conn.remote);
        self.reset_on_terminate.then_some(TcpFlags::RST)
    }
}
