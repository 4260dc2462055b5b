//! ARP: wire format, request/reply handling and the resolution state machine.
//!
//! Each packet that needs an unknown hardware address goes through
//!
//! ```text
//! REQUESTED --reply--> RESOLVED   (packet framed and sent)
//!     |
//!     +--timer, retries left--> REQUESTED again (request re-sent)
//!     +--timer, retries spent--> EXHAUSTED (packet dropped)
//! ```
//!
//! The waiting packet and its metadata live in the stack's
//! [`ArpWaitList`](super::neighbor::ArpWaitList); the wait-list slot index is
//! the key of the retry timer and the timer token is stored in the entry, so
//! a retry that fires after the entry was resolved finds nothing to do.

use mote_lib::{klog_debug, klog_warn};

use super::binding::BindingTable;
use super::ethernet;
use super::netdev::NetDevice;
use super::netstack::NetStack;
use super::packetbuf::PacketBuf;
use super::tcp::TcpEngine;
use super::timer::{TimerKind, TimerToken};
use super::types::{EtherType, IfaceId, IpProtocol, Ipv4Addr, MacAddr, NetError};
use super::{
    ARP_HLEN_ETHERNET, ARP_HTYPE_ETHERNET, ARP_OPER_REPLY, ARP_OPER_REQUEST, ARP_PACKET_LEN,
    ARP_PLEN_IPV4, ARP_PTYPE_IPV4,
};

// =============================================================================
// Wire format
// =============================================================================

/// Decoded Ethernet/IPv4 ARP packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArpPacket {
    pub oper: u16,
    pub sha: MacAddr,
    pub spa: Ipv4Addr,
    pub tha: MacAddr,
    pub tpa: Ipv4Addr,
}

impl ArpPacket {
    /// Parse and validate `data`.  Only Ethernet/IPv4 ARP is accepted.
    pub fn parse(data: &[u8]) -> Result<Self, NetError> {
        if data.len() < ARP_PACKET_LEN {
            return Err(NetError::MalformedHeader);
        }
        let htype = u16::from_be_bytes([data[0], data[1]]);
        let ptype = u16::from_be_bytes([data[2], data[3]]);
        if htype != ARP_HTYPE_ETHERNET || ptype != ARP_PTYPE_IPV4 {
            return Err(NetError::UnsupportedProtocol);
        }
        if data[4] != ARP_HLEN_ETHERNET || data[5] != ARP_PLEN_IPV4 {
            return Err(NetError::MalformedHeader);
        }

        let field = |r: core::ops::Range<usize>| data.get(r).ok_or(NetError::MalformedHeader);
        Ok(Self {
            oper: u16::from_be_bytes([data[6], data[7]]),
            sha: MacAddr::from_slice(field(8..14)?).ok_or(NetError::MalformedHeader)?,
            spa: Ipv4Addr::from_slice(field(14..18)?).ok_or(NetError::MalformedHeader)?,
            tha: MacAddr::from_slice(field(18..24)?).ok_or(NetError::MalformedHeader)?,
            tpa: Ipv4Addr::from_slice(field(24..28)?).ok_or(NetError::MalformedHeader)?,
        })
    }

    pub fn write(&self, out: &mut [u8]) {
        out[0..2].copy_from_slice(&ARP_HTYPE_ETHERNET.to_be_bytes());
        out[2..4].copy_from_slice(&ARP_PTYPE_IPV4.to_be_bytes());
        out[4] = ARP_HLEN_ETHERNET;
        out[5] = ARP_PLEN_IPV4;
        out[6..8].copy_from_slice(&self.oper.to_be_bytes());
        out[8..14].copy_from_slice(self.sha.as_bytes());
        out[14..18].copy_from_slice(self.spa.as_bytes());
        out[18..24].copy_from_slice(self.tha.as_bytes());
        out[24..28].copy_from_slice(self.tpa.as_bytes());
    }
}

// =============================================================================
// Output
// =============================================================================

/// Build and transmit an ARP packet from `iface`.
///
/// ARP is control traffic: it may use the emergency reserve.
fn output<'p, D, B, T>(
    stack: &mut NetStack<'p, D, B, T>,
    iface: IfaceId,
    oper: u16,
    dst_mac: MacAddr,
    tpa: Ipv4Addr,
) -> Result<(), NetError>
where
    D: NetDevice<'p>,
    B: BindingTable,
    T: TcpEngine<'p>,
{
    let ifc = *stack.iface(iface).ok_or(NetError::NoRoute)?;
    let mut pkt = PacketBuf::alloc_any(stack.pool)?;

    let arp = ArpPacket {
        oper,
        sha: ifc.mac,
        spa: ifc.ipv4_addr,
        // Requests carry an all-zero target hardware address.
        tha: if dst_mac.is_broadcast() { MacAddr::ZERO } else { dst_mac },
        tpa,
    };
    let mut body = [0u8; ARP_PACKET_LEN];
    arp.write(&mut body);
    pkt.append(&body)?;

    ethernet::output(stack, pkt, iface, dst_mac, EtherType::Arp)
}

/// Broadcast a request for `target` on `iface`.
pub fn send_request<'p, D, B, T>(
    stack: &mut NetStack<'p, D, B, T>,
    iface: IfaceId,
    target: Ipv4Addr,
) -> Result<(), NetError>
where
    D: NetDevice<'p>,
    B: BindingTable,
    T: TcpEngine<'p>,
{
    output(stack, iface, ARP_OPER_REQUEST, MacAddr::BROADCAST, target)?;
    stack.stats.arp_requests_sent = stack.stats.arp_requests_sent.wrapping_add(1);
    klog_debug!("arp: who-has {} on {}", target, iface);
    Ok(())
}

// =============================================================================
// Input
// =============================================================================

/// Handle an ARP packet (cursor past the Ethernet header).
///
/// Requests for our address are answered.  Every reply is learned whatever
/// its target address (gratuitous and broadcast replies included) and
/// releases packets waiting on the sender.
pub fn handle_rx<'p, D, B, T>(stack: &mut NetStack<'p, D, B, T>, iface: IfaceId, pkt: PacketBuf<'p>)
where
    D: NetDevice<'p>,
    B: BindingTable,
    T: TcpEngine<'p>,
{
    let arp = match ArpPacket::parse(pkt.payload()) {
        Ok(arp) => arp,
        Err(e) => {
            stack.stats.arp_malformed = stack.stats.arp_malformed.wrapping_add(1);
            klog_debug!("arp: dropping frame on {}: {}", iface, e);
            return;
        }
    };
    drop(pkt);

    let Some(our_ip) = stack.iface(iface).map(|i| i.ipv4_addr) else {
        return;
    };
    if arp.spa.is_unspecified() {
        return;
    }

    match arp.oper {
        // Requests are only answered (and learned from) when they ask for us.
        ARP_OPER_REQUEST if arp.tpa != our_ip => {}
        ARP_OPER_REQUEST => {
            learn(stack, iface, arp.spa, arp.sha);
            match output(stack, iface, ARP_OPER_REPLY, arp.sha, arp.spa) {
                Ok(()) => stack.stats.arp_replies_sent = stack.stats.arp_replies_sent.wrapping_add(1),
                Err(e) => klog_debug!("arp: reply to {} failed: {}", arp.spa, e),
            }
        }
        ARP_OPER_REPLY => {
            klog_debug!("arp: {} is-at {}", arp.spa, arp.sha);
            learn(stack, iface, arp.spa, arp.sha);
        }
        other => {
            stack.stats.arp_malformed = stack.stats.arp_malformed.wrapping_add(1);
            klog_debug!("arp: unknown opcode {}", other);
        }
    }
}

/// Cache `ip -> mac` and release every packet that was waiting on `ip`.
fn learn<'p, D, B, T>(stack: &mut NetStack<'p, D, B, T>, iface: IfaceId, ip: Ipv4Addr, mac: MacAddr)
where
    D: NetDevice<'p>,
    B: BindingTable,
    T: TcpEngine<'p>,
{
    stack.neighbors.insert(ip, mac, iface);

    // Entries are moved out first; sending may queue new ones.
    for entry in stack.arp_wait.take_for(ip) {
        stack.timers.cancel(entry.timer);
        if let Err(e) = ethernet::output(stack, entry.pkt, entry.iface, mac, EtherType::Ipv4) {
            klog_debug!("arp: release of packet for {} failed: {}", ip, e);
        }
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Start resolving `next_hop` for `pkt` (cursor on its IPv4 header).
///
/// A request goes out immediately.  The packet is then either parked on the
/// wait list with a retry timer, or dropped when it is TCP and the transport
/// engine retransmits on its own.  `retries` counts attempts already made
/// for this packet.
pub fn resolve<'p, D, B, T>(
    stack: &mut NetStack<'p, D, B, T>,
    pkt: PacketBuf<'p>,
    next_hop: Ipv4Addr,
    iface: IfaceId,
    retries: u8,
) -> Result<(), NetError>
where
    D: NetDevice<'p>,
    B: BindingTable,
    T: TcpEngine<'p>,
{
    if let Err(e) = send_request(stack, iface, next_hop) {
        // The retry timer sends another request later.
        klog_debug!("arp: request for {} not sent: {}", next_hop, e);
    }

    let is_tcp = pkt.payload().get(9) == Some(&(IpProtocol::Tcp as u8));
    if is_tcp && stack.tcp.retransmits() {
        stack.stats.arp_transport_drops = stack.stats.arp_transport_drops.wrapping_add(1);
        return Ok(());
    }

    let Some(slot) = stack.arp_wait.vacant() else {
        stack.stats.arp_wait_full = stack.stats.arp_wait_full.wrapping_add(1);
        klog_debug!("arp: wait list full, dropping packet for {}", next_hop);
        return Err(NetError::TableFull);
    };

    let timeout = stack.config.arp_retry_timeout_us;
    let token = match stack.timers.schedule(timeout, TimerKind::ArpRetry, slot as u32) {
        Ok(token) => token,
        Err(e) => {
            klog_warn!("arp: no timer for {}, dropping packet", next_hop);
            return Err(e);
        }
    };

    if stack
        .arp_wait
        .insert(slot, pkt, iface, next_hop, retries, token)
        .is_err()
    {
        stack.timers.cancel(token);
        return Err(NetError::TableFull);
    }
    Ok(())
}

/// Retry timer for wait-list slot `slot` fired.
pub(crate) fn on_retry_timer<'p, D, B, T>(stack: &mut NetStack<'p, D, B, T>, slot: usize, token: TimerToken)
where
    D: NetDevice<'p>,
    B: BindingTable,
    T: TcpEngine<'p>,
{
    let Some(entry) = stack.arp_wait.take_if_timer(slot, token) else {
        // Resolved or cancelled before this fire was dispatched.
        return;
    };

    if entry.retries >= stack.config.arp_retries {
        stack.stats.arp_exhausted = stack.stats.arp_exhausted.wrapping_add(1);
        klog_debug!(
            "arp: {} unresolved after {} retries, dropping packet",
            entry.target,
            entry.retries
        );
        return;
    }

    let retries = entry.retries + 1;
    if let Err(e) = ethernet::output_ipv4(stack, entry.pkt, entry.iface, entry.target, retries) {
        klog_debug!("arp: retry {} for {} failed: {}", retries, entry.target, e);
    }
}

/// Periodic cache expiry: sweep and re-arm.
pub(crate) fn on_expire_timer<'p, D, B, T>(stack: &mut NetStack<'p, D, B, T>)
where
    D: NetDevice<'p>,
    B: BindingTable,
    T: TcpEngine<'p>,
{
    let removed = stack.neighbors.sweep();
    if removed > 0 {
        stack.stats.arp_expired = stack.stats.arp_expired.wrapping_add(removed as u32);
        klog_debug!("arp: expired {} entries", removed);
    }

    if let Some(period) = stack.config.arp_expiry_us {
        if stack.timers.schedule(period, TimerKind::ArpExpire, 0).is_err() {
            klog_warn!("arp: could not re-arm expiry timer");
        }
    }
}
