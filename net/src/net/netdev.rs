//! Driver seam and stack statistics.

use bitflags::bitflags;

use super::packetbuf::PacketBuf;
use super::pool::PacketPool;
use super::types::{IfaceId, NetError};

/// A link-layer device as seen by the stack.
///
/// The stack hands over complete Ethernet frames and pulls received frames
/// in the cooperative context; the driver's interrupt handler only posts
/// [`NetEvent::RxReady`](super::event::NetEvent::RxReady).
pub trait NetDevice<'p> {
    /// Transmit one frame.  The packet is consumed whether or not it is sent.
    fn tx(&mut self, iface: IfaceId, pkt: PacketBuf<'p>) -> Result<(), NetError>;

    /// Take the next received frame for `iface`, copying it into `pool`.
    fn poll_rx(&mut self, iface: IfaceId, pool: &'p PacketPool) -> Option<PacketBuf<'p>>;

    fn features(&self) -> NetDeviceFeatures {
        NetDeviceFeatures::empty()
    }
}

bitflags! {
    /// Capabilities a driver advertises.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct NetDeviceFeatures: u32 {
        /// Hardware verified the IPv4 header checksum of received frames.
        const CHECKSUM_RX = 1 << 0;
    }
}

/// Counters kept by one stack instance.
///
/// Validation drops are counted here instead of being reported to callers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NetStats {
    pub rx_frames: u32,
    pub tx_frames: u32,
    pub tx_errors: u32,
    pub rx_not_for_us: u32,
    pub rx_unknown_ethertype: u32,

    pub arp_requests_sent: u32,
    pub arp_replies_sent: u32,
    pub arp_malformed: u32,
    /// Packets dropped instead of queued because the transport retransmits.
    pub arp_transport_drops: u32,
    pub arp_wait_full: u32,
    pub arp_exhausted: u32,
    pub arp_expired: u32,

    pub ip_rx_delivered: u32,
    pub ip_bad_version: u32,
    pub ip_bad_header_len: u32,
    pub ip_bad_length: u32,
    pub ip_not_for_us: u32,
    pub ip_ttl_zero: u32,
    pub ip_fragments: u32,
    pub ip_bad_checksum: u32,
    pub ip_unknown_protocol: u32,

    pub icmp_echo_requests: u32,
    pub icmp_echo_replies: u32,
    pub icmp_dropped: u32,

    pub udp_delivered: u32,
    pub udp_no_listener: u32,
    pub udp_dropped: u32,

    pub tcp_segments: u32,
}
