//! The seam between IP, the socket layer and a TCP engine.
//!
//! The segment and window state machine is not part of this crate.  A
//! [`TcpEngine`] implementation receives inbound segments and builds headers
//! for outbound data; the socket layer owns the [`TcpConn`] records, their
//! receive queues and the listen backlogs, and exposes them to the engine
//! through [`TcpContext`].  [`NullTcp`] is the engine of a stack that only
//! speaks UDP and ICMP.

use bitflags::bitflags;
use heapless::Deque;
use mote_lib::klog_debug;

use super::binding::BindingTable;
use super::config::CONN_RX_QUEUE_LEN;
use super::ipv4::{self, OutputFlags};
use super::netdev::NetDevice;
use super::netstack::NetStack;
use super::packetbuf::PacketBuf;
use super::pool::PacketPool;
use super::socket::{SocketId, SocketTable};
use super::types::{IfaceId, IpProtocol, Ipv4Addr, NetError, Port, SockAddr};
use super::TCP_HEADER_LEN;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TcpFlags: u8 {
        const FIN = 1 << 0;
        const SYN = 1 << 1;
        const RST = 1 << 2;
        const PSH = 1 << 3;
        const ACK = 1 << 4;
        const URG = 1 << 5;
    }
}

/// Connection status as seen by the socket layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnStatus {
    SynSent,
    SynReceived,
    Connected,
    Closing,
    Closed,
}

/// A transport connection owned by the socket layer.
#[derive(Debug)]
pub struct TcpConn<'p> {
    pub local_port: Port,
    pub remote: SockAddr,
    pub status: ConnStatus,
    /// Next sequence number to send.
    pub seqid: u32,
    /// Next sequence number expected from the peer.
    pub ackid: u32,
    pub(crate) rx: Deque<PacketBuf<'p>, CONN_RX_QUEUE_LEN>,
    /// Socket holding this connection; `None` while it waits in a backlog.
    pub(crate) owner: Option<SocketId>,
}

impl<'p> TcpConn<'p> {
    pub fn new(local_port: Port, remote: SockAddr, status: ConnStatus) -> Self {
        Self {
            local_port,
            remote,
            status,
            seqid: 0,
            ackid: 0,
            rx: Deque::new(),
            owner: None,
        }
    }

    /// Segments received and not yet read.
    pub fn queued(&self) -> usize {
        self.rx.len()
    }
}

// =============================================================================
// Header
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: Port,
    pub dst_port: Port,
    pub seq: u32,
    pub ack: u32,
    pub flags: TcpFlags,
    pub window: u16,
    /// Header length in bytes, options included.
    pub header_len: usize,
}

impl TcpHeader {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < TCP_HEADER_LEN {
            return None;
        }
        let header_len = (data[12] >> 4) as usize * 4;
        if header_len < TCP_HEADER_LEN || header_len > data.len() {
            return None;
        }
        Some(Self {
            src_port: Port::from_network_bytes([data[0], data[1]]),
            dst_port: Port::from_network_bytes([data[2], data[3]]),
            seq: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ack: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            flags: TcpFlags::from_bits_truncate(data[13]),
            window: u16::from_be_bytes([data[14], data[15]]),
            header_len,
        })
    }

    /// Prepend this header (without options) to `pkt`; checksum left zero.
    pub fn push(&self, pkt: &mut PacketBuf<'_>) -> Result<(), NetError> {
        let hdr = pkt.push_header(TCP_HEADER_LEN)?;
        hdr.fill(0);
        hdr[0..2].copy_from_slice(&self.src_port.to_network_bytes());
        hdr[2..4].copy_from_slice(&self.dst_port.to_network_bytes());
        hdr[4..8].copy_from_slice(&self.seq.to_be_bytes());
        hdr[8..12].copy_from_slice(&self.ack.to_be_bytes());
        hdr[12] = ((TCP_HEADER_LEN / 4) as u8) << 4;
        hdr[13] = self.flags.bits();
        hdr[14..16].copy_from_slice(&self.window.to_be_bytes());
        Ok(())
    }
}

// =============================================================================
// Engine interface
// =============================================================================

/// What an engine may touch while handling a segment.
pub struct TcpContext<'a, 'p, B> {
    pub pool: &'p PacketPool,
    pub sockets: &'a mut SocketTable<'p, B>,
}

/// A segment the engine wants sent; `pkt` starts at the TCP header.
#[derive(Debug)]
pub struct TcpSegment<'p> {
    pub dst: Ipv4Addr,
    pub pkt: PacketBuf<'p>,
}

pub trait TcpEngine<'p> {
    /// `true` if the engine retransmits unacknowledged segments itself.
    ///
    /// ARP then drops TCP packets instead of parking them.
    fn retransmits(&self) -> bool {
        false
    }

    /// Process an inbound segment (cursor on the TCP header, L3 marked).
    fn input<B: BindingTable>(
        &mut self,
        ctx: TcpContext<'_, 'p, B>,
        iface: IfaceId,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        pkt: PacketBuf<'p>,
    ) -> Option<TcpSegment<'p>>;

    /// Prepend the TCP header for `conn` to `pkt` (cursor on the payload).
    fn encapsulate(
        &mut self,
        conn: &mut TcpConn<'p>,
        flags: TcpFlags,
        pkt: &mut PacketBuf<'p>,
    ) -> Result<(), NetError>;

    /// The socket layer is discarding `conn`.  Returns the flags of a final
    /// segment to send, if any.
    fn terminate(&mut self, conn: &TcpConn<'p>) -> Option<TcpFlags>;
}

/// Engine for stacks without TCP: segments are dropped, nothing is sent.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullTcp;

impl<'p> TcpEngine<'p> for NullTcp {
    fn input<B: BindingTable>(
        &mut self,
        _ctx: TcpContext<'_, 'p, B>,
        _iface: IfaceId,
        src: Ipv4Addr,
        _dst: Ipv4Addr,
        _pkt: PacketBuf<'p>,
    ) -> Option<TcpSegment<'p>> {
        klog_debug!("tcp: no engine, dropping segment from {}", src);
        None
    }

    fn encapsulate(
        &mut self,
        _conn: &mut TcpConn<'p>,
        _flags: TcpFlags,
        _pkt: &mut PacketBuf<'p>,
    ) -> Result<(), NetError> {
        Err(NetError::UnsupportedProtocol)
    }

    fn terminate(&mut self, _conn: &TcpConn<'p>) -> Option<TcpFlags> {
        None
    }
}

// =============================================================================
// IP glue
// =============================================================================

/// Handle a TCP segment (cursor on the IPv4 header) by passing it to the engine.
pub fn handle_rx<'p, D, B, T>(stack: &mut NetStack<'p, D, B, T>, iface: IfaceId, mut pkt: PacketBuf<'p>)
where
    D: NetDevice<'p>,
    B: BindingTable,
    T: TcpEngine<'p>,
{
    stack.stats.tcp_segments = stack.stats.tcp_segments.wrapping_add(1);

    let (src, dst) = ipv4::addresses(&pkt);
    let ihl = ipv4::header_len(&pkt);
    if pkt.pull_header(ihl).is_err() {
        return;
    }
    pkt.mark_l4();

    let ctx = TcpContext {
        pool: stack.pool,
        sockets: &mut stack.sockets,
    };
    if let Some(segment) = stack.tcp.input(ctx, iface, src, dst, pkt) {
        if let Err(e) = send_segment(stack, Some(iface), dst, segment) {
            klog_debug!("tcp: response to {} not sent: {}", src, e);
        }
    }
}

/// Wrap a segment in IPv4 and send it.
pub(crate) fn send_segment<'p, D, B, T>(
    stack: &mut NetStack<'p, D, B, T>,
    iface: Option<IfaceId>,
    src: Ipv4Addr,
    segment: TcpSegment<'p>,
) -> Result<(), NetError>
where
    D: NetDevice<'p>,
    B: BindingTable,
    T: TcpEngine<'p>,
{
    let TcpSegment { dst, mut pkt } = segment;
    ipv4::push_header(&mut pkt, IpProtocol::Tcp as u8, src, dst)?;
    ipv4::output(stack, pkt, iface, OutputFlags::empty())
}
