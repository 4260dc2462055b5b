//! Minimal UDP: header build and parse, demux into datagram sockets.

use mote_lib::klog_debug;

use super::UDP_HEADER_LEN;
use super::binding::BindingTable;
use super::ipv4::{self, OutputFlags};
use super::netdev::NetDevice;
use super::netstack::NetStack;
use super::packetbuf::PacketBuf;
use super::socket::Delivery;
use super::tcp::TcpEngine;
use super::types::{IfaceId, IpProtocol, Ipv4Addr, NetError, Port, SockAddr};

/// Parsed UDP header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UdpHeader {
    pub src_port: Port,
    pub dst_port: Port,
    pub len: u16,
    pub checksum: u16,
}

impl UdpHeader {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < UDP_HEADER_LEN {
            return None;
        }
        Some(Self {
            src_port: Port::from_network_bytes([data[0], data[1]]),
            dst_port: Port::from_network_bytes([data[2], data[3]]),
            len: u16::from_be_bytes([data[4], data[5]]),
            checksum: u16::from_be_bytes([data[6], data[7]]),
        })
    }
}

/// Send `pkt` (cursor on the payload) from `src_port` to `dst`.
///
/// The checksum is left to IP output.
pub fn output<'p, D, B, T>(
    stack: &mut NetStack<'p, D, B, T>,
    mut pkt: PacketBuf<'p>,
    src_port: Port,
    dst: SockAddr,
) -> Result<(), NetError>
where
    D: NetDevice<'p>,
    B: BindingTable,
    T: TcpEngine<'p>,
{
    let len = u16::try_from(pkt.len() + UDP_HEADER_LEN).map_err(|_| NetError::BufferOverrun)?;

    let hdr = pkt.push_header(UDP_HEADER_LEN)?;
    hdr[0..2].copy_from_slice(&src_port.to_network_bytes());
    hdr[2..4].copy_from_slice(&dst.port.to_network_bytes());
    hdr[4..6].copy_from_slice(&len.to_be_bytes());
    hdr[6..8].fill(0);

    ipv4::push_header(&mut pkt, IpProtocol::Udp as u8, Ipv4Addr::UNSPECIFIED, dst.ip)?;
    ipv4::output(stack, pkt, None, OutputFlags::empty())
}

/// Handle a UDP datagram (cursor on the IPv4 header).
///
/// The datagram is queued on the socket bound to its destination port with
/// the cursor on the payload and the L3/L4 marks kept, so the socket layer
/// can report the sender.
pub fn handle_rx<'p, D, B, T>(stack: &mut NetStack<'p, D, B, T>, iface: IfaceId, mut pkt: PacketBuf<'p>)
where
    D: NetDevice<'p>,
    B: BindingTable,
    T: TcpEngine<'p>,
{
    let (src, dst) = ipv4::addresses(&pkt);
    let ihl = ipv4::header_len(&pkt);
    if pkt.pull_header(ihl).is_err() {
        stack.stats.udp_dropped = stack.stats.udp_dropped.wrapping_add(1);
        return;
    }
    pkt.mark_l4();

    let hdr = match UdpHeader::parse(pkt.payload()) {
        Some(hdr) if (hdr.len as usize) >= UDP_HEADER_LEN && (hdr.len as usize) <= pkt.len() => hdr,
        _ => {
            stack.stats.udp_dropped = stack.stats.udp_dropped.wrapping_add(1);
            klog_debug!("udp: malformed datagram from {} on {}", src, iface);
            return;
        }
    };
    pkt.truncate(hdr.len as usize);

    // A zero checksum means the sender did not compute one.
    if hdr.checksum != 0 && pkt.transport_checksum(IpProtocol::Udp, src, dst) != Some(hdr.checksum) {
        stack.stats.udp_dropped = stack.stats.udp_dropped.wrapping_add(1);
        klog_debug!("udp: bad checksum from {}", src);
        return;
    }

    if pkt.pull_header(UDP_HEADER_LEN).is_err() {
        return;
    }

    match stack.sockets.deliver_datagram(hdr.dst_port, pkt) {
        Delivery::Queued => stack.stats.udp_delivered = stack.stats.udp_delivered.wrapping_add(1),
        Delivery::NoListener => {
            stack.stats.udp_no_listener = stack.stats.udp_no_listener.wrapping_add(1);
            klog_debug!("udp: no socket on port {}", hdr.dst_port);
        }
        Delivery::QueueFull => {
            stack.stats.udp_dropped = stack.stats.udp_dropped.wrapping_add(1);
            klog_debug!("udp: queue full on port {}", hdr.dst_port);
        }
    }
}
