//! ICMP echo: answer requests, count replies, send requests.

use mote_lib::klog_debug;

use super::binding::BindingTable;
use super::ipv4::{self, OutputFlags};
use super::netdev::NetDevice;
use super::netstack::NetStack;
use super::packetbuf::{PacketBuf, tx_headroom};
use super::tcp::TcpEngine;
use super::types::{IfaceId, IpProtocol, Ipv4Addr, NetError};
use super::{ICMP_ECHO_REPLY, ICMP_ECHO_REQUEST, ICMP_HEADER_LEN, checksum};

/// Echo message fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Echo {
    pub id: u16,
    pub seq: u16,
}

/// Build an echo message around `data` and send it through IP output.
///
/// Replies may draw on the emergency reserve; requests use the main pool.
fn output<'p, D, B, T>(
    stack: &mut NetStack<'p, D, B, T>,
    iface: Option<IfaceId>,
    icmp_type: u8,
    echo: Echo,
    data: &[u8],
    src: Ipv4Addr,
    dst: Ipv4Addr,
) -> Result<(), NetError>
where
    D: NetDevice<'p>,
    B: BindingTable,
    T: TcpEngine<'p>,
{
    let mut pkt = if icmp_type == ICMP_ECHO_REPLY {
        PacketBuf::alloc_any(stack.pool)?
    } else {
        PacketBuf::alloc(stack.pool)?
    };
    pkt.reserve(tx_headroom(ICMP_HEADER_LEN))?;
    pkt.append(data)?;

    let hdr = pkt.push_header(ICMP_HEADER_LEN)?;
    hdr[0] = icmp_type;
    hdr[1] = 0;
    hdr[2..4].fill(0);
    hdr[4..6].copy_from_slice(&echo.id.to_be_bytes());
    hdr[6..8].copy_from_slice(&echo.seq.to_be_bytes());
    let csum = checksum(pkt.payload());
    pkt.payload_mut()[2..4].copy_from_slice(&csum.to_be_bytes());

    ipv4::push_header(&mut pkt, IpProtocol::Icmp as u8, src, dst)?;
    ipv4::output(stack, pkt, iface, OutputFlags::empty())
}

/// Send an echo request to `dst` via the default route.
pub fn send_echo_request<'p, D, B, T>(
    stack: &mut NetStack<'p, D, B, T>,
    dst: Ipv4Addr,
    echo: Echo,
    data: &[u8],
) -> Result<(), NetError>
where
    D: NetDevice<'p>,
    B: BindingTable,
    T: TcpEngine<'p>,
{
    output(stack, None, ICMP_ECHO_REQUEST, echo, data, Ipv4Addr::UNSPECIFIED, dst)
}

/// Handle an ICMP message (cursor on the IPv4 header).
///
/// The input packet is released when this returns, whatever branch ran.
pub fn handle_rx<'p, D, B, T>(stack: &mut NetStack<'p, D, B, T>, iface: IfaceId, mut pkt: PacketBuf<'p>)
where
    D: NetDevice<'p>,
    B: BindingTable,
    T: TcpEngine<'p>,
{
    let (src, dst) = ipv4::addresses(&pkt);
    let ihl = ipv4::header_len(&pkt);

    if pkt.pull_header(ihl).is_err() || pkt.len() < ICMP_HEADER_LEN {
        stack.stats.icmp_dropped = stack.stats.icmp_dropped.wrapping_add(1);
        return;
    }

    let msg = pkt.payload();
    if checksum(msg) != 0 {
        stack.stats.icmp_dropped = stack.stats.icmp_dropped.wrapping_add(1);
        klog_debug!("icmp: bad checksum from {}", src);
        return;
    }

    let echo = Echo {
        id: u16::from_be_bytes([msg[4], msg[5]]),
        seq: u16::from_be_bytes([msg[6], msg[7]]),
    };

    match msg[0] {
        ICMP_ECHO_REQUEST => {
            stack.stats.icmp_echo_requests = stack.stats.icmp_echo_requests.wrapping_add(1);
            let data = &msg[ICMP_HEADER_LEN..];
            if let Err(e) = output(stack, Some(iface), ICMP_ECHO_REPLY, echo, data, dst, src) {
                klog_debug!("icmp: echo reply to {} failed: {}", src, e);
            }
        }
        ICMP_ECHO_REPLY => {
            stack.stats.icmp_echo_replies = stack.stats.icmp_echo_replies.wrapping_add(1);
            klog_debug!("icmp: echo reply from {} id={} seq={}", src, echo.id, echo.seq);
        }
        other => {
            stack.stats.icmp_dropped = stack.stats.icmp_dropped.wrapping_add(1);
            klog_debug!("icmp: type {} from {} ignored", other, src);
        }
    }
}
