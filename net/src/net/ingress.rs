//! Ingress pipeline: single entry point for every received frame.

use mote_lib::klog_debug;

use super::binding::BindingTable;
use super::netdev::NetDevice;
use super::netstack::NetStack;
use super::packetbuf::PacketBuf;
use super::tcp::TcpEngine;
use super::types::{EtherType, IfaceId, MacAddr};
use super::{ETH_HEADER_LEN, arp, ipv4};

/// Process one received Ethernet frame.
///
/// 1. Require a full Ethernet header.
/// 2. Accept frames for our MAC, broadcast or multicast; drop the rest.
/// 3. Pull the Ethernet header.
/// 4. Dispatch by EtherType: ARP to [`arp::handle_rx`], IPv4 to
///    [`ipv4::handle_rx`].  Unknown EtherTypes are counted and dropped.
pub fn net_rx<'p, D, B, T>(stack: &mut NetStack<'p, D, B, T>, iface: IfaceId, mut pkt: PacketBuf<'p>)
where
    D: NetDevice<'p>,
    B: BindingTable,
    T: TcpEngine<'p>,
{
    stack.stats.rx_frames = stack.stats.rx_frames.wrapping_add(1);

    let Some(ifc) = stack.iface(iface).copied() else {
        klog_debug!("ingress: frame on unknown {}", iface);
        return;
    };
    if !ifc.up {
        return;
    }

    let (dst_mac, ethertype_raw) = {
        let frame = pkt.payload();
        if frame.len() < ETH_HEADER_LEN {
            klog_debug!("ingress: frame too short ({} < {})", frame.len(), ETH_HEADER_LEN);
            return;
        }
        let Some(dst) = MacAddr::from_slice(frame) else {
            return;
        };
        (dst, u16::from_be_bytes([frame[12], frame[13]]))
    };

    if dst_mac != ifc.mac && !dst_mac.is_broadcast() && !dst_mac.is_multicast() {
        stack.stats.rx_not_for_us = stack.stats.rx_not_for_us.wrapping_add(1);
        return;
    }

    if pkt.pull_header(ETH_HEADER_LEN).is_err() {
        return;
    }

    match EtherType::from_u16(ethertype_raw) {
        Some(EtherType::Arp) => arp::handle_rx(stack, iface, pkt),
        Some(EtherType::Ipv4) => ipv4::handle_rx(stack, iface, pkt),
        None => {
            stack.stats.rx_unknown_ethertype = stack.stats.rx_unknown_ethertype.wrapping_add(1);
            klog_debug!("ingress: unknown EtherType 0x{:04x}, dropping", ethertype_raw);
        }
    }
}
