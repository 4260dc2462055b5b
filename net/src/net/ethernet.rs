//! Ethernet framing and the link output path for IPv4.

use mote_lib::klog_debug;

use super::arp;
use super::binding::BindingTable;
use super::netdev::NetDevice;
use super::netstack::NetStack;
use super::packetbuf::PacketBuf;
use super::tcp::TcpEngine;
use super::types::{EtherType, IfaceId, Ipv4Addr, MacAddr, NetError};
use super::{ETH_ADDR_LEN, ETH_HEADER_LEN};

/// Prepend an Ethernet header and transmit.
///
/// The packet cursor must sit on the network-layer payload.  A downed
/// interface sends nothing and reports [`NetError::NoRoute`].
pub fn output<'p, D, B, T>(
    stack: &mut NetStack<'p, D, B, T>,
    mut pkt: PacketBuf<'p>,
    iface: IfaceId,
    dst: MacAddr,
    ethertype: EtherType,
) -> Result<(), NetError>
where
    D: NetDevice<'p>,
    B: BindingTable,
    T: TcpEngine<'p>,
{
    let ifc = stack.iface(iface).ok_or(NetError::NoRoute)?;
    if !ifc.up {
        return Err(NetError::NoRoute);
    }
    let src = ifc.mac;

    let hdr = pkt.push_header(ETH_HEADER_LEN)?;
    hdr[..ETH_ADDR_LEN].copy_from_slice(dst.as_bytes());
    hdr[ETH_ADDR_LEN..2 * ETH_ADDR_LEN].copy_from_slice(src.as_bytes());
    hdr[12..14].copy_from_slice(&(ethertype as u16).to_be_bytes());

    match stack.dev.tx(iface, pkt) {
        Ok(()) => {
            stack.stats.tx_frames = stack.stats.tx_frames.wrapping_add(1);
            Ok(())
        }
        Err(e) => {
            stack.stats.tx_errors = stack.stats.tx_errors.wrapping_add(1);
            klog_debug!("eth: tx on {} failed: {}", iface, e);
            Err(e)
        }
    }
}

/// Link output for an IPv4 packet whose header is complete.
///
/// Broadcasts go straight out; a cached neighbor is framed immediately;
/// anything else is handed to ARP resolution with `retries` already spent.
/// Whether the address was cached is invisible to the caller.
pub fn output_ipv4<'p, D, B, T>(
    stack: &mut NetStack<'p, D, B, T>,
    pkt: PacketBuf<'p>,
    iface: IfaceId,
    next_hop: Ipv4Addr,
    retries: u8,
) -> Result<(), NetError>
where
    D: NetDevice<'p>,
    B: BindingTable,
    T: TcpEngine<'p>,
{
    let ifc = *stack.iface(iface).ok_or(NetError::NoRoute)?;

    if next_hop.is_broadcast() || next_hop == ifc.broadcast() {
        return output(stack, pkt, iface, MacAddr::BROADCAST, EtherType::Ipv4);
    }

    match stack.neighbors.lookup(next_hop) {
        Some(entry) => {
            let mac = entry.mac;
            output(stack, pkt, iface, mac, EtherType::Ipv4)
        }
        None => arp::resolve(stack, pkt, next_hop, iface, retries),
    }
}
