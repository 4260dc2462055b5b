//! IPv4 output (header fill, checksums, next hop) and input (validation and
//! protocol dispatch).
//!
//! Upper layers prepend a bare header with [`push_header`] that carries only
//! the protocol and the addresses; [`output`] completes it.  An inbound
//! packet that fails any check is dropped and counted in
//! [`NetStats`](super::netdev::NetStats); nothing is reported to the sender.

use bitflags::bitflags;
use mote_lib::klog_debug;

use super::binding::BindingTable;
use super::netdev::{NetDevice, NetDeviceFeatures};
use super::netstack::NetStack;
use super::packetbuf::PacketBuf;
use super::tcp::{self, TcpEngine};
use super::types::{IfaceId, IpProtocol, Ipv4Addr, NetError};
use super::{
    IPV4_FLAG_DF, IPV4_FLAG_MF, IPV4_FRAG_OFFSET_MASK, IPV4_HEADER_LEN, IPV4_MAX_IHL,
    IPV4_MIN_IHL, checksum, ethernet, icmp, route, udp,
};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct OutputFlags: u8 {
        /// Set the DF bit.
        const DONT_FRAGMENT = 1 << 0;
        /// Leave the UDP/TCP checksum as the caller wrote it.
        const NO_TRANSPORT_CHECKSUM = 1 << 1;
    }
}

/// Prepend a 20-byte header holding only `proto`, `src` and `dst`.
///
/// `src` may be unspecified; [`output`] then fills in the interface address.
pub fn push_header(
    pkt: &mut PacketBuf<'_>,
    proto: u8,
    src: Ipv4Addr,
    dst: Ipv4Addr,
) -> Result<(), NetError> {
    let hdr = pkt.push_header(IPV4_HEADER_LEN)?;
    hdr.fill(0);
    hdr[9] = proto;
    hdr[12..16].copy_from_slice(src.as_bytes());
    hdr[16..20].copy_from_slice(dst.as_bytes());
    Ok(())
}

// =============================================================================
// Output
// =============================================================================

/// Complete the IPv4 header of `pkt` (cursor on the header) and send it.
///
/// - `iface = None` picks the interface whose subnet holds the destination,
///   falling back to the default route's interface ([`NetError::NoRoute`] if
///   there is none or the interface is down).
/// - A zero destination fails with [`NetError::NoDestination`]; a zero
///   protocol with [`NetError::ProtocolNotSet`].
/// - UDP and TCP payloads get their pseudo-header checksum unless
///   [`OutputFlags::NO_TRANSPORT_CHECKSUM`] is set.
///
/// The packet is consumed on every path.  `Ok` means it was framed or parked
/// for address resolution.
pub fn output<'p, D, B, T>(
    stack: &mut NetStack<'p, D, B, T>,
    mut pkt: PacketBuf<'p>,
    iface: Option<IfaceId>,
    flags: OutputFlags,
) -> Result<(), NetError>
where
    D: NetDevice<'p>,
    B: BindingTable,
    T: TcpEngine<'p>,
{
    let (proto, src, dst) = {
        let hdr = pkt.payload();
        if hdr.len() < IPV4_HEADER_LEN {
            return Err(NetError::MalformedHeader);
        }
        let src = Ipv4Addr::from_slice(&hdr[12..]).ok_or(NetError::MalformedHeader)?;
        let dst = Ipv4Addr::from_slice(&hdr[16..]).ok_or(NetError::MalformedHeader)?;
        (hdr[9], src, dst)
    };

    if dst.is_unspecified() {
        return Err(NetError::NoDestination);
    }
    if proto == 0 {
        return Err(NetError::ProtocolNotSet);
    }

    let iface = match iface {
        Some(iface) => iface,
        None => select_iface(stack, dst)?,
    };
    let ifc = *stack.iface(iface).ok_or(NetError::NoRoute)?;
    if !ifc.up {
        return Err(NetError::NoRoute);
    }
    let src = if src.is_unspecified() { ifc.ipv4_addr } else { src };

    let total_len = u16::try_from(pkt.len()).map_err(|_| NetError::BufferOverrun)?;
    let frag = if flags.contains(OutputFlags::DONT_FRAGMENT) { IPV4_FLAG_DF } else { 0 };
    let ttl = stack.config.ip_ttl;

    {
        let hdr = &mut pkt.payload_mut()[..IPV4_HEADER_LEN];
        hdr[0] = 0x40 | IPV4_MIN_IHL;
        hdr[1] = 0;
        hdr[2..4].copy_from_slice(&total_len.to_be_bytes());
        hdr[4..6].copy_from_slice(&0u16.to_be_bytes());
        hdr[6..8].copy_from_slice(&frag.to_be_bytes());
        hdr[8] = ttl;
        hdr[10..12].fill(0);
        hdr[12..16].copy_from_slice(src.as_bytes());
        let csum = checksum(hdr);
        hdr[10..12].copy_from_slice(&csum.to_be_bytes());
    }
    pkt.mark_l3();

    if !flags.contains(OutputFlags::NO_TRANSPORT_CHECKSUM) {
        if let Some(proto @ (IpProtocol::Udp | IpProtocol::Tcp)) = IpProtocol::from_u8(proto) {
            pkt.set_l4(pkt.head() + IPV4_HEADER_LEN as u16);
            pkt.fill_transport_checksum(proto, src, dst)?;
        }
    }

    let next_hop = route::next_hop(&ifc, stack.route.as_ref(), dst)?;
    ethernet::output_ipv4(stack, pkt, iface, next_hop, 0)
}

/// Interface for a packet sent without one: the first interface whose subnet
/// holds `dst`, else the default route's interface.
fn select_iface<'p, D, B, T>(stack: &NetStack<'p, D, B, T>, dst: Ipv4Addr) -> Result<IfaceId, NetError> {
    stack
        .ifaces
        .iter()
        .position(|i| i.up && i.is_on_link(dst))
        .map(|idx| IfaceId(idx as u8))
        .or(stack.route.map(|r| r.iface))
        .ok_or(NetError::NoRoute)
}

// =============================================================================
// Input
// =============================================================================

/// Why an inbound packet was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Reject {
    BadVersion,
    BadHeaderLen,
    BadLength,
    NotForUs,
    TtlZero,
    Fragment,
    BadChecksum,
}

/// Header fields the dispatch step needs.
struct Accepted {
    proto: u8,
    total_len: usize,
}

fn validate(data: &[u8], local: Ipv4Addr, verify_checksum: bool) -> Result<Accepted, Reject> {
    if data.len() < IPV4_HEADER_LEN {
        return Err(Reject::BadHeaderLen);
    }
    if data[0] >> 4 != 4 {
        return Err(Reject::BadVersion);
    }

    let ihl_words = data[0] & 0x0f;
    if !(IPV4_MIN_IHL..=IPV4_MAX_IHL).contains(&ihl_words) {
        return Err(Reject::BadHeaderLen);
    }
    let ihl = ihl_words as usize * 4;
    if data.len() < ihl {
        return Err(Reject::BadHeaderLen);
    }

    let total_len = u16::from_be_bytes([data[2], data[3]]) as usize;
    if total_len < ihl || total_len > data.len() {
        return Err(Reject::BadLength);
    }

    if data[16..20] != *local.as_bytes() {
        return Err(Reject::NotForUs);
    }
    if data[8] == 0 {
        return Err(Reject::TtlZero);
    }

    let frag = u16::from_be_bytes([data[6], data[7]]);
    if frag & IPV4_FLAG_MF != 0 || frag & IPV4_FRAG_OFFSET_MASK != 0 {
        return Err(Reject::Fragment);
    }

    if verify_checksum && checksum(&data[..ihl]) != 0 {
        return Err(Reject::BadChecksum);
    }

    Ok(Accepted {
        proto: data[9],
        total_len,
    })
}

/// Handle an IPv4 packet (cursor past the Ethernet header).
///
/// Accepted packets are trimmed to the IP total length, marked at L3 and
/// handed to ICMP, UDP or TCP with the cursor still on the IP header.
pub fn handle_rx<'p, D, B, T>(stack: &mut NetStack<'p, D, B, T>, iface: IfaceId, mut pkt: PacketBuf<'p>)
where
    D: NetDevice<'p>,
    B: BindingTable,
    T: TcpEngine<'p>,
{
    let Some(local) = stack.iface(iface).map(|i| i.ipv4_addr) else {
        return;
    };
    let verify = !stack.dev.features().contains(NetDeviceFeatures::CHECKSUM_RX);

    let accepted = match validate(pkt.payload(), local, verify) {
        Ok(accepted) => accepted,
        Err(reason) => {
            let stats = &mut stack.stats;
            let counter = match reason {
                Reject::BadVersion => &mut stats.ip_bad_version,
                Reject::BadHeaderLen => &mut stats.ip_bad_header_len,
                Reject::BadLength => &mut stats.ip_bad_length,
                Reject::NotForUs => &mut stats.ip_not_for_us,
                Reject::TtlZero => &mut stats.ip_ttl_zero,
                Reject::Fragment => &mut stats.ip_fragments,
                Reject::BadChecksum => &mut stats.ip_bad_checksum,
            };
            *counter = counter.wrapping_add(1);
            klog_debug!("ipv4: dropping packet on {}: {:?}", iface, reason);
            return;
        }
    };

    pkt.truncate(accepted.total_len);
    pkt.mark_l3();

    match IpProtocol::from_u8(accepted.proto) {
        Some(IpProtocol::Icmp) => icmp::handle_rx(stack, iface, pkt),
        Some(IpProtocol::Udp) => udp::handle_rx(stack, iface, pkt),
        Some(IpProtocol::Tcp) => tcp::handle_rx(stack, iface, pkt),
        None => {
            stack.stats.ip_unknown_protocol = stack.stats.ip_unknown_protocol.wrapping_add(1);
            klog_debug!("ipv4: unknown protocol {}, dropping", accepted.proto);
            return;
        }
    }
    stack.stats.ip_rx_delivered = stack.stats.ip_rx_delivered.wrapping_add(1);
}

/// Source and destination addresses of the header at the packet's L3 mark.
pub(crate) fn addresses(pkt: &PacketBuf<'_>) -> (Ipv4Addr, Ipv4Addr) {
    let hdr = pkt.l3_header();
    let src = Ipv4Addr::from_slice(hdr.get(12..).unwrap_or_default()).unwrap_or_default();
    let dst = Ipv4Addr::from_slice(hdr.get(16..).unwrap_or_default()).unwrap_or_default();
    (src, dst)
}

/// Header length in bytes of the header at the cursor.
#[inline]
pub(crate) fn header_len(pkt: &PacketBuf<'_>) -> usize {
    pkt.payload().first().map_or(IPV4_HEADER_LEN, |b| (b & 0x0f) as usize * 4)
}
