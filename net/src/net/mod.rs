//! Protocol constants, wire checksums and the module tree of the stack.

pub mod arp;
pub mod binding;
pub mod bsd;
pub mod config;
pub mod ethernet;
pub mod event;
pub mod icmp;
pub mod ingress;
pub mod ipv4;
pub mod neighbor;
pub mod netdev;
pub mod netstack;
pub mod packetbuf;
pub mod pool;
pub mod route;
pub mod socket;
pub mod tcp;
pub mod timer;
pub mod types;
pub mod udp;

#[cfg(test)]
mod testutil;

#[cfg(test)]
mod arp_tests;
#[cfg(test)]
mod packetbuf_tests;

// =============================================================================
// Ethernet
// =============================================================================

pub const ETH_HEADER_LEN: usize = 14;
pub const ETH_ADDR_LEN: usize = 6;

// =============================================================================
// ARP (Ethernet + IPv4 only)
// =============================================================================

pub const ARP_HTYPE_ETHERNET: u16 = 1;
pub const ARP_PTYPE_IPV4: u16 = 0x0800;
pub const ARP_HLEN_ETHERNET: u8 = 6;
pub const ARP_PLEN_IPV4: u8 = 4;
pub const ARP_OPER_REQUEST: u16 = 1;
pub const ARP_OPER_REPLY: u16 = 2;
pub const ARP_PACKET_LEN: usize = 28;

// =============================================================================
// IPv4
// =============================================================================

pub const IPV4_HEADER_LEN: usize = 20;
/// Header length bounds in 32-bit words.
pub const IPV4_MIN_IHL: u8 = 5;
pub const IPV4_MAX_IHL: u8 = 15;
/// More-fragments bit in the flags/offset word.
pub const IPV4_FLAG_MF: u16 = 0x2000;
pub const IPV4_FLAG_DF: u16 = 0x4000;
pub const IPV4_FRAG_OFFSET_MASK: u16 = 0x1fff;

// =============================================================================
// ICMP / UDP / TCP
// =============================================================================

pub const ICMP_HEADER_LEN: usize = 8;
pub const ICMP_ECHO_REPLY: u8 = 0;
pub const ICMP_ECHO_REQUEST: u8 = 8;
pub const UDP_HEADER_LEN: usize = 8;
pub const TCP_HEADER_LEN: usize = 20;

// =============================================================================
// Checksums (RFC 1071)
// =============================================================================

/// Accumulate the one's-complement sum of `data` onto `sum`.
///
/// An odd trailing byte is padded with zero on the right.
pub fn ones_complement_sum(mut sum: u32, data: &[u8]) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum = sum.wrapping_add(u16::from_be_bytes([word[0], word[1]]) as u32);
    }
    if let [last] = chunks.remainder() {
        sum = sum.wrapping_add((*last as u32) << 8);
    }
    sum
}

/// Fold a running sum into the final 16-bit one's-complement checksum.
pub fn fold_checksum(mut sum: u32) -> u16 {
    while (sum >> 16) != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Internet checksum of `data`.  A buffer whose checksum field is already
/// filled in verifies to zero.
#[inline]
pub fn checksum(data: &[u8]) -> u16 {
    fold_checksum(ones_complement_sum(0, data))
}

/// Running sum of the IPv4 pseudo-header used by UDP and TCP.
pub fn pseudo_header_sum(
    src: types::Ipv4Addr,
    dst: types::Ipv4Addr,
    protocol: u8,
    l4_len: usize,
) -> u32 {
    let mut sum = ones_complement_sum(0, src.as_bytes());
    sum = ones_complement_sum(sum, dst.as_bytes());
    sum = sum.wrapping_add(protocol as u32);
    sum.wrapping_add(l4_len as u32)
}
