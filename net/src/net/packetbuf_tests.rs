use std::vec::Vec;

use mote_lib::testing::TestResult;
use mote_lib::{assert_eq_test, assert_err, assert_ok, assert_test, pass};

use super::packetbuf::{HEADROOM, PacketBuf, tx_headroom};
use super::pool::{BUF_SIZE, EMERGENCY_POOL_SIZE, POOL_SIZE, PacketPool, PoolKind};
use super::types::{IpProtocol, Ipv4Addr, NetError};
use super::{IPV4_HEADER_LEN, UDP_HEADER_LEN, checksum};

pub fn test_pool_alloc_and_release() -> TestResult {
    let pool = PacketPool::new();
    assert_eq_test!(pool.available(), POOL_SIZE);
    assert_eq_test!(pool.available_emergency(), EMERGENCY_POOL_SIZE);

    let pkt = assert_ok!(PacketBuf::alloc(&pool));
    assert_eq_test!(pkt.origin(), PoolKind::Main);
    assert_eq_test!(pool.available(), POOL_SIZE - 1);
    assert_eq_test!(pool.in_use(), 1);

    drop(pkt);
    assert_eq_test!(pool.available(), POOL_SIZE, "drop returns the slot");
    assert_eq_test!(pool.in_use(), 0);

    pass!()
}

pub fn test_pool_exhaustion_is_recoverable() -> TestResult {
    let pool = PacketPool::new();
    let mut held = Vec::new();
    for _ in 0..POOL_SIZE {
        held.push(assert_ok!(PacketBuf::alloc(&pool)));
    }

    assert_err!(PacketBuf::alloc(&pool), NetError::OutOfPackets);
    assert_eq_test!(pool.alloc_failures(), 1);

    let reserve = assert_ok!(PacketBuf::alloc_any(&pool), "reserve still serves control traffic");
    assert_eq_test!(reserve.origin(), PoolKind::Emergency);
    assert_eq_test!(pool.available_emergency(), EMERGENCY_POOL_SIZE - 1);

    held.pop();
    let again = assert_ok!(PacketBuf::alloc(&pool), "freed slot is reusable");
    assert_eq_test!(again.origin(), PoolKind::Main);

    pass!()
}

pub fn test_emergency_pool_exhaustion() -> TestResult {
    let pool = PacketPool::new();
    let mut held = Vec::new();
    for _ in 0..EMERGENCY_POOL_SIZE {
        held.push(assert_ok!(PacketBuf::alloc_emergency(&pool)));
    }
    assert_err!(PacketBuf::alloc_emergency(&pool), NetError::OutOfPackets);
    assert_eq_test!(pool.available(), POOL_SIZE, "main pool untouched");

    pass!()
}

pub fn test_cursor_push_pull() -> TestResult {
    let pool = PacketPool::new();
    let mut pkt = assert_ok!(PacketBuf::alloc(&pool));
    assert_eq_test!(pkt.headroom(), HEADROOM as usize);
    assert_test!(pkt.is_empty());

    assert_ok!(pkt.append(b"payload"));
    {
        let hdr = assert_ok!(pkt.push_header(4));
        hdr.copy_from_slice(&[1, 2, 3, 4]);
    }
    assert_eq_test!(pkt.len(), 11);
    assert_eq_test!(&pkt.payload()[..4], &[1u8, 2, 3, 4][..]);

    let pulled = assert_ok!(pkt.pull_header(4)).to_vec();
    assert_eq_test!(pulled, std::vec![1u8, 2, 3, 4]);
    assert_eq_test!(pkt.payload(), &b"payload"[..]);

    assert_ok!(pkt.adjust(-4));
    assert_eq_test!(pkt.len(), 11, "negative adjust re-exposes the header");
    assert_ok!(pkt.adjust(4));
    assert_eq_test!(pkt.payload(), &b"payload"[..]);

    pass!()
}

pub fn test_cursor_bounds_are_checked() -> TestResult {
    let pool = PacketPool::new();
    let mut pkt = assert_ok!(PacketBuf::alloc(&pool));
    assert_ok!(pkt.append(&[0u8; 16]));

    assert_err!(pkt.adjust(17), NetError::BufferOverrun);
    assert_err!(pkt.adjust(-(HEADROOM as isize) - 1), NetError::BufferOverrun);
    assert_err!(pkt.pull_header(17), NetError::BufferOverrun);
    assert_err!(pkt.push_header(HEADROOM as usize + 1), NetError::BufferOverrun);
    assert_eq_test!(pkt.len(), 16, "failed moves leave the cursor alone");

    let big = std::vec![0u8; BUF_SIZE];
    assert_err!(pkt.append(&big), NetError::BufferOverrun);
    assert_err!(PacketBuf::from_raw_copy(&pool, &std::vec![0u8; BUF_SIZE + 1]), NetError::BufferOverrun);

    pass!()
}

pub fn test_reserve_sizes_headroom() -> TestResult {
    let pool = PacketPool::new();
    let mut pkt = assert_ok!(PacketBuf::alloc(&pool));

    let headroom = tx_headroom(UDP_HEADER_LEN);
    assert_eq_test!(headroom, 42);
    assert_ok!(pkt.reserve(headroom));
    assert_eq_test!(pkt.headroom(), headroom);
    assert_eq_test!(pkt.tailroom(), BUF_SIZE - headroom);

    assert_ok!(pkt.append(&std::vec![1u8; BUF_SIZE - headroom]));
    assert_ok!(pkt.push_header(headroom));
    assert_eq_test!(pkt.head(), 0);
    assert_eq_test!(pkt.len(), BUF_SIZE, "headers and payload fill the slot");

    assert_err!(pkt.reserve(0), NetError::BufferOverrun);
    let mut empty = assert_ok!(PacketBuf::alloc(&pool));
    assert_err!(empty.reserve(BUF_SIZE + 1), NetError::BufferOverrun);
    assert_eq_test!(empty.headroom(), HEADROOM as usize, "failed reserve leaves the cursor alone");
    pass!()
}

pub fn test_truncate_drops_padding() -> TestResult {
    let pool = PacketPool::new();
    let mut pkt = assert_ok!(PacketBuf::from_raw_copy(&pool, &[7u8; 60]));
    assert_eq_test!(pkt.head(), 0);
    pkt.truncate(42);
    assert_eq_test!(pkt.len(), 42);
    pkt.truncate(100);
    assert_eq_test!(pkt.len(), 42, "truncate never grows");

    pass!()
}

pub fn test_udp_checksum_fill_verifies() -> TestResult {
    let pool = PacketPool::new();
    let src = Ipv4Addr::new(10, 0, 0, 2);
    let dst = Ipv4Addr::new(10, 0, 0, 7);

    let mut pkt = assert_ok!(PacketBuf::alloc(&pool));
    assert_ok!(pkt.append(b"hello"));
    {
        let hdr = assert_ok!(pkt.push_header(UDP_HEADER_LEN));
        hdr.copy_from_slice(&[0x13, 0x88, 0x00, 0x35, 0x00, 0x0d, 0x00, 0x00]);
    }
    pkt.mark_l4();
    assert_ok!(pkt.fill_transport_checksum(IpProtocol::Udp, src, dst));

    let stored = u16::from_be_bytes([pkt.payload()[6], pkt.payload()[7]]);
    assert_test!(stored != 0, "UDP checksum is never sent as zero");
    assert_eq_test!(pkt.transport_checksum(IpProtocol::Udp, src, dst), Some(stored));
    assert_eq_test!(pkt.transport_checksum(IpProtocol::Icmp, src, dst), None);

    pass!()
}

pub fn test_layer_marks_survive_cursor_moves() -> TestResult {
    let pool = PacketPool::new();
    let mut raw = std::vec![0u8; IPV4_HEADER_LEN + UDP_HEADER_LEN];
    raw[0] = 0x45;
    raw[12..16].copy_from_slice(&[10, 0, 0, 7]);
    raw[IPV4_HEADER_LEN] = 0xab;
    let csum = checksum(&raw[..IPV4_HEADER_LEN]);
    raw[10..12].copy_from_slice(&csum.to_be_bytes());

    let mut pkt = assert_ok!(PacketBuf::from_raw_copy(&pool, &raw));
    pkt.mark_l3();
    assert_ok!(pkt.pull_header(IPV4_HEADER_LEN));
    pkt.mark_l4();
    assert_ok!(pkt.pull_header(UDP_HEADER_LEN));

    assert_test!(pkt.is_empty());
    assert_eq_test!(&pkt.l3_header()[12..16], &[10u8, 0, 0, 7][..]);
    assert_eq_test!(pkt.l4_header()[0], 0xab);

    pass!()
}

mote_lib::define_test_suite!(
    packetbuf,
    [
        test_pool_alloc_and_release,
        test_pool_exhaustion_is_recoverable,
        test_emergency_pool_exhaustion,
        test_cursor_push_pull,
        test_cursor_bounds_are_checked,
        test_reserve_sizes_headroom,
        test_truncate_drops_padding,
        test_udp_checksum_fill_verifies,
        test_layer_marks_survive_cursor_moves,
    ]
);
