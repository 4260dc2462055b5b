//! Fixed packet buffer pool with an emergency reserve.
//!
//! The pool owns `POOL_SIZE + EMERGENCY_POOL_SIZE` slots of [`BUF_SIZE`]
//! bytes.  Ordinary traffic draws from the main slots; control packets that
//! must go out even under memory pressure (ARP replies, ICMP echo replies)
//! may fall back to the reserve.  Exhaustion is an expected condition and is
//! reported as `None`, never as a panic.
//!
//! The pool is a plain value owned by the board code and lent to the stack
//! and to every [`PacketBuf`](super::packetbuf::PacketBuf).  Slot ownership
//! is tracked in a bitmap; all access happens from the single cooperative
//! network context, so the bookkeeping uses `Cell` rather than atomics.

use core::cell::{Cell, UnsafeCell};

/// Size of each slot in bytes.
///
/// Covers a 576-byte IPv4 datagram plus the Ethernet header when the sender
/// reserves only the headers it pushes
/// ([`PacketBuf::reserve`](super::packetbuf::PacketBuf::reserve)).
pub const BUF_SIZE: usize = 640;

/// Smallest datagram every IPv4 host must accept (RFC 791).
pub const IPV4_MIN_DATAGRAM: usize = 576;

/// Slots available to ordinary allocation.
pub const POOL_SIZE: usize = 8;

/// Slots only handed out by [`PacketPool::alloc_slot`] with [`PoolKind::Emergency`].
pub const EMERGENCY_POOL_SIZE: usize = 2;

const TOTAL_SLOTS: usize = POOL_SIZE + EMERGENCY_POOL_SIZE;

const _: () = assert!(TOTAL_SLOTS <= 32, "slot bitmap is a u32");
const _: () = assert!(BUF_SIZE <= u16::MAX as usize);
const _: () = assert!(super::ETH_HEADER_LEN + IPV4_MIN_DATAGRAM <= BUF_SIZE);

/// Which part of the pool a slot came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolKind {
    Main,
    Emergency,
}

impl PoolKind {
    #[inline]
    fn range(self) -> core::ops::Range<usize> {
        match self {
            PoolKind::Main => 0..POOL_SIZE,
            PoolKind::Emergency => POOL_SIZE..TOTAL_SLOTS,
        }
    }

    #[inline]
    fn of_slot(slot: u8) -> Self {
        if (slot as usize) < POOL_SIZE {
            PoolKind::Main
        } else {
            PoolKind::Emergency
        }
    }
}

/// Packet buffer pool.  See the [module documentation](self).
pub struct PacketPool {
    slots: [UnsafeCell<[u8; BUF_SIZE]>; TOTAL_SLOTS],
    /// Bit `n` set means slot `n` is owned by a live `PacketBuf`.
    in_use: Cell<u32>,
    alloc_failures: Cell<u32>,
}

impl PacketPool {
    pub const fn new() -> Self {
        Self {
            slots: [const { UnsafeCell::new([0u8; BUF_SIZE]) }; TOTAL_SLOTS],
            in_use: Cell::new(0),
            alloc_failures: Cell::new(0),
        }
    }

    /// Claim a free slot from the `kind` part of the pool.
    ///
    /// Returns `None` when that part is exhausted; the failure is counted.
    pub fn alloc_slot(&self, kind: PoolKind) -> Option<u8> {
        let used = self.in_use.get();
        match kind.range().find(|&i| used & (1 << i) == 0) {
            Some(slot) => {
                self.in_use.set(used | (1 << slot));
                Some(slot as u8)
            }
            None => {
                self.alloc_failures.set(self.alloc_failures.get().wrapping_add(1));
                None
            }
        }
    }

    /// Return `slot` to the pool.
    ///
    /// Releasing a slot that is not allocated is a double free; it is caught
    /// by a debug assertion and otherwise ignored so the bitmap stays
    /// consistent.
    pub fn release(&self, slot: u8) {
        let bit = 1u32 << slot;
        let used = self.in_use.get();
        debug_assert!(
            (slot as usize) < TOTAL_SLOTS && used & bit != 0,
            "release of free slot {}",
            slot
        );
        self.in_use.set(used & !bit);
    }

    /// Free slots in the main pool.
    pub fn available(&self) -> usize {
        self.free_in(PoolKind::Main)
    }

    /// Free slots in the emergency reserve.
    pub fn available_emergency(&self) -> usize {
        self.free_in(PoolKind::Emergency)
    }

    /// Slots currently owned by live packets, both pools together.
    pub fn in_use(&self) -> usize {
        self.in_use.get().count_ones() as usize
    }

    /// Allocation attempts that found their pool empty.
    pub fn alloc_failures(&self) -> u32 {
        self.alloc_failures.get()
    }

    pub fn origin(slot: u8) -> PoolKind {
        PoolKind::of_slot(slot)
    }

    fn free_in(&self, kind: PoolKind) -> usize {
        let used = self.in_use.get();
        kind.range().filter(|&i| used & (1 << i) == 0).count()
    }

    /// Raw pointer to the first byte of `slot`, valid for [`BUF_SIZE`] bytes.
    ///
    /// The caller must own the slot and must not create aliasing references.
    #[inline]
    pub(crate) fn slot_data(&self, slot: u8) -> *mut u8 {
        debug_assert!((slot as usize) < TOTAL_SLOTS);
        self.slots[slot as usize].get() as *mut u8
    }
}

impl Default for PacketPool {
    fn default() -> Self {
        Self::new()
    }
}
