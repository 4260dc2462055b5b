//! Pool-backed packet buffer with a movable data cursor.
//!
//! `PacketBuf` is the single currency exchanged between the driver and every
//! protocol layer.  Each layer moves the cursor instead of copying: the input
//! path consumes headers by advancing `head`, the output path prepends
//! headers by moving `head` back into the headroom.
//!
//! # Ownership
//!
//! `PacketBuf` is **move-only**.  Handing a packet to a layer hands over the
//! only handle to its slot, and dropping it returns the slot to its
//! [`PacketPool`].  Every terminal path (sent, queued then dropped, rejected)
//! therefore frees the slot exactly once.
//!
//! # Layout
//!
//! ```text
//! |<-- headroom -->|<-- data (head..tail) -->|<-- tailroom -->|
//! 0              head                       tail          BUF_SIZE
//! ```

use core::fmt;

use super::pool::{BUF_SIZE, PacketPool, PoolKind};
use super::types::{IpProtocol, Ipv4Addr, NetError};
use super::{fold_checksum, ones_complement_sum, pseudo_header_sum};

/// Headroom reserved by the TX constructors.
///
/// Ethernet (14) + IPv4 (20) + TCP with options (60), rounded up.  See
/// [`PacketBuf::reserve`] for senders with a fixed, smaller header stack.
pub const HEADROOM: u16 = 96;

/// Headroom for an Ethernet/IPv4 frame whose transport header is
/// `l4_header_len` bytes.
#[inline]
pub const fn tx_headroom(l4_header_len: usize) -> usize {
    super::ETH_HEADER_LEN + super::IPV4_HEADER_LEN + l4_header_len
}

/// A network packet.  See the [module documentation](self).
pub struct PacketBuf<'p> {
    pool: &'p PacketPool,
    slot: u8,
    head: u16,
    tail: u16,
    /// Offset of the IPv4 header within the slot.
    l3_offset: u16,
    /// Offset of the transport header within the slot.
    l4_offset: u16,
}

impl Drop for PacketBuf<'_> {
    fn drop(&mut self) {
        self.pool.release(self.slot);
    }
}

// Metadata only; never dump buffer contents.
impl fmt::Debug for PacketBuf<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PacketBuf(slot={}, {:?}) {{ head={}, tail={}, len={}, l3={}, l4={} }}",
            self.slot,
            self.origin(),
            self.head,
            self.tail,
            self.len(),
            self.l3_offset,
            self.l4_offset
        )
    }
}

// =============================================================================
// Constructors
// =============================================================================

impl<'p> PacketBuf<'p> {
    fn from_slot(pool: &'p PacketPool, slot: u8, head: u16, tail: u16) -> Self {
        Self {
            pool,
            slot,
            head,
            tail,
            l3_offset: head,
            l4_offset: head,
        }
    }

    /// Allocate an empty TX buffer from the main pool with [`HEADROOM`] reserved.
    pub fn alloc(pool: &'p PacketPool) -> Result<Self, NetError> {
        let slot = pool
            .alloc_slot(PoolKind::Main)
            .ok_or(NetError::OutOfPackets)?;
        Ok(Self::from_slot(pool, slot, HEADROOM, HEADROOM))
    }

    /// Allocate an empty TX buffer from the emergency reserve.
    pub fn alloc_emergency(pool: &'p PacketPool) -> Result<Self, NetError> {
        let slot = pool
            .alloc_slot(PoolKind::Emergency)
            .ok_or(NetError::OutOfPackets)?;
        Ok(Self::from_slot(pool, slot, HEADROOM, HEADROOM))
    }

    /// Main pool first, reserve second.  For control traffic only.
    pub fn alloc_any(pool: &'p PacketPool) -> Result<Self, NetError> {
        Self::alloc(pool).or_else(|_| Self::alloc_emergency(pool))
    }

    /// Copy a received frame into a fresh main-pool buffer.
    ///
    /// The data starts at offset 0 so layer offsets match wire positions.
    pub fn from_raw_copy(pool: &'p PacketPool, data: &[u8]) -> Result<Self, NetError> {
        if data.len() > BUF_SIZE {
            return Err(NetError::BufferOverrun);
        }
        let mut pkt = Self::from_slot(
            pool,
            pool.alloc_slot(PoolKind::Main)
                .ok_or(NetError::OutOfPackets)?,
            0,
            0,
        );
        pkt.append(data)?;
        Ok(pkt)
    }

    /// Pool part this buffer was drawn from.
    #[inline]
    pub fn origin(&self) -> PoolKind {
        PacketPool::origin(self.slot)
    }
}

// =============================================================================
// Backing storage
// =============================================================================

impl PacketBuf<'_> {
    #[inline]
    fn data(&self) -> &[u8] {
        // SAFETY: the slot is owned by this buffer alone (move-only, no Clone)
        // until drop releases it.
        unsafe { core::slice::from_raw_parts(self.pool.slot_data(self.slot), BUF_SIZE) }
    }

    #[inline]
    fn data_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `data`, and `&mut self` rules out other borrows.
        unsafe { core::slice::from_raw_parts_mut(self.pool.slot_data(self.slot), BUF_SIZE) }
    }
}

// =============================================================================
// Cursor movement
// =============================================================================

impl PacketBuf<'_> {
    #[inline]
    pub fn len(&self) -> usize {
        (self.tail - self.head) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    #[inline]
    pub fn head(&self) -> u16 {
        self.head
    }

    /// Bytes available in front of the cursor.
    #[inline]
    pub fn headroom(&self) -> usize {
        self.head as usize
    }

    #[inline]
    pub fn tailroom(&self) -> usize {
        BUF_SIZE - self.tail as usize
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.data()[self.head as usize..self.tail as usize]
    }

    #[inline]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let (h, t) = (self.head as usize, self.tail as usize);
        &mut self.data_mut()[h..t]
    }

    /// Move the cursor by `delta` bytes.
    ///
    /// Positive values consume bytes from the front, negative values expose
    /// headroom in front of the data.  The cursor never leaves `0..=tail`.
    pub fn adjust(&mut self, delta: isize) -> Result<(), NetError> {
        let new_head = self.head as isize + delta;
        if new_head < 0 || new_head > self.tail as isize {
            return Err(NetError::BufferOverrun);
        }
        self.head = new_head as u16;
        Ok(())
    }

    /// Expose `len` bytes of headroom and return them for the caller to fill.
    pub fn push_header(&mut self, len: usize) -> Result<&mut [u8], NetError> {
        if len > self.headroom() {
            return Err(NetError::BufferOverrun);
        }
        self.head -= len as u16;
        let h = self.head as usize;
        Ok(&mut self.data_mut()[h..h + len])
    }

    /// Consume `len` bytes from the front and return them.
    pub fn pull_header(&mut self, len: usize) -> Result<&[u8], NetError> {
        if len > self.len() {
            return Err(NetError::BufferOverrun);
        }
        let old = self.head as usize;
        self.head += len as u16;
        Ok(&self.data()[old..old + len])
    }

    /// Copy `src` behind the current data.
    pub fn append(&mut self, src: &[u8]) -> Result<(), NetError> {
        if src.len() > self.tailroom() {
            return Err(NetError::BufferOverrun);
        }
        let t = self.tail as usize;
        self.data_mut()[t..t + src.len()].copy_from_slice(src);
        self.tail += src.len() as u16;
        Ok(())
    }

    /// Place the cursor of an empty buffer `headroom` bytes into the slot.
    ///
    /// Senders that know their whole header stack reserve exactly that, which
    /// leaves the rest of the slot to payload.
    pub fn reserve(&mut self, headroom: usize) -> Result<(), NetError> {
        if !self.is_empty() || headroom > BUF_SIZE {
            return Err(NetError::BufferOverrun);
        }
        self.head = headroom as u16;
        self.tail = self.head;
        self.l3_offset = self.head;
        self.l4_offset = self.head;
        Ok(())
    }

    /// Shorten the data to `len` bytes (drops link padding).
    pub fn truncate(&mut self, len: usize) {
        if len < self.len() {
            self.tail = self.head + len as u16;
        }
    }
}

// =============================================================================
// Layer offsets
// =============================================================================

impl PacketBuf<'_> {
    /// Mark the cursor position as the start of the IPv4 header.
    #[inline]
    pub fn mark_l3(&mut self) {
        self.l3_offset = self.head;
    }

    /// Mark the cursor position as the start of the transport header.
    #[inline]
    pub fn mark_l4(&mut self) {
        self.l4_offset = self.head;
    }

    #[inline]
    pub fn set_l4(&mut self, offset: u16) {
        self.l4_offset = offset;
    }

    /// Bytes from the IPv4 header to the end of the data.
    #[inline]
    pub fn l3_header(&self) -> &[u8] {
        &self.data()[self.l3_offset as usize..self.tail as usize]
    }

    /// Bytes from the transport header to the end of the data.
    #[inline]
    pub fn l4_header(&self) -> &[u8] {
        &self.data()[self.l4_offset as usize..self.tail as usize]
    }

    #[inline]
    pub fn l4_header_mut(&mut self) -> &mut [u8] {
        let (o, t) = (self.l4_offset as usize, self.tail as usize);
        &mut self.data_mut()[o..t]
    }
}

// =============================================================================
// Transport checksums
// =============================================================================

impl PacketBuf<'_> {
    /// Pseudo-header-inclusive checksum of the L4 region.
    ///
    /// The checksum field (UDP bytes 6..8, TCP bytes 16..18) is treated as
    /// zero.  Returns `None` for protocols without a pseudo-header checksum or
    /// when the L4 region is shorter than its fixed header.
    pub fn transport_checksum(&self, proto: IpProtocol, src: Ipv4Addr, dst: Ipv4Addr) -> Option<u16> {
        let (field, min_len) = match proto {
            IpProtocol::Udp => (6, super::UDP_HEADER_LEN),
            IpProtocol::Tcp => (16, super::TCP_HEADER_LEN),
            IpProtocol::Icmp => return None,
        };
        let segment = self.l4_header();
        if segment.len() < min_len {
            return None;
        }

        let mut sum = pseudo_header_sum(src, dst, proto as u8, segment.len());
        sum = ones_complement_sum(sum, &segment[..field]);
        sum = ones_complement_sum(sum, &segment[field + 2..]);
        let csum = fold_checksum(sum);

        // RFC 768: a computed UDP checksum of zero goes on the wire as 0xFFFF.
        if proto == IpProtocol::Udp && csum == 0 {
            Some(0xffff)
        } else {
            Some(csum)
        }
    }

    /// Compute and store the transport checksum in place.
    pub fn fill_transport_checksum(
        &mut self,
        proto: IpProtocol,
        src: Ipv4Addr,
        dst: Ipv4Addr,
    ) -> Result<(), NetError> {
        let field = match proto {
            IpProtocol::Udp => 6,
            IpProtocol::Tcp => 16,
            IpProtocol::Icmp => return Ok(()),
        };
        let csum = self
            .transport_checksum(proto, src, dst)
            .ok_or(NetError::MalformedHeader)?;
        self.l4_header_mut()[field..field + 2].copy_from_slice(&csum.to_be_bytes());
        Ok(())
    }
}
