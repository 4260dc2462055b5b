//! ARP cache and the wait list of packets blocked on resolution.
//!
//! Both are plain data structures owned by the stack; the protocol logic that
//! sends requests and arms timers lives in [`arp`](super::arp).
//!
//! # Cache
//!
//! A ring of [`ARP_TABLE_SIZE`] entries with a rotating insertion cursor.  A
//! new IP overwrites the slot under the cursor (oldest insertion first, no
//! LRU); an IP that is already cached is updated in place, so the table never
//! holds two entries for one address.  When expiry is enabled each sweep
//! removes entries not refreshed since the previous sweep.
//!
//! # Wait list
//!
//! An arena of [`ARP_WAIT_MAX`] slots.  Each occupied slot exclusively owns
//! one queued packet plus its resolution metadata; the slot index is the key
//! of the entry's retry timer.  Entries record an insertion sequence number
//! so that packets for one address leave in the order they arrived.

use heapless::Vec;
use mote_lib::klog_debug;

use super::config::{ARP_TABLE_SIZE, ARP_WAIT_MAX};
use super::packetbuf::PacketBuf;
use super::timer::TimerToken;
use super::types::{IfaceId, Ipv4Addr, MacAddr};

// =============================================================================
// Cache
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArpEntry {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub iface: IfaceId,
    /// Refreshed since the last expiry sweep.
    updated: bool,
}

pub struct ArpCache {
    entries: [Option<ArpEntry>; ARP_TABLE_SIZE],
    pos: usize,
}

impl ArpCache {
    pub const fn new() -> Self {
        Self {
            entries: [None; ARP_TABLE_SIZE],
            pos: 0,
        }
    }

    /// Linear scan; the table holds a handful of entries.
    pub fn lookup(&self, ip: Ipv4Addr) -> Option<&ArpEntry> {
        self.entries.iter().flatten().find(|e| e.ip == ip)
    }

    /// Record `ip -> mac`, overwriting an existing entry for `ip` in place.
    pub fn insert(&mut self, ip: Ipv4Addr, mac: MacAddr, iface: IfaceId) {
        let fresh = ArpEntry {
            ip,
            mac,
            iface,
            updated: true,
        };

        if let Some(existing) = self.entries.iter_mut().flatten().find(|e| e.ip == ip) {
            *existing = fresh;
            return;
        }

        if let Some(evicted) = self.entries[self.pos].replace(fresh) {
            klog_debug!("arp: evicting {} ({})", evicted.ip, evicted.mac);
        }
        self.pos = (self.pos + 1) & (ARP_TABLE_SIZE - 1);
    }

    pub fn remove(&mut self, ip: Ipv4Addr) -> bool {
        match self.entries.iter_mut().find(|e| matches!(e, Some(x) if x.ip == ip)) {
            Some(slot) => {
                *slot = None;
                true
            }
            None => false,
        }
    }

    /// Drop entries not refreshed since the previous sweep, then clear the
    /// refresh marks.  Returns the number of entries removed.
    pub fn sweep(&mut self) -> usize {
        let mut removed = 0;
        for slot in self.entries.iter_mut() {
            match slot {
                Some(entry) if entry.updated => entry.updated = false,
                Some(_) => {
                    *slot = None;
                    removed += 1;
                }
                None => {}
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArpEntry> {
        self.entries.iter().flatten()
    }
}

impl Default for ArpCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Wait list
// =============================================================================

/// A packet waiting for the hardware address of `target`.
#[derive(Debug)]
pub struct WaitEntry<'p> {
    pub pkt: PacketBuf<'p>,
    pub iface: IfaceId,
    /// Next hop being resolved.
    pub target: Ipv4Addr,
    /// Retries already spent on this packet.
    pub retries: u8,
    /// Retry timer; a fire is only honoured if its token matches.
    pub timer: TimerToken,
    seq: u32,
}

pub struct ArpWaitList<'p> {
    slots: [Option<WaitEntry<'p>>; ARP_WAIT_MAX],
    next_seq: u32,
}

impl<'p> ArpWaitList<'p> {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
            next_seq: 0,
        }
    }

    /// Index of a free slot, if any.
    pub fn vacant(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.is_none())
    }

    /// Store an entry in slot `idx` (obtained from [`vacant`](Self::vacant)).
    ///
    /// Hands the packet back if the slot is taken.
    pub fn insert(
        &mut self,
        idx: usize,
        pkt: PacketBuf<'p>,
        iface: IfaceId,
        target: Ipv4Addr,
        retries: u8,
        timer: TimerToken,
    ) -> Result<(), PacketBuf<'p>> {
        let slot = match self.slots.get_mut(idx) {
            Some(slot) if slot.is_none() => slot,
            _ => return Err(pkt),
        };
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        *slot = Some(WaitEntry {
            pkt,
            iface,
            target,
            retries,
            timer,
            seq,
        });
        Ok(())
    }

    /// Remove the entry in `idx` if its retry timer is `token`.
    ///
    /// A stale token (the entry was resolved and the slot reused, or the timer
    /// was cancelled after it had already been collected) leaves the list
    /// untouched.
    pub fn take_if_timer(&mut self, idx: usize, token: TimerToken) -> Option<WaitEntry<'p>> {
        let slot = self.slots.get_mut(idx)?;
        if slot.as_ref().is_some_and(|e| e.timer == token) {
            slot.take()
        } else {
            None
        }
    }

    /// Remove every entry waiting on `target`, oldest first.
    ///
    /// The entries are moved out before the caller acts on them, so sending
    /// them (which may queue new entries) cannot disturb this iteration.
    pub fn take_for(&mut self, target: Ipv4Addr) -> Vec<WaitEntry<'p>, ARP_WAIT_MAX> {
        let mut out: Vec<WaitEntry<'p>, ARP_WAIT_MAX> = Vec::new();
        for slot in self.slots.iter_mut() {
            if slot.as_ref().is_some_and(|e| e.target == target) {
                if let Some(entry) = slot.take() {
                    // At most ARP_WAIT_MAX entries exist.
                    let _ = out.push(entry);
                }
            }
        }
        out.sort_unstable_by_key(|e| e.seq);
        out
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_for(&self, target: Ipv4Addr) -> usize {
        self.slots.iter().flatten().filter(|e| e.target == target).count()
    }
}

impl Default for ArpWaitList<'_> {
    fn default() -> Self {
        Self::new()
    }
}
