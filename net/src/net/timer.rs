//! Bounded, data-driven timer set for the stack.
//!
//! Timers carry a [`TimerKind`] discriminant and a `key` naming the resource
//! they belong to (an ARP wait-list slot, for instance) instead of a callback
//! pointer.  The stack polls [`NetTimers::advance_to`] with the current time
//! and dispatches the returned [`FiredTimer`]s itself.
//!
//! # Ordering
//!
//! Fired timers are returned in deadline order; timers sharing a deadline
//! come back in the order they were scheduled.  At most
//! [`MAX_TIMERS_PER_ADVANCE`] fire per call; the rest stay pending and fire
//! on the next call.
//!
//! # Cancellation race
//!
//! A timer may be collected by `advance_to` and then, before it is
//! dispatched, its resource may be released by another handler in the same
//! batch.  Every [`FiredTimer`] therefore carries its [`TimerToken`], and the
//! owning subsystem only acts if the token still matches the one it stored.
//! Tokens are never reused within one `NetTimers`.

use heapless::Vec;

use super::config::{MAX_TIMERS, MAX_TIMERS_PER_ADVANCE};
use super::types::NetError;

/// Subsystem a timer belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerKind {
    /// Retry of an ARP request for a packet on the wait list.
    ArpRetry,
    /// Periodic mark-and-sweep of the ARP cache.
    ArpExpire,
}

/// Opaque cancellation handle.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct TimerToken(u32);

impl TimerToken {
    /// Never matches a scheduled timer.
    pub const INVALID: Self = Self(0);
}

#[derive(Clone, Copy, Debug)]
struct TimerEntry {
    deadline_us: u64,
    kind: TimerKind,
    key: u32,
    token: TimerToken,
}

/// A timer whose deadline has passed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FiredTimer {
    pub kind: TimerKind,
    pub key: u32,
    pub token: TimerToken,
}

/// Fixed-capacity timer set.  See the [module documentation](self).
pub struct NetTimers {
    entries: [Option<TimerEntry>; MAX_TIMERS],
    now_us: u64,
    next_token: u32,
}

impl NetTimers {
    pub const fn new() -> Self {
        Self {
            entries: [None; MAX_TIMERS],
            now_us: 0,
            next_token: 1,
        }
    }

    /// Current time as last seen by [`advance_to`](Self::advance_to).
    #[inline]
    pub fn now_us(&self) -> u64 {
        self.now_us
    }

    /// Arm a timer `delay_us` from now.
    pub fn schedule(&mut self, delay_us: u64, kind: TimerKind, key: u32) -> Result<TimerToken, NetError> {
        let slot = self
            .entries
            .iter_mut()
            .find(|e| e.is_none())
            .ok_or(NetError::TableFull)?;

        let token = TimerToken(self.next_token);
        self.next_token = self.next_token.wrapping_add(1).max(1);
        *slot = Some(TimerEntry {
            deadline_us: self.now_us.saturating_add(delay_us),
            kind,
            key,
            token,
        });
        Ok(token)
    }

    /// Disarm a timer.  Returns `false` if it already fired or never existed.
    pub fn cancel(&mut self, token: TimerToken) -> bool {
        match self.find_mut(token) {
            Some(slot) => {
                *slot = None;
                true
            }
            None => false,
        }
    }

    /// Move a pending timer to `delay_us` from now, keeping its token.
    pub fn reschedule(&mut self, token: TimerToken, delay_us: u64) -> bool {
        let now = self.now_us;
        match self.find_mut(token) {
            Some(Some(entry)) => {
                entry.deadline_us = now.saturating_add(delay_us);
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self, token: TimerToken) -> bool {
        token != TimerToken::INVALID
            && self
                .entries
                .iter()
                .flatten()
                .any(|e| e.token == token)
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    /// Advance the clock to `now_us` and collect expired timers.
    ///
    /// Time never moves backward; an older `now_us` only collects timers
    /// already due.
    pub fn advance_to(&mut self, now_us: u64) -> Vec<FiredTimer, MAX_TIMERS_PER_ADVANCE> {
        self.now_us = self.now_us.max(now_us);
        let now = self.now_us;
        let mut fired = Vec::new();

        while !fired.is_full() {
            // Earliest deadline first; token order breaks ties because tokens
            // grow with scheduling order.
            let next = self
                .entries
                .iter_mut()
                .filter(|e| matches!(e, Some(t) if t.deadline_us <= now))
                .min_by_key(|e| e.map(|t| (t.deadline_us, t.token.0)));

            let Some(slot) = next else { break };
            let Some(entry) = slot.take() else { break };
            // Capacity checked by the loop condition.
            let _ = fired.push(FiredTimer {
                kind: entry.kind,
                key: entry.key,
                token: entry.token,
            });
        }

        fired
    }

    fn find_mut(&mut self, token: TimerToken) -> Option<&mut Option<TimerEntry>> {
        if token == TimerToken::INVALID {
            return None;
        }
        self.entries
            .iter_mut()
            .find(|e| matches!(e, Some(t) if t.token == token))
    }
}

impl Default for NetTimers {
    fn default() -> Self {
        Self::new()
    }
}
