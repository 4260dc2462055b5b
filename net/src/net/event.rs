//! Interrupt-to-task event queue.
//!
//! Interrupt handlers never touch stack state.  They post a [`NetEvent`] into
//! an [`EventQueue`] and return; the cooperative network task drains the
//! queue through [`NetStack::poll`](super::netstack::NetStack::poll), in FIFO
//! order, and does all the work there.  The queue is the only object shared
//! between the two contexts, and its lock is held only for a push or a pop.

use core::sync::atomic::{AtomicU32, Ordering};

use heapless::Deque;
use spin::Mutex;

use super::config::EVENT_QUEUE_LEN;
use super::types::IfaceId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetEvent {
    /// The device behind `iface` has frames waiting.
    RxReady(IfaceId),
    /// Periodic clock tick carrying the current time.
    Tick { now_us: u64 },
}

pub struct EventQueue {
    queue: Mutex<Deque<NetEvent, EVENT_QUEUE_LEN>>,
    overflows: AtomicU32,
}

impl EventQueue {
    pub const fn new() -> Self {
        Self {
            queue: Mutex::new(Deque::new()),
            overflows: AtomicU32::new(0),
        }
    }

    /// Post an event.  Safe to call from interrupt context.
    ///
    /// Returns `false` and counts an overflow when the queue is full.
    pub fn post(&self, event: NetEvent) -> bool {
        let pushed = self.queue.lock().push_back(event).is_ok();
        if !pushed {
            self.overflows.fetch_add(1, Ordering::Relaxed);
        }
        pushed
    }

    pub fn pop(&self) -> Option<NetEvent> {
        self.queue.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Events lost because the queue was full.
    pub fn overflows(&self) -> u32 {
        self.overflows.load(Ordering::Relaxed)
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
