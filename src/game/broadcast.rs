//! Flush scheduling for state deltas
//!
//! High-priority changes flush at once. Low-priority drift is coalesced and
//! flushed no sooner than `interval_ms` after the previous flush. The
//! scheduler only tracks deadlines; the room actor sleeps until
//! [`BroadcastScheduler::deadline`] and then flushes.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Low,
    High,
}

#[derive(Debug)]
pub struct BroadcastScheduler {
    interval_ms: u64,
    deadline: Option<u64>,
    last_flush_at: Option<u64>,
}

impl BroadcastScheduler {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            deadline: None,
            last_flush_at: None,
        }
    }

    pub fn request(&mut self, priority: Priority, now: u64) {
        match priority {
            Priority::High => self.deadline = Some(now),
            Priority::Low => {
                if self.deadline.is_none() {
                    let at = match self.last_flush_at {
                        Some(last) => now.max(last.saturating_add(self.interval_ms)),
                        None => now,
                    };
                    self.deadline = Some(at);
                }
            }
        }
    }

    pub fn deadline(&self) -> Option<u64> {
        self.deadline
    }

    pub fn is_due(&self, now: u64) -> bool {
        matches!(self.deadline, Some(at) if at <= now)
    }

    /// Clear the pending deadline after a flush attempt; `wrote` records
    /// whether a frame actually went out.
    pub fn complete(&mut self, now: u64, wrote: bool) {
        self.deadline = None;
        if wrote {
            self.last_flush_at = Some(now);
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn last_flush_at(&self) -> Option<u64> {
        self.last_flush_at
    }
}
