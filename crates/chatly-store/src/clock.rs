//! Server timestamp source.

use chatly_shared::Timestamp;

/// Issues strictly increasing [`Timestamp`]s.
///
/// Wall-clock readings that do not advance past the last issued value (two
/// writes inside the same nanosecond, or the system clock stepping
/// backwards) are bumped to `last + 1ns`.
#[derive(Debug, Clone, Default)]
pub struct Clock {
    last: Timestamp,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume after a previously issued timestamp (e.g. the newest one
    /// persisted before a restart).
    pub fn resume_after(last: Timestamp) -> Self {
        Self { last }
    }

    pub fn tick(&mut self) -> Timestamp {
        self.tick_from(Timestamp::now())
    }

    pub(crate) fn tick_from(&mut self, wall: Timestamp) -> Timestamp {
        let next = if wall > self.last {
            wall
        } else {
            self.last.next()
        };
        self.last = next;
        next
    }

    pub fn last(&self) -> Timestamp {
        self.last
    }
}
