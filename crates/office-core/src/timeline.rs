use std::collections::BTreeMap;
use std::time::Duration;

/// Virtual-time queue for delayed events.
///
/// Time only moves when the owner calls [`Timeline::advance`] or
/// [`Timeline::advance_to`]; the bridge maps it onto a tokio timer, tests
/// step it by hand.
#[derive(Debug)]
pub struct Timeline<T> {
    now: Duration,
    seq: u64,
    pending: BTreeMap<(Duration, u64), T>,
}

impl<T> Default for Timeline<T> {
    fn default() -> Self {
        Self {
            now: Duration::ZERO,
            seq: 0,
            pending: BTreeMap::new(),
        }
    }
}

impl<T> Timeline<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn schedule(&mut self, after: Duration, item: T) {
        self.seq += 1;
        self.pending.insert((self.now + after, self.seq), item);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Time left until the earliest pending item, zero if already due.
    pub fn next_due(&self) -> Option<Duration> {
        self.pending
            .keys()
            .next()
            .map(|(due, _)| due.saturating_sub(self.now))
    }

    pub fn advance(&mut self, by: Duration) -> Vec<T> {
        self.advance_to(self.now + by)
    }

    /// Move the clock forward and drain everything now due, in deadline
    /// order (FIFO for equal deadlines). The clock never runs backwards.
    pub fn advance_to(&mut self, at: Duration) -> Vec<T> {
        if at > self.now {
            self.now = at;
        }
        let later = self.pending.split_off(&(self.now, u64::MAX));
        let due = std::mem::replace(&mut self.pending, later);
        due.into_values().collect()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
