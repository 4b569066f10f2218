use std::collections::BTreeMap;

/// Counter value at which a queue rebases unless configured otherwise
pub const DEFAULT_REBASE_THRESHOLD: i64 = i32::MAX as i64 - 10_000;

/// Position of a pending delay; equal targets keep insertion order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct DelayKey {
    target: i64,
    seq: u64,
}

/// Tick-relative delays against a rebasing counter
///
/// The counter advances once per host update step. Targets are absolute
/// counter values, so the queue is rebased (counter back to zero, every
/// target shifted by the same amount) once the counter reaches the
/// threshold. Rebasing happens inside `&mut self`, so no delay can be
/// scheduled halfway through a shift.
pub struct DelayQueue<T> {
    pending: BTreeMap<DelayKey, T>,
    counter: i64,
    next_seq: u64,
    rebase_threshold: i64,
}

impl<T> DelayQueue<T> {
    /// Create an empty queue that rebases when the counter reaches `rebase_threshold`
    pub fn new(rebase_threshold: i64) -> Self {
        Self {
            pending: BTreeMap::new(),
            counter: 0,
            next_seq: 0,
            rebase_threshold: rebase_threshold.max(1),
        }
    }

    /// Schedule `payload` to come due `ticks` steps from now; returns the target
    ///
    /// Negative delays are treated as zero (due on the next step).
    pub fn schedule(&mut self, ticks: i64, payload: T) -> i64 {
        let target = self.counter.saturating_add(ticks.max(0));
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.insert(DelayKey { target, seq }, payload);
        target
    }

    /// Advance one update step and pop at most one due payload
    pub fn advance(&mut self) -> Option<T> {
        self.counter = self.counter.saturating_add(1);
        if self.counter >= self.rebase_threshold {
            self.rebase();
        }

        let entry = self.pending.first_entry()?;
        if entry.key().target <= self.counter {
            Some(entry.remove())
        } else {
            None
        }
    }

    /// Shift the counter back to zero and every target by the same amount
    ///
    /// Returns the amount subtracted.
    pub fn rebase(&mut self) -> i64 {
        let amount = self.counter;
        if amount == 0 {
            return 0;
        }

        let pending = std::mem::take(&mut self.pending);
        self.pending = pending
            .into_iter()
            .map(|(key, payload)| {
                (
                    DelayKey {
                        target: key.target - amount,
                        seq: key.seq,
                    },
                    payload,
                )
            })
            .collect();
        self.counter = 0;

        tracing::debug!(target: "scripting", "Rebased tick counter by {}", amount);
        amount
    }

    pub fn counter(&self) -> i64 {
        self.counter
    }

    pub fn rebase_threshold(&self) -> i64 {
        self.rebase_threshold
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop every pending delay; the counter keeps its value
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Steps remaining until each pending delay is due, in firing order
    pub fn ticks_remaining(&self) -> Vec<i64> {
        self.pending
            .keys()
            .map(|key| key.target - self.counter)
            .collect()
    }
}

impl<T> Default for DelayQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_REBASE_THRESHOLD)
    }
}
