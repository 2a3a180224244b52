//! Majority-vote confirmation over a short window of per-frame labels.

use std::collections::VecDeque;

pub const DEFAULT_HISTORY: usize = 5;
pub const DEFAULT_MIN_VOTES: usize = 3;

/// Sliding window of raw labels for one tracked slot.
///
/// A label is confirmed once it holds at least `min_votes` entries of the
/// window. Among equally frequent labels, the one seen first in the window
/// wins.
#[derive(Debug, Clone)]
pub struct ConfirmationFilter<T> {
    history: VecDeque<T>,
    capacity: usize,
    min_votes: usize,
}

impl<T: Copy + PartialEq> Default for ConfirmationFilter<T> {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY, DEFAULT_MIN_VOTES)
    }
}

impl<T: Copy + PartialEq> ConfirmationFilter<T> {
    pub fn new(capacity: usize, min_votes: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
            min_votes: min_votes.clamp(1, capacity),
        }
    }

    pub fn push(&mut self, label: T) {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(label);
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Feeds one frame. `None` means the slot lost its hand.
    pub fn observe(&mut self, label: Option<T>) -> Option<T> {
        match label {
            Some(l) => self.push(l),
            None => self.clear(),
        }
        self.confirmed()
    }

    pub fn confirmed(&self) -> Option<T> {
        if self.history.len() < self.min_votes {
            return None;
        }
        let mut best: Option<(T, usize)> = None;
        for (i, label) in self.history.iter().enumerate() {
            // only count from a label's first occurrence
            if self.history.iter().take(i).any(|l| l == label) {
                continue;
            }
            let votes = self.history.iter().filter(|l| *l == label).count();
            if best.is_none_or(|(_, b)| votes > b) {
                best = Some((*label, votes));
            }
        }
        best.filter(|(_, votes)| *votes >= self.min_votes)
            .map(|(label, _)| label)
    }
}
