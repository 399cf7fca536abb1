use std::{collections::BTreeSet, sync::Arc};

use crate::models::{RoundData, RoundStep};

/// Read-only position over a recorded round's steps.
///
/// Moves never wrap and never fail: stepping past either end leaves the cursor
/// where it is. An empty round is at its end from the start.
#[derive(Debug, Clone)]
pub struct ReplayCursor {
    round: Arc<RoundData>,
    position: usize,
    /// Steps the operator ticked off while reviewing.
    completed: BTreeSet<usize>,
}

impl ReplayCursor {
    pub fn new(round: Arc<RoundData>) -> Self {
        Self {
            round,
            position: 0,
            completed: BTreeSet::new(),
        }
    }

    pub fn round(&self) -> &RoundData {
        &self.round
    }

    pub fn current(&self) -> Option<&RoundStep> {
        self.round.steps.get(self.position)
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.round.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.round.steps.is_empty()
    }

    pub fn at_start(&self) -> bool {
        self.position == 0
    }

    pub fn at_end(&self) -> bool {
        self.position + 1 >= self.len()
    }

    /// Returns whether the cursor moved.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> bool {
        if self.at_end() {
            return false;
        }
        self.position += 1;
        true
    }

    pub fn previous(&mut self) -> bool {
        if self.at_start() {
            return false;
        }
        self.position -= 1;
        true
    }

    /// Out-of-range indexes clamp to the last step.
    pub fn jump_to(&mut self, index: usize) {
        self.position = index.min(self.len().saturating_sub(1));
    }

    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// Fraction of the round reviewed, 1.0 on the last step.
    pub fn progress(&self) -> f64 {
        match self.len() {
            0 => 1.0,
            len => (self.position + 1) as f64 / len as f64,
        }
    }

    /// Ticks off the current step and moves on. Does nothing on an empty round.
    pub fn mark_current_completed(&mut self) -> bool {
        if self.is_empty() {
            return false;
        }
        self.completed.insert(self.position);
        self.next();
        true
    }

    pub fn is_completed(&self, index: usize) -> bool {
        self.completed.contains(&index)
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }
}
