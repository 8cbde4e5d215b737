//! Adaptive stopping rule for localized FM searches.

use crate::graph::{Gain, NodeId};

/// Stops a search once too many moves passed without improving on the best
/// seen solution; the allowance scales with graph size.
#[derive(Debug, Clone)]
pub struct StopRule {
    steps_without_improvement: usize,
    max_steps: usize,
}

impl StopRule {
    pub fn new(num_nodes: NodeId) -> Self {
        StopRule {
            steps_without_improvement: 0,
            max_steps: (num_nodes as usize / 100).clamp(25, 350),
        }
    }

    pub fn search_should_stop(&self) -> bool {
        self.steps_without_improvement >= self.max_steps
    }

    pub fn update(&mut self, gain: Gain) {
        if gain > 0 {
            self.steps_without_improvement = 0;
        } else {
            self.steps_without_improvement += 1;
        }
    }

    /// Called when a move established a new best prefix.
    pub fn reset(&mut self) {
        self.steps_without_improvement = 0;
    }
}
