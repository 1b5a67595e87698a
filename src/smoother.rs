//! Decision smoothing.
//!
//! A per-frame candidate count is classified into a raw `Decision` and then
//! stabilized by a majority vote over a bounded FIFO of recent raw decisions.
//!
//! Tie-break: when both values occur equally often in the window, the value of
//! the most recently inserted entry wins.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Binary traffic signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Green,
    Red,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Green => "GREEN",
            Decision::Red => "RED",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a candidate count maps to a raw decision.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionPolicy {
    /// GREEN iff `min_threshold <= count <= max_threshold`.
    #[default]
    Band,
    /// GREEN iff `count >= min_threshold`.
    AtLeast,
}

/// Count thresholds plus the policy that interprets them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrafficRule {
    pub policy: DecisionPolicy,
    pub min_threshold: u32,
    pub max_threshold: u32,
}

impl TrafficRule {
    pub fn classify(&self, count: usize) -> Decision {
        let count = u64::try_from(count).unwrap_or(u64::MAX);
        let min = u64::from(self.min_threshold);
        let max = u64::from(self.max_threshold);
        let green = match self.policy {
            DecisionPolicy::Band => count >= min && count <= max,
            DecisionPolicy::AtLeast => count >= min,
        };
        if green {
            Decision::Green
        } else {
            Decision::Red
        }
    }

    /// Human readable GREEN range, e.g. `4-5 cars` or `4+ cars`.
    pub fn describe(&self) -> String {
        match self.policy {
            DecisionPolicy::Band => format!("{}-{} cars", self.min_threshold, self.max_threshold),
            DecisionPolicy::AtLeast => format!("{}+ cars", self.min_threshold),
        }
    }
}

/// Raw and smoothed decision for one evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub raw: Decision,
    pub stable: Decision,
}

// ----------------------------------------------------------------------------
// DecisionHistory: bounded FIFO
// ----------------------------------------------------------------------------

/// Fixed-capacity FIFO of recent raw decisions. Oldest entry is evicted on overflow.
#[derive(Clone, Debug)]
pub struct DecisionHistory {
    entries: VecDeque<Decision>,
    capacity: usize,
}

impl DecisionHistory {
    /// Create an empty history. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, decision: Decision) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(decision);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change capacity, evicting the oldest entries if the window shrinks.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = Decision> + '_ {
        self.entries.iter().copied()
    }

    /// Most frequent decision in the window; ties go to the newest entry.
    pub fn majority(&self) -> Option<Decision> {
        let newest = *self.entries.back()?;
        let green = self.entries.iter().filter(|d| **d == Decision::Green).count();
        let red = self.entries.len() - green;
        Some(match green.cmp(&red) {
            std::cmp::Ordering::Greater => Decision::Green,
            std::cmp::Ordering::Less => Decision::Red,
            std::cmp::Ordering::Equal => newest,
        })
    }
}

// ----------------------------------------------------------------------------
// DecisionSmoother
// ----------------------------------------------------------------------------

/// Classifies counts and stabilizes the result over the history window.
#[derive(Clone, Debug)]
pub struct DecisionSmoother {
    history: DecisionHistory,
}

impl DecisionSmoother {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: DecisionHistory::new(capacity),
        }
    }

    /// Classify `count`, append the raw decision and return the majority vote.
    pub fn evaluate(&mut self, count: usize, rule: &TrafficRule) -> Verdict {
        let raw = rule.classify(count);
        self.history.push(raw);
        let stable = self.history.majority().unwrap_or(raw);
        Verdict { raw, stable }
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }

    pub fn history(&self) -> &DecisionHistory {
        &self.history
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.history.set_capacity(capacity);
    }
}
