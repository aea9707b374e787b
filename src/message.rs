//! # Messages

use crate::distribution::Distribution;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Provenance tag for messages written by the caller rather than a rule.
pub const SEEDED: &str = "seeded";

/// A distribution in transit, tagged with the rule that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub payload: Distribution,
    pub rule: String,
}

impl Message {
    pub fn new(payload: Distribution, rule: impl Into<String>) -> Self {
        Self {
            payload,
            rule: rule.into(),
        }
    }

    /// A caller-provided message, e.g. a loop-breaking initial value.
    pub fn seeded(payload: Distribution) -> Self {
        Self::new(payload, SEEDED)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.payload, self.rule)
    }
}
