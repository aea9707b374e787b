//! # Message Engine
//!
//! Schedule execution and the update rules it dispatches to.

mod message_engine;
pub mod rules;

pub use message_engine::*;
pub use rules::{Rule, RuleCall, RuleFn, RuleKey, RuleTable};
