//! # Errors
//!
//! Failure taxonomy shared by the schedule compiler and the message engine.

use crate::graph::{EdgeId, InterfaceId, NodeId, SubgraphId};
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, FgscError>;

/// Errors raised while compiling or executing a schedule.
///
/// Compiler failures never return a partial schedule. Engine failures stop the
/// current run but keep every cache cell already written by earlier entries.
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FgscError {
    /// The dependency walk re-entered an interface still on the call stack.
    /// Seed a message somewhere on the loop to break it.
    #[error("unbroken dependency cycle through interface {interface} on node {node}")]
    Cycle { node: NodeId, interface: InterfaceId },

    /// A traversed interface is not attached to an edge.
    #[error("interface {interface} on node {node} has no partner")]
    DisconnectedInterface { node: NodeId, interface: InterfaceId },

    /// A multi-target compilation was given targets from different subgraphs.
    #[error("targets span subgraphs {expected} and {found} (interface {interface})")]
    MixedSubgraph {
        interface: InterfaceId,
        expected: SubgraphId,
        found: SubgraphId,
    },

    /// A multi-target compilation was given nothing to compile.
    #[error("cannot compile an empty target list")]
    EmptySchedule,

    /// An inbound message required by a schedule entry was not cached.
    #[error("node {node}: interface {interface} needs a message on {inbound}, none cached")]
    MissingMessage {
        node: NodeId,
        interface: InterfaceId,
        inbound: InterfaceId,
    },

    /// The rule table has nothing for the presented kind combination.
    #[error("node {node}: no rule for interface {interface}, key {key}")]
    NoApplicableRule {
        node: NodeId,
        interface: InterfaceId,
        key: String,
    },

    /// A rule received a distribution it cannot normalize.
    #[error("node {node}: improper distribution while computing interface {interface}: {reason}")]
    ImproperDistribution {
        node: NodeId,
        interface: InterfaceId,
        reason: String,
    },

    /// Distribution arithmetic failed outside any schedule entry.
    #[error("improper distribution: {0}")]
    ImproperValue(String),

    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("unknown interface: {0}")]
    UnknownInterface(InterfaceId),

    #[error("unknown edge: {0}")]
    UnknownEdge(EdgeId),

    #[error("unknown subgraph: {0}")]
    UnknownSubgraph(SubgraphId),

    #[error("node {node} has no interface '{role}'")]
    UnknownRole { node: NodeId, role: String },

    /// Time-wraps join terminal nodes only.
    #[error("time-wrap endpoint {node} is not a terminal")]
    InvalidTimeWrap { node: NodeId },

    /// Graph construction misuse, e.g. wiring an interface twice.
    #[error("invalid connection at interface {interface}: {reason}")]
    InvalidConnection {
        interface: InterfaceId,
        reason: String,
    },

    /// Diagnostic schedule text could not be read back.
    #[error("schedule parse error on line {line}: {reason}")]
    ScheduleParse { line: usize, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl FgscError {
    /// Re-labels a location-free distribution failure with the entry it
    /// occurred in.
    pub(crate) fn at(self, node: NodeId, interface: InterfaceId) -> Self {
        match self {
            FgscError::ImproperValue(reason) => FgscError::ImproperDistribution {
                node,
                interface,
                reason,
            },
            other => other,
        }
    }

    pub(crate) fn improper(reason: impl Into<String>) -> Self {
        FgscError::ImproperValue(reason.into())
    }
}
