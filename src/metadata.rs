//! # Node Metadata
//!
//! Per-kind facts the compiler and engine consume: interface roles, fixed
//! parameters and whether a kind is symmetric.

use crate::distribution::Distribution;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A factor kind together with its fixed parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    /// Source/sink clamped to a fixed distribution.
    Terminal { value: Distribution },
    /// Three-way equality constraint.
    Equality,
    /// `out = in1 + in2`.
    Addition,
    /// `out = gain * in`.
    Scale { gain: f64 },
    /// `out ~ N(in, variance)`.
    Noise { variance: f64 },
}

/// Parameter-free discriminant of [`NodeKind`], used in rule keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKindTag {
    Terminal,
    Equality,
    Addition,
    Scale,
    Noise,
}

/// Outbound role component of a rule key.
///
/// Symmetric kinds key every interface as [`Role::Any`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Any,
    Named(&'static str),
}

const TERMINAL_ROLES: &[&str] = &["out"];
const EQUALITY_ROLES: &[&str] = &["1", "2", "3"];
const ADDITION_ROLES: &[&str] = &["in1", "in2", "out"];
const SCALE_ROLES: &[&str] = &["in", "out"];

impl NodeKind {
    pub fn tag(&self) -> NodeKindTag {
        match self {
            NodeKind::Terminal { .. } => NodeKindTag::Terminal,
            NodeKind::Equality => NodeKindTag::Equality,
            NodeKind::Addition => NodeKindTag::Addition,
            NodeKind::Scale { .. } => NodeKindTag::Scale,
            NodeKind::Noise { .. } => NodeKindTag::Noise,
        }
    }

    /// Interface names in interface order.
    pub fn roles(&self) -> &'static [&'static str] {
        match self {
            NodeKind::Terminal { .. } => TERMINAL_ROLES,
            NodeKind::Equality => EQUALITY_ROLES,
            NodeKind::Addition => ADDITION_ROLES,
            NodeKind::Scale { .. } | NodeKind::Noise { .. } => SCALE_ROLES,
        }
    }

    pub fn arity(&self) -> usize {
        self.roles().len()
    }

    /// Any interface of a symmetric kind may be treated as the outbound one.
    pub fn is_symmetric(&self) -> bool {
        matches!(self, NodeKind::Equality)
    }

    pub fn role(&self, position: usize) -> Role {
        if self.is_symmetric() {
            return Role::Any;
        }
        self.roles()
            .get(position)
            .map(|name| Role::Named(*name))
            .unwrap_or(Role::Any)
    }

    pub fn position_of(&self, role: &str) -> Option<usize> {
        self.roles().iter().position(|r| *r == role)
    }
}

impl fmt::Display for NodeKindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKindTag::Terminal => "terminal",
            NodeKindTag::Equality => "equality",
            NodeKindTag::Addition => "addition",
            NodeKindTag::Scale => "scale",
            NodeKindTag::Noise => "noise",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Any => f.write_str("*"),
            Role::Named(name) => f.write_str(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_roles_are_symmetric() {
        let kind = NodeKind::Equality;
        assert!(kind.is_symmetric());
        assert_eq!(kind.role(0), Role::Any);
        assert_eq!(kind.role(2), Role::Any);
    }

    #[test]
    fn asymmetric_roles_follow_interface_order() {
        let kind = NodeKind::Addition;
        assert_eq!(kind.arity(), 3);
        assert_eq!(kind.role(2), Role::Named("out"));
        assert_eq!(kind.position_of("in2"), Some(1));
    }
}
