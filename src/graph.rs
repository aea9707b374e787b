//! # Factor Graph
//!
//! Arena-backed graph model. Nodes own ordered interfaces, edges own the two
//! interface indices they join, and every interface owns one message cache
//! cell. Partners are resolved through the edge, so there are no cyclic
//! references between interfaces.

use crate::distribution::Distribution;
use crate::error::{FgscError, Result};
use crate::message::Message;
use crate::metadata::NodeKind;
use crate::schedule::Schedule;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Provenance tag of terminal outbound messages.
pub const TERMINAL_RULE: &str = "terminal";
/// Provenance tag of messages carried across a time-wrap.
pub const TIME_WRAP_RULE: &str = "time_wrap";

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize,
            Deserialize,
        )]
        pub struct $name(pub u32);

        impl $name {
            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

arena_id!(
    /// Index of a node in its [`FactorGraph`].
    NodeId,
    "n"
);
arena_id!(
    /// Index of an interface in its [`FactorGraph`].
    InterfaceId,
    "i"
);
arena_id!(EdgeId, "e");
arena_id!(SubgraphId, "s");

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub interfaces: Vec<InterfaceId>,
}

#[derive(Debug, Clone)]
pub struct Interface {
    pub id: InterfaceId,
    pub node: NodeId,
    /// Position within the owning node's interface list.
    pub position: usize,
    pub edge: Option<EdgeId>,
    /// Explicit required-inbound set; `None` means every other interface.
    pub dependencies: Option<Vec<InterfaceId>>,
    message: Option<Message>,
}

impl Interface {
    pub fn message(&self) -> Option<&Message> {
        self.message.as_ref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub id: EdgeId,
    pub tail: InterfaceId,
    pub head: InterfaceId,
    pub subgraph: SubgraphId,
}

impl Edge {
    /// The interface across the edge from `interface`.
    pub fn other(&self, interface: InterfaceId) -> Option<InterfaceId> {
        if interface == self.tail {
            Some(self.head)
        } else if interface == self.head {
            Some(self.tail)
        } else {
            None
        }
    }
}

/// A partition of the edges for structured approximate inference.
#[derive(Debug, Clone, Default)]
pub struct Subgraph {
    pub id: SubgraphId,
    pub internal_edges: BTreeSet<EdgeId>,
    pub internal_schedule: Schedule,
    /// Boundary nodes: those touching at least one edge outside the subgraph.
    pub external_schedule: Vec<NodeId>,
}

/// Cross-iteration link: the message arriving at `sink` becomes the value of
/// `source` for the next step. Both ends are terminals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWrap {
    pub source: NodeId,
    pub sink: NodeId,
}

#[derive(Debug, Clone)]
pub struct FactorGraph {
    nodes: Vec<Node>,
    interfaces: Vec<Interface>,
    edges: Vec<Edge>,
    subgraphs: Vec<Subgraph>,
    time_wraps: Vec<TimeWrap>,
}

impl Default for FactorGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl FactorGraph {
    /// Empty graph with a single default subgraph that receives every new edge.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            interfaces: Vec::new(),
            edges: Vec::new(),
            subgraphs: vec![Subgraph {
                id: SubgraphId(0),
                ..Subgraph::default()
            }],
            time_wraps: Vec::new(),
        }
    }

    /// Adds a node with one interface per role of `kind`.
    ///
    /// Terminals seed their outbound cache with their fixed value.
    pub fn add_node(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let mut interfaces = Vec::with_capacity(kind.arity());
        for position in 0..kind.arity() {
            let iface = InterfaceId(self.interfaces.len() as u32);
            self.interfaces.push(Interface {
                id: iface,
                node: id,
                position,
                edge: None,
                dependencies: None,
                message: None,
            });
            interfaces.push(iface);
        }
        if let NodeKind::Terminal { value } = &kind {
            self.interfaces[interfaces[0].index()].message =
                Some(Message::new(*value, TERMINAL_RULE));
        }
        tracing::trace!("[FGSC] added node {} ({})", id, kind.tag());
        self.nodes.push(Node {
            id,
            kind,
            interfaces,
        });
        id
    }

    /// Wires two free interfaces with a new edge in the default subgraph.
    pub fn connect(&mut self, a: InterfaceId, b: InterfaceId) -> Result<EdgeId> {
        if a == b {
            return Err(FgscError::InvalidConnection {
                interface: a,
                reason: "cannot connect an interface to itself".into(),
            });
        }
        for iface in [a, b] {
            if let Some(edge) = self.interface(iface)?.edge {
                return Err(FgscError::InvalidConnection {
                    interface: iface,
                    reason: format!("already attached to edge {}", edge),
                });
            }
        }
        let id = EdgeId(self.edges.len() as u32);
        let subgraph = SubgraphId(0);
        self.edges.push(Edge {
            id,
            tail: a,
            head: b,
            subgraph,
        });
        self.interfaces[a.index()].edge = Some(id);
        self.interfaces[b.index()].edge = Some(id);
        self.subgraphs[subgraph.index()].internal_edges.insert(id);
        Ok(id)
    }

    /// Moves `edges` out of their current subgraphs into a new one.
    pub fn add_subgraph(&mut self, edges: &[EdgeId]) -> Result<SubgraphId> {
        let id = SubgraphId(self.subgraphs.len() as u32);
        let mut subgraph = Subgraph {
            id,
            ..Subgraph::default()
        };
        for &edge in edges {
            let previous = self.edge(edge)?.subgraph;
            if previous != id {
                self.subgraphs[previous.index()].internal_edges.remove(&edge);
            }
            self.edges[edge.index()].subgraph = id;
            subgraph.internal_edges.insert(edge);
        }
        self.subgraphs.push(subgraph);
        Ok(id)
    }

    /// Restricts the inbound interfaces `interface` depends on.
    pub fn set_dependencies(
        &mut self,
        interface: InterfaceId,
        dependencies: Vec<InterfaceId>,
    ) -> Result<()> {
        let node = self.interface(interface)?.node;
        for &dep in &dependencies {
            if dep == interface || self.interface(dep)?.node != node {
                return Err(FgscError::InvalidConnection {
                    interface: dep,
                    reason: format!("not another interface of node {}", node),
                });
            }
        }
        self.interfaces[interface.index()].dependencies = Some(dependencies);
        Ok(())
    }

    pub fn add_time_wrap(&mut self, source: NodeId, sink: NodeId) -> Result<()> {
        for id in [source, sink] {
            if !matches!(self.node(id)?.kind, NodeKind::Terminal { .. }) {
                return Err(FgscError::InvalidTimeWrap { node: id });
            }
        }
        self.time_wraps.push(TimeWrap { source, sink });
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id.index()).ok_or(FgscError::UnknownNode(id))
    }

    pub fn interface(&self, id: InterfaceId) -> Result<&Interface> {
        self.interfaces
            .get(id.index())
            .ok_or(FgscError::UnknownInterface(id))
    }

    pub fn edge(&self, id: EdgeId) -> Result<&Edge> {
        self.edges.get(id.index()).ok_or(FgscError::UnknownEdge(id))
    }

    pub fn subgraph(&self, id: SubgraphId) -> Result<&Subgraph> {
        self.subgraphs
            .get(id.index())
            .ok_or(FgscError::UnknownSubgraph(id))
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn subgraphs(&self) -> &[Subgraph] {
        &self.subgraphs
    }

    pub fn time_wraps(&self) -> &[TimeWrap] {
        &self.time_wraps
    }

    /// Interface of `node` playing `role`, e.g. `"out"`.
    pub fn interface_by_role(&self, node: NodeId, role: &str) -> Result<InterfaceId> {
        let node = self.node(node)?;
        node.kind
            .position_of(role)
            .and_then(|p| node.interfaces.get(p).copied())
            .ok_or_else(|| FgscError::UnknownRole {
                node: node.id,
                role: role.to_string(),
            })
    }

    pub fn partner(&self, interface: InterfaceId) -> Result<Option<InterfaceId>> {
        match self.interface(interface)?.edge {
            Some(edge) => Ok(self.edge(edge)?.other(interface)),
            None => Ok(None),
        }
    }

    /// Partner of `interface`, failing when it is not attached.
    pub fn require_partner(&self, interface: InterfaceId) -> Result<InterfaceId> {
        self.partner(interface)?
            .ok_or_else(|| FgscError::DisconnectedInterface {
                node: self.interfaces[interface.index()].node,
                interface,
            })
    }

    pub fn subgraph_of(&self, interface: InterfaceId) -> Result<Option<SubgraphId>> {
        match self.interface(interface)?.edge {
            Some(edge) => Ok(Some(self.edge(edge)?.subgraph)),
            None => Ok(None),
        }
    }

    /// Interfaces whose inbound messages `interface` needs for its outbound one.
    pub fn required_inbound(&self, interface: InterfaceId) -> Result<Vec<InterfaceId>> {
        let iface = self.interface(interface)?;
        if let Some(deps) = &iface.dependencies {
            return Ok(deps.clone());
        }
        Ok(self
            .node(iface.node)?
            .interfaces
            .iter()
            .copied()
            .filter(|&j| j != interface)
            .collect())
    }

    pub fn message(&self, interface: InterfaceId) -> Result<Option<&Message>> {
        Ok(self.interface(interface)?.message())
    }

    /// Message arriving at `interface`, i.e. the one cached on its partner.
    pub fn inbound_message(&self, interface: InterfaceId) -> Result<Option<&Message>> {
        match self.partner(interface)? {
            Some(partner) => self.message(partner),
            None => Ok(None),
        }
    }

    /// Overwrites the cache cell of `interface`.
    pub fn set_message(&mut self, interface: InterfaceId, message: Message) -> Result<()> {
        self.interface(interface)?;
        self.interfaces[interface.index()].message = Some(message);
        Ok(())
    }

    /// Empties the cache cell of `interface`, forcing recomputation.
    pub fn clear_message(&mut self, interface: InterfaceId) -> Result<Option<Message>> {
        self.interface(interface)?;
        Ok(self.interfaces[interface.index()].message.take())
    }

    /// Empties every cache cell, then re-seeds terminal outbound messages.
    pub fn reset_messages(&mut self) {
        for iface in &mut self.interfaces {
            iface.message = None;
        }
        for node in &self.nodes {
            if let NodeKind::Terminal { value } = &node.kind {
                if let Some(&out) = node.interfaces.first() {
                    self.interfaces[out.index()].message =
                        Some(Message::new(*value, TERMINAL_RULE));
                }
            }
        }
    }

    pub fn set_subgraph_schedules(
        &mut self,
        id: SubgraphId,
        internal: Schedule,
        external: Vec<NodeId>,
    ) -> Result<()> {
        let subgraph = self
            .subgraphs
            .get_mut(id.index())
            .ok_or(FgscError::UnknownSubgraph(id))?;
        subgraph.internal_schedule = internal;
        subgraph.external_schedule = external;
        Ok(())
    }

    /// Belief on `edge`: the product of the two messages flowing over it.
    pub fn marginal(&self, edge: EdgeId) -> Result<Distribution> {
        let edge = *self.edge(edge)?;
        let node = self.interface(edge.tail)?.node;
        let forward = self.message(edge.tail)?.ok_or(FgscError::MissingMessage {
            node,
            interface: edge.head,
            inbound: edge.tail,
        })?;
        let backward = self.message(edge.head)?.ok_or(FgscError::MissingMessage {
            node,
            interface: edge.tail,
            inbound: edge.head,
        })?;
        forward
            .payload
            .product(&backward.payload)
            .map_err(|e| e.at(node, edge.tail))?
            .ok_or_else(|| FgscError::NoApplicableRule {
                node,
                interface: edge.tail,
                key: format!(
                    "marginal({}, {})",
                    forward.payload.kind(),
                    backward.payload.kind()
                ),
            })
    }

    /// Carries recurrent state one step forward across every time-wrap.
    ///
    /// The message arriving at each sink becomes the fixed value and cached
    /// outbound message of the paired source terminal.
    pub fn step_time_wraps(&mut self) -> Result<()> {
        let wraps = self.time_wraps.clone();
        let mut carried = Vec::with_capacity(wraps.len());
        for wrap in &wraps {
            let sink_iface = self.terminal_interface(wrap.sink)?;
            let arriving = self.require_partner(sink_iface)?;
            let payload = self
                .message(arriving)?
                .map(|m| m.payload)
                .ok_or(FgscError::MissingMessage {
                    node: wrap.sink,
                    interface: sink_iface,
                    inbound: arriving,
                })?;
            carried.push((wrap.source, payload));
        }
        for (source, payload) in carried {
            let out = self.terminal_interface(source)?;
            self.nodes[source.index()].kind = NodeKind::Terminal { value: payload };
            self.interfaces[out.index()].message = Some(Message::new(payload, TIME_WRAP_RULE));
            tracing::debug!("[FGSC] time-wrap carried {} into {}", payload, source);
        }
        Ok(())
    }

    fn terminal_interface(&self, node: NodeId) -> Result<InterfaceId> {
        self.node(node)?
            .interfaces
            .first()
            .copied()
            .ok_or(FgscError::UnknownNode(node))
    }
}
