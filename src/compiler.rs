//! # Schedule Compiler
//!
//! Main entry points for turning requested outbound messages into executable
//! schedules.
//!
//! The walk is a depth-first dependency resolution that depends on the graph's
//! *current* cache: an interface whose partner already holds a message is a
//! leaf, so seeding a message anywhere on a loop is how callers break cycles.

use crate::error::{FgscError, Result};
use crate::graph::{FactorGraph, InterfaceId, NodeId, SubgraphId};
use crate::schedule::{Schedule, ScheduleEntry};
use std::collections::HashSet;

/// Result of [`compile_subgraph`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubgraphSchedule {
    pub internal: Schedule,
    /// Boundary nodes of the subgraph, in node order.
    pub external: Vec<NodeId>,
}

/// Compile the schedule that produces the outbound message of `outbound`.
///
/// The returned schedule ends with `outbound` and contains every interface
/// whose message is missing on the way there, dependencies first.
///
/// # Errors
///
/// * [`FgscError::Cycle`] - a dependency loop is not broken by a cached message
/// * [`FgscError::DisconnectedInterface`] - a traversed interface has no partner
pub fn compile(graph: &FactorGraph, outbound: InterfaceId) -> Result<Schedule> {
    let mut compiler = ScheduleCompiler::new(graph, None);
    compiler.resolve(outbound)?;
    let schedule = compiler.finish();
    tracing::debug!(
        "[FGSC] compiled {} entries for outbound {}",
        schedule.len(),
        outbound
    );
    Ok(schedule)
}

/// Compile one schedule covering several targets of the same subgraph.
///
/// Targets are resolved in the given order; an interface needed by more than
/// one of them appears once, at its first position.
///
/// # Errors
///
/// * [`FgscError::EmptySchedule`] - `targets` is empty
/// * [`FgscError::MixedSubgraph`] - targets live on edges of different subgraphs
/// * everything [`compile`] can fail with
pub fn compile_targets(graph: &FactorGraph, targets: &[InterfaceId]) -> Result<Schedule> {
    let first = *targets.first().ok_or(FgscError::EmptySchedule)?;
    let subgraph = edge_subgraph(graph, first)?;
    for &target in &targets[1..] {
        let found = edge_subgraph(graph, target)?;
        if found != subgraph {
            return Err(FgscError::MixedSubgraph {
                interface: target,
                expected: subgraph,
                found,
            });
        }
    }

    let mut compiler = ScheduleCompiler::new(graph, Some(subgraph));
    for &target in targets {
        compiler.resolve(target)?;
    }
    Ok(compiler.finish())
}

/// Compile the internal and external schedules of one subgraph.
///
/// The internal schedule concatenates, keeping first occurrences only:
/// 1. inbound messages on every internal edge of every boundary node,
/// 2. the outbound message of boundary nodes with exactly one internal edge,
/// 3. the messages arriving at time-wrap sinks on internal edges.
///
/// All three are compiled without crossing the subgraph's boundary.
pub fn compile_subgraph(graph: &FactorGraph, id: SubgraphId) -> Result<SubgraphSchedule> {
    let subgraph = graph.subgraph(id)?;
    tracing::info!(
        "[FGSC] Compiling subgraph {} ({} internal edges)",
        id,
        subgraph.internal_edges.len()
    );

    // Phase 1: boundary nodes
    let mut external = Vec::new();
    let mut internal_ifaces: Vec<(NodeId, Vec<InterfaceId>)> = Vec::new();
    for node in graph.nodes() {
        let mut inside = Vec::new();
        let mut touches_outside = false;
        for &iface in &node.interfaces {
            match graph.subgraph_of(iface)? {
                Some(s) if s == id => inside.push(iface),
                Some(_) => touches_outside = true,
                None => {}
            }
        }
        if touches_outside && !inside.is_empty() {
            external.push(node.id);
            internal_ifaces.push((node.id, inside));
        }
    }
    tracing::info!("[FGSC]   - {} boundary nodes", external.len());

    // Phase 2: inbound messages on internal edges of boundary nodes
    let mut dependencies = ScheduleCompiler::new(graph, Some(id));
    for (_, inside) in &internal_ifaces {
        for &iface in inside {
            dependencies.resolve(graph.require_partner(iface)?)?;
        }
    }

    // Phase 3: single-internal-edge boundary nodes send their own outbound
    let mut single_edge = ScheduleCompiler::new(graph, Some(id));
    for (node, inside) in &internal_ifaces {
        if let [iface] = inside.as_slice() {
            tracing::trace!("[FGSC] boundary node {} has a single internal edge", node);
            single_edge.resolve(*iface)?;
        }
    }

    // Phase 4: recurrent state arriving at time-wrap sinks
    let mut wraps = ScheduleCompiler::new(graph, Some(id));
    for wrap in graph.time_wraps() {
        let Some(&sink) = graph.node(wrap.sink)?.interfaces.first() else {
            continue;
        };
        if graph.subgraph_of(sink)? == Some(id) {
            wraps.resolve(graph.require_partner(sink)?)?;
        }
    }

    let internal = Schedule::concat_unique([
        &dependencies.finish(),
        &single_edge.finish(),
        &wraps.finish(),
    ]);
    tracing::info!(
        "[FGSC] Subgraph {} compiled: {} internal entries",
        id,
        internal.len()
    );
    Ok(SubgraphSchedule { internal, external })
}

/// Compile every subgraph and store the result on it.
pub fn install_subgraph_schedules(graph: &mut FactorGraph) -> Result<()> {
    let ids: Vec<SubgraphId> = graph.subgraphs().iter().map(|s| s.id).collect();
    for id in ids {
        let compiled = compile_subgraph(graph, id)?;
        graph.set_subgraph_schedules(id, compiled.internal, compiled.external)?;
    }
    Ok(())
}

fn edge_subgraph(graph: &FactorGraph, interface: InterfaceId) -> Result<SubgraphId> {
    let node = graph.interface(interface)?.node;
    graph
        .subgraph_of(interface)?
        .ok_or(FgscError::DisconnectedInterface { node, interface })
}

/// Depth-first dependency walk.
///
/// `call_list` is the recursion stack and detects cycles; `backtrace` is the
/// schedule under construction and doubles as the memo.
struct ScheduleCompiler<'a> {
    graph: &'a FactorGraph,
    restrict: Option<SubgraphId>,
    call_list: Vec<InterfaceId>,
    backtrace: Vec<ScheduleEntry>,
    scheduled: HashSet<InterfaceId>,
}

impl<'a> ScheduleCompiler<'a> {
    fn new(graph: &'a FactorGraph, restrict: Option<SubgraphId>) -> Self {
        Self {
            graph,
            restrict,
            call_list: Vec::new(),
            backtrace: Vec::new(),
            scheduled: HashSet::new(),
        }
    }

    fn resolve(&mut self, target: InterfaceId) -> Result<()> {
        let node = self.graph.interface(target)?.node;
        if self.call_list.contains(&target) {
            tracing::debug!("[FGSC] cycle detected at {} on {}", target, node);
            return Err(FgscError::Cycle {
                node,
                interface: target,
            });
        }
        if self.scheduled.contains(&target) {
            return Ok(());
        }

        self.call_list.push(target);
        for inbound in self.graph.required_inbound(target)? {
            if let Some(subgraph) = self.restrict {
                if self.graph.subgraph_of(inbound)? != Some(subgraph) {
                    continue;
                }
            }
            let partner = self.graph.require_partner(inbound)?;
            if self.graph.message(partner)?.is_none() && !self.scheduled.contains(&partner) {
                self.resolve(partner)?;
            }
        }
        self.call_list.pop();

        self.scheduled.insert(target);
        self.backtrace.push(ScheduleEntry::sum_product(target));
        Ok(())
    }

    fn finish(self) -> Schedule {
        Schedule::from_entries(self.backtrace)
    }
}
