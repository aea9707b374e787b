//! # Message Engine
//!
//! Executes compiled schedules against a graph's cache cells.

use super::rules::{Rule, RuleCall, RuleKey, RuleTable};
use crate::compiler;
use crate::config::EngineConfig;
use crate::distribution::Distribution;
use crate::error::{FgscError, Result};
use crate::graph::{FactorGraph, InterfaceId};
use crate::message::Message;
use crate::metadata::NodeKind;
use crate::schedule::{Schedule, ScheduleEntry};

/// Dispatches schedule entries to update rules and writes the results back
/// into the outbound interface's cache cell.
#[derive(Debug, Clone)]
pub struct MessageEngine {
    rules: RuleTable,
    config: EngineConfig,
}

impl Default for MessageEngine {
    fn default() -> Self {
        Self {
            rules: RuleTable::standard(),
            config: EngineConfig::default(),
        }
    }
}

impl MessageEngine {
    pub fn new(rules: RuleTable, config: EngineConfig) -> Result<Self> {
        Ok(Self {
            rules,
            config: config.validate()?,
        })
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute `schedule` in order and return the message left on its last
    /// entry's interface.
    ///
    /// A failing entry stops the run; cells written by earlier entries keep
    /// their new values.
    pub fn run<'g>(&self, graph: &'g mut FactorGraph, schedule: &Schedule) -> Result<&'g Message> {
        let last = schedule.last().ok_or(FgscError::EmptySchedule)?.interface;
        tracing::debug!("[FGSC] Executing schedule ({} entries)", schedule.len());

        for entry in schedule {
            let message = self.compute(graph, entry)?;
            graph.set_message(entry.interface, message)?;
        }

        let graph: &'g FactorGraph = graph;
        graph.message(last)?.ok_or(FgscError::MissingMessage {
            node: graph.interface(last)?.node,
            interface: last,
            inbound: last,
        })
    }

    /// Replay `schedule` `config.iterations` times.
    pub fn iterate<'g>(
        &self,
        graph: &'g mut FactorGraph,
        schedule: &Schedule,
    ) -> Result<&'g Message> {
        tracing::info!(
            "[FGSC] Iterating schedule ({} entries) {} times",
            schedule.len(),
            self.config.iterations
        );
        for _ in 1..self.config.iterations {
            self.run(graph, schedule)?;
        }
        self.run(graph, schedule)
    }

    /// Compile and run the schedule for one outbound message.
    pub fn infer<'g>(
        &self,
        graph: &'g mut FactorGraph,
        outbound: InterfaceId,
    ) -> Result<&'g Message> {
        let schedule = compiler::compile(graph, outbound)?;
        self.run(graph, &schedule)
    }

    /// Compute the outbound message for one entry without storing it.
    pub fn compute(&self, graph: &FactorGraph, entry: &ScheduleEntry) -> Result<Message> {
        let iface = graph.interface(entry.interface)?;
        let node = graph.node(iface.node)?;

        let mut inbound: Vec<(usize, Distribution)> = Vec::new();
        for required in graph.required_inbound(entry.interface)? {
            let message =
                graph
                    .inbound_message(required)?
                    .ok_or(FgscError::MissingMessage {
                        node: node.id,
                        interface: entry.interface,
                        inbound: required,
                    })?;
            if self.config.check_inbound_propriety && !message.payload.is_proper() {
                return Err(FgscError::ImproperDistribution {
                    node: node.id,
                    interface: entry.interface,
                    reason: format!("inbound on {} is {}", required, message.payload),
                });
            }
            inbound.push((graph.interface(required)?.position, message.payload));
        }

        let symmetric = node.kind.is_symmetric();
        let mut payloads = order_inbound(inbound, symmetric);
        let key = RuleKey::new(
            node.kind.tag(),
            node.kind.role(iface.position),
            payloads.iter().map(|d| d.kind()).collect(),
            entry.operation,
        );

        let rule = match self.rules.lookup(&key) {
            Some(rule) => *rule,
            None => {
                let (widened, retry) = self.widen(&key, payloads.clone(), symmetric);
                match retry.and_then(|k| self.rules.lookup(&k).map(|r| (*r, k))) {
                    Some((rule, widened_key)) => {
                        tracing::trace!("[FGSC] widened {} to {}", key, widened_key);
                        payloads = widened;
                        rule
                    }
                    None => {
                        return Err(FgscError::NoApplicableRule {
                            node: node.id,
                            interface: entry.interface,
                            key: key.to_string(),
                        })
                    }
                }
            }
        };

        tracing::debug!(
            "[FGSC] {} {} {} via {}",
            entry.operation,
            node.id,
            entry.interface,
            rule.name
        );
        let payload = self
            .apply(&rule, &node.kind, &payloads)
            .map_err(|e| e.at(node.id, entry.interface))?;
        Ok(Message::new(payload, rule.name))
    }

    fn apply(
        &self,
        rule: &Rule,
        kind: &NodeKind,
        inbound: &[Distribution],
    ) -> Result<Distribution> {
        (rule.apply)(&RuleCall {
            kind,
            inbound,
            fast_path_inversion: self.config.fast_path_inversion,
        })
    }

    /// Converts every widenable inbound once. The key is `None` when nothing
    /// could be widened.
    fn widen(
        &self,
        key: &RuleKey,
        payloads: Vec<Distribution>,
        symmetric: bool,
    ) -> (Vec<Distribution>, Option<RuleKey>) {
        let mut changed = false;
        let widened: Vec<(usize, Distribution)> = payloads
            .into_iter()
            .enumerate()
            .map(|(i, d)| match d.widened() {
                Some(w) => {
                    changed = true;
                    (i, w)
                }
                None => (i, d),
            })
            .collect();
        let widened = order_inbound(widened, symmetric);
        if !changed {
            return (widened, None);
        }
        let retry = RuleKey::new(
            key.node,
            key.outbound,
            widened.iter().map(|d| d.kind()).collect(),
            key.operation,
        );
        (widened, Some(retry))
    }
}

/// Interface order for asymmetric kinds, kind order for symmetric ones.
fn order_inbound(mut inbound: Vec<(usize, Distribution)>, symmetric: bool) -> Vec<Distribution> {
    inbound.sort_by_key(|(position, _)| *position);
    if symmetric {
        inbound.sort_by_key(|(_, d)| d.kind());
    }
    inbound.into_iter().map(|(_, d)| d).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::OperationKind;

    fn source(graph: &mut FactorGraph, value: Distribution) -> InterfaceId {
        let t = graph.add_node(NodeKind::Terminal { value });
        graph.interface_by_role(t, "out").unwrap()
    }

    #[test]
    fn missing_inbound_is_fatal() {
        let mut graph = FactorGraph::new();
        let x = source(&mut graph, Distribution::gaussian(0.0, 1.0));
        let s = graph.add_node(NodeKind::Scale { gain: 2.0 });
        let s_in = graph.interface_by_role(s, "in").unwrap();
        let s_out = graph.interface_by_role(s, "out").unwrap();
        graph.connect(x, s_in).unwrap();
        graph.clear_message(x).unwrap();

        let engine = MessageEngine::default();
        let schedule = Schedule::from_entries(vec![ScheduleEntry::sum_product(s_out)]);
        let err = engine.run(&mut graph, &schedule).unwrap_err();
        assert_eq!(
            err,
            FgscError::MissingMessage {
                node: s,
                interface: s_out,
                inbound: s_in,
            }
        );
    }

    #[test]
    fn delta_widens_into_gaussian_rule() {
        let mut graph = FactorGraph::new();
        let a = source(&mut graph, Distribution::delta(5.0));
        let b = source(&mut graph, Distribution::gaussian(1.0, 1.0));
        let add = graph.add_node(NodeKind::Addition);
        let in1 = graph.interface_by_role(add, "in1").unwrap();
        let in2 = graph.interface_by_role(add, "in2").unwrap();
        let out = graph.interface_by_role(add, "out").unwrap();
        graph.connect(a, in1).unwrap();
        graph.connect(b, in2).unwrap();

        let engine = MessageEngine::default();
        let msg = engine.infer(&mut graph, out).unwrap();
        assert_eq!(msg.rule, "addition_gaussian_forward");
        assert_eq!(msg.payload, Distribution::gaussian(6.0, 1.0));
    }

    #[test]
    fn symmetric_node_sorts_inbound_kinds() {
        let mut graph = FactorGraph::new();
        let g = source(&mut graph, Distribution::gaussian(1.0, 1.0));
        let d = source(&mut graph, Distribution::delta(2.0));
        let eq = graph.add_node(NodeKind::Equality);
        let ports = graph.node(eq).unwrap().interfaces.clone();
        graph.connect(g, ports[0]).unwrap();
        graph.connect(d, ports[1]).unwrap();

        let msg = MessageEngine::default().infer(&mut graph, ports[2]).unwrap();
        assert_eq!(msg.rule, "equality_delta");
        assert_eq!(msg.payload, Distribution::delta(2.0));
    }

    #[test]
    fn zero_variance_input_pins_equality() {
        let mut graph = FactorGraph::new();
        let pinned = source(&mut graph, Distribution::gaussian(2.0, 0.0));
        let loose = source(&mut graph, Distribution::gaussian(1.0, 1.0));
        let eq = graph.add_node(NodeKind::Equality);
        let ports = graph.node(eq).unwrap().interfaces.clone();
        graph.connect(pinned, ports[0]).unwrap();
        graph.connect(loose, ports[1]).unwrap();

        let msg = MessageEngine::default().infer(&mut graph, ports[2]).unwrap();
        assert_eq!(msg.rule, "equality_gaussian");
        assert_eq!(msg.payload, Distribution::gaussian(2.0, 0.0));
    }

    #[test]
    fn unsupported_combination_reports_key() {
        let mut graph = FactorGraph::new();
        let x = source(
            &mut graph,
            Distribution::Gamma(crate::distribution::Gamma { a: 1.0, b: 1.0 }),
        );
        let s = graph.add_node(NodeKind::Scale { gain: 2.0 });
        let s_in = graph.interface_by_role(s, "in").unwrap();
        let s_out = graph.interface_by_role(s, "out").unwrap();
        graph.connect(x, s_in).unwrap();

        let err = MessageEngine::default().infer(&mut graph, s_out).unwrap_err();
        match err {
            FgscError::NoApplicableRule { key, interface, .. } => {
                assert_eq!(interface, s_out);
                assert_eq!(key, "scale/out(gamma) sum_product");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn sample_operation_needs_its_own_rule() {
        let mut graph = FactorGraph::new();
        let x = source(&mut graph, Distribution::delta(1.0));
        let s = graph.add_node(NodeKind::Scale { gain: 2.0 });
        let s_in = graph.interface_by_role(s, "in").unwrap();
        let s_out = graph.interface_by_role(s, "out").unwrap();
        graph.connect(x, s_in).unwrap();

        let schedule = Schedule::from_entries(vec![ScheduleEntry {
            interface: s_out,
            operation: OperationKind::Sample,
        }]);
        let err = MessageEngine::default().run(&mut graph, &schedule).unwrap_err();
        assert!(matches!(err, FgscError::NoApplicableRule { .. }));
    }

    #[test]
    fn improper_inbound_rejected() {
        let mut graph = FactorGraph::new();
        let x = source(&mut graph, Distribution::gaussian(0.0, -1.0));
        let s = graph.add_node(NodeKind::Noise { variance: 1.0 });
        let s_in = graph.interface_by_role(s, "in").unwrap();
        let s_out = graph.interface_by_role(s, "out").unwrap();
        graph.connect(x, s_in).unwrap();

        let err = MessageEngine::default().infer(&mut graph, s_out).unwrap_err();
        match err {
            FgscError::ImproperDistribution { node, interface, .. } => {
                assert_eq!((node, interface), (s, s_out));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn empty_schedule_rejected() {
        let mut graph = FactorGraph::new();
        let err = MessageEngine::default()
            .run(&mut graph, &Schedule::new())
            .unwrap_err();
        assert_eq!(err, FgscError::EmptySchedule);
    }
}
