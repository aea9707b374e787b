//! # Schedules
//!
//! Ordered, executable plans of message computations, plus their diagnostic
//! text rendering. The rendering is for people reading logs; it is not a
//! storage format.

use crate::error::{FgscError, Result};
use crate::graph::{FactorGraph, InterfaceId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    #[default]
    SumProduct,
    Sample,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::SumProduct => f.write_str("sum_product"),
            OperationKind::Sample => f.write_str("sample"),
        }
    }
}

/// Compute the outbound message of `interface` using `operation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub interface: InterfaceId,
    pub operation: OperationKind,
}

impl ScheduleEntry {
    pub fn sum_product(interface: InterfaceId) -> Self {
        Self {
            interface,
            operation: OperationKind::SumProduct,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    entries: Vec<ScheduleEntry>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<ScheduleEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&ScheduleEntry> {
        self.entries.last()
    }

    pub fn push(&mut self, entry: ScheduleEntry) {
        self.entries.push(entry);
    }

    pub fn contains(&self, interface: InterfaceId) -> bool {
        self.entries.iter().any(|e| e.interface == interface)
    }

    /// Outbound interfaces in execution order.
    pub fn interfaces(&self) -> Vec<InterfaceId> {
        self.entries.iter().map(|e| e.interface).collect()
    }

    /// Concatenation that keeps only the first occurrence of each interface.
    pub fn concat_unique<'a>(parts: impl IntoIterator<Item = &'a Schedule>) -> Schedule {
        let mut seen = HashSet::new();
        let entries = parts
            .into_iter()
            .flat_map(|s| s.entries.iter().copied())
            .filter(|e| seen.insert(e.interface))
            .collect();
        Schedule { entries }
    }

    /// One line per entry: operation, node kind, node, interface and role.
    ///
    /// ```text
    /// sum_product addition n2 i8:out
    /// ```
    pub fn render(&self, graph: &FactorGraph) -> Result<String> {
        let mut text = String::new();
        for entry in &self.entries {
            let iface = graph.interface(entry.interface)?;
            let node = graph.node(iface.node)?;
            let role = node.kind.roles().get(iface.position).copied().unwrap_or("?");
            text.push_str(&format!(
                "{} {} {} {}:{}\n",
                entry.operation,
                node.kind.tag(),
                node.id,
                entry.interface,
                role
            ));
        }
        Ok(text)
    }

    /// Reads the ordered interface identities back out of [`Schedule::render`]
    /// output. Blank lines are skipped.
    pub fn parse_interfaces(text: &str) -> Result<Vec<InterfaceId>> {
        let mut interfaces = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let line_no = index + 1;
            if line.trim().is_empty() {
                continue;
            }
            let field = line.split_whitespace().nth(3).ok_or_else(|| {
                FgscError::ScheduleParse {
                    line: line_no,
                    reason: "expected four fields".into(),
                }
            })?;
            let id = field
                .split(':')
                .next()
                .and_then(|s| s.strip_prefix('i'))
                .and_then(|s| s.parse::<u32>().ok())
                .ok_or_else(|| FgscError::ScheduleParse {
                    line: line_no,
                    reason: format!("bad interface field '{}'", field),
                })?;
            interfaces.push(InterfaceId(id));
        }
        Ok(interfaces)
    }
}

impl<'a> IntoIterator for &'a Schedule {
    type Item = &'a ScheduleEntry;
    type IntoIter = std::slice::Iter<'a, ScheduleEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl FromIterator<ScheduleEntry> for Schedule {
    fn from_iter<T: IntoIterator<Item = ScheduleEntry>>(iter: T) -> Self {
        Schedule {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule_of(ids: &[u32]) -> Schedule {
        ids.iter()
            .map(|&i| ScheduleEntry::sum_product(InterfaceId(i)))
            .collect()
    }

    #[test]
    fn concat_unique_keeps_first_seen_order() {
        let merged = Schedule::concat_unique([&schedule_of(&[3, 1]), &schedule_of(&[1, 4, 3, 2])]);
        assert_eq!(
            merged.interfaces(),
            vec![InterfaceId(3), InterfaceId(1), InterfaceId(4), InterfaceId(2)]
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = Schedule::parse_interfaces("sum_product scale n0 x7:out\n").unwrap_err();
        assert!(matches!(err, FgscError::ScheduleParse { line: 1, .. }));
        assert!(Schedule::parse_interfaces("sum_product\n").is_err());
    }

    #[test]
    fn parse_skips_blank_lines() {
        let ids = Schedule::parse_interfaces("\nsum_product scale n0 i1:out\n\n").unwrap();
        assert_eq!(ids, vec![InterfaceId(1)]);
    }
}
