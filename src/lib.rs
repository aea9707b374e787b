//! # Factor Graph Schedule Compiler (FGSC)
//!
//! Message scheduling and dispatch for belief propagation on factor graphs.
//!
//! Nodes are local factors, edges are variables, and marginal beliefs come
//! from exchanging messages between adjacent nodes. FGSC provides:
//! - A schedule compiler that orders the local updates needed for a requested
//!   message, based on the graph's topology *and* which messages are cached
//! - Subgraph-aware compilation for structured variational updates
//! - A message engine that runs schedules through a pluggable rule table
//! - Gaussian messages with independently valid parametrizations, converted
//!   only when no rule can use what is already there
//!
//! ## Quick Start
//!
//! ```rust
//! use fgsc::{compile, Distribution, FactorGraph, MessageEngine, NodeKind};
//!
//! let mut graph = FactorGraph::new();
//! let x = graph.add_node(NodeKind::Terminal { value: Distribution::gaussian(1.0, 1.0) });
//! let y = graph.add_node(NodeKind::Terminal { value: Distribution::gaussian(2.0, 1.0) });
//! let sum = graph.add_node(NodeKind::Addition);
//!
//! let (x_out, y_out) = (graph.interface_by_role(x, "out")?, graph.interface_by_role(y, "out")?);
//! let in1 = graph.interface_by_role(sum, "in1")?;
//! let in2 = graph.interface_by_role(sum, "in2")?;
//! let out = graph.interface_by_role(sum, "out")?;
//! graph.connect(x_out, in1)?;
//! graph.connect(y_out, in2)?;
//!
//! let schedule = compile(&graph, out)?;
//! let message = MessageEngine::default().run(&mut graph, &schedule)?;
//! assert_eq!(message.payload, Distribution::gaussian(3.0, 2.0));
//! # Ok::<(), fgsc::FgscError>(())
//! ```
//!
//! ## Architecture
//!
//! 1. **Graph Model** - arena of nodes, interfaces, edges and subgraphs; one
//!    message cache cell per interface
//! 2. **Schedule Compilation** - depth-first dependency resolution with cycle
//!    detection and memoization
//! 3. **Subgraph Compilation** - internal/external schedules per partition
//! 4. **Execution** - rule lookup by (node kind, outbound role, inbound kinds),
//!    generic widening, results written back to cache cells

pub mod compiler;
pub mod config;
pub mod distribution;
pub mod engine;
pub mod error;
pub mod graph;
pub mod message;
pub mod metadata;
pub mod schedule;

// Re-export the main compilation API
pub use compiler::{
    compile,
    compile_subgraph,
    compile_targets,
    install_subgraph_schedules,
    SubgraphSchedule,
};

pub use config::EngineConfig;
pub use distribution::{Distribution, DistributionKind, Gaussian, Parametrization};
pub use engine::{MessageEngine, RuleKey, RuleTable};
pub use error::{FgscError, Result};
pub use graph::{EdgeId, FactorGraph, InterfaceId, NodeId, SubgraphId, TimeWrap};
pub use message::Message;
pub use metadata::{NodeKind, NodeKindTag, Role};
pub use schedule::{OperationKind, Schedule, ScheduleEntry};
