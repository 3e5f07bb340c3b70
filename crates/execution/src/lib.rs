#![deny(missing_docs)]

//! Row pipeline interpreter for quarry operator plans.
//!
//! Architecture role:
//! - task context, row channels and execution unit contracts
//! - expression compilation/evaluation over rows
//! - operator units, aggregate accumulators and the UDAF registry
//! - pipeline construction from a [`quarry_planner::PlanNode`]
//!
//! Key modules:
//! - [`context`]
//! - [`exec_node`]
//! - [`expressions`]
//! - [`accumulators`]
//! - [`operators`]
//! - [`pipeline`]
//! - [`stream`]
//! - [`udaf`]

pub mod accumulators;
pub mod batch;
pub mod context;
pub mod exec_node;
pub mod expressions;
pub mod operators;
pub mod pipeline;
pub mod provider;
pub mod stream;
pub mod udaf;

// Re-export only what you want at the crate root (no globs).
pub use accumulators::{Accumulator, AccumulatorFactory, CompiledAccumulator};
pub use batch::{rows_from_batch, rows_to_batch};
pub use context::{SharedTaskContext, TaskContext};
pub use exec_node::{spawn_unit, ExecNode, ExecNodeRef, UnitStats};
pub use expressions::{compile_expr, PhysicalExpr};
pub use pipeline::{build_exec, execute_plan, run_to_sink};
pub use provider::TableProvider;
pub use stream::{bounded_row_channel, Row, RowSender, RowStream};
pub use udaf::{
    deregister_global_udaf, global_udaf_registry, register_global_udaf, UdafEntry, UdafFactory,
    UdafRegistry, UserAggregate,
};
