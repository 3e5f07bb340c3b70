//! Relational plan model and plan-level analysis.
//!
//! Architecture role:
//! - typed scalar expressions ([`ScalarExpr`]) and operator trees ([`PlanNode`])
//!   whose row shapes are derived and checked at construction
//! - pluggable metadata derivation ([`MetadataQuery`]) for cardinality, cost,
//!   uniqueness, lineage and physical properties
//! - plan shape analysis ([`PlanShapeAnalyzer`]) producing literal-free
//!   signatures, column usage and partition pruning values
//!
//! Execution lives in `quarry-execution`; this crate never touches rows.

pub mod analyzer;
pub mod catalog;
pub mod explain;
pub mod expr;
pub mod metadata;
pub mod plan;
pub mod traits;
pub mod types;

pub use analyzer::{PlanShape, PlanShapeAnalyzer};
pub use catalog::{CatalogReader, TableDescriptor, TableStatistics};
pub use explain::{explain_plan, explain_plan_with};
pub use expr::{ScalarExpr, ScalarOp, TableOccurrence};
pub use metadata::{
    default_handlers, ColumnOrigin, Cost, HandlerTable, MetadataArgs, MetadataHandler, MetadataKind,
    MetadataQuery, MetadataValue,
};
pub use plan::{
    group_set, AggFunction, AggregateCall, JoinType, Operator, OperatorKind, PlanBuilder, PlanNode,
    TableRef,
};
pub use traits::{
    Collation, ColumnSet, Distribution, DistributionKind, FieldCollation, NullOrder, SortDirection,
};
pub use types::{SqlType, Value};
