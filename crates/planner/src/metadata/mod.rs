//! Pluggable metadata derivation over operator plans.
//!
//! Architecture role:
//! - [`MetadataQuery`] resolves one [`MetadataKind`] for one node, memoizing
//!   per (node, kind, arguments) within a pass
//! - [`HandlerTable`] maps (operator kind, metadata kind) to a derivation rule,
//!   with one fallback rule per metadata kind
//!
//! A rule that cannot determine a value returns `Ok(None)`; only requests for
//! nodes outside the plan are errors.

pub mod handlers;
mod kinds;
mod query;

pub use handlers::{default_handlers, HandlerTable, MetadataHandler};
pub use kinds::{ColumnOrigin, Cost, MetadataArgs, MetadataKind, MetadataValue};
pub use query::MetadataQuery;
