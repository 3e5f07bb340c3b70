//! Execution units, one per executable operator kind.

mod aggregate;
mod sort;
mod source;
mod transform;

pub(crate) use aggregate::check_output_width;
pub use aggregate::AggregateExec;
pub use sort::SortExec;
pub use source::{ScanExec, ValuesExec};
pub use transform::{ExchangeExec, FilterExec, ProjectExec, UnionExec};
