//! Base-table row source contract.

use quarry_common::Result;
use quarry_planner::TableRef;

use crate::stream::Row;

/// Source of base-table rows for `Scan` units.
pub trait TableProvider: Send + Sync {
    /// Every row of `table`, positional against the table's row shape.
    fn rows(&self, table: &TableRef) -> Result<Vec<Row>>;
}
