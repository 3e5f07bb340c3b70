use std::collections::HashMap;

use arrow_schema::SchemaRef;
use quarry_common::{ColumnId, Result, TableId};
use serde::{Deserialize, Serialize};

use crate::plan::TableRef;
use crate::traits::{Collation, ColumnSet, Distribution};

/// Catalog view of one table, as needed by analysis and metadata derivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub table: TableRef,
    /// Column ids in row-shape order.
    pub column_ids: Vec<ColumnId>,
    pub schema: SchemaRef,
    #[serde(default)]
    pub partition_column: Option<ColumnId>,
    #[serde(default)]
    pub unique_keys: Vec<ColumnSet>,
    #[serde(default)]
    pub collation: Collation,
    #[serde(default)]
    pub distribution: Option<Distribution>,
}

impl TableDescriptor {
    pub fn is_partitioned(&self) -> bool {
        self.partition_column.is_some()
    }

    /// Row-shape position of the partition column.
    pub fn partition_column_index(&self) -> Option<usize> {
        let pc = self.partition_column?;
        self.column_ids.iter().position(|c| *c == pc)
    }

    /// `schema.table.column` for the column at `index`.
    pub fn qualified_column_name(&self, index: usize) -> Option<String> {
        let field = self.schema.fields().get(index)?;
        Some(format!("{}.{}", self.table.qualified_name(), field.name()))
    }
}

/// Statistics the metadata framework consults for base tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableStatistics {
    pub row_count: Option<f64>,
    /// Distinct value count per column ordinal.
    #[serde(default)]
    pub distinct_counts: HashMap<usize, f64>,
    /// Average encoded size in bytes per column ordinal.
    #[serde(default)]
    pub average_column_sizes: HashMap<usize, f64>,
}

/// Read-only catalog contract consumed by the planner.
///
/// The client (Engine) provides this from its catalog.
pub trait CatalogReader: Send + Sync {
    /// Table descriptor by id; unknown ids are an error.
    fn table(&self, id: TableId) -> Result<TableDescriptor>;

    /// Statistics for a table, `None` when the catalog has none.
    fn table_statistics(&self, _id: TableId) -> Result<Option<TableStatistics>> {
        Ok(None)
    }
}
