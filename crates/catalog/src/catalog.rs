use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema};
use quarry_common::{ColumnId, QuarryError, Result, TableId};
use quarry_planner::{
    CatalogReader, Collation, ColumnSet, Distribution, TableDescriptor, TableRef, TableStatistics,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Column type names accepted in catalog files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Boolean,
    Int32,
    Int64,
    Float32,
    Float64,
    Utf8,
}

impl ColumnType {
    pub fn data_type(self) -> DataType {
        match self {
            ColumnType::Boolean => DataType::Boolean,
            ColumnType::Int32 => DataType::Int32,
            ColumnType::Int64 => DataType::Int64,
            ColumnType::Float32 => DataType::Float32,
            ColumnType::Float64 => DataType::Float64,
            ColumnType::Utf8 => DataType::Utf8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub id: ColumnId,
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

/// Statistics keyed by column name, as written in catalog files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableStatsDef {
    #[serde(default)]
    pub row_count: Option<f64>,
    #[serde(default)]
    pub distinct_counts: HashMap<String, f64>,
    #[serde(default)]
    pub average_column_sizes: HashMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDef {
    pub id: TableId,
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// Name of the partition column.
    #[serde(default)]
    pub partition_column: Option<String>,
    /// Unique keys as lists of column names.
    #[serde(default)]
    pub unique_keys: Vec<Vec<String>>,
    #[serde(default)]
    pub collation: Collation,
    #[serde(default)]
    pub distribution: Option<Distribution>,
    #[serde(default)]
    pub statistics: Option<TableStatsDef>,
    /// Inline data, one JSON array per row; used by [`crate::MemTableProvider::from_catalog`].
    #[serde(default)]
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl TableDef {
    pub fn table_ref(&self) -> TableRef {
        TableRef::new(self.id, self.schema.clone(), self.name.clone())
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn arrow_schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(
            self.columns
                .iter()
                .map(|c| Field::new(c.name.clone(), c.column_type.data_type(), c.nullable))
                .collect::<Vec<_>>(),
        ))
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    fn resolve(&self, name: &str) -> Result<usize> {
        self.column_index(name).ok_or_else(|| {
            QuarryError::InvalidConfig(format!(
                "table {} has no column '{name}'",
                self.qualified_name()
            ))
        })
    }

    fn descriptor(&self) -> Result<TableDescriptor> {
        let partition_column = match &self.partition_column {
            Some(name) => Some(self.columns[self.resolve(name)?].id),
            None => None,
        };
        let unique_keys = self
            .unique_keys
            .iter()
            .map(|key| {
                let cols = key
                    .iter()
                    .map(|n| self.resolve(n))
                    .collect::<Result<Vec<_>>>()?;
                Ok(ColumnSet::of(&cols))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(TableDescriptor {
            table: self.table_ref(),
            column_ids: self.columns.iter().map(|c| c.id).collect(),
            schema: self.arrow_schema(),
            partition_column,
            unique_keys,
            collation: self.collation.clone(),
            distribution: self.distribution.clone(),
        })
    }

    fn statistics(&self) -> Result<Option<TableStatistics>> {
        let Some(stats) = &self.statistics else {
            return Ok(None);
        };
        let by_index = |m: &HashMap<String, f64>| -> Result<HashMap<usize, f64>> {
            m.iter().map(|(n, v)| Ok((self.resolve(n)?, *v))).collect()
        };
        Ok(Some(TableStatistics {
            row_count: stats.row_count,
            distinct_counts: by_index(&stats.distinct_counts)?,
            average_column_sizes: by_index(&stats.average_column_sizes)?,
        }))
    }

    fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(QuarryError::InvalidConfig(format!(
                "table {} has no columns",
                self.qualified_name()
            )));
        }
        for (i, c) in self.columns.iter().enumerate() {
            if self.columns[..i].iter().any(|o| o.name == c.name) {
                return Err(QuarryError::InvalidConfig(format!(
                    "table {} declares column '{}' twice",
                    self.qualified_name(),
                    c.name
                )));
            }
        }
        self.descriptor()?;
        self.statistics()?;
        Ok(())
    }
}

/// Table definitions keyed by id, also reachable by qualified name.
#[derive(Debug, Default)]
pub struct Catalog {
    tables: HashMap<TableId, TableDef>,
    by_name: HashMap<String, TableId>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a table after checking its column references.
    ///
    /// Column ids must be unique across the whole catalog.
    pub fn register_table(&mut self, table: TableDef) -> Result<()> {
        table.validate()?;
        for other in self.tables.values().filter(|t| t.id != table.id) {
            if let Some(c) = table
                .columns
                .iter()
                .find(|c| other.columns.iter().any(|o| o.id == c.id))
            {
                return Err(QuarryError::InvalidConfig(format!(
                    "column id {} of {} is already used by {}",
                    c.id,
                    table.qualified_name(),
                    other.qualified_name()
                )));
            }
        }
        if let Some(previous) = self.tables.get(&table.id) {
            self.by_name.remove(&previous.qualified_name());
        }
        debug!(table = %table.qualified_name(), id = %table.id, "registered table");
        self.by_name.insert(table.qualified_name(), table.id);
        self.tables.insert(table.id, table);
        Ok(())
    }

    pub fn get(&self, id: TableId) -> Result<&TableDef> {
        self.tables
            .get(&id)
            .ok_or_else(|| QuarryError::Planning(format!("unknown table id: {id}")))
    }

    /// Lookup by `schema.table`.
    pub fn get_by_name(&self, qualified_name: &str) -> Result<&TableDef> {
        let id = self
            .by_name
            .get(qualified_name)
            .ok_or_else(|| QuarryError::Planning(format!("unknown table: {qualified_name}")))?;
        self.get(*id)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDef> {
        self.tables.values()
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let tables: Vec<TableDef> =
            serde_json::from_str(text).map_err(|e| QuarryError::InvalidConfig(e.to_string()))?;
        let mut cat = Catalog::new();
        for t in tables {
            cat.register_table(t)?;
        }
        Ok(cat)
    }

    pub fn load_from_json(path: impl AsRef<Path>) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        Self::from_json_str(&s)
    }
}

impl CatalogReader for Catalog {
    fn table(&self, id: TableId) -> Result<TableDescriptor> {
        self.get(id)?.descriptor()
    }

    fn table_statistics(&self, id: TableId) -> Result<Option<TableStatistics>> {
        self.get(id)?.statistics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDERS: &str = r#"[{
        "id": 1, "schema": "sales", "name": "orders",
        "columns": [
            {"id": 10, "name": "id", "type": "int64", "nullable": false},
            {"id": 11, "name": "region", "type": "utf8"}
        ],
        "partition_column": "region",
        "unique_keys": [["id"]],
        "statistics": {"row_count": 20, "distinct_counts": {"region": 4}}
    }]"#;

    #[test]
    fn json_table_becomes_descriptor_and_statistics() {
        let cat = Catalog::from_json_str(ORDERS).unwrap();
        let d = cat.table(TableId(1)).unwrap();
        assert_eq!(d.partition_column, Some(ColumnId(11)));
        assert_eq!(d.partition_column_index(), Some(1));
        assert_eq!(d.unique_keys, vec![ColumnSet::of(&[0])]);
        assert!(!d.schema.field(0).is_nullable());
        let stats = cat.table_statistics(TableId(1)).unwrap().unwrap();
        assert_eq!(stats.row_count, Some(20.0));
        assert_eq!(stats.distinct_counts.get(&1), Some(&4.0));
        assert_eq!(cat.get_by_name("sales.orders").unwrap().id, TableId(1));
    }

    #[test]
    fn unknown_column_references_are_rejected() {
        let bad = ORDERS.replace(r#""partition_column": "region""#, r#""partition_column": "zone""#);
        assert!(matches!(
            Catalog::from_json_str(&bad),
            Err(QuarryError::InvalidConfig(_))
        ));
    }

    #[test]
    fn column_ids_are_unique_across_tables() {
        let mut cat = Catalog::from_json_str(ORDERS).unwrap();
        let mut copy = cat.get(TableId(1)).unwrap().clone();
        copy.id = TableId(2);
        copy.name = "orders_copy".to_string();
        assert!(cat.register_table(copy).is_err());
    }
}
