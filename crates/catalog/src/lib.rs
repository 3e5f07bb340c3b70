//! In-memory catalog and table storage for quarry.
//!
//! - [`Catalog`]: table definitions (columns, keys, partitioning, statistics)
//!   loadable from JSON; implements [`quarry_planner::CatalogReader`]
//! - [`MemTableProvider`]: rows per table, fed from row vectors, Arrow record
//!   batches or inline catalog rows; implements [`quarry_execution::TableProvider`]

pub mod catalog;
pub mod mem_table;

pub use catalog::{Catalog, ColumnDef, ColumnType, TableDef, TableStatsDef};
pub use mem_table::{inline_rows, MemTableProvider};
