use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use quarry_common::{global_metrics, EngineConfig, NodeId, QuarryError, Result};
use tracing::debug;

use super::handlers::{default_handlers, HandlerTable};
use super::kinds::{ColumnOrigin, Cost, MetadataArgs, MetadataKind, MetadataValue};
use crate::catalog::{CatalogReader, TableDescriptor, TableStatistics};
use crate::expr::{ScalarExpr, TableOccurrence};
use crate::plan::{OperatorKind, PlanNode};
use crate::traits::{Collation, ColumnSet, Distribution};

type CacheKey = (NodeId, MetadataKind, MetadataArgs);

/// One metadata derivation pass over one plan.
///
/// Results are memoized per (node, kind, arguments) for the lifetime of the
/// query. The plan is immutable, so the cache never needs invalidation; a new
/// plan gets a new `MetadataQuery`. The cache is internally synchronized and
/// handlers are side-effect free, so a query may be shared across threads.
pub struct MetadataQuery<'a> {
    root: &'a PlanNode,
    nodes: HashMap<NodeId, &'a PlanNode>,
    occurrences: HashMap<NodeId, TableOccurrence>,
    catalog: &'a dyn CatalogReader,
    config: EngineConfig,
    handlers: Arc<HandlerTable>,
    cache: Mutex<HashMap<CacheKey, Option<MetadataValue>>>,
}

impl std::fmt::Debug for MetadataQuery<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cached = self.cache.lock().map(|c| c.len()).unwrap_or_default();
        f.debug_struct("MetadataQuery")
            .field("root", &self.root.id())
            .field("nodes", &self.nodes.len())
            .field("cached", &cached)
            .finish()
    }
}

impl<'a> MetadataQuery<'a> {
    /// Query over `root` with the built-in handler table.
    pub fn new(root: &'a PlanNode, catalog: &'a dyn CatalogReader, config: EngineConfig) -> Result<Self> {
        Self::with_handlers(root, catalog, config, default_handlers())
    }

    /// Query over `root` with a custom handler table.
    pub fn with_handlers(
        root: &'a PlanNode,
        catalog: &'a dyn CatalogReader,
        config: EngineConfig,
        handlers: Arc<HandlerTable>,
    ) -> Result<Self> {
        root.validate_tree()?;
        let mut nodes = HashMap::new();
        let mut occurrences = HashMap::new();
        let mut per_table: HashMap<String, usize> = HashMap::new();
        root.walk(&mut |node, _| {
            nodes.insert(node.id(), node);
            if let Some(table) = node.scan_table() {
                let qualified_name = table.qualified_name();
                let n = per_table.entry(qualified_name.clone()).or_default();
                occurrences.insert(
                    node.id(),
                    TableOccurrence {
                        qualified_name,
                        entity_number: *n,
                    },
                );
                *n += 1;
            }
        });
        Ok(Self {
            root,
            nodes,
            occurrences,
            catalog,
            config,
            handlers,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &'a PlanNode {
        self.root
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &dyn CatalogReader {
        self.catalog
    }

    /// Table occurrence of a scan node in this plan.
    pub fn table_occurrence(&self, scan: &PlanNode) -> Option<&TableOccurrence> {
        self.occurrences.get(&scan.id())
    }

    /// Catalog descriptor of a scan; `None` when the catalog does not know the table.
    pub fn scan_descriptor(&self, scan: &PlanNode) -> Option<TableDescriptor> {
        let table = scan.scan_table()?;
        match self.catalog.table(table.id) {
            Ok(desc) => Some(desc),
            Err(e) => {
                debug!(table = %table.qualified_name(), error = %e, "catalog lookup failed");
                None
            }
        }
    }

    pub fn scan_statistics(&self, scan: &PlanNode) -> Option<TableStatistics> {
        let table = scan.scan_table()?;
        self.catalog.table_statistics(table.id).ok().flatten()
    }

    fn check_member(&self, node: &PlanNode) -> Result<()> {
        match self.nodes.get(&node.id()) {
            Some(n) if std::ptr::eq(*n, node) => Ok(()),
            _ => Err(QuarryError::Metadata(format!(
                "node {} ({}) does not belong to the plan rooted at {}",
                node.id(),
                node.kind(),
                self.root.id()
            ))),
        }
    }

    /// Resolves `kind` for `node`, consulting the cache first.
    ///
    /// `Ok(None)` means the value cannot be determined.
    pub fn request(
        &self,
        node: &PlanNode,
        kind: MetadataKind,
        args: MetadataArgs,
    ) -> Result<Option<MetadataValue>> {
        self.check_member(node)?;
        let metrics = global_metrics();
        if !self.config.metadata_cache_enabled {
            metrics.record_metadata_request(kind.name(), "uncached");
            return self.derive(node, kind, &args);
        }
        let key = (node.id(), kind, args);
        if let Some(hit) = self.lock_cache()?.get(&key) {
            metrics.record_metadata_request(kind.name(), "hit");
            return Ok(hit.clone());
        }
        metrics.record_metadata_request(kind.name(), "miss");
        let value = self.derive(node, kind, &key.2)?;
        self.lock_cache()?.insert(key, value.clone());
        Ok(value)
    }

    fn derive(
        &self,
        node: &PlanNode,
        kind: MetadataKind,
        args: &MetadataArgs,
    ) -> Result<Option<MetadataValue>> {
        match self.handlers.lookup(node.kind(), kind) {
            Some(handler) => handler(self, node, args),
            None => Ok(None),
        }
    }

    fn lock_cache(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<CacheKey, Option<MetadataValue>>>> {
        self.cache
            .lock()
            .map_err(|_| QuarryError::Metadata("metadata cache lock poisoned".to_string()))
    }

    /// Number of memoized results.
    pub fn cached_entries(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or_default()
    }

    /// Fraction of rows satisfying `predicate`, in `[0, 1]`.
    pub fn selectivity(&self, node: &PlanNode, predicate: Option<&ScalarExpr>) -> Result<Option<f64>> {
        Ok(self
            .request(node, MetadataKind::Selectivity, MetadataArgs::Predicate(predicate.cloned()))?
            .and_then(MetadataValue::into_number)
            .map(|s| s.clamp(0.0, 1.0)))
    }

    pub fn unique_keys(&self, node: &PlanNode, ignore_nulls: bool) -> Result<Option<BTreeSet<ColumnSet>>> {
        Ok(self
            .request(node, MetadataKind::UniqueKeys, MetadataArgs::IgnoreNulls(ignore_nulls))?
            .and_then(MetadataValue::into_keys))
    }

    /// `Some(true)` when no two rows share values in `columns`; `None` when undecidable.
    pub fn are_columns_unique(
        &self,
        node: &PlanNode,
        columns: &ColumnSet,
        ignore_nulls: bool,
    ) -> Result<Option<bool>> {
        Ok(self
            .request(
                node,
                MetadataKind::ColumnUniqueness,
                MetadataArgs::Columns {
                    columns: columns.clone(),
                    ignore_nulls,
                },
            )?
            .and_then(MetadataValue::into_flag))
    }

    pub fn collations(&self, node: &PlanNode) -> Result<Option<Vec<Collation>>> {
        Ok(self
            .request(node, MetadataKind::Collation, MetadataArgs::None)?
            .and_then(MetadataValue::into_collations))
    }

    pub fn distribution(&self, node: &PlanNode) -> Result<Option<Distribution>> {
        Ok(self
            .request(node, MetadataKind::Distribution, MetadataArgs::None)?
            .and_then(MetadataValue::into_distribution))
    }

    pub fn node_types(&self, node: &PlanNode) -> Result<Option<BTreeMap<OperatorKind, usize>>> {
        Ok(self
            .request(node, MetadataKind::NodeTypes, MetadataArgs::None)?
            .and_then(MetadataValue::into_node_types))
    }

    /// Estimated row count, clamped into `[MinRowCount, MaxRowCount]`.
    pub fn tuple_count(&self, node: &PlanNode) -> Result<Option<f64>> {
        let Some(rows) = self
            .request(node, MetadataKind::TupleCount, MetadataArgs::None)?
            .and_then(MetadataValue::into_number)
        else {
            return Ok(None);
        };
        let mut rows = rows.max(0.0);
        if let Some(max) = self.max_row_count(node)? {
            rows = rows.min(max);
        }
        if let Some(min) = self.min_row_count(node)? {
            rows = rows.max(min);
        }
        Ok(Some(rows))
    }

    pub fn max_row_count(&self, node: &PlanNode) -> Result<Option<f64>> {
        Ok(self
            .request(node, MetadataKind::MaxRowCount, MetadataArgs::None)?
            .and_then(MetadataValue::into_number)
            .map(|v| v.max(0.0)))
    }

    pub fn min_row_count(&self, node: &PlanNode) -> Result<Option<f64>> {
        Ok(self
            .request(node, MetadataKind::MinRowCount, MetadataArgs::None)?
            .and_then(MetadataValue::into_number)
            .map(|v| v.max(0.0)))
    }

    pub fn distinct_row_count(
        &self,
        node: &PlanNode,
        key: &ColumnSet,
        predicate: Option<&ScalarExpr>,
    ) -> Result<Option<f64>> {
        Ok(self
            .request(
                node,
                MetadataKind::DistinctRowCount,
                MetadataArgs::GroupKey {
                    key: key.clone(),
                    predicate: predicate.cloned(),
                },
            )?
            .and_then(MetadataValue::into_number)
            .map(|v| v.max(0.0)))
    }

    pub fn percentage_original_rows(&self, node: &PlanNode) -> Result<Option<f64>> {
        Ok(self
            .request(node, MetadataKind::PercentageOriginalRows, MetadataArgs::None)?
            .and_then(MetadataValue::into_number)
            .map(|v| v.clamp(0.0, 1.0)))
    }

    pub fn population_size(&self, node: &PlanNode, key: &ColumnSet) -> Result<Option<f64>> {
        Ok(self
            .request(
                node,
                MetadataKind::PopulationSize,
                MetadataArgs::GroupKey {
                    key: key.clone(),
                    predicate: None,
                },
            )?
            .and_then(MetadataValue::into_number)
            .map(|v| v.max(0.0)))
    }

    pub fn average_row_size(&self, node: &PlanNode) -> Result<Option<f64>> {
        Ok(self
            .request(node, MetadataKind::AverageRowSize, MetadataArgs::None)?
            .and_then(MetadataValue::into_number))
    }

    pub fn average_column_sizes(&self, node: &PlanNode) -> Result<Option<Vec<Option<f64>>>> {
        Ok(self
            .request(node, MetadataKind::AverageColumnSizes, MetadataArgs::None)?
            .and_then(MetadataValue::into_sizes))
    }

    pub fn column_origins(&self, node: &PlanNode, column: usize) -> Result<Option<BTreeSet<ColumnOrigin>>> {
        Ok(self
            .request(node, MetadataKind::ColumnOrigin, MetadataArgs::Column(column))?
            .and_then(MetadataValue::into_origins))
    }

    /// The single origin of `column`, if it has exactly one.
    pub fn column_origin(&self, node: &PlanNode, column: usize) -> Result<Option<ColumnOrigin>> {
        Ok(self.column_origins(node, column)?.and_then(|origins| {
            if origins.len() == 1 {
                origins.into_iter().next()
            } else {
                None
            }
        }))
    }

    /// `expr` (over `node`'s output) rewritten in terms of base-table columns.
    pub fn expression_lineage(&self, node: &PlanNode, expr: &ScalarExpr) -> Result<Option<Vec<ScalarExpr>>> {
        Ok(self
            .request(node, MetadataKind::ExpressionLineage, MetadataArgs::Expr(expr.clone()))?
            .and_then(MetadataValue::into_expressions))
    }

    pub fn table_references(&self, node: &PlanNode) -> Result<Option<BTreeSet<TableOccurrence>>> {
        Ok(self
            .request(node, MetadataKind::TableReferences, MetadataArgs::None)?
            .and_then(MetadataValue::into_tables))
    }

    pub fn cumulative_cost(&self, node: &PlanNode) -> Result<Option<Cost>> {
        Ok(self
            .request(node, MetadataKind::CumulativeCost, MetadataArgs::None)?
            .and_then(MetadataValue::into_cost))
    }

    pub fn non_cumulative_cost(&self, node: &PlanNode) -> Result<Option<Cost>> {
        Ok(self
            .request(node, MetadataKind::NonCumulativeCost, MetadataArgs::None)?
            .and_then(MetadataValue::into_cost))
    }

    pub fn is_phase_transition(&self, node: &PlanNode) -> Result<Option<bool>> {
        Ok(self
            .request(node, MetadataKind::IsPhaseTransition, MetadataArgs::None)?
            .and_then(MetadataValue::into_flag))
    }

    pub fn split_count(&self, node: &PlanNode) -> Result<Option<usize>> {
        Ok(self
            .request(node, MetadataKind::SplitCount, MetadataArgs::None)?
            .and_then(MetadataValue::into_count))
    }

    pub fn memory(&self, node: &PlanNode) -> Result<Option<f64>> {
        Ok(self
            .request(node, MetadataKind::Memory, MetadataArgs::None)?
            .and_then(MetadataValue::into_number))
    }

    pub fn cumulative_memory_within_phase(&self, node: &PlanNode) -> Result<Option<f64>> {
        Ok(self
            .request(node, MetadataKind::CumulativeMemoryWithinPhase, MetadataArgs::None)?
            .and_then(MetadataValue::into_number))
    }

    pub fn cumulative_memory_within_phase_split(&self, node: &PlanNode) -> Result<Option<f64>> {
        Ok(self
            .request(node, MetadataKind::CumulativeMemoryWithinPhaseSplit, MetadataArgs::None)?
            .and_then(MetadataValue::into_number))
    }
}
