use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLockReadGuard, RwLockWriteGuard};

use arrow::record_batch::RecordBatch;
use quarry_catalog::{inline_rows, Catalog, TableDef};
use quarry_common::{global_metrics, EngineConfig, NodeId, Result, TableId};
use quarry_execution::{
    execute_plan, rows_to_batch, Row, RowStream, SharedTaskContext, TableProvider, UserAggregate,
};
use quarry_planner::{
    explain_plan, explain_plan_with, MetadataQuery, PlanNode, PlanShape, PlanShapeAnalyzer,
};
use tracing::info;

use crate::session::{Session, SharedSession};

/// Entry point: a catalog, in-memory tables and user aggregates behind one handle.
#[derive(Clone)]
pub struct Engine {
    session: SharedSession,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let session = Arc::new(Session::new(config)?);
        Ok(Self { session })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.session.config
    }

    fn catalog(&self) -> RwLockReadGuard<'_, Catalog> {
        self.session.catalog.read().unwrap_or_else(|p| p.into_inner())
    }

    fn catalog_mut(&self) -> RwLockWriteGuard<'_, Catalog> {
        self.session.catalog.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Registers a table; inline rows in the definition are loaded too.
    pub fn register_table(&self, mut table: TableDef) -> Result<()> {
        let rows = inline_rows(&table)?;
        table.rows.clear();
        let id = table.id;
        self.catalog_mut().register_table(table)?;
        if !rows.is_empty() {
            self.session.tables.append_rows(id, rows);
        }
        Ok(())
    }

    /// Registers every table of a catalog file; returns how many were loaded.
    pub fn load_catalog(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let tables: Vec<TableDef> = serde_json::from_str(&text)?;
        let n = tables.len();
        for table in tables {
            self.register_table(table)?;
        }
        info!(path = %path.display(), tables = n, "catalog loaded");
        Ok(n)
    }

    pub fn list_tables(&self) -> Vec<String> {
        let mut names = self
            .catalog()
            .tables()
            .map(TableDef::qualified_name)
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    pub fn append_rows(&self, table: TableId, rows: Vec<Row>) {
        self.session.tables.append_rows(table, rows);
    }

    pub fn append_batch(&self, table: TableId, batch: &RecordBatch) -> Result<()> {
        self.session.tables.append_batch(table, batch)
    }

    /// Registers a user-defined aggregate for this engine's executions.
    ///
    /// Returns `true` when an aggregate with the same name was replaced.
    pub fn register_udaf<F>(&self, name: &str, null_when_empty: bool, factory: F) -> bool
    where
        F: Fn() -> Box<dyn UserAggregate> + Send + Sync + 'static,
    {
        self.session.udafs.register(name, null_when_empty, factory)
    }

    pub fn deregister_udaf(&self, name: &str) -> bool {
        self.session.udafs.deregister(name)
    }

    pub fn explain(&self, plan: &PlanNode) -> String {
        explain_plan(plan)
    }

    pub fn analyze(&self, plan: &PlanNode) -> PlanShape {
        let catalog = self.catalog();
        PlanShapeAnalyzer::new(&*catalog).analyze(plan)
    }

    /// Explain text with row, cost and memory estimates on every node.
    pub fn explain_with_metadata(&self, plan: &PlanNode) -> Result<String> {
        let catalog = self.catalog();
        let mq = MetadataQuery::new(plan, &*catalog, self.session.config.clone())?;
        let mut nodes = Vec::new();
        plan.walk(&mut |node, _| nodes.push(node));
        let mut notes: HashMap<NodeId, String> = HashMap::new();
        for node in nodes {
            let mut parts = Vec::new();
            if let Some(rows) = mq.tuple_count(node)? {
                parts.push(format!("rows={rows}"));
            }
            if let Some(cost) = mq.cumulative_cost(node)? {
                parts.push(format!("cost={cost}"));
            }
            if let Some(mem) = mq.memory(node)? {
                if mem > 0.0 {
                    parts.push(format!("memory={mem}"));
                }
            }
            if !parts.is_empty() {
                notes.insert(node.id(), parts.join(" "));
            }
        }
        Ok(explain_plan_with(plan, &|node| notes.get(&node.id()).cloned()))
    }

    /// Context for a new execution; cancel it through `ctx.cancel`.
    pub fn task_context(&self) -> SharedTaskContext {
        Arc::new(self.session.task_context())
    }

    pub fn execute(&self, plan: &PlanNode) -> Result<RowStream> {
        self.execute_with(plan, self.task_context())
    }

    pub fn execute_with(&self, plan: &PlanNode, ctx: SharedTaskContext) -> Result<RowStream> {
        let provider: Arc<dyn TableProvider> = self.session.tables.clone();
        execute_plan(plan, provider, ctx)
    }

    pub async fn collect(&self, plan: &PlanNode) -> Result<Vec<Row>> {
        self.execute(plan)?.collect_rows().await
    }

    pub async fn collect_batch(&self, plan: &PlanNode) -> Result<RecordBatch> {
        let stream = self.execute(plan)?;
        let schema = stream.schema();
        let rows = stream.collect_rows().await?;
        rows_to_batch(schema, &rows)
    }

    pub fn prometheus_metrics(&self) -> String {
        global_metrics().render_prometheus()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("tables", &self.list_tables())
            .finish()
    }
}
