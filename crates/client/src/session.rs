use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use quarry_catalog::{Catalog, MemTableProvider};
use quarry_common::{EngineConfig, QueryId, Result};
use quarry_execution::{TaskContext, UdafRegistry};

pub type SharedSession = Arc<Session>;

#[derive(Debug)]
pub struct Session {
    pub config: EngineConfig,
    pub catalog: RwLock<Catalog>,
    pub tables: Arc<MemTableProvider>,
    pub udafs: Arc<UdafRegistry>,
    next_query_id: AtomicU64,
}

impl Session {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            catalog: RwLock::new(Catalog::new()),
            tables: Arc::new(MemTableProvider::new()),
            udafs: Arc::new(UdafRegistry::default()),
            next_query_id: AtomicU64::new(1),
        })
    }

    /// Fresh context for one execution, carrying this session's aggregates.
    pub fn task_context(&self) -> TaskContext {
        let id = QueryId(self.next_query_id.fetch_add(1, Ordering::Relaxed));
        TaskContext::new(id, &self.config).with_udafs(Arc::clone(&self.udafs))
    }
}
