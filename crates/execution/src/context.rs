//! Per-execution context shared by all units of one pipeline.

use std::sync::Arc;

use quarry_common::{EngineConfig, QueryId};
use tokio_util::sync::CancellationToken;

use crate::udaf::{global_udaf_registry, UdafRegistry};

/// Per-execution settings shared by every unit of one pipeline.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Metrics label for this execution.
    pub query_id: QueryId,

    /// Buffer size of every row channel between units.
    pub channel_capacity: usize,

    /// Cancelling this token stops every unit of the pipeline.
    pub cancel: CancellationToken,

    /// User-defined aggregates visible to `Aggregate` units.
    pub udafs: Arc<UdafRegistry>,
}

impl TaskContext {
    /// Context sized from `config`, using the global UDAF registry.
    pub fn new(query_id: QueryId, config: &EngineConfig) -> Self {
        Self {
            query_id,
            channel_capacity: config.channel_capacity.max(1),
            cancel: CancellationToken::new(),
            udafs: global_udaf_registry(),
        }
    }

    /// Replaces the UDAF registry.
    pub fn with_udafs(mut self, udafs: Arc<UdafRegistry>) -> Self {
        self.udafs = udafs;
        self
    }
}

/// Shared handle to a [`TaskContext`].
pub type SharedTaskContext = Arc<TaskContext>;
