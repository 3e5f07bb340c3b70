//! Execution unit contract and the task spawner shared by every operator.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use arrow_schema::SchemaRef;
use quarry_common::{global_metrics, QuarryError, Result};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::context::SharedTaskContext;
use crate::stream::{bounded_row_channel, RowSender, RowStream};

/// An operator instance that produces rows.
///
/// `execute` starts the unit (and, recursively, its inputs) as tokio tasks and
/// returns the pull side of its output channel; it must be called from within
/// a tokio runtime.
pub trait ExecNode: Send + Sync {
    /// Operator name used in logs and metrics labels.
    fn name(&self) -> &'static str;

    /// Row shape of every emitted row.
    fn schema(&self) -> SchemaRef;

    /// Start the unit.
    fn execute(&self, ctx: SharedTaskContext) -> Result<RowStream>;
}

/// Shared handle to an [`ExecNode`].
pub type ExecNodeRef = Arc<dyn ExecNode>;

/// Row counters a unit reports when it finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitStats {
    /// Rows pulled from inputs.
    pub rows_in: u64,
    /// Rows pushed downstream.
    pub rows_out: u64,
}

/// Spawn `body` as one execution unit writing to a fresh bounded channel.
///
/// Failures of `body` (including cancellation) are forwarded to the consumer
/// as a final error item; the channel closes when the unit finishes.
pub fn spawn_unit<F, Fut>(
    ctx: SharedTaskContext,
    name: &'static str,
    schema: SchemaRef,
    body: F,
) -> RowStream
where
    F: FnOnce(RowSender) -> Fut + Send + 'static,
    Fut: Future<Output = Result<UnitStats>> + Send + 'static,
{
    let (tx, rx) = bounded_row_channel(schema, &ctx);
    let mut err_tx = tx.clone();
    let query_id = ctx.query_id.to_string();
    let span = info_span!("operator_execute", query_id = %query_id, operator = name);
    tokio::spawn(
        async move {
            let started = Instant::now();
            debug!("unit started");
            match body(tx).await {
                Ok(stats) => {
                    let secs = started.elapsed().as_secs_f64();
                    debug!(
                        rows_in = stats.rows_in,
                        rows_out = stats.rows_out,
                        secs,
                        "unit finished"
                    );
                    global_metrics().record_operator(&query_id, name, stats.rows_in, stats.rows_out, secs);
                }
                Err(QuarryError::Cancelled) => {
                    info!("unit cancelled");
                    err_tx.send_error(QuarryError::Cancelled);
                }
                Err(err) => {
                    warn!(error = %err, "unit failed");
                    if !err_tx.send_error(err) {
                        debug!("consumer gone, error dropped");
                    }
                }
            }
        }
        .instrument(span),
    );
    rx
}
