//! Bounded row channels connecting execution units.

use std::pin::Pin;
use std::task::{Context, Poll};

use arrow_schema::SchemaRef;
use futures::channel::mpsc;
use futures::{SinkExt, Stream, StreamExt};
use quarry_common::{QuarryError, Result};
use quarry_planner::Value;
use tokio_util::sync::CancellationToken;

use crate::context::TaskContext;

/// One row; values are positional against the producing unit's row shape.
pub type Row = Vec<Value>;

/// Create a bounded row channel for one producer and one consumer.
///
/// Backpressure: when the consumer is slow and the buffer fills up,
/// `send_row(..).await` waits until there is capacity again. Both ends
/// observe `ctx.cancel`.
pub fn bounded_row_channel(schema: SchemaRef, ctx: &TaskContext) -> (RowSender, RowStream) {
    let (tx, rx) = mpsc::channel::<Result<Row>>(ctx.channel_capacity);
    (
        RowSender {
            tx,
            cancel: ctx.cancel.clone(),
        },
        RowStream {
            schema,
            rx,
            cancel: ctx.cancel.clone(),
        },
    )
}

/// Sender side of [`bounded_row_channel`].
#[derive(Clone)]
pub struct RowSender {
    tx: mpsc::Sender<Result<Row>>,
    cancel: CancellationToken,
}

impl RowSender {
    /// Send a row, waiting while the buffer is full.
    ///
    /// Fails with `Cancelled` when the pipeline is cancelled first, and with
    /// `Execution` when the consumer has gone away.
    pub async fn send_row(&mut self, row: Row) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(QuarryError::Cancelled),
            sent = self.tx.send(Ok(row)) => {
                sent.map_err(|e| QuarryError::Execution(format!("row channel closed: {e}")))
            }
        }
    }

    /// Forward an error to the consumer without waiting for buffer space.
    ///
    /// Returns `false` when the error could not be delivered.
    pub fn send_error(&mut self, err: QuarryError) -> bool {
        self.tx.try_send(Err(err)).is_ok()
    }

    /// True once the consumer dropped its end.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiver side of [`bounded_row_channel`]; also a `Stream` of rows.
pub struct RowStream {
    schema: SchemaRef,
    rx: mpsc::Receiver<Result<Row>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for RowStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStream")
            .field("fields", &self.schema.fields().len())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl RowStream {
    /// Row shape of every row yielded by this stream.
    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    /// Next row, an error, or `None` at end of stream.
    ///
    /// Cancellation wins over buffered rows, so consumers never hang on a
    /// cancelled pipeline.
    pub async fn next_row(&mut self) -> Option<Result<Row>> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Some(Err(QuarryError::Cancelled)),
            item = self.rx.next() => item,
        }
    }

    /// Drain every remaining row, stopping at the first error.
    pub async fn collect_rows(mut self) -> Result<Vec<Row>> {
        let mut out = Vec::new();
        while let Some(row) = self.next_row().await {
            out.push(row?);
        }
        Ok(out)
    }
}

impl Stream for RowStream {
    type Item = Result<Row>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(Some(Err(QuarryError::Cancelled)));
        }
        Pin::new(&mut self.rx).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_schema::Schema;
    use quarry_common::{EngineConfig, QueryId};

    use super::*;

    fn ctx(capacity: usize) -> TaskContext {
        let config = EngineConfig {
            channel_capacity: capacity,
            ..EngineConfig::default()
        };
        TaskContext::new(QueryId(1), &config)
    }

    #[tokio::test]
    async fn rows_arrive_in_order_then_end() {
        let ctx = ctx(2);
        let (mut tx, rx) = bounded_row_channel(Arc::new(Schema::empty()), &ctx);
        tokio::spawn(async move {
            for i in 0..5 {
                tx.send_row(vec![Value::Int64(i)]).await.unwrap();
            }
        });
        let rows = rx.collect_rows().await.unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[4], vec![Value::Int64(4)]);
    }

    #[tokio::test]
    async fn cancellation_unblocks_both_ends() {
        let ctx = ctx(1);
        let (mut tx, mut rx) = bounded_row_channel(Arc::new(Schema::empty()), &ctx);
        let cancel = ctx.cancel.clone();
        let producer = tokio::spawn(async move {
            let mut sent = 0usize;
            let err = loop {
                match tx.send_row(vec![]).await {
                    Ok(()) => sent += 1,
                    Err(e) => break e,
                }
            };
            (sent, err)
        });
        // Let the producer fill the buffer and block.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancel.cancel();
        let (sent, err) = producer.await.unwrap();
        assert!(sent >= 1);
        assert!(matches!(err, QuarryError::Cancelled));
        assert!(matches!(rx.next_row().await, Some(Err(QuarryError::Cancelled))));
    }
}
