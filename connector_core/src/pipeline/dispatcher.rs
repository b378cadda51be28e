//! Pipeline dispatcher.
//!
//! Resolves a request's endpoints, pulls parts from the source and submits
//! one write task per part to the shared executor. The dispatcher only
//! sequences submissions; all I/O happens inside the sink.

use std::sync::Arc;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::executor::{BoundedExecutor, CancelToken, TaskHandle};
use super::registry::TransferEndpointRegistry;
use super::request::{TransferRequest, TransferResult, TransferSummary};
use crate::error::TransferError;

pub struct PipelineDispatcher {
    registry: Arc<TransferEndpointRegistry>,
    executor: Arc<BoundedExecutor>,
}

impl PipelineDispatcher {
    pub fn new(registry: Arc<TransferEndpointRegistry>, executor: Arc<BoundedExecutor>) -> Self {
        Self { registry, executor }
    }

    pub fn registry(&self) -> &TransferEndpointRegistry {
        &self.registry
    }

    pub fn executor(&self) -> &BoundedExecutor {
        &self.executor
    }

    /// Run a transfer to completion.
    ///
    /// Dropping the returned future cancels the request's outstanding parts.
    pub async fn execute(&self, request: TransferRequest) -> TransferResult {
        self.execute_with_cancel(request, CancelToken::new()).await
    }

    /// Run a transfer that the caller can cancel through `cancel`.
    ///
    /// Succeeds only once the source is exhausted and every part was written.
    /// The source is read no further ahead than the executor's concurrency
    /// ceiling.
    /// The first failing part cancels the rest and its error becomes the
    /// result. Other requests sharing the executor are unaffected.
    pub async fn execute_with_cancel(
        &self,
        request: TransferRequest,
        cancel: CancelToken,
    ) -> TransferResult {
        let request_id = request.id;
        let token = cancel.child_token();
        let _guard = token.drop_guard();

        let source = self.registry.resolve_source(&request.source)?;
        let sink = self.registry.resolve_sink(&request.sink)?;
        let ordered = sink.ordered();
        // Parts are pulled only while the request has a free slot, so at most
        // `window` parts are held in memory at once
        let window = if ordered { 1 } else { self.executor.max_concurrency() };

        let mut parts = source.open().await?;
        let mut in_flight: FuturesUnordered<TaskHandle<u64>> = FuturesUnordered::new();
        let mut source_done = false;
        let mut completed = 0usize;
        let mut bytes = 0u64;

        debug!(
            request_id = %request_id,
            source = %request.source,
            sink = %request.sink,
            ordered,
            window,
            "Dispatching transfer"
        );

        loop {
            if source_done && in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    info!(request_id = %request_id, completed, "Transfer cancelled");
                    return Err(TransferError::Cancelled);
                }

                Some(result) = in_flight.next(), if !in_flight.is_empty() => match result {
                    Ok(written) => {
                        completed += 1;
                        bytes += written;
                    }
                    Err(e) => {
                        warn!(request_id = %request_id, error = %e, "Part failed, cancelling transfer");
                        token.cancel();
                        return Err(e);
                    }
                },

                next = parts.next(), if !source_done && in_flight.len() < window => match next {
                    Some(Ok(part)) => {
                        debug!(request_id = %request_id, part = %part.name, offset = part.offset, "Submitting part");
                        let sink = sink.clone();
                        in_flight.push(self.executor.submit(token.clone(), move |cancel| async move {
                            sink.write(part, &cancel).await
                        }));
                    }
                    Some(Err(e)) => {
                        warn!(request_id = %request_id, error = %e, "Source failed, cancelling transfer");
                        token.cancel();
                        return Err(e);
                    }
                    None => source_done = true,
                },
            }
        }

        let summary = TransferSummary {
            request_id,
            parts: completed,
            bytes,
        };
        sink.complete(&summary).await?;

        info!(request_id = %request_id, parts = completed, bytes, "Transfer completed");
        Ok(summary)
    }
}
