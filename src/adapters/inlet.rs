use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{AdapterError, BatchSource, Reader, SinkRegistry};
use crate::message::{Batch, CorrelationId, OutputUnit};
use crate::runtime::StreamError;

/// Callback receiving the outputs collected for one acknowledged batch
pub type ResultHandler = Arc<dyn Fn(Vec<OutputUnit>, Option<StreamError>) + Send + Sync>;

/// Reader that tags every batch it reads with a fresh result sink and hands
/// the sink's contents to a callback once the pipeline acknowledges it.
///
/// Results only come back for pipelines that keep the envelope correlation of
/// their parts and end in at least one [`SinkWriter`](super::SinkWriter).
pub struct RoundTripReader<S> {
    source: S,
    registry: Arc<SinkRegistry>,
    on_results: ResultHandler,
    pending: VecDeque<CorrelationId>,
}

impl<S: BatchSource> RoundTripReader<S> {
    pub fn new(source: S, registry: Arc<SinkRegistry>, on_results: ResultHandler) -> Self {
        Self {
            source,
            registry,
            on_results,
            pending: VecDeque::new(),
        }
    }

    /// Number of read batches not yet acknowledged
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[async_trait]
impl<S: BatchSource> Reader for RoundTripReader<S> {
    async fn connect(&mut self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn read(&mut self) -> Result<Batch, AdapterError> {
        let mut batch = self.source.next_batch().await?.ok_or(AdapterError::Closed)?;

        let id = CorrelationId::new();
        self.registry.open(id);
        batch.tag(id);
        self.pending.push_back(id);

        debug!("Tagged batch of {} parts with {}", batch.len(), id);
        Ok(batch)
    }

    async fn acknowledge(&mut self, err: Option<StreamError>) -> Result<(), AdapterError> {
        let Some(id) = self.pending.pop_front() else {
            if let Some(err) = err {
                warn!("Acknowledgment with no batch in flight: {}", err);
            }
            return Ok(());
        };

        // The sink is one-shot: once closed, late writes for this id fail
        // instead of leaking into the next batch.
        let outputs = match self.registry.close(&id) {
            Some(sink) => sink.get(),
            None => {
                warn!("Result sink for {} vanished before acknowledgment", id);
                Vec::new()
            }
        };

        debug!("Acknowledged {} with {} outputs", id, outputs.len());
        (self.on_results)(outputs, err);
        Ok(())
    }

    fn close_async(&mut self) {}

    async fn wait_for_close(&mut self, _timeout: Duration) -> Result<(), AdapterError> {
        Ok(())
    }
}
