use std::sync::{Arc, PoisonError, RwLock};

use dashmap::DashMap;

use crate::message::{Batch, CorrelationId, OutputUnit};

/// Mailbox holding the outputs produced for one input batch.
///
/// Every added batch is deep copied and has its correlation stripped, so it is
/// safe to add a batch whose ownership is about to be handed back to the
/// pipeline.
#[derive(Debug, Default)]
pub struct ResultSink {
    outputs: RwLock<Vec<OutputUnit>>,
}

impl ResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, batch: &Batch) {
        let captured = OutputUnit::capture(batch);
        self.outputs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(captured);
    }

    /// Snapshot of everything added so far, in call order
    pub fn get(&self) -> Vec<OutputUnit> {
        self.outputs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.outputs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Open sinks of one session, keyed by the correlation id carried in each
/// batch envelope.
#[derive(Debug, Default)]
pub struct SinkRegistry {
    sinks: DashMap<CorrelationId, Arc<ResultSink>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a fresh sink under `id`, replacing any sink already there
    pub fn open(&self, id: CorrelationId) -> Arc<ResultSink> {
        let sink = Arc::new(ResultSink::new());
        self.sinks.insert(id, sink.clone());
        sink
    }

    pub fn get(&self, id: &CorrelationId) -> Option<Arc<ResultSink>> {
        self.sinks.get(id).map(|entry| entry.value().clone())
    }

    /// Remove the sink. Later writes for `id` no longer find it.
    pub fn close(&self, id: &CorrelationId) -> Option<Arc<ResultSink>> {
        self.sinks.remove(id).map(|(_, sink)| sink)
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}
