use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{AdapterError, SinkRegistry, Writer};
use crate::message::Batch;

/// Writer that stores each batch in the result sink named by the correlation
/// of its first part.
#[derive(Clone)]
pub struct SinkWriter {
    registry: Arc<SinkRegistry>,
}

impl SinkWriter {
    pub fn new(registry: Arc<SinkRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Writer for SinkWriter {
    async fn connect(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn write(&self, batch: Batch) -> Result<(), AdapterError> {
        let id = batch.correlation().ok_or(AdapterError::SinkNotFound)?;
        let sink = self.registry.get(&id).ok_or(AdapterError::SinkNotFound)?;
        sink.add(&batch);
        debug!("Stored {} parts for {}", batch.len(), id);
        Ok(())
    }

    fn close_async(&self) {}

    async fn wait_for_close(&self, _timeout: Duration) -> Result<(), AdapterError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CorrelationId, Part};

    #[tokio::test]
    async fn test_write_to_sink() {
        let registry = Arc::new(SinkRegistry::new());
        let id = CorrelationId::new();
        let sink = registry.open(id);
        let writer = SinkWriter::new(registry);

        writer.connect().await.unwrap();

        let mut batch = Batch::from_payloads(["foo", "bar"]);
        batch.tag(id);
        writer.write(batch).await.unwrap();

        let outputs = sink.get();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].to_strings(), vec!["foo", "bar"]);
        assert!(outputs[0].batch.correlation().is_none());

        writer.close_async();
        writer.wait_for_close(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_untagged() {
        let registry = Arc::new(SinkRegistry::new());
        let id = CorrelationId::new();
        let sink = registry.open(id);
        let writer = SinkWriter::new(registry);

        let err = writer.write(Batch::from_payloads(["foo"])).await.unwrap_err();
        assert_eq!(err, AdapterError::SinkNotFound);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_write_empty_batch() {
        let writer = SinkWriter::new(Arc::new(SinkRegistry::new()));
        let err = writer.write(Batch::default()).await.unwrap_err();
        assert_eq!(err, AdapterError::SinkNotFound);
    }

    #[tokio::test]
    async fn test_write_closed_sink() {
        let registry = Arc::new(SinkRegistry::new());
        let id = CorrelationId::new();
        let sink = registry.open(id);
        registry.close(&id);
        let writer = SinkWriter::new(registry);

        let mut part = Part::new("late");
        part.set_correlation(Some(id));
        let err = writer.write(Batch::new(vec![part])).await.unwrap_err();

        assert_eq!(err, AdapterError::SinkNotFound);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_fan_out_writes_accumulate() {
        let registry = Arc::new(SinkRegistry::new());
        let id = CorrelationId::new();
        let sink = registry.open(id);
        let left = SinkWriter::new(registry.clone());
        let right = SinkWriter::new(registry);

        let mut batch = Batch::from_payloads(["x"]);
        batch.tag(id);
        left.write(batch.clone()).await.unwrap();
        right.write(batch).await.unwrap();

        assert_eq!(sink.len(), 2);
    }
}
