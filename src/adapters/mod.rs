//! Pipeline-facing adapters
//!
//! The inlet tags each batch it reads with a correlation id and opens a result
//! sink for it; the outlet resolves that sink from the batch it is asked to
//! write. Both sides share one [`SinkRegistry`] per compiled session.

pub mod func_source;
pub mod inlet;
pub mod outlet;
pub mod result_sink;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::Batch;
use crate::runtime::StreamError;

pub use func_source::FuncSource;
pub use inlet::{ResultHandler, RoundTripReader};
pub use outlet::SinkWriter;
pub use result_sink::{ResultSink, SinkRegistry};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdapterError {
    /// The source has no more batches. Expected during shutdown.
    #[error("Source closed")]
    Closed,

    #[error("Result sink not found within batch envelope")]
    SinkNotFound,

    #[error("Source error: {0}")]
    Source(String),
}

/// Where an inlet pulls its batches from
#[async_trait]
pub trait BatchSource: Send {
    /// Next batch, or `None` once the source is exhausted
    async fn next_batch(&mut self) -> Result<Option<Batch>, AdapterError>;
}

/// Ingestion contract a stream drives
#[async_trait]
pub trait Reader: Send {
    async fn connect(&mut self) -> Result<(), AdapterError>;

    async fn read(&mut self) -> Result<Batch, AdapterError>;

    /// Called once the most recently read batch has fully completed
    async fn acknowledge(&mut self, err: Option<StreamError>) -> Result<(), AdapterError>;

    fn close_async(&mut self);

    async fn wait_for_close(&mut self, timeout: Duration) -> Result<(), AdapterError>;
}

/// Terminal stage contract
#[async_trait]
pub trait Writer: Send + Sync {
    async fn connect(&self) -> Result<(), AdapterError>;

    async fn write(&self, batch: Batch) -> Result<(), AdapterError>;

    fn close_async(&self);

    async fn wait_for_close(&self, timeout: Duration) -> Result<(), AdapterError>;
}
