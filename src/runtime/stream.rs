//! Stream engine
//!
//! Each stream owns one reader and drives it in a background task: read a
//! batch, run it through the processors, write every resulting batch to the
//! shared output, then acknowledge. Processing of a single batch is bounded
//! by a deadline so a wedged stage surfaces as a timeout instead of a hang.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::adapters::{AdapterError, Reader, Writer};
use crate::message::Batch;
use crate::runtime::processor::{run_processors, Processor, ProcessorError};

const READ_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Why a batch failed, as reported to its acknowledgment
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    #[error("Processor error: {0}")]
    Processor(#[from] ProcessorError),

    #[error("Output error: {0}")]
    Output(#[from] AdapterError),

    #[error("Processing timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Pipeline failed to stop within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("Stream '{0}' crashed: {1}")]
    StreamFailed(String, String),
}

/// A running pipeline instance that can be stopped
#[async_trait]
pub trait Pipeline: Send + Sync {
    /// Ask the pipeline to stop without waiting
    fn close_async(&self);

    /// Wait for the pipeline to stop. On timeout it is torn down anyway.
    async fn wait_for_close(&self, timeout: Duration) -> Result<(), PipelineError>;
}

/// Handle to one spawned stream task
pub struct StreamHandle {
    name: String,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn close_async(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub async fn wait_for_close(&self, timeout: Duration) -> Result<(), PipelineError> {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut task) = task else {
            return Ok(());
        };

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!("Stream '{}' task failed: {}", self.name, e);
                Err(PipelineError::StreamFailed(self.name.clone(), e.to_string()))
            }
            Err(_) => {
                warn!("Stream '{}' did not stop within {:?}, aborting", self.name, timeout);
                task.abort();
                Err(PipelineError::ShutdownTimeout(timeout))
            }
        }
    }
}

/// Spawn a stream task reading from `reader`.
pub fn spawn_stream(
    name: impl Into<String>,
    reader: Box<dyn Reader>,
    processors: Arc<[Arc<dyn Processor>]>,
    output: Arc<dyn Writer>,
    unit_timeout: Duration,
) -> StreamHandle {
    let name = name.into();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(run_stream(
        name.clone(),
        reader,
        processors,
        output,
        unit_timeout,
        shutdown_rx,
    ));
    StreamHandle {
        name,
        shutdown_tx,
        task: Mutex::new(Some(task)),
    }
}

async fn run_stream(
    name: String,
    mut reader: Box<dyn Reader>,
    processors: Arc<[Arc<dyn Processor>]>,
    output: Arc<dyn Writer>,
    unit_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Err(e) = reader.connect().await {
        error!("Stream '{}' failed to connect: {}", name, e);
        return;
    }
    debug!("Stream '{}' running", name);

    loop {
        let read = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            read = reader.read() => read,
        };

        let batch = match read {
            Ok(batch) => batch,
            Err(AdapterError::Closed) => {
                debug!("Stream '{}' source closed", name);
                break;
            }
            Err(e) => {
                warn!("Stream '{}' read failed: {}", name, e);
                tokio::time::sleep(READ_ERROR_BACKOFF).await;
                continue;
            }
        };

        let delivery = deliver(&processors, output.as_ref(), batch);
        let err = match tokio::time::timeout(unit_timeout, delivery).await {
            Ok(result) => result.err(),
            Err(_) => {
                error!("Stream '{}' batch timed out after {:?}", name, unit_timeout);
                Some(StreamError::Timeout(unit_timeout))
            }
        };

        if let Err(e) = reader.acknowledge(err).await {
            warn!("Stream '{}' acknowledgment failed: {}", name, e);
        }
    }

    reader.close_async();
    if let Err(e) = reader.wait_for_close(unit_timeout).await {
        warn!("Stream '{}' reader failed to close: {}", name, e);
    }
    info!("Stream '{}' stopped", name);
}

/// Process one batch and write everything it produces. Every produced batch
/// is attempted; the first failure is returned.
async fn deliver(
    processors: &[Arc<dyn Processor>],
    output: &dyn Writer,
    batch: Batch,
) -> Result<(), StreamError> {
    let batches = run_processors(processors, batch).await?;

    let mut first_err = None;
    for batch in batches {
        if let Err(e) = output.write(batch).await {
            warn!("Output write failed: {}", e);
            first_err.get_or_insert(e);
        }
    }

    match first_err {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// All streams of one compiled session plus their shared output
pub struct RunningPipeline {
    streams: Vec<StreamHandle>,
    output: Arc<dyn Writer>,
}

impl RunningPipeline {
    pub fn new(streams: Vec<StreamHandle>, output: Arc<dyn Writer>) -> Self {
        Self { streams, output }
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }
}

#[async_trait]
impl Pipeline for RunningPipeline {
    fn close_async(&self) {
        for stream in &self.streams {
            stream.close_async();
        }
        self.output.close_async();
    }

    async fn wait_for_close(&self, timeout: Duration) -> Result<(), PipelineError> {
        let deadline = Instant::now() + timeout;
        let mut result = Ok(());

        // Every stream is waited on; the first failure is the one reported
        for stream in &self.streams {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let closed = stream.wait_for_close(remaining).await;
            if result.is_ok() {
                result = closed.map_err(|e| match e {
                    PipelineError::ShutdownTimeout(_) => PipelineError::ShutdownTimeout(timeout),
                    other => other,
                });
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if let Err(e) = self.output.wait_for_close(remaining).await {
            warn!("Output failed to close: {}", e);
        }
        result
    }
}
