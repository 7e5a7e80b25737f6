use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;

use crate::adapters::{AdapterError, SinkRegistry, SinkWriter, Writer};
use crate::config::OutputConfig;
use crate::message::Batch;

/// Output topology built from config
pub enum OutputLayer {
    Lab(SinkWriter),
    Drop,
    /// Writes every batch to all children concurrently
    Broker(Vec<OutputLayer>),
}

impl OutputLayer {
    /// Build the topology. The registry is the capability every lab output
    /// stores results through.
    pub fn build(config: &OutputConfig, registry: &Arc<SinkRegistry>) -> Self {
        match config {
            OutputConfig::Lab => Self::Lab(SinkWriter::new(registry.clone())),
            OutputConfig::Drop => Self::Drop,
            OutputConfig::Broker { outputs } => Self::Broker(
                outputs
                    .iter()
                    .map(|child| Self::build(child, registry))
                    .collect(),
            ),
        }
    }
}

fn first_error(results: Vec<Result<(), AdapterError>>) -> Result<(), AdapterError> {
    results.into_iter().collect()
}

#[async_trait]
impl Writer for OutputLayer {
    async fn connect(&self) -> Result<(), AdapterError> {
        match self {
            Self::Lab(writer) => writer.connect().await,
            Self::Drop => Ok(()),
            Self::Broker(children) => {
                first_error(join_all(children.iter().map(|c| c.connect())).await)
            }
        }
    }

    async fn write(&self, batch: Batch) -> Result<(), AdapterError> {
        match self {
            Self::Lab(writer) => writer.write(batch).await,
            Self::Drop => Ok(()),
            Self::Broker(children) => {
                let writes = children.iter().map(|c| c.write(batch.clone()));
                first_error(join_all(writes).await)
            }
        }
    }

    fn close_async(&self) {
        match self {
            Self::Lab(writer) => writer.close_async(),
            Self::Drop => {}
            Self::Broker(children) => children.iter().for_each(|c| c.close_async()),
        }
    }

    async fn wait_for_close(&self, timeout: Duration) -> Result<(), AdapterError> {
        match self {
            Self::Lab(writer) => writer.wait_for_close(timeout).await,
            Self::Drop => Ok(()),
            Self::Broker(children) => {
                first_error(join_all(children.iter().map(|c| c.wait_for_close(timeout))).await)
            }
        }
    }
}
