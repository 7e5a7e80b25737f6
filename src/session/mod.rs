//! Pipeline session management
//!
//! [`SessionManager`] owns the single active pipeline and the consumer feeds
//! broadcasts go through. [`Lab`] builds sessions from config text and is the
//! entry point callers use.

pub mod feed;
pub mod lab;
pub mod manager;

use std::time::Duration;

use thiserror::Error;

use crate::runtime::PipelineError;

pub use feed::{consumer_feed, ConsumerFeed, FeedReceiver};
pub use lab::{CompileReport, Lab, LabError, Notice, NoticeLevel};
pub use manager::SessionManager;

/// Deadline applied to every hand-off, acknowledgment and shutdown wait
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Timed out after {0:?} handing input to the pipeline")]
    Timeout(Duration),

    #[error("Consumer feed closed before taking its input")]
    FeedClosed,

    #[error("Pipeline generation {0} is no longer active, compile again")]
    NotActive(u64),

    #[error("Previous pipeline did not shut down cleanly: {0}")]
    Shutdown(#[from] PipelineError),
}
