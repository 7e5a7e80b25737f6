//! Consumer feeds
//!
//! A feed is a rendezvous between a broadcast and one inlet: a hand-off only
//! completes once the inlet has actually taken the batch, so a wedged stream
//! shows up as a hand-off timeout instead of a silently growing queue.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::SessionError;
use crate::adapters::{AdapterError, BatchSource};
use crate::message::Batch;

struct Handoff {
    batch: Batch,
    taken: oneshot::Sender<()>,
}

/// Broadcast side of a feed, owned by the session manager
pub struct ConsumerFeed {
    tx: mpsc::Sender<Handoff>,
}

/// Inlet side of a feed
pub struct FeedReceiver {
    rx: mpsc::Receiver<Handoff>,
}

/// Create a connected feed pair.
pub fn consumer_feed() -> (ConsumerFeed, FeedReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (ConsumerFeed { tx }, FeedReceiver { rx })
}

impl ConsumerFeed {
    /// Hand `batch` to the inlet and wait until it has been taken.
    pub async fn handoff(&self, batch: Batch, deadline: Duration) -> Result<(), SessionError> {
        let (taken_tx, taken_rx) = oneshot::channel();
        let handoff = Handoff {
            batch,
            taken: taken_tx,
        };

        let exchange = async {
            self.tx
                .send(handoff)
                .await
                .map_err(|_| SessionError::FeedClosed)?;
            taken_rx.await.map_err(|_| SessionError::FeedClosed)
        };

        tokio::time::timeout(deadline, exchange)
            .await
            .map_err(|_| SessionError::Timeout(deadline))?
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Signal the inlet that no more input will arrive.
    pub fn close(self) {}
}

#[async_trait]
impl BatchSource for FeedReceiver {
    async fn next_batch(&mut self) -> Result<Option<Batch>, AdapterError> {
        while let Some(handoff) = self.rx.recv().await {
            if handoff.taken.send(()).is_ok() {
                return Ok(Some(handoff.batch));
            }
            // The broadcaster gave up on this one already
            debug!("Dropping abandoned hand-off of {} parts", handoff.batch.len());
        }
        Ok(None)
    }
}
