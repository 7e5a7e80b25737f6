use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::{ConsumerFeed, SessionError, DEFAULT_DEADLINE};
use crate::message::Batch;
use crate::runtime::{Pipeline, ResourceManager};

struct ActiveSession {
    pipeline: Box<dyn Pipeline>,
    resources: Arc<ResourceManager>,
}

#[derive(Default)]
struct SessionState {
    active: Option<ActiveSession>,
    feeds: Vec<ConsumerFeed>,
    generation: u64,
}

/// Owner of the active pipeline session.
///
/// Every transition takes the one lock: broadcasts hold it shared for their
/// whole duration, so installing or draining a session is atomic with respect
/// to them.
pub struct SessionManager {
    state: RwLock<SessionState>,
    deadline: Duration,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(DEFAULT_DEADLINE)
    }
}

impl SessionManager {
    pub fn new(deadline: Duration) -> Self {
        Self {
            state: RwLock::new(SessionState::default()),
            deadline,
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Add a feed to receive broadcasts. Feeds may be registered before a
    /// pipeline is installed.
    pub async fn register(&self, feed: ConsumerFeed) {
        let mut state = self.state.write().await;
        state.feeds.push(feed);
        debug!("Registered consumer feed ({} total)", state.feeds.len());
    }

    /// Hand every nonempty unit to every feed, in order.
    ///
    /// Stops at the first hand-off that fails; units and feeds after it are
    /// not attempted. Returns the number of completed hand-offs.
    pub async fn send_all(&self, units: &[Batch]) -> Result<usize, SessionError> {
        let state = self.state.read().await;
        self.broadcast(&state, units).await
    }

    /// Like [`send_all`](Self::send_all), but only while `generation` is the
    /// active session. The check and the broadcast happen under one lock, so
    /// a drain cannot slip in between them.
    pub async fn send_to_generation(
        &self,
        generation: u64,
        units: &[Batch],
    ) -> Result<usize, SessionError> {
        let state = self.state.read().await;
        if state.active.is_none() || state.generation != generation {
            return Err(SessionError::NotActive(generation));
        }
        self.broadcast(&state, units).await
    }

    async fn broadcast(
        &self,
        state: &SessionState,
        units: &[Batch],
    ) -> Result<usize, SessionError> {
        let mut sent = 0;

        for (index, unit) in units.iter().enumerate().filter(|(_, u)| !u.is_empty()) {
            for (feed_index, feed) in state.feeds.iter().enumerate() {
                if let Err(e) = feed.handoff(unit.clone(), self.deadline).await {
                    error!(
                        "Broadcast of unit {} to feed {} failed after {} hand-offs: {}",
                        index, feed_index, sent, e
                    );
                    return Err(e);
                }
                sent += 1;
            }
        }

        debug!("Broadcast {} hand-offs to {} feeds", sent, state.feeds.len());
        Ok(sent)
    }

    /// Install a pipeline as the active session and return its generation.
    ///
    /// Any previous session must have been drained with [`clear`](Self::clear)
    /// first; one left in place is dropped without being stopped.
    pub async fn set(&self, pipeline: Box<dyn Pipeline>, resources: Arc<ResourceManager>) -> u64 {
        let mut state = self.state.write().await;
        if state.active.is_some() {
            warn!("Installing a pipeline over one that was never drained");
        }
        state.generation += 1;
        state.active = Some(ActiveSession {
            pipeline,
            resources,
        });
        info!(
            "Installed pipeline generation {} with {} feeds",
            state.generation,
            state.feeds.len()
        );
        state.generation
    }

    /// Drain the session: close every feed, stop the pipeline and release its
    /// resources. A pipeline that does not stop in time is reported but torn
    /// down regardless. Calling this with nothing active is a no-op.
    pub async fn clear(&self) -> Result<(), SessionError> {
        let mut state = self.state.write().await;
        self.drain(&mut state).await
    }

    /// Drain only if `generation` is still the active session. Returns whether
    /// a drain happened.
    pub async fn clear_generation(&self, generation: u64) -> Result<bool, SessionError> {
        let mut state = self.state.write().await;
        if state.active.is_none() || state.generation != generation {
            debug!("Skipping drain of stale generation {}", generation);
            return Ok(false);
        }
        self.drain(&mut state).await.map(|_| true)
    }

    pub async fn is_active(&self) -> bool {
        self.state.read().await.active.is_some()
    }

    pub async fn generation(&self) -> u64 {
        self.state.read().await.generation
    }

    /// Generation of the active session, if one is installed
    pub async fn active_generation(&self) -> Option<u64> {
        let state = self.state.read().await;
        state.active.as_ref().map(|_| state.generation)
    }

    pub async fn feed_count(&self) -> usize {
        self.state.read().await.feeds.len()
    }

    async fn drain(&self, state: &mut SessionState) -> Result<(), SessionError> {
        let feeds = state.feeds.len();
        for feed in state.feeds.drain(..) {
            feed.close();
        }

        let Some(active) = state.active.take() else {
            if feeds > 0 {
                debug!("Closed {} feeds with no active pipeline", feeds);
            }
            return Ok(());
        };

        active.pipeline.close_async();
        let result = active.pipeline.wait_for_close(self.deadline).await;
        active.resources.close_async();

        match result {
            Ok(()) => {
                info!("Drained pipeline generation {}", state.generation);
                Ok(())
            }
            Err(e) => {
                error!("Pipeline generation {} torn down: {}", state.generation, e);
                Err(e.into())
            }
        }
    }
}
