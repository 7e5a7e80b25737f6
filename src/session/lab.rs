use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{consumer_feed, SessionError, SessionManager, DEFAULT_DEADLINE};
use crate::adapters::{AdapterError, ResultHandler, RoundTripReader, SinkRegistry, Writer};
use crate::config::{lint_config, parse_config, ConfigError};
use crate::message::{Batch, OutputUnit};
use crate::runtime::{
    build_processors, spawn_stream, OutputLayer, Processor, ResourceError, ResourceManager,
    RunningPipeline, StreamError,
};

#[derive(Error, Debug)]
pub enum LabError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Resource error: {0}")]
    Resources(#[from] ResourceError),

    #[error("Output error: {0}")]
    Output(#[from] AdapterError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("No pipeline has been compiled")]
    NotCompiled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Lint,
    Error,
}

impl fmt::Display for NoticeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Lint => write!(f, "lint"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// User-facing message about the lab's state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompileReport {
    pub generation: u64,
    pub feeds: usize,
    pub processors: usize,
    pub lints: Vec<String>,
}

/// Compiles pipelines from config text and runs input through them.
///
/// Results are delivered to the handler given at construction, once per
/// input unit per feed. Everything else the caller should know about
/// arrives on the notice channel.
pub struct Lab {
    session: Arc<SessionManager>,
    on_results: ResultHandler,
    notices: mpsc::UnboundedSender<Notice>,
    compiling: Mutex<()>,
}

impl Lab {
    pub fn new(on_results: ResultHandler) -> (Self, mpsc::UnboundedReceiver<Notice>) {
        Self::with_deadline(on_results, DEFAULT_DEADLINE)
    }

    pub fn with_deadline(
        on_results: ResultHandler,
        deadline: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (notices, rx) = mpsc::unbounded_channel();
        let lab = Self {
            session: Arc::new(SessionManager::new(deadline)),
            on_results,
            notices,
            compiling: Mutex::new(()),
        };
        (lab, rx)
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Drain the current session and install one built from `text`.
    ///
    /// The previous session is always drained first, so a failed compile
    /// leaves no pipeline running.
    pub async fn compile(&self, text: &str) -> Result<CompileReport, LabError> {
        let _guard = self.compiling.lock().await;

        if let Err(e) = self.session.clear().await {
            notify(&self.notices, NoticeLevel::Error, e.to_string());
        }

        match self.install(text).await {
            Ok(report) => {
                for lint in &report.lints {
                    notify(&self.notices, NoticeLevel::Lint, lint.clone());
                }
                notify(
                    &self.notices,
                    NoticeLevel::Info,
                    format!(
                        "Pipeline compiled: {} processors across {} feeds",
                        report.processors, report.feeds
                    ),
                );
                Ok(report)
            }
            Err(e) => {
                warn!("Compile failed, no pipeline is active: {}", e);
                notify(
                    &self.notices,
                    NoticeLevel::Error,
                    format!("{}. No pipeline is active.", e),
                );
                Err(e)
            }
        }
    }

    async fn install(&self, text: &str) -> Result<CompileReport, LabError> {
        let config = parse_config(text)?;
        let lints = lint_config(text)?;

        let resources = ResourceManager::new(&config.resources)?;
        let processors: Arc<[Arc<dyn Processor>]> =
            match build_processors(&config.pipeline.processors, &resources) {
                Ok(processors) => processors.into(),
                Err(e) => {
                    resources.close_async();
                    return Err(e.into());
                }
            };

        let registry = Arc::new(SinkRegistry::new());
        let output: Arc<dyn Writer> = Arc::new(OutputLayer::build(&config.output, &registry));
        if let Err(e) = output.connect().await {
            resources.close_async();
            return Err(e.into());
        }

        // Compiles are serialised, so the next install gets this generation
        let generation = self.session.generation().await + 1;
        let deadline = self.session.deadline();

        let mut streams = Vec::with_capacity(config.input.feeds);
        for index in 0..config.input.feeds {
            let (feed, receiver) = consumer_feed();
            let handler = self.result_handler(generation);
            let reader = RoundTripReader::new(receiver, registry.clone(), handler);
            streams.push(spawn_stream(
                format!("feed-{}", index),
                Box::new(reader),
                processors.clone(),
                output.clone(),
                deadline,
            ));
            self.session.register(feed).await;
        }

        let pipeline = RunningPipeline::new(streams, output);
        let installed = self.session.set(Box::new(pipeline), resources).await;
        debug_assert_eq!(installed, generation);

        info!(
            "Compiled pipeline generation {} ({} feeds, {} processors)",
            installed,
            config.input.feeds,
            processors.len()
        );
        Ok(CompileReport {
            generation: installed,
            feeds: config.input.feeds,
            processors: processors.len(),
            lints,
        })
    }

    /// Wraps the caller's handler so an acknowledgment timeout drains the
    /// session it happened in.
    fn result_handler(&self, generation: u64) -> ResultHandler {
        let on_results = self.on_results.clone();
        let notices = self.notices.clone();
        let session: Weak<SessionManager> = Arc::downgrade(&self.session);

        Arc::new(move |outputs: Vec<OutputUnit>, err: Option<StreamError>| {
            if let Some(StreamError::Timeout(after)) = &err {
                notify(
                    &notices,
                    NoticeLevel::Error,
                    format!("Processing timed out after {:?}, draining pipeline", after),
                );
                if let Some(session) = session.upgrade() {
                    tokio::spawn(drain_generation(session, generation, notices.clone()));
                }
            }
            on_results(outputs, err);
        })
    }

    /// Broadcast `units` to every feed in the background.
    ///
    /// Returns as soon as the broadcast has started; outputs arrive through
    /// the result handler and failures as notices.
    pub async fn execute(&self, units: Vec<Batch>) -> Result<JoinHandle<()>, LabError> {
        let Some(generation) = self.session.active_generation().await else {
            return Err(LabError::NotCompiled);
        };

        let session = self.session.clone();
        let notices = self.notices.clone();
        Ok(tokio::spawn(async move {
            match session.send_to_generation(generation, &units).await {
                Ok(sent) => debug!("Execution handed off {} units", sent),
                Err(e) => {
                    notify(&notices, NoticeLevel::Error, format!("Execution failed: {}", e));
                    if matches!(e, SessionError::Timeout(_)) {
                        drain_generation(session, generation, notices).await;
                    }
                }
            }
        }))
    }

    /// Drain the active session, if any.
    pub async fn shutdown(&self) -> Result<(), LabError> {
        let _guard = self.compiling.lock().await;
        self.session.clear().await?;
        Ok(())
    }
}

async fn drain_generation(
    session: Arc<SessionManager>,
    generation: u64,
    notices: mpsc::UnboundedSender<Notice>,
) {
    match session.clear_generation(generation).await {
        Ok(true) => notify(
            &notices,
            NoticeLevel::Info,
            "Pipeline drained after timeout, compile again to continue".to_string(),
        ),
        Ok(false) => {}
        Err(e) => notify(&notices, NoticeLevel::Error, e.to_string()),
    }
}

fn notify(notices: &mpsc::UnboundedSender<Notice>, level: NoticeLevel, message: String) {
    if level == NoticeLevel::Error {
        error!("{}", message);
    }
    if notices.send(Notice { level, message }).is_err() {
        debug!("Notice receiver dropped");
    }
}
