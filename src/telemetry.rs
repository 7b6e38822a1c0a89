//! Widget-interaction batching.
//!
//! Interactions are buffered per module session and delivered when the queue
//! reaches [`MAX_BATCH_SIZE`] or after [`FLUSH_TIMEOUT`] without a new event.
//! Delivery is best effort: nothing is persisted, and events still queued
//! when the process dies are lost.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::config::TelemetryConfig;
use crate::error::ClientError;

pub const MAX_BATCH_SIZE: usize = 10;
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

const COMMAND_BUFFER: usize = 256;

/// One user action on a widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub widget_id: String,
    pub widget_type: String,
    pub action: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: Value,
}

impl InteractionRecord {
    pub fn new(
        widget_id: impl Into<String>,
        widget_type: impl Into<String>,
        action: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            widget_id: widget_id.into(),
            widget_type: widget_type.into(),
            action: action.into(),
            timestamp: Utc::now(),
            data,
        }
    }
}

/// Where flushed interactions go, one call per record.
#[async_trait]
pub trait InteractionSink: Send + Sync {
    async fn send_interaction(
        &self,
        session_id: &str,
        record: &InteractionRecord,
    ) -> Result<(), ClientError>;
}

#[derive(Debug, Clone, Copy)]
pub struct BatchSettings {
    pub max_batch_size: usize,
    pub flush_timeout: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_batch_size: MAX_BATCH_SIZE,
            flush_timeout: FLUSH_TIMEOUT,
        }
    }
}

impl From<&TelemetryConfig> for BatchSettings {
    fn from(config: &TelemetryConfig) -> Self {
        Self {
            max_batch_size: config.max_batch_size.max(1),
            flush_timeout: config.flush_timeout(),
        }
    }
}

enum Command {
    StartSession(String),
    EndSession(oneshot::Sender<usize>),
    Track(InteractionRecord),
    Flush(oneshot::Sender<usize>),
    Pending(oneshot::Sender<usize>),
    Shutdown(oneshot::Sender<usize>),
}

/// Handle to the batching task. Dropping every handle flushes what is
/// queued and stops the task.
#[derive(Clone)]
pub struct InteractionBatcher {
    tx: mpsc::Sender<Command>,
}

impl InteractionBatcher {
    /// Spawn the batching task on the current runtime.
    pub fn spawn(sink: Arc<dyn InteractionSink>, settings: BatchSettings) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let worker = BatchWorker {
            sink,
            settings,
            session_id: None,
            queue: Vec::new(),
            deadline: None,
        };
        let handle = tokio::spawn(worker.run(rx));
        (Self { tx }, handle)
    }

    /// Switch to another module session. Anything queued for the previous
    /// session is discarded, not sent.
    pub async fn start_session(&self, session_id: impl Into<String>) -> Result<(), ClientError> {
        self.command(Command::StartSession(session_id.into())).await
    }

    /// Flush the current session and detach from it. Returns the number of
    /// interactions delivered.
    pub async fn end_session(&self) -> Result<usize, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::EndSession(reply)).await?;
        rx.await.map_err(|_| ClientError::BatcherClosed)
    }

    pub async fn track(&self, record: InteractionRecord) -> Result<(), ClientError> {
        self.command(Command::Track(record)).await
    }

    /// Deliver everything queued now. Returns the number delivered.
    pub async fn flush(&self) -> Result<usize, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Flush(reply)).await?;
        rx.await.map_err(|_| ClientError::BatcherClosed)
    }

    /// Number of interactions waiting for the next flush.
    pub async fn pending(&self) -> Result<usize, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Pending(reply)).await?;
        rx.await.map_err(|_| ClientError::BatcherClosed)
    }

    /// Flush what is queued and stop the worker. Other handles get
    /// [`ClientError::BatcherClosed`] afterwards.
    pub async fn shutdown(self) -> Result<usize, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Shutdown(reply)).await?;
        rx.await.map_err(|_| ClientError::BatcherClosed)
    }

    async fn command(&self, cmd: Command) -> Result<(), ClientError> {
        self.tx.send(cmd).await.map_err(|_| ClientError::BatcherClosed)
    }
}

struct BatchWorker {
    sink: Arc<dyn InteractionSink>,
    settings: BatchSettings,
    session_id: Option<String>,
    queue: Vec<InteractionRecord>,
    deadline: Option<Instant>,
}

impl BatchWorker {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        loop {
            let cmd = match self.deadline {
                Some(deadline) => tokio::select! {
                    cmd = rx.recv() => cmd,
                    _ = sleep_until(deadline) => {
                        debug!(queued = self.queue.len(), "flush timeout elapsed");
                        self.flush().await;
                        continue;
                    }
                },
                None => rx.recv().await,
            };

            match cmd {
                Some(Command::StartSession(id)) => self.switch_session(id),
                Some(Command::EndSession(reply)) => {
                    let sent = self.flush().await;
                    self.session_id = None;
                    let _ = reply.send(sent);
                }
                Some(Command::Track(record)) => self.track(record).await,
                Some(Command::Flush(reply)) => {
                    let sent = self.flush().await;
                    let _ = reply.send(sent);
                }
                Some(Command::Pending(reply)) => {
                    let _ = reply.send(self.queue.len());
                }
                Some(Command::Shutdown(reply)) => {
                    let sent = self.flush().await;
                    let _ = reply.send(sent);
                    info!(sent, "interaction batcher shut down");
                    break;
                }
                None => {
                    self.flush().await;
                    info!("interaction batcher stopped");
                    break;
                }
            }
        }
    }

    fn switch_session(&mut self, id: String) {
        if self.session_id.as_deref() == Some(id.as_str()) {
            return;
        }
        if !self.queue.is_empty() {
            debug!(
                previous = ?self.session_id,
                dropped = self.queue.len(),
                "discarding interactions of previous session"
            );
        }
        self.queue.clear();
        self.deadline = None;
        info!(session_id = %id, "tracking interactions");
        self.session_id = Some(id);
    }

    async fn track(&mut self, record: InteractionRecord) {
        if self.session_id.is_none() {
            warn!(widget_id = %record.widget_id, "no active session, interaction dropped");
            return;
        }
        self.queue.push(record);
        if self.queue.len() >= self.settings.max_batch_size {
            self.flush().await;
        } else {
            self.deadline = Some(Instant::now() + self.settings.flush_timeout);
        }
    }

    async fn flush(&mut self) -> usize {
        self.deadline = None;
        let batch = std::mem::take(&mut self.queue);
        let Some(session_id) = self.session_id.clone() else {
            return 0;
        };
        if batch.is_empty() {
            return 0;
        }

        let mut sent = 0;
        for record in &batch {
            match self.sink.send_interaction(&session_id, record).await {
                Ok(()) => sent += 1,
                Err(e) => warn!(
                    session_id = %session_id,
                    widget_id = %record.widget_id,
                    error = %e,
                    "failed to deliver interaction"
                ),
            }
        }
        debug!(session_id = %session_id, sent, total = batch.len(), "interaction batch flushed");
        sent
    }
}
