use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    Backend,
    Ui,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEvent {
    pub level: LogLevel,
    pub message: String,
    pub source: LogSource,
}

impl LogEvent {
    /// Trims `raw`; whitespace-only input yields no event.
    pub fn new(level: LogLevel, source: LogSource, raw: &str) -> Option<Self> {
        let message = raw.trim();
        if message.is_empty() {
            return None;
        }
        Some(Self {
            level,
            message: message.to_string(),
            source,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStateEvent {
    pub job_id: Uuid,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateEventKind {
    Available,
    NotAvailable,
    Error,
    Progress,
    Downloaded,
    /// The user turned down the pending offer or download.
    Dismissed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateEvent {
    #[serde(rename = "type")]
    pub kind: UpdateEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UpdateEvent {
    pub fn new(kind: UpdateEventKind) -> Self {
        Self {
            kind,
            version: None,
            progress: None,
            error: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_progress(mut self, progress: f32) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum AppEvent {
    LogMessage(LogEvent),
    ProcessingState(ProcessingStateEvent),
    UpdateEvent(UpdateEvent),
}

/// The UI surface currently receiving events.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: AppEvent);
}

impl EventSink for tokio::sync::mpsc::UnboundedSender<AppEvent> {
    fn deliver(&self, event: AppEvent) {
        // A closed receiver means the surface went away; the event is advisory.
        let _ = self.send(event);
    }
}

pub type EventSender = tokio::sync::mpsc::UnboundedSender<AppEvent>;
pub type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<AppEvent>;

pub fn create_event_channel() -> (EventSender, EventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}

/// Best-effort delivery to at most one attached sink. Nothing is queued while detached.
#[derive(Default)]
pub struct EventBus {
    sink: RwLock<Option<Arc<dyn EventSink>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `sink`, returning the one it replaced.
    pub fn attach(&self, sink: Arc<dyn EventSink>) -> Option<Arc<dyn EventSink>> {
        match self.sink.write() {
            Ok(mut guard) => guard.replace(sink),
            Err(poisoned) => poisoned.into_inner().replace(sink),
        }
    }

    pub fn detach(&self) -> Option<Arc<dyn EventSink>> {
        match self.sink.write() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.sink.read().map(|guard| guard.is_some()).unwrap_or(false)
    }

    pub fn publish(&self, event: AppEvent) {
        let sink = match self.sink.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        match sink {
            Some(sink) => sink.deliver(event),
            None => tracing::trace!("No event sink attached, dropping {:?}", event),
        }
    }

    pub fn log(&self, level: LogLevel, source: LogSource, raw: &str) {
        if let Some(event) = LogEvent::new(level, source, raw) {
            self.publish(AppEvent::LogMessage(event));
        }
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, LogSource::Ui, message);
    }
}
