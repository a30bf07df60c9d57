pub mod exit_codes;

use crate::backend::{BackendInvocation, BackendLocator, BackendNotFoundError};
use crate::events::{AppEvent, EventBus, LogLevel, LogSource};
use crate::services::validation_service::{ValidationError, ValidationService};
use crate::state::ConversionJob;
use exit_codes::{ExitClass, ExitCodeTable};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::Instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnFailure {
    NotFound,
    Launch,
}

impl fmt::Display for SpawnFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnFailure::NotFound => write!(f, "not found"),
            SpawnFailure::Launch => write!(f, "launch failed"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("A conversion is already running")]
    AlreadyRunning,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    BackendNotFound(#[from] BackendNotFoundError),
    #[error("Failed to start backend {command} ({kind}): {message}")]
    Spawn {
        kind: SpawnFailure,
        command: String,
        message: String,
    },
    #[error("{message}")]
    Process {
        code: Option<i32>,
        class: ExitClass,
        message: String,
    },
}

impl ConversionError {
    pub fn user_message(&self) -> String {
        match self {
            Self::AlreadyRunning => {
                "A conversion is already in progress. Wait for it to finish.".to_string()
            }
            Self::Validation(err) => err.user_message(),
            Self::BackendNotFound(_) => {
                "The conversion backend is not installed. Reinstall the application.".to_string()
            }
            Self::Spawn {
                kind: SpawnFailure::NotFound,
                command,
                ..
            } => format!("Conversion backend not found: {}", command),
            Self::Spawn { message, .. } => {
                format!("The conversion backend could not be started: {}", message)
            }
            Self::Process { message, .. } => message.clone(),
        }
    }

    /// Raised after the job reached `running`.
    pub fn is_job_failure(&self) -> bool {
        matches!(self, Self::Spawn { .. } | Self::Process { .. })
    }
}

/// Resets the in-flight flag when the run ends, however it ends.
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(Self { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Runs one backend process per conversion and reports it on the event bus.
///
/// At most one job is in flight; a second [`JobSupervisor::run`] is rejected with
/// [`ConversionError::AlreadyRunning`]. For a given job, `running` is published before any log
/// line and every log line before the terminal `completed`/`failed` state.
pub struct JobSupervisor {
    locator: Arc<dyn BackendLocator>,
    validation: ValidationService,
    exit_codes: ExitCodeTable,
    bus: Arc<EventBus>,
    in_flight: AtomicBool,
}

impl JobSupervisor {
    pub fn new(locator: Arc<dyn BackendLocator>, bus: Arc<EventBus>) -> Self {
        Self {
            locator,
            validation: ValidationService::new(),
            exit_codes: ExitCodeTable::default(),
            bus,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn with_exit_codes(mut self, exit_codes: ExitCodeTable) -> Self {
        self.exit_codes = exit_codes;
        self
    }

    pub fn exit_codes(&self) -> &ExitCodeTable {
        &self.exit_codes
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn output_path_for(&self, input_path: &Path) -> Result<PathBuf, ValidationError> {
        self.validation.derive_output_path(input_path)
    }

    pub async fn run(&self, input_path: &Path) -> Result<PathBuf, ConversionError> {
        let result = match InFlightGuard::try_acquire(&self.in_flight) {
            Some(_guard) => self.run_exclusive(input_path).await,
            None => Err(ConversionError::AlreadyRunning),
        };

        // Failures after `running` were already logged ahead of the job's terminal state
        if let Err(err) = &result {
            if !err.is_job_failure() {
                self.bus
                    .log(LogLevel::Error, LogSource::Backend, &err.user_message());
            }
        }
        result
    }

    async fn run_exclusive(&self, input_path: &Path) -> Result<PathBuf, ConversionError> {
        let output_path = self.validation.derive_output_path(input_path).map_err(|e| {
            tracing::warn!("Rejected {}: {}", input_path.display(), e);
            e
        })?;

        let invocation = self.locator.locate().map_err(|e| {
            tracing::error!("{} (searched: {:?})", e, e.searched);
            e
        })?;

        let mut job = ConversionJob::new(input_path.to_path_buf(), output_path);
        let span = tracing::info_span!("conversion", job_id = %job.id);
        self.supervise(&mut job, &invocation).instrument(span).await
    }

    async fn supervise(
        &self,
        job: &mut ConversionJob,
        invocation: &BackendInvocation,
    ) -> Result<PathBuf, ConversionError> {
        job.transition_to_running();
        self.publish_state(job);
        tracing::info!(
            "Starting conversion: {} -> {} via {}",
            job.input_path.display(),
            job.output_path.display(),
            invocation
        );

        let mut command = Command::new(&invocation.command);
        command
            .args(&invocation.args)
            .arg(&job.input_path)
            .arg(&job.output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(windows)]
        {
            // CREATE_NO_WINDOW
            command.creation_flags(0x0800_0000);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let kind = if e.kind() == std::io::ErrorKind::NotFound {
                    SpawnFailure::NotFound
                } else {
                    SpawnFailure::Launch
                };
                let err = ConversionError::Spawn {
                    kind,
                    command: invocation.command.display().to_string(),
                    message: e.to_string(),
                };
                self.fail(job, &err);
                return Err(err);
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (_, _, status) = tokio::join!(
            self.pump(stdout, LogLevel::Info),
            self.pump(stderr, LogLevel::Error),
            child.wait()
        );

        match status {
            Ok(status) if status.success() => {
                job.transition_to_completed();
                self.publish_state(job);
                tracing::info!("Conversion completed: {}", job.output_path.display());
                Ok(job.output_path.clone())
            }
            Ok(status) => {
                let err = self.process_error(status);
                self.fail(job, &err);
                Err(err)
            }
            Err(e) => {
                let err = ConversionError::Process {
                    code: None,
                    class: ExitClass::Terminated,
                    message: format!("Failed to wait for the conversion backend: {}", e),
                };
                self.fail(job, &err);
                Err(err)
            }
        }
    }

    fn process_error(&self, status: ExitStatus) -> ConversionError {
        let classification = self.exit_codes.classify(status.code());
        ConversionError::Process {
            code: status.code(),
            class: classification.class,
            message: classification.message,
        }
    }

    /// Forwards newline-delimited output until the stream closes.
    async fn pump<R>(&self, stream: Option<R>, level: LogLevel)
    where
        R: AsyncRead + Unpin,
    {
        let Some(stream) = stream else {
            return;
        };

        let mut segments = BufReader::new(stream).split(b'\n');
        loop {
            match segments.next_segment().await {
                Ok(Some(bytes)) => self.emit_backend_line(level, &String::from_utf8_lossy(&bytes)),
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Failed to read backend output: {}", e);
                    break;
                }
            }
        }
    }

    fn emit_backend_line(&self, level: LogLevel, raw: &str) {
        let line = raw.trim();
        if line.is_empty() {
            return;
        }
        match level {
            LogLevel::Info => tracing::info!(target: "backend", "{}", line),
            LogLevel::Error => tracing::warn!(target: "backend", "{}", line),
        }
        self.bus.log(level, LogSource::Backend, line);
    }

    fn fail(&self, job: &mut ConversionJob, err: &ConversionError) {
        let message = err.user_message();
        self.bus.log(LogLevel::Error, LogSource::Backend, &message);
        job.transition_to_failed(message);
        self.publish_state(job);
        tracing::error!("Conversion {} failed: {}", job.id, err);
    }

    fn publish_state(&self, job: &ConversionJob) {
        self.bus.publish(AppEvent::ProcessingState(job.snapshot()));
    }
}
