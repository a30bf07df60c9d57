use crate::constants::MAX_LOG_LINES;
use crate::events::{
    AppEvent, JobStatus, LogEvent, LogLevel, ProcessingStateEvent, UpdateEvent, UpdateEventKind,
};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One request to convert one input file. Status only moves forward:
/// idle → running → completed | failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionJob {
    pub id: Uuid,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    status: JobStatus,
    error: Option<String>,
}

impl ConversionJob {
    pub fn new(input_path: PathBuf, output_path: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            input_path,
            output_path,
            status: JobStatus::Idle,
            error: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn transition_to_running(&mut self) -> bool {
        if self.status != JobStatus::Idle {
            return false;
        }
        self.status = JobStatus::Running;
        true
    }

    pub fn transition_to_completed(&mut self) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        self.status = JobStatus::Completed;
        true
    }

    pub fn transition_to_failed(&mut self, error: String) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        self.status = JobStatus::Failed;
        self.error = Some(error);
        true
    }

    pub fn snapshot(&self) -> ProcessingStateEvent {
        ProcessingStateEvent {
            job_id: self.id,
            status: self.status,
            input: Some(self.input_path.clone()),
            output: match self.status {
                JobStatus::Failed => None,
                _ => Some(self.output_path.clone()),
            },
            error: self.error.clone(),
        }
    }
}

/// Everything the window renders, rebuilt from bus events.
#[derive(Debug, Clone, Default)]
pub struct ShellState {
    pub selected_file: Option<PathBuf>,
    pub job: Option<ProcessingStateEvent>,
    pub logs: VecDeque<LogEvent>,
    pub update_notice: Option<String>,
    pub update_progress: Option<f32>,
}

impl ShellState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select_file(&mut self, path: PathBuf) {
        self.selected_file = Some(path);
        self.job = None;
    }

    pub fn apply(&mut self, event: AppEvent) {
        match event {
            AppEvent::LogMessage(log) => self.push_log(log),
            AppEvent::ProcessingState(state) => self.apply_job_state(state),
            AppEvent::UpdateEvent(update) => self.apply_update(update),
        }
    }

    fn push_log(&mut self, log: LogEvent) {
        if self.logs.len() >= MAX_LOG_LINES {
            self.logs.pop_front();
        }
        self.logs.push_back(log);
    }

    fn apply_job_state(&mut self, state: ProcessingStateEvent) {
        // Late events from an older job never overwrite a newer one's terminal view.
        if let Some(current) = &self.job {
            if current.job_id != state.job_id && state.status != JobStatus::Running {
                return;
            }
        }
        self.job = Some(state);
    }

    fn apply_update(&mut self, update: UpdateEvent) {
        match update.kind {
            UpdateEventKind::Available => {
                self.update_progress = None;
                self.update_notice = Some(format!(
                    "Version {} is available.",
                    update.version.as_deref().unwrap_or("?")
                ));
            }
            UpdateEventKind::NotAvailable => {
                self.update_progress = None;
                self.update_notice = Some("You are running the latest version.".to_string());
            }
            UpdateEventKind::Progress => {
                self.update_progress = update.progress;
                self.update_notice = None;
            }
            UpdateEventKind::Downloaded => {
                self.update_progress = Some(100.0);
                self.update_notice = Some(format!(
                    "Version {} is ready to install.",
                    update.version.as_deref().unwrap_or("?")
                ));
            }
            UpdateEventKind::Dismissed => {
                self.update_progress = None;
                self.update_notice = None;
            }
            UpdateEventKind::Error => {
                self.update_progress = None;
                self.update_notice = Some(format!(
                    "Update failed: {}",
                    update.error.as_deref().unwrap_or("unknown error")
                ));
            }
        }
    }

    pub fn is_converting(&self) -> bool {
        self.job
            .as_ref()
            .map(|job| job.status == JobStatus::Running)
            .unwrap_or(false)
    }

    pub fn can_start_conversion(&self) -> bool {
        self.selected_file.is_some() && !self.is_converting()
    }

    pub fn completed_output(&self) -> Option<&Path> {
        match &self.job {
            Some(job) if job.status == JobStatus::Completed => job.output.as_deref(),
            _ => None,
        }
    }

    pub fn error_count(&self) -> usize {
        self.logs
            .iter()
            .filter(|log| log.level == LogLevel::Error)
            .count()
    }

    pub fn status_message(&self) -> String {
        match &self.job {
            None if self.selected_file.is_some() => "Ready to convert.".to_string(),
            None => "Select an .xlsx file to begin.".to_string(),
            Some(job) => match job.status {
                JobStatus::Idle => "Ready to convert.".to_string(),
                JobStatus::Running => "Converting...".to_string(),
                JobStatus::Completed => match &job.output {
                    Some(output) => format!("Done: {}", output.display()),
                    None => "Done.".to_string(),
                },
                JobStatus::Failed => format!(
                    "Failed: {}",
                    job.error.as_deref().unwrap_or("unknown error")
                ),
            },
        }
    }
}
