//! Consent-gated self-update lifecycle.
//!
//! `idle → checking → available → downloading → downloaded → installing`, where both
//! `available → downloading` and `downloaded → installing` happen only through an explicit
//! [`ConsentResponse`]. Every failure parks the controller in `error`, from which a new check
//! may start.

pub mod github;

pub use github::{GitHubReleaseSource, ReleaseLayout};

use crate::backend::DeploymentMode;
use crate::constants::APP_VERSION;
use crate::events::{AppEvent, EventBus, UpdateEvent, UpdateEventKind};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tempfile::TempPath;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInfo {
    pub current_version: String,
    pub latest_version: String,
    pub download_url: String,
    pub release_notes: String,
}

/// A fetched release archive. The file is removed when this is dropped.
#[derive(Debug)]
pub struct DownloadedUpdate {
    pub info: UpdateInfo,
    pub archive: TempPath,
}

pub type ProgressCallback = Arc<dyn Fn(f32) + Send + Sync>;

/// Where releases come from and how they get applied.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// `None` when the running version is current.
    async fn check(&self) -> Result<Option<UpdateInfo>>;

    async fn download(
        &self,
        info: &UpdateInfo,
        progress: ProgressCallback,
    ) -> Result<DownloadedUpdate>;

    async fn install(&self, update: DownloadedUpdate) -> Result<()>;

    /// Relaunches the application. Does not return on success in production sources.
    fn restart(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdatePhase {
    Idle,
    Checking,
    Available,
    Downloading,
    Downloaded,
    Installing,
    Error,
}

impl fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpdatePhase::Idle => "idle",
            UpdatePhase::Checking => "checking",
            UpdatePhase::Available => "available",
            UpdatePhase::Downloading => "downloading",
            UpdatePhase::Downloaded => "downloaded",
            UpdatePhase::Installing => "installing",
            UpdatePhase::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateState {
    pub phase: UpdatePhase,
    pub version: Option<String>,
    pub progress: Option<f32>,
    pub error: Option<String>,
}

impl Default for UpdateState {
    fn default() -> Self {
        Self {
            phase: UpdatePhase::Idle,
            version: None,
            progress: None,
            error: None,
        }
    }
}

/// The user's answer to an update prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentResponse {
    AcceptDownload,
    Dismiss,
    AcceptInstall,
    Defer,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCheckOutcome {
    pub update_available: bool,
    pub current_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_notes: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpdateError {
    #[error("Cannot {action} an update while {phase}")]
    InvalidTransition {
        action: &'static str,
        phase: UpdatePhase,
    },
    #[error("Update check failed: {0}")]
    Check(String),
    #[error("Update download failed: {0}")]
    Download(String),
    #[error("Update install failed: {0}")]
    Install(String),
}

#[derive(Default)]
struct Lifecycle {
    state: UpdateState,
    pending: Option<UpdateInfo>,
    downloaded: Option<DownloadedUpdate>,
    last_progress: Option<u32>,
}

fn lock(lifecycle: &Mutex<Lifecycle>) -> MutexGuard<'_, Lifecycle> {
    match lifecycle.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct UpdateController {
    source: Arc<dyn UpdateSource>,
    bus: Arc<EventBus>,
    current_version: String,
    lifecycle: Arc<Mutex<Lifecycle>>,
}

impl UpdateController {
    pub fn new(source: Arc<dyn UpdateSource>, bus: Arc<EventBus>) -> Self {
        Self {
            source,
            bus,
            current_version: APP_VERSION.to_string(),
            lifecycle: Arc::new(Mutex::new(Lifecycle::default())),
        }
    }

    pub fn state(&self) -> UpdateState {
        lock(&self.lifecycle).state.clone()
    }

    /// Automatic checks only make sense for installed builds.
    pub fn should_check_on_startup(mode: DeploymentMode, auto_check: bool) -> bool {
        mode.is_packaged() && auto_check
    }

    /// Schedules one background check when allowed. Returns whether one was scheduled.
    pub fn spawn_startup_check(
        self: &Arc<Self>,
        mode: DeploymentMode,
        auto_check: bool,
        runtime: &tokio::runtime::Handle,
    ) -> bool {
        if !Self::should_check_on_startup(mode, auto_check) {
            debug!(
                "Skipping startup update check (mode: {}, auto check: {})",
                mode, auto_check
            );
            return false;
        }

        let controller = Arc::clone(self);
        runtime.spawn(async move {
            // Failures are already reported on the bus
            let _ = controller.check().await;
        });
        true
    }

    pub async fn check(&self) -> Result<UpdateCheckOutcome, UpdateError> {
        self.enter(
            "check for",
            &[UpdatePhase::Idle, UpdatePhase::Error],
            UpdatePhase::Checking,
        )
        .map_err(|e| self.reject(e))?;

        match self.source.check().await {
            Ok(Some(info)) => {
                info!("Update available: {}", info.latest_version);
                {
                    let mut lifecycle = lock(&self.lifecycle);
                    lifecycle.state = UpdateState {
                        phase: UpdatePhase::Available,
                        version: Some(info.latest_version.clone()),
                        ..UpdateState::default()
                    };
                    lifecycle.pending = Some(info.clone());
                }
                self.publish(
                    UpdateEvent::new(UpdateEventKind::Available)
                        .with_version(info.latest_version.clone()),
                );

                Ok(UpdateCheckOutcome {
                    update_available: true,
                    current_version: self.current_version.clone(),
                    latest_version: Some(info.latest_version),
                    release_notes: Some(info.release_notes),
                })
            }
            Ok(None) => {
                info!("No update available");
                lock(&self.lifecycle).state = UpdateState::default();
                self.publish(UpdateEvent::new(UpdateEventKind::NotAvailable));

                Ok(UpdateCheckOutcome {
                    update_available: false,
                    current_version: self.current_version.clone(),
                    latest_version: None,
                    release_notes: None,
                })
            }
            Err(e) => Err(self.fail(UpdateError::Check(e.to_string()))),
        }
    }

    pub async fn respond(&self, response: ConsentResponse) -> Result<UpdatePhase, UpdateError> {
        info!("Update consent: {:?}", response);
        let result = match response {
            ConsentResponse::AcceptDownload => self.download().await,
            ConsentResponse::AcceptInstall => self.install().await,
            ConsentResponse::Dismiss => self.decline("dismiss", UpdatePhase::Available),
            ConsentResponse::Defer => self.decline("defer", UpdatePhase::Downloaded),
        };

        result.map_err(|e| match e {
            UpdateError::InvalidTransition { .. } => self.reject(e),
            other => other,
        })
    }

    async fn download(&self) -> Result<UpdatePhase, UpdateError> {
        let info = {
            let mut lifecycle = lock(&self.lifecycle);
            let phase = lifecycle.state.phase;
            match (phase, lifecycle.pending.take()) {
                (UpdatePhase::Available, Some(info)) => {
                    lifecycle.state.phase = UpdatePhase::Downloading;
                    lifecycle.state.progress = Some(0.0);
                    lifecycle.last_progress = None;
                    info
                }
                (_, pending) => {
                    lifecycle.pending = pending;
                    return Err(UpdateError::InvalidTransition {
                        action: "download",
                        phase,
                    });
                }
            }
        };

        let lifecycle = Arc::clone(&self.lifecycle);
        let bus = Arc::clone(&self.bus);
        let progress: ProgressCallback = Arc::new(move |percent: f32| {
            let percent = percent.clamp(0.0, 100.0);
            let whole = percent.floor() as u32;
            {
                let mut lifecycle = lock(&lifecycle);
                if lifecycle.state.phase != UpdatePhase::Downloading
                    || lifecycle.last_progress == Some(whole)
                {
                    return;
                }
                lifecycle.state.progress = Some(percent);
                lifecycle.last_progress = Some(whole);
            }
            bus.publish(AppEvent::UpdateEvent(
                UpdateEvent::new(UpdateEventKind::Progress).with_progress(percent),
            ));
        });

        match self.source.download(&info, progress).await {
            Ok(downloaded) => {
                info!("Update {} downloaded", info.latest_version);
                {
                    let mut lifecycle = lock(&self.lifecycle);
                    lifecycle.state = UpdateState {
                        phase: UpdatePhase::Downloaded,
                        version: Some(info.latest_version.clone()),
                        progress: Some(100.0),
                        error: None,
                    };
                    lifecycle.downloaded = Some(downloaded);
                }
                self.publish(
                    UpdateEvent::new(UpdateEventKind::Downloaded).with_version(info.latest_version),
                );
                Ok(UpdatePhase::Downloaded)
            }
            Err(e) => Err(self.fail(UpdateError::Download(e.to_string()))),
        }
    }

    async fn install(&self) -> Result<UpdatePhase, UpdateError> {
        let downloaded = {
            let mut lifecycle = lock(&self.lifecycle);
            let phase = lifecycle.state.phase;
            match (phase, lifecycle.downloaded.take()) {
                (UpdatePhase::Downloaded, Some(downloaded)) => {
                    lifecycle.state.phase = UpdatePhase::Installing;
                    downloaded
                }
                (_, downloaded) => {
                    lifecycle.downloaded = downloaded;
                    return Err(UpdateError::InvalidTransition {
                        action: "install",
                        phase,
                    });
                }
            }
        };

        if let Err(e) = self.source.install(downloaded).await {
            return Err(self.fail(UpdateError::Install(e.to_string())));
        }

        info!("Update installed, restarting");
        self.source
            .restart()
            .map_err(|e| self.fail(UpdateError::Install(e.to_string())))?;
        Ok(UpdatePhase::Installing)
    }

    fn decline(
        &self,
        action: &'static str,
        from: UpdatePhase,
    ) -> Result<UpdatePhase, UpdateError> {
        {
            let mut lifecycle = lock(&self.lifecycle);
            let phase = lifecycle.state.phase;
            if phase != from {
                return Err(UpdateError::InvalidTransition { action, phase });
            }

            lifecycle.pending = None;
            lifecycle.downloaded = None;
            lifecycle.state = UpdateState::default();
        }

        debug!("Update declined ({}) while {}", action, from);
        self.publish(UpdateEvent::new(UpdateEventKind::Dismissed));
        Ok(UpdatePhase::Idle)
    }

    fn enter(
        &self,
        action: &'static str,
        allowed: &[UpdatePhase],
        next: UpdatePhase,
    ) -> Result<(), UpdateError> {
        let mut lifecycle = lock(&self.lifecycle);
        let phase = lifecycle.state.phase;
        if !allowed.contains(&phase) {
            return Err(UpdateError::InvalidTransition { action, phase });
        }

        lifecycle.state = UpdateState {
            phase: next,
            ..UpdateState::default()
        };
        Ok(())
    }

    /// Reports a refused transition. The phase is left as it was.
    fn reject(&self, error: UpdateError) -> UpdateError {
        let message = error.to_string();
        warn!("{}", message);
        self.bus.error(&message);
        error
    }

    fn fail(&self, error: UpdateError) -> UpdateError {
        let message = error.to_string();
        warn!("{}", message);
        {
            let mut lifecycle = lock(&self.lifecycle);
            lifecycle.pending = None;
            lifecycle.downloaded = None;
            lifecycle.state = UpdateState {
                phase: UpdatePhase::Error,
                error: Some(message.clone()),
                ..UpdateState::default()
            };
        }

        self.publish(UpdateEvent::new(UpdateEventKind::Error).with_error(message.clone()));
        self.bus.error(&message);
        error
    }

    fn publish(&self, event: UpdateEvent) {
        self.bus.publish(AppEvent::UpdateEvent(event));
    }
}
