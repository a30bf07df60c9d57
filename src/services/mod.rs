use crate::backend::{BackendLocator, BackendResolver, DeploymentMode};
use crate::config::ConfigHandle;
use crate::constants::{APP_BINARY, APP_VERSION};
use crate::conversion::exit_codes::ExitCodeTable;
use crate::conversion::JobSupervisor;
use crate::events::{EventBus, EventSink};
use crate::updater::{GitHubReleaseSource, ReleaseLayout, UpdateController, UpdateSource};
use std::sync::Arc;

pub mod command_service;
pub mod file_service;
pub mod validation_service;

pub use command_service::CommandService;
pub use file_service::FileService;
pub use validation_service::ValidationService;

/// Owns the long-lived core objects for the lifetime of the application.
pub struct ServiceManager {
    pub bus: Arc<EventBus>,
    pub supervisor: Arc<JobSupervisor>,
    pub updater: Arc<UpdateController>,
    pub commands: Arc<CommandService>,
    pub config: Arc<ConfigHandle>,
    locator: Arc<dyn BackendLocator>,
    mode: DeploymentMode,
}

impl ServiceManager {
    pub fn new(config: ConfigHandle) -> anyhow::Result<Self> {
        let settings = config.get();
        let mode = DeploymentMode::detect(settings.deployment_mode);
        tracing::info!("Running in {} mode", mode);

        let locator = Arc::new(
            BackendResolver::for_current_platform(mode).with_override(settings.backend_override),
        );
        let layout = ReleaseLayout::for_current_platform(APP_BINARY);
        let source = Arc::new(GitHubReleaseSource::new(
            APP_VERSION,
            settings.update_feed,
            layout,
        )?);

        Ok(Self::with_parts(Arc::new(config), locator, source, mode))
    }

    pub fn with_parts(
        config: Arc<ConfigHandle>,
        locator: Arc<dyn BackendLocator>,
        source: Arc<dyn UpdateSource>,
        mode: DeploymentMode,
    ) -> Self {
        let settings = config.get();
        let bus = Arc::new(EventBus::new());

        let exit_codes = ExitCodeTable::default().with_rules(settings.extra_exit_codes);
        let supervisor = Arc::new(
            JobSupervisor::new(locator.clone(), bus.clone()).with_exit_codes(exit_codes),
        );
        let updater = Arc::new(UpdateController::new(source, bus.clone()));
        let commands = Arc::new(CommandService::new(
            supervisor.clone(),
            updater.clone(),
            config.clone(),
            bus.clone(),
        ));

        Self {
            bus,
            supervisor,
            updater,
            commands,
            config,
            locator,
            mode,
        }
    }

    pub fn mode(&self) -> DeploymentMode {
        self.mode
    }

    /// Points event delivery at a new UI surface.
    pub fn attach(&self, sink: Arc<dyn EventSink>) {
        if self.bus.attach(sink).is_some() {
            tracing::debug!("Replaced previous event sink");
        }
    }

    /// Reports the backend that conversions will use and schedules the startup update check.
    /// Returns whether an update check was scheduled.
    pub fn initialize(&self, runtime: &tokio::runtime::Handle) -> bool {
        match self.locator.locate() {
            Ok(invocation) => tracing::info!("Conversion backend: {}", invocation),
            Err(e) => {
                tracing::warn!("{} (searched: {:?})", e, e.searched);
                self.bus.error(&e.to_string());
            }
        }

        self.updater.spawn_startup_check(
            self.mode,
            self.config.get().auto_check_updates,
            runtime,
        )
    }
}
