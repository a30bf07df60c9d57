use crate::config::ConfigHandle;
use crate::conversion::JobSupervisor;
use crate::events::{EventBus, LogLevel, LogSource};
use crate::services::file_service::{FileChooser, FileService};
use crate::updater::{UpdateCheckOutcome, UpdateController};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Requests the UI can make of the core.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", content = "args", rename_all = "kebab-case")]
pub enum Command {
    SelectFile,
    RunConversion { path: PathBuf },
    RevealOutput { path: PathBuf },
    ForwardLog { message: String },
    CheckForUpdates,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateCheckResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<UpdateCheckOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CommandResponse {
    SelectedFile(Option<PathBuf>),
    Conversion(ConversionResult),
    Revealed(bool),
    UpdateCheck(UpdateCheckResult),
    Acknowledged,
}

/// The only surface the UI calls. Operations report failures in their results instead of
/// returning errors.
pub struct CommandService {
    supervisor: Arc<JobSupervisor>,
    updater: Arc<UpdateController>,
    files: FileService,
    chooser: Arc<dyn FileChooser>,
    config: Arc<ConfigHandle>,
    bus: Arc<EventBus>,
}

impl CommandService {
    pub fn new(
        supervisor: Arc<JobSupervisor>,
        updater: Arc<UpdateController>,
        config: Arc<ConfigHandle>,
        bus: Arc<EventBus>,
    ) -> Self {
        let files = FileService::new();
        Self {
            supervisor,
            updater,
            chooser: Arc::new(files.clone()),
            files,
            config,
            bus,
        }
    }

    pub fn with_chooser(mut self, chooser: Arc<dyn FileChooser>) -> Self {
        self.chooser = chooser;
        self
    }

    /// Blocks on the native dialog; call from the UI thread.
    pub fn select_file(&self) -> Option<PathBuf> {
        let start_dir = self.config.get().last_input_dir;
        let selected = self.chooser.choose_file(start_dir.as_deref());

        match &selected {
            Some(path) => {
                tracing::info!("Selected input file: {:?}", path);
                self.config.remember_input_dir(path);
            }
            None => tracing::debug!("File selection cancelled"),
        }
        selected
    }

    pub async fn run_conversion(&self, path: &Path) -> ConversionResult {
        match self.supervisor.run(path).await {
            Ok(output_path) => ConversionResult {
                success: true,
                output_path: Some(output_path),
                error: None,
            },
            Err(e) => ConversionResult {
                success: false,
                output_path: None,
                error: Some(e.user_message()),
            },
        }
    }

    pub fn reveal_output(&self, path: &Path) -> bool {
        match self.files.reveal_in_folder(path) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("{}", e);
                false
            }
        }
    }

    /// Routes a UI diagnostic into the tracing log and back onto the bus.
    pub fn forward_log(&self, message: &str) {
        tracing::info!(target: "ui", "{}", message.trim_end());
        self.bus.log(LogLevel::Info, LogSource::Ui, message);
    }

    pub async fn check_for_updates(&self) -> UpdateCheckResult {
        match self.updater.check().await {
            Ok(outcome) => UpdateCheckResult {
                success: true,
                result: Some(outcome),
                error: None,
            },
            Err(e) => UpdateCheckResult {
                success: false,
                result: None,
                error: Some(e.to_string()),
            },
        }
    }

    pub async fn dispatch(&self, command: Command) -> CommandResponse {
        tracing::debug!("Dispatching {:?}", command);
        match command {
            Command::SelectFile => CommandResponse::SelectedFile(self.select_file()),
            Command::RunConversion { path } => {
                CommandResponse::Conversion(self.run_conversion(&path).await)
            }
            Command::RevealOutput { path } => {
                CommandResponse::Revealed(self.reveal_output(&path))
            }
            Command::ForwardLog { message } => {
                self.forward_log(&message);
                CommandResponse::Acknowledged
            }
            Command::CheckForUpdates => {
                CommandResponse::UpdateCheck(self.check_for_updates().await)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        BackendInvocation, BackendLocator, BackendNotFoundError, DeploymentMode,
    };
    use crate::config::AppConfig;
    use crate::events::tests::{attached_bus, RecordingSink};
    use crate::updater::{DownloadedUpdate, ProgressCallback, UpdateInfo, UpdateSource};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StaticLocator(Result<BackendInvocation, BackendNotFoundError>);

    impl BackendLocator for StaticLocator {
        fn locate(&self) -> Result<BackendInvocation, BackendNotFoundError> {
            self.0.clone()
        }
    }

    struct OfflineSource;

    #[async_trait]
    impl UpdateSource for OfflineSource {
        async fn check(&self) -> anyhow::Result<Option<UpdateInfo>> {
            Err(anyhow!("network unreachable"))
        }

        async fn download(
            &self,
            _info: &UpdateInfo,
            _progress: ProgressCallback,
        ) -> anyhow::Result<DownloadedUpdate> {
            Err(anyhow!("network unreachable"))
        }

        async fn install(&self, _update: DownloadedUpdate) -> anyhow::Result<()> {
            Ok(())
        }

        fn restart(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct ScriptedChooser {
        answer: Option<PathBuf>,
        start_dirs: Mutex<Vec<Option<PathBuf>>>,
    }

    impl FileChooser for ScriptedChooser {
        fn choose_file(&self, start_dir: Option<&Path>) -> Option<PathBuf> {
            self.start_dirs
                .lock()
                .unwrap()
                .push(start_dir.map(Path::to_path_buf));
            self.answer.clone()
        }
    }

    fn missing_backend() -> BackendNotFoundError {
        BackendNotFoundError {
            mode: DeploymentMode::Packaged,
            searched: vec![PathBuf::from("/app/resources/processor")],
        }
    }

    fn service(
        locator: StaticLocator,
        config: AppConfig,
    ) -> (CommandService, Arc<ConfigHandle>, Arc<RecordingSink>) {
        let (bus, sink) = attached_bus();
        let supervisor = Arc::new(JobSupervisor::new(Arc::new(locator), bus.clone()));
        let updater = Arc::new(UpdateController::new(Arc::new(OfflineSource), bus.clone()));
        let config = Arc::new(ConfigHandle::in_memory(config));
        (
            CommandService::new(supervisor, updater, config.clone(), bus),
            config,
            sink,
        )
    }

    /// A service whose backend can never be located.
    fn unresolved_service() -> (CommandService, Arc<ConfigHandle>, Arc<RecordingSink>) {
        service(StaticLocator(Err(missing_backend())), AppConfig::default())
    }

    #[tokio::test]
    async fn conversion_failure_is_reported_not_raised() {
        let (service, _, sink) = unresolved_service();

        let result = service.run_conversion(Path::new("/data/book.xlsx")).await;

        assert!(!result.success);
        assert_eq!(result.output_path, None);
        assert!(result.error.unwrap().contains("not installed"));
        assert_eq!(sink.log_messages().len(), 1);
    }

    #[tokio::test]
    async fn invalid_input_gets_a_readable_error() {
        let (service, _, _) = unresolved_service();

        let result = service.run_conversion(Path::new("notes.txt")).await;

        assert_eq!(
            result.error.as_deref(),
            Some("Only .xlsx files can be converted.")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_conversion_returns_output_path() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("book.xlsx");
        std::fs::write(&input, b"xlsx").unwrap();
        let locator = StaticLocator(Ok(BackendInvocation {
            command: PathBuf::from("sh"),
            args: vec![
                "-c".to_string(),
                "cp \"$1\" \"$2\"".to_string(),
                "backend".to_string(),
            ],
        }));
        let (service, _, _) = service(locator, AppConfig::default());

        let response = service
            .dispatch(Command::RunConversion {
                path: input.clone(),
            })
            .await;

        let expected = dir.path().join("book_processed.xlsx");
        assert_eq!(
            response,
            CommandResponse::Conversion(ConversionResult {
                success: true,
                output_path: Some(expected.clone()),
                error: None,
            })
        );
        assert!(expected.exists());
    }

    #[test]
    fn selection_starts_in_and_remembers_last_directory() {
        let config = AppConfig {
            last_input_dir: Some(PathBuf::from("/data/in")),
            ..AppConfig::default()
        };
        let (service, config, _) = service(StaticLocator(Err(missing_backend())), config);
        let chooser = Arc::new(ScriptedChooser {
            answer: Some(PathBuf::from("/data/other/book.xlsx")),
            ..ScriptedChooser::default()
        });
        let service = service.with_chooser(chooser.clone());

        assert_eq!(
            service.select_file(),
            Some(PathBuf::from("/data/other/book.xlsx"))
        );
        assert_eq!(
            chooser.start_dirs.lock().unwrap().clone(),
            vec![Some(PathBuf::from("/data/in"))]
        );
        assert_eq!(
            config.get().last_input_dir,
            Some(PathBuf::from("/data/other"))
        );
    }

    #[test]
    fn cancelled_selection_changes_nothing() {
        let (service, config, _) = unresolved_service();
        let service = service.with_chooser(Arc::new(ScriptedChooser::default()));

        assert_eq!(service.select_file(), None);
        assert_eq!(config.get().last_input_dir, None);
    }

    #[test]
    fn forwarded_logs_are_tagged_as_ui() {
        let (service, _, sink) = unresolved_service();

        service.forward_log("clicked convert\n");
        service.forward_log("   ");

        let logs = sink.log_messages();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, "clicked convert");
        assert_eq!(logs[0].source, LogSource::Ui);
        assert_eq!(logs[0].level, LogLevel::Info);
    }

    #[test]
    fn revealing_a_missing_file_returns_false() {
        let (service, _, _) = unresolved_service();

        assert!(!service.reveal_output(Path::new("/definitely/not/here.xlsx")));
    }

    #[tokio::test]
    async fn update_check_failure_is_reported() {
        let (service, _, _) = unresolved_service();

        let response = service.dispatch(Command::CheckForUpdates).await;

        match response {
            CommandResponse::UpdateCheck(result) => {
                assert!(!result.success);
                assert!(result.error.unwrap().contains("network unreachable"));
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn results_serialize_in_camel_case() {
        let value = serde_json::to_value(ConversionResult {
            success: true,
            output_path: Some(PathBuf::from("/data/book_processed.xlsx")),
            error: None,
        })
        .unwrap();

        assert_eq!(
            value,
            serde_json::json!({"success": true, "outputPath": "/data/book_processed.xlsx"})
        );
    }

    #[test]
    fn commands_deserialize_from_tagged_json() {
        let command: Command = serde_json::from_value(serde_json::json!({
            "command": "run-conversion",
            "args": {"path": "/data/book.xlsx"}
        }))
        .unwrap();

        assert_eq!(
            command,
            Command::RunConversion {
                path: PathBuf::from("/data/book.xlsx")
            }
        );
    }
}
