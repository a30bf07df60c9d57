use crate::events::{create_event_channel, AppEvent, EventReceiver, EventSender, EventSink};
use crate::services::command_service::ConversionResult;
use crate::services::ServiceManager;
use crate::state::ShellState;
use crate::updater::{ConsentResponse, UpdatePhase, UpdateState};
use eframe::egui;
use std::sync::{mpsc, Arc};
use tokio::runtime::Handle;

/// Feeds the window's channel and wakes the UI thread.
struct RepaintingSink {
    sender: EventSender,
    ctx: egui::Context,
}

impl EventSink for RepaintingSink {
    fn deliver(&self, event: AppEvent) {
        if self.sender.send(event).is_ok() {
            self.ctx.request_repaint();
        }
    }
}

pub struct SheetShellApp {
    pub shell: ShellState,
    pub last_result: Option<ConversionResult>,
    services: Arc<ServiceManager>,
    runtime: Handle,
    ctx: egui::Context,
    events: EventReceiver,
    result_receiver: Option<mpsc::Receiver<ConversionResult>>,
}

impl SheetShellApp {
    pub fn new(ctx: &egui::Context, services: Arc<ServiceManager>, runtime: Handle) -> Self {
        let (sender, events) = create_event_channel();
        services.attach(Arc::new(RepaintingSink {
            sender,
            ctx: ctx.clone(),
        }));
        services.initialize(&runtime);

        Self {
            shell: ShellState::new(),
            last_result: None,
            services,
            runtime,
            ctx: ctx.clone(),
            events,
            result_receiver: None,
        }
    }

    pub fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.shell.apply(event);
        }

        let finished = match &self.result_receiver {
            Some(rx) => match rx.try_recv() {
                Ok(result) => Some(Some(result)),
                Err(mpsc::TryRecvError::Empty) => None,
                Err(mpsc::TryRecvError::Disconnected) => Some(None),
            },
            None => None,
        };

        if let Some(result) = finished {
            self.result_receiver = None;
            self.last_result = result;
        }
    }

    pub fn is_busy(&self) -> bool {
        self.result_receiver.is_some() || self.shell.is_converting()
    }

    pub fn can_convert(&self) -> bool {
        self.shell.selected_file.is_some() && !self.is_busy()
    }

    pub fn browse(&mut self) {
        if let Some(path) = self.services.commands.select_file() {
            self.shell.select_file(path);
            self.last_result = None;
        }
    }

    pub fn start_conversion(&mut self) {
        if !self.can_convert() {
            return;
        }
        let Some(path) = self.shell.selected_file.clone() else {
            return;
        };

        let commands = self.services.commands.clone();
        commands.forward_log(&format!("Converting {}", path.display()));

        let (tx, rx) = mpsc::channel();
        let ctx = self.ctx.clone();
        self.runtime.spawn(async move {
            let result = commands.run_conversion(&path).await;
            let _ = tx.send(result);
            ctx.request_repaint();
        });

        self.result_receiver = Some(rx);
        self.last_result = None;
    }

    pub fn reveal_output(&self) {
        let Some(output) = self.shell.completed_output() else {
            return;
        };
        if !self.services.commands.reveal_output(output) {
            self.services
                .commands
                .forward_log(&format!("Could not open folder for {}", output.display()));
        }
    }

    pub fn status_line(&self) -> String {
        match &self.last_result {
            Some(ConversionResult {
                success: false,
                error: Some(error),
                ..
            }) => format!("Failed: {}", error),
            _ => self.shell.status_message(),
        }
    }

    pub fn update_state(&self) -> UpdateState {
        self.services.updater.state()
    }

    pub fn can_check_for_updates(&self) -> bool {
        matches!(
            self.update_state().phase,
            UpdatePhase::Idle | UpdatePhase::Error
        )
    }

    pub fn check_for_updates(&self) {
        let commands = self.services.commands.clone();
        self.runtime.spawn(async move {
            let result = commands.check_for_updates().await;
            if !result.success {
                tracing::debug!("Manual update check did not complete: {:?}", result.error);
            }
        });
    }

    pub fn respond_to_update(&self, response: ConsentResponse) {
        let updater = self.services.updater.clone();
        let ctx = self.ctx.clone();
        self.runtime.spawn(async move {
            if let Err(e) = updater.respond(response).await {
                tracing::warn!("{}", e);
            }
            ctx.request_repaint();
        });
    }
}

impl Drop for SheetShellApp {
    fn drop(&mut self) {
        self.services.bus.detach();
    }
}
