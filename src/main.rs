use std::sync::Arc;
use tokio::runtime::Runtime;

mod app;
mod backend;
mod config;
mod constants;
mod conversion;
mod events;
mod services;
mod state;
mod ui;
mod updater;

use app::SheetShellApp;
use config::ConfigHandle;
use constants::{APP_NAME, APP_VERSION};
use services::ServiceManager;

fn main() -> Result<(), eframe::Error> {
    tracing_subscriber::fmt::init();

    tracing::info!("Starting {} {}", APP_NAME, APP_VERSION);

    // Backend processes and update downloads run here; the UI stays on the main thread
    let rt = Runtime::new().expect("Failed to create async runtime");

    let services = match ServiceManager::new(ConfigHandle::load()) {
        Ok(services) => Arc::new(services),
        Err(e) => {
            tracing::error!("Failed to initialize services: {:#}", e);
            std::process::exit(1);
        }
    };
    let handle = rt.handle().clone();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([900.0, 640.0])
            .with_min_inner_size([640.0, 480.0])
            .with_title(APP_NAME)
            .with_resizable(true),
        ..Default::default()
    };

    let app_creator = move |cc: &eframe::CreationContext| -> Box<dyn eframe::App> {
        Box::new(SheetShellApp::new(&cc.egui_ctx, services, handle))
    };

    let result = eframe::run_native(APP_NAME, options, Box::new(app_creator));

    tracing::info!("Application shutting down");
    result
}
