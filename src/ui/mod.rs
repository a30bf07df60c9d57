use crate::app::SheetShellApp;
use crate::constants::{APP_NAME, APP_VERSION};
use crate::events::{LogLevel, LogSource};
use crate::updater::{ConsentResponse, UpdatePhase};
use eframe::egui;

impl eframe::App for SheetShellApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_events();

        let mut style = (*ctx.style()).clone();
        style.spacing.button_padding = egui::vec2(12.0, 8.0);
        style.spacing.item_spacing = egui::vec2(10.0, 10.0);
        ctx.set_style(style);
        ctx.set_visuals(egui::Visuals::dark());

        egui::TopBottomPanel::top("header")
            .frame(
                egui::Frame::none()
                    .fill(egui::Color32::from_gray(15))
                    .inner_margin(15.0),
            )
            .show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.heading(
                        egui::RichText::new(APP_NAME)
                            .size(24.0)
                            .color(egui::Color32::WHITE)
                            .strong(),
                    );
                    ui.label(
                        egui::RichText::new(format!("v{}", APP_VERSION))
                            .color(egui::Color32::from_gray(150)),
                    );
                    ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                        let check_button = egui::Button::new("🔄 Check for updates");
                        if ui
                            .add_enabled(self.can_check_for_updates(), check_button)
                            .clicked()
                        {
                            self.check_for_updates();
                        }
                    });
                });
            });

        egui::TopBottomPanel::bottom("controls")
            .frame(
                egui::Frame::none()
                    .fill(egui::Color32::from_gray(15))
                    .inner_margin(15.0),
            )
            .show(ctx, |ui| {
                self.show_main_controls(ui);
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            self.show_update_banner(ui);
            self.show_file_selection(ui);
            ui.add_space(10.0);
            self.show_status_card(ui);
            ui.add_space(10.0);
            self.show_log_panel(ui);
        });

        if self.is_busy() || self.update_state().phase == UpdatePhase::Downloading {
            ctx.request_repaint_after(std::time::Duration::from_millis(100));
        }
    }
}

impl SheetShellApp {
    fn show_file_selection(&mut self, ui: &mut egui::Ui) {
        egui::Grid::new("file_selection")
            .num_columns(3)
            .spacing([10.0, 10.0])
            .show(ui, |ui| {
                ui.label(egui::RichText::new("Workbook:").strong());
                let mut shown = self
                    .shell
                    .selected_file
                    .as_ref()
                    .map(|path| path.display().to_string())
                    .unwrap_or_default();
                ui.add_sized(
                    [420.0, 25.0],
                    egui::TextEdit::singleline(&mut shown)
                        .hint_text("Select an .xlsx file...")
                        .interactive(false),
                );
                if ui
                    .add_enabled(!self.is_busy(), egui::Button::new("📁 Browse"))
                    .clicked()
                {
                    self.browse();
                }
                ui.end_row();
            });
    }

    fn show_main_controls(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            let convert_button = egui::Button::new(egui::RichText::new("▶ Convert").size(16.0))
                .min_size(egui::vec2(160.0, 40.0));
            if ui.add_enabled(self.can_convert(), convert_button).clicked() {
                self.start_conversion();
            }

            ui.add_space(20.0);

            let reveal_button =
                egui::Button::new(egui::RichText::new("📂 Show in folder").size(16.0))
                    .min_size(egui::vec2(160.0, 40.0));
            if ui
                .add_enabled(self.shell.completed_output().is_some(), reveal_button)
                .clicked()
            {
                self.reveal_output();
            }

            if self.is_busy() {
                ui.add_space(20.0);
                ui.spinner();
            }
        });
    }

    fn show_status_card(&mut self, ui: &mut egui::Ui) {
        let status = self.status_line();
        let (fill, color) = if status.starts_with("Failed") {
            (
                egui::Color32::from_rgba_premultiplied(200, 50, 50, 50),
                egui::Color32::LIGHT_RED,
            )
        } else if self.shell.completed_output().is_some() {
            (
                egui::Color32::from_rgba_premultiplied(50, 200, 50, 50),
                egui::Color32::LIGHT_GREEN,
            )
        } else {
            (egui::Color32::from_gray(30), egui::Color32::LIGHT_GRAY)
        };

        egui::Frame::none()
            .fill(fill)
            .rounding(8.0)
            .inner_margin(12.0)
            .show(ui, |ui| {
                ui.set_width(ui.available_width());
                ui.label(egui::RichText::new(status).color(color));
            });
    }

    fn show_update_banner(&mut self, ui: &mut egui::Ui) {
        let state = self.update_state();
        let version = state.version.clone().unwrap_or_default();

        let show_notice = matches!(
            state.phase,
            UpdatePhase::Idle | UpdatePhase::Checking | UpdatePhase::Error
        );
        if show_notice && self.shell.update_notice.is_none() {
            return;
        }

        egui::Frame::none()
            .fill(egui::Color32::from_rgb(30, 45, 70))
            .rounding(8.0)
            .inner_margin(12.0)
            .show(ui, |ui| {
                ui.set_width(ui.available_width());
                match state.phase {
                    UpdatePhase::Available => {
                        ui.label(format!("Version {} is available. Download it now?", version));
                        ui.horizontal(|ui| {
                            if ui.button("⬇ Download").clicked() {
                                self.respond_to_update(ConsentResponse::AcceptDownload);
                            }
                            if ui.button("Later").clicked() {
                                self.respond_to_update(ConsentResponse::Dismiss);
                            }
                        });
                    }
                    UpdatePhase::Downloading => {
                        let progress = self.shell.update_progress.or(state.progress).unwrap_or(0.0);
                        ui.label(format!("Downloading version {}...", version));
                        ui.add(egui::ProgressBar::new(progress / 100.0).show_percentage());
                    }
                    UpdatePhase::Downloaded => {
                        ui.label(format!("Version {} is ready. Install and restart now?", version));
                        ui.horizontal(|ui| {
                            if ui.button("Install & restart").clicked() {
                                self.respond_to_update(ConsentResponse::AcceptInstall);
                            }
                            if ui.button("Later").clicked() {
                                self.respond_to_update(ConsentResponse::Defer);
                            }
                        });
                    }
                    UpdatePhase::Installing => {
                        ui.label("Installing update...");
                    }
                    UpdatePhase::Idle | UpdatePhase::Checking | UpdatePhase::Error => {
                        if let Some(notice) = &self.shell.update_notice {
                            ui.label(notice);
                        }
                    }
                }
            });
        ui.add_space(10.0);
    }

    fn show_log_panel(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.label(egui::RichText::new("Log").strong());
            let errors = self.shell.error_count();
            if errors > 0 {
                ui.label(
                    egui::RichText::new(format!("{} errors", errors))
                        .color(egui::Color32::LIGHT_RED),
                );
            }
        });

        egui::Frame::none()
            .fill(egui::Color32::from_gray(12))
            .rounding(6.0)
            .inner_margin(8.0)
            .show(ui, |ui| {
                egui::ScrollArea::vertical()
                    .stick_to_bottom(true)
                    .auto_shrink([false; 2])
                    .show(ui, |ui| {
                        for log in &self.shell.logs {
                            let color = match (log.level, log.source) {
                                (LogLevel::Error, _) => egui::Color32::LIGHT_RED,
                                (LogLevel::Info, LogSource::Ui) => egui::Color32::from_gray(140),
                                (LogLevel::Info, LogSource::Backend) => egui::Color32::LIGHT_GRAY,
                            };
                            ui.label(egui::RichText::new(&log.message).monospace().color(color));
                        }
                    });
            });
    }
}
