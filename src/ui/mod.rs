//! # Dashboard User Interface
//!
//! eframe/egui view over the [`MqttDataHandler`] buffer.
//!
//! ## Why This Module Exists
//!
//! The gateway has no interactive user. The dashboard is where someone in the
//! lab looks at what the board is sending: whether the broker is reachable,
//! the latest value per sensor, a live chart, and a scrolling log of raw
//! messages. Capture can be paused, the window cleared and the buffer
//! exported to CSV. Operator commands for the board go out on the command
//! topic.
//!
//! ## Layout
//!
//! - **Top Panel**: broker status, capture toggle, Clear / Save CSV / Reconnect
//! - **Central Panel**: per-sensor summary grid, command sender, live chart
//!   and the message log
//! - **Bottom Panel**: result of the last action
//!
//! While the broker is unreachable, `update` retries the connection once per
//! reconnect interval. The view holds no data of its own. Every frame reads a snapshot from the
//! handler, so the network thread only ever contends for the buffer lock for
//! the duration of one copy.

pub mod chart;
pub mod common;
pub mod message_log;

use eframe::egui::{self, Button, Grid, RichText, TextEdit, Vec2};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::dashboard::{sensor_summaries, MqttDataHandler};
use self::common::{create_frame, format_timestamp, format_value, status_text, UiColors};

const REFRESH: Duration = Duration::from_millis(250);
const DEFAULT_LOG_LIMIT: usize = 50;
const CHART_HEIGHT: f32 = 220.0;

pub struct DashboardApp {
    handler: MqttDataHandler,
    endpoint: String,
    log_limit: usize,
    last_action: Option<String>,
    command_input: String,
}

impl DashboardApp {
    pub fn new(cc: &eframe::CreationContext<'_>, handler: MqttDataHandler, endpoint: String) -> Self {
        cc.egui_ctx.set_theme(egui::Theme::Dark);
        Self {
            handler,
            endpoint,
            log_limit: DEFAULT_LOG_LIMIT,
            last_action: None,
            command_input: String::new(),
        }
    }

    fn keep_connected(&mut self) {
        match self.handler.maintain_connection(Instant::now()) {
            Some(Ok(())) => {
                info!("Dashboard reconnected to {}", self.endpoint);
                self.last_action = Some(format!("Reconnected to {}", self.endpoint));
            }
            Some(Err(e)) => {
                warn!("Broker still unavailable: {}", e);
                self.last_action = Some(format!("Broker unavailable, retrying: {}", e));
            }
            None => {}
        }
    }

    fn command_sender(&mut self, ui: &mut egui::Ui) {
        ui.collapsing("Send command", |ui| {
            let Some(topic) = self.handler.command_topic().map(str::to_string) else {
                ui.label("No command topic configured (mqtt.command_topic).");
                return;
            };
            ui.horizontal(|ui| {
                ui.add(
                    TextEdit::singleline(&mut self.command_input)
                        .hint_text("e.g. LED_ON")
                        .desired_width(240.0),
                );
                let ready = !self.command_input.trim().is_empty();
                if ui.add_enabled(ready, Button::new("Publish")).clicked() {
                    self.last_action = Some(match self.handler.send_command(&self.command_input) {
                        Ok(()) => {
                            let sent = format!("Sent {} to {}", self.command_input.trim(), topic);
                            self.command_input.clear();
                            sent
                        }
                        Err(e) => {
                            warn!("Command not sent: {}", e);
                            format!("Command not sent: {}", e)
                        }
                    });
                }
                ui.label(format!("to {}", topic));
            });
        });
    }

    fn toolbar(&mut self, ui: &mut egui::Ui) {
        let button_size = Vec2 { x: 90.0, y: 20.0 };
        ui.horizontal_centered(|ui| {
            ui.label(status_text(self.handler.is_connected(), &self.endpoint));
            ui.separator();

            let mut capturing = self.handler.is_capturing();
            if ui.checkbox(&mut capturing, "Capture").changed() {
                self.handler.set_capture(capturing);
            }

            if ui.add(Button::new("Clear").min_size(button_size)).clicked() {
                self.handler.clear();
                self.last_action = Some("Buffer cleared".to_string());
            }

            if ui.add(Button::new("Save CSV").min_size(button_size)).clicked() {
                self.last_action = Some(match self.handler.save_to_csv() {
                    Ok(Some(path)) => format!("Saved to {}", path.display()),
                    Ok(None) => "Nothing to save (no output path or no data)".to_string(),
                    Err(e) => {
                        error!("CSV export failed: {}", e);
                        format!("Export failed: {}", e)
                    }
                });
            }

            if ui.add(Button::new("Reconnect").min_size(button_size)).clicked() {
                self.last_action = Some(match self.handler.start() {
                    Ok(()) => {
                        info!("Dashboard reconnected to {}", self.endpoint);
                        format!("Connected to {}", self.endpoint)
                    }
                    Err(e) => {
                        warn!("Dashboard reconnect failed: {}", e);
                        format!("Broker unavailable: {}", e)
                    }
                });
            }

            ui.label(format!("{} buffered", self.handler.len()));
        });
    }

    fn sensor_grid(&self, ui: &mut egui::Ui) {
        let summaries = sensor_summaries(&self.handler.snapshot());
        create_frame(UiColors::INNER_BG, UiColors::BORDER).show(ui, |ui| {
            Grid::new("sensor_summary")
                .num_columns(4)
                .striped(true)
                .show(ui, |ui| {
                    ui.label(RichText::new("Sensor").strong());
                    ui.label(RichText::new("Latest").strong());
                    ui.label(RichText::new("Messages").strong());
                    ui.label(RichText::new("Last seen").strong());
                    ui.end_row();
                    for summary in &summaries {
                        ui.label(&summary.sensor);
                        ui.label(format_value(&summary.latest));
                        ui.label(summary.count.to_string());
                        ui.label(format_timestamp(summary.last_timestamp));
                        ui.end_row();
                    }
                });
        });
    }
}

impl eframe::App for DashboardApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint_after(REFRESH);
        self.keep_connected();

        egui::TopBottomPanel::top("top_panel")
            .show_separator_line(false)
            .show(ctx, |ui| self.toolbar(ui));

        egui::TopBottomPanel::bottom("bottom_panel")
            .show_separator_line(false)
            .show(ctx, |ui| {
                ui.horizontal_centered(|ui| {
                    let capture = if self.handler.is_capturing() {
                        "capturing"
                    } else {
                        "paused"
                    };
                    ui.label(status_text(self.handler.is_capturing(), capture));
                    if let Some(action) = &self.last_action {
                        ui.label(action);
                    }
                });
            });

        egui::CentralPanel::default()
            .frame(create_frame(UiColors::MAIN_BG, UiColors::BORDER))
            .show(ctx, |ui| {
                self.command_sender(ui);
                ui.add_space(4.0);

                if self.handler.is_empty() {
                    let banner = if self.handler.is_connected() {
                        "No data yet. Waiting for messages on the data topic."
                    } else {
                        "No data yet. Broker not connected, retrying."
                    };
                    ui.colored_label(UiColors::NOTICE, banner);
                    return;
                }

                let snapshot = self.handler.snapshot();
                self.sensor_grid(ui);
                ui.add_space(4.0);
                chart::live_chart(ui, &snapshot, CHART_HEIGHT);
                ui.add_space(4.0);
                let height = ui.available_height();
                message_log::message_log(ui, &self.handler.latest_messages(self.log_limit), height);
            });
    }
}
