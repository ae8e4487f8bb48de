use eframe::egui::{Label, ScrollArea, Sense, Ui};
use serde_json::Value;
use tracing::info;

use super::common::{create_frame, format_timestamp, format_value, UiColors};
use crate::dashboard::Entry;

/// One log line: time, sensor, value and the source topic
pub fn render_entry(entry: &Entry) -> String {
    let sensor = entry
        .get("sensor")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let value = entry.get("value").map(format_value).unwrap_or_default();
    let topic = entry.get("topic").and_then(Value::as_str).unwrap_or("");
    let time = format_timestamp(entry.get("timestamp").and_then(Value::as_i64));
    format!("{} {:<12} {:>10}  {}", time, sensor, value, topic)
}

/// Scrolling list of the most recent messages, newest at the bottom
pub fn message_log(ui: &mut Ui, entries: &[Entry], height: f32) {
    create_frame(UiColors::INNER_BG, UiColors::BORDER).show(ui, |ui| {
        ui.set_min_height(height);
        ScrollArea::vertical()
            .stick_to_bottom(true)
            .auto_shrink([false, false])
            .show(ui, |ui| {
                for entry in entries {
                    create_frame(UiColors::EXTREME_BG, UiColors::BORDER).show(ui, |ui| {
                        let line = render_entry(entry);
                        let response = ui.add(
                            Label::new(line.as_str())
                                .selectable(true)
                                .sense(Sense::click()),
                        );
                        if response.clicked() {
                            ui.ctx().copy_text(line.clone());
                            info!("Copied message: {}", line);
                        }
                    });
                }
            });
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_entry_without_timestamp() {
        let entry = match json!({"sensor": "temp", "value": 21.5, "topic": "lab/x"}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let line = render_entry(&entry);
        assert!(line.starts_with("- temp"));
        assert!(line.contains("21.50"));
        assert!(line.ends_with("lab/x"));
    }
}
