//! # UI Common Components and Utilities
//!
//! Palette, frame styling and small formatting helpers shared by the dashboard
//! panels. Everything here is stateless; egui rebuilds the view every frame.

use eframe::egui::{Color32, Frame, RichText, Stroke};
use serde_json::Value;

/// Dark theme palette for the dashboard.
///
/// Background colors go from darkest to lightest: EXTREME_BG → INNER_BG →
/// MAIN_BG. ACTIVE and INACTIVE mark broker and capture state.
pub struct UiColors;

impl UiColors {
    /// Primary background color for main content areas (RGB: 30, 30, 30)
    pub const MAIN_BG: Color32 = Color32::from_rgb(30, 30, 30);

    /// Secondary background color for nested components (RGB: 25, 25, 25)
    pub const INNER_BG: Color32 = Color32::from_rgb(25, 25, 25);

    /// Deepest background color for log entries (RGB: 20, 20, 20)
    pub const EXTREME_BG: Color32 = Color32::from_rgb(20, 20, 20);

    /// Border color for component separation (RGB: 60, 60, 60)
    pub const BORDER: Color32 = Color32::from_rgb(60, 60, 60);

    /// Connected / capturing (RGB: 50, 200, 20)
    pub const ACTIVE: Color32 = Color32::from_rgb(50, 200, 20);

    /// Disconnected / paused (RGB: 200, 50, 20)
    pub const INACTIVE: Color32 = Color32::from_rgb(200, 50, 20);

    /// Informational banners (RGB: 200, 170, 40)
    pub const NOTICE: Color32 = Color32::from_rgb(200, 170, 40);
}

/// Bordered frame with the dashboard's standard margins
pub fn create_frame(bg_color: Color32, border_color: Color32) -> Frame {
    Frame::new()
        .stroke(Stroke::new(1.0, border_color))
        .fill(bg_color)
        .inner_margin(4)
        .outer_margin(2)
}

/// Colored dot followed by a label, e.g. broker status
pub fn status_text(active: bool, label: &str) -> RichText {
    let color = if active {
        UiColors::ACTIVE
    } else {
        UiColors::INACTIVE
    };
    RichText::new(format!("● {}", label)).color(color)
}

/// Render a JSON value for a table cell; strings lose their quotes
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(text) => text.clone(),
        Value::Number(number) => match number.as_f64() {
            Some(float) if number.is_f64() => format!("{:.2}", float),
            _ => number.to_string(),
        },
        other => other.to_string(),
    }
}

/// `HH:MM:SS` in local time for a Unix timestamp; `-` when out of range
pub fn format_timestamp(timestamp: Option<i64>) -> String {
    timestamp
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(|utc| {
            utc.with_timezone(&chrono::Local)
                .format("%H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&json!(21.456)), "21.46");
        assert_eq!(format_value(&json!(40)), "40");
        assert_eq!(format_value(&json!("ON")), "ON");
        assert_eq!(format_value(&Value::Null), "-");
    }

    #[test]
    fn test_format_timestamp_handles_missing() {
        assert_eq!(format_timestamp(None), "-");
        assert_eq!(format_timestamp(Some(1_700_000_000)).len(), 8);
    }
}
