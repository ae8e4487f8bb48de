use eframe::egui::Ui;
use egui_plot::{Legend, Line, Plot, PlotPoints};

use super::common::{create_frame, format_timestamp, UiColors};
use crate::dashboard::{sensor_series, Entry};

/// Value over time, one line per sensor
pub fn live_chart(ui: &mut Ui, entries: &[Entry], height: f32) {
    let series = sensor_series(entries);
    create_frame(UiColors::INNER_BG, UiColors::BORDER).show(ui, |ui| {
        if series.is_empty() {
            ui.colored_label(UiColors::NOTICE, "No numeric readings to plot yet.");
            return;
        }
        Plot::new("live_sensor_chart")
            .height(height)
            .legend(Legend::default())
            .x_axis_formatter(|mark, _range| format_timestamp(Some(mark.value as i64)))
            .label_formatter(|name, point| {
                format!("{}\n{}  {:.2}", name, format_timestamp(Some(point.x as i64)), point.y)
            })
            .show(ui, |plot_ui| {
                for (sensor, points) in series {
                    plot_ui.line(Line::new(PlotPoints::from(points)).name(sensor));
                }
            });
    });
}
