//! # Dashboard Data
//!
//! Broker-side view of the sensor stream. [`MqttDataHandler`] keeps a bounded
//! window of everything published on the data topic; [`sensor_summaries`]
//! condenses that window into one row per sensor for the UI and
//! [`sensor_series`] turns it into chart lines.

pub mod data_handler;

use std::collections::BTreeMap;

use serde_json::Value;

pub use data_handler::{CommandError, Entry, ExportError, MessageBuffer, MqttDataHandler};

/// Latest reading and message count for one sensor
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSummary {
    pub sensor: String,
    pub latest: Value,
    pub count: usize,
    pub last_timestamp: Option<i64>,
}

/// One summary per sensor name, sorted by name. Entries without a `sensor`
/// key are grouped under `"unknown"`.
pub fn sensor_summaries(entries: &[Entry]) -> Vec<SensorSummary> {
    let mut by_sensor: BTreeMap<String, SensorSummary> = BTreeMap::new();
    for entry in entries {
        let name = entry
            .get("sensor")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let latest = entry.get("value").cloned().unwrap_or(Value::Null);
        let timestamp = entry.get("timestamp").and_then(Value::as_i64);

        let summary = by_sensor
            .entry(name.clone())
            .or_insert_with(|| SensorSummary {
                sensor: name,
                latest: Value::Null,
                count: 0,
                last_timestamp: None,
            });
        summary.count += 1;
        summary.latest = latest;
        if timestamp.is_some() {
            summary.last_timestamp = timestamp;
        }
    }
    by_sensor.into_values().collect()
}

/// `[timestamp, value]` points per sensor, sorted by time. Only numeric
/// values with a timestamp are plotted; when a sensor reports twice in the
/// same second the later value wins.
pub fn sensor_series(entries: &[Entry]) -> BTreeMap<String, Vec<[f64; 2]>> {
    let mut points: BTreeMap<String, BTreeMap<i64, f64>> = BTreeMap::new();
    for entry in entries {
        let (Some(timestamp), Some(value)) = (
            entry.get("timestamp").and_then(Value::as_i64),
            entry.get("value").and_then(Value::as_f64),
        ) else {
            continue;
        };
        let name = entry
            .get("sensor")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        points
            .entry(name.to_string())
            .or_default()
            .insert(timestamp, value);
    }
    points
        .into_iter()
        .map(|(sensor, by_time)| {
            let line = by_time
                .into_iter()
                .map(|(t, v)| [t as f64, v])
                .collect();
            (sensor, line)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(value: Value) -> Entry {
        match value {
            Value::Object(map) => map,
            _ => Entry::new(),
        }
    }

    #[test]
    fn test_summaries_track_latest_value_per_sensor() {
        let entries = vec![
            entry(json!({"sensor": "temp", "value": 20.0, "timestamp": 1})),
            entry(json!({"sensor": "hum", "value": 40, "timestamp": 2})),
            entry(json!({"sensor": "temp", "value": 21.5, "timestamp": 3})),
            entry(json!({"value": "x"})),
        ];

        let summaries = sensor_summaries(&entries);

        let names: Vec<&str> = summaries.iter().map(|s| s.sensor.as_str()).collect();
        assert_eq!(names, vec!["hum", "temp", "unknown"]);
        assert_eq!(summaries[1].count, 2);
        assert_eq!(summaries[1].latest, json!(21.5));
        assert_eq!(summaries[1].last_timestamp, Some(3));
        assert_eq!(summaries[2].last_timestamp, None);
    }

    #[test]
    fn test_empty_window_has_no_summaries() {
        assert!(sensor_summaries(&[]).is_empty());
    }

    #[test]
    fn test_series_sorted_by_time_with_last_value_per_second() {
        let entries = vec![
            entry(json!({"sensor": "temp", "value": 21.0, "timestamp": 5})),
            entry(json!({"sensor": "temp", "value": 20.0, "timestamp": 3})),
            entry(json!({"sensor": "temp", "value": 22.5, "timestamp": 5})),
            entry(json!({"sensor": "hum", "value": 40, "timestamp": 4})),
        ];

        let series = sensor_series(&entries);

        assert_eq!(series.len(), 2);
        assert_eq!(series["temp"], vec![[3.0, 20.0], [5.0, 22.5]]);
        assert_eq!(series["hum"], vec![[4.0, 40.0]]);
    }

    #[test]
    fn test_series_skips_text_and_untimed_values() {
        let entries = vec![
            entry(json!({"sensor": "raw", "value": "boot", "timestamp": 1})),
            entry(json!({"sensor": "temp", "value": 20.0})),
            entry(json!({"value": 1, "timestamp": 2})),
        ];

        let series = sensor_series(&entries);

        assert_eq!(series.keys().collect::<Vec<_>>(), vec!["unknown"]);
        assert_eq!(series["unknown"], vec![[2.0, 1.0]]);
    }
}
