//! Normalises raw serial lines into canonical sensor records
//!
//! A device may print JSON objects, `name:value` / `name=value` pairs, or bare
//! values. All three shapes end up as a [`Record`] carrying `device`, `sensor`,
//! `value` and `timestamp`. Lines that cannot yield a record are not errors;
//! [`MessageParser::parse`] simply returns `None`.

use crate::timing::{Clock, SystemClock};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

const DELIMITERS: [char; 2] = [':', '='];

/// Canonical sensor reading.
///
/// Immutable once built: the parser is the only producer, downstream code
/// only reads and serialises it.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    pub fn device(&self) -> Option<&str> {
        self.fields.get("device").and_then(Value::as_str)
    }

    pub fn sensor(&self) -> Option<&str> {
        self.fields.get("sensor").and_then(Value::as_str)
    }

    pub fn value(&self) -> Option<&Value> {
        self.fields.get("value")
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.fields.get("timestamp").and_then(Value::as_i64)
    }

    /// Any field, including passthrough keys from JSON input
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Wire form: a JSON object with deterministically ordered keys
    pub fn to_json(&self) -> String {
        Value::Object(self.fields.clone()).to_string()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

/// Coerce a textual value: with a `.` try a float, otherwise an integer, and
/// keep the input string verbatim if that fails. Surrounding whitespace is
/// ignored for the numeric attempts only.
pub fn coerce_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.contains('.') {
        if let Some(number) = trimmed
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
        {
            return Value::Number(number);
        }
    } else if let Ok(int) = trimmed.parse::<i64>() {
        return Value::from(int);
    } else if let Ok(uint) = trimmed.parse::<u64>() {
        return Value::from(uint);
    }
    Value::String(raw.to_string())
}

pub struct MessageParser {
    device_id: String,
    default_sensor: String,
    clock: Arc<dyn Clock>,
}

impl MessageParser {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            default_sensor: "sensor".to_string(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_default_sensor(mut self, name: impl Into<String>) -> Self {
        self.default_sensor = name.into();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn parse(&self, raw: &str) -> Option<Record> {
        let line = raw.trim();
        if line.is_empty() {
            return None;
        }
        let timestamp = self.clock.now_unix();

        if let Some(record) = self.parse_object(line, timestamp) {
            debug!("Parsed JSON payload: {}", record);
            return Some(record);
        }

        let (sensor, value) = match split_once_any(line) {
            Some((left, right)) => {
                let sensor = if left.is_empty() {
                    self.default_sensor.clone()
                } else {
                    left.to_string()
                };
                (sensor, coerce_value(right))
            }
            None => (self.default_sensor.clone(), coerce_value(line)),
        };

        let mut fields = Map::new();
        fields.insert("device".to_string(), Value::String(self.device_id.clone()));
        fields.insert("sensor".to_string(), Value::String(sensor));
        fields.insert("value".to_string(), value);
        fields.insert("timestamp".to_string(), Value::from(timestamp));

        let record = Record { fields };
        debug!("Parsed payload: {}", record);
        Some(record)
    }

    /// Only JSON objects qualify; arrays and scalars fall through to the
    /// delimiter path.
    fn parse_object(&self, line: &str, timestamp: i64) -> Option<Record> {
        let Ok(Value::Object(mut fields)) = serde_json::from_str::<Value>(line) else {
            return None;
        };
        fields
            .entry("device")
            .or_insert_with(|| Value::String(self.device_id.clone()));
        fields
            .entry("timestamp")
            .or_insert_with(|| Value::from(timestamp));
        if let Some(Value::String(text)) = fields.get("value") {
            let coerced = coerce_value(text);
            fields.insert("value".to_string(), coerced);
        }
        Some(Record { fields })
    }
}

/// Split at the first `:`; failing that, at the first `=`. Both sides trimmed.
fn split_once_any(line: &str) -> Option<(&str, &str)> {
    DELIMITERS
        .iter()
        .find_map(|d| line.split_once(*d))
        .map(|(left, right)| (left.trim(), right.trim()))
}
