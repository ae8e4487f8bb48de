use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rumqttc::QoS;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::mqtt::{MqttClient, MqttError, MqttMessage, Subscription};
use crate::timing::{Clock, SystemClock};

/// Columns every export starts with, in this order
pub const CSV_COLUMNS: [&str; 5] = ["timestamp", "sensor", "value", "topic", "device"];

/// One buffered message as received from the data topic
pub type Entry = Map<String, Value>;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("No command topic configured")]
    NoTopic,

    #[error("Command is empty")]
    Empty,

    #[error(transparent)]
    Mqtt(#[from] MqttError),
}

/// Fixed-capacity message window; the oldest entry goes first
#[derive(Debug, Clone, Default)]
pub struct MessageBuffer {
    entries: VecDeque<Entry>,
    capacity: usize,
}

impl MessageBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: Entry) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Up to `limit` most recent entries, oldest first
    pub fn latest(&self, limit: usize) -> Vec<Entry> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }
}

/// State touched by the MQTT network thread
struct Shared {
    buffer: Mutex<MessageBuffer>,
    capturing: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl Shared {
    fn ingest(&self, topic: &str, payload: &[u8]) -> bool {
        if !self.capturing.load(Ordering::SeqCst) {
            return false;
        }
        let text = String::from_utf8_lossy(payload);
        let mut entry = match serde_json::from_str::<Value>(text.trim()) {
            Ok(Value::Object(fields)) => fields,
            _ => {
                debug!("Non-JSON payload on {}, storing as raw", topic);
                let mut fields = Map::new();
                fields.insert("sensor".to_string(), Value::from("raw"));
                fields.insert("value".to_string(), Value::String(text.to_string()));
                fields
            }
        };
        entry
            .entry("timestamp")
            .or_insert_with(|| Value::from(self.clock.now_unix()));
        entry
            .entry("topic")
            .or_insert_with(|| Value::from(topic));

        self.buffer.lock().push(entry);
        true
    }
}

/// Dashboard side of the broker: buffers everything published on the data
/// topic while capture is on.
pub struct MqttDataHandler {
    shared: Arc<Shared>,
    topic: String,
    command_topic: Option<String>,
    csv_output: Option<PathBuf>,
    client: Option<MqttClient>,
    last_attempt: Option<Instant>,
}

impl MqttDataHandler {
    pub fn new(topic: impl Into<String>, history_size: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                buffer: Mutex::new(MessageBuffer::new(history_size)),
                capturing: AtomicBool::new(true),
                clock: Arc::new(SystemClock),
            }),
            topic: topic.into(),
            command_topic: None,
            csv_output: None,
            client: None,
            last_attempt: None,
        }
    }

    /// Topic operator commands go to; without one `send_command` refuses
    pub fn with_command_topic(mut self, topic: Option<String>) -> Self {
        self.command_topic = topic;
        self
    }

    pub fn with_csv_output(mut self, path: Option<PathBuf>) -> Self {
        self.csv_output = path;
        self
    }

    /// Call before `with_client`; the subscription captures the current state
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        let capacity = self.shared.buffer.lock().capacity();
        let capturing = self.is_capturing();
        self.shared = Arc::new(Shared {
            buffer: Mutex::new(MessageBuffer::new(capacity)),
            capturing: AtomicBool::new(capturing),
            clock,
        });
        self
    }

    /// Attach the client used by `start`; its subscription is replaced with
    /// the data topic
    pub fn with_client(mut self, client: MqttClient) -> Self {
        let shared = self.shared.clone();
        let subscription = Subscription::new(
            self.topic.clone(),
            Arc::new(move |message: MqttMessage| {
                shared.ingest(&message.topic, message.payload.as_bytes());
            }),
        );
        self.client = Some(client.with_subscription(subscription));
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn command_topic(&self) -> Option<&str> {
        self.command_topic.as_deref()
    }

    pub fn csv_output(&self) -> Option<&Path> {
        self.csv_output.as_deref()
    }

    /// Inbound message hook; returns whether the message was buffered
    pub fn ingest(&self, topic: &str, payload: &[u8]) -> bool {
        self.shared.ingest(topic, payload)
    }

    /// One bounded connect attempt; the subscription follows on success
    pub fn start(&mut self) -> Result<(), MqttError> {
        let Some(client) = self.client.as_mut() else {
            return Err(MqttError::NotConnected);
        };
        if client.is_connected() {
            return Ok(());
        }
        info!("Starting MQTT data handler for topic {}", self.topic);
        self.last_attempt = Some(Instant::now());
        client.try_connect()
    }

    /// Reconnect once the broker has been gone for a reconnect interval.
    ///
    /// Meant to be called often; returns the outcome only when an attempt was
    /// made. The subscription is renewed by the reconnect.
    pub fn maintain_connection(&mut self, now: Instant) -> Option<Result<(), MqttError>> {
        let client = self.client.as_mut()?;
        if client.is_connected() {
            return None;
        }
        let interval = client.settings().reconnect_interval;
        if self
            .last_attempt
            .is_some_and(|last| now.saturating_duration_since(last) < interval)
        {
            return None;
        }
        self.last_attempt = Some(now);
        debug!("Broker connection lost, reconnecting");
        Some(client.try_connect())
    }

    /// Publish operator text on the command topic over the current
    /// connection
    pub fn send_command(&mut self, command: &str) -> Result<(), CommandError> {
        let command = command.trim();
        if command.is_empty() {
            return Err(CommandError::Empty);
        }
        let topic = self.command_topic.as_deref().ok_or(CommandError::NoTopic)?;
        let client = self.client.as_mut().ok_or(MqttError::NotConnected)?;
        client.try_publish(topic, command, QoS::AtMostOnce, false)?;
        info!("Sent command {} to {}", command, topic);
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(client) = self.client.as_mut() {
            if client.is_connected() {
                info!("Stopping MQTT data handler");
            }
            client.stop();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.client.as_ref().is_some_and(MqttClient::is_connected)
    }

    /// Pausing capture leaves the subscription in place
    pub fn set_capture(&self, enabled: bool) {
        info!("Data capture {}", if enabled { "enabled" } else { "paused" });
        self.shared.capturing.store(enabled, Ordering::SeqCst);
    }

    pub fn is_capturing(&self) -> bool {
        self.shared.capturing.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.shared.buffer.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.shared.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.buffer.lock().is_empty()
    }

    pub fn latest_messages(&self, limit: usize) -> Vec<Entry> {
        self.shared.buffer.lock().latest(limit)
    }

    pub fn snapshot(&self) -> Vec<Entry> {
        self.shared.buffer.lock().iter().cloned().collect()
    }

    /// Write the buffer to the configured CSV path.
    ///
    /// `Ok(None)` when no path is configured or there is nothing to write.
    pub fn save_to_csv(&self) -> Result<Option<PathBuf>, ExportError> {
        let Some(path) = self.csv_output.clone() else {
            return Ok(None);
        };
        let entries = self.snapshot();
        if entries.is_empty() {
            return Ok(None);
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ExportError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&path, render_csv(&entries)).map_err(|source| ExportError::Write {
            path: path.clone(),
            source,
        })?;

        info!("Saved {} rows to {}", entries.len(), path.display());
        Ok(Some(path))
    }
}

impl Drop for MqttDataHandler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for MqttDataHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttDataHandler")
            .field("topic", &self.topic)
            .field("buffered", &self.len())
            .field("capturing", &self.is_capturing())
            .field("csv_output", &self.csv_output)
            .finish()
    }
}

/// Header plus one row per entry. Keys beyond [`CSV_COLUMNS`] follow in
/// sorted order; missing cells stay empty.
pub fn render_csv(entries: &[Entry]) -> String {
    let extra: BTreeSet<&str> = entries
        .iter()
        .flat_map(|entry| entry.keys())
        .map(String::as_str)
        .filter(|key| !CSV_COLUMNS.contains(key))
        .collect();
    let columns: Vec<&str> = CSV_COLUMNS.iter().copied().chain(extra).collect();

    let mut out = Vec::new();
    write_row(&mut out, columns.iter().map(|c| c.to_string()));
    for entry in entries {
        write_row(
            &mut out,
            columns
                .iter()
                .map(|column| entry.get(*column).map(cell).unwrap_or_default()),
        );
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn write_row(out: &mut Vec<u8>, cells: impl Iterator<Item = String>) {
    let row: Vec<String> = cells.map(|c| quote(&c)).collect();
    if let Err(e) = writeln!(out, "{}", row.join(",")) {
        warn!("Failed to render CSV row: {}", e);
    }
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn quote(text: &str) -> String {
    if text.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::FixedClock;
    use serde_json::json;

    fn handler(capacity: usize) -> MqttDataHandler {
        MqttDataHandler::new("lab/device1/data", capacity)
            .with_clock(Arc::new(FixedClock(1_700_000_000)))
    }

    fn values(entries: &[Entry]) -> Vec<Value> {
        entries.iter().map(|e| e["value"].clone()).collect()
    }

    #[test]
    fn test_buffer_keeps_last_n_in_order() {
        let handler = handler(3);
        for i in 0..5 {
            let payload = format!(r#"{{"sensor":"temp","value":{i}}}"#);
            assert!(handler.ingest("lab/device1/data", payload.as_bytes()));
        }

        let snapshot = handler.snapshot();
        assert_eq!(handler.len(), 3);
        assert_eq!(values(&snapshot), vec![json!(2), json!(3), json!(4)]);
    }

    #[test]
    fn test_non_object_payload_is_wrapped_as_raw() {
        let handler = handler(10);
        handler.ingest("lab/x", b"hello");
        handler.ingest("lab/x", b"[1,2]");

        let snapshot = handler.snapshot();
        assert_eq!(
            Value::Object(snapshot[0].clone()),
            json!({
                "sensor": "raw",
                "value": "hello",
                "timestamp": 1_700_000_000,
                "topic": "lab/x",
            })
        );
        assert_eq!(snapshot[1]["value"], json!("[1,2]"));
    }

    #[test]
    fn test_existing_timestamp_and_topic_are_kept() {
        let handler = handler(10);
        handler.ingest("lab/x", br#"{"value":1,"timestamp":5,"topic":"orig"}"#);

        let entry = &handler.snapshot()[0];
        assert_eq!(entry["timestamp"], json!(5));
        assert_eq!(entry["topic"], json!("orig"));
    }

    #[test]
    fn test_capture_toggle() {
        let handler = handler(10);
        handler.ingest("t", br#"{"value":1}"#);

        handler.set_capture(false);
        assert!(!handler.ingest("t", br#"{"value":2}"#));
        assert_eq!(values(&handler.snapshot()), vec![json!(1)]);

        handler.set_capture(true);
        assert!(handler.ingest("t", br#"{"value":3}"#));
        assert_eq!(values(&handler.snapshot()), vec![json!(1), json!(3)]);
    }

    #[test]
    fn test_latest_messages_and_clear() {
        let handler = handler(10);
        for i in 0..4 {
            handler.ingest("t", format!(r#"{{"value":{i}}}"#).as_bytes());
        }

        assert_eq!(values(&handler.latest_messages(2)), vec![json!(2), json!(3)]);
        assert_eq!(handler.latest_messages(20).len(), 4);

        handler.clear();
        assert!(handler.is_empty());
        assert!(handler.latest_messages(5).is_empty());
    }

    #[test]
    fn test_zero_capacity_buffers_nothing() {
        let handler = handler(0);
        handler.ingest("t", br#"{"value":1}"#);
        assert!(handler.is_empty());
    }

    #[test]
    fn test_save_without_path_or_data() {
        let handler = handler(10);
        assert!(handler.save_to_csv().unwrap().is_none());

        let handler = handler.with_csv_output(Some(PathBuf::from("unused.csv")));
        assert!(handler.save_to_csv().unwrap().is_none());
    }

    #[test]
    fn test_render_csv_columns_and_quoting() {
        let entries: Vec<Entry> = vec![
            json!({"timestamp": 1, "sensor": "temp", "value": 21.5, "topic": "t", "device": "d", "unit": "C"}),
            json!({"timestamp": 2, "sensor": "note", "value": "a,\"b\"", "topic": "t"}),
        ]
        .into_iter()
        .filter_map(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect();

        let csv = render_csv(&entries);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "timestamp,sensor,value,topic,device,unit");
        assert_eq!(lines[1], "1,temp,21.5,t,d,C");
        assert_eq!(lines[2], r#"2,note,"a,""b""",t,,"#);
    }

    #[test]
    fn test_send_command_checks_topic_and_text() {
        let mut handler = handler(1);
        assert!(matches!(handler.send_command("LED_ON"), Err(CommandError::NoTopic)));
        assert!(matches!(handler.send_command("  "), Err(CommandError::Empty)));

        let mut handler = handler.with_command_topic(Some("lab/device1/cmd".to_string()));
        assert_eq!(handler.command_topic(), Some("lab/device1/cmd"));
        assert!(matches!(
            handler.send_command("LED_ON"),
            Err(CommandError::Mqtt(MqttError::NotConnected))
        ));
    }

    #[test]
    fn test_maintain_connection_is_throttled_by_reconnect_interval() {
        use crate::mqtt::MqttSettings;
        use crate::retry::{RetryPolicy, ShutdownSignal};
        use crate::timing::RecordingSleeper;
        use std::net::TcpListener;
        use std::time::Duration;

        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let settings = MqttSettings {
            host: "127.0.0.1".to_string(),
            port,
            reconnect_interval: Duration::from_secs(5),
            ..MqttSettings::default()
        };
        let retry = RetryPolicy::new(
            settings.reconnect_interval,
            Arc::new(RecordingSleeper::new()),
            ShutdownSignal::new(),
        );
        let mut handler = handler(1).with_client(MqttClient::new(settings, retry));

        let t0 = Instant::now();
        assert!(matches!(handler.maintain_connection(t0), Some(Err(_))));
        assert!(handler.maintain_connection(t0 + Duration::from_secs(1)).is_none());
        assert!(handler.maintain_connection(t0 + Duration::from_secs(4)).is_none());
        assert!(matches!(
            handler.maintain_connection(t0 + Duration::from_secs(5)),
            Some(Err(_))
        ));
        assert!(!handler.is_connected());
    }

    #[test]
    fn test_maintain_connection_without_client_does_nothing() {
        let mut handler = handler(1);
        assert!(handler.maintain_connection(Instant::now()).is_none());
    }

    #[test]
    fn test_start_without_client_fails() {
        let mut handler = handler(1);
        assert!(matches!(handler.start(), Err(MqttError::NotConnected)));
        assert!(!handler.is_connected());
    }
}
