use chrono::{DateTime, Local};
use std::fmt;
use std::sync::Arc;

const PREVIEW_CHARS: usize = 40;

/// Inbound message with its payload decoded as lossy UTF-8
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
    pub received_at: DateTime<Local>,
}

impl MqttMessage {
    pub fn from_publish(topic: impl Into<String>, payload: &[u8]) -> Self {
        MqttMessage {
            topic: topic.into(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            received_at: Local::now(),
        }
    }

    /// Payload shortened for log lines
    pub fn preview(&self) -> String {
        let mut preview: String = self.payload.chars().take(PREVIEW_CHARS).collect();
        if self.payload.chars().count() > PREVIEW_CHARS {
            preview.push('…');
        }
        preview
    }
}

impl fmt::Display for MqttMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} - {}",
            self.received_at.format("%H:%M:%S"),
            self.topic,
            self.preview()
        )
    }
}

/// Called on the network thread for every message on the subscribed topic
pub type MessageCallback = Arc<dyn Fn(MqttMessage) + Send + Sync>;

/// Topic the client (re)subscribes to after every successful connect
#[derive(Clone)]
pub struct Subscription {
    pub topic: String,
    pub callback: MessageCallback,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, callback: MessageCallback) -> Self {
        Self {
            topic: topic.into(),
            callback,
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_is_decoded_lossily() {
        let message = MqttMessage::from_publish("lab/cmd", b"LED\xffON");
        assert_eq!(message.topic, "lab/cmd");
        assert!(message.payload.starts_with("LED"));
        assert!(message.payload.ends_with("ON"));
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        let message = MqttMessage::from_publish("t", "é".repeat(60).as_bytes());
        let preview = message.preview();
        assert_eq!(preview.chars().count(), PREVIEW_CHARS + 1);
        assert!(preview.ends_with('…'));

        let short = MqttMessage::from_publish("t", b"ok");
        assert_eq!(short.preview(), "ok");
    }
}
