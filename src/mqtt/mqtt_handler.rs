use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rumqttc::{Client, ConnectReturnCode, Connection, Event, Outgoing, Packet, QoS};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::config::MqttSettings;
use super::message_manager::{MqttMessage, Subscription};
use crate::retry::{Failure, RetryPolicy};

const REQUEST_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum MqttError {
    #[error("No CONNACK from {endpoint} within {timeout:?}")]
    ConnectTimeout { endpoint: String, timeout: Duration },

    #[error("Connection to MQTT broker failed: {0}")]
    ConnectFailed(String),

    #[error("MQTT broker refused the connection: {0}")]
    Refused(String),

    #[error("Failed to start MQTT network thread: {0}")]
    Spawn(String),

    #[error("MQTT client request failed: {0}")]
    Request(#[from] rumqttc::ClientError),

    #[error("Publish not confirmed within {0:?}")]
    AckTimeout(Duration),

    #[error("Not connected to MQTT broker")]
    NotConnected,
}

/// Progress reports from the network thread for in-flight publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    /// Publish packet written to the socket
    Written,
    /// PUBACK (QoS 1) or PUBCOMP (QoS 2)
    Acked,
    /// Network loop ended
    Lost,
}

/// State shared with one network thread. Each connection attempt gets its
/// own, so a late CONNACK on an abandoned attempt cannot mark the client
/// connected.
#[derive(Debug, Default)]
struct Link {
    connected: AtomicBool,
    abandoned: AtomicBool,
}

struct Session {
    client: Client,
    link: Arc<Link>,
    deliveries: Mutex<mpsc::Receiver<Delivery>>,
    /// Signalled by the network thread as its last act
    finished: Mutex<mpsc::Receiver<()>>,
    worker: Option<JoinHandle<()>>,
}

impl Session {
    fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::SeqCst)
    }

    /// Ask the network thread to stop and wait up to `grace` for it
    fn close(mut self, grace: Duration) {
        self.link.abandoned.store(true, Ordering::SeqCst);
        if let Err(e) = self.client.try_disconnect() {
            debug!("MQTT disconnect request not queued: {}", e);
        }
        if let Some(worker) = self.worker.take() {
            match self.finished.lock().recv_timeout(grace) {
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                    let _ = worker.join();
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    debug!("MQTT network thread still winding down, detaching");
                }
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.link.abandoned.store(true, Ordering::SeqCst);
    }
}

/// Blocking MQTT client with lazy reconnection.
///
/// Network I/O runs on a dedicated thread per connection. `connect`,
/// `publish` and `stop` block the caller for bounded periods and never
/// return transport errors; failures are logged and retried or dropped.
pub struct MqttClient {
    settings: MqttSettings,
    retry: RetryPolicy,
    subscription: Option<Subscription>,
    session: Option<Session>,
}

impl MqttClient {
    pub fn new(settings: MqttSettings, retry: RetryPolicy) -> Self {
        Self {
            settings,
            retry,
            subscription: None,
            session: None,
        }
    }

    /// Subscribe to `subscription.topic` after every successful connect
    pub fn with_subscription(mut self, subscription: Subscription) -> Self {
        self.subscription = Some(subscription);
        self
    }

    pub fn settings(&self) -> &MqttSettings {
        &self.settings
    }

    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_connected)
    }

    /// Block until the broker has accepted the connection, retrying every
    /// reconnect interval. Gives up only when shutdown is requested.
    pub fn connect(&mut self) {
        if self.is_connected() {
            return;
        }
        let retry = self.retry.clone();
        let outcome = retry.run("MQTT connection", || {
            self.try_connect().map_err(Failure::Transient)
        });
        if let Ok(None) = outcome {
            info!("MQTT connect abandoned");
        }
    }

    /// One bounded connection attempt
    pub fn try_connect(&mut self) -> Result<(), MqttError> {
        if let Some(stale) = self.session.take() {
            stale.close(Duration::ZERO);
        }

        let endpoint = self.settings.endpoint();
        info!("Connecting to MQTT broker at {}", endpoint);

        let (client, connection) = Client::new(self.settings.options(), REQUEST_CAPACITY);
        let link = Arc::new(Link::default());
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let (delivery_tx, delivery_rx) = mpsc::channel();
        let (finished_tx, finished_rx) = mpsc::channel();

        let worker = {
            let network = NetworkLoop {
                client: client.clone(),
                link: link.clone(),
                ready: ready_tx,
                deliveries: delivery_tx,
                finished: finished_tx,
                subscription: self.subscription.clone(),
                endpoint: endpoint.clone(),
            };
            thread::Builder::new()
                .name("mqtt-network".to_string())
                .spawn(move || network.run(connection))
                .map_err(|e| MqttError::Spawn(e.to_string()))?
        };

        let session = Session {
            client,
            link,
            deliveries: Mutex::new(delivery_rx),
            finished: Mutex::new(finished_rx),
            worker: Some(worker),
        };

        match ready_rx.recv_timeout(self.settings.connect_timeout) {
            Ok(Ok(())) => {
                self.session = Some(session);
                Ok(())
            }
            Ok(Err(e)) => {
                session.close(Duration::ZERO);
                Err(e)
            }
            Err(_) => {
                session.close(Duration::ZERO);
                Err(MqttError::ConnectTimeout {
                    endpoint,
                    timeout: self.settings.connect_timeout,
                })
            }
        }
    }

    /// Publish and wait for the broker to take it.
    ///
    /// Connects first if needed. On failure the message is dropped, the
    /// client is marked disconnected and the caller is held for one
    /// reconnect interval.
    pub fn publish(&mut self, topic: &str, payload: impl Into<Vec<u8>>, qos: QoS, retain: bool) {
        if !self.is_connected() {
            self.connect();
        }
        match self.try_publish(topic, payload, qos, retain) {
            Ok(()) => {}
            Err(MqttError::NotConnected) => {
                debug!("Dropping publish to {}: not connected", topic)
            }
            Err(e) => {
                error!("Failed to publish MQTT message: {}", e);
                self.retry.pause();
            }
        }
    }

    /// Publish on the current connection without connecting or waiting.
    ///
    /// Any failure other than `NotConnected` tears the connection down.
    pub fn try_publish(
        &mut self,
        topic: &str,
        payload: impl Into<Vec<u8>>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError> {
        let payload = payload.into();
        let preview = String::from_utf8_lossy(&payload).into_owned();
        match self.deliver(topic, payload, qos, retain) {
            Ok(()) => {
                info!("Published to {}: {}", topic, preview);
                Ok(())
            }
            Err(MqttError::NotConnected) => Err(MqttError::NotConnected),
            Err(e) => {
                self.mark_disconnected();
                Err(e)
            }
        }
    }

    /// Idempotent; disconnects only when connected
    pub fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        if session.is_connected() {
            info!("Stopping MQTT client");
            session.close(self.settings.connect_timeout);
        } else {
            session.close(Duration::ZERO);
        }
    }

    fn deliver(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError> {
        let session = match self.session.as_ref() {
            Some(session) if session.is_connected() => session,
            _ => return Err(MqttError::NotConnected),
        };
        let deliveries = session.deliveries.lock();
        while deliveries.try_recv().is_ok() {}

        session.client.try_publish(topic, qos, retain, payload)?;

        let timeout = self.settings.ack_timeout;
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match deliveries.recv_timeout(remaining) {
                Ok(Delivery::Written) if qos == QoS::AtMostOnce => return Ok(()),
                Ok(Delivery::Acked) if qos != QoS::AtMostOnce => return Ok(()),
                Ok(Delivery::Lost) => {
                    return Err(MqttError::ConnectFailed("connection lost".to_string()))
                }
                Ok(_) => continue,
                Err(mpsc::RecvTimeoutError::Timeout) => return Err(MqttError::AckTimeout(timeout)),
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(MqttError::ConnectFailed("network thread ended".to_string()))
                }
            }
        }
    }

    fn mark_disconnected(&mut self) {
        if let Some(session) = self.session.take() {
            session.close(Duration::ZERO);
        }
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        self.mark_disconnected();
    }
}

impl std::fmt::Debug for MqttClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttClient")
            .field("endpoint", &self.settings.endpoint())
            .field("connected", &self.is_connected())
            .field("subscription", &self.subscription)
            .finish()
    }
}

/// Body of the network thread for one connection
struct NetworkLoop {
    client: Client,
    link: Arc<Link>,
    ready: mpsc::SyncSender<Result<(), MqttError>>,
    deliveries: mpsc::Sender<Delivery>,
    finished: mpsc::Sender<()>,
    subscription: Option<Subscription>,
    endpoint: String,
}

impl NetworkLoop {
    fn run(self, mut connection: Connection) {
        for notification in connection.iter() {
            if self.link.abandoned.load(Ordering::SeqCst) {
                break;
            }
            match notification {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        error!("MQTT connection failed with code {:?}", ack.code);
                        let _ = self
                            .ready
                            .try_send(Err(MqttError::Refused(format!("{:?}", ack.code))));
                        break;
                    }
                    self.on_connected();
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if let Some(subscription) = &self.subscription {
                        let message = MqttMessage::from_publish(publish.topic, &publish.payload);
                        debug!("Received message on {}: {}", message.topic, message.preview());
                        (subscription.callback)(message);
                    }
                }
                Ok(Event::Incoming(Packet::PubAck(_))) | Ok(Event::Incoming(Packet::PubComp(_))) => {
                    let _ = self.deliveries.send(Delivery::Acked);
                }
                Ok(Event::Outgoing(Outgoing::Publish(_))) => {
                    let _ = self.deliveries.send(Delivery::Written);
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("MQTT broker closed the session");
                    break;
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!("MQTT disconnect sent");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    if self.link.connected.load(Ordering::SeqCst) {
                        warn!("MQTT disconnected: {}", e);
                    } else {
                        let _ = self.ready.try_send(Err(MqttError::ConnectFailed(e.to_string())));
                    }
                    break;
                }
            }
        }
        self.link.connected.store(false, Ordering::SeqCst);
        let _ = self.deliveries.send(Delivery::Lost);
        let _ = self.finished.send(());
    }

    fn on_connected(&self) {
        info!("Connected to MQTT broker at {}", self.endpoint);
        self.link.connected.store(true, Ordering::SeqCst);
        if let Some(subscription) = &self.subscription {
            match self
                .client
                .try_subscribe(subscription.topic.as_str(), QoS::AtMostOnce)
            {
                Ok(()) => info!("Subscribed to topic {}", subscription.topic),
                Err(e) => warn!("Failed to subscribe to {}: {}", subscription.topic, e),
            }
        }
        let _ = self.ready.try_send(Ok(()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::ShutdownSignal;
    use crate::timing::RecordingSleeper;

    fn client() -> MqttClient {
        let retry = RetryPolicy::new(
            Duration::from_secs(5),
            Arc::new(RecordingSleeper::new()),
            ShutdownSignal::new(),
        );
        MqttClient::new(MqttSettings::default(), retry)
    }

    /// Session around a stand-in network thread that finishes after `delay`
    fn session(delay: Duration) -> (Session, Arc<AtomicBool>) {
        let (client, _connection) = Client::new(MqttSettings::default().options(), 1);
        let (_delivery_tx, delivery_rx) = mpsc::channel();
        let (finished_tx, finished_rx) = mpsc::channel();
        let done = Arc::new(AtomicBool::new(false));
        let worker = {
            let done = done.clone();
            thread::spawn(move || {
                thread::sleep(delay);
                done.store(true, Ordering::SeqCst);
                let _ = finished_tx.send(());
            })
        };
        let session = Session {
            client,
            link: Arc::new(Link::default()),
            deliveries: Mutex::new(delivery_rx),
            finished: Mutex::new(finished_rx),
            worker: Some(worker),
        };
        (session, done)
    }

    #[test]
    fn test_close_waits_for_network_thread_within_grace() {
        let (session, done) = session(Duration::from_millis(50));
        let link = session.link.clone();

        session.close(Duration::from_secs(5));

        assert!(done.load(Ordering::SeqCst));
        assert!(link.abandoned.load(Ordering::SeqCst));
    }

    #[test]
    fn test_close_without_grace_detaches_busy_thread() {
        let (session, done) = session(Duration::from_secs(2));
        let started = Instant::now();

        session.close(Duration::ZERO);

        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!done.load(Ordering::SeqCst));
    }

    #[test]
    fn test_new_client_starts_disconnected() {
        let client = client();
        assert!(!client.is_connected());
    }

    #[test]
    fn test_stop_without_connection_is_noop() {
        let mut client = client();
        client.stop();
        client.stop();
        assert!(!client.is_connected());
    }

    #[test]
    fn test_connect_gives_up_on_shutdown() {
        let shutdown = ShutdownSignal::new();
        shutdown.request();
        let retry = RetryPolicy::new(
            Duration::from_secs(5),
            Arc::new(RecordingSleeper::new()),
            shutdown,
        );
        let mut client = MqttClient::new(MqttSettings::default(), retry);

        client.connect();
        client.publish("lab/device1/data", "x", QoS::AtMostOnce, false);

        assert!(!client.is_connected());
    }
}
