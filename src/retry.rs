//! Fixed-interval retry and cooperative shutdown
//!
//! Both transports reconnect the same way: try, log the failure, wait one
//! reconnect interval, try again. [`RetryPolicy`] captures that loop once.
//! The loop only stops for a fatal failure or when the shared
//! [`ShutdownSignal`] has been raised, usually by [`listen_for_signals`].

use crate::timing::Sleeper;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cloneable stop flag shared by the controller, the serial reader and the
/// MQTT client
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    requested: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Returns `true` only for the call that raised it.
    pub fn request(&self) -> bool {
        !self.requested.swap(true, Ordering::SeqCst)
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Raise `shutdown` on SIGINT or SIGTERM.
///
/// Signals are awaited on a single-threaded tokio runtime owned by a
/// dedicated thread, so the blocking components never see async code.
pub fn listen_for_signals(shutdown: ShutdownSignal) -> io::Result<JoinHandle<()>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                let signal = wait_for_signal().await;
                if shutdown.request() {
                    info!(signal, "Shutdown requested");
                }
            })
        })
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        },
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for SIGINT: {}", e);
                std::future::pending::<()>().await;
            }
            "SIGINT"
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    "Ctrl-C"
}

/// Outcome classification for a single attempt
#[derive(Debug)]
pub enum Failure<E> {
    /// Log, wait, try again
    Transient(E),
    /// Give up and hand the error to the caller
    Fatal(E),
}

/// Retry-forever loop parameterised by interval and sleeper
#[derive(Clone)]
pub struct RetryPolicy {
    interval: Duration,
    sleeper: Arc<dyn Sleeper>,
    shutdown: ShutdownSignal,
}

impl RetryPolicy {
    pub fn new(interval: Duration, sleeper: Arc<dyn Sleeper>, shutdown: ShutdownSignal) -> Self {
        Self {
            interval,
            sleeper,
            shutdown,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn sleeper(&self) -> &Arc<dyn Sleeper> {
        &self.sleeper
    }

    pub fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Wait one interval
    pub fn pause(&self) {
        self.sleeper.sleep(self.interval);
    }

    /// Run `op` until it succeeds.
    ///
    /// Returns `Ok(None)` when shutdown was requested before an attempt could
    /// succeed, and `Err` as soon as an attempt reports a fatal failure.
    pub fn run<T, E, F>(&self, label: &str, mut op: F) -> Result<Option<T>, E>
    where
        E: fmt::Display,
        F: FnMut() -> Result<T, Failure<E>>,
    {
        let mut attempt: u64 = 0;
        loop {
            if self.shutdown.is_requested() {
                debug!("{} abandoned: shutdown requested", label);
                return Ok(None);
            }
            attempt += 1;
            match op() {
                Ok(value) => return Ok(Some(value)),
                Err(Failure::Fatal(e)) => return Err(e),
                Err(Failure::Transient(e)) => {
                    warn!(
                        attempt,
                        error = %e,
                        "{} failed, retrying in {:?}",
                        label,
                        self.interval
                    );
                    self.pause();
                }
            }
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("interval", &self.interval)
            .field("shutdown", &self.shutdown.is_requested())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::RecordingSleeper;

    fn policy(sleeper: Arc<RecordingSleeper>, shutdown: ShutdownSignal) -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(5), sleeper, shutdown)
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let sleeper = Arc::new(RecordingSleeper::new());
        let retry = policy(sleeper.clone(), ShutdownSignal::new());

        let mut calls = 0;
        let result: Result<Option<u32>, String> = retry.run("open", || {
            calls += 1;
            if calls < 3 {
                Err(Failure::Transient(format!("busy #{calls}")))
            } else {
                Ok(42)
            }
        });

        assert_eq!(result.unwrap(), Some(42));
        assert_eq!(calls, 3);
        assert_eq!(sleeper.calls(), vec![Duration::from_secs(5); 2]);
    }

    #[test]
    fn test_fatal_failure_is_not_retried() {
        let sleeper = Arc::new(RecordingSleeper::new());
        let retry = policy(sleeper.clone(), ShutdownSignal::new());

        let mut calls = 0;
        let result: Result<Option<()>, String> = retry.run("open", || {
            calls += 1;
            Err(Failure::Fatal("no driver".to_string()))
        });

        assert_eq!(result.unwrap_err(), "no driver");
        assert_eq!(calls, 1);
        assert_eq!(sleeper.count(), 0);
    }

    #[test]
    fn test_shutdown_stops_the_loop_between_attempts() {
        let sleeper = Arc::new(RecordingSleeper::new());
        let shutdown = ShutdownSignal::new();
        let retry = policy(sleeper.clone(), shutdown.clone());

        let mut calls = 0;
        let result: Result<Option<()>, String> = retry.run("connect", || {
            calls += 1;
            shutdown.request();
            Err(Failure::Transient("refused".to_string()))
        });

        assert_eq!(result.unwrap(), None);
        assert_eq!(calls, 1);
        assert_eq!(sleeper.count(), 1);
    }

    #[test]
    fn test_shutdown_request_reports_first_caller_only() {
        let signal = ShutdownSignal::new();
        let clone = signal.clone();
        assert!(!signal.is_requested());
        assert!(clone.request());
        assert!(!signal.request());
        assert!(signal.is_requested());
    }
}
