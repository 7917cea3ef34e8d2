//! Decides when a consumer should stop, then stops it exactly once.
use crate::consumers::{done::Outcome, lifecycle::TeardownError, Consumer};
use shutdown_handler::ShutdownHandler;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::SignalKind;

/// What caused the consumer to shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// The process received SIGINT or SIGTERM, or a shutdown was requested programmatically.
    Signal,
    /// The configured lifetime elapsed.
    Lifetime,
    /// The consumer reported its terminal outcome on its own.
    Done,
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal => write!(f, "signal"),
            Self::Lifetime => write!(f, "lifetime"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// How a supervised consumer ended.
#[derive(Debug)]
pub struct ShutdownReport {
    pub trigger: ShutdownTrigger,
    /// The consumer's terminal outcome, if it was reported by the end of the teardown.
    pub outcome: Option<Outcome>,
    pub teardown: Result<(), TeardownError>,
}

impl ShutdownReport {
    /// `true` if neither the consumer nor its teardown reported a failure.
    pub fn is_clean(&self) -> bool {
        !matches!(self.outcome, Some(Err(_))) && self.teardown.is_ok()
    }
}

/// Races the three ways a consumer can be asked to stop:
/// - a shutdown signal;
/// - the expiry of its lifetime, if one was configured;
/// - the consumer reporting its own terminal outcome.
///
/// Whichever happens first wins, the others are ignored.
pub struct ShutdownCoordinator {
    signal: Arc<ShutdownHandler>,
    lifetime: Option<Duration>,
}

impl ShutdownCoordinator {
    pub fn new(signal: Arc<ShutdownHandler>) -> Self {
        Self {
            signal,
            lifetime: None,
        }
    }

    /// Shut the consumer down once `lifetime` has elapsed.
    ///
    /// A zero lifetime means "run until stopped".
    pub fn with_lifetime(self, lifetime: Duration) -> Self {
        Self {
            lifetime: (!lifetime.is_zero()).then_some(lifetime),
            ..self
        }
    }

    /// Wait for the first trigger, then shut `consumer` down.
    #[tracing::instrument(skip_all, name = "consumer_run_until_shutdown", fields(queue_name = %consumer.queue_name()))]
    pub async fn run_until_shutdown(&self, consumer: &Consumer) -> ShutdownReport {
        let done = consumer.done();
        let lifetime = async {
            match self.lifetime {
                Some(lifetime) => tokio::time::sleep(lifetime).await,
                None => std::future::pending().await,
            }
        };

        let trigger = tokio::select! {
            // a pending signal wins over a timer or an outcome that became ready in the same poll
            biased;

            _ = self.signal.wait_for_signal() => ShutdownTrigger::Signal,
            _ = lifetime => ShutdownTrigger::Lifetime,
            _ = done.wait() => ShutdownTrigger::Done,
        };
        tracing::info!(%trigger, "Shutting down the consumer");

        let teardown = consumer.shutdown().await;
        if let Err(e) = &teardown {
            tracing::error!(error = %e, "The consumer did not shut down cleanly");
        }

        ShutdownReport {
            trigger,
            outcome: done.outcome(),
            teardown,
        }
    }
}

/// A [`ShutdownHandler`] fired by SIGTERM or SIGINT (Ctrl+C).
///
/// Both signal handlers are registered by the time this returns.
pub fn install_signal_handlers() -> std::io::Result<Arc<ShutdownHandler>> {
    let shutdown = ShutdownHandler::sigterm()?;
    shutdown.spawn_signal_handler(SignalKind::interrupt())?;
    Ok(shutdown)
}
