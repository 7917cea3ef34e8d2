//! The exactly-once terminal outcome of a [`Consumer`](super::Consumer).
use std::sync::Arc;
use tokio::sync::watch;

/// The value held by the done signal once it fires.
pub type Outcome = Result<(), DoneError>;

/// Why a consumer stopped abnormally.
///
/// The error is cheap to clone: every reader of the done signal gets its own copy of
/// the same value.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DoneError {
    /// The connection with the broker was closed unexpectedly.
    #[error("The connection with RabbitMq was lost")]
    ConnectionLost(#[source] Arc<lapin::Error>),
    /// The broker-side consumer failed while streaming deliveries.
    #[error("The delivery stream failed")]
    DeliveryStream(#[source] Arc<lapin::Error>),
    /// The message handler reported a failure.
    #[error("The message handler failed: {0:#}")]
    Handler(Arc<anyhow::Error>),
    /// The message handler panicked.
    #[error("The message handler panicked: {0}")]
    HandlerPanicked(String),
    /// Every writer went away without reporting anything.
    #[error("The consumer stopped without reporting an outcome")]
    Abandoned,
}

impl DoneError {
    pub(crate) fn handler(error: anyhow::Error) -> Self {
        Self::Handler(Arc::new(error))
    }
}

/// Create a linked writer/reader pair for a done signal.
pub(crate) fn done_signal() -> (DoneSender, Done) {
    let (sender, receiver) = watch::channel(None);
    (DoneSender(Arc::new(sender)), Done(receiver))
}

/// The writing half of the done signal.
///
/// Cloned into every component that can end the consumer (the dispatcher, the connection
/// error watcher, the delivery stream). Only the first value ever written is kept.
#[derive(Clone)]
pub(crate) struct DoneSender(Arc<watch::Sender<Option<Outcome>>>);

impl DoneSender {
    /// Record `outcome` if nothing was recorded before.
    ///
    /// Returns `true` if this call fired the signal.
    pub(crate) fn fire(&self, outcome: Outcome) -> bool {
        self.0.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        })
    }
}

/// The reading half of the done signal.
///
/// Reading is non-destructive: every call to [`Done::wait`] resolves to the same value.
#[derive(Clone)]
pub struct Done(watch::Receiver<Option<Outcome>>);

impl Done {
    /// Wait until the consumer reports its terminal outcome.
    pub async fn wait(&self) -> Outcome {
        let mut receiver = self.0.clone();
        let outcome = match receiver.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or(Err(DoneError::Abandoned))
    }

    /// The terminal outcome, if it has already been reported.
    pub fn outcome(&self) -> Option<Outcome> {
        self.0.borrow().clone()
    }

    /// Whether the consumer has already reported its terminal outcome.
    pub fn is_done(&self) -> bool {
        self.0.borrow().is_some()
    }
}
