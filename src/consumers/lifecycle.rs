//! The `Running → Draining → Closed` state machine guarding a consumer's teardown.
use std::fmt;
use tokio::sync::{watch, Mutex};

/// The observable state of a consumer's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Attached, stream active, no shutdown requested.
    Running,
    /// A shutdown request has been accepted and teardown is in progress.
    Draining,
    /// Every resource has been released. Terminal.
    Closed,
}

/// One step of the teardown sequence. Steps always run in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    /// Stop the broker from pushing new deliveries, then let in-flight ones finish.
    CancelConsumption,
    CloseChannel,
    CloseConnection,
}

impl TeardownStep {
    const SEQUENCE: [TeardownStep; 3] = [
        TeardownStep::CancelConsumption,
        TeardownStep::CloseChannel,
        TeardownStep::CloseConnection,
    ];
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CancelConsumption => write!(f, "cancel consumption"),
            Self::CloseChannel => write!(f, "close channel"),
            Self::CloseConnection => write!(f, "close connection"),
        }
    }
}

/// The resources released by a consumer's teardown.
///
/// Every method is invoked at most once per lifecycle, in the order they are declared.
#[async_trait::async_trait]
pub trait Teardown: Send + Sync + 'static {
    /// Cancel the consumption registration with the broker.
    async fn cancel_consumption(&self) -> Result<(), anyhow::Error>;

    /// Wait for deliveries already handed to the handler to be processed.
    ///
    /// Only invoked if cancelling succeeded: otherwise the delivery stream might never end.
    async fn wait_for_in_flight(&self);

    async fn close_channel(&self) -> Result<(), anyhow::Error>;

    async fn close_connection(&self) -> Result<(), anyhow::Error>;
}

/// The teardown steps that failed, in the order they were attempted.
///
/// A failed step never prevents the following ones from running.
#[derive(Debug)]
pub struct TeardownError {
    failures: Vec<(TeardownStep, anyhow::Error)>,
}

impl TeardownError {
    /// The steps that failed, with their errors.
    pub fn failures(&self) -> &[(TeardownStep, anyhow::Error)] {
        &self.failures
    }
}

impl fmt::Display for TeardownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Consumer teardown failed")?;
        for (step, error) in &self.failures {
            write!(f, "\n- {step}: {error:#}")?;
        }
        Ok(())
    }
}

impl std::error::Error for TeardownError {}

enum Phase {
    Running,
    /// `next` indexes [`TeardownStep::SEQUENCE`].
    Draining {
        next: usize,
        failures: Vec<(TeardownStep, anyhow::Error)>,
    },
    Closed,
}

/// Serialises shutdown requests so the teardown sequence runs exactly once.
///
/// Progress is recorded before each step runs: if the future driving a teardown is dropped
/// half-way through, the next request resumes from the following step instead of repeating
/// the interrupted one.
pub(crate) struct Lifecycle<T: ?Sized> {
    phase: Mutex<Phase>,
    state: watch::Sender<LifecycleState>,
    resources: T,
}

impl<T: Teardown> Lifecycle<T> {
    pub(crate) fn new(resources: T) -> Self {
        let (state, _) = watch::channel(LifecycleState::Running);
        Self {
            phase: Mutex::new(Phase::Running),
            state,
            resources,
        }
    }
}

impl<T: Teardown + ?Sized> Lifecycle<T> {
    #[cfg(test)]
    pub(crate) fn resources(&self) -> &T {
        &self.resources
    }

    pub(crate) fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Subscribe to lifecycle state changes.
    pub(crate) fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Run the teardown sequence, unless it already ran.
    ///
    /// The call that performs the teardown gets the failures of the steps it ran.
    /// Calls made once the lifecycle is closed, or while another call is tearing down,
    /// return `Ok(())` once the lifecycle is closed.
    pub(crate) async fn shutdown(&self) -> Result<(), TeardownError> {
        let mut phase = self.phase.lock().await;

        if matches!(*phase, Phase::Closed) {
            return Ok(());
        }
        if matches!(*phase, Phase::Running) {
            *phase = Phase::Draining {
                next: 0,
                failures: Vec::new(),
            };
            self.state.send_replace(LifecycleState::Draining);
            tracing::info!("Shutting down consumer");
        }

        while let Phase::Draining { next, failures } = &mut *phase {
            let Some(step) = TeardownStep::SEQUENCE.get(*next).copied() else {
                break;
            };
            *next += 1;

            if let Err(e) = self.run_step(step).await {
                tracing::error!(%step, error = %e, "Consumer teardown step failed");
                failures.push((step, e));
            }
        }

        let failures = match std::mem::replace(&mut *phase, Phase::Closed) {
            Phase::Draining { failures, .. } => failures,
            _ => Vec::new(),
        };
        self.state.send_replace(LifecycleState::Closed);
        tracing::info!(failed_steps = failures.len(), "Consumer closed");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TeardownError { failures })
        }
    }

    async fn run_step(&self, step: TeardownStep) -> Result<(), anyhow::Error> {
        tracing::debug!(%step, "Running consumer teardown step");
        match step {
            TeardownStep::CancelConsumption => {
                self.resources.cancel_consumption().await?;
                self.resources.wait_for_in_flight().await;
                Ok(())
            }
            TeardownStep::CloseChannel => self.resources.close_channel().await,
            TeardownStep::CloseConnection => self.resources.close_connection().await,
        }
    }
}
