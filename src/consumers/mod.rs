//! Attach a single consumer to a RabbitMq queue, feed its deliveries to a [`Handler`]
//! and tear it down cleanly.
//!
//! [`Consumer::attach`] sets up the topology and starts consuming.
//! [`ShutdownCoordinator`] waits for whatever comes first between a shutdown signal, the end of
//! the consumer's lifetime and the consumer stopping on its own, then shuts it down.
mod consumer;
mod coordinator;
mod delivery;
mod dispatcher;
mod done;
mod error;
mod handler;
mod lifecycle;
mod topology;

pub use consumer::Consumer;
pub use coordinator::{install_signal_handlers, ShutdownCoordinator, ShutdownReport, ShutdownTrigger};
pub use delivery::{Delivery, DeliveryStream};
pub use done::{Done, DoneError, Outcome};
pub use error::AttachError;
pub use handler::{ClosureHandler, Completion, Handler};
pub use lifecycle::{LifecycleState, TeardownError, TeardownStep};

#[cfg(test)]
pub(crate) use delivery::tests as delivery_tests;
