//! `video-processing` attaches a single consumer to a RabbitMq queue, built on top of [`lapin`],
//! and tears it down cleanly when asked to.
//!
//! [`Consumer::attach`](crate::consumers::Consumer::attach) and
//! [`ShutdownCoordinator`](crate::consumers::ShutdownCoordinator) are the best starting points
//! to learn more about what `video-processing` provides.

pub mod amqp;
pub mod cli;
pub mod consumers;
pub mod handlers;
pub mod telemetry;
