use crate::amqp::{configuration::ConfigurationError, ConnectError};
use std::time::Duration;

/// Why [`Consumer::attach`](super::Consumer::attach) failed.
///
/// Each variant names the step of the attach sequence that went wrong.
/// Resources acquired before the failing step have already been released.
#[derive(Debug, thiserror::Error)]
pub enum AttachError {
    #[error("Invalid consumer configuration")]
    InvalidUri(#[source] ConfigurationError),
    #[error("Failed to connect to RabbitMq")]
    Connect(#[source] lapin::Error),
    #[error("Timed out after {0:?} while connecting to RabbitMq")]
    ConnectTimeout(Duration),
    #[error("Failed to open a channel")]
    OpenChannel(#[source] lapin::Error),
    #[error("Failed to set the prefetch count")]
    Qos(#[source] lapin::Error),
    #[error("Failed to declare exchange `{exchange}`")]
    DeclareExchange {
        exchange: String,
        #[source]
        source: lapin::Error,
    },
    #[error("Failed to declare queue `{queue}`")]
    DeclareQueue {
        queue: String,
        #[source]
        source: lapin::Error,
    },
    #[error("Failed to bind queue `{queue}` to exchange `{exchange}` with key `{binding_key}`")]
    BindQueue {
        queue: String,
        exchange: String,
        binding_key: String,
        #[source]
        source: lapin::Error,
    },
    #[error("Failed to start consuming from queue `{queue}`")]
    Consume {
        queue: String,
        #[source]
        source: lapin::Error,
    },
}

impl From<ConnectError> for AttachError {
    fn from(e: ConnectError) -> Self {
        match e {
            ConnectError::Timeout(elapsed) => Self::ConnectTimeout(elapsed),
            ConnectError::Broker(e) => Self::Connect(e),
        }
    }
}

impl From<ConfigurationError> for AttachError {
    fn from(e: ConfigurationError) -> Self {
        Self::InvalidUri(e)
    }
}
