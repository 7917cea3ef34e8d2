use crate::amqp::configuration::{ConfigurationError, ConsumerSettings};
use lapin::{uri::AMQPUri, ConnectionProperties};
use tokio::time::timeout;

/// The timeout observed when none is specified in [`ConsumerSettings`].
const DEFAULT_CONNECTION_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

#[derive(Clone)]
/// All the information required to connect to a RabbitMq broker.
pub struct ConnectionFactory {
    uri: AMQPUri,
    /// The timeout observed when trying to connect to RabbitMq.
    connection_timeout: std::time::Duration,
}

impl ConnectionFactory {
    /// Create a new connection factory from settings.
    ///
    /// A connection timeout can be (optionally) specified in `settings`.
    /// If the connection timeout is left unspecified, it will be defaulted to 10 seconds.
    ///
    /// `amqps://` uris are supported out of the box, using the system's trust root.
    pub fn new_from_config(settings: &ConsumerSettings) -> Result<Self, ConfigurationError> {
        Ok(Self {
            uri: settings.amqp_uri()?,
            connection_timeout: settings
                .connection_timeout()
                .unwrap_or(DEFAULT_CONNECTION_TIMEOUT),
        })
    }

    /// The host:port pair this factory connects to. Safe to log.
    pub fn address(&self) -> String {
        format!("{}:{}", self.uri.authority.host, self.uri.authority.port)
    }

    /// The timeout observed when trying to connect to RabbitMq.
    pub fn connection_timeout(&self) -> std::time::Duration {
        self.connection_timeout
    }

    /// Create a new connection to a RabbitMq broker.
    #[tracing::instrument(name = "rabbitmq_connect", skip(self), fields(address = %self.address()))]
    pub async fn new_connection(&self) -> Result<lapin::Connection, ConnectError> {
        let properties =
            ConnectionProperties::default().with_executor(tokio_executor_trait::Tokio::current());
        timeout(
            self.connection_timeout,
            lapin::Connection::connect_uri(self.uri.clone(), properties),
        )
        .await
        .map_err(|_| ConnectError::Timeout(self.connection_timeout))?
        .map_err(ConnectError::Broker)
    }
}

/// Failure to establish a connection with the broker.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("Timed out after {0:?} while connecting to RabbitMq")]
    Timeout(std::time::Duration),
    #[error("Failed to connect to RabbitMq")]
    Broker(#[source] lapin::Error),
}
