//! Broker-side topology a consumer needs before it can start consuming.
use crate::amqp::configuration::ConsumerSettings;
use amq_protocol_types::FieldTable;
use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::{Channel, ExchangeKind};

/// Declares a durable exchange that survives broker restarts and outlives its consumers.
pub(crate) struct DeclareDurableExchange<'a> {
    pub(crate) name: &'a str,
    pub(crate) kind: ExchangeKind,
}

impl DeclareDurableExchange<'_> {
    pub(crate) async fn declare(&self, channel: &Channel) -> Result<(), lapin::Error> {
        channel
            .exchange_declare(
                self.name,
                self.kind.clone(),
                ExchangeDeclareOptions {
                    passive: false,
                    durable: true,
                    auto_delete: false,
                    internal: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
    }
}

/// Declares a queue private to this connection.
///
/// The queue is deleted by the broker once its last consumer goes away, or when the
/// connection that declared it closes.
pub(crate) struct DeclareExclusiveQueue<'a> {
    pub(crate) name: &'a str,
}

impl DeclareExclusiveQueue<'_> {
    /// Returns the name of the declared queue, as reported by the broker.
    ///
    /// It differs from the requested one only if an empty name was requested.
    pub(crate) async fn declare(&self, channel: &Channel) -> Result<String, lapin::Error> {
        let queue = channel
            .queue_declare(
                self.name,
                QueueDeclareOptions {
                    passive: false,
                    durable: false,
                    exclusive: true,
                    auto_delete: true,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await?;
        Ok(queue.name().as_str().to_owned())
    }
}

/// Routes messages published on `exchange` with a matching routing key to `queue`.
pub(crate) struct Bind<'a> {
    pub(crate) queue: &'a str,
    pub(crate) exchange: &'a str,
    pub(crate) binding_key: &'a str,
}

impl Bind<'_> {
    pub(crate) async fn bind(&self, channel: &Channel) -> Result<(), lapin::Error> {
        tracing::debug!(
            queue_name = self.queue,
            exchange = self.exchange,
            binding_key = self.binding_key,
            "Binding queue"
        );
        channel
            .queue_bind(
                self.queue,
                self.exchange,
                self.binding_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
    }
}

impl<'a> From<&'a ConsumerSettings> for DeclareDurableExchange<'a> {
    fn from(settings: &'a ConsumerSettings) -> Self {
        Self {
            name: &settings.exchange,
            kind: settings.exchange_type.kind(),
        }
    }
}

impl<'a> From<&'a ConsumerSettings> for DeclareExclusiveQueue<'a> {
    fn from(settings: &'a ConsumerSettings) -> Self {
        Self {
            name: &settings.queue,
        }
    }
}
