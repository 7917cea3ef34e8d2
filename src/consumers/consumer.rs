use crate::{
    amqp::{configuration::ConsumerSettings, ConnectionFactory},
    consumers::{
        dispatcher,
        done::{done_signal, Done, DoneError, DoneSender},
        lifecycle::{Lifecycle, LifecycleState, Teardown, TeardownError},
        topology::{Bind, DeclareDurableExchange, DeclareExclusiveQueue},
        AttachError, DeliveryStream, Handler,
    },
};
use amq_protocol_types::FieldTable;
use lapin::{
    options::{BasicCancelOptions, BasicConsumeOptions, BasicQosOptions},
    Channel, Connection,
};
use std::sync::Arc;
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};

/// AMQP reply code for a normal, client-initiated close.
const REPLY_SUCCESS: u16 = 200;

/// A consumer attached to a RabbitMq queue.
///
/// A `Consumer` owns the connection, the channel and the consumption registration with the
/// broker. Deliveries are pushed to the [`Handler`] it was attached with, on a dedicated task,
/// until [`Consumer::shutdown`] is called or the consumer fails.
///
/// Cloning a `Consumer` is cheap: every clone refers to the same broker resources, and
/// shutting down any of them shuts down all of them.
#[derive(Clone)]
pub struct Consumer {
    lifecycle: Arc<Lifecycle<dyn Teardown>>,
    done: Done,
    queue_name: String,
    consumer_tag: String,
}

impl Consumer {
    /// Connect to the broker, set up the queue topology and start consuming.
    ///
    /// The sequence is: connect, open a channel, set the prefetch count (if any),
    /// declare the exchange, declare the queue, bind the queue to the exchange and finally
    /// register the consumer with the broker.
    /// If any step fails, whatever was acquired before it is closed and no `Consumer`
    /// is returned.
    ///
    /// `attach` returns as soon as the broker confirmed the consumer: the handler runs
    /// concurrently with the caller.
    #[tracing::instrument(
        name = "consumer_attach",
        skip_all,
        fields(exchange = %settings.exchange, queue_name = %settings.queue)
    )]
    pub async fn attach<H: Handler>(
        settings: &ConsumerSettings,
        handler: H,
    ) -> Result<Consumer, AttachError> {
        let factory = ConnectionFactory::new_from_config(settings)?;
        if settings.consumer_tag.trim().is_empty() {
            tracing::warn!("The consumer tag is blank, the broker will generate one");
        }

        let connection = factory.new_connection().await?;
        let (done_sender, done) = done_signal();
        connection.on_error({
            let done = done_sender.clone();
            move |e| {
                report_connection_loss(&done, e);
            }
        });

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                release(None, &connection).await;
                return Err(AttachError::OpenChannel(e));
            }
        };
        let (queue_name, events) = match start_consuming(&channel, settings).await {
            Ok(consuming) => consuming,
            Err(e) => {
                release(Some(&channel), &connection).await;
                return Err(e);
            }
        };
        let consumer_tag = events.tag().as_str().to_owned();
        tracing::info!(%consumer_tag, %queue_name, "Consumer attached");

        let deliveries = DeliveryStream::from_events(events, settings.auto_ack, done_sender.clone());
        let dispatcher = dispatcher::spawn(handler, deliveries, done_sender);

        let session = Session {
            connection,
            channel,
            consumer_tag: consumer_tag.clone(),
            dispatcher: Mutex::new(Some(dispatcher)),
        };
        Ok(Consumer {
            lifecycle: Arc::new(Lifecycle::new(session)),
            done,
            queue_name,
            consumer_tag,
        })
    }

    /// Assemble a consumer from an arbitrary set of resources to tear down.
    #[cfg(test)]
    pub(crate) fn from_parts(
        resources: impl Teardown,
        done: Done,
        queue_name: &str,
        consumer_tag: &str,
    ) -> Consumer {
        Consumer {
            lifecycle: Arc::new(Lifecycle::new(resources)),
            done,
            queue_name: queue_name.to_owned(),
            consumer_tag: consumer_tag.to_owned(),
        }
    }

    /// The signal that fires once with the consumer's terminal outcome.
    pub fn done(&self) -> Done {
        self.done.clone()
    }

    /// Where the consumer is in its `Running → Draining → Closed` lifecycle.
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Be notified whenever the consumer moves to a new [`LifecycleState`].
    pub fn state_changes(&self) -> watch::Receiver<LifecycleState> {
        self.lifecycle.subscribe()
    }

    /// The name of the queue the consumer is reading from.
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// The consumer tag registered with the broker.
    ///
    /// Generated by the broker if the configured one was blank.
    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Stop consuming and release every broker resource.
    ///
    /// The consumption registration is cancelled first; deliveries already handed to the
    /// handler are then processed to completion before the channel and the connection are
    /// closed.
    ///
    /// Shutting down is idempotent. Only the call that performs the teardown can observe
    /// its failures: later (or concurrent) calls return `Ok(())` once the consumer is closed.
    #[tracing::instrument(
        name = "consumer_shutdown",
        skip_all,
        fields(queue_name = %self.queue_name, consumer_tag = %self.consumer_tag)
    )]
    pub async fn shutdown(&self) -> Result<(), TeardownError> {
        self.lifecycle.shutdown().await
    }
}

/// Record an unexpected connection failure as the consumer's outcome, unless it already has one.
///
/// Returns `true` if the failure became the consumer's outcome.
fn report_connection_loss(done: &DoneSender, error: lapin::Error) -> bool {
    tracing::warn!(error = %error, "The connection with RabbitMq was lost");
    done.fire(Err(DoneError::ConnectionLost(Arc::new(error))))
}

/// Declare the topology and register the consumer on `channel`.
async fn start_consuming(
    channel: &Channel,
    settings: &ConsumerSettings,
) -> Result<(String, lapin::Consumer), AttachError> {
    if let Some(prefetch_count) = settings.prefetch_count {
        channel
            .basic_qos(prefetch_count, BasicQosOptions { global: false })
            .await
            .map_err(AttachError::Qos)?;
    }

    DeclareDurableExchange::from(settings)
        .declare(channel)
        .await
        .map_err(|source| AttachError::DeclareExchange {
            exchange: settings.exchange.clone(),
            source,
        })?;

    let queue_name = DeclareExclusiveQueue::from(settings)
        .declare(channel)
        .await
        .map_err(|source| AttachError::DeclareQueue {
            queue: settings.queue.clone(),
            source,
        })?;

    Bind {
        queue: &queue_name,
        exchange: &settings.exchange,
        binding_key: &settings.binding_key,
    }
    .bind(channel)
    .await
    .map_err(|source| AttachError::BindQueue {
        queue: queue_name.clone(),
        exchange: settings.exchange.clone(),
        binding_key: settings.binding_key.clone(),
        source,
    })?;

    let events = channel
        .basic_consume(
            &queue_name,
            &settings.consumer_tag,
            BasicConsumeOptions {
                no_ack: settings.auto_ack,
                ..BasicConsumeOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|source| AttachError::Consume {
            queue: queue_name.clone(),
            source,
        })?;

    Ok((queue_name, events))
}

/// Close what a failed attach managed to open. Failures are logged, not returned.
async fn release(channel: Option<&Channel>, connection: &Connection) {
    if let Some(channel) = channel {
        if let Err(e) = channel.close(REPLY_SUCCESS, "Consumer attach failed").await {
            tracing::warn!(error = %e, "Failed to close the channel after a failed attach");
        }
    }
    if let Err(e) = connection
        .close(REPLY_SUCCESS, "Consumer attach failed")
        .await
    {
        tracing::warn!(error = %e, "Failed to close the connection after a failed attach");
    }
}

/// The broker resources held by an attached consumer.
struct Session {
    connection: Connection,
    channel: Channel,
    consumer_tag: String,
    /// Taken by the first (and only) wait for in-flight deliveries.
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait::async_trait]
impl Teardown for Session {
    async fn cancel_consumption(&self) -> Result<(), anyhow::Error> {
        self.channel
            .basic_cancel(&self.consumer_tag, BasicCancelOptions::default())
            .await?;
        Ok(())
    }

    async fn wait_for_in_flight(&self) {
        let Some(dispatcher) = self.dispatcher.lock().await.take() else {
            return;
        };
        if let Err(e) = dispatcher.await {
            tracing::error!(error = %e, "The message handler task failed");
        }
    }

    async fn close_channel(&self) -> Result<(), anyhow::Error> {
        self.channel.close(REPLY_SUCCESS, "Normal shutdown").await?;
        Ok(())
    }

    async fn close_connection(&self) -> Result<(), anyhow::Error> {
        self.connection
            .close(REPLY_SUCCESS, "Normal shutdown")
            .await?;
        Ok(())
    }
}
