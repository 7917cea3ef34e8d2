use futures_util::{future::BoxFuture, FutureExt, StreamExt};
use uuid::Uuid;
use video_processing::amqp::{
    configuration::ConsumerSettings, options::BasicPublishOptions, BasicProperties,
    ConnectionFactory,
};
use video_processing::consumers::{ClosureHandler, Completion, DeliveryStream};

/// Settings pointing at the local broker, with a fresh exchange and queue.
pub fn get_consumer_settings() -> ConsumerSettings {
    ConsumerSettings {
        exchange: format!("videos-{}", Uuid::new_v4()),
        queue: Uuid::new_v4().to_string(),
        ..ConsumerSettings::default()
    }
}

pub fn get_connection_factory() -> ConnectionFactory {
    ConnectionFactory::new_from_config(&ConsumerSettings::default()).unwrap()
}

/// Publish `payloads`, in order, on the exchange the consumer is bound to.
pub async fn publish(settings: &ConsumerSettings, payloads: &[&str]) {
    let connection = get_connection_factory().new_connection().await.unwrap();
    let channel = connection.create_channel().await.unwrap();
    for payload in payloads {
        channel
            .basic_publish(
                &settings.exchange,
                &settings.binding_key,
                BasicPublishOptions::default(),
                payload.as_bytes(),
                BasicProperties::default(),
            )
            .await
            .unwrap()
            .await
            .unwrap();
    }
    connection.close(200, "Done publishing").await.unwrap();
}

/// A handler that drains the delivery stream until it ends, then reports success.
pub fn draining_handler() -> ClosureHandler<
    impl Fn(DeliveryStream, Completion) -> BoxFuture<'static, Result<(), anyhow::Error>>
        + Send
        + Sync
        + 'static,
> {
    ClosureHandler(|mut deliveries: DeliveryStream, completion: Completion| {
        async move {
            while deliveries.next().await.is_some() {}
            completion.succeed();
            Ok(())
        }
        .boxed()
    })
}
