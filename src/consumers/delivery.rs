use super::done::{DoneError, DoneSender};
use amq_protocol_types::{DeliveryTag, ShortString};
use futures_util::stream::{BoxStream, StreamExt};
use futures_util::Stream;
use lapin::{
    acker::Acker,
    options::{BasicAckOptions, BasicRejectOptions},
    BasicProperties,
};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// A received AMQP message.
#[derive(Debug)]
pub struct Delivery {
    /// The delivery tag of the message.
    pub delivery_tag: DeliveryTag,

    /// The exchange of the message. May be an empty string
    /// if the default exchange is used.
    pub exchange: ShortString,

    /// The routing key of the message. May be an empty string
    /// if no routing key is specified.
    pub routing_key: ShortString,

    /// Whether this message was redelivered
    pub redelivered: bool,

    /// Contains the properties and the headers of the
    /// message.
    pub properties: BasicProperties,

    /// The payload of the message in binary format.
    pub data: Vec<u8>,

    /// The acker used to ack/reject the message.
    ///
    /// `None` when the consumer runs in auto-ack mode: the broker considers the message
    /// acknowledged as soon as it has been sent, and acking it again would close the channel.
    pub(crate) acker: Option<Acker>,
}

impl Delivery {
    pub(crate) fn from_lapin(delivery: lapin::message::Delivery, auto_ack: bool) -> Self {
        Self {
            delivery_tag: delivery.delivery_tag,
            exchange: delivery.exchange,
            routing_key: delivery.routing_key,
            redelivered: delivery.redelivered,
            properties: delivery.properties,
            data: delivery.data,
            acker: (!auto_ack).then_some(delivery.acker),
        }
    }

    /// Whether the broker already considers this delivery acknowledged.
    pub fn is_auto_acked(&self) -> bool {
        self.acker.is_none()
    }

    /// Confirm the delivery with the broker.
    ///
    /// A no-op in auto-ack mode.
    pub async fn ack(&self) -> Result<(), lapin::Error> {
        match &self.acker {
            Some(acker) => acker.ack(BasicAckOptions::default()).await,
            None => Ok(()),
        }
    }

    /// Signal to the broker that the delivery could not be processed.
    ///
    /// A no-op in auto-ack mode.
    pub async fn reject(&self, requeue: bool) -> Result<(), lapin::Error> {
        match &self.acker {
            Some(acker) => acker.reject(BasicRejectOptions { requeue }).await,
            None => Ok(()),
        }
    }
}

/// The stream of deliveries handed to a [`Handler`](super::Handler).
///
/// Deliveries are yielded in the order the broker sent them.
/// The stream ends when the consumer is cancelled, when the channel or connection is closed,
/// or when the broker reports an error; in the last case the error is recorded on the
/// consumer's done signal.
pub struct DeliveryStream(BoxStream<'static, Delivery>);

impl DeliveryStream {
    /// Wrap an arbitrary stream of deliveries.
    pub fn new(deliveries: impl Stream<Item = Delivery> + Send + 'static) -> Self {
        Self(deliveries.boxed())
    }

    /// Adapt the raw event stream of a `lapin` consumer.
    ///
    /// The first error ends the stream and is forwarded to `done`.
    pub(crate) fn from_events<S>(events: S, auto_ack: bool, done: DoneSender) -> Self
    where
        S: Stream<Item = Result<lapin::message::Delivery, lapin::Error>> + Send + Unpin + 'static,
    {
        let deliveries = futures_util::stream::unfold(Some(events), move |events| {
            let done = done.clone();
            async move {
                let mut events = events?;
                match events.next().await? {
                    Ok(delivery) => Some((Delivery::from_lapin(delivery, auto_ack), Some(events))),
                    Err(e) => {
                        tracing::error!(error = %e, "Consumer error");
                        done.fire(Err(DoneError::DeliveryStream(Arc::new(e))));
                        None
                    }
                }
            }
        });
        Self::new(deliveries)
    }
}

impl Stream for DeliveryStream {
    type Item = Delivery;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.0.poll_next_unpin(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.0.size_hint()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::consumers::done::done_signal;

    pub(crate) fn raw_delivery(tag: u64, body: &str) -> lapin::message::Delivery {
        lapin::message::Delivery {
            delivery_tag: tag,
            exchange: "videos".into(),
            routing_key: "video.uploaded".into(),
            redelivered: false,
            properties: BasicProperties::default(),
            data: body.as_bytes().to_vec(),
            acker: Default::default(),
        }
    }

    pub(crate) fn delivery(tag: u64, body: &str) -> Delivery {
        Delivery::from_lapin(raw_delivery(tag, body), true)
    }

    #[tokio::test]
    async fn deliveries_are_yielded_in_order() {
        let (done_sender, done) = done_signal();
        let events = futures_util::stream::iter(
            ["a", "b", "c"]
                .into_iter()
                .enumerate()
                .map(|(i, body)| Ok(raw_delivery(i as u64 + 1, body))),
        );

        let stream = DeliveryStream::from_events(events, true, done_sender);
        let bodies: Vec<_> = stream.map(|d| d.data).collect().await;

        assert_eq!(bodies, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert!(!done.is_done());
    }

    #[tokio::test]
    async fn the_first_error_ends_the_stream_and_fires_done() {
        let (done_sender, done) = done_signal();
        let events = futures_util::stream::iter(vec![
            Ok(raw_delivery(1, "a")),
            Err(lapin::Error::ChannelsLimitReached),
            Ok(raw_delivery(2, "b")),
        ]);

        let stream = DeliveryStream::from_events(events, true, done_sender);
        let tags: Vec<_> = stream.map(|d| d.delivery_tag).collect().await;

        assert_eq!(tags, vec![1]);
        assert!(matches!(
            done.outcome(),
            Some(Err(DoneError::DeliveryStream(_)))
        ));
    }

    #[tokio::test]
    async fn acking_is_a_no_op_in_auto_ack_mode() {
        let delivery = delivery(7, "payload");

        assert!(delivery.is_auto_acked());
        assert!(delivery.ack().await.is_ok());
        assert!(delivery.reject(true).await.is_ok());
    }

    #[test]
    fn manual_ack_deliveries_keep_their_acker() {
        let delivery = Delivery::from_lapin(raw_delivery(7, "payload"), false);

        assert!(!delivery.is_auto_acked());
        assert_eq!(delivery.delivery_tag, 7);
        assert_eq!(delivery.routing_key.as_str(), "video.uploaded");
    }
}
