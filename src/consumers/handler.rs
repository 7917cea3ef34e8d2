//! The `Handler` trait: the seam where payload-specific business logic plugs into a consumer.
use crate::consumers::DeliveryStream;
use std::future::Future;
use tokio::sync::oneshot;

/// Implementers of the `Handler` trait process the deliveries pulled by a
/// [`Consumer`](crate::consumers::Consumer).
///
/// # Contract
///
/// The handler is the sole owner of the [`DeliveryStream`]: it is expected to drain it
/// until the stream ends (the consumer was cancelled or the broker went away) and then
/// report its outcome through the [`Completion`] sink before returning.
///
/// `handle` runs on a dedicated task, so it never blocks whoever attached the consumer.
/// Deliveries are handed over in the order the broker sent them; processing happens
/// inline, one delivery at a time, unless the handler decides otherwise.
///
/// # Outcome
///
/// The consumer's final outcome is, in order of precedence:
/// - the error reported through [`Completion`], if any;
/// - the error returned by `handle`, if any;
/// - success.
///
/// # Implementors
///
/// You can implement `Handler` for a struct or enum, or wrap an async closure with the
/// matching signature in a [`ClosureHandler`].
#[async_trait::async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(
        &self,
        deliveries: DeliveryStream,
        completion: Completion,
    ) -> Result<(), anyhow::Error>;
}

/// Implement the [`Handler`] trait for all Boxed handlers.
///
/// E.g. Box<dyn Handler>.
#[async_trait::async_trait]
impl<H> Handler for Box<H>
where
    H: Handler + ?Sized,
{
    async fn handle(
        &self,
        deliveries: DeliveryStream,
        completion: Completion,
    ) -> Result<(), anyhow::Error> {
        H::handle(self, deliveries, completion).await
    }
}

/// Wrapper type to turn an async closure into a [`Handler`].
///
/// Any function of the form
/// ```ignore
/// async fn(deliveries: DeliveryStream, completion: Completion) -> Result<(), impl Into<anyhow::Error>>;
/// ```
/// can be used.
pub struct ClosureHandler<F>(pub F);

#[async_trait::async_trait]
impl<F, Fut, E> Handler for ClosureHandler<F>
where
    F: Fn(DeliveryStream, Completion) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<anyhow::Error> + 'static,
{
    async fn handle(
        &self,
        deliveries: DeliveryStream,
        completion: Completion,
    ) -> Result<(), anyhow::Error> {
        (self.0)(deliveries, completion).await.map_err(Into::into)
    }
}

/// The sink a [`Handler`] uses to report its outcome.
///
/// Reporting consumes the sink: a handler cannot report twice.
/// Dropping it without reporting is allowed, in which case the value returned by
/// [`Handler::handle`] is used.
#[derive(Debug)]
pub struct Completion(oneshot::Sender<Result<(), anyhow::Error>>);

impl Completion {
    pub(crate) fn new() -> (Self, oneshot::Receiver<Result<(), anyhow::Error>>) {
        let (sender, receiver) = oneshot::channel();
        (Self(sender), receiver)
    }

    /// Report the final outcome of processing.
    pub fn report(self, outcome: Result<(), anyhow::Error>) {
        // The receiver only goes away if the dispatcher task was torn down, nobody is left to tell.
        let _ = self.0.send(outcome);
    }

    /// Report that every delivery was processed.
    pub fn succeed(self) {
        self.report(Ok(()))
    }

    /// Report a processing failure.
    pub fn fail(self, error: impl Into<anyhow::Error>) {
        self.report(Err(error.into()))
    }
}
