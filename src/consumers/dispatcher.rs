use crate::consumers::{
    done::{DoneError, DoneSender, Outcome},
    handler::{Completion, Handler},
    DeliveryStream,
};
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tokio::task::JoinHandle;

/// Run `handler` against `deliveries` on its own task.
///
/// The handler's outcome is forwarded to `done` once it returns. The returned handle
/// resolves when the handler has finished processing every delivery it was given.
pub(crate) fn spawn<H: Handler>(
    handler: H,
    deliveries: DeliveryStream,
    done: DoneSender,
) -> JoinHandle<()> {
    tokio::spawn(dispatch(handler, deliveries, done))
}

#[tracing::instrument(skip_all, name = "dispatch_deliveries")]
async fn dispatch<H: Handler>(handler: H, deliveries: DeliveryStream, done: DoneSender) {
    let outcome = run_handler(&handler, deliveries).await;
    match &outcome {
        Ok(()) => tracing::info!("Message handler completed"),
        Err(e) => tracing::error!(error = %e, "Message handler completed with an error"),
    }
    if !done.fire(outcome) {
        tracing::debug!("The consumer had already reported an outcome");
    }
}

/// Invoke the handler and merge what it reported with what it returned.
async fn run_handler<H: Handler>(handler: &H, deliveries: DeliveryStream) -> Outcome {
    let (completion, mut reported) = Completion::new();

    let returned = match AssertUnwindSafe(handler.handle(deliveries, completion))
        .catch_unwind()
        .await
    {
        Ok(returned) => returned,
        Err(panic) => return Err(DoneError::HandlerPanicked(panic_message(panic.as_ref()))),
    };

    // The sink has either been used or dropped by now, unless the handler stashed it
    // somewhere: a late report is ignored.
    match (reported.try_recv().ok(), returned) {
        (Some(Err(e)), _) | (_, Err(e)) => Err(DoneError::handler(e)),
        _ => Ok(()),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic payload".to_owned()
    }
}
