use crate::helpers::{draining_handler, get_consumer_settings, publish};
use futures_util::StreamExt;
use shutdown_handler::ShutdownHandler;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;
use video_processing::consumers::{
    ClosureHandler, Completion, Consumer, DeliveryStream, DoneError, LifecycleState,
    ShutdownCoordinator, ShutdownTrigger,
};

#[tokio::test]
#[ignore = "requires a RabbitMq broker on localhost:5672"]
async fn shutting_down_concurrently_releases_resources_once() {
    // Arrange
    let settings = get_consumer_settings();
    let consumer = Consumer::attach(&settings, draining_handler()).await.unwrap();

    // Act
    let requests: Vec<_> = (0..5)
        .map(|_| {
            let consumer = consumer.clone();
            tokio::spawn(async move { consumer.shutdown().await })
        })
        .collect();

    // Assert
    for request in requests {
        assert!(request.await.unwrap().is_ok());
    }
    assert!(consumer.shutdown().await.is_ok());
    assert_eq!(consumer.state(), LifecycleState::Closed);
}

#[tokio::test]
#[ignore = "requires a RabbitMq broker on localhost:5672"]
async fn in_flight_deliveries_are_processed_before_the_channel_closes() {
    // Arrange
    let settings = get_consumer_settings();
    let processed = Arc::new(AtomicUsize::new(0));
    let handler = ClosureHandler({
        let processed = processed.clone();
        move |mut deliveries: DeliveryStream, completion: Completion| {
            let processed = processed.clone();
            async move {
                while let Some(delivery) = deliveries.next().await {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    delivery.ack().await?;
                    processed.fetch_add(1, Ordering::SeqCst);
                }
                completion.succeed();
                Ok::<(), anyhow::Error>(())
            }
        }
    });
    let consumer = Consumer::attach(&settings, handler).await.unwrap();
    publish(&settings, &["a", "b", "c"]).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Act
    consumer.shutdown().await.unwrap();

    // Assert
    assert_eq!(processed.load(Ordering::SeqCst), 3);
}

#[tokio::test]
#[ignore = "requires a RabbitMq broker on localhost:5672"]
async fn a_signal_stops_an_idle_consumer() {
    // Arrange
    let consumer = Consumer::attach(&get_consumer_settings(), draining_handler())
        .await
        .unwrap();
    let signal = Arc::new(ShutdownHandler::new());
    let coordinator = ShutdownCoordinator::new(signal.clone());

    // Act
    let run = tokio::spawn({
        let consumer = consumer.clone();
        async move { coordinator.run_until_shutdown(&consumer).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    signal.shutdown();
    let report = run.await.unwrap();

    // Assert
    assert_eq!(report.trigger, ShutdownTrigger::Signal);
    assert!(report.is_clean());
}

#[tokio::test]
#[ignore = "requires a RabbitMq broker on localhost:5672"]
async fn a_handler_failure_stops_the_consumer() {
    // Arrange
    let settings = get_consumer_settings();
    let handler = ClosureHandler(|mut deliveries: DeliveryStream, completion: Completion| async move {
        if deliveries.next().await.is_some() {
            completion.fail(anyhow::anyhow!("cannot transcode video"));
        }
        Ok::<(), anyhow::Error>(())
    });
    let consumer = Consumer::attach(&settings, handler).await.unwrap();
    let coordinator = ShutdownCoordinator::new(Arc::new(ShutdownHandler::new()))
        .with_lifetime(Duration::from_secs(10));

    // Act
    publish(&settings, &["corrupted"]).await;
    let report = coordinator.run_until_shutdown(&consumer).await;

    // Assert
    assert_eq!(report.trigger, ShutdownTrigger::Done);
    assert!(matches!(report.outcome, Some(Err(DoneError::Handler(_)))));
    assert!(!report.is_clean());
}
