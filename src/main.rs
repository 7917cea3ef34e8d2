use clap::Parser;
use std::process::ExitCode;
use video_processing::{
    cli::Cli,
    consumers::{install_signal_handlers, Consumer, ShutdownCoordinator},
    handlers::LogDeliveries,
    telemetry,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    telemetry::init();

    let settings = cli.consumer_settings();
    let consumer = match Consumer::attach(&settings, LogDeliveries { verbose: cli.verbose }).await
    {
        Ok(consumer) => consumer,
        Err(e) => {
            tracing::error!(error = ?anyhow::Error::from(e), "Failed to attach the consumer");
            return ExitCode::FAILURE;
        }
    };

    let signal = match install_signal_handlers() {
        Ok(signal) => signal,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install the signal handlers");
            if let Err(e) = consumer.shutdown().await {
                tracing::error!(error = %e, "Failed to shut down the consumer");
            }
            return ExitCode::FAILURE;
        }
    };

    if cli.lifetime.is_zero() {
        tracing::info!("Running until the consumer is stopped");
    } else {
        tracing::info!(lifetime = %humantime::format_duration(cli.lifetime), "Running for a limited time");
    }

    let report = ShutdownCoordinator::new(signal)
        .with_lifetime(cli.lifetime)
        .run_until_shutdown(&consumer)
        .await;

    match &report.outcome {
        Some(Err(e)) => tracing::error!(error = %e, trigger = %report.trigger, "The consumer failed"),
        _ => tracing::info!(trigger = %report.trigger, "Shut down"),
    }

    if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
