use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use http::StatusCode;
use lib_reqflow::retrieve::ky_http::ApiClient;
use lib_reqflow::senders::http_sender::HttpSender;
use lib_reqflow::{EventSink, LogEventSink, Pipeline, PipelineReport, TransportSender};
use tokio::signal;
use tokio_util::sync::CancellationToken;

mod documents_logic;
use documents_logic::config::{self, Config};
use documents_logic::logger;
use documents_logic::simulated::SimulatedSender;
use documents_logic::source::{Document, DocumentSource};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = config::load_config()?;
    logger::setup_logging(&config.log_dir(), config.log_level())?;
    log::info!("{config}");

    let mut validated = config
        .pipeline_config()
        .validate()
        .context("invalid pipeline configuration")?;
    if config.unbounded == Some(true) {
        validated = validated.unbounded();
    }
    let pipeline = Pipeline::new(validated);

    let report = match &config.endpoint {
        Some(endpoint) => {
            let sender = http_sender(&config, endpoint)?;
            drive(&pipeline, sender).await?
        }
        None => {
            let sender = SimulatedSender::new(
                config.simulated_reject_ratio.unwrap_or(0.0),
                Duration::from_millis(config.simulated_latency_ms.unwrap_or(0)),
            )?;
            drive(&pipeline, sender).await?
        }
    };

    log::info!("Pipeline finished: {report}");
    if report.is_complete() {
        println!("All requested job is done");
        Ok(())
    } else if report.is_drained() {
        log::warn!("Stopped before the requested documents were sent: {report}");
        anyhow::bail!("pipeline stopped early: {report}")
    } else {
        anyhow::bail!("pipeline did not complete: {report}")
    }
}

fn http_sender(config: &Config, endpoint: &str) -> Result<HttpSender> {
    let client = ApiClient::new(endpoint, config.auth_token.clone(), config.max_retries.unwrap_or(3))?;
    let expected = StatusCode::from_u16(config.expected_status.unwrap_or(201))
        .context("expected status is not a valid HTTP status")?;
    let path = config.endpoint_path.clone().unwrap_or_default();
    Ok(HttpSender::new(client, path).expect_status(expected))
}

async fn drive<T>(pipeline: &Pipeline, transport: T) -> Result<PipelineReport>
where
    T: TransportSender<Document> + 'static,
{
    let events: Arc<dyn EventSink<Document>> = Arc::new(LogEventSink);
    let handle = pipeline.spawn(DocumentSource::new(), transport, events)?;

    let signals = tokio::spawn(watch_signals(handle.stop_token(), handle.cancel_token()));
    let report = handle.join().await;
    signals.abort();

    Ok(report)
}

/// First Ctrl-C (or SIGTERM) stops generation gracefully, a second Ctrl-C
/// cancels both loops.
async fn watch_signals(stop: CancellationToken, cancel: CancellationToken) {
    tokio::select! {
        res = signal::ctrl_c() => {
            if res.is_err() {
                return;
            }
            log::warn!("Ctrl-C received, finishing queued documents. Press Ctrl-C again to abort.");
        }
        _ = terminate() => {
            log::warn!("SIGTERM received, finishing queued documents.");
        }
    }
    stop.cancel();

    if signal::ctrl_c().await.is_ok() {
        log::warn!("Second Ctrl-C received, aborting.");
        cancel.cancel();
    }
}

async fn terminate() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
            }
            Err(e) => {
                log::warn!("Cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
    }
}
