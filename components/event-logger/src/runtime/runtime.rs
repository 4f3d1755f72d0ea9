// Local crates
use crate::{
    helpers::{load_config::Settings, shutdown::Shutdown},
    instrumentation::tracing::init_tracing,
    metrics::http::serve_metrics,
    tailer::{
        models::{EventSource, TokioSleeper},
        tailer::EventTailer,
    },
    vsphere::{
        client::{Endpoint, VimClient},
        events::EventCollector,
        models::ManagedObjectReference,
    },
};

// External crates
use anyhow::{Context, Result};
use std::io::Write;
use std::time::Duration;
use tokio::{net::TcpListener, time::timeout};
use tracing::instrument;

/// Upper bound for each best-effort cleanup call.
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Event logger runtime: connect, open a collector on the default
/// datacenter, tail it until shutdown or a fatal error, then clean up.
pub async fn run_event_logger(settings: Settings) -> Result<()> {
    // Held until return so buffered diagnostics are flushed
    let _log_guard = init_tracing(&settings.log)?;

    banner(&mut std::io::stdout(), &settings)?;

    let shutdown = Shutdown::new();
    let signal_listener = shutdown.listen_for_signals();

    if let Some(addr) = settings.metrics_socket_addr()? {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind metrics server on {addr}"))?;
        tokio::spawn(serve_metrics(listener, shutdown.token()));
    }

    let outcome = tail_events(&settings, &shutdown).await;

    if !shutdown.is_triggered() {
        shutdown.trigger();
    }
    signal_listener.abort();
    if outcome.is_ok() {
        tracing::info!("Event logger successfully shutdown");
    }
    outcome
}

fn banner<W: Write>(out: &mut W, settings: &Settings) -> Result<()> {
    writeln!(out, "url={} insecure={}", settings.url, settings.insecure)?;
    out.flush()?;
    Ok(())
}

#[instrument(
    name = "vcel_runtime::tail_events",
    target = "runtime::runtime",
    skip_all,
    level = "debug"
)]
async fn tail_events(settings: &Settings, shutdown: &Shutdown) -> Result<()> {
    let endpoint = Endpoint::parse(&settings.url)?;
    let options = settings.client_options();
    let Some(connected) = unless_shutdown(shutdown, VimClient::connect(endpoint, &options)).await
    else {
        tracing::info!("Shutdown requested while connecting");
        return Ok(());
    };
    let client = connected?;
    tracing::debug!(
        event_manager = %client.service_content().event_manager,
        "Session established"
    );

    let opened = unless_shutdown(
        shutdown,
        open_collector(&client, settings.datacenter.as_deref()),
    )
    .await;
    let reference = match opened {
        Some(Ok(reference)) => reference,
        Some(Err(e)) => {
            logout(&client).await;
            return Err(e);
        }
        None => {
            tracing::info!("Shutdown requested while opening the event collector");
            logout(&client).await;
            return Ok(());
        }
    };

    let mut collector = EventCollector::new(client, reference);
    match unless_shutdown(shutdown, collector.tail_from_now(settings.page_size)).await {
        Some(Ok(())) => {}
        Some(Err(e)) => {
            release(&mut collector).await;
            return Err(e.into());
        }
        None => {
            tracing::info!("Shutdown requested while positioning the event collector");
            release(&mut collector).await;
            return Ok(());
        }
    }

    tracing::info!(collector = %collector.reference(), "Tailing from the newest event");

    let mut tailer = EventTailer::new(
        collector,
        TokioSleeper,
        std::io::stdout(),
        settings.tailer_settings(),
        shutdown.token(),
    );
    let outcome = tailer.run().await;

    release(&mut tailer.into_source()).await;
    outcome
}

/// Drive a setup step unless shutdown comes first; `None` means it did.
async fn unless_shutdown<F: Future>(shutdown: &Shutdown, step: F) -> Option<F::Output> {
    let token = shutdown.token();
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        output = step => Some(output),
    }
}

/// Resolve the datacenter and create a collector rooted at it.
async fn open_collector(
    client: &VimClient,
    datacenter: Option<&str>,
) -> Result<ManagedObjectReference> {
    let datacenter = client.find_datacenter(datacenter).await?;
    tracing::debug!(
        datacenter = %datacenter.name,
        reference = %datacenter.reference,
        "Resolved datacenter"
    );
    let collector = client
        .create_collector_for_events(&datacenter.reference)
        .await?;
    tracing::debug!(collector = %collector, "Event collector created");
    Ok(collector)
}

async fn release(collector: &mut EventCollector) {
    match timeout(CLEANUP_TIMEOUT, collector.release()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Failed to release event collector"),
        Err(_) => tracing::warn!("Timed out releasing event collector"),
    }
}

async fn logout(client: &VimClient) {
    match timeout(CLEANUP_TIMEOUT, client.logout()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Logout after failed setup also failed"),
        Err(_) => tracing::warn!("Timed out logging out"),
    }
}
