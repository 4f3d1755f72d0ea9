// Local crates
use crate::metrics::metrics::{
    CATEGORY_LOOKUP_FAILURES_TOTAL, EVENTS_EMITTED_TOTAL, FETCH_DURATION_SECONDS,
    FETCH_ERRORS_TOTAL, LAST_POLL_TIMESTAMP_SECONDS, POLLS_TOTAL, observe_duration,
};
use crate::tailer::{
    models::{EventSource, RawEvent, Sleeper, TailerSettings},
    payload::{build_record, format_line},
};

// External crates
use anyhow::{Context, Result};
use chrono::{Local, Utc};
use std::io::Write;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Polls an [`EventSource`] on a fixed interval and writes one line per
/// event to `output`.
///
/// ```text
/// read_next_events -> build_record -> format_line -> output
///        ^                                              |
///        +------------------ sleep ---------------------+
/// ```
#[derive(Debug)]
pub struct EventTailer<S, Z, W> {
    source: S,
    sleeper: Z,
    output: W,
    settings: TailerSettings,
    cancel: CancellationToken,
}

impl<S, Z, W> EventTailer<S, Z, W>
where
    S: EventSource,
    Z: Sleeper,
    W: Write,
{
    pub fn new(
        source: S,
        sleeper: Z,
        output: W,
        settings: TailerSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            sleeper,
            output,
            settings,
            cancel,
        }
    }

    /// Run until cancelled. A failed fetch or write ends the loop with an
    /// error; nothing more is written after it.
    ///
    /// Cancellation is only observed while waiting on the server or
    /// sleeping. A batch that was fetched is always written out in full,
    /// since the collector cursor has already moved past it.
    #[instrument(
        name = "vcel_tailer::run",
        target = "tailer::tailer",
        skip_all,
        fields(
            max_events = self.settings.max_events,
            poll_interval_secs = self.settings.poll_interval.as_secs()
        ),
        level = "debug"
    )]
    pub async fn run(&mut self) -> Result<()> {
        tracing::info!("Tailing events");

        loop {
            let events = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                fetched = Self::fetch(&mut self.source, self.settings.max_events) => fetched?,
            };
            let emitted = Self::emit(&mut self.source, &mut self.output, &events).await?;
            tracing::debug!(emitted, "Poll complete");

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = self.sleeper.sleep(self.settings.poll_interval) => {}
            }
        }

        tracing::info!("Tailer stopped");
        Ok(())
    }

    async fn fetch(source: &mut S, max_events: u32) -> Result<Vec<RawEvent>> {
        POLLS_TOTAL.inc();
        LAST_POLL_TIMESTAMP_SECONDS.set(Utc::now().timestamp() as f64);

        let start = Instant::now();
        let fetched = source.read_next_events(max_events).await;
        observe_duration(&FETCH_DURATION_SECONDS, start);

        fetched.inspect_err(|_| FETCH_ERRORS_TOTAL.inc())
    }

    /// Write one line per event in server order, returning the line count.
    async fn emit(source: &mut S, output: &mut W, events: &[RawEvent]) -> Result<usize> {
        for event in events {
            let category = match source.event_category(event).await {
                Ok(category) => category,
                Err(e) => {
                    CATEGORY_LOOKUP_FAILURES_TOTAL.inc();
                    tracing::warn!(
                        error = %e,
                        event_type = %event.type_name,
                        "Event category lookup failed, emitting without category"
                    );
                    String::new()
                }
            };

            let record = build_record(event, category);
            let line = format_line(&record, &event.created_time, &Local)
                .context("failed to serialize event record")?;
            writeln!(output, "{line}").context("failed to write event")?;
            output.flush().context("failed to flush output")?;
            EVENTS_EMITTED_TOTAL.inc();
        }

        Ok(events.len())
    }

    /// Hand the source back, e.g. to release it after the loop ends.
    pub fn into_source(self) -> S {
        self.source
    }
}
