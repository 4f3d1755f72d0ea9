// External crates
use lazy_static::lazy_static;
use prometheus::{
    Counter, Gauge, Histogram, register_counter, register_gauge, register_histogram,
};
use std::time::Instant;

/// Helper to observe histogram duration
pub fn observe_duration(hist: &Histogram, start: Instant) {
    let elapsed = start.elapsed().as_secs_f64();
    hist.observe(elapsed);
}

lazy_static! {
    // ======== Poll Loop Metrics ========

    pub static ref POLLS_TOTAL: Counter = register_counter!(
        "vcel_polls_total",
        "Number of ReadNextEvents polls issued against the event collector"
    ).unwrap();

    pub static ref FETCH_DURATION_SECONDS: Histogram = register_histogram!(
        "vcel_fetch_duration_seconds",
        "Histogram of ReadNextEvents round-trip durations (seconds)",
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    ).unwrap();

    pub static ref FETCH_ERRORS_TOTAL: Counter = register_counter!(
        "vcel_fetch_errors_total",
        "Number of failed ReadNextEvents polls"
    ).unwrap();

    pub static ref LAST_POLL_TIMESTAMP_SECONDS: Gauge = register_gauge!(
        "vcel_last_poll_timestamp_seconds",
        "Unix time of the most recent poll"
    ).unwrap();

    // ======== Output Metrics ========

    pub static ref EVENTS_EMITTED_TOTAL: Counter = register_counter!(
        "vcel_events_emitted_total",
        "Number of event lines written to the output stream"
    ).unwrap();

    pub static ref CATEGORY_LOOKUP_FAILURES_TOTAL: Counter = register_counter!(
        "vcel_category_lookup_failures_total",
        "Events emitted with an empty category because the lookup failed"
    ).unwrap();
}

