//! `vcel` tails the event stream of a vCenter endpoint: it logs in, opens an
//! event collector on the default datacenter and writes each new event to
//! stdout as `<RFC 3339 local time>\t<JSON>`.

mod cli;
mod helpers;
mod instrumentation;
mod metrics;
mod runtime;
mod tailer;
mod vsphere;

use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    instrumentation::tracing::init_panic_handler();

    // Main entrypoint simply delegates control to CLI layer.
    // The CLI parses user commands and then calls into the appropriate logic
    match cli::cli::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}
