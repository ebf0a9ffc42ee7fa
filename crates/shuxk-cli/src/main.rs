//! shuxk - wait for the SHU course selection window and submit a course list.
//!
//! Logs in through the university SSO, polls the portal until registration
//! opens, then submits every queued course in one request and prints the
//! portal's verdict for each.

mod app;
mod args;

use std::io;
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use args::Args;

/// Crates whose debug output drowns ours.
const QUIET_TARGETS: &str = "hyper=warn,hyper_util=warn,reqwest=warn,html5ever=warn,selectors=warn";

/// Initialize the tracing subscriber for logging.
///
/// `RUST_LOG` wins over `-v`. With a log file, records go to both stderr and
/// the file; the returned guard flushes the file on drop.
fn init_tracing(verbose: u8, log_file: Option<&Path>) -> Option<WorkerGuard> {
    let level = if verbose > 0 { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},{QUIET_TARGETS}")));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path.file_name().unwrap_or(path.as_os_str());
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let _guard = init_tracing(args.verbose, args.log_file.as_deref());
    info!(version = env!("CARGO_PKG_VERSION"), "shuxk starting");

    match app::run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Run failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
