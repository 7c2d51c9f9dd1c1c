//! CLI embedding for benchmark tools built on the driver.
//!
//! Embed [`DriverCli`] into your own CLI struct:
//!
//! ```no_run
//! use clap::Parser;
//! use drover::cli::DriverCli;
//!
//! #[derive(Parser, Clone)]
//! pub struct Opts {
//!     /// Target cluster URL.
//!     pub url: String,
//!
//!     /// Embed the driver options.
//!     #[command(flatten)]
//!     pub driver: DriverCli,
//! }
//! ```
//!
//! [`run`] executes the benchmark and maps the outcome onto distinct
//! process exit codes: success on completion, failure on abort, and a
//! separate code for user cancellation.

use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use crate::{
    config::DriverConfig,
    coordinator::{BenchmarkOutcome, run_benchmark},
    runner::LoadTarget,
    track::Track,
};

/// Exit code reported after user cancellation.
const EXIT_CANCELLED: u8 = 130;

/// Driver options, embeddable into a caller's CLI.
#[derive(Parser, Clone, Debug)]
#[allow(missing_docs)]
pub struct DriverCli {
    /// Load driver hosts, comma separated
    ///
    /// "localhost" places workers on the coordinator host; anything else
    /// must be an IP address. Workers are distributed round-robin.
    #[clap(long, value_delimiter = ',', default_value = "localhost")]
    pub hosts: Vec<String>,

    /// Challenge to run
    ///
    /// Defaults to the track's default challenge.
    #[clap(long)]
    pub challenge: Option<String>,

    /// Run in test mode: no inter-step delay, fast worker wakeups
    #[clap(long)]
    pub test_mode: bool,

    /// Suppress the periodic progress line
    #[clap(long, short = 'q')]
    pub quiet: bool,

    /// Delay between a completed step and the start of the next one
    ///
    /// Examples: 5s, 500ms, 1m
    #[clap(long, default_value = "5s")]
    pub step_handoff_delay: humantime::Duration,
}

impl DriverCli {
    /// Builds the driver configuration from the CLI options.
    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            load_driver_hosts: self.hosts.clone(),
            challenge: self.challenge.clone(),
            test_mode: self.test_mode,
            quiet: self.quiet,
            step_handoff_delay: self.step_handoff_delay.into(),
            ..DriverConfig::default()
        }
    }
}

/// Runs the benchmark with the given CLI options, target and track.
///
/// `Ctrl+C` triggers cooperative cancellation.
pub async fn run<T: LoadTarget>(
    cli: &DriverCli,
    target: T,
    track: Track,
) -> anyhow::Result<ExitCode> {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    match run_benchmark(target, cli.driver_config(), track, cancel).await? {
        BenchmarkOutcome::Complete { steps } => {
            tracing::info!(steps = steps.len(), "benchmark complete");
            Ok(ExitCode::SUCCESS)
        }
        BenchmarkOutcome::Failed { message, cause } => {
            eprintln!("benchmark failed: {message}: {cause}");
            Ok(ExitCode::FAILURE)
        }
        BenchmarkOutcome::Cancelled => {
            eprintln!("benchmark cancelled");
            Ok(ExitCode::from(EXIT_CANCELLED))
        }
    }
}
