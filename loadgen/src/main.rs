#![cfg_attr(
    not(test),
    warn(clippy::print_stdout, clippy::dbg_macro),
    deny(clippy::unwrap_used, clippy::expect_used)
)]

use std::{path::PathBuf, process::ExitCode, time::Duration};

use rama::{
    error::BoxError,
    graceful::{self, ShutdownGuard},
    telemetry::tracing,
};
use tokio::sync::oneshot;

#[cfg(target_family = "unix")]
use rama::error::ErrorContext as _;

use clap::{Parser, Subcommand};
use loadgen_lib::utils;

pub mod cmd;

#[cfg(target_family = "unix")]
#[global_allocator]
static ALLOC: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[cfg(target_os = "windows")]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// CLI arguments for configuring loadgen behavior.
#[derive(Debug, Clone, Parser)]
#[command(name = "loadgen")]
#[command(bin_name = "loadgen")]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    cmds: CliCommands,

    /// debug logging as default instead of Info; use RUST_LOG env for more options
    #[arg(long, short = 'v', default_value_t = false, global = true)]
    pub verbose: bool,

    /// enable pretty logging (format for humans)
    #[arg(long, default_value_t = false, global = true)]
    pub pretty: bool,

    /// write the tracing output to the provided (log) file instead of stderr
    #[arg(long, short = 'o', global = true)]
    pub output: Option<PathBuf>,

    #[arg(long, value_name = "SECONDS", default_value_t = 0., global = true)]
    /// the graceful shutdown timeout (<= 0.0 = no timeout)
    pub graceful: f64,

    #[cfg(target_family = "unix")]
    /// Set the limit of max open file descriptors for this process and its children.
    #[arg(long, value_name = "N", default_value_t = 262_144, global = true)]
    pub ulimit: utils::os::rlim_t,
}

#[derive(Debug, Clone, Subcommand)]
enum CliCommands {
    Run(self::cmd::run::RunCommand),
    Check(self::cmd::check::CheckCommand),
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match try_main(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("loadgen failed: {err}");
            eprintln!("🚩 exit with error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn try_main(args: Args) -> Result<(), BoxError> {
    utils::telemetry::init_tracing(utils::telemetry::TelemetryConfig {
        verbose: args.verbose,
        pretty: args.pretty,
        output: args.output.as_deref(),
    })?;

    #[cfg(target_family = "unix")]
    utils::os::raise_nofile(args.ulimit).context("set file descriptor limit")?;

    run_with_args(graceful::default_signal(), args).await
}

/// Run the selected command until it is done or `shutdown_signal` fires,
/// and return the result of the command itself.
///
/// The command runs as a graceful task: a shutdown signal cancels it,
/// after which it gets to wrap up (e.g. drain a load test) before
/// this function returns.
async fn run_with_args<F>(shutdown_signal: F, args: Args) -> Result<(), BoxError>
where
    F: Future<Output: Send + 'static> + Send + 'static,
{
    let graceful_timeout = (args.graceful > 0.).then(|| Duration::from_secs_f64(args.graceful));
    let cmds = args.cmds;

    let (outcome_tx, outcome_rx) = oneshot::channel::<Result<(), BoxError>>();
    let (finished_tx, finished_rx) = oneshot::channel::<()>();

    let graceful = graceful::Shutdown::new(async move {
        tokio::select! {
            _ = shutdown_signal => tracing::info!("shutdown signal received: cancel command"),
            _ = finished_rx => tracing::debug!("command finished"),
        }
    });

    graceful.spawn_task_fn(async move |guard| {
        let outcome = exec_command(guard.clone(), cmds).await;
        let _ = outcome_tx.send(outcome);
        // the outcome is sent before the last guard goes away
        drop(finished_tx);
        drop(guard);
    });

    let delay = match graceful_timeout {
        Some(limit) => graceful.shutdown_with_limit(limit).await?,
        None => graceful.shutdown().await,
    };
    tracing::debug!(?delay, "graceful shutdown complete");

    outcome_rx
        .await
        .unwrap_or_else(|_| Err(BoxError::from("command aborted before it finished")))
}

async fn exec_command(guard: ShutdownGuard, cmds: CliCommands) -> Result<(), BoxError> {
    match cmds {
        CliCommands::Run(args) => self::cmd::run::exec(guard, args).await,
        CliCommands::Check(args) => self::cmd::check::exec(args),
    }
}
