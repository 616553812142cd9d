use std::{path::PathBuf, time::Duration};

use rama::{
    error::{BoxError, ErrorContext as _},
    graceful::ShutdownGuard,
    http::{StatusCode, Uri},
    telemetry::tracing,
};

use clap::Args;
use loadgen_lib::{
    LoadTest, RunSummary, SchedulerConfig, SchedulerState, TickOverrunPolicy,
    http::{HttpPostRunner, HttpRunnerConfig},
};

use super::ProfileArgs;

pub mod reporter;

use self::reporter::*;

#[derive(Debug, Clone, Args)]
/// run a load test against an HTTP endpoint
pub struct RunCommand {
    /// endpoint every iteration POSTs its JSON payload to
    #[arg(value_name = "URI", required = true)]
    target: Uri,

    #[command(flatten)]
    profile: ProfileArgs,

    /// JSON file used as request payload (default: empty object)
    #[arg(long, value_name = "FILE")]
    body: Option<PathBuf>,

    /// response status an iteration has to get to be successful
    #[arg(long, value_name = "STATUS", default_value = "200")]
    expected_status: StatusCode,

    /// request timeout
    #[arg(long, value_name = "SECONDS", default_value_t = 60.)]
    timeout: f64,

    /// scheduler tick interval, clamped to [0.001, 1]
    #[arg(long, value_name = "SECONDS", default_value_t = 0.1)]
    tick: f64,

    /// what to do with the work of ticks the scheduler fell behind on
    #[arg(long, value_name = "coalesce | skip", default_value_t = TickOverrunPolicy::Coalesce)]
    overrun: TickOverrunPolicy,

    /// cap the amount of workers below what the profile allows
    #[arg(long, value_name = "N")]
    worker_limit: Option<usize>,

    /// report json instead of a human-friendly format
    #[arg(long, default_value_t = false)]
    json: bool,
}

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

pub async fn exec(guard: ShutdownGuard, args: RunCommand) -> Result<(), BoxError> {
    let profile = args.profile.resolve()?;

    let payload = match args.body.as_deref() {
        Some(path) => {
            let raw = tokio::fs::read(path)
                .await
                .context("read request body file")
                .with_context_debug_field("path", || path.to_owned())?;
            serde_json::from_slice::<serde_json::Value>(&raw)
                .context("json-decode request body file")
                .with_context_debug_field("path", || path.to_owned())?
        }
        None => serde_json::json!({}),
    };

    let http_cfg = HttpRunnerConfig {
        expected_status: args.expected_status,
        timeout: parse_seconds(args.timeout, "timeout")?,
    };
    let scheduler_cfg = SchedulerConfig {
        tick: parse_seconds(args.tick, "tick")?,
        overrun: args.overrun,
        worker_limit: args.worker_limit,
    };

    tracing::info!(
        uri = %args.target,
        profile = profile.kind(),
        duration = %humantime::format_duration(profile.total_duration()),
        max_workers = profile.max_workers(),
        expected_status = %http_cfg.expected_status,
        timeout = ?http_cfg.timeout,
        "load test config ready",
    );

    let runner = HttpPostRunner::new(args.target, payload, http_cfg);
    let load_test = LoadTest::start(profile, runner, scheduler_cfg);

    let reporter: Box<dyn Reporter> = if args.json {
        Box::new(JsonlReporter::new())
    } else {
        Box::new(HumanReporter::new())
    };

    drive(guard, load_test, reporter).await?;
    Ok(())
}

/// Report on `load_test` until it completed.
///
/// A shutdown stops the run early. `guard` is held until the run is
/// drained, so the graceful shutdown waits for the final summary.
async fn drive(
    guard: ShutdownGuard,
    load_test: LoadTest,
    mut reporter: Box<dyn Reporter>,
) -> Result<RunSummary, BoxError> {
    let mut cancelled = std::pin::pin!(guard.clone_weak().into_cancelled());
    let mut stopping = false;

    let mut interval = tokio::time::interval(REPORT_INTERVAL);
    // the first tick completes immediately
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancelled.as_mut(), if !stopping => {
                tracing::info!("shutdown initiated: stop load test");
                load_test.stop();
                stopping = true;
            }

            _ = interval.tick() => {
                let status = load_test.status();
                if status.state == SchedulerState::Completed || load_test.is_finished() {
                    break;
                }
                reporter.on_tick(&status);
            }
        }
    }

    let summary = load_test.wait().await?;
    reporter.finish(&summary);
    drop(guard);

    Ok(summary)
}

fn parse_seconds(seconds: f64, name: &'static str) -> Result<Duration, BoxError> {
    match Duration::try_from_secs_f64(seconds) {
        Ok(duration) if !duration.is_zero() => Ok(duration),
        _ => Err(BoxError::from(format!(
            "{name} has to be a positive amount of seconds, got {seconds}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use loadgen_lib::{IterationContext, IterationOutcome, ProfilePreset, RunStatus};
    use rama::graceful::Shutdown;
    use tokio::{sync::oneshot, time::sleep};

    struct DiscardReporter;

    impl Reporter for DiscardReporter {
        fn on_tick(&mut self, _: &RunStatus) {}
        fn finish(&mut self, _: &RunSummary) {}
    }

    #[tokio::test(start_paused = true)]
    #[tracing_test::traced_test]
    async fn test_shutdown_waits_for_load_test_to_drain() {
        let (signal_tx, signal_rx) = oneshot::channel::<()>();
        let graceful = Shutdown::new(async move {
            let _ = signal_rx.await;
        });

        let (summary_tx, mut summary_rx) = oneshot::channel();
        graceful.spawn_task_fn(async move |guard| {
            let load_test = LoadTest::start(
                ProfilePreset::Steady.profile(),
                |_: IterationContext| async {
                    sleep(Duration::from_millis(300)).await;
                    IterationOutcome::Success
                },
                SchedulerConfig::default(),
            );
            let result = drive(guard, load_test, Box::new(DiscardReporter)).await;
            let _ = summary_tx.send(result);
        });

        sleep(Duration::from_millis(1_100)).await;
        signal_tx.send(()).unwrap();
        graceful.shutdown().await;

        let summary = summary_rx
            .try_recv()
            .expect("load test summary ready once shutdown completes")
            .unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.state, SchedulerState::Completed);
        assert_eq!(summary.snapshot.in_flight, 0);
        assert!(summary.snapshot.dispatched > 0);
        assert_eq!(summary.snapshot.successes, summary.snapshot.dispatched);
    }

    #[test]
    fn test_parse_seconds() {
        for (input, expected) in [
            (0.1, Some(Duration::from_millis(100))),
            (60., Some(Duration::from_secs(60))),
            (0., None),
            (-1., None),
            (f64::NAN, None),
            (f64::INFINITY, None),
        ] {
            assert_eq!(parse_seconds(input, "tick").ok(), expected, "input: {input}");
        }
    }
}
