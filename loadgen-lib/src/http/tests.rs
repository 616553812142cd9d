use std::{
    convert::Infallible,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use rama::{
    http::{header::CONTENT_TYPE, service::web::response::IntoResponse as _},
    service::service_fn,
};

use super::*;
use crate::runner::WorkerId;

fn ctx(id: u64) -> IterationContext {
    IterationContext {
        id,
        worker: WorkerId(0),
    }
}

fn fixed_status_runner(status: StatusCode, cfg: HttpRunnerConfig) -> HttpPostRunner {
    HttpPostRunner::with_client(
        service_fn(async move |_: Request| Ok::<_, Infallible>(status.into_response())),
        Uri::from_static("http://127.0.0.1:8080/api/echo"),
        serde_json::json!({"hello": "world"}),
        cfg,
    )
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_request_carries_iteration_id_and_json() {
    let last_id = Arc::new(AtomicU64::new(u64::MAX));
    let runner = HttpPostRunner::with_client(
        service_fn({
            let last_id = last_id.clone();
            async move |req: Request| {
                let id = req
                    .headers()
                    .get(ITERATION_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.parse().ok())
                    .unwrap_or(u64::MAX);
                last_id.store(id, Ordering::SeqCst);

                let is_json = req
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|value| value.to_str().ok())
                    .is_some_and(|value| value.starts_with("application/json"));
                let status = if is_json {
                    StatusCode::OK
                } else {
                    StatusCode::UNSUPPORTED_MEDIA_TYPE
                };
                Ok::<_, Infallible>(status.into_response())
            }
        }),
        Uri::from_static("http://127.0.0.1:8080/api/echo"),
        serde_json::json!({"hello": "world"}),
        HttpRunnerConfig::default(),
    );

    assert_eq!(runner.run(ctx(42)).await, IterationOutcome::Success);
    assert_eq!(last_id.load(Ordering::SeqCst), 42);
    assert_eq!(runner.run(ctx(43)).await, IterationOutcome::Success);
    assert_eq!(last_id.load(Ordering::SeqCst), 43);
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_response_status_classification() {
    for (status, expected_status, expected) in [
        (StatusCode::OK, StatusCode::OK, IterationOutcome::Success),
        (
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::OK,
            IterationOutcome::CheckFailure("status is 200".to_owned()),
        ),
        (
            StatusCode::OK,
            StatusCode::CREATED,
            IterationOutcome::CheckFailure("status is 201".to_owned()),
        ),
        (StatusCode::CREATED, StatusCode::CREATED, IterationOutcome::Success),
    ] {
        let runner = fixed_status_runner(
            status,
            HttpRunnerConfig {
                expected_status,
                ..Default::default()
            },
        );
        assert_eq!(runner.run(ctx(0)).await, expected, "status: {status}");
    }
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_client_error_is_a_transport_error() {
    let runner = HttpPostRunner::with_client(
        service_fn(async |_: Request| {
            Err::<Response, _>(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))
        }),
        Uri::from_static("http://127.0.0.1:1/"),
        serde_json::Value::Null,
        HttpRunnerConfig::default(),
    );

    let outcome = runner.run(ctx(0)).await;
    assert!(
        matches!(outcome, IterationOutcome::TransportError(_)),
        "outcome: {outcome:?}"
    );
}

#[tokio::test(start_paused = true)]
#[tracing_test::traced_test]
async fn test_slow_response_times_out() {
    let runner = HttpPostRunner::with_client(
        service_fn(async |_: Request| {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, Infallible>(StatusCode::OK.into_response())
        }),
        Uri::from_static("http://127.0.0.1:8080/slow"),
        serde_json::Value::Null,
        HttpRunnerConfig {
            timeout: Duration::from_secs(1),
            ..Default::default()
        },
    );

    let start = tokio::time::Instant::now();
    let outcome = runner.run(ctx(0)).await;
    assert!(
        matches!(outcome, IterationOutcome::TransportError(_)),
        "outcome: {outcome:?}"
    );
    assert!(start.elapsed() < Duration::from_secs(2));
}
