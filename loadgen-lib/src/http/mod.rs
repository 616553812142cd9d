//! HTTP iteration runner: every iteration POSTs a fixed JSON payload
//! and checks the response status.

use std::{fmt, sync::Arc, time::Duration};

use rama::{
    Layer as _, Service,
    error::BoxError,
    http::{
        Body, Request, Response, StatusCode, Uri,
        client::EasyHttpWebClient,
        layer::{map_request_body::MapRequestBodyLayer, map_response_body::MapResponseBodyLayer},
        service::client::HttpClientExt as _,
    },
    layer::{MapErrLayer, TimeoutLayer},
    service::BoxService,
    telemetry::tracing,
};

use crate::runner::{IterationContext, IterationOutcome, IterationRunner};

/// Header carrying the [`IterationId`](crate::runner::IterationId) of a request.
pub const ITERATION_ID_HEADER: &str = "x-loadgen-iteration";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpRunnerConfig {
    /// Any other response status is a check failure.
    pub expected_status: StatusCode,
    /// Deadline of a single request, response headers included.
    pub timeout: Duration,
}

impl Default for HttpRunnerConfig {
    fn default() -> Self {
        Self {
            expected_status: StatusCode::OK,
            timeout: Duration::from_secs(60),
        }
    }
}

pub struct HttpPostRunner {
    client: BoxService<Request, Response, BoxError>,
    uri: Uri,
    payload: Arc<serde_json::Value>,
    expected_status: StatusCode,
    check: String,
}

impl fmt::Debug for HttpPostRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpPostRunner")
            .field("uri", &self.uri)
            .field("expected_status", &self.expected_status)
            .finish()
    }
}

impl HttpPostRunner {
    pub fn new(uri: Uri, payload: serde_json::Value, cfg: HttpRunnerConfig) -> Self {
        let inner_https_client = (
            MapResponseBodyLayer::new(Body::new),
            MapRequestBodyLayer::new(Body::new),
        )
            .into_layer(EasyHttpWebClient::default());
        Self::with_client(inner_https_client, uri, payload, cfg)
    }

    /// Use `client` to send the requests instead of a default web client.
    pub fn with_client<S>(client: S, uri: Uri, payload: serde_json::Value, cfg: HttpRunnerConfig) -> Self
    where
        S: Service<Request, Output = Response, Error: Into<BoxError>>,
    {
        let client = (
            MapErrLayer::new(Into::<BoxError>::into),
            TimeoutLayer::new(cfg.timeout),
            MapErrLayer::new(Into::<BoxError>::into),
        )
            .into_layer(client)
            .boxed();

        Self {
            client,
            uri,
            payload: Arc::new(payload),
            expected_status: cfg.expected_status,
            check: format!("status is {}", cfg.expected_status.as_u16()),
        }
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }
}

impl IterationRunner for HttpPostRunner {
    async fn run(&self, ctx: IterationContext) -> IterationOutcome {
        let result = self
            .client
            .post(self.uri.clone())
            .header(ITERATION_ID_HEADER, ctx.id)
            .json(&*self.payload)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status() == self.expected_status => IterationOutcome::Success,
            Ok(resp) => {
                let status = resp.status();
                tracing::trace!(
                    iteration = ctx.id,
                    %status,
                    "unexpected response status"
                );
                IterationOutcome::CheckFailure(self.check.clone())
            }
            Err(err) => IterationOutcome::TransportError(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests;
