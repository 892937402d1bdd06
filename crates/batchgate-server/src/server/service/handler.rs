//! HTTP front-end for the batch dispatcher.
//!
//! [`BatchService`] owns one [`Dispatcher`] wired to a
//! [`RateLimitedAcceptor`] built from [`ServerConfig`]. Handlers translate
//! JSON requests into submissions and map dispatcher errors onto status codes.
//!
//! ## Routes
//!
//! - `GET /` - liveness and version.
//! - `POST /send` - `{"number": N}` queues ids `0..N`; an optional
//!   `deadline_ms` (capped by `MAX_DEADLINE_MS`) cancels whatever is still
//!   undelivered after that long.
//! - `POST /cancel` - terminates the dispatcher; later sends get `503`.
//! - `GET /stats` - lifecycle and dispatch counters.

use crate::server::{
    config::ServerConfig,
    telemetry::{
        increment_request_errors, increment_requests, record_handoff_wait,
        record_items_per_request,
    },
};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use batchgate::{Dispatcher, Error, Item, RateLimitedAcceptor, sequential_batch};
use core::time::Duration;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct BatchService {
    config: ServerConfig,
    dispatcher: Dispatcher,
}

impl BatchService {
    /// Builds the acceptor and spawns the dispatch loop on the current
    /// runtime.
    pub fn new(config: ServerConfig) -> batchgate::Result<Self> {
        let acceptor = RateLimitedAcceptor::builder()
            .max_items(config.max_items)
            .min_period(config.min_period)
            .freeze_window(config.freeze_window)
            .consumer(log_chunk)
            .build()?;

        let dispatcher =
            Dispatcher::spawn(acceptor, CancellationToken::new(), config.dispatcher());

        Ok(Self { config, dispatcher })
    }

    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(status))
            .route("/send", post(send))
            .route("/cancel", post(cancel))
            .route("/stats", get(stats))
            .with_state(self.clone())
    }

    /// Refuses new submissions and waits up to the configured timeout for
    /// queued ones to reach the acceptor.
    pub async fn shutdown(&self) -> batchgate::Result<()> {
        self.dispatcher.shutdown(self.config.shutdown_timeout).await
    }
}

fn log_chunk(chunk: &[Item]) {
    if let (Some(first), Some(last)) = (chunk.first(), chunk.last()) {
        tracing::debug!(first = first.id, last = last.id, "Accepted {} items", chunk.len());
    }
}

#[derive(Serialize)]
struct StatusBody {
    app: &'static str,
    status: &'static str,
    version: &'static str,
}

async fn status() -> Json<StatusBody> {
    Json(StatusBody {
        app: "batchgate",
        status: "OK",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub number: usize,
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

/// Queues a batch of `number` sequential items.
///
/// Responds `202` as soon as the dispatcher takes the batch; delivery to the
/// acceptor happens afterwards.
#[tracing::instrument(skip_all, fields(number = req.number))]
async fn send(
    State(service): State<BatchService>,
    Json(req): Json<SendRequest>,
) -> Result<(StatusCode, &'static str), ApiError> {
    if req.number > service.config.max_request_items {
        increment_request_errors();
        return Err(ApiError::bad_request(format!(
            "number {} exceeds maximum allowed ({})",
            req.number, service.config.max_request_items
        )));
    }

    let deadline = req.deadline_ms.map(Duration::from_millis);
    if deadline.is_some_and(|deadline| deadline > service.config.max_deadline) {
        increment_request_errors();
        return Err(ApiError::bad_request(format!(
            "deadline_ms exceeds maximum allowed ({})",
            service.config.max_deadline.as_millis()
        )));
    }

    increment_requests();
    record_items_per_request(req.number as f64);

    let cancel = CancellationToken::new();
    if let Some(deadline) = deadline {
        let expiry = cancel.clone();
        let dispatcher = service.dispatcher.clone();
        // Nothing is left to cancel once the dispatch loop has exited.
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(deadline) => expiry.cancel(),
                () = dispatcher.closed() => {}
            }
        });
    }

    let start = tokio::time::Instant::now();
    let sent = service
        .dispatcher
        .send(cancel, sequential_batch(req.number))
        .await;
    record_handoff_wait(start.elapsed().as_secs_f64() * 1000.0);

    match sent {
        Ok(()) => Ok((StatusCode::ACCEPTED, "done")),
        Err(err) => {
            increment_request_errors();
            tracing::warn!("Submission refused: {err}");
            Err(err.into())
        }
    }
}

async fn cancel(State(service): State<BatchService>) -> &'static str {
    tracing::info!("Terminating dispatcher on request");
    service.dispatcher.terminate();
    "done"
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatsBody {
    pub lifecycle: String,
    pub submissions_received: u64,
    pub submissions_completed: u64,
    pub submissions_abandoned: u64,
    pub chunks_accepted: u64,
    pub chunks_blocked: u64,
    pub items_accepted: u64,
    pub items_dropped: u64,
    pub limit_refreshes: u64,
}

async fn stats(State(service): State<BatchService>) -> Json<StatsBody> {
    let snapshot = service.dispatcher.stats().snapshot();
    Json(StatsBody {
        lifecycle: service.dispatcher.lifecycle().to_string(),
        submissions_received: snapshot.submissions_received,
        submissions_completed: snapshot.submissions_completed,
        submissions_abandoned: snapshot.submissions_abandoned,
        chunks_accepted: snapshot.chunks_accepted,
        chunks_blocked: snapshot.chunks_blocked,
        items_accepted: snapshot.items_accepted,
        items_dropped: snapshot.items_dropped,
        limit_refreshes: snapshot.limit_refreshes,
    })
}

/// A failed request, rendered as `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: String) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message,
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match err {
            Error::Terminated => StatusCode::SERVICE_UNAVAILABLE,
            Error::Cancelled => StatusCode::REQUEST_TIMEOUT,
            Error::InvalidConfig { .. } => StatusCode::BAD_REQUEST,
            Error::Blocked(_) | Error::ShutdownTimeout(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}
