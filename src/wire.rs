//! Newline-delimited JSON over TCP.
//!
//! One request object per line, tagged by `op`; one response line back, in
//! order. Every response carries the `request_id` the request was logged under.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveTime;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{Instrument, debug, error, info, info_span, warn};
use ulid::Ulid;

use crate::engine::{
    AvailabilityRequest, BookingError, BookingRequest, Engine, LockOutcome, LockRefusal,
    LockRequest, Throttled,
};
use crate::limits::MAX_LINE_LEN;
use crate::model::LockReason;
use crate::observability::{
    CONNECTIONS_ACTIVE, CONNECTIONS_REJECTED_TOTAL, CONNECTIONS_TOTAL, REQUEST_DURATION_SECONDS,
    REQUESTS_TOTAL,
};
use crate::reconcile::{PosEventInput, ReconcileError, ReconciliationQueue};

/// Longest client-supplied correlation id that is echoed back.
const MAX_REQUEST_ID_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    CheckAvailability(AvailabilityRequest),
    AcquireLock(LockRequest),
    ReleaseLock {
        lock_token: String,
        #[serde(default)]
        reason: Option<LockReason>,
    },
    CommitBooking(BookingRequest),
    ReceivePosEvent(PosEventInput),
    Ping,
}

impl Request {
    pub fn op(&self) -> &'static str {
        match self {
            Request::CheckAvailability(_) => "check_availability",
            Request::AcquireLock(_) => "acquire_lock",
            Request::ReleaseLock { .. } => "release_lock",
            Request::CommitBooking(_) => "commit_booking",
            Request::ReceivePosEvent(_) => "receive_pos_event",
            Request::Ping => "ping",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub request_id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub status: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternatives: Option<Vec<NaiveTime>>,
}

impl Response {
    fn ok(request_id: String, data: Value) -> Self {
        Self {
            request_id,
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn failed(request_id: String, error: ErrorBody) -> Self {
        Self {
            request_id,
            ok: false,
            data: None,
            error: Some(error),
        }
    }
}

impl From<&BookingError> for ErrorBody {
    fn from(e: &BookingError) -> Self {
        Self {
            code: e.code().to_string(),
            status: e.status(),
            message: e.public_message(),
            alternatives: None,
        }
    }
}

impl From<LockRefusal> for ErrorBody {
    fn from(r: LockRefusal) -> Self {
        Self {
            code: "slot_conflict".to_string(),
            status: 409,
            message: r.message,
            alternatives: Some(r.alternatives),
        }
    }
}

/// What a successfully dispatched request produced.
enum Reply {
    Data(Value),
    Refused(LockRefusal),
}

fn reconcile_error(e: ReconcileError) -> BookingError {
    match e {
        ReconcileError::InvalidEvent(msg) => BookingError::InvalidInput(msg),
        ReconcileError::UnknownVenue(_) => BookingError::VenueNotFound,
        other => BookingError::Internal(other.to_string()),
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, BookingError> {
    serde_json::to_value(value).map_err(|e| BookingError::Internal(e.to_string()))
}

/// Everything a connection needs to answer requests.
pub struct Handler {
    engine: Arc<Engine>,
    queue: Arc<ReconciliationQueue>,
}

impl Handler {
    pub fn new(engine: Arc<Engine>, queue: Arc<ReconciliationQueue>) -> Self {
        Self { engine, queue }
    }

    /// Answer one request line from `client`.
    pub async fn handle_line(&self, line: &str, client: IpAddr) -> Response {
        let (request_id, parsed) = parse(line);
        let span = info_span!("request", %request_id, %client);
        async move {
            let request = match parsed {
                Ok(request) => request,
                Err(e) => {
                    debug!("malformed request: {e}");
                    metrics::counter!(REQUESTS_TOTAL, "op" => "unknown", "outcome" => "invalid_input")
                        .increment(1);
                    let err = BookingError::InvalidInput("malformed request".into());
                    return Response::failed(request_id, ErrorBody::from(&err));
                }
            };

            let op = request.op();
            let started = Instant::now();
            let result = self.dispatch(request, &client.to_string()).await;
            metrics::histogram!(REQUEST_DURATION_SECONDS, "op" => op)
                .record(started.elapsed().as_secs_f64());

            match result {
                Ok(Reply::Data(data)) => {
                    metrics::counter!(REQUESTS_TOTAL, "op" => op, "outcome" => "ok").increment(1);
                    Response::ok(request_id, data)
                }
                Ok(Reply::Refused(refusal)) => {
                    metrics::counter!(REQUESTS_TOTAL, "op" => op, "outcome" => "refused")
                        .increment(1);
                    Response::failed(request_id, ErrorBody::from(refusal))
                }
                Err(e) => {
                    if e.status() >= 500 {
                        error!(op, code = e.code(), "request failed: {e}");
                    } else {
                        info!(op, code = e.code(), "request rejected: {e}");
                    }
                    metrics::counter!(REQUESTS_TOTAL, "op" => op, "outcome" => e.code())
                        .increment(1);
                    Response::failed(request_id, ErrorBody::from(&e))
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn dispatch(&self, request: Request, client: &str) -> Result<Reply, BookingError> {
        match request {
            Request::CheckAvailability(req) => {
                let report = self.engine.check_availability(&req).await?;
                Ok(Reply::Data(to_value(&report)?))
            }
            Request::AcquireLock(req) => {
                self.engine.admit(client, Throttled::AcquireLock)?;
                match self.engine.acquire_lock(&req).await? {
                    LockOutcome::Granted(grant) => Ok(Reply::Data(json!({
                        "lock_token": grant.token,
                        "expires_at": grant.expires_at,
                    }))),
                    LockOutcome::Refused(refusal) => Ok(Reply::Refused(refusal)),
                }
            }
            Request::ReleaseLock { lock_token, reason } => {
                // Never fails the caller: an unknown or malformed token is simply not released.
                let released = match lock_token.parse::<Ulid>() {
                    Ok(token) => {
                        self.engine
                            .release_lock(token, reason.unwrap_or(LockReason::Error))
                            .await
                    }
                    Err(_) => false,
                };
                Ok(Reply::Data(json!({ "released": released })))
            }
            Request::CommitBooking(req) => {
                self.engine.admit(client, Throttled::CommitBooking)?;
                let booking = self.engine.commit_booking(&req).await?;
                Ok(Reply::Data(json!({ "booking": to_value(&booking)? })))
            }
            Request::ReceivePosEvent(input) => {
                let receipt = self.queue.receive(input).await.map_err(reconcile_error)?;
                Ok(Reply::Data(to_value(&receipt)?))
            }
            Request::Ping => Ok(Reply::Data(json!({ "pong": true }))),
        }
    }
}

/// Split a line into the correlation id to answer with and the request.
/// A usable client-supplied `request_id` is echoed; otherwise a fresh ULID.
fn parse(line: &str) -> (String, Result<Request, serde_json::Error>) {
    let mut value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return (Ulid::new().to_string(), Err(e)),
    };
    let supplied = value
        .as_object_mut()
        .and_then(|obj| obj.remove("request_id"))
        .and_then(|id| id.as_str().map(str::to_string))
        .filter(|id| !id.is_empty() && id.len() <= MAX_REQUEST_ID_LEN);
    let request_id = supplied.unwrap_or_else(|| Ulid::new().to_string());
    (request_id, serde_json::from_value(value))
}

/// Serve one client until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    peer: SocketAddr,
    handler: Arc<Handler>,
) -> std::io::Result<()> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    while let Some(frame) = framed.next().await {
        let response = match frame {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => handler.handle_line(&line, peer.ip()).await,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                warn!(%peer, "request line too long");
                let err = BookingError::InvalidInput("request too large".into());
                Response::failed(Ulid::new().to_string(), ErrorBody::from(&err))
            }
            Err(LinesCodecError::Io(e)) => return Err(e),
        };
        let encoded = match serde_json::to_string(&response) {
            Ok(s) => s,
            Err(e) => {
                error!("cannot encode response: {e}");
                continue;
            }
        };
        framed.send(encoded).await.map_err(|e| match e {
            LinesCodecError::Io(e) => e,
            other => std::io::Error::other(other.to_string()),
        })?;
    }
    Ok(())
}

/// Accept loop: at most `max_connections` clients at once, stops accepting
/// when `shutdown` resolves, then waits up to `drain` for open connections.
pub async fn serve(
    listener: TcpListener,
    handler: Arc<Handler>,
    max_connections: usize,
    drain: Duration,
    shutdown: impl Future<Output = ()>,
) {
    let semaphore = Arc::new(Semaphore::new(max_connections));
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                debug!("connection from {peer}");
                metrics::counter!(CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(CONNECTIONS_ACTIVE).increment(1.0);
                let handler = handler.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = process_connection(socket, peer, handler).await {
                        warn!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    info!("draining connections...");
    let deadline = tokio::time::sleep(drain);
    tokio::pin!(deadline);
    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut deadline => {
                let remaining = max_connections - semaphore.available_permits();
                warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }
}
