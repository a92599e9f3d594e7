// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listener task for the control-plane socket.
//!
//! Accepts connections and handles them without blocking the engagement
//! runtime. Requests on one connection are handled strictly FIFO; after
//! `engagement.attach` the same connection additionally carries stream
//! events until detach or disconnect. All socket writes go through one
//! outbound queue per connection so responses and events never interleave
//! mid-line.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::protocol::{
    read_message, Command, ProtocolError, Request, Response, StreamEvent, StreamEventType,
};
use crate::sessions::{SessionError, SessionManager};

/// Shared daemon context for all connections.
pub struct ListenCtx {
    pub manager: Arc<SessionManager>,
    pub shutdown: Arc<Notify>,
    pub drain_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Exit code decided at shutdown time (0 clean, 1 forced/error).
    pub exit_code: Mutex<i32>,
}

/// Accept loop over the control socket.
pub struct Listener {
    unix: UnixListener,
    ctx: Arc<ListenCtx>,
}

impl Listener {
    pub fn new(unix: UnixListener, ctx: Arc<ListenCtx>) -> Self {
        Listener { unix, ctx }
    }

    pub async fn run(self) {
        loop {
            match self.unix.accept().await {
                Ok((stream, _)) => {
                    let ctx = Arc::clone(&self.ctx);
                    tokio::spawn(async move {
                        handle_connection(stream, ctx).await;
                    });
                }
                Err(e) => error!(error = %e, "accept error"),
            }
        }
    }
}

struct Attachment {
    subscription_id: String,
    forwarder: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

/// One connection: a FIFO request loop plus an outbound writer task.
async fn handle_connection(stream: UnixStream, ctx: Arc<ListenCtx>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    // Single outbound queue: responses and stream events share it, so each
    // write is one complete line in queue order.
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        use tokio::io::AsyncWriteExt;
        while let Some(line) = outbound_rx.recv().await {
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if write_half.flush().await.is_err() {
                break;
            }
        }
    });

    // engagement_id → live attachment on this connection.
    let mut attachments: HashMap<String, Attachment> = HashMap::new();

    loop {
        let request: Request = match read_message(&mut reader, None).await {
            Ok(request) => request,
            Err(ProtocolError::ConnectionClosed) => {
                debug!("client disconnected");
                break;
            }
            Err(ProtocolError::TooLarge) => {
                send(&outbound, &Response::error("", "Protocol error: message too large"));
                continue;
            }
            Err(ProtocolError::Malformed(e)) => {
                send(&outbound, &Response::error("", format!("Protocol error: {e}")));
                continue;
            }
            Err(e) => {
                warn!(error = %e, "connection read error");
                break;
            }
        };

        let Some(command) = Command::parse(&request.command) else {
            send(
                &outbound,
                &Response::error(
                    request.request_id,
                    format!("Protocol error: unknown command: {}", request.command),
                ),
            );
            continue;
        };
        debug!(%command, request_id = %request.request_id, "received request");

        let stop_after = command == Command::DaemonStop;
        if let Some(response) =
            dispatch(command, &request, &ctx, &outbound, &mut attachments).await
        {
            send(&outbound, &response);
        }
        if stop_after {
            break;
        }
    }

    for (engagement_id, attachment) in attachments {
        ctx.manager.unsubscribe(&engagement_id, &attachment.subscription_id);
        attachment.forwarder.abort();
        attachment.heartbeat.abort();
    }
    drop(outbound);
    let _ = writer.await;
}

fn send(outbound: &mpsc::UnboundedSender<String>, response: &Response) {
    match serde_json::to_string(response) {
        Ok(mut line) => {
            line.push('\n');
            let _ = outbound.send(line);
        }
        Err(e) => error!(error = %e, "failed to serialize response"),
    }
}

fn send_event(outbound: &mpsc::UnboundedSender<String>, event: &StreamEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(mut line) => {
            line.push('\n');
            outbound.send(line).is_ok()
        }
        Err(_) => false,
    }
}

fn session_error(request_id: &str, error: SessionError) -> Response {
    Response::error(request_id, error.to_string())
}

fn missing(request_id: &str, name: &str) -> Response {
    Response::error(request_id, format!("Missing required parameter: {name}"))
}

async fn dispatch(
    command: Command,
    request: &Request,
    ctx: &Arc<ListenCtx>,
    outbound: &mpsc::UnboundedSender<String>,
    attachments: &mut HashMap<String, Attachment>,
) -> Option<Response> {
    let request_id = request.request_id.clone();
    Some(match command {
        Command::SessionsList => {
            let sessions = ctx.manager.list();
            match serde_json::to_value(&sessions) {
                Ok(value) => Response::ok(request_id, json!({"sessions": value})),
                Err(e) => Response::error(request_id, e.to_string()),
            }
        }

        Command::EngagementStart => {
            let Some(config) = request.param_str("config") else {
                return Some(missing(&request_id, "config"));
            };
            let accept_warnings = request.param_bool("accept_warnings");
            let id = match ctx.manager.create(std::path::Path::new(config)) {
                Ok(id) => id,
                Err(e) => return Some(session_error(&request_id, e)),
            };
            match ctx.manager.start(id.as_str(), accept_warnings).await {
                Ok(()) => Response::ok(request_id, json!({"engagement_id": id.as_str()})),
                Err(e) => session_error(&request_id, e),
            }
        }

        Command::EngagementAttach => {
            let Some(engagement_id) = request.param_str("engagement_id") else {
                return Some(missing(&request_id, "engagement_id"));
            };
            // attach writes its own response so the snapshot precedes any
            // streamed event on the wire.
            return attach(engagement_id, &request_id, ctx, outbound, attachments);
        }

        Command::EngagementDetach => {
            let Some(engagement_id) = request.param_str("engagement_id") else {
                return Some(missing(&request_id, "engagement_id"));
            };
            let removed = match attachments.remove(engagement_id) {
                Some(attachment) => {
                    ctx.manager.unsubscribe(engagement_id, &attachment.subscription_id);
                    attachment.forwarder.abort();
                    attachment.heartbeat.abort();
                    true
                }
                None => false,
            };
            Response::ok(request_id, json!({"detached": removed}))
        }

        Command::EngagementPause => {
            let Some(engagement_id) = request.param_str("engagement_id") else {
                return Some(missing(&request_id, "engagement_id"));
            };
            match ctx.manager.pause(engagement_id) {
                Ok(()) => Response::ok(request_id, json!({"state": "PAUSED"})),
                Err(e) => session_error(&request_id, e),
            }
        }

        Command::EngagementResume => {
            let Some(engagement_id) = request.param_str("engagement_id") else {
                return Some(missing(&request_id, "engagement_id"));
            };
            match ctx.manager.resume(engagement_id).await {
                Ok(()) => Response::ok(request_id, json!({"state": "RUNNING"})),
                Err(e) => session_error(&request_id, e),
            }
        }

        Command::EngagementStop => {
            let Some(engagement_id) = request.param_str("engagement_id") else {
                return Some(missing(&request_id, "engagement_id"));
            };
            match ctx.manager.stop(engagement_id).await {
                Ok(()) => Response::ok(request_id, json!({"state": "STOPPED"})),
                Err(e) => session_error(&request_id, e),
            }
        }

        Command::DaemonStop => {
            info!("daemon stop requested");
            let errors = ctx.manager.graceful_shutdown(ctx.drain_timeout).await;
            let clean = errors.values().all(Vec::is_empty);
            *ctx.exit_code.lock() = if clean { 0 } else { 1 };
            let response = Response::ok(request_id, json!({"engagements": errors}));
            ctx.shutdown.notify_one();
            response
        }
    })
}

/// Subscribe this connection to an engagement's stream: snapshot in the
/// response, then events (and heartbeats) on the same socket. Writes its
/// own response so the response line always precedes the first event.
fn attach(
    engagement_id: &str,
    request_id: &str,
    ctx: &Arc<ListenCtx>,
    outbound: &mpsc::UnboundedSender<String>,
    attachments: &mut HashMap<String, Attachment>,
) -> Option<Response> {
    let started = std::time::Instant::now();
    let snapshot = match ctx.manager.snapshot(engagement_id) {
        Ok(snapshot) => snapshot,
        Err(e) => return Some(session_error(request_id, e)),
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<StreamEvent>();
    let subscription_id = match ctx.manager.subscribe(engagement_id, tx) {
        Ok(id) => id.as_str().to_string(),
        Err(e) => return Some(session_error(request_id, e)),
    };

    let event_queue = outbound.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if !send_event(&event_queue, &event) {
                break;
            }
        }
    });

    let heartbeat_queue = outbound.clone();
    let interval = ctx.heartbeat_interval;
    let heartbeat = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // immediate first tick is not a heartbeat
        loop {
            ticker.tick().await;
            if !send_event(&heartbeat_queue, &StreamEvent::heartbeat()) {
                break;
            }
        }
    });

    // Re-attaching to the same engagement replaces the old attachment.
    if let Some(previous) = attachments.insert(
        engagement_id.to_string(),
        Attachment { subscription_id: subscription_id.clone(), forwarder, heartbeat },
    ) {
        ctx.manager.unsubscribe(engagement_id, &previous.subscription_id);
        previous.forwarder.abort();
        previous.heartbeat.abort();
    }

    send(
        outbound,
        &Response::ok(
            request_id,
            json!({"snapshot": snapshot.clone(), "subscription_id": subscription_id}),
        ),
    );
    // The snapshot doubles as the initial state_change event on the stream.
    send_event(outbound, &StreamEvent::new(StreamEventType::StateChange, snapshot));
    // Attach latency is performance-visible; keep it observable.
    debug!(
        engagement_id,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "attach snapshot ready"
    );
    None
}

#[cfg(test)]
#[path = "../listener_tests.rs"]
mod tests;
