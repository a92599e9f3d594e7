// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Library client for the control-plane socket.
//!
//! One request at a time, FIFO. After `attach`, stream events arrive on
//! the same connection; [`DaemonClient::next_event`] reads them with a
//! heartbeat-derived timeout (server interval + margin), and `request`
//! transparently queues any events that arrive while a response is
//! pending.

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::{unix::OwnedReadHalf, unix::OwnedWriteHalf, UnixStream};

use crate::env::ipc_timeout;
use crate::protocol::{
    read_message, write_message, Command, ProtocolError, Request, Response, StreamEvent,
};

/// Margin added to the server heartbeat interval for the read timeout.
const HEARTBEAT_MARGIN: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("daemon error: {0}")]
    Daemon(String),

    #[error("unexpected frame from daemon")]
    UnexpectedFrame,
}

pub struct DaemonClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    heartbeat_timeout: Duration,
    pending_events: VecDeque<StreamEvent>,
}

impl DaemonClient {
    pub async fn connect(socket_path: &Path) -> Result<Self, ClientError> {
        Self::connect_with_heartbeat(socket_path, crate::env::heartbeat_interval()).await
    }

    /// Connect with an explicit server heartbeat interval; the read
    /// timeout is the interval plus a fixed margin.
    pub async fn connect_with_heartbeat(
        socket_path: &Path,
        heartbeat_interval: Duration,
    ) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(socket_path).await?;
        let (read, writer) = stream.into_split();
        Ok(DaemonClient {
            reader: BufReader::new(read),
            writer,
            heartbeat_timeout: heartbeat_interval + HEARTBEAT_MARGIN,
            pending_events: VecDeque::new(),
        })
    }

    /// Issue one command and wait for its response. Stream events that
    /// arrive first are queued for [`next_event`].
    ///
    /// [`next_event`]: DaemonClient::next_event
    pub async fn request(
        &mut self,
        command: Command,
        params: Value,
    ) -> Result<Response, ClientError> {
        let request = Request::new(command.as_str(), params);
        write_message(&mut self.writer, &request, ipc_timeout()).await?;
        loop {
            let value: Value =
                read_message(&mut self.reader, Some(self.heartbeat_timeout)).await?;
            if value.get("event_type").is_some() {
                if let Ok(event) = serde_json::from_value::<StreamEvent>(value) {
                    self.pending_events.push_back(event);
                }
                continue;
            }
            let response: Response = serde_json::from_value(value)
                .map_err(|_| ClientError::UnexpectedFrame)?;
            return Ok(response);
        }
    }

    /// Like [`request`] but failing on an error response.
    ///
    /// [`request`]: DaemonClient::request
    pub async fn expect_ok(
        &mut self,
        command: Command,
        params: Value,
    ) -> Result<Value, ClientError> {
        let response = self.request(command, params).await?;
        if !response.is_ok() {
            return Err(ClientError::Daemon(
                response.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(response.data.unwrap_or(Value::Null))
    }

    /// Attach to an engagement: returns `(snapshot, subscription_id)` and
    /// leaves the connection in streaming mode.
    pub async fn attach(
        &mut self,
        engagement_id: &str,
    ) -> Result<(Value, String), ClientError> {
        let data = self
            .expect_ok(Command::EngagementAttach, json!({"engagement_id": engagement_id}))
            .await?;
        let subscription_id = data["subscription_id"].as_str().unwrap_or_default().to_string();
        Ok((data["snapshot"].clone(), subscription_id))
    }

    /// Next stream event; a connection with no traffic for longer than the
    /// heartbeat timeout is treated as dead.
    pub async fn next_event(&mut self) -> Result<StreamEvent, ClientError> {
        if let Some(event) = self.pending_events.pop_front() {
            return Ok(event);
        }
        let value: Value =
            read_message(&mut self.reader, Some(self.heartbeat_timeout)).await?;
        if value.get("event_type").is_some() {
            return serde_json::from_value(value).map_err(|_| ClientError::UnexpectedFrame);
        }
        // A response frame while streaming belongs to a concurrent request;
        // that is a protocol misuse by the caller.
        Err(ClientError::UnexpectedFrame)
    }

    /// Detach from an engagement's stream.
    pub async fn detach(&mut self, engagement_id: &str) -> Result<bool, ClientError> {
        let data = self
            .expect_ok(Command::EngagementDetach, json!({"engagement_id": engagement_id}))
            .await?;
        Ok(data["detached"].as_bool().unwrap_or(false))
    }
}
