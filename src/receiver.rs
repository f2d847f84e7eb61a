use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ReceiverConfig;
use crate::event::{Action, Event};
use crate::manager::Manager;

/// Why an inbound message was rejected before ingestion.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("empty post_id")]
    EmptyPostId,
    #[error("empty user_id")]
    EmptyUserId,
}

/// Inbound message shape: newline-delimited JSON over TCP.
#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(default)]
    post_id: String,
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    created_at: Option<i64>,
}

/// Decodes one wire message into an event.
///
/// Unknown or missing actions default to `view`; a missing `created_at`
/// is replaced with the current time. Messages without a post or user id
/// are rejected.
pub fn decode_message(raw: &str) -> Result<Event, DecodeError> {
    let wire: WireEvent = serde_json::from_str(raw)?;

    if wire.post_id.is_empty() {
        return Err(DecodeError::EmptyPostId);
    }
    if wire.user_id.is_empty() {
        return Err(DecodeError::EmptyUserId);
    }

    let action = wire
        .action
        .as_deref()
        .and_then(Action::from_str)
        .unwrap_or(Action::View);

    let created_at = wire
        .created_at
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now);

    Ok(Event::new(wire.post_id, wire.user_id, action, created_at))
}

/// TCP adapter feeding decoded events into the manager.
///
/// Each connection is served by its own task; decode failures skip the
/// offending line and keep the connection open. No back-pressure is
/// exerted toward senders.
pub struct Receiver {
    cfg: ReceiverConfig,
    manager: Arc<Manager>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Receiver {
    pub fn new(cfg: ReceiverConfig, manager: Arc<Manager>) -> Self {
        Self {
            cfg,
            manager,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Binds the listener and spawns the accept loop. Returns the bound
    /// address.
    pub async fn start(&self) -> Result<SocketAddr> {
        let listener = TcpListener::bind(&self.cfg.listen_addr)
            .await
            .with_context(|| format!("binding receiver to {}", self.cfg.listen_addr))?;
        let local_addr = listener.local_addr().context("resolving receiver address")?;

        info!(addr = %local_addr, "receiver listening");

        let manager = Arc::clone(&self.manager);
        let cancel = self.cancel.clone();
        *self.task.lock().await = Some(tokio::spawn(async move {
            run_accept_loop(listener, manager, cancel).await;
        }));

        Ok(local_addr)
    }

    /// Stops accepting connections and tears down open ones.
    pub async fn stop(&self) {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "receiver task join failed");
            }
        }
        info!("receiver stopped");
    }
}

async fn run_accept_loop(
    listener: TcpListener,
    manager: Arc<Manager>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "connection accepted");
                    let manager = Arc::clone(&manager);
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        serve_connection(stream, manager, cancel).await;
                    });
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                }
            },
        }
    }
}

async fn serve_connection(stream: TcpStream, manager: Arc<Manager>, cancel: CancellationToken) {
    let mut lines = BufReader::new(stream).lines();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            line = lines.next_line() => match line {
                Ok(Some(line)) => match decode_message(&line) {
                    Ok(event) => manager.ingest(event).await,
                    Err(e) => debug!(error = %e, "dropping inbound message"),
                },
                Ok(None) => return,
                Err(e) => {
                    debug!(error = %e, "connection read failed");
                    return;
                }
            },
        }
    }
}
