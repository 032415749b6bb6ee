//! Single-use HTTP listener that captures the authorization redirect.
//!
//! The server runs on its own tokio task. The captured outcome travels back
//! to the waiting flow over a oneshot channel, so there is no shared
//! mutable slot and no polling.
//!
//! ```text
//! browser ── GET /callback?code=..&state=.. ──▶ handler ──oneshot──▶ wait()
//!                                                                    │
//!                              graceful shutdown ◀──────────────────┘
//! ```

use super::AuthError;
use axum::{
    extract::{RawQuery, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long a stopping server may take to drain before it is aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// What the listener captured.
#[derive(Clone, Debug, PartialEq)]
pub enum CallbackOutcome {
    Code {
        code: String,
        state: Option<String>,
    },
    Denied {
        error: String,
        description: Option<String>,
    },
    TimedOut,
}

#[derive(Deserialize, Default)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

type OutcomeSlot = Arc<Mutex<Option<oneshot::Sender<CallbackOutcome>>>>;

/// Router serving the callback on `path`. The first request carrying a code
/// or an error is forwarded to `outcome_tx`; later ones are refused.
pub fn callback_router(path: &str, outcome_tx: oneshot::Sender<CallbackOutcome>) -> Router {
    let slot: OutcomeSlot = Arc::new(Mutex::new(Some(outcome_tx)));
    Router::new()
        .route(path, get(handle_callback))
        .with_state(slot)
}

async fn handle_callback(State(slot): State<OutcomeSlot>, RawQuery(query): RawQuery) -> Response {
    let params: CallbackParams = match serde_urlencoded::from_str(query.as_deref().unwrap_or("")) {
        Ok(params) => params,
        Err(e) => {
            warn!(error = %e, "Unparseable callback query");
            CallbackParams::default()
        }
    };

    let (outcome, response) = match (params.code.filter(|c| !c.is_empty()), params.error) {
        (Some(code), _) => (
            CallbackOutcome::Code {
                code,
                state: params.state,
            },
            page(
                StatusCode::OK,
                "Sign-in response received",
                "You can close this window and return to the application to finish signing in.",
            ),
        ),
        (None, Some(error)) => {
            let detail = match &params.error_description {
                Some(description) => format!("{}: {}", error, description),
                None => error.clone(),
            };
            (
                CallbackOutcome::Denied {
                    error,
                    description: params.error_description,
                },
                page(StatusCode::BAD_REQUEST, "Authentication failed", &detail),
            )
        }
        (None, None) => {
            return page(
                StatusCode::BAD_REQUEST,
                "Sign-in incomplete",
                "The request did not contain an authorization code.",
            );
        }
    };

    let Some(sender) = slot.lock().unwrap().take() else {
        return page(
            StatusCode::GONE,
            "Sign-in already completed",
            "This sign-in request has already been handled. You can close this window.",
        );
    };

    match &outcome {
        CallbackOutcome::Denied { error, .. } => {
            warn!(error = %error, "Authorization callback carried an error")
        }
        _ => info!("Authorization code received"),
    }

    // The waiter may already have given up
    if sender.send(outcome).is_err() {
        debug!("Callback arrived after the listener stopped waiting");
    }
    response
}

fn page(status: StatusCode, title: &str, message: &str) -> Response {
    let body = format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
         <body><h1>{title}</h1><p>{message}</p></body></html>",
        title = html_escape(title),
        message = html_escape(message),
    );
    (status, [(header::CONNECTION, "close")], Html(body)).into_response()
}

fn html_escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// A running callback listener bound to `127.0.0.1`.
///
/// Dropping it without calling [`wait`](Self::wait) still stops the server.
pub struct LoopbackListener {
    local_addr: SocketAddr,
    outcome_rx: Option<oneshot::Receiver<CallbackOutcome>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<()>>,
}

impl LoopbackListener {
    /// Binds `127.0.0.1:port` (0 picks a free port) and starts serving `path`.
    pub async fn bind(port: u16, path: &str) -> Result<Self, AuthError> {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };

        let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, port))
            .await
            .map_err(|e| AuthError::Listener(format!("failed to bind 127.0.0.1:{}: {}", port, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| AuthError::Listener(e.to_string()))?;

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = callback_router(&path, outcome_tx);

        let server = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "Loopback listener stopped with an error");
            }
        });

        debug!(addr = %local_addr, path = %path, "Loopback listener started");
        Ok(Self {
            local_addr,
            outcome_rx: Some(outcome_rx),
            shutdown_tx: Some(shutdown_tx),
            server: Some(server),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Waits up to `timeout` for the callback, then stops the server. The
    /// port is released by the time this returns, whatever the outcome.
    pub async fn wait(mut self, timeout: Duration) -> CallbackOutcome {
        let outcome = match self.outcome_rx.take() {
            Some(rx) => match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_)) => {
                    warn!("Loopback listener exited before a callback arrived");
                    CallbackOutcome::TimedOut
                }
                Err(_) => {
                    info!(timeout_secs = timeout.as_secs(), "No authorization callback before deadline");
                    CallbackOutcome::TimedOut
                }
            },
            None => CallbackOutcome::TimedOut,
        };

        self.shutdown().await;
        outcome
    }

    async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut server) = self.server.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await.is_err() {
                warn!("Loopback listener did not drain in time; aborting");
                server.abort();
                let _ = server.await;
            }
        }
        debug!(addr = %self.local_addr, "Loopback listener stopped");
    }
}

impl Drop for LoopbackListener {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}
