//! Assistant client
//!
//! Owns the one logical session to the smart-home assistant backend.
//! Requests on a session are serialized: one exchange is in flight at a
//! time and later callers wait in arrival order.
//!
//! ```text
//! Uninitialized ──initialize──▶ Initializing ──ok──▶ Ready ◀──▶ Sending
//!                                    │                 │          │
//!                                    └──err──▶ Failed ◀┴──lost────┘
//!                                                │
//!                                    initialize (explicit, never automatic)
//! ```

pub mod mcp;

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

pub use mcp::McpTransport;

use crate::{Error, Result};

/// Lifecycle of the backend session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    Sending,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Sending => "sending",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Normalized text for one exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantRequest {
    turn_id: Uuid,
    text: String,
}

impl AssistantRequest {
    /// Build a request, trimming the text
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if nothing remains after trimming
    pub fn new(turn_id: Uuid, text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::InvalidRequest("request text is empty".to_string()));
        }
        Ok(Self {
            turn_id,
            text: text.to_string(),
        })
    }

    #[must_use]
    pub const fn turn_id(&self) -> Uuid {
        self.turn_id
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Backend answer plus exchange metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantReply {
    pub turn_id: Uuid,
    pub text: String,
    pub latency: Duration,
    pub success: bool,
}

/// What the handshake learned about the backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInfo {
    /// Transport-level session identifier, if the backend issues one
    pub session_id: Option<String>,
    pub server_name: Option<String>,
    pub server_version: Option<String>,
    pub protocol_version: Option<String>,
}

/// Wire protocol to the backend
///
/// Implementations report session loss as `Error::Connection` and
/// backend-side failures as `Error::Backend`.
#[async_trait]
pub trait AssistantTransport: Send + Sync {
    /// Establish a session: connect, authenticate, negotiate capabilities
    async fn handshake(&self) -> Result<SessionInfo>;

    /// Send one request and wait for the textual reply
    async fn exchange(&self, session: &SessionInfo, text: &str) -> Result<String>;

    /// End the session on the backend
    async fn close(&self, _session: &SessionInfo) -> Result<()> {
        Ok(())
    }
}

/// Contract the orchestrator depends on
#[async_trait]
pub trait Assistant: Send + Sync {
    /// Establish the session; a no-op when already ready
    ///
    /// # Errors
    ///
    /// `Error::Connection` on handshake failure, `Error::Timeout` when it hangs
    async fn initialize(&self) -> Result<()>;

    /// Exchange one request for one reply
    ///
    /// # Errors
    ///
    /// `NotReady`, `Timeout`, `Backend` or `Connection`
    async fn send(&self, request: AssistantRequest) -> Result<AssistantReply>;

    /// Current session state
    fn state(&self) -> SessionState;
}

/// Session-owning client over an [`AssistantTransport`]
pub struct AssistantClient {
    transport: Arc<dyn AssistantTransport>,
    state: RwLock<SessionState>,
    /// Held for the duration of every exchange; tokio's mutex is fair, so waiters are FIFO
    session: tokio::sync::Mutex<Option<SessionInfo>>,
    request_timeout: Duration,
    handshake_timeout: Duration,
}

impl AssistantClient {
    #[must_use]
    pub fn new(transport: Arc<dyn AssistantTransport>) -> Self {
        Self {
            transport,
            state: RwLock::new(SessionState::Uninitialized),
            session: tokio::sync::Mutex::new(None),
            request_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Details of the live session, if any
    pub async fn session_info(&self) -> Option<SessionInfo> {
        self.session.lock().await.clone()
    }

    /// End the backend session and return to `Uninitialized`
    ///
    /// Waits for any in-flight exchange to finish first.
    pub async fn shutdown(&self) {
        let mut session = self.session.lock().await;
        if let Some(info) = session.take() {
            match tokio::time::timeout(self.handshake_timeout, self.transport.close(&info)).await {
                Ok(Ok(())) => tracing::info!("assistant session closed"),
                Ok(Err(e)) => tracing::warn!(error = %e, "failed to close assistant session"),
                Err(_) => tracing::warn!("timed out closing assistant session"),
            }
        }
        self.set_state(SessionState::Uninitialized);
    }

    fn set_state(&self, next: SessionState) {
        set_state(&self.state, next);
    }
}

fn set_state(state: &RwLock<SessionState>, next: SessionState) {
    let mut guard = state.write().unwrap_or_else(PoisonError::into_inner);
    if *guard != next {
        tracing::debug!(from = %*guard, to = %next, "assistant session state");
        *guard = next;
    }
}

/// Restores a state if the owning future is dropped mid-operation
struct StateGuard<'a> {
    state: &'a RwLock<SessionState>,
    on_cancel: SessionState,
    armed: bool,
}

impl<'a> StateGuard<'a> {
    fn enter(state: &'a RwLock<SessionState>, during: SessionState, on_cancel: SessionState) -> Self {
        set_state(state, during);
        Self {
            state,
            on_cancel,
            armed: true,
        }
    }

    fn finish(mut self, next: SessionState) {
        self.armed = false;
        set_state(self.state, next);
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            set_state(self.state, self.on_cancel);
        }
    }
}

#[async_trait]
impl Assistant for AssistantClient {
    async fn initialize(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        let previous = self.state();

        if session.is_some() && previous == SessionState::Ready {
            tracing::debug!("assistant session already initialized");
            return Ok(());
        }

        let guard = StateGuard::enter(&self.state, SessionState::Initializing, previous);
        tracing::info!("initializing assistant session");

        match tokio::time::timeout(self.handshake_timeout, self.transport.handshake()).await {
            Ok(Ok(info)) => {
                tracing::info!(
                    server = info.server_name.as_deref().unwrap_or("unknown"),
                    version = info.server_version.as_deref().unwrap_or("unknown"),
                    protocol = info.protocol_version.as_deref().unwrap_or("unknown"),
                    "assistant session ready"
                );
                *session = Some(info);
                guard.finish(SessionState::Ready);
                Ok(())
            }
            Ok(Err(e)) => {
                *session = None;
                guard.finish(SessionState::Failed);
                tracing::error!(error = %e, "assistant handshake failed");
                Err(match e {
                    Error::Connection(_) | Error::Timeout { .. } => e,
                    other => Error::Connection(other.to_string()),
                })
            }
            Err(_) => {
                *session = None;
                guard.finish(SessionState::Failed);
                tracing::error!(timeout = ?self.handshake_timeout, "assistant handshake timed out");
                Err(Error::timeout("assistant handshake", self.handshake_timeout))
            }
        }
    }

    async fn send(&self, request: AssistantRequest) -> Result<AssistantReply> {
        let mut session = self.session.lock().await;
        let state = self.state();

        let Some(info) = session.as_ref().filter(|_| state == SessionState::Ready) else {
            return Err(Error::NotReady(state));
        };

        let guard = StateGuard::enter(&self.state, SessionState::Sending, SessionState::Ready);
        let started = Instant::now();
        tracing::debug!(turn_id = %request.turn_id(), chars = request.text().len(), "sending to assistant");

        let outcome = tokio::time::timeout(
            self.request_timeout,
            self.transport.exchange(info, request.text()),
        )
        .await;
        let latency = started.elapsed();

        match outcome {
            Ok(Ok(text)) if text.trim().is_empty() => {
                guard.finish(SessionState::Ready);
                Err(Error::backend("backend returned an empty reply"))
            }
            Ok(Ok(text)) => {
                guard.finish(SessionState::Ready);
                tracing::info!(
                    turn_id = %request.turn_id(),
                    latency_ms = latency.as_millis(),
                    "assistant replied"
                );
                Ok(AssistantReply {
                    turn_id: request.turn_id(),
                    text: text.trim().to_string(),
                    latency,
                    success: true,
                })
            }
            Ok(Err(e @ Error::Connection(_))) => {
                *session = None;
                guard.finish(SessionState::Failed);
                tracing::warn!(turn_id = %request.turn_id(), error = %e, "assistant session lost");
                Err(e)
            }
            Ok(Err(e)) => {
                guard.finish(SessionState::Ready);
                Err(e)
            }
            Err(_) => {
                // Dropping the exchange future abandons the in-flight request
                guard.finish(SessionState::Ready);
                tracing::warn!(
                    turn_id = %request.turn_id(),
                    timeout = ?self.request_timeout,
                    "assistant request timed out"
                );
                Err(Error::timeout("assistant request", self.request_timeout))
            }
        }
    }

    fn state(&self) -> SessionState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Scripted transport: echoes text, or fails on magic inputs
    #[derive(Default)]
    struct ScriptedTransport {
        handshakes: AtomicUsize,
        fail_handshakes: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        order: Mutex<Vec<String>>,
        closed: AtomicUsize,
    }

    #[async_trait]
    impl AssistantTransport for ScriptedTransport {
        async fn handshake(&self) -> Result<SessionInfo> {
            self.handshakes.fetch_add(1, Ordering::SeqCst);
            if self
                .fail_handshakes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::Connection("connection refused".to_string()));
            }
            Ok(SessionInfo {
                session_id: Some("s-1".to_string()),
                server_name: Some("scripted".to_string()),
                ..SessionInfo::default()
            })
        }

        async fn exchange(&self, _session: &SessionInfo, text: &str) -> Result<String> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.order.lock().unwrap().push(text.to_string());

            let result = match text {
                "hang" => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(String::new())
                }
                "boom" => Err(Error::backend("HTTP 500: internal")),
                "drop" => Err(Error::Connection("session expired".to_string())),
                "blank" => Ok("   ".to_string()),
                other => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(format!("echo: {other}"))
                }
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn close(&self, _session: &SessionInfo) -> Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn client(transport: &Arc<ScriptedTransport>) -> AssistantClient {
        AssistantClient::new(transport.clone()).request_timeout(Duration::from_secs(5))
    }

    fn request(text: &str) -> AssistantRequest {
        AssistantRequest::new(Uuid::new_v4(), text).unwrap()
    }

    #[test]
    fn request_text_is_trimmed_and_required() {
        let req = AssistantRequest::new(Uuid::nil(), "  lights on \n").unwrap();
        assert_eq!(req.text(), "lights on");
        assert!(matches!(
            AssistantRequest::new(Uuid::nil(), " \t "),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let transport = Arc::new(ScriptedTransport::default());
        let client = client(&transport);
        assert_eq!(client.state(), SessionState::Uninitialized);

        client.initialize().await.unwrap();
        client.initialize().await.unwrap();

        assert_eq!(client.state(), SessionState::Ready);
        assert_eq!(transport.handshakes.load(Ordering::SeqCst), 1);
        assert_eq!(
            client.session_info().await.unwrap().session_id.as_deref(),
            Some("s-1")
        );
    }

    #[tokio::test]
    async fn failed_handshake_needs_explicit_retry() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.fail_handshakes.store(1, Ordering::SeqCst);
        let client = client(&transport);

        let err = client.initialize().await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        assert_eq!(client.state(), SessionState::Failed);

        let err = client.send(request("lights on")).await.unwrap_err();
        assert!(matches!(err, Error::NotReady(SessionState::Failed)));
        assert_eq!(transport.handshakes.load(Ordering::SeqCst), 1);

        client.initialize().await.unwrap();
        assert_eq!(client.state(), SessionState::Ready);
        let reply = client.send(request("lights on")).await.unwrap();
        assert_eq!(reply.text, "echo: lights on");
    }

    #[tokio::test]
    async fn send_before_initialize_is_not_ready() {
        let transport = Arc::new(ScriptedTransport::default());
        let err = client(&transport).send(request("hi")).await.unwrap_err();
        assert!(matches!(err, Error::NotReady(SessionState::Uninitialized)));
    }

    #[tokio::test]
    async fn reply_is_correlated_to_turn() {
        let transport = Arc::new(ScriptedTransport::default());
        let client = client(&transport);
        client.initialize().await.unwrap();

        let req = request("what's the weather");
        let turn_id = req.turn_id();
        let reply = client.send(req).await.unwrap();

        assert_eq!(reply.turn_id, turn_id);
        assert_eq!(reply.text, "echo: what's the weather");
        assert!(reply.success);
        assert_eq!(client.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn backend_failure_keeps_session() {
        let transport = Arc::new(ScriptedTransport::default());
        let client = client(&transport);
        client.initialize().await.unwrap();

        let err = client.send(request("boom")).await.unwrap_err();
        assert!(matches!(err, Error::Backend { .. }));
        assert_eq!(client.state(), SessionState::Ready);

        let err = client.send(request("blank")).await.unwrap_err();
        assert!(matches!(err, Error::Backend { .. }));
        assert_eq!(client.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn connection_loss_fails_session() {
        let transport = Arc::new(ScriptedTransport::default());
        let client = client(&transport);
        client.initialize().await.unwrap();

        let err = client.send(request("drop")).await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        assert_eq!(client.state(), SessionState::Failed);
        assert!(client.session_info().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn request_timeout_returns_to_ready() {
        let transport = Arc::new(ScriptedTransport::default());
        let client = client(&transport);
        client.initialize().await.unwrap();

        let err = client.send(request("hang")).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { operation: "assistant request", .. }));
        assert_eq!(client.state(), SessionState::Ready);

        let reply = client.send(request("still there?")).await.unwrap();
        assert_eq!(reply.text, "echo: still there?");
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_send_does_not_stick_in_sending() {
        let transport = Arc::new(ScriptedTransport::default());
        let client = client(&transport);
        client.initialize().await.unwrap();

        let cancelled =
            tokio::time::timeout(Duration::from_millis(50), client.send(request("hang"))).await;
        assert!(cancelled.is_err());
        assert_eq!(client.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn concurrent_sends_are_serialized_in_order() {
        let transport = Arc::new(ScriptedTransport::default());
        let client = Arc::new(client(&transport));
        client.initialize().await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                let req = request(&format!("turn {i}"));
                let id = req.turn_id();
                (id, i, client.send(req).await.unwrap())
            }));
            // Give each task time to queue before the next is spawned
            tokio::task::yield_now().await;
        }

        for handle in handles {
            let (id, i, reply) = handle.await.unwrap();
            assert_eq!(reply.turn_id, id);
            assert_eq!(reply.text, format!("echo: turn {i}"));
        }

        assert_eq!(transport.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(transport.order.lock().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn shutdown_closes_session() {
        let transport = Arc::new(ScriptedTransport::default());
        let client = client(&transport);
        client.initialize().await.unwrap();

        client.shutdown().await;

        assert_eq!(transport.closed.load(Ordering::SeqCst), 1);
        assert_eq!(client.state(), SessionState::Uninitialized);
    }
}
