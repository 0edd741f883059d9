use crate::app::mcp::{JsonRpcRequest, McpBridgeService};
use crate::domain::mcp::{McpSession, SessionId};
use axum::response::sse::Event;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const MESSAGES_PATH: &str = "/messages";
const OUTBOUND_QUEUE: usize = 64;
const INBOUND_QUEUE: usize = 64;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

pub type SseItem = Result<Event, Infallible>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("No active transport connection")]
    NoActiveSession,
    #[error("session {0} is already connected")]
    Busy(SessionId),
    #[error("unknown session: {0}")]
    UnknownSession(String),
}

struct ActiveSession {
    id: SessionId,
    inbound: mpsc::Sender<JsonRpcRequest>,
    close: Option<oneshot::Sender<()>>,
    worker: JoinHandle<()>,
}

impl ActiveSession {
    fn is_live(&self) -> bool {
        !self.worker.is_finished() && !self.inbound.is_closed()
    }
}

/// Holds the one live SSE session and routes posted messages into it.
pub struct SessionHub {
    bridge: Arc<McpBridgeService>,
    active: Mutex<Option<ActiveSession>>,
}

impl SessionHub {
    pub fn new(bridge: Arc<McpBridgeService>) -> Self {
        Self {
            bridge,
            active: Mutex::new(None),
        }
    }

    /// Opens a session and returns the receiving half of its event stream.
    /// The first queued event announces the message endpoint.
    pub async fn open(
        self: &Arc<Self>,
    ) -> Result<(SessionId, mpsc::Receiver<SseItem>), SessionError> {
        let mut active = self.active.lock().await;
        if let Some(current) = active.as_ref() {
            if current.is_live() {
                return Err(SessionError::Busy(current.id.clone()));
            }
        }

        let session = McpSession::new();
        let id = session.id();
        let (outbound, events) = mpsc::channel(OUTBOUND_QUEUE);
        let (inbound, requests) = mpsc::channel(INBOUND_QUEUE);
        let (close, closed) = oneshot::channel();

        let endpoint = format!("{MESSAGES_PATH}?sessionId={id}");
        if outbound
            .send(Ok(Event::default().event("endpoint").data(endpoint)))
            .await
            .is_err()
        {
            return Err(SessionError::NoActiveSession);
        }

        let worker = tokio::spawn(run_session(
            Arc::clone(self),
            session,
            requests,
            outbound,
            closed,
        ));
        *active = Some(ActiveSession {
            id: id.clone(),
            inbound,
            close: Some(close),
            worker,
        });
        info!(session_id = %id, "SSE session opened");
        Ok((id, events))
    }

    /// Queues a request for the active session.
    pub async fn deliver(
        &self,
        session_id: Option<&str>,
        request: JsonRpcRequest,
    ) -> Result<(), SessionError> {
        let inbound = {
            let active = self.active.lock().await;
            let current = active
                .as_ref()
                .filter(|current| current.is_live())
                .ok_or(SessionError::NoActiveSession)?;
            if let Some(requested) = session_id {
                if requested.trim() != current.id.to_string() {
                    return Err(SessionError::UnknownSession(requested.to_string()));
                }
            }
            current.inbound.clone()
        };
        inbound
            .send(request)
            .await
            .map_err(|_| SessionError::NoActiveSession)
    }

    pub async fn active_session(&self) -> Option<SessionId> {
        let active = self.active.lock().await;
        active
            .as_ref()
            .filter(|current| current.is_live())
            .map(|current| current.id.clone())
    }

    /// Closes the live session, ending its event stream. Returns whether one
    /// was open.
    pub async fn close_active(&self) -> bool {
        let Some(mut current) = self.active.lock().await.take() else {
            return false;
        };
        if let Some(close) = current.close.take() {
            let _ = close.send(());
        }
        match tokio::time::timeout(CLOSE_TIMEOUT, &mut current.worker).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(session_id = %current.id, %err, "session worker failed"),
            Err(_) => {
                warn!(session_id = %current.id, "session worker did not stop, aborting");
                current.worker.abort();
            }
        }
        true
    }

    async fn release(&self, id: &SessionId) {
        let mut active = self.active.lock().await;
        if active.as_ref().map(|current| &current.id) == Some(id) {
            *active = None;
        }
    }
}

async fn run_session(
    hub: Arc<SessionHub>,
    mut session: McpSession,
    mut requests: mpsc::Receiver<JsonRpcRequest>,
    outbound: mpsc::Sender<SseItem>,
    mut closed: oneshot::Receiver<()>,
) {
    let id = session.id();
    let reason = loop {
        tokio::select! {
            _ = &mut closed => break "server stopping",
            _ = outbound.closed() => break "client disconnected",
            request = requests.recv() => {
                let Some(request) = request else {
                    break "inbound queue closed";
                };
                let Some(response) = hub.bridge.handle_message(&mut session, request).await else {
                    continue;
                };
                let payload = match serde_json::to_string(&response) {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(session_id = %id, %err, "failed to encode JSON-RPC response");
                        continue;
                    }
                };
                debug!(session_id = %id, bytes = payload.len(), "sending SSE message");
                if outbound
                    .send(Ok(Event::default().event("message").data(payload)))
                    .await
                    .is_err()
                {
                    break "client disconnected";
                }
            }
        }
    };
    hub.bridge.close_session(&mut session, reason);
    hub.release(&id).await;
}
