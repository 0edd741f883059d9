use crate::adapters::http::{build_router, AppState, SessionHub};
use crate::app::config::ConfigManager;
use crate::domain::config::ConfigChanged;
use crate::domain::server::{ServerState, StateTransition};
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const TRANSITION_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BindFailure {
    #[error("port {port} is already in use, configure a different port")]
    AddressInUse { port: u16 },
    #[error("failed to listen on port {port}: {reason}")]
    Other { port: u16, reason: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error(transparent)]
    Bind(#[from] BindFailure),
}

#[derive(Debug, Clone, Copy)]
pub struct LifecycleOptions {
    pub bind_host: IpAddr,
    /// Upper bound on the graceful drain before the server task is aborted.
    pub shutdown_timeout: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            bind_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

struct RunningServer {
    stop: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

/// Owns the listening endpoint and its session hub.
///
/// `start`, `stop` and `restart` are serialized: each holds the operation
/// lock for its whole duration, so a `stop` issued while `start` is binding
/// waits for the bind to settle and then tears the server down.
pub struct ServerLifecycleManager {
    config: Arc<ConfigManager>,
    hub: Arc<SessionHub>,
    options: LifecycleOptions,
    operation: Mutex<Option<RunningServer>>,
    state: watch::Sender<ServerState>,
    transitions: broadcast::Sender<StateTransition>,
}

impl ServerLifecycleManager {
    pub fn new(
        config: Arc<ConfigManager>,
        hub: Arc<SessionHub>,
        options: LifecycleOptions,
    ) -> Self {
        let (state, _) = watch::channel(ServerState::Stopped);
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            config,
            hub,
            options,
            operation: Mutex::new(None),
            state,
            transitions,
        }
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    pub fn subscribe_transitions(&self) -> broadcast::Receiver<StateTransition> {
        self.transitions.subscribe()
    }

    /// Binds the configured port. A running server is left untouched.
    pub async fn start(&self) -> Result<(), LifecycleError> {
        let mut running = self.operation.lock().await;
        self.start_locked(&mut running).await
    }

    /// Closes the endpoint and the active session. A stopped server is left
    /// untouched.
    pub async fn stop(&self) {
        let mut running = self.operation.lock().await;
        self.stop_locked(&mut running).await;
    }

    /// Stops then starts under one hold of the operation lock. From `Stopped`
    /// this is a plain start.
    pub async fn restart(&self) -> Result<(), LifecycleError> {
        let mut running = self.operation.lock().await;
        self.restart_locked(&mut running).await
    }

    /// Restarts when the server runs on a port other than the configured one.
    pub async fn reconcile_port(&self) -> Result<bool, LifecycleError> {
        let mut running = self.operation.lock().await;
        let Some(current) = self.state().running_port() else {
            return Ok(false);
        };
        let desired = self.config.get_config().await.port;
        if current == desired {
            return Ok(false);
        }
        info!(from = current, to = desired, "port changed, restarting server");
        self.restart_locked(&mut running).await?;
        Ok(true)
    }

    /// Follows configuration changes and restarts on port changes only.
    pub fn spawn_config_listener(
        self: Arc<Self>,
        mut changes: broadcast::Receiver<ConfigChanged>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        if self.state().running_port() == Some(change.record.port) {
                            debug!(
                                origin = change.origin.as_str(),
                                "config change does not affect the listener"
                            );
                            continue;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "lifecycle missed config changes, resyncing");
                    }
                    Err(RecvError::Closed) => break,
                }
                if let Err(err) = self.reconcile_port().await {
                    error!(%err, "failed to restart server after port change");
                }
            }
        })
    }

    async fn restart_locked(
        &self,
        running: &mut Option<RunningServer>,
    ) -> Result<(), LifecycleError> {
        self.stop_locked(running).await;
        info!("server stopped, restarting");
        self.start_locked(running).await
    }

    async fn start_locked(
        &self,
        running: &mut Option<RunningServer>,
    ) -> Result<(), LifecycleError> {
        if running.is_some() {
            debug!(state = %self.state(), "server is already running");
            return Ok(());
        }
        self.transition(ServerState::Starting);
        let port = self.config.get_config().await.port;
        let addr = SocketAddr::new(self.options.bind_host, port);

        let listener = match bind(addr).await {
            Ok(listener) => listener,
            Err(failure) => {
                error!(%addr, %failure, "failed to start server");
                self.transition(ServerState::Stopped);
                return Err(failure.into());
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(local_addr) => local_addr,
            Err(err) => {
                self.transition(ServerState::Stopped);
                return Err(BindFailure::Other {
                    port,
                    reason: err.to_string(),
                }
                .into());
            }
        };

        let router = build_router(AppState::new(self.hub.clone()));
        let (stop, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(async move {
                    let _ = stop_rx.await;
                })
                .await
        });
        *running = Some(RunningServer { stop, task });
        self.transition(ServerState::Running {
            port: local_addr.port(),
            local_addr,
        });
        info!("listening" = %local_addr, "msg" = "wiki MCP server running");
        info!("connect to the SSE endpoint at http://{local_addr}/sse");
        Ok(())
    }

    async fn stop_locked(&self, running: &mut Option<RunningServer>) {
        let Some(server) = running.take() else {
            debug!("server is not running");
            return;
        };
        self.transition(ServerState::Stopping);

        let RunningServer { stop, mut task } = server;
        if stop.send(()).is_err() {
            warn!("server task ended before shutdown was requested");
        }
        // An open SSE stream would hold the graceful drain forever.
        if self.hub.close_active().await {
            info!("SSE session closed");
        }
        match tokio::time::timeout(self.options.shutdown_timeout, &mut task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(err))) => warn!(%err, "server terminated with error"),
            Ok(Err(err)) => warn!(%err, "server task join error"),
            Err(_) => {
                warn!(
                    timeout_ms = self.options.shutdown_timeout.as_millis() as u64,
                    "server did not drain in time, aborting"
                );
                task.abort();
            }
        }
        self.transition(ServerState::Stopped);
        info!("server stopped");
    }

    fn transition(&self, next: ServerState) {
        let from = self.state.send_replace(next);
        if !from.can_transition_to(&next) {
            warn!(from = %from, to = %next, "unexpected server state transition");
        }
        let _ = self.transitions.send(StateTransition { from, to: next });
    }
}

async fn bind(addr: SocketAddr) -> Result<TcpListener, BindFailure> {
    TcpListener::bind(addr).await.map_err(|err| {
        if err.kind() == ErrorKind::AddrInUse {
            BindFailure::AddressInUse { port: addr.port() }
        } else {
            BindFailure::Other {
                port: addr.port(),
                reason: err.to_string(),
            }
        }
    })
}
