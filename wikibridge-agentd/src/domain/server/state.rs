use std::fmt;
use std::net::SocketAddr;

/// Lifecycle phase of the local MCP endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Running { port: u16, local_addr: SocketAddr },
    Stopping,
}

impl ServerState {
    pub fn is_running(&self) -> bool {
        matches!(self, ServerState::Running { .. })
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, ServerState::Stopped)
    }

    pub fn running_port(&self) -> Option<u16> {
        match self {
            ServerState::Running { port, .. } => Some(*port),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerState::Stopped => "stopped",
            ServerState::Starting => "starting",
            ServerState::Running { .. } => "running",
            ServerState::Stopping => "stopping",
        }
    }

    /// Transition table of the lifecycle manager. A failed bind returns
    /// `Starting` straight to `Stopped`.
    pub fn can_transition_to(&self, next: &ServerState) -> bool {
        matches!(
            (self, next),
            (ServerState::Stopped, ServerState::Starting)
                | (ServerState::Starting, ServerState::Running { .. })
                | (ServerState::Starting, ServerState::Stopped)
                | (ServerState::Running { .. }, ServerState::Stopping)
                | (ServerState::Stopping, ServerState::Stopped)
        )
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerState::Running { port, .. } => write!(f, "running on port {port}"),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateTransition {
    pub from: ServerState,
    pub to: ServerState,
}
