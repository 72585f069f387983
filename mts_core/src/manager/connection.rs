use crate::error::{MtsError, MtsResult};
use crate::interface::Binding;
use crate::proxy::ProxySession;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub type ConnectionId = u64;

/// Connection establishment state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Requested,
    BoundLocal,
    ProxyPending,
    Connected,
    Failed,
}

impl ConnectionState {
    /// Whether `self → next` is a legal transition
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Requested, BoundLocal)
                | (Requested, ProxyPending)
                | (BoundLocal, Connected)
                | (ProxyPending, Connected)
                | (Requested, Failed)
                | (BoundLocal, Failed)
                | (ProxyPending, Failed)
                | (Connected, Failed)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Requested => "REQUESTED",
            ConnectionState::BoundLocal => "BOUND_LOCAL",
            ConnectionState::ProxyPending => "PROXY_PENDING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// The two ends of a connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionEndpoints {
    pub client_process: String,
    pub client_component: String,
    pub required_interface: String,
    pub server_process: String,
    pub server_component: String,
    pub provided_interface: String,
}

impl ConnectionEndpoints {
    pub fn is_local(&self) -> bool {
        self.client_process == self.server_process
    }
}

impl fmt::Display for ConnectionEndpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}.{} -> {}:{}.{}",
            self.client_process,
            self.client_component,
            self.required_interface,
            self.server_process,
            self.server_component,
            self.provided_interface
        )
    }
}

/// Snapshot of a connection for observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub endpoints: ConnectionEndpoints,
    pub state: ConnectionState,
    pub failure: Option<String>,
}

/// Live connection owned by the local manager
pub(crate) struct Connection {
    pub id: ConnectionId,
    pub endpoints: ConnectionEndpoints,
    pub state: ConnectionState,
    pub failure: Option<String>,
    pub binding: Option<Binding>,
    pub session: Option<Arc<ProxySession>>,
}

impl Connection {
    pub fn new(id: ConnectionId, endpoints: ConnectionEndpoints) -> Self {
        Self {
            id,
            endpoints,
            state: ConnectionState::Requested,
            failure: None,
            binding: None,
            session: None,
        }
    }

    pub fn advance(&mut self, next: ConnectionState) -> MtsResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(MtsError::InvalidState(format!(
                "connection {} cannot move from {} to {}",
                self.id, self.state, next
            )));
        }
        log::debug!("Connection {} ({}): {} -> {}", self.id, self.endpoints, self.state, next);
        self.state = next;
        Ok(())
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            endpoints: self.endpoints.clone(),
            state: self.state,
            failure: self.failure.clone(),
        }
    }

    /// Tear down everything the connection holds
    pub fn release(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
        }
        if let Some(binding) = self.binding.take() {
            binding.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use ConnectionState::*;
        assert!(Requested.can_transition_to(BoundLocal));
        assert!(ProxyPending.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Failed));
        assert!(!Connected.can_transition_to(BoundLocal));
        assert!(!Failed.can_transition_to(Connected));
        assert!(!Requested.can_transition_to(Connected));
    }

    #[test]
    fn test_advance_rejects_illegal_step() {
        let endpoints = ConnectionEndpoints {
            client_process: "p".into(),
            client_component: "a".into(),
            required_interface: "r".into(),
            server_process: "p".into(),
            server_component: "b".into(),
            provided_interface: "q".into(),
        };
        assert!(endpoints.is_local());
        let mut conn = Connection::new(1, endpoints);
        conn.advance(ConnectionState::BoundLocal).unwrap();
        assert!(conn.advance(ConnectionState::ProxyPending).is_err());
        conn.advance(ConnectionState::Connected).unwrap();
        assert_eq!(conn.info().state, ConnectionState::Connected);
        assert_eq!(ConnectionState::Connected.to_string(), "CONNECTED");
    }
}
