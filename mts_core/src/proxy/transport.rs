use super::protocol::{CommandId, ProxyRequest, ProxyResponse};
use crate::command::ExecutionResult;
use crate::error::{MtsError, MtsResult};
use crate::interface::{CommandDescription, InterfaceDescription};
use std::sync::Arc;

/// Request/response channel to one remote proxy server
///
/// Implementors supply `round_trip`; the protocol verbs are built on top.
/// Any `Err` returned here is a transport failure: the peer is gone, timed
/// out or answered with something that is not a response frame.
pub trait Transport: Send + Sync {
    fn round_trip(&self, request: &ProxyRequest) -> MtsResult<ProxyResponse>;

    /// Send a request that has no response
    fn send_oneway(&self, request: &ProxyRequest) -> MtsResult<()> {
        self.round_trip(request).map(|_| ())
    }

    /// Drop the underlying channel; later calls fail
    fn close(&self);

    /// Human-readable peer address
    fn peer(&self) -> String;

    fn add_client(&self, identity: &str) -> MtsResult<()> {
        expect_ack(self.round_trip(&ProxyRequest::AddClient {
            identity: identity.to_string(),
        })?)
    }

    fn remove_client(&self, identity: &str) -> MtsResult<()> {
        expect_ack(self.round_trip(&ProxyRequest::RemoveClient {
            identity: identity.to_string(),
        })?)
    }

    fn get_provided_interfaces(&self) -> MtsResult<Vec<InterfaceDescription>> {
        match self.round_trip(&ProxyRequest::GetProvidedInterfaces)? {
            ProxyResponse::ProvidedInterfaces(list) => Ok(list),
            other => Err(unexpected(other)),
        }
    }

    fn connect_server_side(
        &self,
        identity: &str,
        client_component: &str,
        required_interface: &str,
        server_component: &str,
        provided_interface: &str,
    ) -> MtsResult<()> {
        expect_ack(self.round_trip(&ProxyRequest::ConnectServerSide {
            identity: identity.to_string(),
            client_component: client_component.to_string(),
            required_interface: required_interface.to_string(),
            server_component: server_component.to_string(),
            provided_interface: provided_interface.to_string(),
        })?)
    }

    fn get_command_ids(
        &self,
        identity: &str,
        slots: Vec<CommandDescription>,
    ) -> MtsResult<Vec<(String, CommandId)>> {
        match self.round_trip(&ProxyRequest::GetCommandId {
            identity: identity.to_string(),
            slots,
        })? {
            ProxyResponse::CommandIds(ids) => Ok(ids),
            other => Err(unexpected(other)),
        }
    }

    fn execute_void(&self, id: CommandId) -> MtsResult<ExecutionResult> {
        expect_executed(self.round_trip(&ProxyRequest::ExecuteVoid { id })?).map(|(r, _)| r)
    }

    fn execute_void_oneway(&self, id: CommandId) -> MtsResult<()> {
        self.send_oneway(&ProxyRequest::ExecuteVoidOneway { id })
    }

    fn execute_write_serialized(&self, id: CommandId, payload: Vec<u8>) -> MtsResult<ExecutionResult> {
        expect_executed(self.round_trip(&ProxyRequest::ExecuteWrite { id, payload })?)
            .map(|(r, _)| r)
    }

    fn execute_read_serialized(
        &self,
        id: CommandId,
    ) -> MtsResult<(ExecutionResult, Option<Vec<u8>>)> {
        expect_executed(self.round_trip(&ProxyRequest::ExecuteRead { id })?)
    }

    fn execute_qualified_read_serialized(
        &self,
        id: CommandId,
        payload: Vec<u8>,
    ) -> MtsResult<(ExecutionResult, Option<Vec<u8>>)> {
        expect_executed(self.round_trip(&ProxyRequest::ExecuteQualifiedRead { id, payload })?)
    }
}

/// Opens transports to the endpoints the global manager hands out
pub trait Connector: Send + Sync {
    fn open(&self, endpoint: &str) -> MtsResult<Arc<dyn Transport>>;
}

fn unexpected(response: ProxyResponse) -> MtsError {
    match response {
        ProxyResponse::Error(err) => err.into(),
        other => MtsError::transport(format!("unexpected response: {:?}", other)),
    }
}

fn expect_ack(response: ProxyResponse) -> MtsResult<()> {
    match response {
        ProxyResponse::Ack => Ok(()),
        other => Err(unexpected(other)),
    }
}

fn expect_executed(response: ProxyResponse) -> MtsResult<(ExecutionResult, Option<Vec<u8>>)> {
    match response {
        ProxyResponse::Executed { result, payload } => Ok((result, payload)),
        other => Err(unexpected(other)),
    }
}
