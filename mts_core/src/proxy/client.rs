use super::protocol::CommandId;
use super::transport::Transport;
use crate::command::{Command, CommandKind, ExecutionResult, Invocation, Prototype};
use crate::error::{MtsError, MtsResult};
use crate::interface::{CommandDescription, FunctionSlot, RequiredInterface};
use crate::manager::{ConnectionEndpoints, ConnectionId};
use crossbeam::channel::Sender;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Reported once when a session stops being usable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFailure {
    pub connection: ConnectionId,
    pub reason: String,
}

/// Client end of one proxied connection
///
/// Owns the transport and the servant-side client registration. The first
/// transport or decode failure degrades the session: every later call
/// through its commands returns `TransportFailure` until the connection is
/// explicitly re-established.
pub struct ProxySession {
    identity: String,
    connection: ConnectionId,
    transport: Arc<dyn Transport>,
    fire_and_forget: bool,
    degraded: AtomicBool,
    closed: AtomicBool,
    failures: Sender<SessionFailure>,
}

/// Slot targets produced by a successful handshake
pub(crate) type SlotTargets = Vec<(Arc<FunctionSlot>, Arc<dyn Command>)>;

impl ProxySession {
    /// Run the connection handshake against a remote proxy server
    ///
    /// Registers as a client, validates the remote catalogue against every
    /// slot of `required`, prepares the server-side binding and resolves
    /// command ids. Any failure removes the client registration again.
    pub fn open(
        connection: ConnectionId,
        endpoints: &ConnectionEndpoints,
        required: &RequiredInterface,
        transport: Arc<dyn Transport>,
        failures: Sender<SessionFailure>,
        fire_and_forget: bool,
    ) -> MtsResult<(Arc<Self>, SlotTargets)> {
        if required.has_event_handlers() {
            return Err(MtsError::Unsupported(format!(
                "event handlers of '{}.{}' cannot be attached across processes",
                endpoints.client_component, endpoints.required_interface
            )));
        }

        let identity = format!(
            "{}:{}.{}/{}",
            endpoints.client_process,
            endpoints.client_component,
            endpoints.required_interface,
            uuid::Uuid::new_v4()
        );
        transport.add_client(&identity)?;

        let session = Arc::new(Self {
            identity,
            connection,
            transport,
            fire_and_forget,
            degraded: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            failures,
        });

        match session.handshake(endpoints, required) {
            Ok(targets) => {
                log::info!(
                    "Proxy session {} open to {} with {} commands",
                    session.identity,
                    session.transport.peer(),
                    targets.len()
                );
                Ok((session, targets))
            }
            Err(e) => {
                if let Err(cleanup) = session.transport.remove_client(&session.identity) {
                    log::debug!("Cleanup of {} failed: {}", session.identity, cleanup);
                }
                session.closed.store(true, Ordering::SeqCst);
                session.transport.close();
                Err(e)
            }
        }
    }

    fn handshake(
        self: &Arc<Self>,
        endpoints: &ConnectionEndpoints,
        required: &RequiredInterface,
    ) -> MtsResult<SlotTargets> {
        let catalogue = self.transport.get_provided_interfaces()?;
        let provided = catalogue
            .iter()
            .find(|iface| {
                iface.component == endpoints.server_component
                    && iface.name == endpoints.provided_interface
            })
            .ok_or_else(|| {
                MtsError::not_found(format!(
                    "provided interface '{}.{}' on {}",
                    endpoints.server_component,
                    endpoints.provided_interface,
                    self.transport.peer()
                ))
            })?;

        let mut wanted: Vec<(Arc<FunctionSlot>, CommandDescription)> = Vec::new();
        for slot in required.slots() {
            match provided.command(slot.name()) {
                Some(remote) => {
                    slot.check_description(remote)?;
                    wanted.push((slot, remote.clone()));
                }
                None if slot.is_optional() => {
                    log::debug!("Optional function '{}' not provided remotely", slot.name());
                }
                None => {
                    return Err(MtsError::not_found(format!(
                        "command '{}' required by '{}.{}' is not provided by '{}.{}'",
                        slot.name(),
                        endpoints.client_component,
                        endpoints.required_interface,
                        endpoints.server_component,
                        endpoints.provided_interface
                    )))
                }
            }
        }

        self.transport.connect_server_side(
            &self.identity,
            &endpoints.client_component,
            &endpoints.required_interface,
            &endpoints.server_component,
            &endpoints.provided_interface,
        )?;

        let descriptions = wanted.iter().map(|(_, d)| d.clone()).collect();
        let ids: HashMap<String, CommandId> = self
            .transport
            .get_command_ids(&self.identity, descriptions)?
            .into_iter()
            .collect();

        wanted
            .into_iter()
            .map(|(slot, _)| {
                let id = *ids.get(slot.name()).ok_or_else(|| {
                    MtsError::not_found(format!("no command id for '{}'", slot.name()))
                })?;
                let command: Arc<dyn Command> = Arc::new(ProxyCommand {
                    name: slot.name().to_string(),
                    kind: slot.kind(),
                    argument: slot.argument_prototype(),
                    result: slot.result_prototype(),
                    id,
                    session: self.clone(),
                });
                Ok((slot, command))
            })
            .collect()
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn peer(&self) -> String {
        self.transport.peer()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Mark the session unusable and report it to the owning manager
    pub fn degrade(&self, reason: &str) {
        if self.degraded.swap(true, Ordering::SeqCst) {
            return;
        }
        log::warn!(
            "Proxy session {} to {} degraded: {}",
            self.identity,
            self.transport.peer(),
            reason
        );
        let _ = self.failures.send(SessionFailure {
            connection: self.connection,
            reason: reason.to_string(),
        });
    }

    /// Deregister from the server and drop the transport
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if !self.is_degraded() {
            if let Err(e) = self.transport.remove_client(&self.identity) {
                log::debug!("Proxy session {}: remove_client failed: {}", self.identity, e);
            }
        }
        self.transport.close();
        log::debug!("Proxy session {} closed", self.identity);
    }

    fn usable(&self) -> bool {
        !self.is_degraded() && !self.is_closed()
    }

    fn transport_failed(&self, err: MtsError) -> ExecutionResult {
        if err.is_transport() {
            self.degrade(&err.to_string());
            ExecutionResult::TransportFailure
        } else {
            log::debug!("Proxy session {}: {}", self.identity, err);
            err.to_execution_result()
        }
    }
}

impl Drop for ProxySession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Client-side stand-in for a command on a remote provided interface
///
/// Encodes the argument, forwards it under the negotiated command id and
/// decodes the reply into the caller's output.
pub struct ProxyCommand {
    name: String,
    kind: CommandKind,
    argument: Option<Prototype>,
    result: Option<Prototype>,
    id: CommandId,
    session: Arc<ProxySession>,
}

impl ProxyCommand {
    pub fn id(&self) -> CommandId {
        self.id
    }

    fn encode_argument(&self, value: &dyn std::any::Any) -> Result<Vec<u8>, ExecutionResult> {
        let Some(proto) = self.argument else {
            return Err(ExecutionResult::BadInput);
        };
        if !proto.matches(value) {
            log::debug!("Proxy '{}': argument is not {}", self.name, proto.type_name());
            return Err(ExecutionResult::BadInput);
        }
        proto.encode(value).map_err(|e| {
            log::debug!("Proxy '{}': cannot encode argument: {}", self.name, e);
            ExecutionResult::SerializationFailure
        })
    }

    fn decode_reply(
        &self,
        reply: MtsResult<(ExecutionResult, Option<Vec<u8>>)>,
        out: &mut dyn std::any::Any,
    ) -> ExecutionResult {
        let (result, payload) = match reply {
            Ok(reply) => reply,
            Err(e) => return self.session.transport_failed(e),
        };
        if !result.is_ok() {
            return result;
        }
        let (Some(proto), Some(bytes)) = (self.result, payload) else {
            self.session
                .degrade(&format!("reply to '{}' carries no payload", self.name));
            return ExecutionResult::SerializationFailure;
        };
        match proto.decode_into(&bytes, out) {
            Ok(()) => result,
            Err(e) => {
                self.session
                    .degrade(&format!("reply to '{}' is corrupt: {}", self.name, e));
                ExecutionResult::SerializationFailure
            }
        }
    }

    fn output_matches(&self, out: &dyn std::any::Any) -> bool {
        self.result.map_or(false, |proto| proto.matches(out))
    }
}

impl Command for ProxyCommand {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> CommandKind {
        self.kind
    }

    fn argument_prototype(&self) -> Option<Prototype> {
        self.argument
    }

    fn result_prototype(&self) -> Option<Prototype> {
        self.result
    }

    fn execute(&self, invocation: Invocation<'_>) -> ExecutionResult {
        if invocation.kind() != self.kind {
            return ExecutionResult::BadInput;
        }
        if !self.session.usable() {
            return ExecutionResult::TransportFailure;
        }
        let transport = &self.session.transport;

        match invocation {
            Invocation::Void if self.session.fire_and_forget => {
                match transport.execute_void_oneway(self.id) {
                    Ok(()) => ExecutionResult::Queued,
                    Err(e) => self.session.transport_failed(e),
                }
            }
            Invocation::Void => transport
                .execute_void(self.id)
                .unwrap_or_else(|e| self.session.transport_failed(e)),
            Invocation::Write(arg) => match self.encode_argument(arg) {
                Ok(payload) => transport
                    .execute_write_serialized(self.id, payload)
                    .unwrap_or_else(|e| self.session.transport_failed(e)),
                Err(code) => code,
            },
            Invocation::Read(out) | Invocation::VoidReturn(out) => {
                if !self.output_matches(&*out) {
                    return ExecutionResult::BadInput;
                }
                let reply = transport.execute_read_serialized(self.id);
                self.decode_reply(reply, out)
            }
            Invocation::QualifiedRead(arg, out) => {
                if !self.output_matches(&*out) {
                    return ExecutionResult::BadInput;
                }
                match self.encode_argument(arg) {
                    Ok(payload) => {
                        let reply = transport.execute_qualified_read_serialized(self.id, payload);
                        self.decode_reply(reply, out)
                    }
                    Err(code) => code,
                }
            }
        }
    }

    fn describe(&self) -> String {
        format!(
            "Proxy {}: {} (id {}) via {}",
            self.kind,
            self.name,
            self.id,
            self.session.peer()
        )
    }
}
