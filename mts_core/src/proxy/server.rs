use super::protocol::{CommandId, ProxyRequest, ProxyResponse, WireError};
use crate::command::{Command, CommandKind, ExecutionResult};
use crate::error::{MtsError, MtsResult};
use crate::interface::{CommandDescription, InterfaceDescription};
use crate::manager::registry::ComponentRegistry;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// Binding context prepared by `ConnectServerSide`
#[derive(Debug, Clone)]
struct ServerBinding {
    client_component: String,
    required_interface: String,
    server_component: String,
    provided_interface: String,
}

#[derive(Default)]
struct CommandTable {
    entries: Vec<Option<Arc<dyn Command>>>,
    index: HashMap<String, CommandId>,
}

impl CommandTable {
    fn key(component: &str, interface: &str, command: &str) -> String {
        format!("{}/{}/{}", component, interface, command)
    }

    fn assign(&mut self, key: String, command: Arc<dyn Command>) -> CommandId {
        if let Some(&id) = self.index.get(&key) {
            if let Some(slot) = self.entries.get_mut(id as usize) {
                if slot.is_none() {
                    *slot = Some(command);
                }
            }
            return id;
        }
        let id = self.entries.len() as CommandId;
        self.entries.push(Some(command));
        self.index.insert(key, id);
        id
    }

    fn get(&self, id: CommandId) -> Option<Arc<dyn Command>> {
        self.entries.get(id as usize).and_then(|c| c.clone())
    }

    fn invalidate(&mut self, component: &str) -> usize {
        let prefix = format!("{}/", component);
        let mut removed = 0;
        for (key, id) in self.index.iter() {
            if key.starts_with(&prefix) {
                if let Some(slot) = self.entries.get_mut(*id as usize) {
                    if slot.take().is_some() {
                        removed += 1;
                    }
                }
            }
        }
        removed
    }
}

/// Servant side of the proxy layer for one process
///
/// Answers the wire verbs for every provided interface registered with the
/// owning local manager. Command ids stay valid for the server's lifetime;
/// an id whose component was removed answers `InvalidCommandId`.
pub struct ProxyServer {
    process: String,
    registry: Arc<ComponentRegistry>,
    clients: Mutex<HashMap<String, Option<ServerBinding>>>,
    commands: RwLock<CommandTable>,
}

impl ProxyServer {
    pub(crate) fn new(process: &str, registry: Arc<ComponentRegistry>) -> Self {
        Self {
            process: process.to_string(),
            registry,
            clients: Mutex::new(HashMap::new()),
            commands: RwLock::new(CommandTable::default()),
        }
    }

    pub fn process(&self) -> &str {
        &self.process
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Answer one request; `None` for one-way requests
    pub fn handle(&self, request: ProxyRequest) -> Option<ProxyResponse> {
        let response = match request {
            ProxyRequest::AddClient { identity } => self.add_client(identity),
            ProxyRequest::RemoveClient { identity } => {
                if let Some(Some(binding)) = self.clients.lock().remove(&identity) {
                    log::debug!(
                        "[{}] client '{}' left ({}.{} -> {}.{})",
                        self.process,
                        identity,
                        binding.client_component,
                        binding.required_interface,
                        binding.server_component,
                        binding.provided_interface
                    );
                }
                Ok(ProxyResponse::Ack)
            }
            ProxyRequest::GetProvidedInterfaces => {
                Ok(ProxyResponse::ProvidedInterfaces(self.provided_interfaces()))
            }
            ProxyRequest::ConnectServerSide {
                identity,
                client_component,
                required_interface,
                server_component,
                provided_interface,
            } => self.connect_server_side(
                identity,
                ServerBinding {
                    client_component,
                    required_interface,
                    server_component,
                    provided_interface,
                },
            ),
            ProxyRequest::GetCommandId { identity, slots } => self.get_command_ids(&identity, &slots),
            ProxyRequest::ExecuteVoidOneway { id } => {
                let result = self.execute(id, &[CommandKind::Void], &[]).0;
                if !result.is_ok() {
                    log::debug!("[{}] one-way void {} returned {}", self.process, id, result);
                }
                return None;
            }
            ProxyRequest::ExecuteVoid { id } => Ok(self.executed(id, &[CommandKind::Void], &[])),
            ProxyRequest::ExecuteWrite { id, payload } => {
                Ok(self.executed(id, &[CommandKind::Write], &payload))
            }
            ProxyRequest::ExecuteRead { id } => Ok(self.executed(
                id,
                &[CommandKind::Read, CommandKind::VoidReturn],
                &[],
            )),
            ProxyRequest::ExecuteQualifiedRead { id, payload } => {
                Ok(self.executed(id, &[CommandKind::QualifiedRead], &payload))
            }
        };

        Some(response.unwrap_or_else(|e| {
            log::debug!("[{}] request failed: {}", self.process, e);
            ProxyResponse::Error(WireError::from(&e))
        }))
    }

    /// Like [`handle`](Self::handle), recording in `owned` the client
    /// identities registered through one connection
    pub(crate) fn handle_tracked(
        &self,
        request: ProxyRequest,
        owned: &mut Vec<String>,
    ) -> Option<ProxyResponse> {
        let joined = match &request {
            ProxyRequest::AddClient { identity } => Some(identity.clone()),
            ProxyRequest::RemoveClient { identity } => {
                owned.retain(|id| id != identity);
                None
            }
            _ => None,
        };
        let response = self.handle(request);
        if let (Some(identity), Some(ProxyResponse::Ack)) = (joined, &response) {
            owned.push(identity);
        }
        response
    }

    /// Forget clients whose connection went away without `RemoveClient`
    pub(crate) fn release_clients(&self, owned: &mut Vec<String>) {
        if owned.is_empty() {
            return;
        }
        let mut clients = self.clients.lock();
        for identity in owned.drain(..) {
            if clients.remove(&identity).is_some() {
                log::debug!("[{}] client '{}' dropped with its connection", self.process, identity);
            }
        }
    }

    /// Drop command ids that point into `component`
    pub(crate) fn invalidate_component(&self, component: &str) {
        let removed = self.commands.write().invalidate(component);
        if removed > 0 {
            log::debug!(
                "[{}] invalidated {} command ids of '{}'",
                self.process,
                removed,
                component
            );
        }
    }

    fn add_client(&self, identity: String) -> MtsResult<ProxyResponse> {
        let mut clients = self.clients.lock();
        if clients.contains_key(&identity) {
            return Err(MtsError::DuplicateName(format!("proxy client '{}'", identity)));
        }
        log::debug!("[{}] client '{}' joined", self.process, identity);
        clients.insert(identity, None);
        Ok(ProxyResponse::Ack)
    }

    fn provided_interfaces(&self) -> Vec<InterfaceDescription> {
        self.registry
            .all()
            .iter()
            .flat_map(|entry| entry.provided.values().map(|iface| iface.describe()))
            .collect()
    }

    fn connect_server_side(&self, identity: String, binding: ServerBinding) -> MtsResult<ProxyResponse> {
        self.registry
            .provided_interface(&binding.server_component, &binding.provided_interface)?;

        let mut clients = self.clients.lock();
        let context = clients.get_mut(&identity).ok_or_else(|| {
            MtsError::InvalidState(format!("proxy client '{}' is not registered", identity))
        })?;
        if context.is_some() {
            return Err(MtsError::AlreadyConnected(format!(
                "proxy client '{}' already has a binding",
                identity
            )));
        }
        log::info!(
            "[{}] serving {}.{} for remote {}.{}",
            self.process,
            binding.server_component,
            binding.provided_interface,
            binding.client_component,
            binding.required_interface
        );
        *context = Some(binding);
        Ok(ProxyResponse::Ack)
    }

    fn get_command_ids(
        &self,
        identity: &str,
        slots: &[CommandDescription],
    ) -> MtsResult<ProxyResponse> {
        let binding = self
            .clients
            .lock()
            .get(identity)
            .cloned()
            .flatten()
            .ok_or_else(|| {
                MtsError::InvalidState(format!(
                    "proxy client '{}' has no server-side binding",
                    identity
                ))
            })?;
        let iface = self
            .registry
            .provided_interface(&binding.server_component, &binding.provided_interface)?;

        // Validate everything before assigning any id
        let mut resolved = Vec::with_capacity(slots.len());
        for slot in slots {
            let command = iface.command(&slot.name).ok_or_else(|| {
                MtsError::not_found(format!(
                    "command '{}' in '{}.{}'",
                    slot.name, binding.server_component, binding.provided_interface
                ))
            })?;
            if CommandDescription::of(command.as_ref()) != *slot {
                return Err(MtsError::TypeMismatch(format!(
                    "command '{}' does not match the requested signature",
                    slot.name
                )));
            }
            resolved.push((slot.name.clone(), command));
        }

        let mut table = self.commands.write();
        let ids = resolved
            .into_iter()
            .map(|(name, command)| {
                let key = CommandTable::key(
                    &binding.server_component,
                    &binding.provided_interface,
                    &name,
                );
                let id = table.assign(key, command);
                (name, id)
            })
            .collect();
        Ok(ProxyResponse::CommandIds(ids))
    }

    fn execute(
        &self,
        id: CommandId,
        kinds: &[CommandKind],
        payload: &[u8],
    ) -> (ExecutionResult, Option<Vec<u8>>) {
        let Some(command) = self.commands.read().get(id) else {
            return (ExecutionResult::InvalidCommandId, None);
        };
        if !kinds.contains(&command.kind()) {
            log::debug!(
                "[{}] command {} ('{}') is {}, not {:?}",
                self.process,
                id,
                command.name(),
                command.kind(),
                kinds
            );
            return (ExecutionResult::BadInput, None);
        }
        command.execute_serialized(payload)
    }

    fn executed(&self, id: CommandId, kinds: &[CommandKind], payload: &[u8]) -> ProxyResponse {
        let (result, payload) = self.execute(id, kinds, payload);
        ProxyResponse::Executed { result, payload }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;
    use crate::manager::registry::ComponentEntry;
    use crate::manager::EventBus;
    use crate::proxy::codec;

    fn server() -> ProxyServer {
        let registry = Arc::new(ComponentRegistry::new());
        let mut component = Component::passive("sensor");
        component
            .add_provided_interface("Data")
            .unwrap()
            .add_command_read("GetX", || 42i32)
            .unwrap()
            .add_command_write("SetGain", |_: &f64| {})
            .unwrap();
        registry
            .insert(ComponentEntry::new("remote", component, EventBus::new()))
            .unwrap();
        ProxyServer::new("remote", registry)
    }

    fn connect(server: &ProxyServer, identity: &str) {
        assert_eq!(
            server.handle(ProxyRequest::AddClient {
                identity: identity.into()
            }),
            Some(ProxyResponse::Ack)
        );
        assert_eq!(
            server.handle(ProxyRequest::ConnectServerSide {
                identity: identity.into(),
                client_component: "tracker".into(),
                required_interface: "Data".into(),
                server_component: "sensor".into(),
                provided_interface: "Data".into(),
            }),
            Some(ProxyResponse::Ack)
        );
    }

    #[test]
    fn test_catalogue_and_read() {
        let server = server();
        let Some(ProxyResponse::ProvidedInterfaces(list)) =
            server.handle(ProxyRequest::GetProvidedInterfaces)
        else {
            panic!("expected catalogue");
        };
        assert_eq!(list.len(), 1);
        let get_x = list[0].command("GetX").unwrap().clone();

        connect(&server, "c1");
        let Some(ProxyResponse::CommandIds(ids)) = server.handle(ProxyRequest::GetCommandId {
            identity: "c1".into(),
            slots: vec![get_x],
        }) else {
            panic!("expected ids");
        };
        let (_, id) = ids[0];
        let Some(ProxyResponse::Executed { result, payload }) =
            server.handle(ProxyRequest::ExecuteRead { id })
        else {
            panic!("expected execution");
        };
        assert_eq!(result, ExecutionResult::Ok);
        assert_eq!(codec::decode::<i32>(&payload.unwrap()).unwrap(), 42);
    }

    #[test]
    fn test_unknown_id_and_wrong_verb() {
        let server = server();
        assert_eq!(
            server.handle(ProxyRequest::ExecuteVoid { id: 99 }),
            Some(ProxyResponse::Executed {
                result: ExecutionResult::InvalidCommandId,
                payload: None
            })
        );

        connect(&server, "c1");
        let set_gain = CommandDescription {
            name: "SetGain".into(),
            kind: CommandKind::Write,
            argument_type: Some(std::any::type_name::<f64>().into()),
            result_type: None,
        };
        let Some(ProxyResponse::CommandIds(ids)) = server.handle(ProxyRequest::GetCommandId {
            identity: "c1".into(),
            slots: vec![set_gain],
        }) else {
            panic!("expected ids");
        };
        let id = ids[0].1;
        assert_eq!(
            server.handle(ProxyRequest::ExecuteRead { id }),
            Some(ProxyResponse::Executed {
                result: ExecutionResult::BadInput,
                payload: None
            })
        );
        assert_eq!(
            server.handle(ProxyRequest::ExecuteWrite {
                id,
                payload: vec![0xde, 0xad]
            }),
            Some(ProxyResponse::Executed {
                result: ExecutionResult::SerializationFailure,
                payload: None
            })
        );
    }

    #[test]
    fn test_signature_mismatch_rejected() {
        let server = server();
        connect(&server, "c1");
        let wrong = CommandDescription {
            name: "GetX".into(),
            kind: CommandKind::Read,
            argument_type: None,
            result_type: Some(std::any::type_name::<i64>().into()),
        };
        let response = server.handle(ProxyRequest::GetCommandId {
            identity: "c1".into(),
            slots: vec![wrong],
        });
        assert!(matches!(
            response,
            Some(ProxyResponse::Error(WireError {
                kind: crate::proxy::protocol::WireErrorKind::TypeMismatch,
                ..
            }))
        ));
    }

    #[test]
    fn test_invalidated_component() {
        let server = server();
        connect(&server, "c1");
        let get_x = CommandDescription {
            name: "GetX".into(),
            kind: CommandKind::Read,
            argument_type: None,
            result_type: Some(std::any::type_name::<i32>().into()),
        };
        let Some(ProxyResponse::CommandIds(ids)) = server.handle(ProxyRequest::GetCommandId {
            identity: "c1".into(),
            slots: vec![get_x],
        }) else {
            panic!("expected ids");
        };
        server.invalidate_component("sensor");
        assert_eq!(
            server.handle(ProxyRequest::ExecuteRead { id: ids[0].1 }),
            Some(ProxyResponse::Executed {
                result: ExecutionResult::InvalidCommandId,
                payload: None
            })
        );
    }
}
