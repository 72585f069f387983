use crate::error::{MtsError, MtsResult};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One registered component as seen by the global registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub name: String,
    /// Exported provided interface names
    pub interfaces: Vec<String>,
    /// Proxy endpoint of the owning process
    pub address: String,
}

/// Resolved location of a provided interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceLocation {
    pub process: String,
    pub component: String,
    pub interface: String,
    pub endpoint: String,
}

/// Registry change pushed to watchers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryEvent {
    ProcessAdded { process: String },
    ProcessRemoved { process: String },
    ComponentAdded { process: String, component: String },
    ComponentRemoved { process: String, component: String },
}

/// Authoritative registry of processes, components and interfaces
///
/// Implemented in-process by [`GlobalManager`] and over TCP by
/// [`RemoteGlobalManager`](super::RemoteGlobalManager).
pub trait GlobalRegistry: Send + Sync {
    fn add_process(&self, process: &str, endpoint: &str) -> MtsResult<()>;

    /// Deregister a process and every component it owns
    fn remove_process(&self, process: &str) -> MtsResult<()>;

    fn add_component(&self, process: &str, component: &str, interfaces: &[String]) -> MtsResult<()>;

    fn remove_component(&self, process: &str, component: &str) -> MtsResult<()>;

    fn find_provided_interface(
        &self,
        process: &str,
        component: &str,
        interface: &str,
    ) -> MtsResult<InterfaceLocation>;

    fn processes(&self) -> MtsResult<Vec<String>>;

    fn components(&self, process: &str) -> MtsResult<Vec<ComponentRecord>>;

    fn interfaces(&self, process: &str, component: &str) -> MtsResult<Vec<String>> {
        self.components(process)?
            .into_iter()
            .find(|c| c.name == component)
            .map(|c| c.interfaces)
            .ok_or_else(|| MtsError::not_found(format!("component '{}:{}'", process, component)))
    }

    /// Subscribe to registry changes
    fn watch(&self) -> MtsResult<Receiver<RegistryEvent>>;
}

#[derive(Debug, Clone)]
struct ProcessRegistryEntry {
    endpoint: String,
    components: BTreeMap<String, ComponentRecord>,
}

/// In-process global component manager
#[derive(Default)]
pub struct GlobalManager {
    processes: RwLock<BTreeMap<String, ProcessRegistryEntry>>,
    watchers: Mutex<Vec<Sender<RegistryEvent>>>,
}

impl GlobalManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn notify(&self, event: RegistryEvent) {
        self.watchers.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn process_count(&self) -> usize {
        self.processes.read().len()
    }
}

impl GlobalRegistry for GlobalManager {
    fn add_process(&self, process: &str, endpoint: &str) -> MtsResult<()> {
        {
            let mut processes = self.processes.write();
            if processes.contains_key(process) {
                return Err(MtsError::DuplicateName(format!("process '{}'", process)));
            }
            processes.insert(
                process.to_string(),
                ProcessRegistryEntry {
                    endpoint: endpoint.to_string(),
                    components: BTreeMap::new(),
                },
            );
        }
        log::info!("Process '{}' registered at {}", process, endpoint);
        self.notify(RegistryEvent::ProcessAdded {
            process: process.to_string(),
        });
        Ok(())
    }

    fn remove_process(&self, process: &str) -> MtsResult<()> {
        let removed = self.processes.write().remove(process);
        let Some(entry) = removed else {
            return Err(MtsError::not_found(format!("process '{}'", process)));
        };
        log::info!(
            "Process '{}' deregistered with {} components",
            process,
            entry.components.len()
        );
        for component in entry.components.keys() {
            self.notify(RegistryEvent::ComponentRemoved {
                process: process.to_string(),
                component: component.clone(),
            });
        }
        self.notify(RegistryEvent::ProcessRemoved {
            process: process.to_string(),
        });
        Ok(())
    }

    fn add_component(&self, process: &str, component: &str, interfaces: &[String]) -> MtsResult<()> {
        {
            let mut processes = self.processes.write();
            let entry = processes
                .get_mut(process)
                .ok_or_else(|| MtsError::not_found(format!("process '{}'", process)))?;
            if entry.components.contains_key(component) {
                return Err(MtsError::DuplicateName(format!(
                    "component '{}' in process '{}'",
                    component, process
                )));
            }
            let record = ComponentRecord {
                name: component.to_string(),
                interfaces: interfaces.to_vec(),
                address: entry.endpoint.clone(),
            };
            entry.components.insert(component.to_string(), record);
        }
        log::debug!("Component '{}:{}' registered", process, component);
        self.notify(RegistryEvent::ComponentAdded {
            process: process.to_string(),
            component: component.to_string(),
        });
        Ok(())
    }

    fn remove_component(&self, process: &str, component: &str) -> MtsResult<()> {
        {
            let mut processes = self.processes.write();
            let entry = processes
                .get_mut(process)
                .ok_or_else(|| MtsError::not_found(format!("process '{}'", process)))?;
            if entry.components.remove(component).is_none() {
                return Err(MtsError::not_found(format!(
                    "component '{}:{}'",
                    process, component
                )));
            }
        }
        self.notify(RegistryEvent::ComponentRemoved {
            process: process.to_string(),
            component: component.to_string(),
        });
        Ok(())
    }

    fn find_provided_interface(
        &self,
        process: &str,
        component: &str,
        interface: &str,
    ) -> MtsResult<InterfaceLocation> {
        let processes = self.processes.read();
        let entry = processes
            .get(process)
            .ok_or_else(|| MtsError::not_found(format!("process '{}'", process)))?;
        let record = entry.components.get(component).ok_or_else(|| {
            MtsError::not_found(format!("component '{}:{}'", process, component))
        })?;
        if !record.interfaces.iter().any(|i| i == interface) {
            return Err(MtsError::not_found(format!(
                "provided interface '{}:{}.{}'",
                process, component, interface
            )));
        }
        Ok(InterfaceLocation {
            process: process.to_string(),
            component: component.to_string(),
            interface: interface.to_string(),
            endpoint: record.address.clone(),
        })
    }

    fn processes(&self) -> MtsResult<Vec<String>> {
        Ok(self.processes.read().keys().cloned().collect())
    }

    fn components(&self, process: &str) -> MtsResult<Vec<ComponentRecord>> {
        let processes = self.processes.read();
        let entry = processes
            .get(process)
            .ok_or_else(|| MtsError::not_found(format!("process '{}'", process)))?;
        Ok(entry.components.values().cloned().collect())
    }

    fn watch(&self) -> MtsResult<Receiver<RegistryEvent>> {
        let (tx, rx) = channel::unbounded();
        self.watchers.lock().push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> GlobalManager {
        let gcm = GlobalManager::new();
        gcm.add_process("vision", "loopback://vision").unwrap();
        gcm.add_component("vision", "camera", &["Frames".to_string()])
            .unwrap();
        gcm
    }

    #[test]
    fn test_lookup() {
        let gcm = registry();
        let location = gcm
            .find_provided_interface("vision", "camera", "Frames")
            .unwrap();
        assert_eq!(location.endpoint, "loopback://vision");
        assert_eq!(gcm.interfaces("vision", "camera").unwrap(), vec!["Frames"]);
        assert!(matches!(
            gcm.find_provided_interface("vision", "camera", "Depth"),
            Err(MtsError::NoSuchInterfaceOrCommand(_))
        ));
        assert!(gcm.find_provided_interface("audio", "mic", "Samples").is_err());
    }

    #[test]
    fn test_unique_names() {
        let gcm = registry();
        assert!(matches!(
            gcm.add_process("vision", "loopback://other"),
            Err(MtsError::DuplicateName(_))
        ));
        assert!(matches!(
            gcm.add_component("vision", "camera", &[]),
            Err(MtsError::DuplicateName(_))
        ));
        gcm.add_process("planner", "loopback://planner").unwrap();
        gcm.add_component("planner", "camera", &[]).unwrap();
    }

    #[test]
    fn test_remove_process_notifies_watchers() {
        let gcm = registry();
        let events = gcm.watch().unwrap();
        gcm.remove_process("vision").unwrap();
        assert_eq!(
            events.try_recv().unwrap(),
            RegistryEvent::ComponentRemoved {
                process: "vision".into(),
                component: "camera".into()
            }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            RegistryEvent::ProcessRemoved {
                process: "vision".into()
            }
        );
        assert!(gcm.processes().unwrap().is_empty());
        assert!(gcm.components("vision").is_err());
    }
}
