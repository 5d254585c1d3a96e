//! Module host: factory registry and per-instance lifecycle management.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::bus::MessageBus;
use crate::config::ConfigStore;

use super::loader::{is_shared_library, ModuleLibrary, ModuleLoadError};
use super::{ModuleError, ModuleResult};

/// Result type for host operations.
pub type ModuleHostResult<T> = Result<T, ModuleHostError>;

/// Errors reported by the module host.
#[derive(Debug, Error)]
pub enum ModuleHostError {
    /// No module type with this name was ever registered
    #[error("unknown module type: {0}")]
    UnknownModuleType(String),

    /// An instance with this name already exists
    #[error("duplicate instance name: {0}")]
    DuplicateInstanceName(String),

    /// No instance with this name exists
    #[error("unknown instance: {0}")]
    UnknownInstance(String),

    /// The instance has already been destroyed
    #[error("instance '{0}' has been destroyed")]
    InstanceDestroyed(String),

    /// The instance's own lifecycle code failed
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] ModuleError),
}

/// Lifecycle states of a module instance.
///
/// Side effects happen only on the edge into `Enabled` and are reversed on
/// the edge out of it; `Destroyed` is terminal and reachable from anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Created,
    Initialized,
    Enabled,
    Disabled,
    Destroyed,
}

/// Capability set implemented by every module instance.
///
/// `post_init`, `enable` and `disable` are optional capabilities with no-op
/// defaults; `init` and `end` are required.
pub trait Module {
    /// One-time initialization after creation.
    fn init(&mut self) -> ModuleResult<()>;

    /// Called once after every configured instance has been created, so
    /// modules may look up each other's channels.
    fn post_init(&mut self) -> ModuleResult<()> {
        Ok(())
    }

    /// Acquire module-owned resources (channels, hardware).
    fn enable(&mut self) -> ModuleResult<()> {
        Ok(())
    }

    /// Release what `enable` acquired. A later `enable` must reproduce the
    /// same observable behavior as the first one.
    fn disable(&mut self) -> ModuleResult<()> {
        Ok(())
    }

    /// Final teardown. Best-effort; never called twice.
    fn end(&mut self);
}

/// Everything a module instance receives from the host at creation.
pub struct ModuleContext {
    /// Unique instance name from configuration.
    pub instance_name: String,
    /// Shared configuration store.
    pub config: ConfigStore,
    /// Shared message bus. Channels registered here should use the instance
    /// name as owner so the host can reclaim them.
    pub bus: MessageBus,
}

/// Factory producing instances of an in-process module type.
pub type ModuleFactory = Box<dyn Fn(ModuleContext) -> Box<dyn Module>>;

/// A `moduleInstances` entry in the configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleInstanceEntry {
    /// Module type name.
    pub module: String,
    /// Whether the instance is enabled at startup.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

struct ModuleDescriptor {
    name: String,
    type_name: String,
    state: InstanceState,
    instance: Option<Box<dyn Module>>,
}

/// Loads module binaries, instantiates named module instances and enforces
/// the lifecycle state machine on each of them.
///
/// Instances are kept in creation order; shutdown tears them down in exact
/// reverse order so dependents go before their dependencies.
pub struct ModuleHost {
    // Declared before `libraries`: instances must drop first, their teardown
    // may run code from the backing binaries.
    instances: Vec<ModuleDescriptor>,
    factories: HashMap<String, ModuleFactory>,
    libraries: HashMap<String, ModuleLibrary>,
    config: ConfigStore,
    bus: MessageBus,
}

impl std::fmt::Debug for ModuleHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let instances: Vec<(&str, InstanceState)> = self
            .instances
            .iter()
            .map(|d| (d.name.as_str(), d.state))
            .collect();
        f.debug_struct("ModuleHost")
            .field("types", &self.type_names())
            .field("instances", &instances)
            .finish()
    }
}

impl ModuleHost {
    pub fn new(config: ConfigStore, bus: MessageBus) -> Self {
        Self {
            instances: Vec::new(),
            factories: HashMap::new(),
            libraries: HashMap::new(),
            config,
            bus,
        }
    }

    /// Register an in-process module type. Returns `false` (keeping the
    /// existing registration) when the type name is already taken.
    pub fn register_module_type<F>(&mut self, type_name: &str, factory: F) -> bool
    where
        F: Fn(ModuleContext) -> Box<dyn Module> + 'static,
    {
        if self.is_type_registered(type_name) {
            tracing::warn!("Module type '{}' already registered, ignoring", type_name);
            return false;
        }
        self.factories
            .insert(type_name.to_string(), Box::new(factory));
        tracing::info!("Registered module type '{}'", type_name);
        true
    }

    /// Load a module binary and register the type it declares.
    ///
    /// Failure leaves the host fully usable; the broken binary's type is
    /// simply unavailable.
    pub fn load_module_library(&mut self, path: &Path) -> Result<String, ModuleLoadError> {
        let library = ModuleLibrary::load(path)?;
        let type_name = library.type_name().to_string();
        if self.is_type_registered(&type_name) {
            return Err(ModuleLoadError::InvalidData(format!(
                "module type '{}' already registered",
                type_name
            )));
        }
        tracing::info!(
            "Loaded module library {} (type '{}', version {})",
            path.display(),
            type_name,
            library.version()
        );
        self.libraries.insert(type_name.clone(), library);
        Ok(type_name)
    }

    /// Scan a directory for shared libraries and load each one, skipping
    /// (with a log) any that fail. Returns the number loaded.
    pub fn load_modules_from(&mut self, dir: &Path) -> usize {
        if !dir.is_dir() {
            tracing::debug!("Module directory {} does not exist", dir.display());
            return 0;
        }
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Cannot read module directory {}: {}", dir.display(), e);
                return 0;
            }
        };

        let mut count = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !is_shared_library(&path) {
                continue;
            }
            match self.load_module_library(&path) {
                Ok(_) => count += 1,
                Err(e) => {
                    tracing::warn!("Failed to load module {}: {}", path.display(), e);
                }
            }
        }
        count
    }

    /// Whether a module type with this name is available.
    pub fn is_type_registered(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name) || self.libraries.contains_key(type_name)
    }

    /// Names of all registered module types.
    pub fn type_names(&self) -> Vec<&str> {
        self.factories
            .keys()
            .chain(self.libraries.keys())
            .map(String::as_str)
            .collect()
    }

    /// Create a named instance of a module type. The new instance starts in
    /// [`InstanceState::Created`]; call [`enable`](Self::enable) to bring it
    /// up.
    pub fn create_instance(&mut self, name: &str, type_name: &str) -> ModuleHostResult<()> {
        if self
            .instances
            .iter()
            .any(|d| d.name == name && d.state != InstanceState::Destroyed)
        {
            return Err(ModuleHostError::DuplicateInstanceName(name.to_string()));
        }

        let instance = if let Some(factory) = self.factories.get(type_name) {
            factory(ModuleContext {
                instance_name: name.to_string(),
                config: self.config.clone(),
                bus: self.bus.clone(),
            })
        } else if let Some(library) = self.libraries.get(type_name) {
            library.instantiate(name)?
        } else {
            return Err(ModuleHostError::UnknownModuleType(type_name.to_string()));
        };

        tracing::info!("Created instance '{}' of type '{}'", name, type_name);
        self.instances.push(ModuleDescriptor {
            name: name.to_string(),
            type_name: type_name.to_string(),
            state: InstanceState::Created,
            instance: Some(instance),
        });
        Ok(())
    }

    /// Instantiate every `moduleInstances` entry from the configuration, in
    /// declared order: create all, post-init all, then enable the ones
    /// flagged enabled. One broken entry never stops the others.
    ///
    /// Returns the number of instances created.
    pub fn instantiate_from_config(&mut self) -> usize {
        let entries = {
            let cfg = self.config.acquire();
            let snapshot = cfg
                .get("moduleInstances")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            cfg.release(false);
            snapshot
        };

        let mut created: Vec<(String, bool)> = Vec::new();
        for (name, value) in &entries {
            let entry: ModuleInstanceEntry = match serde_json::from_value(value.clone()) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Malformed module instance entry '{}': {}", name, e);
                    continue;
                }
            };
            match self.create_instance(name, &entry.module) {
                Ok(()) => created.push((name.clone(), entry.enabled)),
                Err(ModuleHostError::UnknownModuleType(t)) => {
                    tracing::warn!("Module '{}' for instance '{}' not loaded, skipping", t, name);
                }
                Err(e) => {
                    tracing::warn!("Failed to create instance '{}': {}", name, e);
                }
            }
        }

        for (name, _) in &created {
            if let Err(e) = self.post_init(name) {
                tracing::warn!("Post-init of instance '{}' failed: {}", name, e);
            }
        }

        for (name, enabled) in &created {
            if !enabled {
                continue;
            }
            if let Err(e) = self.enable(name) {
                tracing::warn!("Failed to enable instance '{}': {}", name, e);
            }
        }

        created.len()
    }

    /// Run the instance's post-init hook.
    pub fn post_init(&mut self, name: &str) -> ModuleHostResult<()> {
        let descriptor = self.descriptor_mut(name)?;
        if descriptor.state == InstanceState::Destroyed {
            return Err(ModuleHostError::InstanceDestroyed(name.to_string()));
        }
        if let Some(instance) = descriptor.instance.as_mut() {
            instance.post_init()?;
        }
        Ok(())
    }

    /// Bring the instance up: `Created → Initialized → Enabled`. A no-op on
    /// an already-enabled instance. On failure the instance keeps its prior
    /// state.
    pub fn enable(&mut self, name: &str) -> ModuleHostResult<()> {
        let descriptor = self.descriptor_mut(name)?;
        match descriptor.state {
            InstanceState::Enabled => return Ok(()),
            InstanceState::Destroyed => {
                return Err(ModuleHostError::InstanceDestroyed(name.to_string()))
            }
            InstanceState::Created => {
                let instance = descriptor.instance.as_mut().unwrap();
                instance.init()?;
                descriptor.state = InstanceState::Initialized;
                instance.enable()?;
                descriptor.state = InstanceState::Enabled;
            }
            InstanceState::Initialized | InstanceState::Disabled => {
                descriptor.instance.as_mut().unwrap().enable()?;
                descriptor.state = InstanceState::Enabled;
            }
        }
        tracing::info!("Instance '{}' enabled", name);
        Ok(())
    }

    /// Take the instance down, reversing what `enable` acquired. A no-op on
    /// an instance that never initialized or is already disabled.
    pub fn disable(&mut self, name: &str) -> ModuleHostResult<()> {
        let descriptor = self.descriptor_mut(name)?;
        match descriptor.state {
            InstanceState::Created
            | InstanceState::Initialized
            | InstanceState::Disabled => return Ok(()),
            InstanceState::Destroyed => {
                return Err(ModuleHostError::InstanceDestroyed(name.to_string()))
            }
            InstanceState::Enabled => {
                descriptor.instance.as_mut().unwrap().disable()?;
                descriptor.state = InstanceState::Disabled;
            }
        }
        self.bus.unregister_owner(name);
        tracing::info!("Instance '{}' disabled", name);
        Ok(())
    }

    /// Destroy the instance from any state. Always succeeds; a second call
    /// on the same name is a no-op. All resources the instance acquired are
    /// released, including any channels still registered under its name.
    pub fn end(&mut self, name: &str) -> ModuleHostResult<()> {
        let descriptor = match self.instances.iter_mut().find(|d| d.name == name) {
            Some(descriptor) => descriptor,
            None => return Err(ModuleHostError::UnknownInstance(name.to_string())),
        };
        if descriptor.state == InstanceState::Destroyed {
            return Ok(());
        }

        if let Some(mut instance) = descriptor.instance.take() {
            if descriptor.state == InstanceState::Enabled {
                if let Err(e) = instance.disable() {
                    tracing::warn!("Disable during end of '{}' failed: {}", name, e);
                }
            }
            instance.end();
        }
        descriptor.state = InstanceState::Destroyed;
        self.bus.unregister_owner(name);
        tracing::info!("Instance '{}' destroyed", name);
        Ok(())
    }

    /// Destroy every remaining instance in reverse creation order.
    /// Best-effort: one instance's failure never blocks the others.
    pub fn shutdown(&mut self) {
        let names: Vec<String> = self
            .instances
            .iter()
            .rev()
            .filter(|d| d.state != InstanceState::Destroyed)
            .map(|d| d.name.clone())
            .collect();
        for name in names {
            if let Err(e) = self.end(&name) {
                tracing::warn!("Teardown of instance '{}' failed: {}", name, e);
            }
        }
    }

    /// Current state of a named instance.
    pub fn state(&self, name: &str) -> Option<InstanceState> {
        self.instances
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.state)
    }

    /// Module type of a named instance.
    pub fn instance_type(&self, name: &str) -> Option<&str> {
        self.instances
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.type_name.as_str())
    }

    /// Instance names in creation order.
    pub fn instance_names(&self) -> Vec<&str> {
        self.instances.iter().map(|d| d.name.as_str()).collect()
    }

    fn descriptor_mut(&mut self, name: &str) -> ModuleHostResult<&mut ModuleDescriptor> {
        self.instances
            .iter_mut()
            .find(|d| d.name == name)
            .ok_or_else(|| ModuleHostError::UnknownInstance(name.to_string()))
    }
}
