//! # Runtime Orchestrator
//!
//! Wires the configuration store, message bus, module host and frame
//! context into the process lifecycle:
//!
//! 1. [`startup`](Runtime::startup): root directory checks, config load and
//!    reconciliation, autosave, backend init, module library loading,
//!    instance creation in config-declared order
//! 2. [`frame`](Runtime::frame): bind → draw → present → unbind, driven by
//!    the window system's frame callback
//! 3. [`shutdown`](Runtime::shutdown): instance teardown in reverse creation
//!    order, backend end, config flush
//!
//! The orchestrator never creates windows or draws widgets; those live
//! behind the [`RenderSurface`] and [`RenderBackend`] traits.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use thiserror::Error;

use crate::backend::RenderBackend;
use crate::bus::MessageBus;
use crate::config::{ConfigError, ConfigStore, FieldAccess};
use crate::frame::{FrameContext, GraphicsContextError, RenderSurface, ResizeRequest};
use crate::module::ModuleHost;

/// Errors that abort startup or a frame.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Graphics(#[from] GraphicsContextError),

    /// The root path exists but is not a directory
    #[error("root path {0} is not a directory")]
    BadRoot(PathBuf),

    /// Creating the root directory failed
    #[error("could not create root directory {path}: {source}")]
    RootCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configured resource directory does not exist. Checked before any
    /// rendering starts.
    #[error("resource directory {0} does not exist, check resourcesDirectory in config.json")]
    MissingResources(PathBuf),

    /// `frame` was called before startup or after shutdown
    #[error("runtime is not running")]
    NotRunning,
}

/// Startup parameters handed in by the process entry point.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Root directory holding `config.json` and module state.
    pub root: PathBuf,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
}

impl RuntimeOptions {
    pub fn new<P: Into<PathBuf>>(root: P, width: u32, height: u32) -> Self {
        Self {
            root: root.into(),
            width,
            height,
        }
    }
}

/// Compiled-in default configuration document.
pub fn default_config(root: &Path) -> Value {
    json!({
        "windowSize": { "w": 1280, "h": 720 },
        "vsync": true,
        "moduleInstances": {
            "File Source": { "module": "file_source", "enabled": true },
            "Audio Sink": { "module": "audio_sink", "enabled": true },
            "Recorder": { "module": "recorder", "enabled": true }
        },
        // Extra module binaries to load besides the modules directory scan.
        "modules": [],
        "modulesDirectory": root.join("modules").display().to_string(),
        "resourcesDirectory": root.join("res").display().to_string()
    })
}

/// Top-level driver owning every host subsystem.
pub struct Runtime {
    options: RuntimeOptions,
    config: ConfigStore,
    bus: MessageBus,
    host: ModuleHost,
    frame: FrameContext,
    backend: Box<dyn RenderBackend>,
    running: bool,
}

impl Runtime {
    /// Assemble a runtime over the windowing glue's surface and renderer.
    /// Nothing runs until [`startup`](Self::startup).
    pub fn new(
        options: RuntimeOptions,
        surface: Box<dyn RenderSurface>,
        backend: Box<dyn RenderBackend>,
    ) -> Self {
        let config = ConfigStore::new(options.root.join("config.json"));
        let bus = MessageBus::new();
        let host = ModuleHost::new(config.clone(), bus.clone());
        let frame = FrameContext::new(surface, config.clone(), options.width, options.height);
        Self {
            options,
            config,
            bus,
            host,
            frame,
            backend,
            running: false,
        }
    }

    /// Shared configuration store.
    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    /// Shared message bus.
    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Module host, e.g. for registering in-process module types before
    /// startup.
    pub fn host_mut(&mut self) -> &mut ModuleHost {
        &mut self.host
    }

    /// Handle for requesting resizes from any thread.
    pub fn resize_handle(&self) -> ResizeRequest {
        self.frame.resize_handle()
    }

    /// Run the startup sequence. A malformed config file or a missing
    /// resource directory aborts with an error; a broken module binary is
    /// logged and skipped.
    pub fn startup(&mut self) -> Result<(), RuntimeError> {
        let root = &self.options.root;
        tracing::info!("sdrdeck host {}", crate::VERSION);
        tracing::info!("Root: {}", root.display());

        if !root.exists() {
            tracing::warn!("Root directory {} does not exist, creating it", root.display());
            std::fs::create_dir_all(root).map_err(|source| RuntimeError::RootCreation {
                path: root.clone(),
                source,
            })?;
        }
        if !root.is_dir() {
            return Err(RuntimeError::BadRoot(root.clone()));
        }

        tracing::info!("Loading config");
        self.config.load(&default_config(root))?;
        self.config.enable_auto_save();

        let (resource_dir, modules_dir, extra_modules) = {
            let cfg = self.config.acquire();
            let resource_dir = PathBuf::from(cfg.str_field("resourcesDirectory")?);
            let modules_dir = PathBuf::from(cfg.str_field("modulesDirectory")?);
            let extra_modules: Vec<PathBuf> = cfg
                .array_field("modules")?
                .iter()
                .filter_map(Value::as_str)
                .map(PathBuf::from)
                .collect();
            cfg.release(false);
            (resource_dir, modules_dir, extra_modules)
        };

        if !resource_dir.is_dir() {
            return Err(RuntimeError::MissingResources(resource_dir));
        }

        let (width, height) = self.frame.size();
        self.backend.init(&resource_dir, width, height)?;

        let loaded = self.host.load_modules_from(&modules_dir);
        tracing::info!("Loaded {} module libraries from {}", loaded, modules_dir.display());
        for path in &extra_modules {
            if let Err(e) = self.host.load_module_library(path) {
                tracing::warn!("Failed to load module {}: {}", path.display(), e);
            }
        }

        let created = self.host.instantiate_from_config();
        tracing::info!("Created {} module instances", created);

        self.running = true;
        tracing::info!("Ready");
        Ok(())
    }

    /// Compose and present one frame. Driven by the window system's frame
    /// callback; never called concurrently with itself or `shutdown`.
    pub fn frame(&mut self) -> Result<(), RuntimeError> {
        if !self.running {
            return Err(RuntimeError::NotRunning);
        }

        let vsync = {
            let cfg = self.config.acquire();
            let vsync = cfg.bool_field("vsync").unwrap_or(true);
            cfg.release(false);
            vsync
        };

        let guard = self.frame.begin_frame(self.backend.as_mut())?;
        self.backend.draw_frame();
        guard.end(vsync)?;
        Ok(())
    }

    /// Ordered shutdown: instances in reverse creation order, then the
    /// backend, then a final config flush. Idempotent.
    pub fn shutdown(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;

        self.host.shutdown();

        if let Err(e) = self.backend.end() {
            tracing::warn!("Backend teardown failed: {}", e);
        }

        self.config.disable_auto_save();
        if let Err(e) = self.config.save() {
            tracing::warn!("Final config save failed: {}", e);
        }
        tracing::info!("Exiting successfully");
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("root", &self.options.root)
            .field("running", &self.running)
            .finish()
    }
}
