//! End-to-end tests of the host runtime over mock windowing glue.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tempfile::TempDir;

use sdrdeck_core::frame::{GraphicsContextError, RenderSurface};
use sdrdeck_core::module::{Module, ModuleResult};
use sdrdeck_core::runtime::{Runtime, RuntimeError, RuntimeOptions};
use sdrdeck_core::RenderBackend;

#[derive(Clone, Default)]
struct HeadlessSurface {
    bound: Arc<Mutex<bool>>,
}

impl RenderSurface for HeadlessSurface {
    fn make_current(&mut self) -> Result<(), GraphicsContextError> {
        *self.bound.lock().unwrap() = true;
        Ok(())
    }

    fn release_current(&mut self) {
        *self.bound.lock().unwrap() = false;
    }

    fn present(&mut self, _vsync: bool) -> Result<(), GraphicsContextError> {
        Ok(())
    }
}

#[derive(Clone, Default)]
struct HeadlessBackend {
    frames: Arc<AtomicUsize>,
    resizes: Arc<Mutex<Vec<(u32, u32)>>>,
    ended: Arc<AtomicUsize>,
}

impl RenderBackend for HeadlessBackend {
    fn init(
        &mut self,
        _resource_dir: &Path,
        _width: u32,
        _height: u32,
    ) -> Result<(), GraphicsContextError> {
        Ok(())
    }

    fn draw_frame(&mut self) {
        self.frames.fetch_add(1, Ordering::SeqCst);
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.resizes.lock().unwrap().push((width, height));
    }

    fn end(&mut self) -> Result<(), GraphicsContextError> {
        self.ended.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct RecordingModule {
    name: String,
    events: Arc<Mutex<Vec<String>>>,
}

impl Module for RecordingModule {
    fn init(&mut self) -> ModuleResult<()> {
        self.events.lock().unwrap().push(format!("init {}", self.name));
        Ok(())
    }

    fn enable(&mut self) -> ModuleResult<()> {
        self.events
            .lock()
            .unwrap()
            .push(format!("enable {}", self.name));
        Ok(())
    }

    fn end(&mut self) {
        self.events.lock().unwrap().push(format!("end {}", self.name));
    }
}

fn runtime_at(root: &Path) -> (Runtime, HeadlessBackend) {
    static TRACING: std::sync::Once = std::sync::Once::new();
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });

    let backend = HeadlessBackend::default();
    let runtime = Runtime::new(
        RuntimeOptions::new(root, 1280, 720),
        Box::new(HeadlessSurface::default()),
        Box::new(backend.clone()),
    );
    (runtime, backend)
}

#[test]
fn test_startup_writes_reconciled_defaults() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("deck");
    std::fs::create_dir_all(root.join("res")).unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let (mut runtime, _backend) = runtime_at(&root);
    let shared = Arc::clone(&events);
    runtime.host_mut().register_module_type("file_source", move |ctx| {
        Box::new(RecordingModule {
            name: ctx.instance_name,
            events: Arc::clone(&shared),
        })
    });

    runtime.startup().unwrap();
    runtime.shutdown();

    // No file existed, so the defaults were materialized and flushed.
    let on_disk: Value =
        serde_json::from_str(&std::fs::read_to_string(root.join("config.json")).unwrap()).unwrap();
    assert_eq!(on_disk["windowSize"]["w"], 1280);
    assert_eq!(on_disk["windowSize"]["h"], 720);
    assert_eq!(
        on_disk["moduleInstances"]["File Source"],
        json!({ "module": "file_source", "enabled": true })
    );

    // The registered type went through init and enable; unknown default
    // types were skipped without failing startup.
    let events = events.lock().unwrap();
    assert!(events.contains(&"init File Source".to_string()));
    assert!(events.contains(&"enable File Source".to_string()));
    assert!(events.contains(&"end File Source".to_string()));
}

#[test]
fn test_missing_resource_directory_aborts_startup() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("deck");

    let (mut runtime, _backend) = runtime_at(&root);
    let err = runtime.startup().unwrap_err();
    assert!(matches!(err, RuntimeError::MissingResources(_)));
}

#[test]
fn test_malformed_config_aborts_startup() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("deck");
    std::fs::create_dir_all(root.join("res")).unwrap();
    std::fs::write(root.join("config.json"), "{ definitely not json").unwrap();

    let (mut runtime, _backend) = runtime_at(&root);
    let err = runtime.startup().unwrap_err();
    assert!(matches!(err, RuntimeError::Config(_)));
}

#[test]
fn test_frames_and_deferred_resize() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("deck");
    std::fs::create_dir_all(root.join("res")).unwrap();

    let (mut runtime, backend) = runtime_at(&root);
    runtime.startup().unwrap();

    runtime.frame().unwrap();
    assert_eq!(backend.frames.load(Ordering::SeqCst), 1);
    assert!(backend.resizes.lock().unwrap().is_empty());

    runtime.resize_handle().request(800, 600);
    runtime.frame().unwrap();
    assert_eq!(*backend.resizes.lock().unwrap(), vec![(800, 600)]);

    runtime.shutdown();
    assert_eq!(backend.ended.load(Ordering::SeqCst), 1);

    let on_disk: Value =
        serde_json::from_str(&std::fs::read_to_string(root.join("config.json")).unwrap()).unwrap();
    assert_eq!(on_disk["windowSize"]["w"], 800);
    assert_eq!(on_disk["windowSize"]["h"], 600);
}

#[test]
fn test_frame_after_shutdown_is_an_error() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("deck");
    std::fs::create_dir_all(root.join("res")).unwrap();

    let (mut runtime, _backend) = runtime_at(&root);
    runtime.startup().unwrap();
    runtime.shutdown();

    assert!(matches!(runtime.frame(), Err(RuntimeError::NotRunning)));
    // A second shutdown is a harmless no-op.
    runtime.shutdown();
}

#[test]
fn test_shutdown_order_reverses_config_order() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("deck");
    std::fs::create_dir_all(root.join("res")).unwrap();
    std::fs::write(
        root.join("config.json"),
        serde_json::to_string_pretty(&json!({
            "moduleInstances": {
                "A": { "module": "ordered", "enabled": true },
                "B": { "module": "ordered", "enabled": true },
                "C": { "module": "ordered", "enabled": true }
            }
        }))
        .unwrap(),
    )
    .unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let (mut runtime, _backend) = runtime_at(&root);
    let shared = Arc::clone(&events);
    runtime.host_mut().register_module_type("ordered", move |ctx| {
        Box::new(RecordingModule {
            name: ctx.instance_name,
            events: Arc::clone(&shared),
        })
    });

    runtime.startup().unwrap();
    runtime.shutdown();

    let events = events.lock().unwrap();
    let enables: Vec<&str> = events
        .iter()
        .filter(|e| e.starts_with("enable"))
        .map(String::as_str)
        .collect();
    let ends: Vec<&str> = events
        .iter()
        .filter(|e| e.starts_with("end"))
        .map(String::as_str)
        .collect();
    assert_eq!(enables, vec!["enable A", "enable B", "enable C"]);
    assert_eq!(ends, vec!["end C", "end B", "end A"]);
}
