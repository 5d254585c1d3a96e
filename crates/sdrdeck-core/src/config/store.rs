//! The store itself: transaction guard, reconciliation, autosave.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;

/// Interval between autosave ticks.
pub const DEFAULT_AUTOSAVE_INTERVAL: Duration = Duration::from_secs(1);

/// How often the autosave thread checks its stop flag.
const AUTOSAVE_POLL: Duration = Duration::from_millis(100);

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while loading or persisting the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading or writing the on-disk file failed
    #[error("config I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The on-disk file exists but is not valid JSON. Fatal at startup:
    /// continuing with a partially parsed document would silently discard
    /// user configuration.
    #[error("config file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Serializing the live document failed
    #[error("failed to serialize config: {0}")]
    Serialize(serde_json::Error),

    /// A required field is absent
    #[error("missing config field: {0}")]
    MissingField(String),

    /// A field holds a value of the wrong type
    #[error("config field '{field}' has type {found}, expected {expected}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },
}

struct Shared {
    path: PathBuf,
    doc: Mutex<Value>,
    dirty: AtomicBool,
    revision: AtomicU64,
    autosave_interval: Duration,
    autosave_running: AtomicBool,
    worker: Mutex<Option<AutosaveWorker>>,
}

struct AutosaveWorker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Versioned, lock-guarded configuration document store.
///
/// Cheap to clone; clones share the same document, dirty flag and autosave
/// worker. Every subsystem receives a clone at construction instead of
/// reaching for a global.
#[derive(Clone)]
pub struct ConfigStore {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("path", &self.shared.path)
            .field("dirty", &self.shared.dirty.load(Ordering::SeqCst))
            .field("revision", &self.shared.revision.load(Ordering::SeqCst))
            .finish()
    }
}

impl ConfigStore {
    /// Create a store persisting to `path`. The document starts empty until
    /// [`load`](Self::load) runs.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self::with_auto_save_interval(path, DEFAULT_AUTOSAVE_INTERVAL)
    }

    /// Create a store with a custom autosave interval.
    pub fn with_auto_save_interval<P: Into<PathBuf>>(path: P, interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                path: path.into(),
                doc: Mutex::new(Value::Null),
                dirty: AtomicBool::new(false),
                revision: AtomicU64::new(0),
                autosave_interval: interval,
                autosave_running: AtomicBool::new(false),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Path of the on-disk document.
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Load the on-disk document if present, else start from `defaults`,
    /// then reconcile against `defaults` and migrate legacy entries.
    ///
    /// A file that exists but fails to parse is a fatal error: the caller
    /// must abort startup rather than continue with a partial document.
    pub fn load(&self, defaults: &Value) -> ConfigResult<()> {
        let path = &self.shared.path;
        let mut changed = false;

        let mut doc = if path.exists() {
            let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?
        } else {
            tracing::info!("No config file at {}, using defaults", path.display());
            changed = true;
            defaults.clone()
        };

        changed |= reconcile(&mut doc, defaults);
        changed |= migrate_module_instances(&mut doc);

        *self.shared.doc.lock().unwrap() = doc;
        if changed {
            self.shared.dirty.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Begin a transaction. All reads and writes of the live document happen
    /// through the returned guard; see [`ConfigGuard::release`].
    pub fn acquire(&self) -> ConfigGuard<'_> {
        ConfigGuard {
            doc: self.shared.doc.lock().unwrap(),
            shared: &self.shared,
            dirty: false,
        }
    }

    /// Force an immediate save of the live document.
    ///
    /// The write is atomic: the document is serialized to a sibling temp
    /// file which is then renamed over the target, so a crash mid-write
    /// never corrupts the on-disk file.
    pub fn save(&self) -> ConfigResult<()> {
        let doc = self.shared.doc.lock().unwrap();
        save_locked(&self.shared.path, &doc)?;
        self.shared.dirty.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Start the background autosave thread. A no-op when already running.
    pub fn enable_auto_save(&self) {
        let mut worker = self.shared.worker.lock().unwrap();
        if worker.is_some() {
            return;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let interval = self.shared.autosave_interval;

        let handle = thread::spawn(move || {
            let mut elapsed = Duration::ZERO;
            while !flag.load(Ordering::SeqCst) {
                thread::sleep(AUTOSAVE_POLL);
                elapsed += AUTOSAVE_POLL;
                if elapsed < interval {
                    continue;
                }
                elapsed = Duration::ZERO;

                let Some(shared) = shared.upgrade() else {
                    break;
                };
                if shared.dirty.swap(false, Ordering::SeqCst) {
                    let doc = shared.doc.lock().unwrap();
                    if let Err(e) = save_locked(&shared.path, &doc) {
                        tracing::warn!("Autosave failed, will retry: {}", e);
                        shared.dirty.store(true, Ordering::SeqCst);
                    }
                }
            }
        });

        self.shared.autosave_running.store(true, Ordering::SeqCst);
        *worker = Some(AutosaveWorker { stop, handle });
        tracing::debug!("Autosave enabled ({:?} interval)", interval);
    }

    /// Stop the autosave thread and wait for it to exit.
    pub fn disable_auto_save(&self) {
        let taken = self.shared.worker.lock().unwrap().take();
        if let Some(worker) = taken {
            worker.stop.store(true, Ordering::SeqCst);
            let _ = worker.handle.join();
            self.shared.autosave_running.store(false, Ordering::SeqCst);
            tracing::debug!("Autosave disabled");
        }
    }

    /// Whether the live document has unsaved changes.
    pub fn is_dirty(&self) -> bool {
        self.shared.dirty.load(Ordering::SeqCst)
    }

    /// Monotonic revision counter, bumped by every dirty release.
    pub fn revision(&self) -> u64 {
        self.shared.revision.load(Ordering::SeqCst)
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().unwrap().take() {
            worker.stop.store(true, Ordering::SeqCst);
            // The worker itself can run this drop when it holds the last
            // reference; joining our own thread would never return.
            if worker.handle.thread().id() != thread::current().id() {
                let _ = worker.handle.join();
            }
        }
    }
}

/// Exclusive access to the live document between acquire and release.
///
/// Dropping the guard without calling [`release`](Self::release) is a
/// read-only release.
pub struct ConfigGuard<'a> {
    doc: MutexGuard<'a, Value>,
    shared: &'a Shared,
    dirty: bool,
}

impl ConfigGuard<'_> {
    /// End the transaction. `dirty = true` marks the document for the next
    /// autosave tick, or saves immediately when autosave is not running.
    pub fn release(mut self, dirty: bool) {
        self.dirty = dirty;
    }
}

impl std::ops::Deref for ConfigGuard<'_> {
    type Target = Value;

    fn deref(&self) -> &Value {
        &self.doc
    }
}

impl std::ops::DerefMut for ConfigGuard<'_> {
    fn deref_mut(&mut self) -> &mut Value {
        &mut self.doc
    }
}

impl Drop for ConfigGuard<'_> {
    fn drop(&mut self) {
        if !self.dirty {
            return;
        }
        self.shared.revision.fetch_add(1, Ordering::SeqCst);
        if self.shared.autosave_running.load(Ordering::SeqCst) {
            self.shared.dirty.store(true, Ordering::SeqCst);
        } else if let Err(e) = save_locked(&self.shared.path, &self.doc) {
            tracing::warn!("Config save failed, will retry on next save: {}", e);
            self.shared.dirty.store(true, Ordering::SeqCst);
        } else {
            self.shared.dirty.store(false, Ordering::SeqCst);
        }
    }
}

/// Serialize `doc` and atomically replace the file at `path`.
fn save_locked(path: &Path, doc: &Value) -> ConfigResult<()> {
    let text = serde_json::to_string_pretty(doc).map_err(ConfigError::Serialize)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    fs::write(&tmp, text).map_err(|source| ConfigError::Io {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Repair `doc` so its top-level key set equals the key set of `defaults`.
///
/// One nested level deep, missing keys are inserted from the defaults but
/// unknown keys are kept: nested maps such as `moduleInstances` hold
/// user-created entries that must survive reconciliation.
fn reconcile(doc: &mut Value, defaults: &Value) -> bool {
    let Some(def) = defaults.as_object() else {
        return false;
    };
    if !doc.is_object() {
        tracing::warn!("Config root is not an object, resetting to defaults");
        *doc = defaults.clone();
        return true;
    }
    let live = doc.as_object_mut().unwrap();
    let mut changed = false;

    for (key, value) in def {
        if !live.contains_key(key) {
            tracing::info!("Missing key in config {}, repairing", key);
            live.insert(key.clone(), value.clone());
            changed = true;
        }
    }

    live.retain(|key, _| {
        if def.contains_key(key) {
            true
        } else {
            tracing::info!("Unused key in config {}, repairing", key);
            changed = true;
            false
        }
    });

    for (key, value) in def {
        let Some(defaults_nested) = value.as_object() else {
            continue;
        };
        let Some(live_nested) = live.get_mut(key).and_then(Value::as_object_mut) else {
            continue;
        };
        for (nested_key, nested_value) in defaults_nested {
            if !live_nested.contains_key(nested_key) {
                tracing::info!("Missing key in config {}.{}, repairing", key, nested_key);
                live_nested.insert(nested_key.clone(), nested_value.clone());
                changed = true;
            }
        }
    }

    changed
}

/// Migrate module instances stored as bare strings to the structured form.
fn migrate_module_instances(doc: &mut Value) -> bool {
    let Some(instances) = doc
        .get_mut("moduleInstances")
        .and_then(Value::as_object_mut)
    else {
        return false;
    };

    let mut changed = false;
    for (name, entry) in instances.iter_mut() {
        if let Value::String(module) = entry {
            tracing::info!("Updating legacy module instance entry '{}'", name);
            *entry = json!({ "module": module.clone(), "enabled": true });
            changed = true;
        }
    }
    changed
}
