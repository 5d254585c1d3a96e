//! # Configuration Store
//!
//! A lock-guarded JSON document shared by every subsystem of the host.
//!
//! The live document is only ever read or mutated inside an explicit
//! transaction bracket: [`ConfigStore::acquire`] returns a guard, and
//! [`ConfigGuard::release`] ends the bracket, optionally marking the
//! document dirty for persistence. The bracket is held only for in-memory
//! access, never across I/O or a blocking wait.
//!
//! On load the document is reconciled against the compiled-in defaults:
//! missing top-level keys are inserted, unknown top-level keys removed, and
//! both repairs logged. Legacy shorthand entries (a module instance stored
//! as a bare string) are migrated to the structured form.
//!
//! ## Example
//!
//! ```rust,ignore
//! let store = ConfigStore::new(root.join("config.json"));
//! store.load(&defaults)?;
//! store.enable_auto_save();
//!
//! let mut cfg = store.acquire();
//! cfg["windowSize"]["w"] = serde_json::json!(1920);
//! cfg.release(true);
//! ```

mod access;
mod store;

pub use access::FieldAccess;
pub use store::{
    ConfigError, ConfigGuard, ConfigResult, ConfigStore, DEFAULT_AUTOSAVE_INTERVAL,
};
