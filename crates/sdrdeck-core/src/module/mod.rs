//! # Module System
//!
//! Dynamic loading and lifecycle management for host modules.
//!
//! ## Architecture
//!
//! Module binaries are shared libraries (.so on Linux, .dll on Windows,
//! .dylib on macOS) implementing the sdrdeck module ABI. Each binary
//! declares exactly one module type name; configuration then maps named
//! instances onto module types, and [`ModuleHost`] drives every instance
//! through a strict lifecycle state machine:
//!
//! ```text
//! Created ──► Initialized ──► Enabled ◄──► Disabled
//!    │              │            │             │
//!    └──────────────┴────────────┴─────────────┴──► Destroyed
//! ```
//!
//! Side effects (channel registration, hardware handles) happen only on the
//! edge into `Enabled` and are reversed on the edge out of it, so
//! enable;disable;enable behaves exactly like a single enable.
//!
//! ## Module ABI
//!
//! Binaries must export the following C-ABI functions:
//!
//! - `sdrdeck_module_api_version() -> u32` - API version for compatibility
//! - `sdrdeck_module_info() -> *const ModuleInfo` - type name and metadata
//! - `sdrdeck_create_instance(name: *const c_char) -> *mut c_void`
//! - `sdrdeck_destroy_instance(handle: *mut c_void)`
//! - `sdrdeck_instance_init` / `_end` (required) and `_post_init` /
//!   `_enable` / `_disable` (optional), each taking the opaque handle and
//!   returning 0 on success
//!
//! In-process module types can skip the ABI entirely and register a plain
//! factory closure with [`ModuleHost::register_module_type`].

mod abi;
mod host;
mod loader;

pub use abi::{
    format_version, ModuleInfo, MODULE_API_VERSION, MODULE_SYMBOL_API_VERSION,
    MODULE_SYMBOL_CREATE, MODULE_SYMBOL_DESTROY, MODULE_SYMBOL_DISABLE, MODULE_SYMBOL_ENABLE,
    MODULE_SYMBOL_END, MODULE_SYMBOL_INFO, MODULE_SYMBOL_INIT, MODULE_SYMBOL_POST_INIT,
};
pub use host::{
    InstanceState, Module, ModuleContext, ModuleFactory, ModuleHost, ModuleHostError,
    ModuleHostResult, ModuleInstanceEntry,
};
pub use loader::{ModuleLibrary, ModuleLoadError, ModuleLoadResult};

use thiserror::Error;

/// Result type for module lifecycle callbacks.
pub type ModuleResult<T> = Result<T, ModuleError>;

/// Failure reported by a module's own lifecycle code.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// A foreign-ABI module returned a nonzero status
    #[error("module reported failure status {0}")]
    Status(i32),

    /// An in-process module reported a failure
    #[error("{0}")]
    Message(String),
}

impl From<String> for ModuleError {
    fn from(message: String) -> Self {
        ModuleError::Message(message)
    }
}

impl From<&str> for ModuleError {
    fn from(message: &str) -> Self {
        ModuleError::Message(message.to_string())
    }
}
