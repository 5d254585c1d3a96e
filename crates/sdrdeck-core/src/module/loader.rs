//! Dynamic loading of module binaries.
//!
//! Loading resolves the ABI entry points once, checks the version, and
//! keeps the library handle alive for as long as instances of the module
//! type may exist. A broken binary fails with a [`ModuleLoadError`] and
//! never aborts the host.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[cfg(feature = "plugins")]
use libloading::Library;

use super::abi::{format_version, MODULE_API_VERSION};
use super::host::Module;
use super::ModuleError;

#[cfg(feature = "plugins")]
use super::abi::{
    ffi, versions_compatible, InstanceHandle, MODULE_SYMBOL_API_VERSION, MODULE_SYMBOL_CREATE,
    MODULE_SYMBOL_DESTROY, MODULE_SYMBOL_DISABLE, MODULE_SYMBOL_ENABLE, MODULE_SYMBOL_END,
    MODULE_SYMBOL_INFO, MODULE_SYMBOL_INIT, MODULE_SYMBOL_POST_INIT,
};
#[cfg(feature = "plugins")]
use super::ModuleResult;

/// Result type for module loading.
pub type ModuleLoadResult<T> = Result<T, ModuleLoadError>;

/// Errors that can occur while loading a module binary.
#[derive(Debug, Error)]
pub enum ModuleLoadError {
    /// Module file not found
    #[error("module library not found: {0}")]
    NotFound(PathBuf),

    /// The dynamic loader rejected the binary
    #[error("failed to load module library: {0}")]
    LoadFailed(String),

    /// Module was built against an incompatible ABI
    #[error(
        "incompatible module API version: expected {}, found {}",
        format_version(*.expected),
        format_version(*.found)
    )]
    IncompatibleVersion { expected: u32, found: u32 },

    /// A required entry point is missing
    #[error("missing module symbol: {0}")]
    MissingSymbol(String),

    /// Module metadata is malformed
    #[error("invalid module metadata: {0}")]
    InvalidData(String),

    /// I/O error while scanning for modules
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolved lifecycle entry points of a loaded binary.
#[cfg(feature = "plugins")]
#[derive(Clone, Copy)]
struct ModuleVTable {
    create: ffi::CreateInstanceFn,
    destroy: ffi::DestroyInstanceFn,
    init: ffi::LifecycleFn,
    post_init: Option<ffi::LifecycleFn>,
    enable: Option<ffi::LifecycleFn>,
    disable: Option<ffi::LifecycleFn>,
    end: ffi::LifecycleFn,
}

/// A loaded module binary and the module type it declares.
pub struct ModuleLibrary {
    path: PathBuf,
    type_name: String,
    version: String,
    description: String,
    author: String,
    api_version: u32,
    #[cfg(feature = "plugins")]
    vtable: ModuleVTable,
    /// Keeps the mapped binary alive; the vtable pointers dangle without it.
    #[cfg(feature = "plugins")]
    _library: Library,
}

impl std::fmt::Debug for ModuleLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLibrary")
            .field("path", &self.path)
            .field("type_name", &self.type_name)
            .field("version", &self.version)
            .field("description", &self.description)
            .field("author", &self.author)
            .field("api_version", &format_version(self.api_version))
            .finish()
    }
}

impl ModuleLibrary {
    /// Load a module binary and resolve its entry points.
    #[cfg(feature = "plugins")]
    pub fn load(path: &Path) -> ModuleLoadResult<Self> {
        if !path.exists() {
            return Err(ModuleLoadError::NotFound(path.to_path_buf()));
        }

        let library = unsafe { Library::new(path) }
            .map_err(|e| ModuleLoadError::LoadFailed(e.to_string()))?;

        let api_version_fn: ffi::ApiVersionFn = *unsafe {
            library.get::<ffi::ApiVersionFn>(MODULE_SYMBOL_API_VERSION.as_bytes())
        }
        .map_err(|_| ModuleLoadError::MissingSymbol(MODULE_SYMBOL_API_VERSION.to_string()))?;

        let api_version = unsafe { api_version_fn() };
        if !versions_compatible(MODULE_API_VERSION, api_version) {
            return Err(ModuleLoadError::IncompatibleVersion {
                expected: MODULE_API_VERSION,
                found: api_version,
            });
        }

        let info_fn: ffi::ModuleInfoFn = *unsafe {
            library.get::<ffi::ModuleInfoFn>(MODULE_SYMBOL_INFO.as_bytes())
        }
        .map_err(|_| ModuleLoadError::MissingSymbol(MODULE_SYMBOL_INFO.to_string()))?;

        let info_ptr = unsafe { info_fn() };
        if info_ptr.is_null() {
            return Err(ModuleLoadError::InvalidData(
                "module info returned null".to_string(),
            ));
        }
        let info = unsafe { &*info_ptr };

        let type_name = unsafe { c_str_to_string(info.type_name) }
            .ok_or_else(|| ModuleLoadError::InvalidData("invalid module type name".to_string()))?;
        let version =
            unsafe { c_str_to_string(info.version) }.unwrap_or_else(|| "0.0.0".to_string());
        let description = unsafe { c_str_to_string(info.description) }.unwrap_or_default();
        let author =
            unsafe { c_str_to_string(info.author) }.unwrap_or_else(|| "Unknown".to_string());

        let vtable = ModuleVTable {
            create: *unsafe { library.get::<ffi::CreateInstanceFn>(MODULE_SYMBOL_CREATE.as_bytes()) }
                .map_err(|_| ModuleLoadError::MissingSymbol(MODULE_SYMBOL_CREATE.to_string()))?,
            destroy: *unsafe {
                library.get::<ffi::DestroyInstanceFn>(MODULE_SYMBOL_DESTROY.as_bytes())
            }
            .map_err(|_| ModuleLoadError::MissingSymbol(MODULE_SYMBOL_DESTROY.to_string()))?,
            init: *unsafe { library.get::<ffi::LifecycleFn>(MODULE_SYMBOL_INIT.as_bytes()) }
                .map_err(|_| ModuleLoadError::MissingSymbol(MODULE_SYMBOL_INIT.to_string()))?,
            post_init: unsafe { library.get::<ffi::LifecycleFn>(MODULE_SYMBOL_POST_INIT.as_bytes()) }
                .ok()
                .map(|s| *s),
            enable: unsafe { library.get::<ffi::LifecycleFn>(MODULE_SYMBOL_ENABLE.as_bytes()) }
                .ok()
                .map(|s| *s),
            disable: unsafe { library.get::<ffi::LifecycleFn>(MODULE_SYMBOL_DISABLE.as_bytes()) }
                .ok()
                .map(|s| *s),
            end: *unsafe { library.get::<ffi::LifecycleFn>(MODULE_SYMBOL_END.as_bytes()) }
                .map_err(|_| ModuleLoadError::MissingSymbol(MODULE_SYMBOL_END.to_string()))?,
        };

        Ok(Self {
            path: path.to_path_buf(),
            type_name,
            version,
            description,
            author,
            api_version,
            vtable,
            _library: library,
        })
    }

    /// Load a module binary (stub version without libloading).
    ///
    /// Derives the type name from the file stem so the host and its tests
    /// can run on platforms where dlopen is unavailable.
    #[cfg(not(feature = "plugins"))]
    pub fn load(path: &Path) -> ModuleLoadResult<Self> {
        if !path.exists() {
            return Err(ModuleLoadError::NotFound(path.to_path_buf()));
        }

        let type_name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.strip_prefix("lib").unwrap_or(s))
            .map(|s| s.strip_suffix("_module").unwrap_or(s))
            .unwrap_or("unknown")
            .to_string();

        Ok(Self {
            path: path.to_path_buf(),
            type_name,
            version: "0.0.0".to_string(),
            description: format!("Module loaded from {}", path.display()),
            author: "Unknown".to_string(),
            api_version: MODULE_API_VERSION,
        })
    }

    /// Module type name declared by the binary.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Path the binary was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Module version string.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Module description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Module author.
    pub fn author(&self) -> &str {
        &self.author
    }

    /// Create a live instance through the binary's factory.
    #[cfg(feature = "plugins")]
    pub(crate) fn instantiate(&self, instance_name: &str) -> Result<Box<dyn Module>, ModuleError> {
        let c_name = std::ffi::CString::new(instance_name)
            .map_err(|_| ModuleError::Message("instance name contains a NUL byte".to_string()))?;
        let handle = unsafe { (self.vtable.create)(c_name.as_ptr()) };
        if handle.is_null() {
            return Err(ModuleError::Message(format!(
                "factory of module type '{}' returned null",
                self.type_name
            )));
        }
        Ok(Box::new(ForeignInstance {
            handle,
            vtable: self.vtable,
        }))
    }

    /// Create a stub instance (no libloading).
    #[cfg(not(feature = "plugins"))]
    pub(crate) fn instantiate(&self, _instance_name: &str) -> Result<Box<dyn Module>, ModuleError> {
        Ok(Box::new(StubInstance))
    }
}

/// Live instance created through a binary's factory; lifecycle calls are
/// forwarded through the resolved vtable.
#[cfg(feature = "plugins")]
struct ForeignInstance {
    handle: InstanceHandle,
    vtable: ModuleVTable,
}

#[cfg(feature = "plugins")]
impl ForeignInstance {
    fn call(&self, f: ffi::LifecycleFn) -> ModuleResult<()> {
        let status = unsafe { f(self.handle) };
        if status == 0 {
            Ok(())
        } else {
            Err(ModuleError::Status(status))
        }
    }
}

#[cfg(feature = "plugins")]
impl Module for ForeignInstance {
    fn init(&mut self) -> ModuleResult<()> {
        self.call(self.vtable.init)
    }

    fn post_init(&mut self) -> ModuleResult<()> {
        match self.vtable.post_init {
            Some(f) => self.call(f),
            None => Ok(()),
        }
    }

    fn enable(&mut self) -> ModuleResult<()> {
        match self.vtable.enable {
            Some(f) => self.call(f),
            None => Ok(()),
        }
    }

    fn disable(&mut self) -> ModuleResult<()> {
        match self.vtable.disable {
            Some(f) => self.call(f),
            None => Ok(()),
        }
    }

    fn end(&mut self) {
        let status = unsafe { (self.vtable.end)(self.handle) };
        if status != 0 {
            tracing::warn!("Module end returned status {}", status);
        }
    }
}

#[cfg(feature = "plugins")]
impl Drop for ForeignInstance {
    fn drop(&mut self) {
        unsafe { (self.vtable.destroy)(self.handle) };
    }
}

#[cfg(not(feature = "plugins"))]
struct StubInstance;

#[cfg(not(feature = "plugins"))]
impl Module for StubInstance {
    fn init(&mut self) -> Result<(), ModuleError> {
        Ok(())
    }

    fn end(&mut self) {}
}

/// Check if a path has a shared library extension.
pub(crate) fn is_shared_library(path: &Path) -> bool {
    matches!(
        path.extension().and_then(OsStr::to_str),
        Some("so") | Some("dll") | Some("dylib")
    )
}

/// Helper to convert a C string pointer to a Rust String.
///
/// # Safety
///
/// The pointer must be null or a valid null-terminated C string.
#[cfg(feature = "plugins")]
unsafe fn c_str_to_string(ptr: *const std::ffi::c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    std::ffi::CStr::from_ptr(ptr).to_str().ok().map(String::from)
}
