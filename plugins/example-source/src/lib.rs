//! # sdrdeck Example Module
//!
//! A minimal module binary demonstrating the sdrdeck module ABI. It
//! declares the `file_source` module type and implements the full lifecycle
//! without touching any hardware, so it doubles as a test vehicle for the
//! host's loader.
//!
//! ## Building
//!
//! ```bash
//! cargo build --release -p sdrdeck-example-module
//! ```
//!
//! This produces `target/release/libsdrdeck_example_module.so` (Linux)
//! or `.dll` (Windows) or `.dylib` (macOS). Drop it into the host's
//! modules directory and declare an instance:
//!
//! ```json
//! { "moduleInstances": { "File Source": { "module": "file_source", "enabled": true } } }
//! ```

use std::ffi::{c_char, c_void, CStr};

use sdrdeck_core::module::{ModuleInfo, MODULE_API_VERSION};

// ============================================================================
// Module Metadata
// ============================================================================

/// Module type name as C string
static TYPE_NAME: &[u8] = b"file_source\0";
/// Module version
static MODULE_VERSION: &[u8] = b"1.0.0\0";
/// Module description
static DESCRIPTION: &[u8] = b"Plays back I/Q recordings as a signal source\0";
/// Module author
static AUTHOR: &[u8] = b"sdrdeck project\0";

/// Static module info
static MODULE_INFO: ModuleInfo = ModuleInfo {
    type_name: TYPE_NAME.as_ptr() as *const c_char,
    version: MODULE_VERSION.as_ptr() as *const c_char,
    description: DESCRIPTION.as_ptr() as *const c_char,
    author: AUTHOR.as_ptr() as *const c_char,
};

// ============================================================================
// Instance State
// ============================================================================

/// Lifecycle phases mirrored by the host's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Initialized,
    Enabled,
    Disabled,
    Ended,
}

/// One named instance of the file source.
pub struct FileSourceInstance {
    name: String,
    phase: Phase,
    /// How many times enable ran; a re-enable after disable must look
    /// exactly like the first enable to the outside.
    enable_count: u32,
}

impl FileSourceInstance {
    fn new(name: String) -> Self {
        Self {
            name,
            phase: Phase::Created,
            enable_count: 0,
        }
    }

    fn init(&mut self) -> i32 {
        if self.phase != Phase::Created {
            return -1;
        }
        self.phase = Phase::Initialized;
        0
    }

    fn enable(&mut self) -> i32 {
        match self.phase {
            Phase::Initialized | Phase::Disabled => {
                self.phase = Phase::Enabled;
                self.enable_count += 1;
                0
            }
            Phase::Enabled => 0,
            _ => -1,
        }
    }

    fn disable(&mut self) -> i32 {
        match self.phase {
            Phase::Enabled => {
                self.phase = Phase::Disabled;
                0
            }
            Phase::Initialized | Phase::Disabled => 0,
            _ => -1,
        }
    }

    fn end(&mut self) -> i32 {
        self.phase = Phase::Ended;
        0
    }

    /// Instance name given by the host.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// How many times this instance has been enabled.
    pub fn enable_count(&self) -> u32 {
        self.enable_count
    }
}

// ============================================================================
// Module ABI Functions
// ============================================================================

/// Return the module API version for compatibility checking.
#[no_mangle]
pub extern "C" fn sdrdeck_module_api_version() -> u32 {
    MODULE_API_VERSION
}

/// Return module metadata.
#[no_mangle]
pub extern "C" fn sdrdeck_module_info() -> *const ModuleInfo {
    &MODULE_INFO
}

/// Create a named instance. Returns an opaque handle, or null on failure.
///
/// # Safety
///
/// `name` must be null or a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn sdrdeck_create_instance(name: *const c_char) -> *mut c_void {
    if name.is_null() {
        return std::ptr::null_mut();
    }
    let Ok(name) = CStr::from_ptr(name).to_str() else {
        return std::ptr::null_mut();
    };
    let instance = Box::new(FileSourceInstance::new(name.to_string()));
    Box::into_raw(instance) as *mut c_void
}

/// Destroy an instance created by `sdrdeck_create_instance`.
///
/// # Safety
///
/// `handle` must be null or a handle returned by `sdrdeck_create_instance`
/// that has not been destroyed yet.
#[no_mangle]
pub unsafe extern "C" fn sdrdeck_destroy_instance(handle: *mut c_void) {
    if !handle.is_null() {
        drop(Box::from_raw(handle as *mut FileSourceInstance));
    }
}

unsafe fn with_instance(handle: *mut c_void, f: impl FnOnce(&mut FileSourceInstance) -> i32) -> i32 {
    if handle.is_null() {
        return -1;
    }
    f(&mut *(handle as *mut FileSourceInstance))
}

/// One-time initialization.
///
/// # Safety
///
/// `handle` must be a live handle from `sdrdeck_create_instance`.
#[no_mangle]
pub unsafe extern "C" fn sdrdeck_instance_init(handle: *mut c_void) -> i32 {
    with_instance(handle, FileSourceInstance::init)
}

/// Acquire instance resources.
///
/// # Safety
///
/// `handle` must be a live handle from `sdrdeck_create_instance`.
#[no_mangle]
pub unsafe extern "C" fn sdrdeck_instance_enable(handle: *mut c_void) -> i32 {
    with_instance(handle, FileSourceInstance::enable)
}

/// Release what enable acquired.
///
/// # Safety
///
/// `handle` must be a live handle from `sdrdeck_create_instance`.
#[no_mangle]
pub unsafe extern "C" fn sdrdeck_instance_disable(handle: *mut c_void) -> i32 {
    with_instance(handle, FileSourceInstance::disable)
}

/// Final teardown before destruction.
///
/// # Safety
///
/// `handle` must be a live handle from `sdrdeck_create_instance`.
#[no_mangle]
pub unsafe extern "C" fn sdrdeck_instance_end(handle: *mut c_void) -> i32 {
    with_instance(handle, FileSourceInstance::end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abi_version_matches_host() {
        assert_eq!(sdrdeck_module_api_version(), MODULE_API_VERSION);
    }

    #[test]
    fn test_info_strings_are_null_terminated() {
        let info = sdrdeck_module_info();
        let type_name = unsafe { CStr::from_ptr((*info).type_name) };
        assert_eq!(type_name.to_str().unwrap(), "file_source");
    }

    #[test]
    fn test_instance_lifecycle_round_trip() {
        let name = std::ffi::CString::new("File Source").unwrap();
        let handle = unsafe { sdrdeck_create_instance(name.as_ptr()) };
        assert!(!handle.is_null());

        unsafe {
            assert_eq!(sdrdeck_instance_init(handle), 0);
            assert_eq!(sdrdeck_instance_enable(handle), 0);
            assert_eq!(sdrdeck_instance_disable(handle), 0);
            assert_eq!(sdrdeck_instance_enable(handle), 0);

            let instance = &*(handle as *const FileSourceInstance);
            assert_eq!(instance.name(), "File Source");
            assert_eq!(instance.enable_count(), 2);

            assert_eq!(sdrdeck_instance_end(handle), 0);
            sdrdeck_destroy_instance(handle);
        }
    }

    #[test]
    fn test_enable_before_init_fails() {
        let name = std::ffi::CString::new("X").unwrap();
        let handle = unsafe { sdrdeck_create_instance(name.as_ptr()) };
        unsafe {
            assert_ne!(sdrdeck_instance_enable(handle), 0);
            sdrdeck_destroy_instance(handle);
        }
    }

    #[test]
    fn test_null_handles_are_rejected() {
        unsafe {
            assert_eq!(sdrdeck_instance_init(std::ptr::null_mut()), -1);
            assert!(sdrdeck_create_instance(std::ptr::null()).is_null());
            sdrdeck_destroy_instance(std::ptr::null_mut());
        }
    }
}
