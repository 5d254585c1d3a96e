//! # sdrdeck Host Runtime
//!
//! This crate is the runtime host of the sdrdeck SDR studio. It owns the
//! pieces every module and view of the application depends on, without
//! knowing anything about signal processing or widget layout:
//!
//! - **Configuration store**: a lock-guarded JSON document with explicit
//!   acquire/release transaction brackets, default-value self-healing and
//!   autosave ([`config::ConfigStore`])
//! - **Message bus**: named channels that let module instances invoke and
//!   broadcast to each other without compile-time references ([`bus::MessageBus`])
//! - **Module host**: dynamic loading of module binaries, a factory registry
//!   keyed by module type name, and a strict per-instance lifecycle state
//!   machine ([`module::ModuleHost`])
//! - **Frame context**: the bind/unbind discipline around the shared render
//!   context, so the context is current only while a frame is being composed
//!   ([`frame::FrameContext`])
//! - **Runtime orchestrator**: wires all of the above into the process
//!   lifecycle, from config load to ordered shutdown ([`runtime::Runtime`])
//!
//! The rendering backend itself (surface creation, draw submission) and the
//! windowing glue are external: they implement the [`backend::RenderBackend`]
//! and [`frame::RenderSurface`] traits and drive [`runtime::Runtime::frame`]
//! from their own event loop.
//!
//! ## Example
//!
//! ```rust,ignore
//! use sdrdeck_core::{CommandArgs, Runtime, RuntimeOptions};
//!
//! let args = CommandArgs::parse(std::env::args().skip(1));
//! let opts = RuntimeOptions::new(args.root, 1280, 720);
//! let mut runtime = Runtime::new(opts, surface, backend);
//! runtime.startup()?;
//! loop {
//!     runtime.frame()?; // driven by the window system's frame callback
//! }
//! ```

pub mod args;
pub mod backend;
pub mod bus;
pub mod config;
pub mod frame;
pub mod module;
pub mod runtime;

pub use args::CommandArgs;
pub use backend::RenderBackend;
pub use bus::{BusError, BusResult, MessageBus};
pub use config::{ConfigError, ConfigGuard, ConfigResult, ConfigStore, FieldAccess};
pub use frame::{FrameContext, FrameGuard, GraphicsContextError, RenderSurface, ResizeRequest};
pub use module::{
    InstanceState, Module, ModuleContext, ModuleError, ModuleHost, ModuleHostError,
    ModuleLibrary, ModuleLoadError, ModuleResult,
};
pub use runtime::{Runtime, RuntimeError, RuntimeOptions};

/// Human-readable runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Packed runtime version for embedders: `(major << 24) | (minor << 16) | patch`.
pub const RUNTIME_VERSION: u32 = 0x00_01_0000;
