//! gdbridge runtime - marshaling and ownership for engine extensions
//!
//! This crate sits between host code and the engine's C-level interface:
//! - **Frames**: fixed-width argument/return buffers (`frame` module)
//! - **Handles**: ownership-tracked engine values and lifetime scopes
//!   (`handle`, `scope` modules)
//! - **Invoker**: calls into engine methods through pre-resolved binds
//!   (`invoker` module)
//! - **Trampoline**: engine-initiated virtual calls into host code
//!   (`trampoline`, `convert`, `class_registry` modules)
//! - **Bridge**: the process-wide state tying these together (`bridge` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use gdbridge_runtime::{Bridge, BridgeConfig, ClassRegistry, InitLevel};
//!
//! let mut classes = ClassRegistry::builder();
//! classes.engine_class("Node", None)?;
//! classes.register("Player", "Node", player_factory)?
//!     .virtual_fn("_process", Player::process);
//!
//! let bridge = Bridge::install(Bridge::new(engine, classes, BridgeConfig::from_env()?)?)?;
//! bridge.initialize(InitLevel::Scene);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(clippy::not_unsafe_ptr_arg_deref)]

// ============================================================================
// Core Modules
// ============================================================================

pub mod config;
pub mod frame;
pub mod handle;
pub mod logging;
pub mod scope;

// ============================================================================
// Calls
// ============================================================================

pub mod class_registry;
pub mod convert;
pub mod invoker;
pub mod trampoline;

pub mod bridge;

// ============================================================================
// Re-exports
// ============================================================================

pub use bridge::Bridge;
pub use class_registry::{
    ClassEntry, ClassOrigin, ClassRegistry, ClassRegistryBuilder, Factory, InstanceCell,
};
pub use config::{BridgeConfig, ConfigError, InitLevel};
pub use convert::{FromVirtualArg, IntoVirtualRet, Transferred, VirtualArgs};
pub use frame::{ArgList, CallFrame};
pub use handle::{
    ArrayKind, CallableKind, DictionaryKind, Handle, HandleId, HandleKind, HandleRegistry,
    ObjectKind, Ownership, PackedArrayKind, ScopeId, StringKind, StringNameKind, VariantKind,
};
pub use invoker::{EncodedArg, EncodedResult, Invoker, MethodSlot, MethodSpec, MethodTable};
pub use scope::Scope;
pub use trampoline::{
    panic_message, DispatchOutcome, Phase, VirtualEntry, VirtualSignature, VirtualTable,
};

pub use gdbridge_sdk as sdk;
