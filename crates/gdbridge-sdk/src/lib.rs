//! gdbridge SDK - ABI vocabulary for the engine extension boundary
//!
//! This crate defines the types every layer of the bridge agrees on without
//! pulling in the runtime:
//!
//! - [`Word`] and the [`Wire`] trait: how each static type occupies a fixed
//!   number of machine words in a call frame
//! - raw handles ([`RawObject`], [`RawString`], ...) that the host passes
//!   through without interpreting
//! - [`Variant`]: the tagged 3-word dynamic value
//! - [`EngineInterface`]: the function table the engine provides
//! - [`BridgeError`] and the engine's numeric error table
//!
//! # Example
//!
//! ```ignore
//! use gdbridge_sdk::{Wire, Word};
//!
//! let slot = 42i32.to_slot();
//! assert_eq!(slot, [42 as Word]);
//! assert_eq!(i32::from_slot(slot), 42);
//! ```

#![warn(missing_docs)]

pub mod engine;
pub mod error;
pub mod variant;
pub mod wire;

pub use engine::{EngineInterface, InstanceId, MethodBind};
pub use error::{BridgeError, BridgeResult, CallError, CallErrorKind, EngineError, ErrorCode};
pub use variant::{Variant, VariantType};
pub use wire::{
    Kind, RawArray, RawCallable, RawDictionary, RawHandle, RawObject, RawPackedArray, RawString,
    RawStringName, RawVariant, SlotWords, Vector2, Vector2i, Wire, Word,
};
