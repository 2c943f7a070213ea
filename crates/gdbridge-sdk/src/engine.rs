//! Engine interface - the function table the engine hands to the extension
//!
//! The runtime never talks to the engine except through this trait. A real
//! engine implements it over the extension ABI's function pointers; tests
//! implement it in-process.

use std::ffi::c_void;
use std::fmt;

use crate::error::CallError;
use crate::wire::{Kind, RawObject, RawString, Word};

/// Engine-side identifier of a live object.
///
/// Ids are never reused while the engine runs, so a destroyed object's id
/// stays invalid forever. `0` is never a valid id.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct InstanceId(pub u64);

impl InstanceId {
    /// The invalid id.
    pub const NONE: InstanceId = InstanceId(0);

    /// True for any id other than `0`.
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque method-bind pointer resolved from (class, method, hash).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodBind(pub usize);

/// Services provided by the engine.
///
/// Implementations must be callable from the engine's calling thread; the
/// bridge itself never calls into the engine from another thread.
pub trait EngineInterface: Send + Sync {
    // ========================================================================
    // Method Binds
    // ========================================================================

    /// Look up a method bind. `hash` identifies the exact signature.
    fn method_bind(&self, class: &str, method: &str, hash: i64) -> Option<MethodBind>;

    /// Pointer call: fixed-width typed arguments, typed return slot.
    ///
    /// # Safety
    /// `args` must point to one slot pointer per declared parameter, each
    /// addressing a slot of the parameter's width, and `ret` must address a
    /// writable slot of the declared return width (or be ignored for void).
    unsafe fn ptrcall(
        &self,
        bind: MethodBind,
        receiver: RawObject,
        args: *const *const c_void,
        ret: *mut c_void,
    );

    /// Variadic call: every argument and the return value are variants.
    ///
    /// # Safety
    /// `args` must point to `arg_count` pointers to 3-word variants and `ret`
    /// must address a writable 3-word variant slot.
    unsafe fn varcall(
        &self,
        bind: MethodBind,
        receiver: RawObject,
        args: *const *const c_void,
        arg_count: usize,
        ret: *mut c_void,
        error: &mut CallError,
    );

    // ========================================================================
    // Value Lifetime
    // ========================================================================

    /// Release an engine value of the given kind. Called exactly once per
    /// host-owned value.
    fn release(&self, kind: Kind, words: &[Word]);

    // ========================================================================
    // Objects
    // ========================================================================

    /// Instance id of an object, [`InstanceId::NONE`] for null.
    fn instance_id(&self, object: RawObject) -> InstanceId;

    /// Object for a live instance id, `None` once destroyed.
    fn object_from_instance_id(&self, id: InstanceId) -> Option<RawObject>;

    /// Construct an engine object of a built-in class.
    fn construct_object(&self, class: &str) -> Option<RawObject>;

    /// Attach host instance data to an engine object.
    fn set_instance(&self, object: RawObject, class: &str, instance: *mut c_void);

    // ========================================================================
    // Strings
    // ========================================================================

    /// Create an engine string. The caller owns the result.
    fn string_new(&self, text: &str) -> RawString;

    /// Copy an engine string's contents out.
    fn string_read(&self, string: RawString) -> String;

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Report an error through the engine's error log.
    fn print_error(&self, message: &str, function: &str, file: &str, line: u32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_id_validity() {
        assert!(!InstanceId::NONE.is_valid());
        assert!(InstanceId(7).is_valid());
        assert_eq!(InstanceId(7).to_string(), "7");
    }
}
