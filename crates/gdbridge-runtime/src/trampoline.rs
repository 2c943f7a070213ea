//! Virtual dispatch trampoline
//!
//! The engine calls a virtual method with an untyped argument array and a
//! back-buffer for the result. The trampoline:
//!
//! 1. resolves the implementation along the declared ancestor chain
//! 2. runs `Decode -> Invoke -> Encode -> ScopeTeardown` in order inside a
//!    fresh scope
//! 3. writes exactly the declared number of result words
//!
//! Panics are caught here and never unwind into the engine. Failures write
//! the zeroed default of the declared width and are reported through the
//! engine's error log.

use std::any::{type_name, Any};
use std::cell::Cell;
use std::ffi::c_void;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use gdbridge_sdk::{BridgeError, BridgeResult, Word};
use rustc_hash::FxHashMap;

use crate::class_registry::{ClassRegistry, InstanceCell};
use crate::convert::{IntoVirtualRet, VirtualArgs};
use crate::handle::HandleRegistry;

/// Step of a virtual call; reported when a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Raw argument slots are decoded into typed values
    Decode,
    /// The host implementation runs
    Invoke,
    /// The result is encoded into return words
    Encode,
    /// The call's scope releases its owned handles
    ScopeTeardown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Decode => "decode",
            Phase::Invoke => "invoke",
            Phase::Encode => "encode",
            Phase::ScopeTeardown => "scope teardown",
        };
        f.write_str(name)
    }
}

/// Parameter and return widths of a virtual method.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VirtualSignature {
    /// Width of each parameter in words
    pub args: Vec<usize>,
    /// Width of the return value in words
    pub ret: usize,
}

impl VirtualSignature {
    /// Build a signature.
    pub fn new(args: &[usize], ret: usize) -> Self {
        VirtualSignature {
            args: args.to_vec(),
            ret,
        }
    }
}

type VirtualFn = Box<
    dyn Fn(&mut InstanceCell, *const *const c_void, &HandleRegistry, &Cell<Phase>) -> BridgeResult<[Word; 3]>
        + Send
        + Sync,
>;

/// One virtual method of one class.
pub struct VirtualEntry {
    signature: VirtualSignature,
    imp: Option<VirtualFn>,
}

impl VirtualEntry {
    /// Declared signature.
    pub fn signature(&self) -> &VirtualSignature {
        &self.signature
    }

    /// True when a host implementation is registered; false for engine
    /// defaults.
    pub fn is_implemented(&self) -> bool {
        self.imp.is_some()
    }
}

impl fmt::Debug for VirtualEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualEntry")
            .field("signature", &self.signature)
            .field("implemented", &self.is_implemented())
            .finish()
    }
}

/// Virtual methods of one class, keyed by method name.
#[derive(Debug, Default)]
pub struct VirtualTable {
    entries: FxHashMap<String, VirtualEntry>,
}

impl VirtualTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the host implementation of `name` for instances holding `T`.
    pub fn register<T, A, R>(&mut self, name: &str, f: fn(&mut T, A) -> R)
    where
        T: 'static,
        A: VirtualArgs + 'static,
        R: IntoVirtualRet + 'static,
    {
        let imp = move |cell: &mut InstanceCell,
                        args: *const *const c_void,
                        registry: &HandleRegistry,
                        phase: &Cell<Phase>|
              -> BridgeResult<[Word; 3]> {
            phase.set(Phase::Decode);
            if !cell.holds::<T>() {
                return Err(BridgeError::InstanceMismatch {
                    expected: type_name::<T>().to_string(),
                    found: cell.class().to_string(),
                });
            }
            // SAFETY: `dispatch` forwards the engine's argument array, which
            // holds one pointer per declared parameter.
            let decoded = unsafe { A::decode(args, registry)? };
            let data = cell.data_mut::<T>().ok_or_else(|| BridgeError::InstanceMismatch {
                expected: type_name::<T>().to_string(),
                found: String::new(),
            })?;

            phase.set(Phase::Invoke);
            let out = f(data, decoded).host_result()?;

            phase.set(Phase::Encode);
            out.into_virtual_ret(registry)
        };
        self.entries.insert(
            name.to_string(),
            VirtualEntry {
                signature: VirtualSignature {
                    args: A::widths(),
                    ret: R::WIDTH,
                },
                imp: Some(Box::new(imp)),
            },
        );
    }

    /// Declare a method the engine implements itself.
    pub fn declare(&mut self, name: &str, signature: VirtualSignature) {
        self.entries
            .entry(name.to_string())
            .or_insert(VirtualEntry {
                signature,
                imp: None,
            });
    }

    /// Entry for `name`.
    pub fn get(&self, name: &str) -> Option<&VirtualEntry> {
        self.entries.get(name)
    }

    /// True when `name` is registered or declared.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of one trampoline dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// A host implementation ran and the result was written
    Handled,
    /// An ancestor declares an engine default; the zeroed default was written
    Defaulted,
    /// Nothing in the chain knows the method; the back-buffer is untouched
    Unimplemented,
    /// Decoding, the implementation or encoding failed; the zeroed default
    /// was written
    Failed(BridgeError),
}

/// Dispatch an engine-initiated call to the host implementation.
///
/// # Safety
/// `args` must point to one pointer per declared parameter of the resolved
/// method, each addressing a slot of that parameter's width. `ret` must
/// address a writable buffer of the declared return width.
pub unsafe fn dispatch(
    classes: &ClassRegistry,
    registry: &HandleRegistry,
    instance: &mut InstanceCell,
    method: &str,
    args: *const *const c_void,
    ret: *mut c_void,
) -> DispatchOutcome {
    let Some((owner, entry)) = classes.resolve_virtual(instance.class(), method) else {
        tracing::trace!(
            target: "gdbridge::trampoline",
            class = instance.class(),
            method,
            "No virtual in chain; engine default"
        );
        return DispatchOutcome::Unimplemented;
    };
    let width = entry.signature.ret;

    let Some(imp) = entry.imp.as_ref() else {
        zero_fill(ret, width);
        tracing::trace!(
            target: "gdbridge::trampoline",
            class = instance.class(),
            owner = owner.name(),
            method,
            "Declared engine default"
        );
        return DispatchOutcome::Defaulted;
    };

    if ret.is_null() && width > 0 {
        let err = BridgeError::ArgumentError(format!("Null back-buffer for {}", method));
        return fail(registry, instance.class(), method, Phase::Encode, err);
    }

    let phase = Cell::new(Phase::Decode);
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let scope = registry.enter_scope();
        let out = imp(instance, args, registry, &phase);
        phase.set(Phase::ScopeTeardown);
        scope.end();
        out
    }));

    match result {
        Ok(Ok(words)) => {
            write_ret(ret, &words[..width]);
            tracing::trace!(
                target: "gdbridge::trampoline",
                class = instance.class(),
                owner = owner.name(),
                method,
                "Handled virtual"
            );
            DispatchOutcome::Handled
        }
        Ok(Err(err)) => {
            zero_fill(ret, width);
            fail(registry, instance.class(), method, phase.get(), err)
        }
        Err(payload) => {
            zero_fill(ret, width);
            let err = BridgeError::Panic(panic_message(payload.as_ref()));
            fail(registry, instance.class(), method, phase.get(), err)
        }
    }
}

fn fail(
    registry: &HandleRegistry,
    class: &str,
    method: &str,
    phase: Phase,
    err: BridgeError,
) -> DispatchOutcome {
    tracing::error!(
        target: "gdbridge::trampoline",
        class,
        method,
        %phase,
        error = %err,
        "Virtual call failed"
    );
    let message = format!("{}::{} failed during {}: {}", class, method, phase, err);
    registry
        .engine()
        .print_error(&message, method, file!(), line!());
    DispatchOutcome::Failed(err)
}

/// Text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

unsafe fn zero_fill(ret: *mut c_void, width: usize) {
    if ret.is_null() {
        return;
    }
    let ret = ret as *mut Word;
    for i in 0..width {
        std::ptr::write_unaligned(ret.add(i), 0);
    }
}

unsafe fn write_ret(ret: *mut c_void, words: &[Word]) {
    let ret = ret as *mut Word;
    for (i, word) in words.iter().enumerate() {
        std::ptr::write_unaligned(ret.add(i), *word);
    }
}
