//! C entry points for the engine
//!
//! The engine drives the extension through these functions. The API follows
//! these principles:
//! - ABI-stable (C-compatible types only)
//! - No unwinding across the boundary: every entry point catches panics
//! - Errors via status codes and an optional out-parameter
//! - Opaque pointers for host instances
//!
//! The extension installs its [`Bridge`] with [`Bridge::install`] before the
//! engine reaches the first initialization level.

use std::ffi::{c_void, CStr, CString};
use std::os::raw::{c_char, c_int};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use gdbridge_runtime::{panic_message, Bridge, DispatchOutcome, InitLevel, InstanceCell};
use gdbridge_sdk::BridgeError;
use thiserror::Error;

/// Call succeeded
pub const GDBRIDGE_OK: c_int = 0;
/// Virtual resolved to a declared engine default; zeroed result written
pub const GDBRIDGE_DEFAULTED: c_int = 1;
/// No class in the chain knows the virtual; result untouched
pub const GDBRIDGE_UNIMPLEMENTED: c_int = 2;
/// Call failed; see the error out-parameter
pub const GDBRIDGE_ERROR: c_int = -1;

static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();

// ============================================================================
// Opaque Types
// ============================================================================

/// Opaque handle to a host instance
#[repr(C)]
pub struct GdBridgeInstance {
    _private: [u8; 0],
}

/// Error information
#[repr(C)]
pub struct GdBridgeError {
    message: *mut c_char,
}

/// Failures detected at the C boundary.
#[derive(Debug, Error)]
enum FfiError {
    #[error("Null pointer for {0}")]
    NullArgument(&'static str),

    #[error("{0} is not valid UTF-8")]
    InvalidUtf8(&'static str),

    #[error("Unknown initialization level {0}")]
    InvalidLevel(c_int),

    #[error("Panic at the C boundary: {0}")]
    Panic(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

// ============================================================================
// Helper Functions
// ============================================================================

unsafe fn set_error(error_out: *mut *mut GdBridgeError, error: &FfiError) {
    if error_out.is_null() {
        return;
    }
    let message = CString::new(error.to_string())
        .map(CString::into_raw)
        .unwrap_or(ptr::null_mut());
    *error_out = Box::into_raw(Box::new(GdBridgeError { message }));
}

unsafe fn read_str<'a>(value: *const c_char, what: &'static str) -> Result<&'a str, FfiError> {
    if value.is_null() {
        return Err(FfiError::NullArgument(what));
    }
    CStr::from_ptr(value)
        .to_str()
        .map_err(|_| FfiError::InvalidUtf8(what))
}

/// Run `f`, turning panics into errors so nothing unwinds into the engine.
fn guarded<T>(entry: &'static str, f: impl FnOnce() -> Result<T, FfiError>) -> Result<T, FfiError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(target: "gdbridge::ffi", entry, %message, "Panic caught at entry point");
            Err(FfiError::Panic(message))
        }
    }
}

unsafe fn status(result: Result<c_int, FfiError>, error_out: *mut *mut GdBridgeError) -> c_int {
    match result {
        Ok(code) => code,
        Err(err) => {
            tracing::debug!(target: "gdbridge::ffi", error = %err, "Entry point failed");
            set_error(error_out, &err);
            GDBRIDGE_ERROR
        }
    }
}

fn init_level(value: c_int) -> Result<InitLevel, FfiError> {
    InitLevel::from_i32(value).ok_or(FfiError::InvalidLevel(value))
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Notify the extension that the engine reached an initialization level
///
/// # Arguments
/// * `level` - 0 core, 1 servers, 2 scene, 3 editor
/// * `error` - Optional pointer to receive error information
///
/// # Returns
/// * `GDBRIDGE_OK` on success
/// * `GDBRIDGE_ERROR` when no bridge is installed or the level is unknown
///
/// # Safety
/// `error` must be null or point to writable storage for one pointer.
#[no_mangle]
pub unsafe extern "C" fn gdbridge_initialize(level: c_int, error: *mut *mut GdBridgeError) -> c_int {
    let result = guarded("gdbridge_initialize", || {
        let bridge = Bridge::get()?;
        bridge.initialize(init_level(level)?);
        Ok(GDBRIDGE_OK)
    });
    status(result, error)
}

/// Notify the extension that the engine is leaving an initialization level
///
/// # Safety
/// `error` must be null or point to writable storage for one pointer.
#[no_mangle]
pub unsafe extern "C" fn gdbridge_deinitialize(level: c_int, error: *mut *mut GdBridgeError) -> c_int {
    let result = guarded("gdbridge_deinitialize", || {
        let bridge = Bridge::get()?;
        bridge.deinitialize(init_level(level)?);
        Ok(GDBRIDGE_OK)
    });
    status(result, error)
}

// ============================================================================
// Instances
// ============================================================================

/// Create an instance of an extension class
///
/// # Returns
/// * The new engine object on success; its host instance is attached through
///   the engine's `set_instance`
/// * NULL on failure (check error parameter)
///
/// # Safety
/// - `class` must be a null-terminated string
/// - `error` must be null or point to writable storage for one pointer
#[no_mangle]
pub unsafe extern "C" fn gdbridge_create_instance(
    class: *const c_char,
    error: *mut *mut GdBridgeError,
) -> *mut c_void {
    let result = guarded("gdbridge_create_instance", || {
        let class = read_str(class, "class")?;
        let object = Bridge::get()?.create_instance(class)?;
        Ok(object.as_ptr())
    });
    match result {
        Ok(object) => object,
        Err(err) => {
            set_error(error, &err);
            ptr::null_mut()
        }
    }
}

/// Free a host instance
///
/// # Safety
/// - `instance` must come from the engine's `set_instance` callback and must
///   not be used after this call
/// - NULL is ignored
#[no_mangle]
pub unsafe extern "C" fn gdbridge_free_instance(instance: *mut GdBridgeInstance) {
    let _ = guarded("gdbridge_free_instance", || {
        if instance.is_null() {
            return Ok(());
        }
        Bridge::get()?.free_instance(instance as *mut InstanceCell);
        Ok(())
    });
}

// ============================================================================
// Virtual Dispatch
// ============================================================================

/// Check whether a class or one of its ancestors knows a virtual method
///
/// # Returns
/// * 1 when the method is registered or declared along the chain
/// * 0 otherwise, including on invalid arguments
///
/// # Safety
/// `class` and `method` must be null-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn gdbridge_has_virtual(class: *const c_char, method: *const c_char) -> c_int {
    let result = guarded("gdbridge_has_virtual", || {
        let class = read_str(class, "class")?;
        let method = read_str(method, "method")?;
        Ok(Bridge::get()?.has_virtual(class, method) as c_int)
    });
    result.unwrap_or(0)
}

/// Call a virtual method on a host instance
///
/// # Arguments
/// * `instance` - Host instance
/// * `method` - Method name
/// * `args` - One pointer per declared parameter
/// * `ret` - Back-buffer of the declared return width
/// * `error` - Optional pointer to receive error information
///
/// # Returns
/// * `GDBRIDGE_OK` when the host implementation ran
/// * `GDBRIDGE_DEFAULTED` when an engine default applies
/// * `GDBRIDGE_UNIMPLEMENTED` when nothing in the chain knows the method
/// * `GDBRIDGE_ERROR` on failure; the zeroed default was written to `ret`
///
/// # Safety
/// - `instance` must come from the engine's `set_instance` callback
/// - `args` and `ret` must match the method's declared signature
/// - `error` must be null or point to writable storage for one pointer
#[no_mangle]
pub unsafe extern "C" fn gdbridge_call_virtual(
    instance: *mut GdBridgeInstance,
    method: *const c_char,
    args: *const *const c_void,
    ret: *mut c_void,
    error: *mut *mut GdBridgeError,
) -> c_int {
    let result = guarded("gdbridge_call_virtual", || {
        if instance.is_null() {
            return Err(FfiError::NullArgument("instance"));
        }
        let method = read_str(method, "method")?;
        let bridge = Bridge::get()?;
        match bridge.call_virtual(instance as *mut InstanceCell, method, args, ret) {
            DispatchOutcome::Handled => Ok(GDBRIDGE_OK),
            DispatchOutcome::Defaulted => Ok(GDBRIDGE_DEFAULTED),
            DispatchOutcome::Unimplemented => Ok(GDBRIDGE_UNIMPLEMENTED),
            DispatchOutcome::Failed(err) => Err(err.into()),
        }
    });
    status(result, error)
}

// ============================================================================
// Utilities
// ============================================================================

/// Get the bridge version string
///
/// The returned string is static; do not free it.
#[no_mangle]
pub extern "C" fn gdbridge_version() -> *const c_char {
    VERSION.as_ptr() as *const c_char
}

/// Get the error message
///
/// # Safety
/// - `error` must be null or come from a gdbridge entry point
/// - The returned string is valid until `gdbridge_error_free()` is called
#[no_mangle]
pub unsafe extern "C" fn gdbridge_error_message(error: *const GdBridgeError) -> *const c_char {
    if error.is_null() {
        return ptr::null();
    }
    (*error).message
}

/// Free an error
///
/// # Safety
/// - `error` must be null or come from a gdbridge entry point
/// - The error must not be used after this call
#[no_mangle]
pub unsafe extern "C" fn gdbridge_error_free(error: *mut GdBridgeError) {
    if error.is_null() {
        return;
    }
    if !(*error).message.is_null() {
        drop(CString::from_raw((*error).message));
    }
    drop(Box::from_raw(error));
}
