//! Error types for the bridge ABI

use std::fmt;

use crate::engine::InstanceId;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Boundary failures surfaced to host code as values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    /// Instance id no longer names a live engine object
    #[error("Stale instance: object #{id} has been destroyed")]
    StaleInstance {
        /// The rejected instance id
        id: InstanceId,
    },

    /// Handle was already released or invalidated
    #[error("Handle has already been released")]
    Released,

    /// Release requested on a handle the host does not own
    #[error("Handle is not owned by the host and cannot be released")]
    NotOwned,

    /// Completed native call reported an engine error code
    #[error("Native call failed: {0}")]
    NativeCall(#[from] EngineError),

    /// Variadic call rejected by the engine
    #[error("Call failed: {0}")]
    Call(CallError),

    /// No class in the ancestor chain implements the virtual method
    #[error("Missing virtual implementation: {class}::{method}")]
    MissingVirtualImplementation {
        /// Class the call was dispatched on
        class: String,
        /// Virtual method name
        method: String,
    },

    /// Engine has no method bind for the requested signature
    #[error("Unresolved method bind: {class}::{method} (hash {hash})")]
    UnresolvedMethod {
        /// Engine class name
        class: String,
        /// Method name
        method: String,
        /// Signature hash
        hash: i64,
    },

    /// Class name is not registered
    #[error("Unknown class: {0}")]
    UnknownClass(String),

    /// Class name registered twice
    #[error("Duplicate class: {0}")]
    DuplicateClass(String),

    /// Operation on a scope that has already ended
    #[error("Scope has already ended")]
    ScopeClosed,

    /// Host instance data does not have the expected type
    #[error("Instance mismatch: expected {expected}, got {found}")]
    InstanceMismatch {
        /// Expected class or type name
        expected: String,
        /// Actual class name
        found: String,
    },

    /// Host code panicked inside a boundary call
    #[error("Host code panicked: {0}")]
    Panic(String),

    /// No bridge has been installed for this process
    #[error("Bridge is not installed")]
    NotInstalled,

    /// A bridge is already installed for this process
    #[error("Bridge is already installed")]
    AlreadyInstalled,

    /// Engine has not reached the minimum initialization level
    #[error("Bridge is not initialized")]
    NotInitialized,

    /// Invalid argument at the boundary
    #[error("Argument error: {0}")]
    ArgumentError(String),
}

impl From<CallError> for BridgeError {
    fn from(error: CallError) -> Self {
        BridgeError::Call(error)
    }
}

// ============================================================================
// Engine Error Codes
// ============================================================================

macro_rules! engine_errors {
    ($($variant:ident = $code:literal => $message:literal,)*) => {
        /// Numeric error codes returned by engine methods.
        ///
        /// Code `0` means success and has no variant; codes outside the known
        /// table are kept as [`EngineError::Unknown`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum EngineError {
            $(
                #[doc = $message]
                $variant,
            )*
            /// Code not in the known table
            Unknown(i64),
        }

        impl EngineError {
            /// Decode an engine code. Returns `None` for `0`.
            pub fn from_code(code: i64) -> Option<Self> {
                match code {
                    0 => None,
                    $($code => Some(EngineError::$variant),)*
                    other => Some(EngineError::Unknown(other)),
                }
            }

            /// The numeric engine code.
            pub fn code(self) -> i64 {
                match self {
                    $(EngineError::$variant => $code,)*
                    EngineError::Unknown(code) => code,
                }
            }

            /// Human readable description.
            pub fn message(self) -> &'static str {
                match self {
                    $(EngineError::$variant => $message,)*
                    EngineError::Unknown(_) => "Unknown error",
                }
            }
        }
    };
}

engine_errors! {
    Failed = 1 => "Generic error",
    Unavailable = 2 => "Unavailable",
    Unconfigured = 3 => "Unconfigured",
    Unauthorized = 4 => "Unauthorized",
    ParameterRange = 5 => "Parameter out of range",
    OutOfMemory = 6 => "Out of memory",
    FileNotFound = 7 => "File not found",
    FileBadDrive = 8 => "Bad drive",
    FileBadPath = 9 => "Bad path",
    FileNoPermission = 10 => "No permission",
    FileAlreadyInUse = 11 => "File already in use",
    FileCantOpen = 12 => "Can't open file",
    FileCantWrite = 13 => "Can't write file",
    FileCantRead = 14 => "Can't read file",
    FileUnrecognized = 15 => "File unrecognized",
    FileCorrupt = 16 => "File corrupt",
    FileMissingDependencies = 17 => "Missing dependencies",
    FileEof = 18 => "End of file",
    CantOpen = 19 => "Can't open",
    CantCreate = 20 => "Can't create",
    QueryFailed = 21 => "Query failed",
    AlreadyInUse = 22 => "Already in use",
    Locked = 23 => "Locked",
    Timeout = 24 => "Timeout",
    CantConnect = 25 => "Can't connect",
    CantResolve = 26 => "Can't resolve",
    ConnectionError = 27 => "Connection error",
    CantAcquireResource = 28 => "Can't acquire resource",
    CantFork = 29 => "Can't fork process",
    InvalidData = 30 => "Invalid data",
    InvalidParameter = 31 => "Invalid parameter",
    AlreadyExists = 32 => "Already exists",
    DoesNotExist = 33 => "Does not exist",
    DatabaseCantRead = 34 => "Database read error",
    DatabaseCantWrite = 35 => "Database write error",
    CompilationFailed = 36 => "Compilation failed",
    MethodNotFound = 37 => "Method not found",
    LinkFailed = 38 => "Linking failed",
    ScriptFailed = 39 => "Script failed",
    CyclicLink = 40 => "Cyclic link",
    InvalidDeclaration = 41 => "Invalid declaration",
    DuplicateSymbol = 42 => "Duplicate symbol",
    ParseError = 43 => "Parse error",
    Busy = 44 => "Busy",
    Skip = 45 => "Skip",
    Help = 46 => "Help",
    Bug = 47 => "Bug",
    PrinterOnFire = 48 => "Printer on fire",
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message(), self.code())
    }
}

impl std::error::Error for EngineError {}

/// Raw engine error code as returned in a method's return slot.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ErrorCode(pub i64);

impl ErrorCode {
    /// Success.
    pub const OK: ErrorCode = ErrorCode(0);

    /// True for code `0`.
    pub fn is_ok(self) -> bool {
        self.0 == 0
    }

    /// Convert into a result, decoding non-zero codes.
    pub fn into_result(self) -> Result<(), EngineError> {
        match EngineError::from_code(self.0) {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}

// ============================================================================
// Variadic Call Errors
// ============================================================================

/// Reason a variadic call was rejected.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallErrorKind {
    /// Method does not exist
    InvalidMethod = 1,
    /// Argument `argument` has the wrong type, `expected` holds the type tag
    InvalidArgument = 2,
    /// More arguments than the method accepts, `expected` holds the maximum
    TooManyArguments = 3,
    /// Fewer arguments than required, `expected` holds the minimum
    TooFewArguments = 4,
    /// Receiver is null
    InstanceIsNull = 5,
    /// Non-const method called on a const receiver
    MethodNotConst = 6,
}

impl CallErrorKind {
    /// Decode a raw error field. `0` and unknown values return `None`.
    pub fn from_raw(raw: i32) -> Option<Self> {
        Some(match raw {
            1 => CallErrorKind::InvalidMethod,
            2 => CallErrorKind::InvalidArgument,
            3 => CallErrorKind::TooManyArguments,
            4 => CallErrorKind::TooFewArguments,
            5 => CallErrorKind::InstanceIsNull,
            6 => CallErrorKind::MethodNotConst,
            _ => return None,
        })
    }
}

/// Out-parameter of variadic calls, laid out as the engine writes it.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CallError {
    /// Raw error kind, `0` on success
    pub error: i32,
    /// Offending argument index
    pub argument: i32,
    /// Expected type tag or argument count
    pub expected: i32,
}

impl CallError {
    /// True when the engine reported success.
    pub fn is_ok(&self) -> bool {
        self.error == 0
    }

    /// Decoded error kind.
    pub fn kind(&self) -> Option<CallErrorKind> {
        CallErrorKind::from_raw(self.error)
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            None if self.is_ok() => write!(f, "ok"),
            None => write!(f, "unknown call error {}", self.error),
            Some(CallErrorKind::InvalidMethod) => write!(f, "invalid method"),
            Some(CallErrorKind::InvalidArgument) => write!(
                f,
                "invalid argument {}: expected type {}",
                self.argument, self.expected
            ),
            Some(CallErrorKind::TooManyArguments) => {
                write!(f, "too many arguments: expected at most {}", self.expected)
            }
            Some(CallErrorKind::TooFewArguments) => {
                write!(f, "too few arguments: expected at least {}", self.expected)
            }
            Some(CallErrorKind::InstanceIsNull) => write!(f, "instance is null"),
            Some(CallErrorKind::MethodNotConst) => write!(f, "method is not const"),
        }
    }
}
