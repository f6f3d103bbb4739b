//! Error types for Arche.
//!
//! Every fallible operation in the workspace returns [`Result`], whose error
//! is one [`ArcheError`] kind. Construction-time and submission-time checks
//! are reported synchronously; only faults discovered while the device is
//! executing surface later, as [`ArcheError::DeviceLost`] from `synchronize`.

use thiserror::Error;

use crate::dtype::DType;

/// Result type alias for Arche operations.
pub type Result<T> = std::result::Result<T, ArcheError>;

/// Errors raised by the Arche execution model.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ArcheError {
    /// No adapter matches the requested device kind.
    #[error("No device found: {0}")]
    NoDeviceFound(String),

    /// The backend refused to create a resource.
    #[error("Resource creation failed: {0}")]
    ResourceCreationFailed(String),

    /// Kernel source failed to compile.
    #[error("Compilation failed for '{lib_name}':\n{diagnostics}")]
    CompilationError {
        /// Library name the source was registered under.
        lib_name: String,
        /// Compiler diagnostics.
        diagnostics: String,
    },

    /// The requested entry point is not a compute entry of the module.
    #[error("Entry point '{entry}' not found (available: {available:?})")]
    EntryNotFound {
        /// Requested entry name.
        entry: String,
        /// Compute entry points that do exist.
        available: Vec<String>,
    },

    /// Number of bound arguments differs from the kernel signature.
    #[error("Argument count mismatch: kernel '{entry}' expects {expected}, got {actual}")]
    ArgumentCountMismatch {
        /// Kernel entry name.
        entry: String,
        /// Declared argument count.
        expected: usize,
        /// Supplied argument count.
        actual: usize,
    },

    /// Grid or group dimensions are unusable.
    #[error("Invalid dispatch size: {0}")]
    InvalidDispatchSize(String),

    /// Byte lengths do not fit.
    #[error("Size mismatch: {context} (required {required} bytes, available {available} bytes)")]
    SizeMismatch {
        /// What was being sized.
        context: String,
        /// Bytes required.
        required: u64,
        /// Bytes available.
        available: u64,
    },

    /// A command touches a resource owned by another device.
    #[error("Cross-device reference: {resource} belongs to device {owner}, used on device {target}")]
    CrossDeviceReference {
        /// Resource description.
        resource: String,
        /// Owning device id.
        owner: u64,
        /// Device the command was used on.
        target: u64,
    },

    /// Operation is not valid in the current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The device suffered an unrecoverable fault.
    #[error("Device lost: {0}")]
    DeviceLost(String),

    /// Host array element type does not match the requested type.
    #[error("DType mismatch: expected {expected}, found {found}")]
    DTypeMismatch {
        /// Requested element type.
        expected: DType,
        /// Actual element type.
        found: DType,
    },

    /// An argument value is unusable for this operation.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration is incomplete or malformed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A backend is not compiled in or cannot start.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),
}

impl ArcheError {
    /// Create a resource creation error.
    pub fn resource(msg: impl Into<String>) -> Self {
        Self::ResourceCreationFailed(msg.into())
    }

    /// Create a compilation error.
    pub fn compilation(lib_name: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        Self::CompilationError {
            lib_name: lib_name.into(),
            diagnostics: diagnostics.into(),
        }
    }

    /// Create a size mismatch error.
    pub fn size_mismatch(context: impl Into<String>, required: u64, available: u64) -> Self {
        Self::SizeMismatch {
            context: context.into(),
            required,
            available,
        }
    }

    /// Create an invalid dispatch size error.
    pub fn dispatch(msg: impl Into<String>) -> Self {
        Self::InvalidDispatchSize(msg.into())
    }

    /// Create an invalid state error.
    pub fn state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create a device lost error.
    pub fn lost(msg: impl Into<String>) -> Self {
        Self::DeviceLost(msg.into())
    }

    /// Create an invalid argument error.
    pub fn argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Whether the error is terminal for the device.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DeviceLost(_))
    }
}
