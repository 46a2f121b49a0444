// error.rs — Error taxonomy shared by the CPU reference code and the GPU
// pipelines.
//
// Three families, matching how a caller is expected to react:
//
//   Device / KernelBuild / MissingKernelSource: fatal. The session is not
//       usable afterwards; nothing is retried internally.
//   IllegalState: a programmer error (kernel used before compile(),
//       token from another session). Fatal.
//   IllegalArgument: a data-dependent capacity violation. The one error a
//       caller can recover from, typically by picking another grid
//       resolution.
//
// Device errors carry a numeric status code so log output can be matched
// against driver-level failures.

use std::fmt;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Message used when a segment crosses more gridlines than the per-segment
/// capacity allows.
pub const TOO_MANY_INTERSECTIONS: &str = "too many intersections in one segment";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Kernel compilation failed. `log` is the device build log, verbatim.
    #[error("kernel module `{module}` failed to build:\n{log}")]
    KernelBuild { module: String, log: String },

    #[error("missing kernel source resource `{0}`")]
    MissingKernelSource(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("illegal argument: {0}")]
    IllegalArgument(String),
}

impl Error {
    pub(crate) fn not_compiled(module: &str) -> Self {
        Error::IllegalState(format!("kernel module `{module}` used before compile()"))
    }

    /// True for the capacity violations a caller may recover from.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::IllegalArgument(_))
    }
}

/// Classified device failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorKind {
    DeviceNotFound,
    DeviceNotAvailable,
    OutOfResources,
    OutOfHostMemory,
    MapFailure,
    InvalidValue,
    InvalidKernelName,
    InvalidOperation,
}

impl DeviceErrorKind {
    /// Numeric status code reported with the error.
    pub fn code(self) -> i32 {
        match self {
            DeviceErrorKind::DeviceNotFound => -1,
            DeviceErrorKind::DeviceNotAvailable => -2,
            DeviceErrorKind::OutOfResources => -5,
            DeviceErrorKind::OutOfHostMemory => -6,
            DeviceErrorKind::MapFailure => -12,
            DeviceErrorKind::InvalidValue => -30,
            DeviceErrorKind::InvalidKernelName => -46,
            DeviceErrorKind::InvalidOperation => -59,
        }
    }
}

impl fmt::Display for DeviceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceErrorKind::DeviceNotFound => "DEVICE_NOT_FOUND",
            DeviceErrorKind::DeviceNotAvailable => "DEVICE_NOT_AVAILABLE",
            DeviceErrorKind::OutOfResources => "OUT_OF_RESOURCES",
            DeviceErrorKind::OutOfHostMemory => "OUT_OF_HOST_MEMORY",
            DeviceErrorKind::MapFailure => "MAP_FAILURE",
            DeviceErrorKind::InvalidValue => "INVALID_VALUE",
            DeviceErrorKind::InvalidKernelName => "INVALID_KERNEL_NAME",
            DeviceErrorKind::InvalidOperation => "INVALID_OPERATION",
        };
        f.write_str(name)
    }
}

/// A failed device call. Always fatal.
#[derive(Debug, Clone, thiserror::Error)]
#[error("device error {} ({kind}) during {op}: {message}", .kind.code())]
pub struct DeviceError {
    pub kind: DeviceErrorKind,
    /// The operation that failed, e.g. `"enqueue count_segments"`.
    pub op: String,
    pub message: String,
}

impl DeviceError {
    pub fn new(kind: DeviceErrorKind, op: impl Into<String>, message: impl Into<String>) -> Self {
        DeviceError { kind, op: op.into(), message: message.into() }
    }

    pub fn code(&self) -> i32 {
        self.kind.code()
    }

    /// Classify an error captured from a wgpu error scope.
    pub(crate) fn from_wgpu(op: &str, err: wgpu::Error) -> Self {
        match err {
            wgpu::Error::OutOfMemory { .. } => {
                DeviceError::new(DeviceErrorKind::OutOfResources, op, err.to_string())
            }
            wgpu::Error::Validation { description, .. } => {
                DeviceError::new(DeviceErrorKind::InvalidOperation, op, description)
            }
            other => DeviceError::new(DeviceErrorKind::InvalidValue, op, other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_display_carries_code() {
        let err = DeviceError::new(DeviceErrorKind::MapFailure, "read_buffer", "mapping rejected");
        let text = err.to_string();
        assert!(text.contains("-12"), "{text}");
        assert!(text.contains("MAP_FAILURE"), "{text}");
        assert!(text.contains("read_buffer"), "{text}");
        assert_eq!(err.code(), -12);
    }

    #[test]
    fn test_only_illegal_argument_is_recoverable() {
        assert!(Error::IllegalArgument(TOO_MANY_INTERSECTIONS.into()).is_recoverable());
        assert!(!Error::IllegalState("x".into()).is_recoverable());
        assert!(!Error::MissingKernelSource("a.wgsl".into()).is_recoverable());
        let dev: Error = DeviceError::new(DeviceErrorKind::DeviceNotFound, "new", "none").into();
        assert!(!dev.is_recoverable());
    }

    #[test]
    fn test_kernel_build_error_keeps_log_verbatim() {
        let log = "Build log for device 0:\nerror: expected ';'\n";
        let err = Error::KernelBuild { module: "eikonal".into(), log: log.into() };
        assert!(err.to_string().ends_with(log));
    }
}
