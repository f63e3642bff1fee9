//! Graphics error types.

use thiserror::Error;

/// Errors that can occur in the resource and synchronization core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    /// Failed to initialize a device context.
    #[error("initialization failed: {0}")]
    InitializationFailed(String),

    /// A buffer, image or synchronization primitive could not be allocated.
    #[error("allocation failed: {0}")]
    AllocationFailed(String),

    /// Out of GPU memory.
    #[error("out of GPU memory")]
    OutOfMemory,

    /// The GPU device was lost. Nothing waiting on it will ever complete.
    #[error("GPU device lost")]
    DeviceLost,

    /// A bounded wait elapsed before the GPU reached the requested value.
    #[error("timed out waiting for timeline value {value}")]
    Timeout {
        /// The timeline value that was being waited for.
        value: u64,
    },

    /// An invalid parameter was provided.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// An operation was issued in the wrong lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A handle does not refer to a live resource.
    #[error("unknown resource: {0}")]
    UnknownResource(String),

    /// The surface kept reporting "out of date" after every permitted retry.
    #[error("surface still out of date after {attempts} acquire attempts")]
    SurfaceOutOfDate {
        /// Number of acquire attempts made.
        attempts: u32,
    },

    /// The surface has zero area (for example a minimized window).
    #[error("surface has zero area")]
    SurfaceMinimized,

    /// The surface was lost and needs to be recreated by the windowing layer.
    #[error("surface lost, needs recreation")]
    SurfaceLost,

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GraphicsError {
    /// Returns true for conditions the engine can never recover from.
    ///
    /// Device loss and allocation failures are always surfaced to the caller.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DeviceLost | Self::AllocationFailed(_) | Self::OutOfMemory
        )
    }
}

/// Result type for graphics operations.
pub type GraphicsResult<T> = Result<T, GraphicsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphicsError::OutOfMemory;
        assert_eq!(err.to_string(), "out of GPU memory");

        let err = GraphicsError::InitializationFailed("no queue".to_string());
        assert_eq!(err.to_string(), "initialization failed: no queue");

        let err = GraphicsError::SurfaceOutOfDate { attempts: 2 };
        assert_eq!(
            err.to_string(),
            "surface still out of date after 2 acquire attempts"
        );
    }

    #[test]
    fn test_device_lost_distinct_from_timeout() {
        let lost = GraphicsError::DeviceLost;
        let timeout = GraphicsError::Timeout { value: 3 };
        assert_ne!(lost, timeout);
        assert!(lost.is_fatal());
        assert!(!timeout.is_fatal());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(GraphicsError::AllocationFailed("staging".into()).is_fatal());
        assert!(!GraphicsError::SurfaceMinimized.is_fatal());
        assert!(!GraphicsError::UnknownResource("buffer #3".into()).is_fatal());
    }
}
