//! Device configuration.

use std::time::Duration;

use crate::error::{GraphicsError, GraphicsResult};

/// Configuration of a [`GraphicsDevice`](crate::GraphicsDevice).
///
/// # Example
///
/// ```ignore
/// let config = DeviceConfig::default()
///     .with_frames_in_flight(3)
///     .with_wait_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Number of command buffer slots cycled by a [`CommandRing`](crate::CommandRing).
    pub frames_in_flight: usize,
    /// How many times an "out of date" acquire recreates the swapchain and retries.
    pub max_acquire_retries: u32,
    /// Upper bound for blocking timeline waits, `None` to wait forever.
    pub wait_timeout: Option<Duration>,
    /// Allow the direct write path for host-mappable buffers.
    pub direct_writes: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            max_acquire_retries: 1,
            wait_timeout: None,
            direct_writes: true,
        }
    }
}

impl DeviceConfig {
    /// Maximum supported number of frames in flight.
    pub const MAX_FRAMES_IN_FLIGHT: usize = 8;

    /// Set the number of frames in flight.
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Set the acquire retry bound.
    pub fn with_max_acquire_retries(mut self, retries: u32) -> Self {
        self.max_acquire_retries = retries;
        self
    }

    /// Set the timeout of blocking waits.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    /// Enable or disable the direct write path.
    pub fn with_direct_writes(mut self, enabled: bool) -> Self {
        self.direct_writes = enabled;
        self
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> GraphicsResult<()> {
        if self.frames_in_flight == 0 || self.frames_in_flight > Self::MAX_FRAMES_IN_FLIGHT {
            return Err(GraphicsError::InvalidParameter(format!(
                "frames_in_flight must be in 1..={}, got {}",
                Self::MAX_FRAMES_IN_FLIGHT,
                self.frames_in_flight
            )));
        }
        if self.wait_timeout == Some(Duration::ZERO) {
            return Err(GraphicsError::InvalidParameter(
                "wait_timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DeviceConfig::default();
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.max_acquire_retries, 1);
        assert_eq!(config.wait_timeout, None);
        assert!(config.direct_writes);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = DeviceConfig::default()
            .with_frames_in_flight(3)
            .with_max_acquire_retries(2)
            .with_wait_timeout(Duration::from_millis(500))
            .with_direct_writes(false);
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.max_acquire_retries, 2);
        assert_eq!(config.wait_timeout, Some(Duration::from_millis(500)));
        assert!(!config.direct_writes);
    }

    #[test]
    fn test_validate_rejects() {
        assert!(
            DeviceConfig::default()
                .with_frames_in_flight(0)
                .validate()
                .is_err()
        );
        assert!(
            DeviceConfig::default()
                .with_frames_in_flight(9)
                .validate()
                .is_err()
        );
        assert!(
            DeviceConfig::default()
                .with_wait_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }
}
