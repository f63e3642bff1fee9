//! Device buffer resource.

use std::sync::Arc;

use crate::backend::{GpuContext, RawBuffer, RawBufferDescriptor};
use crate::error::{GraphicsError, GraphicsResult};
use crate::sync::SubmissionPoint;
use crate::types::{BufferUsage, ResidencyPattern};

/// An allocated device buffer.
///
/// Capacity is fixed for the lifetime of one allocation; growing a buffer means
/// allocating a new `DeviceBuffer` and retaining the old one until the GPU is
/// done with it. The backend object is destroyed on drop.
pub struct DeviceBuffer {
    context: Arc<dyn GpuContext>,
    raw: RawBuffer,
    capacity: u64,
    usage: BufferUsage,
    pattern: ResidencyPattern,
    device_address: Option<u64>,
    last_use: Option<SubmissionPoint>,
    label: Option<String>,
}

impl DeviceBuffer {
    /// Allocate a buffer of `capacity` bytes.
    ///
    /// Allocation failure is returned as is; nothing is left allocated.
    pub fn new(
        context: Arc<dyn GpuContext>,
        capacity: u64,
        usage: BufferUsage,
        pattern: ResidencyPattern,
        label: Option<&str>,
    ) -> GraphicsResult<Self> {
        if capacity == 0 {
            return Err(GraphicsError::InvalidParameter(
                "buffer capacity must be non-zero".to_string(),
            ));
        }

        let raw = context.create_buffer(&RawBufferDescriptor {
            label,
            size: capacity,
            usage,
            pattern,
        })?;
        let device_address = context.buffer_device_address(raw);

        log::trace!(
            "Created buffer {:?} {:?} ({} bytes, {:?}, {:?})",
            raw,
            label,
            capacity,
            usage,
            pattern
        );

        Ok(Self {
            context,
            raw,
            capacity,
            usage,
            pattern,
            device_address,
            last_use: None,
            label: label.map(str::to_owned),
        })
    }

    /// The backend buffer.
    pub fn raw(&self) -> RawBuffer {
        self.raw
    }

    /// Size in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn pattern(&self) -> ResidencyPattern {
        self.pattern
    }

    /// Returns true if the CPU can write the buffer through a mapping.
    pub fn is_mapped(&self) -> bool {
        self.pattern.is_host_mappable()
    }

    /// GPU virtual address, for buffers created with `DEVICE_ADDRESS` usage.
    pub fn device_address(&self) -> Option<u64> {
        self.device_address
    }

    /// Debug label.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// The submission that last used this buffer, if any.
    pub fn last_use(&self) -> Option<&SubmissionPoint> {
        self.last_use.as_ref()
    }

    /// Record that work completing at `point` uses this buffer.
    pub fn mark_used(&mut self, point: SubmissionPoint) {
        self.last_use = Some(point);
    }

    /// Returns true if no submitted or pending GPU work still uses this buffer.
    pub fn is_idle(&self) -> GraphicsResult<bool> {
        match &self.last_use {
            Some(point) => point.is_reached(),
            None => Ok(true),
        }
    }

    /// Copy `data` into the mapping at `offset`.
    pub fn write(&self, offset: u64, data: &[u8]) -> GraphicsResult<()> {
        self.check_range(offset, data.len() as u64)?;
        self.context.write_mapped(self.raw, offset, data)
    }

    /// Make host writes in `[offset, offset + size)` visible to the device.
    pub fn flush(&self, offset: u64, size: u64) -> GraphicsResult<()> {
        self.check_range(offset, size)?;
        self.context.flush_mapped(self.raw, offset, size)
    }

    /// Read `size` bytes at `offset` through the mapping.
    pub fn read(&self, offset: u64, size: u64) -> GraphicsResult<Vec<u8>> {
        self.check_range(offset, size)?;
        self.context.read_mapped(self.raw, offset, size)
    }

    fn check_range(&self, offset: u64, size: u64) -> GraphicsResult<()> {
        if !self.is_mapped() {
            return Err(GraphicsError::InvalidState(format!(
                "buffer {:?} with {:?} residency is not host mapped",
                self.raw, self.pattern
            )));
        }
        match offset.checked_add(size) {
            Some(end) if end <= self.capacity => Ok(()),
            _ => Err(GraphicsError::InvalidParameter(format!(
                "range {offset}+{size} exceeds buffer capacity {}",
                self.capacity
            ))),
        }
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        log::trace!("Destroying buffer {:?} {:?}", self.raw, self.label);
        self.context.destroy_buffer(self.raw);
    }
}

impl std::fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("raw", &self.raw)
            .field("capacity", &self.capacity)
            .field("usage", &self.usage)
            .field("pattern", &self.pattern)
            .field("label", &self.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(DeviceBuffer: Send, Sync);

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyContext;

    #[test]
    fn test_zero_capacity_rejected() {
        let context = DummyContext::new();
        let result = DeviceBuffer::new(
            context,
            0,
            BufferUsage::VERTEX,
            ResidencyPattern::Dynamic,
            None,
        );
        assert!(matches!(result, Err(GraphicsError::InvalidParameter(_))));
    }

    #[test]
    fn test_mapped_write_and_read() {
        let context = DummyContext::new();
        let buffer = DeviceBuffer::new(
            context.clone(),
            16,
            BufferUsage::UNIFORM,
            ResidencyPattern::Dynamic,
            Some("uniforms"),
        )
        .unwrap();

        buffer.write(4, &[1, 2, 3, 4]).unwrap();
        buffer.flush(4, 4).unwrap();
        assert_eq!(buffer.read(4, 4).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(context.buffer_contents(buffer.raw()).unwrap()[4..8], [1, 2, 3, 4]);
    }

    #[test]
    fn test_static_buffer_is_not_mapped() {
        let context = DummyContext::new();
        let buffer = DeviceBuffer::new(
            context,
            16,
            BufferUsage::VERTEX,
            ResidencyPattern::Static,
            None,
        )
        .unwrap();
        assert!(!buffer.is_mapped());
        assert!(matches!(
            buffer.write(0, &[0; 4]),
            Err(GraphicsError::InvalidState(_))
        ));
    }

    #[test]
    fn test_out_of_bounds_write_rejected() {
        let context = DummyContext::new();
        let buffer = DeviceBuffer::new(
            context,
            8,
            BufferUsage::UNIFORM,
            ResidencyPattern::Dynamic,
            None,
        )
        .unwrap();
        assert!(matches!(
            buffer.write(6, &[0; 4]),
            Err(GraphicsError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_allocation_failure_is_fatal() {
        let context = DummyContext::new();
        context.set_fail_allocations(true);
        let err = DeviceBuffer::new(
            context,
            64,
            BufferUsage::VERTEX,
            ResidencyPattern::Static,
            None,
        )
        .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_device_address_requires_usage() {
        let context = DummyContext::new();
        let plain = DeviceBuffer::new(
            context.clone(),
            64,
            BufferUsage::STORAGE,
            ResidencyPattern::Static,
            None,
        )
        .unwrap();
        let addressed = DeviceBuffer::new(
            context,
            64,
            BufferUsage::STORAGE | BufferUsage::DEVICE_ADDRESS,
            ResidencyPattern::Static,
            None,
        )
        .unwrap();
        assert!(plain.device_address().is_none());
        assert!(addressed.device_address().is_some());
    }

    #[test]
    fn test_drop_destroys_buffer() {
        let context = DummyContext::new();
        let raw = DeviceBuffer::new(
            context.clone(),
            32,
            BufferUsage::INDEX,
            ResidencyPattern::Static,
            None,
        )
        .unwrap()
        .raw();
        assert!(!context.is_buffer_alive(raw));
    }
}
