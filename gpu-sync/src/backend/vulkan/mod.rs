//! Vulkan context implementation using ash.
//!
//! The context is built from an already created instance, device and queue.
//! Memory comes from gpu-allocator. Device objects are handed across the
//! [`GpuContext`] seam as their raw `u64` Vulkan handles; allocations backing
//! buffers and images are kept in tables keyed by those handles.

pub(crate) mod conversion;
mod swapchain;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use ash::vk::Handle;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use parking_lot::Mutex;

use crate::barriers::BarrierBatch;
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::{ImageAspect, ImageDescriptor, TextureFormat};

use super::{
    AcquireOutcome, BufferCopy, BufferImageCopy, GpuContext, PresentOutcome, PresentRequest,
    QueueSubmission, RawBuffer, RawBufferDescriptor, RawCommandBuffer, RawFence, RawImage,
    RawSemaphore, RawSurface, RawSwapchain, SurfaceCapabilities, SwapchainDescriptor,
    SwapchainImages, WaitStatus,
};

use self::conversion::{
    convert_access_flags, convert_aspect, convert_buffer_usage, convert_image_layout,
    convert_pipeline_stages, convert_subresource_range, convert_texture_format,
    convert_texture_usage, map_vk_result, memory_location,
};

pub use self::swapchain::required_instance_extensions;

/// Objects a [`VulkanContext`] is built from.
///
/// The context takes ownership of the instance and device and destroys them
/// when it is dropped.
pub struct VulkanContextDescriptor {
    /// Vulkan entry points.
    pub entry: ash::Entry,
    /// Instance, created with the surface extensions the windowing layer needs.
    pub instance: ash::Instance,
    /// Physical device the logical device was created on.
    pub physical_device: vk::PhysicalDevice,
    /// Logical device with `timelineSemaphore` enabled and `VK_KHR_swapchain` loaded.
    pub device: ash::Device,
    /// Family of the queue used for all submissions and presents.
    pub queue_family_index: u32,
    /// Index of that queue within its family.
    pub queue_index: u32,
    /// `bufferDeviceAddress` was enabled on the device.
    pub buffer_device_address: bool,
    /// `VK_EXT_swapchain_maintenance1` was enabled on the device.
    pub swapchain_maintenance1: bool,
}

struct BufferEntry {
    buffer: vk::Buffer,
    allocation: Allocation,
    device_address: Option<u64>,
}

struct ImageEntry {
    image: vk::Image,
    allocation: Allocation,
    format: TextureFormat,
}

/// Vulkan [`GpuContext`].
///
/// One queue is used for every submission and present. The command pool and
/// the queue are externally synchronized objects, so both sit behind locks.
pub struct VulkanContext {
    entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queue: Mutex<vk::Queue>,
    queue_family_index: u32,
    /// Taken out in `Drop` so it is released before the device.
    allocator: Mutex<Option<Allocator>>,
    command_pool: Mutex<vk::CommandPool>,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    buffer_device_address: bool,
    swapchain_maintenance1: bool,
    buffers: Mutex<HashMap<u64, BufferEntry>>,
    images: Mutex<HashMap<u64, ImageEntry>>,
    /// Swapchain images, keyed by swapchain.
    swapchains: Mutex<HashMap<u64, Vec<vk::Image>>>,
}

impl std::fmt::Debug for VulkanContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanContext")
            .field("queue_family_index", &self.queue_family_index)
            .field("buffers", &self.buffers.lock().len())
            .field("images", &self.images.lock().len())
            .field("swapchains", &self.swapchains.lock().len())
            .finish()
    }
}

impl VulkanContext {
    /// Create a context from an externally created device and queue.
    pub fn new(descriptor: VulkanContextDescriptor) -> GraphicsResult<Arc<Self>> {
        let VulkanContextDescriptor {
            entry,
            instance,
            physical_device,
            device,
            queue_family_index,
            queue_index,
            buffer_device_address,
            swapchain_maintenance1,
        } = descriptor;

        let queue = unsafe { device.get_device_queue(queue_family_index, queue_index) };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address,
            allocation_sizes: gpu_allocator::AllocationSizes::default(),
        })
        .map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to create memory allocator: {}", e))
        })?;

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { device.create_command_pool(&pool_info, None) }.map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to create command pool: {:?}", e))
        })?;

        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);

        log::info!(
            "Vulkan context created (queue family {}, present fences: {})",
            queue_family_index,
            swapchain_maintenance1
        );

        Ok(Arc::new(Self {
            entry,
            instance,
            physical_device,
            device,
            queue: Mutex::new(queue),
            queue_family_index,
            allocator: Mutex::new(Some(allocator)),
            command_pool: Mutex::new(command_pool),
            surface_loader,
            swapchain_loader,
            buffer_device_address,
            swapchain_maintenance1,
            buffers: Mutex::new(HashMap::new()),
            images: Mutex::new(HashMap::new()),
            swapchains: Mutex::new(HashMap::new()),
        }))
    }

    /// Get the logical device.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the instance.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the physical device.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get the queue family index.
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Raw Vulkan buffer behind a handle.
    pub fn vk_buffer(buffer: RawBuffer) -> vk::Buffer {
        vk::Buffer::from_raw(buffer.raw())
    }

    /// Raw Vulkan image behind a handle.
    pub fn vk_image(image: RawImage) -> vk::Image {
        vk::Image::from_raw(image.raw())
    }

    /// Raw Vulkan command buffer behind a handle.
    pub fn vk_command_buffer(command_buffer: RawCommandBuffer) -> vk::CommandBuffer {
        vk::CommandBuffer::from_raw(command_buffer.raw())
    }

    fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: gpu_allocator::MemoryLocation,
        linear: bool,
    ) -> GraphicsResult<Allocation> {
        let mut allocator = self.allocator.lock();
        let allocator = allocator
            .as_mut()
            .ok_or_else(|| GraphicsError::Internal("Allocator already released".to_string()))?;
        allocator
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| match e {
                gpu_allocator::AllocationError::OutOfMemory => GraphicsError::OutOfMemory,
                other => GraphicsError::AllocationFailed(format!(
                    "Failed to allocate memory for {}: {}",
                    name, other
                )),
            })
    }

    fn free(&self, allocation: Allocation) {
        if let Some(allocator) = self.allocator.lock().as_mut()
            && let Err(e) = allocator.free(allocation)
        {
            log::warn!("Failed to free allocation: {}", e);
        }
    }

    /// Copy aspect for an image: depth when the format also has stencil.
    fn copy_aspect(&self, image: vk::Image) -> vk::ImageAspectFlags {
        let format = self
            .images
            .lock()
            .get(&image.as_raw())
            .map(|entry| entry.format)
            .unwrap_or_default();
        let aspect = format.aspect();
        if aspect.contains(ImageAspect::DEPTH) {
            vk::ImageAspectFlags::DEPTH
        } else {
            convert_aspect(aspect)
        }
    }

    fn buffer_image_copy(&self, image: vk::Image, region: &BufferImageCopy) -> vk::BufferImageCopy {
        vk::BufferImageCopy::default()
            .buffer_offset(region.buffer_offset)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: self.copy_aspect(image),
                mip_level: region.mip_level,
                base_array_layer: region.layers.start,
                layer_count: region.layers.end - region.layers.start,
            })
            .image_offset(vk::Offset3D::default())
            .image_extent(vk::Extent3D {
                width: region.extent.width,
                height: region.extent.height,
                depth: region.extent.depth,
            })
    }

    fn mapped_range(
        &self,
        buffer: RawBuffer,
        offset: u64,
        size: u64,
    ) -> GraphicsResult<std::ptr::NonNull<u8>> {
        let buffers = self.buffers.lock();
        let entry = buffers.get(&buffer.raw()).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("Unknown buffer {:#x}", buffer.raw()))
        })?;
        if offset + size > entry.allocation.size() {
            return Err(GraphicsError::InvalidParameter(format!(
                "Mapped range {}..{} exceeds allocation of {} bytes",
                offset,
                offset + size,
                entry.allocation.size()
            )));
        }
        let Some(mapped_ptr) = entry.allocation.mapped_ptr() else {
            return Err(GraphicsError::InvalidState(
                "Buffer is not mapped for CPU access".to_string(),
            ));
        };
        // The allocation outlives the returned pointer until destroy_buffer,
        // which callers never race with a mapped access.
        let ptr = unsafe { mapped_ptr.cast::<u8>().add(offset as usize) };
        Ok(ptr)
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            for (_, entry) in self.buffers.lock().drain() {
                self.device.destroy_buffer(entry.buffer, None);
                self.free(entry.allocation);
            }
            for (_, entry) in self.images.lock().drain() {
                self.device.destroy_image(entry.image, None);
                self.free(entry.allocation);
            }
            for (swapchain, _) in self.swapchains.lock().drain() {
                self.swapchain_loader
                    .destroy_swapchain(vk::SwapchainKHR::from_raw(swapchain), None);
            }

            self.device
                .destroy_command_pool(*self.command_pool.get_mut(), None);

            // Allocator must go before the device.
            drop(self.allocator.lock().take());

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

impl GpuContext for VulkanContext {
    fn name(&self) -> &'static str {
        "Vulkan"
    }

    fn create_buffer(&self, descriptor: &RawBufferDescriptor<'_>) -> GraphicsResult<RawBuffer> {
        let mut usage = convert_buffer_usage(descriptor.usage);
        if !self.buffer_device_address {
            usage &= !vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(descriptor.size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }
            .map_err(|e| map_vk_result(e, "Failed to create buffer"))?;

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let allocation = match self.allocate(
            descriptor.label.unwrap_or("buffer"),
            requirements,
            memory_location(descriptor.pattern),
            true,
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            unsafe { self.device.destroy_buffer(buffer, None) };
            self.free(allocation);
            return Err(map_vk_result(e, "Failed to bind buffer memory"));
        }

        let device_address = usage
            .contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS)
            .then(|| unsafe {
                self.device
                    .get_buffer_device_address(&vk::BufferDeviceAddressInfo::default().buffer(buffer))
            });

        log::trace!(
            "Created buffer {:?} ({} bytes, {:?})",
            buffer,
            descriptor.size,
            descriptor.pattern
        );

        self.buffers.lock().insert(
            buffer.as_raw(),
            BufferEntry {
                buffer,
                allocation,
                device_address,
            },
        );
        Ok(RawBuffer::from_raw(buffer.as_raw()))
    }

    fn destroy_buffer(&self, buffer: RawBuffer) {
        let Some(entry) = self.buffers.lock().remove(&buffer.raw()) else {
            return;
        };
        unsafe { self.device.destroy_buffer(entry.buffer, None) };
        self.free(entry.allocation);
    }

    fn write_mapped(&self, buffer: RawBuffer, offset: u64, data: &[u8]) -> GraphicsResult<()> {
        let dst = self.mapped_range(buffer, offset, data.len() as u64)?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst.as_ptr(), data.len());
        }
        Ok(())
    }

    fn read_mapped(&self, buffer: RawBuffer, offset: u64, size: u64) -> GraphicsResult<Vec<u8>> {
        let src = self.mapped_range(buffer, offset, size)?;
        let mut result = vec![0u8; size as usize];
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), result.as_mut_ptr(), size as usize);
        }
        Ok(result)
    }

    fn flush_mapped(&self, buffer: RawBuffer, offset: u64, size: u64) -> GraphicsResult<()> {
        // Mappable locations in gpu-allocator are host coherent; only the
        // range is checked.
        self.mapped_range(buffer, offset, size).map(|_| ())
    }

    fn buffer_device_address(&self, buffer: RawBuffer) -> Option<u64> {
        self.buffers
            .lock()
            .get(&buffer.raw())
            .and_then(|entry| entry.device_address)
    }

    fn create_image(&self, descriptor: &ImageDescriptor) -> GraphicsResult<RawImage> {
        let size = descriptor.size;
        let image_type = if size.depth > 1 {
            vk::ImageType::TYPE_3D
        } else {
            vk::ImageType::TYPE_2D
        };

        let image_info = vk::ImageCreateInfo::default()
            .image_type(image_type)
            .format(convert_texture_format(descriptor.format))
            .extent(vk::Extent3D {
                width: size.width,
                height: size.height,
                depth: size.depth,
            })
            .mip_levels(descriptor.mip_level_count)
            .array_layers(descriptor.array_layer_count)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(convert_texture_usage(descriptor.usage, descriptor.format))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.device.create_image(&image_info, None) }
            .map_err(|e| map_vk_result(e, "Failed to create image"))?;

        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let allocation = match self.allocate(
            descriptor.label.as_deref().unwrap_or("image"),
            requirements,
            gpu_allocator::MemoryLocation::GpuOnly,
            false,
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        } {
            unsafe { self.device.destroy_image(image, None) };
            self.free(allocation);
            return Err(map_vk_result(e, "Failed to bind image memory"));
        }

        self.images.lock().insert(
            image.as_raw(),
            ImageEntry {
                image,
                allocation,
                format: descriptor.format,
            },
        );
        Ok(RawImage::from_raw(image.as_raw()))
    }

    fn destroy_image(&self, image: RawImage) {
        let Some(entry) = self.images.lock().remove(&image.raw()) else {
            return;
        };
        unsafe { self.device.destroy_image(entry.image, None) };
        self.free(entry.allocation);
    }

    fn allocate_command_buffer(&self) -> GraphicsResult<RawCommandBuffer> {
        let pool = self.command_pool.lock();
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| map_vk_result(e, "Failed to allocate command buffer"))?;
        buffers
            .first()
            .map(|cmd| RawCommandBuffer::from_raw(cmd.as_raw()))
            .ok_or_else(|| GraphicsError::Internal("No command buffer allocated".to_string()))
    }

    fn free_command_buffer(&self, command_buffer: RawCommandBuffer) {
        let pool = self.command_pool.lock();
        unsafe {
            self.device
                .free_command_buffers(*pool, &[Self::vk_command_buffer(command_buffer)]);
        }
    }

    fn begin_command_buffer(&self, command_buffer: RawCommandBuffer) -> GraphicsResult<()> {
        let _pool = self.command_pool.lock();
        let cmd = Self::vk_command_buffer(command_buffer);
        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .map_err(|e| map_vk_result(e, "Failed to reset command buffer"))?;

            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device
                .begin_command_buffer(cmd, &begin_info)
                .map_err(|e| map_vk_result(e, "Failed to begin command buffer"))
        }
    }

    fn end_command_buffer(&self, command_buffer: RawCommandBuffer) -> GraphicsResult<()> {
        let _pool = self.command_pool.lock();
        unsafe {
            self.device
                .end_command_buffer(Self::vk_command_buffer(command_buffer))
        }
        .map_err(|e| map_vk_result(e, "Failed to end command buffer"))
    }

    fn cmd_copy_buffer(
        &self,
        command_buffer: RawCommandBuffer,
        src: RawBuffer,
        dst: RawBuffer,
        regions: &[BufferCopy],
    ) {
        let regions: Vec<vk::BufferCopy> = regions
            .iter()
            .map(|region| vk::BufferCopy {
                src_offset: region.src_offset,
                dst_offset: region.dst_offset,
                size: region.size,
            })
            .collect();

        let _pool = self.command_pool.lock();
        unsafe {
            self.device.cmd_copy_buffer(
                Self::vk_command_buffer(command_buffer),
                Self::vk_buffer(src),
                Self::vk_buffer(dst),
                &regions,
            );
        }
    }

    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: RawCommandBuffer,
        src: RawBuffer,
        dst: RawImage,
        region: &BufferImageCopy,
    ) {
        let image = Self::vk_image(dst);
        let region = self.buffer_image_copy(image, region);

        let _pool = self.command_pool.lock();
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                Self::vk_command_buffer(command_buffer),
                Self::vk_buffer(src),
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }

    fn cmd_copy_image_to_buffer(
        &self,
        command_buffer: RawCommandBuffer,
        src: RawImage,
        dst: RawBuffer,
        region: &BufferImageCopy,
    ) {
        let image = Self::vk_image(src);
        let region = self.buffer_image_copy(image, region);

        let _pool = self.command_pool.lock();
        unsafe {
            self.device.cmd_copy_image_to_buffer(
                Self::vk_command_buffer(command_buffer),
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                Self::vk_buffer(dst),
                &[region],
            );
        }
    }

    fn cmd_pipeline_barrier(&self, command_buffer: RawCommandBuffer, batch: &BarrierBatch) {
        if batch.is_empty() {
            return;
        }

        let buffer_barriers: Vec<vk::BufferMemoryBarrier> = batch
            .buffer_barriers()
            .iter()
            .map(|barrier| {
                vk::BufferMemoryBarrier::default()
                    .src_access_mask(convert_access_flags(barrier.src_access))
                    .dst_access_mask(convert_access_flags(barrier.dst_access))
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .buffer(Self::vk_buffer(barrier.buffer))
                    .offset(barrier.range.start)
                    .size(barrier.range.end - barrier.range.start)
            })
            .collect();

        let image_barriers: Vec<vk::ImageMemoryBarrier> = batch
            .image_barriers()
            .iter()
            .map(|barrier| {
                vk::ImageMemoryBarrier::default()
                    .src_access_mask(convert_access_flags(barrier.src_access))
                    .dst_access_mask(convert_access_flags(barrier.dst_access))
                    .old_layout(convert_image_layout(barrier.old_layout))
                    .new_layout(convert_image_layout(barrier.new_layout))
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(Self::vk_image(barrier.image))
                    .subresource_range(convert_subresource_range(barrier.aspect, &barrier.range))
            })
            .collect();

        let _pool = self.command_pool.lock();
        unsafe {
            self.device.cmd_pipeline_barrier(
                Self::vk_command_buffer(command_buffer),
                convert_pipeline_stages(batch.src_stages()),
                convert_pipeline_stages(batch.dst_stages()),
                vk::DependencyFlags::empty(),
                &[],
                &buffer_barriers,
                &image_barriers,
            );
        }
    }

    fn create_timeline_semaphore(&self, initial_value: u64) -> GraphicsResult<RawSemaphore> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);

        let semaphore = unsafe { self.device.create_semaphore(&create_info, None) }
            .map_err(|e| map_vk_result(e, "Failed to create timeline semaphore"))?;
        Ok(RawSemaphore::from_raw(semaphore.as_raw()))
    }

    fn timeline_value(&self, semaphore: RawSemaphore) -> GraphicsResult<u64> {
        unsafe {
            self.device
                .get_semaphore_counter_value(vk::Semaphore::from_raw(semaphore.raw()))
        }
        .map_err(|e| map_vk_result(e, "Failed to query timeline value"))
    }

    fn wait_timeline(
        &self,
        semaphore: RawSemaphore,
        value: u64,
        timeout: Option<Duration>,
    ) -> GraphicsResult<WaitStatus> {
        let semaphores = [vk::Semaphore::from_raw(semaphore.raw())];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        let timeout_ns = timeout
            .map(|t| u64::try_from(t.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(u64::MAX);

        match unsafe { self.device.wait_semaphores(&wait_info, timeout_ns) } {
            Ok(()) => Ok(WaitStatus::Reached),
            Err(vk::Result::TIMEOUT) => Ok(WaitStatus::TimedOut),
            Err(e) => Err(map_vk_result(e, "Failed to wait on timeline")),
        }
    }

    fn create_semaphore(&self) -> GraphicsResult<RawSemaphore> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { self.device.create_semaphore(&create_info, None) }
            .map_err(|e| map_vk_result(e, "Failed to create semaphore"))?;
        Ok(RawSemaphore::from_raw(semaphore.as_raw()))
    }

    fn destroy_semaphore(&self, semaphore: RawSemaphore) {
        unsafe {
            self.device
                .destroy_semaphore(vk::Semaphore::from_raw(semaphore.raw()), None);
        }
    }

    fn create_fence(&self, signaled: bool) -> GraphicsResult<RawFence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { self.device.create_fence(&create_info, None) }
            .map_err(|e| map_vk_result(e, "Failed to create fence"))?;
        Ok(RawFence::from_raw(fence.as_raw()))
    }

    fn fence_signaled(&self, fence: RawFence) -> GraphicsResult<bool> {
        unsafe { self.device.get_fence_status(vk::Fence::from_raw(fence.raw())) }
            .map_err(|e| map_vk_result(e, "Failed to query fence"))
    }

    fn reset_fence(&self, fence: RawFence) -> GraphicsResult<()> {
        unsafe { self.device.reset_fences(&[vk::Fence::from_raw(fence.raw())]) }
            .map_err(|e| map_vk_result(e, "Failed to reset fence"))
    }

    fn destroy_fence(&self, fence: RawFence) {
        unsafe {
            self.device
                .destroy_fence(vk::Fence::from_raw(fence.raw()), None);
        }
    }

    fn submit(&self, submission: &QueueSubmission<'_>) -> GraphicsResult<()> {
        let command_buffers: Vec<vk::CommandBuffer> = submission
            .command_buffers
            .iter()
            .map(|&cmd| Self::vk_command_buffer(cmd))
            .collect();

        let wait_semaphores: Vec<vk::Semaphore> = submission
            .waits
            .iter()
            .map(|wait| vk::Semaphore::from_raw(wait.semaphore.raw()))
            .collect();
        // Binary semaphores ignore their entry in the value arrays.
        let wait_values: Vec<u64> = submission
            .waits
            .iter()
            .map(|wait| wait.value.unwrap_or(0))
            .collect();
        let wait_stages: Vec<vk::PipelineStageFlags> = submission
            .waits
            .iter()
            .map(|wait| convert_pipeline_stages(wait.stages))
            .collect();

        let signal_semaphores: Vec<vk::Semaphore> = submission
            .signals
            .iter()
            .map(|signal| vk::Semaphore::from_raw(signal.semaphore.raw()))
            .collect();
        let signal_values: Vec<u64> = submission
            .signals
            .iter()
            .map(|signal| signal.value.unwrap_or(0))
            .collect();

        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::default()
            .wait_semaphore_values(&wait_values)
            .signal_semaphore_values(&signal_values);

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);

        let fence = submission
            .fence
            .map(|fence| vk::Fence::from_raw(fence.raw()))
            .unwrap_or_else(vk::Fence::null);

        let queue = self.queue.lock();
        unsafe { self.device.queue_submit(*queue, &[submit_info], fence) }
            .map_err(|e| map_vk_result(e, "Failed to submit command buffer"))
    }

    fn wait_idle(&self) -> GraphicsResult<()> {
        let queue = self.queue.lock();
        unsafe { self.device.queue_wait_idle(*queue) }
            .map_err(|e| map_vk_result(e, "Failed to wait for queue idle"))
    }

    fn surface_capabilities(&self, surface: RawSurface) -> GraphicsResult<SurfaceCapabilities> {
        swapchain::surface_capabilities(self, surface)
    }

    fn destroy_surface(&self, surface: RawSurface) {
        unsafe {
            self.surface_loader
                .destroy_surface(vk::SurfaceKHR::from_raw(surface.raw()), None);
        }
    }

    fn create_swapchain(
        &self,
        descriptor: &SwapchainDescriptor,
    ) -> GraphicsResult<SwapchainImages> {
        swapchain::create_swapchain(self, descriptor)
    }

    fn destroy_swapchain(&self, swapchain: RawSwapchain) {
        if self.swapchains.lock().remove(&swapchain.raw()).is_none() {
            return;
        }
        unsafe {
            self.swapchain_loader
                .destroy_swapchain(vk::SwapchainKHR::from_raw(swapchain.raw()), None);
        }
    }

    fn acquire_next_image(
        &self,
        swapchain: RawSwapchain,
        signal: RawSemaphore,
    ) -> GraphicsResult<AcquireOutcome> {
        swapchain::acquire_next_image(self, swapchain, signal)
    }

    fn present(&self, request: &PresentRequest) -> GraphicsResult<PresentOutcome> {
        swapchain::present(self, request)
    }
}

static_assertions::assert_impl_all!(VulkanContext: Send, Sync);
