//! Vulkan surfaces, swapchains and presentation.

use std::ffi::c_char;

use ash::vk;
use ash::vk::Handle;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::backend::{
    AcquireOutcome, PresentOutcome, PresentRequest, RawImage, RawSemaphore, RawSurface,
    RawSwapchain, SurfaceCapabilities, SwapchainDescriptor, SwapchainImages,
};
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::Extent3d;

use super::VulkanContext;
use super::conversion::{
    convert_present_mode, convert_texture_format, map_vk_result, present_mode_from_vk,
    texture_format_from_vk,
};

/// Instance extensions needed to create surfaces for `display`.
pub fn required_instance_extensions(
    display: &impl HasDisplayHandle,
) -> GraphicsResult<&'static [*const c_char]> {
    let display_handle = display.display_handle().map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to get display handle: {e}"))
    })?;
    ash_window::enumerate_required_extensions(display_handle.as_raw())
        .map_err(|e| map_vk_result(e, "Failed to enumerate surface extensions"))
}

impl VulkanContext {
    /// Create a presentation surface for a window.
    ///
    /// The surface is owned by the caller until it is handed to a
    /// [`PresentationSurface`](crate::PresentationSurface), which destroys it.
    pub fn create_surface<W>(&self, window: &W) -> GraphicsResult<RawSurface>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display_handle = window.display_handle().map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to get display handle: {e}"))
        })?;
        let window_handle = window.window_handle().map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to get window handle: {e}"))
        })?;

        let surface = unsafe {
            ash_window::create_surface(
                &self.entry,
                &self.instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
        }
        .map_err(|e| map_vk_result(e, "Failed to create Vulkan surface"))?;

        let supported = unsafe {
            self.surface_loader.get_physical_device_surface_support(
                self.physical_device,
                self.queue_family_index,
                surface,
            )
        }
        .unwrap_or(false);
        if !supported {
            unsafe { self.surface_loader.destroy_surface(surface, None) };
            return Err(GraphicsError::InitializationFailed(
                "Queue family cannot present to this surface".to_string(),
            ));
        }

        Ok(RawSurface::from_raw(surface.as_raw()))
    }
}

pub(super) fn surface_capabilities(
    context: &VulkanContext,
    surface: RawSurface,
) -> GraphicsResult<SurfaceCapabilities> {
    let surface = vk::SurfaceKHR::from_raw(surface.raw());
    let loader = &context.surface_loader;
    let physical_device = context.physical_device;

    let capabilities =
        unsafe { loader.get_physical_device_surface_capabilities(physical_device, surface) }
            .map_err(|e| map_vk_result(e, "Failed to get surface capabilities"))?;
    let formats = unsafe { loader.get_physical_device_surface_formats(physical_device, surface) }
        .map_err(|e| map_vk_result(e, "Failed to get surface formats"))?;
    let present_modes =
        unsafe { loader.get_physical_device_surface_present_modes(physical_device, surface) }
            .map_err(|e| map_vk_result(e, "Failed to get surface present modes"))?;

    // u32::MAX means the swapchain decides the extent.
    let current_extent = (capabilities.current_extent.width != u32::MAX).then(|| {
        Extent3d::new_2d(
            capabilities.current_extent.width,
            capabilities.current_extent.height,
        )
    });

    let mut known_formats = Vec::new();
    for format in formats
        .iter()
        .filter_map(|f| texture_format_from_vk(f.format))
    {
        if !known_formats.contains(&format) {
            known_formats.push(format);
        }
    }

    Ok(SurfaceCapabilities {
        min_image_count: capabilities.min_image_count,
        max_image_count: capabilities.max_image_count,
        current_extent,
        min_extent: Extent3d::new_2d(
            capabilities.min_image_extent.width,
            capabilities.min_image_extent.height,
        ),
        max_extent: Extent3d::new_2d(
            capabilities.max_image_extent.width,
            capabilities.max_image_extent.height,
        ),
        formats: known_formats,
        present_modes: present_modes
            .into_iter()
            .filter_map(present_mode_from_vk)
            .collect(),
    })
}

pub(super) fn create_swapchain(
    context: &VulkanContext,
    descriptor: &SwapchainDescriptor,
) -> GraphicsResult<SwapchainImages> {
    let surface = vk::SurfaceKHR::from_raw(descriptor.surface.raw());
    let physical_device = context.physical_device;

    let capabilities = unsafe {
        context
            .surface_loader
            .get_physical_device_surface_capabilities(physical_device, surface)
    }
    .map_err(|e| map_vk_result(e, "Failed to get surface capabilities"))?;

    let format = convert_texture_format(descriptor.format);
    let color_space = unsafe {
        context
            .surface_loader
            .get_physical_device_surface_formats(physical_device, surface)
    }
    .map_err(|e| map_vk_result(e, "Failed to get surface formats"))?
    .into_iter()
    .find(|f| f.format == format)
    .map(|f| f.color_space)
    .unwrap_or(vk::ColorSpaceKHR::SRGB_NONLINEAR);

    let old_swapchain = descriptor
        .old_swapchain
        .map(|old| vk::SwapchainKHR::from_raw(old.raw()))
        .unwrap_or_else(vk::SwapchainKHR::null);

    let create_info = vk::SwapchainCreateInfoKHR::default()
        .surface(surface)
        .min_image_count(descriptor.image_count)
        .image_format(format)
        .image_color_space(color_space)
        .image_extent(vk::Extent2D {
            width: descriptor.extent.width,
            height: descriptor.extent.height,
        })
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
        .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        .pre_transform(capabilities.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(convert_present_mode(descriptor.present_mode))
        .clipped(true)
        .old_swapchain(old_swapchain);

    let swapchain = unsafe {
        context
            .swapchain_loader
            .create_swapchain(&create_info, None)
    }
    .map_err(|e| map_vk_result(e, "Failed to create swapchain"))?;

    let images = match unsafe { context.swapchain_loader.get_swapchain_images(swapchain) } {
        Ok(images) => images,
        Err(e) => {
            unsafe { context.swapchain_loader.destroy_swapchain(swapchain, None) };
            return Err(map_vk_result(e, "Failed to get swapchain images"));
        }
    };

    log::debug!(
        "Created Vulkan swapchain: {}x{}, {} images, {:?}",
        descriptor.extent.width,
        descriptor.extent.height,
        images.len(),
        descriptor.present_mode
    );

    let raw_images = images
        .iter()
        .map(|image| RawImage::from_raw(image.as_raw()))
        .collect();
    context.swapchains.lock().insert(swapchain.as_raw(), images);

    Ok(SwapchainImages {
        swapchain: RawSwapchain::from_raw(swapchain.as_raw()),
        images: raw_images,
    })
}

pub(super) fn acquire_next_image(
    context: &VulkanContext,
    swapchain: RawSwapchain,
    signal: RawSemaphore,
) -> GraphicsResult<AcquireOutcome> {
    let result = unsafe {
        context.swapchain_loader.acquire_next_image(
            vk::SwapchainKHR::from_raw(swapchain.raw()),
            u64::MAX,
            vk::Semaphore::from_raw(signal.raw()),
            vk::Fence::null(),
        )
    };

    match result {
        Ok((index, suboptimal)) => Ok(AcquireOutcome::Acquired { index, suboptimal }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(e) => Err(map_vk_result(e, "Failed to acquire swapchain image")),
    }
}

pub(super) fn present(
    context: &VulkanContext,
    request: &PresentRequest,
) -> GraphicsResult<PresentOutcome> {
    let wait_semaphores = [vk::Semaphore::from_raw(request.wait.raw())];
    let swapchains = [vk::SwapchainKHR::from_raw(request.swapchain.raw())];
    let image_indices = [request.image_index];
    let fence = vk::Fence::from_raw(request.fence.raw());
    let fences = [fence];

    let mut fence_info = vk::SwapchainPresentFenceInfoEXT::default().fences(&fences);
    let mut present_info = vk::PresentInfoKHR::default()
        .wait_semaphores(&wait_semaphores)
        .swapchains(&swapchains)
        .image_indices(&image_indices);
    if context.swapchain_maintenance1 {
        present_info = present_info.push_next(&mut fence_info);
    }

    let queue = context.queue.lock();
    let result = unsafe { context.swapchain_loader.queue_present(*queue, &present_info) };

    let outcome = match result {
        Ok(false) => PresentOutcome::Presented,
        Ok(true) => PresentOutcome::Suboptimal,
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => PresentOutcome::OutOfDate,
        Err(e) => return Err(map_vk_result(e, "Failed to present")),
    };

    // Without present fences, an empty submission orders the fence after
    // everything queued so far, the present included. An out of date present
    // queues nothing, so the fence is signaled the same way.
    if !context.swapchain_maintenance1 || outcome == PresentOutcome::OutOfDate {
        unsafe { context.device.queue_submit(*queue, &[], fence) }
            .map_err(|e| map_vk_result(e, "Failed to signal present fence"))?;
    }

    Ok(outcome)
}
