//! Default resources shared by renderers.
//!
//! [`DefaultResources`] is created explicitly at startup from a
//! [`GraphicsDevice`] and destroyed explicitly at shutdown. Consumers receive
//! its handles rather than looking anything up globally.

use crate::command::CommandBufferResource;
use crate::device::{BufferHandle, GraphicsDevice, ImageHandle};
use crate::error::GraphicsResult;
use crate::types::{
    BufferDescriptor, BufferUsage, ImageDescriptor, ResidencyPattern, TextureFormat,
    TextureUsage,
};

/// Uniform block bound when a material supplies none.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DefaultUniforms {
    pub matrices: [[[f32; 4]; 4]; 3],
    pub params: [f32; 4],
}

const WHITE: [u8; 4] = [255, 255, 255, 255];
const BLACK: [u8; 4] = [0, 0, 0, 255];

/// Fallback textures and uniform data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultResources {
    white: ImageHandle,
    black: ImageHandle,
    uniforms: BufferHandle,
}

impl DefaultResources {
    /// Create and upload every default resource, recording into `cmd`.
    ///
    /// `cmd` must be recording. The data is in place once it has been submitted.
    pub fn new(device: &mut GraphicsDevice, cmd: &mut CommandBufferResource) -> GraphicsResult<Self> {
        let white = create_texture(device, cmd, "default white", &WHITE)?;
        let black = create_texture(device, cmd, "default black", &BLACK)?;

        let uniforms = device.create_buffer(
            BufferDescriptor::new(BufferUsage::UNIFORM, ResidencyPattern::Static)
                .with_label("default uniforms"),
        );
        let zeroed: DefaultUniforms = bytemuck::Zeroable::zeroed();
        device.add_write_segment(uniforms, bytemuck::bytes_of(&zeroed).to_vec(), 0)?;
        device.commit_writes(cmd, uniforms)?;

        log::debug!("Created default resources");
        Ok(Self {
            white,
            black,
            uniforms,
        })
    }

    /// 1×1 opaque white texture.
    pub fn white_texture(&self) -> ImageHandle {
        self.white
    }

    /// 1×1 opaque black texture.
    pub fn black_texture(&self) -> ImageHandle {
        self.black
    }

    /// Zeroed [`DefaultUniforms`] buffer.
    pub fn uniform_buffer(&self) -> BufferHandle {
        self.uniforms
    }

    /// Destroy every default resource once `cmd`'s submission has completed.
    pub fn destroy(
        self,
        device: &mut GraphicsDevice,
        cmd: &mut CommandBufferResource,
    ) -> GraphicsResult<()> {
        device.destroy_image(cmd, self.white)?;
        device.destroy_image(cmd, self.black)?;
        device.destroy_buffer(cmd, self.uniforms)
    }
}

fn create_texture(
    device: &mut GraphicsDevice,
    cmd: &mut CommandBufferResource,
    label: &str,
    texel: &[u8; 4],
) -> GraphicsResult<ImageHandle> {
    let handle = device.create_image(
        ImageDescriptor::new_2d(
            1,
            1,
            TextureFormat::Rgba8Unorm,
            TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST | TextureUsage::COPY_SRC,
        )
        .with_label(label),
    )?;
    device.set_image_data(cmd, handle, texel, 0)?;
    Ok(handle)
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyContext;
    use crate::config::DeviceConfig;
    use crate::types::{ImageLayout, SubresourceRange};

    #[test]
    fn test_default_resources_contents() {
        let context = DummyContext::new();
        let mut device = GraphicsDevice::new(context.clone(), DeviceConfig::default()).unwrap();
        let mut cmd = device.create_command_buffer(None).unwrap();
        cmd.begin().unwrap();

        let defaults = DefaultResources::new(&mut device, &mut cmd).unwrap();
        cmd.end().unwrap();
        cmd.submit().unwrap();
        cmd.wait().unwrap();

        assert_eq!(
            device.read_image_data(defaults.white_texture()).unwrap(),
            WHITE.to_vec()
        );
        assert_eq!(
            device.read_image_data(defaults.black_texture()).unwrap(),
            BLACK.to_vec()
        );
        assert_eq!(
            device
                .get_layout(defaults.white_texture(), &SubresourceRange::single(0, 0))
                .unwrap(),
            Some(ImageLayout::ShaderReadOnly)
        );

        let uniforms = device.read_buffer_data(defaults.uniform_buffer()).unwrap();
        assert_eq!(uniforms.len(), std::mem::size_of::<DefaultUniforms>());
        assert!(uniforms.iter().all(|&b| b == 0));

        cmd.prepare_for_recording().unwrap();
        cmd.begin().unwrap();
        defaults.destroy(&mut device, &mut cmd).unwrap();
        cmd.end().unwrap();
        cmd.submit().unwrap();
        cmd.prepare_for_recording().unwrap();

        assert_eq!(device.live_resources(), (0, 0, 0));
        assert_eq!(context.stats().live_images, 0);
        assert!(context.validation_errors().is_empty());
    }
}
