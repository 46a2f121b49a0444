// gpu/image.rs — Single-channel 2-D device images.
//
// `Image2D<T>` is an R32Float (T = f32) or R32Sint (T = i32) texture with
// usages for every role the pipelines need: sampled input (`texture_2d`),
// storage output (`texture_storage_2d<.., write>`), upload and read-back.
// Kernels that read one image and write another always get two distinct
// textures (see `Session::allocate_image_pair`).
//
// Texture copies to buffers need rows padded to
// COPY_BYTES_PER_ROW_ALIGNMENT (256 bytes); `Session::read_2d_image` strips
// the padding again. Uploads go through `Queue::write_texture`, which has no
// such requirement.

use std::marker::PhantomData;

use crate::field::Sample;

/// Element types an `Image2D` can hold.
pub trait Texel: Sample {
    const FORMAT: wgpu::TextureFormat;
}

impl Texel for f32 {
    const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;
}

impl Texel for i32 {
    const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Sint;
}

pub(crate) const IMAGE_USAGES: wgpu::TextureUsages = wgpu::TextureUsages::TEXTURE_BINDING
    .union(wgpu::TextureUsages::STORAGE_BINDING)
    .union(wgpu::TextureUsages::COPY_SRC)
    .union(wgpu::TextureUsages::COPY_DST);

/// A width × height single-channel device image of `T`.
pub struct Image2D<T: Texel> {
    pub(crate) texture: wgpu::Texture,
    pub(crate) view: wgpu::TextureView,
    width: u32,
    height: u32,
    _marker: PhantomData<T>,
}

impl<T: Texel> Image2D<T> {
    pub(crate) fn new(device: &wgpu::Device, width: u32, height: u32, label: &str) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: T::FORMAT,
            usage: IMAGE_USAGES,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Image2D { texture, view, width, height, _marker: PhantomData }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub(crate) fn extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d { width: self.width, height: self.height, depth_or_array_layers: 1 }
    }

    pub(crate) fn copy_target(&self) -> wgpu::ImageCopyTexture<'_> {
        wgpu::ImageCopyTexture {
            texture: &self.texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        }
    }
}

/// Round `value` up to the next multiple of `alignment`.
#[inline]
pub(crate) fn align_to(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}
