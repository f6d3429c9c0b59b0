//! Scoped scratch-texture pool.
//!
//! Every intermediate buffer in the pipeline is requested from this pool at
//! the start of an invocation and released back before it returns, so the
//! pipeline owns no persistent GPU memory beyond the free list itself.

use std::collections::HashMap;

use super::DofError;

/// Identity of a reusable scratch texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureKey {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Texture format.
    pub format: wgpu::TextureFormat,
}

/// A scratch texture checked out of the pool.
pub struct ScratchTexture {
    /// The texture.
    pub texture: wgpu::Texture,
    /// Default view over the whole texture.
    pub view: wgpu::TextureView,
    key: TextureKey,
}

impl ScratchTexture {
    /// Dimensions of this scratch texture.
    pub fn size(&self) -> (u32, u32) {
        (self.key.width, self.key.height)
    }
}

/// Pool of render-target scratch textures, keyed by size and format.
pub struct TexturePool {
    free: HashMap<TextureKey, Vec<wgpu::Texture>>,
    allocated_bytes: u64,
    budget_bytes: Option<u64>,
}

impl TexturePool {
    /// Create an unbounded pool.
    pub fn new() -> Self {
        Self {
            free: HashMap::new(),
            allocated_bytes: 0,
            budget_bytes: None,
        }
    }

    /// Create a pool that refuses to allocate past `budget_bytes` of texture
    /// memory. Requests beyond the budget fail with [`DofError::PoolExhausted`]
    /// so the caller can skip post-processing for the frame.
    pub fn with_budget(budget_bytes: u64) -> Self {
        Self {
            free: HashMap::new(),
            allocated_bytes: 0,
            budget_bytes: Some(budget_bytes),
        }
    }

    /// Bytes currently held by pooled textures (free and checked out).
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes
    }

    /// Check out a scratch texture, reusing a pooled one when available.
    pub fn request(
        &mut self,
        device: &wgpu::Device,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) -> Result<ScratchTexture, DofError> {
        let key = TextureKey { width, height, format };

        if let Some(texture) = self.free.get_mut(&key).and_then(Vec::pop) {
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            return Ok(ScratchTexture { texture, view, key });
        }

        let features = format.guaranteed_format_features(device.features());
        if !features
            .allowed_usages
            .contains(wgpu::TextureUsages::RENDER_ATTACHMENT)
        {
            return Err(DofError::UnsupportedFormat(format));
        }

        let bytes = texture_bytes(width, height, format);
        if let Some(budget) = self.budget_bytes {
            if self.allocated_bytes + bytes > budget {
                return Err(DofError::PoolExhausted {
                    requested: bytes,
                    budget,
                });
            }
        }

        log::debug!("pool: allocating {}x{} {:?} ({} bytes)", width, height, format, bytes);
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("DoF Scratch Texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            // COPY_SRC so scratch contents can be read back for debugging.
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        self.allocated_bytes += bytes;

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(ScratchTexture { texture, view, key })
    }

    /// Return a scratch texture to the free list for reuse.
    pub fn release(&mut self, scratch: ScratchTexture) {
        self.free.entry(scratch.key).or_default().push(scratch.texture);
    }

    /// Drop every free pooled texture. Checked-out textures stay counted
    /// against the budget until they are released back and cleared in turn.
    pub fn clear(&mut self) {
        for (key, textures) in self.free.drain() {
            let bytes = texture_bytes(key.width, key.height, key.format);
            self.allocated_bytes = self
                .allocated_bytes
                .saturating_sub(bytes * textures.len() as u64);
        }
    }
}

impl Default for TexturePool {
    fn default() -> Self {
        Self::new()
    }
}

/// Estimated GPU memory of a single-mip 2D texture.
pub fn texture_bytes(width: u32, height: u32, format: wgpu::TextureFormat) -> u64 {
    let per_pixel = format.block_copy_size(None).unwrap_or(4) as u64;
    width as u64 * height as u64 * per_pixel
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texture_bytes_per_format() {
        assert_eq!(texture_bytes(4, 4, wgpu::TextureFormat::Rgba16Float), 4 * 4 * 8);
        assert_eq!(texture_bytes(4, 4, wgpu::TextureFormat::Rg16Float), 4 * 4 * 4);
        assert_eq!(texture_bytes(4, 4, wgpu::TextureFormat::Rgba8Unorm), 4 * 4 * 4);
    }

    #[test]
    fn test_key_equality_by_shape() {
        let a = TextureKey { width: 8, height: 8, format: wgpu::TextureFormat::Rg16Float };
        let b = TextureKey { width: 8, height: 8, format: wgpu::TextureFormat::Rg16Float };
        let c = TextureKey { width: 8, height: 4, format: wgpu::TextureFormat::Rg16Float };
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
