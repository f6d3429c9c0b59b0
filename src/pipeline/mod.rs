//! The multi-pass depth-of-field pipeline.
//!
//! Every frame starts with CoC estimation and ends with the composite; in
//! between runs either the gather strategy (downsample, TileMax, NeighborMax,
//! disk-kernel synthesis) or the hexagonal strategy, or the visualize
//! shortcut. Each invocation is a pure function of its buffers and parameters;
//! every intermediate buffer is checked out of the scratch pool and returned
//! before `render` comes back.

pub mod coc;
pub mod composite;
pub mod downsample;
pub mod gather;
pub mod hexblur;
pub mod neighbor_max;
pub mod pass;
pub mod pool;
pub mod tile_max;

use thiserror::Error;
use wgpu::util::DeviceExt;

use crate::lens;
use crate::settings::{BlurMethod, CameraInfo, DofSettings};

use coc::{CocPass, CocUniform};
use composite::{CompositePass, CompositeUniform};
use downsample::{DownsamplePass, DownsampleUniform};
use gather::{GatherPass, GatherUniform};
use hexblur::HexBlurPass;
use neighbor_max::NeighborMaxPass;
use pass::{COC_BUFFER_FORMAT, FULLSCREEN_QUAD_VERTICES, TILE_BUFFER_FORMAT};
use pool::{ScratchTexture, TexturePool};
use tile_max::{tile_grid, tile_size, TileMaxPass};

/// Errors that can abort a depth-of-field invocation.
///
/// A failed frame produces no output; the caller should present the
/// unmodified source rather than treat this as fatal.
#[derive(Error, Debug)]
pub enum DofError {
    /// A scratch format is not renderable on this device.
    #[error("scratch texture format {0:?} is not renderable on this device")]
    UnsupportedFormat(wgpu::TextureFormat),

    /// The scratch pool budget cannot cover another allocation.
    #[error("scratch pool exhausted: {requested} more bytes over a {budget} byte budget")]
    PoolExhausted {
        /// Bytes the rejected allocation needed.
        requested: u64,
        /// Configured pool budget in bytes.
        budget: u64,
    },
}

/// The depth-of-field post-processing pipeline.
///
/// Owns the lazily-created GPU resources (pipelines, samplers, scratch pool)
/// but no persistent image data; `render` is stateless given its inputs.
/// Resources are created on first use or by an explicit [`DofPipeline::init`],
/// and torn down by [`DofPipeline::shutdown`].
pub struct DofPipeline {
    width: u32,
    height: u32,
    pool: TexturePool,
    quad_buffer: Option<wgpu::Buffer>,
    coc: CocPass,
    downsample: DownsamplePass,
    tile_max: TileMaxPass,
    neighbor_max: NeighborMaxPass,
    gather: GatherPass,
    hexblur: HexBlurPass,
    composite: CompositePass,
    initialized: bool,
}

impl DofPipeline {
    /// Create a pipeline for a frame of the given size, compositing into
    /// destination buffers of `dest_format`.
    pub fn new(width: u32, height: u32, dest_format: wgpu::TextureFormat) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            pool: TexturePool::new(),
            quad_buffer: None,
            coc: CocPass::new(),
            downsample: DownsamplePass::new(),
            tile_max: TileMaxPass::new(),
            neighbor_max: NeighborMaxPass::new(),
            gather: GatherPass::new(),
            hexblur: HexBlurPass::new(),
            composite: CompositePass::new(dest_format),
            initialized: false,
        }
    }

    /// Cap scratch texture memory; requests past the budget fail the frame
    /// with [`DofError::PoolExhausted`].
    pub fn with_pool_budget(mut self, budget_bytes: u64) -> Self {
        self.pool = TexturePool::with_budget(budget_bytes);
        self
    }

    /// Create all GPU resources. Idempotent; also invoked lazily by the first
    /// `render` call.
    pub fn init(&mut self, device: &wgpu::Device) {
        if self.initialized {
            return;
        }
        log::debug!("dof: initializing pipelines ({}x{})", self.width, self.height);

        self.quad_buffer = Some(device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("DoF Quad Buffer"),
            contents: bytemuck::cast_slice(&FULLSCREEN_QUAD_VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        }));

        self.coc.init(device);
        self.downsample.init(device);
        self.tile_max.init(device);
        self.neighbor_max.init(device);
        self.gather.init(device, Default::default());
        self.hexblur.init(device);
        self.composite.init(device);
        self.initialized = true;
    }

    /// Tear down every GPU resource, including pooled scratch textures.
    pub fn shutdown(&mut self) {
        self.coc.shutdown();
        self.downsample.shutdown();
        self.tile_max.shutdown();
        self.neighbor_max.shutdown();
        self.gather.shutdown();
        self.hexblur.shutdown();
        self.composite.shutdown();
        self.quad_buffer = None;
        self.pool.clear();
        self.initialized = false;
    }

    /// Adapt to a new frame size. Scratch buffers are sized per invocation,
    /// so no resources need recreating here.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.width = width;
            self.height = height;
        }
    }

    /// Frame dimensions.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Change the destination format; pipelines targeting it are rebuilt.
    pub fn set_dest_format(&mut self, format: wgpu::TextureFormat, device: &wgpu::Device) {
        self.composite.set_output_format(format, device);
    }

    /// Run the pipeline for one frame.
    ///
    /// `source` is the scene color, `depth` linear view-space distance
    /// (`R32Float`), `destination` the buffer to composite into. On error the
    /// destination is untouched.
    #[allow(clippy::too_many_arguments)]
    pub fn render(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        source: &wgpu::TextureView,
        depth: &wgpu::TextureView,
        destination: &wgpu::TextureView,
        settings: &DofSettings,
        camera: &CameraInfo,
    ) -> Result<(), DofError> {
        self.init(device);

        let subject_distance = settings.focus.resolve(camera);
        let focal_length = settings.focal_length.resolve(camera);
        let lens_coeff = lens::lens_coefficient(subject_distance, focal_length, settings.f_number);
        let max_coc = lens::max_coc_radius(settings.quality, self.height);
        let quad = self.quad_buffer.as_ref().expect("initialized above");

        let coc_tex = self
            .pool
            .request(device, self.width, self.height, COC_BUFFER_FORMAT)?;

        let coc_uniform = CocUniform {
            params: [lens_coeff, subject_distance, max_coc, self.height as f32],
            masks: [
                if settings.near_blur { 1.0 } else { 0.0 },
                if settings.far_blur { 1.0 } else { 0.0 },
                0.0,
                0.0,
            ],
        };
        self.coc.render(
            encoder, source, depth, &coc_tex.view, quad, &coc_uniform, device, queue,
        );

        let composite_uniform = CompositeUniform {
            params: [max_coc, 0.0, 0.0, 0.0],
        };

        if settings.visualize_coc {
            self.composite.render_visualize(
                encoder,
                &coc_tex.view,
                destination,
                quad,
                &composite_uniform,
                device,
                queue,
            );
            self.pool.release(coc_tex);
            return Ok(());
        }

        let result = match settings.method {
            BlurMethod::Gather => self.render_gather(
                device,
                queue,
                encoder,
                &coc_tex,
                destination,
                settings,
                max_coc,
                &composite_uniform,
            ),
            BlurMethod::Hexagonal => self.render_hexagonal(
                device,
                queue,
                encoder,
                &coc_tex,
                destination,
                settings,
                &composite_uniform,
            ),
        };

        self.pool.release(coc_tex);
        result
    }

    /// Request a batch of scratch textures, releasing the whole batch if any
    /// allocation fails.
    fn request_batch(
        &mut self,
        device: &wgpu::Device,
        specs: &[(u32, u32, wgpu::TextureFormat)],
    ) -> Result<Vec<ScratchTexture>, DofError> {
        let mut scratch = Vec::with_capacity(specs.len());
        for &(w, h, format) in specs {
            match self.pool.request(device, w, h, format) {
                Ok(texture) => scratch.push(texture),
                Err(err) => {
                    for texture in scratch {
                        self.pool.release(texture);
                    }
                    return Err(err);
                }
            }
        }
        Ok(scratch)
    }

    #[allow(clippy::too_many_arguments)]
    fn render_gather(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        coc_tex: &ScratchTexture,
        destination: &wgpu::TextureView,
        settings: &DofSettings,
        max_coc: f32,
        composite_uniform: &CompositeUniform,
    ) -> Result<(), DofError> {
        self.gather.ensure_tier(device, settings.quality);

        let half_w = (self.width / 2).max(1);
        let half_h = (self.height / 2).max(1);
        // The synthesizer works in half-res pixels; so do its bounds.
        let half_max_coc = max_coc * 0.5;
        let tile = tile_size(half_max_coc);
        let (grid_w, grid_h) = tile_grid(half_w, half_h, tile);

        let scratch = self.request_batch(
            device,
            &[
                (half_w, half_h, COC_BUFFER_FORMAT),   // downsampled color+CoC
                (grid_w, half_h, TILE_BUFFER_FORMAT),  // horizontal reduction
                (grid_w, grid_h, TILE_BUFFER_FORMAT),  // tile max
                (grid_w, grid_h, TILE_BUFFER_FORMAT),  // neighbor max
                (half_w, half_h, COC_BUFFER_FORMAT),   // synthesized bokeh
            ],
        )?;
        let quad = self.quad_buffer.as_ref().expect("initialized");

        let downsample_uniform = DownsampleUniform {
            params: [0.5, 0.0, 0.0, 0.0],
        };
        self.downsample.render(
            encoder,
            &coc_tex.view,
            &scratch[0].view,
            quad,
            &downsample_uniform,
            device,
            queue,
        );

        self.tile_max.render(
            encoder,
            &scratch[0].view,
            &scratch[1].view,
            &scratch[2].view,
            quad,
            half_w,
            half_h,
            tile,
            device,
            queue,
        );

        self.neighbor_max.render(
            encoder,
            &scratch[2].view,
            &scratch[3].view,
            quad,
            grid_w,
            grid_h,
            device,
            queue,
        );

        let gather_uniform = GatherUniform {
            params: [
                half_max_coc,
                1.0 / half_w as f32,
                1.0 / half_h as f32,
                tile as f32,
            ],
        };
        self.gather.render(
            encoder,
            &scratch[0].view,
            &scratch[3].view,
            &scratch[4].view,
            quad,
            &gather_uniform,
            device,
            queue,
        );

        self.composite.render(
            encoder,
            &coc_tex.view,
            &scratch[4].view,
            destination,
            quad,
            composite_uniform,
            device,
            queue,
        );

        for texture in scratch {
            self.pool.release(texture);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn render_hexagonal(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        coc_tex: &ScratchTexture,
        destination: &wgpu::TextureView,
        settings: &DofSettings,
        composite_uniform: &CompositeUniform,
    ) -> Result<(), DofError> {
        let scratch = self.request_batch(
            device,
            &[
                (self.width, self.height, COC_BUFFER_FORMAT), // horizontal
                (self.width, self.height, COC_BUFFER_FORMAT), // skew left
                (self.width, self.height, COC_BUFFER_FORMAT), // skew right
                (self.width, self.height, COC_BUFFER_FORMAT), // combined
            ],
        )?;
        let quad = self.quad_buffer.as_ref().expect("initialized");

        self.hexblur.render(
            encoder,
            &coc_tex.view,
            &scratch[0].view,
            &scratch[1].view,
            &scratch[2].view,
            &scratch[3].view,
            quad,
            [1.0 / self.width as f32, 1.0 / self.height as f32],
            settings.sample_spacing,
            settings.quality.hex_step_count(),
            device,
            queue,
        );

        self.composite.render(
            encoder,
            &coc_tex.view,
            &scratch[3].view,
            destination,
            quad,
            composite_uniform,
            device,
            queue,
        );

        for texture in scratch {
            self.pool.release(texture);
        }
        Ok(())
    }
}
