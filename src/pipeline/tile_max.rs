//! TileMax reduction: per-tile signed (min, max) CoC bounds.
//!
//! Two passes, one axis each, so the cost per output texel stays O(tileSize)
//! instead of O(tileSize²). Both passes read with `textureLoad`: a hard max
//! over exact texel values, never a filtered blend.

use super::pass::{self, FullscreenVertex, FULLSCREEN_VS_WGSL, TILE_BUFFER_FORMAT};

/// Tile edge length in pixels for a given maximum blur radius: the smallest
/// multiple of 8 covering the radius.
pub fn tile_size(max_blur_px: f32) -> u32 {
    let needed = max_blur_px.ceil().max(1.0) as u32;
    needed.div_ceil(8).max(1) * 8
}

/// Output grid dimensions for a tile reduction over a map of the given size.
pub fn tile_grid(width: u32, height: u32, tile: u32) -> (u32, u32) {
    (width.div_ceil(tile), height.div_ceil(tile))
}

/// Tile reduction uniform data.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TileMaxUniform {
    /// tile_size, input_width, input_height, unused
    pub params: [u32; 4],
}

/// Two-pass tile reduction over the CoC channel.
///
/// The horizontal pass reads the packed color+CoC buffer (alpha channel) and
/// emits `(ceil(w/tile), h)` signed (min, max) pairs; the vertical pass folds
/// those into the final `(ceil(w/tile), ceil(h/tile))` grid.
pub struct TileMaxPass {
    horizontal_pipeline: Option<wgpu::RenderPipeline>,
    vertical_pipeline: Option<wgpu::RenderPipeline>,
    bind_group_layout: Option<wgpu::BindGroupLayout>,
    horizontal_uniform: Option<wgpu::Buffer>,
    vertical_uniform: Option<wgpu::Buffer>,
}

impl TileMaxPass {
    /// Create an uninitialized pass.
    pub fn new() -> Self {
        Self {
            horizontal_pipeline: None,
            vertical_pipeline: None,
            bind_group_layout: None,
            horizontal_uniform: None,
            vertical_uniform: None,
        }
    }

    /// Initialize GPU resources.
    pub fn init(&mut self, device: &wgpu::Device) {
        let uniform_desc = wgpu::BufferDescriptor {
            label: Some("DoF TileMax Uniform Buffer"),
            size: std::mem::size_of::<TileMaxUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        };
        self.horizontal_uniform = Some(device.create_buffer(&uniform_desc));
        self.vertical_uniform = Some(device.create_buffer(&uniform_desc));

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("DoF TileMax Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("DoF TileMax Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("DoF TileMax Shader"),
            source: wgpu::ShaderSource::Wgsl(
                format!("{}{}", FULLSCREEN_VS_WGSL, TILE_MAX_FS_WGSL).into(),
            ),
        });

        let make_pipeline = |entry: &str, label: &str| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some("vs_main"),
                    buffers: &[FullscreenVertex::layout()],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some(entry),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: TILE_BUFFER_FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        };

        self.horizontal_pipeline = Some(make_pipeline("fs_horizontal", "DoF TileMax H Pipeline"));
        self.vertical_pipeline = Some(make_pipeline("fs_vertical", "DoF TileMax V Pipeline"));
        self.bind_group_layout = Some(bind_group_layout);
    }

    /// Release GPU resources.
    pub fn shutdown(&mut self) {
        self.horizontal_pipeline = None;
        self.vertical_pipeline = None;
        self.bind_group_layout = None;
        self.horizontal_uniform = None;
        self.vertical_uniform = None;
    }

    /// Run both reduction passes.
    ///
    /// `coc_input` is the packed color+CoC buffer of size `(width, height)`;
    /// `intermediate` must be `(ceil(w/tile), h)` and `output`
    /// `(ceil(w/tile), ceil(h/tile))`, both [`TILE_BUFFER_FORMAT`].
    #[allow(clippy::too_many_arguments)]
    pub fn render(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        coc_input: &wgpu::TextureView,
        intermediate: &wgpu::TextureView,
        output: &wgpu::TextureView,
        quad_buffer: &wgpu::Buffer,
        width: u32,
        height: u32,
        tile: u32,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) {
        let (Some(h_pipeline), Some(v_pipeline), Some(layout)) = (
            self.horizontal_pipeline.as_ref(),
            self.vertical_pipeline.as_ref(),
            self.bind_group_layout.as_ref(),
        ) else {
            return;
        };
        let (Some(h_uniform), Some(v_uniform)) = (
            self.horizontal_uniform.as_ref(),
            self.vertical_uniform.as_ref(),
        ) else {
            return;
        };

        let uniform = TileMaxUniform { params: [tile, width, height, 0] };
        queue.write_buffer(h_uniform, 0, bytemuck::cast_slice(&[uniform]));
        let (grid_w, _) = tile_grid(width, height, tile);
        let uniform = TileMaxUniform { params: [tile, grid_w, height, 0] };
        queue.write_buffer(v_uniform, 0, bytemuck::cast_slice(&[uniform]));

        let make_bind_group = |input: &wgpu::TextureView, uniform: &wgpu::Buffer| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("DoF TileMax Bind Group"),
                layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(input),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: uniform.as_entire_binding(),
                    },
                ],
            })
        };

        {
            let bind_group = make_bind_group(coc_input, h_uniform);
            let mut pass = pass::begin_target_pass(encoder, "DoF TileMax H Pass", intermediate);
            pass.set_pipeline(h_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_vertex_buffer(0, quad_buffer.slice(..));
            pass.draw(0..6, 0..1);
        }

        {
            let bind_group = make_bind_group(intermediate, v_uniform);
            let mut pass = pass::begin_target_pass(encoder, "DoF TileMax V Pass", output);
            pass.set_pipeline(v_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_vertex_buffer(0, quad_buffer.slice(..));
            pass.draw(0..6, 0..1);
        }
    }
}

impl Default for TileMaxPass {
    fn default() -> Self {
        Self::new()
    }
}

const TILE_MAX_FS_WGSL: &str = r#"
struct Params {
    // tile_size, input_width, input_height, unused
    params: vec4<u32>,
}

@group(0) @binding(0) var input_texture: texture_2d<f32>;
@group(0) @binding(1) var<uniform> params: Params;

// Horizontal reduction: the CoC lives in the input's alpha channel.
@fragment
fn fs_horizontal(in: VertexOutput) -> @location(0) vec2<f32> {
    let tile = params.params.x;
    let input_width = params.params.y;
    let out_pixel = vec2<u32>(in.position.xy);
    let base_x = out_pixel.x * tile;

    var coc_min = 0.0;
    var coc_max = 0.0;
    for (var i = 0u; i < tile; i++) {
        let x = min(base_x + i, input_width - 1u);
        let coc = textureLoad(input_texture, vec2<i32>(i32(x), i32(out_pixel.y)), 0).a;
        coc_min = min(coc_min, coc);
        coc_max = max(coc_max, coc);
    }
    return vec2<f32>(coc_min, coc_max);
}

// Vertical reduction over the horizontal pass output (rg = min, max).
@fragment
fn fs_vertical(in: VertexOutput) -> @location(0) vec2<f32> {
    let tile = params.params.x;
    let input_height = params.params.z;
    let out_pixel = vec2<u32>(in.position.xy);
    let base_y = out_pixel.y * tile;

    var coc_min = 0.0;
    var coc_max = 0.0;
    for (var i = 0u; i < tile; i++) {
        let y = min(base_y + i, input_height - 1u);
        let pair = textureLoad(input_texture, vec2<i32>(i32(out_pixel.x), i32(y)), 0).rg;
        coc_min = min(coc_min, pair.x);
        coc_max = max(coc_max, pair.y);
    }
    return vec2<f32>(coc_min, coc_max);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_size_rounds_up_to_multiple_of_8() {
        assert_eq!(tile_size(37.0), 40);
        assert_eq!(tile_size(40.0), 40);
        assert_eq!(tile_size(41.0), 48);
        assert_eq!(tile_size(1.0), 8);
        assert_eq!(tile_size(0.0), 8);
        for px in 1..200 {
            let ts = tile_size(px as f32);
            assert_eq!(ts % 8, 0);
            assert!(ts >= px);
        }
    }

    #[test]
    fn test_tile_grid_covers_input() {
        assert_eq!(tile_grid(512, 512, 8), (64, 64));
        assert_eq!(tile_grid(513, 510, 8), (65, 64));
        let (gw, gh) = tile_grid(1920, 1080, 40);
        assert!(gw * 40 >= 1920 && gh * 40 >= 1080);
    }
}
