//! NeighborMax filter: dilates the TileMax grid by one tile in every
//! direction so a kernel centered near a tile border still sees the bound of
//! any tile it can reach into.

use super::pass::{self, FullscreenVertex, FULLSCREEN_VS_WGSL, TILE_BUFFER_FORMAT};

/// NeighborMax uniform data.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct NeighborMaxUniform {
    /// grid_width, grid_height, unused, unused
    pub params: [u32; 4],
}

/// 3×3 dilation over the TileMax grid.
pub struct NeighborMaxPass {
    pipeline: Option<wgpu::RenderPipeline>,
    bind_group_layout: Option<wgpu::BindGroupLayout>,
    uniform_buffer: Option<wgpu::Buffer>,
}

impl NeighborMaxPass {
    /// Create an uninitialized pass.
    pub fn new() -> Self {
        Self {
            pipeline: None,
            bind_group_layout: None,
            uniform_buffer: None,
        }
    }

    /// Initialize GPU resources.
    pub fn init(&mut self, device: &wgpu::Device) {
        self.uniform_buffer = Some(device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("DoF NeighborMax Uniform Buffer"),
            size: std::mem::size_of::<NeighborMaxUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }));

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("DoF NeighborMax Bind Group Layout"),
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
            label: Some("DoF NeighborMax Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("DoF NeighborMax Shader"),
            source: wgpu::ShaderSource::Wgsl(
                format!("{}{}", FULLSCREEN_VS_WGSL, NEIGHBOR_MAX_FS_WGSL).into(),
            ),
        });

        self.pipeline = Some(device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("DoF NeighborMax Pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[FullscreenVertex::layout()],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
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
        }));

        self.bind_group_layout = Some(bind_group_layout);
    }

    /// Release GPU resources.
    pub fn shutdown(&mut self) {
        self.pipeline = None;
        self.bind_group_layout = None;
        self.uniform_buffer = None;
    }

    /// Dilate the `(grid_w, grid_h)` TileMax grid into `output`.
    pub fn render(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        tile_max: &wgpu::TextureView,
        output: &wgpu::TextureView,
        quad_buffer: &wgpu::Buffer,
        grid_w: u32,
        grid_h: u32,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) {
        let (Some(pipeline), Some(layout), Some(uniform_buffer)) = (
            self.pipeline.as_ref(),
            self.bind_group_layout.as_ref(),
            self.uniform_buffer.as_ref(),
        ) else {
            return;
        };

        let uniform = NeighborMaxUniform { params: [grid_w, grid_h, 0, 0] };
        queue.write_buffer(uniform_buffer, 0, bytemuck::cast_slice(&[uniform]));

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("DoF NeighborMax Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(tile_max),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: uniform_buffer.as_entire_binding(),
                },
            ],
        });

        let mut pass = pass::begin_target_pass(encoder, "DoF NeighborMax Pass", output);
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.set_vertex_buffer(0, quad_buffer.slice(..));
        pass.draw(0..6, 0..1);
    }
}

impl Default for NeighborMaxPass {
    fn default() -> Self {
        Self::new()
    }
}

const NEIGHBOR_MAX_FS_WGSL: &str = r#"
struct Params {
    // grid_width, grid_height, unused, unused
    params: vec4<u32>,
}

@group(0) @binding(0) var tile_texture: texture_2d<f32>;
@group(0) @binding(1) var<uniform> params: Params;

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec2<f32> {
    let grid = vec2<i32>(i32(params.params.x), i32(params.params.y));
    let center = vec2<i32>(in.position.xy);

    var coc_min = 0.0;
    var coc_max = 0.0;
    for (var dy = -1; dy <= 1; dy++) {
        for (var dx = -1; dx <= 1; dx++) {
            let coord = clamp(center + vec2<i32>(dx, dy), vec2<i32>(0, 0), grid - vec2<i32>(1, 1));
            let pair = textureLoad(tile_texture, coord, 0).rg;
            coc_min = min(coc_min, pair.x);
            coc_max = max(coc_max, pair.y);
        }
    }
    return vec2<f32>(coc_min, coc_max);
}
"#;
