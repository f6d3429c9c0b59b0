//! CoC estimation pass: converts linear depth into a signed per-pixel circle
//! of confusion and packs it with the source color.

use super::pass::{self, FullscreenVertex, COC_BUFFER_FORMAT, FULLSCREEN_VS_WGSL};

/// CoC uniform data.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CocUniform {
    /// lens_coeff, subject_distance, max_coc_px, frame_height
    pub params: [f32; 4],
    /// near_mask, far_mask, unused, unused
    pub masks: [f32; 4],
}

/// Pass writing RGB = source color, A = signed CoC in full-resolution pixels.
pub struct CocPass {
    pipeline: Option<wgpu::RenderPipeline>,
    bind_group_layout: Option<wgpu::BindGroupLayout>,
    uniform_buffer: Option<wgpu::Buffer>,
    linear_sampler: Option<wgpu::Sampler>,
    point_sampler: Option<wgpu::Sampler>,
}

impl CocPass {
    /// Create an uninitialized pass.
    pub fn new() -> Self {
        Self {
            pipeline: None,
            bind_group_layout: None,
            uniform_buffer: None,
            linear_sampler: None,
            point_sampler: None,
        }
    }

    /// Initialize GPU resources.
    pub fn init(&mut self, device: &wgpu::Device) {
        self.linear_sampler = Some(device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("DoF CoC Linear Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        }));

        // Depth is a hard per-pixel quantity; never interpolate it.
        self.point_sampler = Some(device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("DoF CoC Point Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        }));

        self.uniform_buffer = Some(device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("DoF CoC Uniform Buffer"),
            size: std::mem::size_of::<CocUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }));

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("DoF CoC Bind Group Layout"),
            entries: &[
                // Scene color
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
                // Linear view-space depth
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
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
            label: Some("DoF CoC Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("DoF CoC Shader"),
            source: wgpu::ShaderSource::Wgsl(
                format!("{}{}", FULLSCREEN_VS_WGSL, COC_FS_WGSL).into(),
            ),
        });

        self.pipeline = Some(device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("DoF CoC Pipeline"),
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
                    format: COC_BUFFER_FORMAT,
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
        self.linear_sampler = None;
        self.point_sampler = None;
    }

    /// Estimate CoC for the frame, writing the packed color+CoC buffer.
    pub fn render(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        source: &wgpu::TextureView,
        depth: &wgpu::TextureView,
        output: &wgpu::TextureView,
        quad_buffer: &wgpu::Buffer,
        uniform: &CocUniform,
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

        queue.write_buffer(uniform_buffer, 0, bytemuck::cast_slice(&[*uniform]));

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("DoF CoC Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(source),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(depth),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(self.linear_sampler.as_ref().unwrap()),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(self.point_sampler.as_ref().unwrap()),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: uniform_buffer.as_entire_binding(),
                },
            ],
        });

        let mut pass = pass::begin_target_pass(encoder, "DoF CoC Pass", output);
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.set_vertex_buffer(0, quad_buffer.slice(..));
        pass.draw(0..6, 0..1);
    }
}

impl Default for CocPass {
    fn default() -> Self {
        Self::new()
    }
}

const COC_FS_WGSL: &str = r#"
struct Params {
    // lens_coeff, subject_distance, max_coc_px, frame_height
    params: vec4<f32>,
    // near_mask, far_mask, unused, unused
    masks: vec4<f32>,
}

@group(0) @binding(0) var scene_texture: texture_2d<f32>;
@group(0) @binding(1) var depth_texture: texture_2d<f32>;
@group(0) @binding(2) var linear_sampler: sampler;
@group(0) @binding(3) var point_sampler: sampler;
@group(0) @binding(4) var<uniform> params: Params;

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let lens_coeff = params.params.x;
    let subject_distance = params.params.y;
    let max_coc = params.params.z;
    let frame_height = params.params.w;

    let color = textureSampleLevel(scene_texture, linear_sampler, in.uv, 0.0).rgb;
    let depth = max(textureSampleLevel(depth_texture, point_sampler, in.uv, 0.0).r, 1e-4);

    // Signed CoC radius in pixels: negative = near field, positive = far.
    var coc = lens_coeff * (depth - subject_distance) / depth * frame_height;
    coc = coc * select(params.masks.y, params.masks.x, coc < 0.0);
    coc = clamp(coc, -max_coc, max_coc);

    return vec4<f32>(color, coc);
}
"#;
