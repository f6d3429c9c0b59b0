//! Half-resolution downsample of the packed color+CoC buffer.

use super::pass::{self, FullscreenVertex, COC_BUFFER_FORMAT, FULLSCREEN_VS_WGSL};

/// Downsample uniform data.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DownsampleUniform {
    /// coc_scale, unused, unused, unused
    pub params: [f32; 4],
}

/// Bilinear box-downsample pass. Rescales the packed CoC from full-resolution
/// pixels to output-resolution pixels so downstream distance tests stay in one
/// coordinate space.
pub struct DownsamplePass {
    pipeline: Option<wgpu::RenderPipeline>,
    bind_group_layout: Option<wgpu::BindGroupLayout>,
    uniform_buffer: Option<wgpu::Buffer>,
    sampler: Option<wgpu::Sampler>,
}

impl DownsamplePass {
    /// Create an uninitialized pass.
    pub fn new() -> Self {
        Self {
            pipeline: None,
            bind_group_layout: None,
            uniform_buffer: None,
            sampler: None,
        }
    }

    /// Initialize GPU resources.
    pub fn init(&mut self, device: &wgpu::Device) {
        // Bilinear filtering is required here: point sampling would alias the
        // blur input.
        self.sampler = Some(device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("DoF Downsample Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        }));

        self.uniform_buffer = Some(device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("DoF Downsample Uniform Buffer"),
            size: std::mem::size_of::<DownsampleUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }));

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("DoF Downsample Bind Group Layout"),
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
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
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
            label: Some("DoF Downsample Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("DoF Downsample Shader"),
            source: wgpu::ShaderSource::Wgsl(
                format!("{}{}", FULLSCREEN_VS_WGSL, DOWNSAMPLE_FS_WGSL).into(),
            ),
        });

        self.pipeline = Some(device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("DoF Downsample Pipeline"),
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
        self.sampler = None;
    }

    /// Downsample `input` into `output` (half the input resolution).
    pub fn render(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        input: &wgpu::TextureView,
        output: &wgpu::TextureView,
        quad_buffer: &wgpu::Buffer,
        uniform: &DownsampleUniform,
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
            label: Some("DoF Downsample Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(input),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(self.sampler.as_ref().unwrap()),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: uniform_buffer.as_entire_binding(),
                },
            ],
        });

        let mut pass = pass::begin_target_pass(encoder, "DoF Downsample Pass", output);
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.set_vertex_buffer(0, quad_buffer.slice(..));
        pass.draw(0..6, 0..1);
    }
}

impl Default for DownsamplePass {
    fn default() -> Self {
        Self::new()
    }
}

const DOWNSAMPLE_FS_WGSL: &str = r#"
struct Params {
    // coc_scale, unused, unused, unused
    params: vec4<f32>,
}

@group(0) @binding(0) var input_texture: texture_2d<f32>;
@group(0) @binding(1) var linear_sampler: sampler;
@group(0) @binding(2) var<uniform> params: Params;

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    // The bilinear tap sits at the corner shared by four source texels, so a
    // single fetch averages the 2x2 box.
    let sample = textureSampleLevel(input_texture, linear_sampler, in.uv, 0.0);
    return vec4<f32>(sample.rgb, sample.a * params.params.x);
}
"#;
