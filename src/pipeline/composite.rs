//! Final composite: blends the sharp source toward the upsampled blur by CoC
//! magnitude, or renders the CoC map as false color in visualize mode.

use super::pass::{self, FullscreenVertex, FULLSCREEN_VS_WGSL};

/// Composite uniform data.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CompositeUniform {
    /// max_coc_px, unused, unused, unused
    pub params: [f32; 4],
}

/// Composite / visualize pass writing the caller's destination buffer.
pub struct CompositePass {
    composite_pipeline: Option<wgpu::RenderPipeline>,
    visualize_pipeline: Option<wgpu::RenderPipeline>,
    composite_layout: Option<wgpu::BindGroupLayout>,
    visualize_layout: Option<wgpu::BindGroupLayout>,
    uniform_buffer: Option<wgpu::Buffer>,
    sampler: Option<wgpu::Sampler>,
    output_format: wgpu::TextureFormat,
}

impl CompositePass {
    /// Create an uninitialized pass targeting the given destination format.
    pub fn new(output_format: wgpu::TextureFormat) -> Self {
        Self {
            composite_pipeline: None,
            visualize_pipeline: None,
            composite_layout: None,
            visualize_layout: None,
            uniform_buffer: None,
            sampler: None,
            output_format,
        }
    }

    /// Initialize GPU resources.
    pub fn init(&mut self, device: &wgpu::Device) {
        self.sampler = Some(device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("DoF Composite Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        }));

        self.uniform_buffer = Some(device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("DoF Composite Uniform Buffer"),
            size: std::mem::size_of::<CompositeUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }));

        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let sampler_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        };
        let uniform_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let composite_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("DoF Composite Bind Group Layout"),
            entries: &[
                texture_entry(0),
                texture_entry(1),
                sampler_entry(2),
                uniform_entry(3),
            ],
        });
        let visualize_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("DoF Visualize Bind Group Layout"),
            entries: &[texture_entry(0), sampler_entry(1), uniform_entry(2)],
        });

        let make_pipeline = |bind_layout: &wgpu::BindGroupLayout,
                             fs_source: &str,
                             label: &str| {
            let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[bind_layout],
                push_constant_ranges: &[],
            });
            let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(
                    format!("{}{}", FULLSCREEN_VS_WGSL, fs_source).into(),
                ),
            });
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
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: self.output_format,
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

        self.composite_pipeline = Some(make_pipeline(
            &composite_layout,
            COMPOSITE_FS_WGSL,
            "DoF Composite Pipeline",
        ));
        self.visualize_pipeline = Some(make_pipeline(
            &visualize_layout,
            VISUALIZE_FS_WGSL,
            "DoF Visualize Pipeline",
        ));
        self.composite_layout = Some(composite_layout);
        self.visualize_layout = Some(visualize_layout);
    }

    /// Recreate pipelines for a new destination format.
    pub fn set_output_format(&mut self, format: wgpu::TextureFormat, device: &wgpu::Device) {
        if self.output_format == format {
            return;
        }
        self.output_format = format;
        if self.composite_pipeline.is_some() {
            self.init(device);
        }
    }

    /// Release GPU resources.
    pub fn shutdown(&mut self) {
        self.composite_pipeline = None;
        self.visualize_pipeline = None;
        self.composite_layout = None;
        self.visualize_layout = None;
        self.uniform_buffer = None;
        self.sampler = None;
    }

    /// Blend sharp and blurred into the destination.
    #[allow(clippy::too_many_arguments)]
    pub fn render(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        coc_input: &wgpu::TextureView,
        blurred: &wgpu::TextureView,
        destination: &wgpu::TextureView,
        quad_buffer: &wgpu::Buffer,
        uniform: &CompositeUniform,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) {
        let (Some(pipeline), Some(layout), Some(uniform_buffer)) = (
            self.composite_pipeline.as_ref(),
            self.composite_layout.as_ref(),
            self.uniform_buffer.as_ref(),
        ) else {
            return;
        };

        queue.write_buffer(uniform_buffer, 0, bytemuck::cast_slice(&[*uniform]));

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("DoF Composite Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(coc_input),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(blurred),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(self.sampler.as_ref().unwrap()),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: uniform_buffer.as_entire_binding(),
                },
            ],
        });

        let mut pass = pass::begin_target_pass(encoder, "DoF Composite Pass", destination);
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.set_vertex_buffer(0, quad_buffer.slice(..));
        pass.draw(0..6, 0..1);
    }

    /// Render the CoC map as false color (red = in focus, green = far field,
    /// blue = near field) into the destination.
    pub fn render_visualize(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        coc_input: &wgpu::TextureView,
        destination: &wgpu::TextureView,
        quad_buffer: &wgpu::Buffer,
        uniform: &CompositeUniform,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) {
        let (Some(pipeline), Some(layout), Some(uniform_buffer)) = (
            self.visualize_pipeline.as_ref(),
            self.visualize_layout.as_ref(),
            self.uniform_buffer.as_ref(),
        ) else {
            return;
        };

        queue.write_buffer(uniform_buffer, 0, bytemuck::cast_slice(&[*uniform]));

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("DoF Visualize Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(coc_input),
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

        let mut pass = pass::begin_target_pass(encoder, "DoF Visualize Pass", destination);
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.set_vertex_buffer(0, quad_buffer.slice(..));
        pass.draw(0..6, 0..1);
    }
}

const COMPOSITE_FS_WGSL: &str = r#"
struct Params {
    // max_coc_px, unused, unused, unused
    params: vec4<f32>,
}

@group(0) @binding(0) var coc_texture: texture_2d<f32>;
@group(0) @binding(1) var blur_texture: texture_2d<f32>;
@group(0) @binding(2) var linear_sampler: sampler;
@group(0) @binding(3) var<uniform> params: Params;

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let packed = textureSampleLevel(coc_texture, linear_sampler, in.uv, 0.0);
    let sharp = packed.rgb;
    let coc = packed.a;

    // Bilinear upsample of the (possibly half-res) blur result.
    let blurred = textureSampleLevel(blur_texture, linear_sampler, in.uv, 0.0);

    // Defocus strength from the CoC magnitude normalized against this frame's
    // radius cap; fully blurred at half the cap. The synthesizer's foreground
    // coverage takes over when a nearer object spills over a sharp pixel.
    let n = abs(coc) / max(params.params.x, 1e-4);
    let strength = smoothstep(0.0, 0.5, n);
    let blend = max(strength, blurred.a);

    return vec4<f32>(mix(sharp, blurred.rgb, blend), 1.0);
}
"#;

const VISUALIZE_FS_WGSL: &str = r#"
struct Params {
    // max_coc_px, unused, unused, unused
    params: vec4<f32>,
}

@group(0) @binding(0) var coc_texture: texture_2d<f32>;
@group(0) @binding(1) var linear_sampler: sampler;
@group(0) @binding(2) var<uniform> params: Params;

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let coc = textureSampleLevel(coc_texture, linear_sampler, in.uv, 0.0).a;
    let n = coc / max(params.params.x, 1e-4);

    // red = in focus, green = far field, blue = near field.
    let red = saturate(1.0 - abs(n));
    let green = saturate(n);
    let blue = saturate(-n);
    return vec4<f32>(red, green, blue, 1.0);
}
"#;
