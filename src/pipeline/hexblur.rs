//! Separable hexagonal-aperture bokeh synthesis.
//!
//! Three directional gated blurs (horizontal, then two verticals skewed ±30°
//! off axis, both reading the horizontal result) whose min-combined union
//! approximates a hexagonal aperture (McIntosh's polygonal-aperture method).
//! Runs at full resolution; cheaper and less physically accurate than the
//! gather strategy.

use crate::kernel;

use super::pass::{self, FullscreenVertex, COC_BUFFER_FORMAT, FULLSCREEN_VS_WGSL};

/// Directional blur uniform data.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct HexBlurUniform {
    /// 1/width, 1/height, sample_spacing, step_count
    pub params: [f32; 4],
    /// Two displacement directions (xy, zw), walked outward from the center.
    pub directions: [f32; 4],
}

/// The three directional passes plus the min-combine pass.
pub struct HexBlurPass {
    blur_pipeline: Option<wgpu::RenderPipeline>,
    combine_pipeline: Option<wgpu::RenderPipeline>,
    blur_layout: Option<wgpu::BindGroupLayout>,
    combine_layout: Option<wgpu::BindGroupLayout>,
    // One uniform buffer per directional pass; they all land in the same
    // submission, so they cannot share one buffer.
    direction_uniforms: Vec<wgpu::Buffer>,
    sampler: Option<wgpu::Sampler>,
}

impl HexBlurPass {
    /// Create an uninitialized pass.
    pub fn new() -> Self {
        Self {
            blur_pipeline: None,
            combine_pipeline: None,
            blur_layout: None,
            combine_layout: None,
            direction_uniforms: Vec::new(),
            sampler: None,
        }
    }

    /// Initialize GPU resources.
    pub fn init(&mut self, device: &wgpu::Device) {
        self.sampler = Some(device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("DoF Hex Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        }));

        self.direction_uniforms = (0..3)
            .map(|_| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("DoF Hex Uniform Buffer"),
                    size: std::mem::size_of::<HexBlurUniform>() as u64,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            })
            .collect();

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

        let blur_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("DoF Hex Blur Bind Group Layout"),
            entries: &[
                texture_entry(0),
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

        let combine_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("DoF Hex Combine Bind Group Layout"),
            entries: &[
                texture_entry(0),
                texture_entry(1),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let blur_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("DoF Hex Blur Pipeline Layout"),
            bind_group_layouts: &[&blur_layout],
            push_constant_ranges: &[],
        });
        let combine_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("DoF Hex Combine Pipeline Layout"),
                bind_group_layouts: &[&combine_layout],
                push_constant_ranges: &[],
            });

        let blur_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("DoF Hex Blur Shader"),
            source: wgpu::ShaderSource::Wgsl(
                format!("{}{}", FULLSCREEN_VS_WGSL, HEX_BLUR_FS_WGSL).into(),
            ),
        });
        let combine_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("DoF Hex Combine Shader"),
            source: wgpu::ShaderSource::Wgsl(
                format!("{}{}", FULLSCREEN_VS_WGSL, HEX_COMBINE_FS_WGSL).into(),
            ),
        });

        let make_pipeline = |layout: &wgpu::PipelineLayout,
                             shader: &wgpu::ShaderModule,
                             label: &str| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(layout),
                vertex: wgpu::VertexState {
                    module: shader,
                    entry_point: Some("vs_main"),
                    buffers: &[FullscreenVertex::layout()],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: shader,
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
            })
        };

        self.blur_pipeline = Some(make_pipeline(
            &blur_pipeline_layout,
            &blur_shader,
            "DoF Hex Blur Pipeline",
        ));
        self.combine_pipeline = Some(make_pipeline(
            &combine_pipeline_layout,
            &combine_shader,
            "DoF Hex Combine Pipeline",
        ));
        self.blur_layout = Some(blur_layout);
        self.combine_layout = Some(combine_layout);
    }

    /// Release GPU resources.
    pub fn shutdown(&mut self) {
        self.blur_pipeline = None;
        self.combine_pipeline = None;
        self.blur_layout = None;
        self.combine_layout = None;
        self.direction_uniforms.clear();
        self.sampler = None;
    }

    /// Run the full hexagonal sequence:
    /// horizontal into `rt1`, skewed blurs of `rt1` into `rt2`/`rt3`, then the
    /// per-channel min of those into `output`.
    #[allow(clippy::too_many_arguments)]
    pub fn render(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        coc_input: &wgpu::TextureView,
        rt1: &wgpu::TextureView,
        rt2: &wgpu::TextureView,
        rt3: &wgpu::TextureView,
        output: &wgpu::TextureView,
        quad_buffer: &wgpu::Buffer,
        texel: [f32; 2],
        sample_spacing: f32,
        step_count: u32,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) {
        let (Some(blur_pipeline), Some(combine_pipeline)) =
            (self.blur_pipeline.as_ref(), self.combine_pipeline.as_ref())
        else {
            return;
        };
        let (Some(blur_layout), Some(combine_layout), Some(sampler)) = (
            self.blur_layout.as_ref(),
            self.combine_layout.as_ref(),
            self.sampler.as_ref(),
        ) else {
            return;
        };
        if self.direction_uniforms.len() != 3 {
            return;
        }

        let directions = kernel::hex_blur_directions();
        for (buffer, dir) in self.direction_uniforms.iter().zip(directions) {
            let uniform = HexBlurUniform {
                params: [texel[0], texel[1], sample_spacing, step_count as f32],
                directions: dir,
            };
            queue.write_buffer(buffer, 0, bytemuck::cast_slice(&[uniform]));
        }

        let blur_bind_group = |input: &wgpu::TextureView, uniform: &wgpu::Buffer| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("DoF Hex Blur Bind Group"),
                layout: blur_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(input),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(sampler),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: uniform.as_entire_binding(),
                    },
                ],
            })
        };

        let stages = [
            (coc_input, rt1, 0, "DoF Hex H Pass"),
            (rt1, rt2, 1, "DoF Hex Skew L Pass"),
            (rt1, rt3, 2, "DoF Hex Skew R Pass"),
        ];
        for (input, target, dir_index, label) in stages {
            let bind_group = blur_bind_group(input, &self.direction_uniforms[dir_index]);
            let mut pass = pass::begin_target_pass(encoder, label, target);
            pass.set_pipeline(blur_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_vertex_buffer(0, quad_buffer.slice(..));
            pass.draw(0..6, 0..1);
        }

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("DoF Hex Combine Bind Group"),
            layout: combine_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(rt2),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(rt3),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        });
        let mut pass = pass::begin_target_pass(encoder, "DoF Hex Combine Pass", output);
        pass.set_pipeline(combine_pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.set_vertex_buffer(0, quad_buffer.slice(..));
        pass.draw(0..6, 0..1);
    }
}

impl Default for HexBlurPass {
    fn default() -> Self {
        Self::new()
    }
}

const HEX_BLUR_FS_WGSL: &str = r#"
struct Params {
    // 1/width, 1/height, sample_spacing, step_count
    params: vec4<f32>,
    // two displacement directions (xy, zw)
    directions: vec4<f32>,
}

@group(0) @binding(0) var input_texture: texture_2d<f32>;
@group(0) @binding(1) var linear_sampler: sampler;
@group(0) @binding(2) var<uniform> params: Params;

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let texel = params.params.xy;
    let spacing = params.params.z;
    let steps = i32(params.params.w);

    let center = textureSampleLevel(input_texture, linear_sampler, in.uv, 0.0);
    let radius = abs(center.a) * spacing;

    var acc = vec4<f32>(center.rgb, center.a);
    var total = 1.0;

    for (var s = 1; s <= steps; s++) {
        let t = f32(s) / f32(steps);
        let dist = t * radius;
        var offsets = array<vec2<f32>, 2>(
            params.directions.xy * dist,
            params.directions.zw * dist,
        );
        for (var d = 0; d < 2; d++) {
            let tap = textureSampleLevel(
                input_texture, linear_sampler, in.uv + offsets[d] * texel, 0.0);
            // The tap's own CoC must be wide enough to scatter across the
            // walked distance.
            let weight = saturate(abs(tap.a) - dist + 1.0);
            acc += tap * weight;
            total += weight;
        }
    }

    return acc / total;
}
"#;

const HEX_COMBINE_FS_WGSL: &str = r#"
@group(0) @binding(0) var blur_left: texture_2d<f32>;
@group(0) @binding(1) var blur_right: texture_2d<f32>;
@group(0) @binding(2) var linear_sampler: sampler;

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let a = textureSampleLevel(blur_left, linear_sampler, in.uv, 0.0);
    let b = textureSampleLevel(blur_right, linear_sampler, in.uv, 0.0);

    // Per-channel min of the two skewed unions carves the hexagon.
    let rgb = min(a.rgb, b.rgb);
    // The combined CoC keeps the wider spread so the compositor blends the
    // full blurred footprint; report it as coverage in [0, 1].
    let coc = select(b.a, a.a, abs(a.a) >= abs(b.a));
    let coverage = smoothstep(0.5, 1.5, abs(coc));
    return vec4<f32>(rgb, coverage);
}
"#;
