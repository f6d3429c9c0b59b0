//! Gather-based bokeh synthesis at half resolution.
//!
//! Each pixel first consults the NeighborMax bound for its tile; in-focus
//! neighborhoods exit before touching the disk kernel. Out-of-focus pixels
//! accumulate the kernel with scatter-as-gather weights: a tap only
//! contributes if its own CoC could have scattered across the tap distance.

use crate::kernel;
use crate::settings::QualityTier;

use super::pass::{self, FullscreenVertex, COC_BUFFER_FORMAT, FULLSCREEN_VS_WGSL};

/// Gather uniform data.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GatherUniform {
    /// max_coc_px (half-res), 1/width, 1/height, tile_size
    pub params: [f32; 4],
}

/// Disk-kernel synthesis pass. The kernel table is spliced into the WGSL at
/// build time, so each quality tier is its own precompiled pipeline variant;
/// changing tiers rebuilds the pipeline.
pub struct GatherPass {
    pipeline: Option<wgpu::RenderPipeline>,
    bind_group_layout: Option<wgpu::BindGroupLayout>,
    uniform_buffer: Option<wgpu::Buffer>,
    sampler: Option<wgpu::Sampler>,
    compiled_tier: Option<QualityTier>,
}

impl GatherPass {
    /// Create an uninitialized pass.
    pub fn new() -> Self {
        Self {
            pipeline: None,
            bind_group_layout: None,
            uniform_buffer: None,
            sampler: None,
            compiled_tier: None,
        }
    }

    /// Initialize GPU resources for the given quality tier.
    pub fn init(&mut self, device: &wgpu::Device, tier: QualityTier) {
        self.sampler = Some(device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("DoF Gather Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        }));

        self.uniform_buffer = Some(device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("DoF Gather Uniform Buffer"),
            size: std::mem::size_of::<GatherUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }));

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("DoF Gather Bind Group Layout"),
            entries: &[
                // Half-res packed color+CoC
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
                // NeighborMax grid
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
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
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        self.bind_group_layout = Some(bind_group_layout);
        self.build_pipeline(device, tier);
    }

    /// Rebuild the pipeline variant if the requested tier differs from the
    /// compiled one.
    pub fn ensure_tier(&mut self, device: &wgpu::Device, tier: QualityTier) {
        if self.compiled_tier != Some(tier) && self.bind_group_layout.is_some() {
            log::debug!("gather: rebuilding kernel variant for {:?}", tier);
            self.build_pipeline(device, tier);
        }
    }

    fn build_pipeline(&mut self, device: &wgpu::Device, tier: QualityTier) {
        let Some(bind_group_layout) = self.bind_group_layout.as_ref() else {
            return;
        };

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("DoF Gather Pipeline Layout"),
            bind_group_layouts: &[bind_group_layout],
            push_constant_ranges: &[],
        });

        let source = format!(
            "{}{}{}",
            FULLSCREEN_VS_WGSL,
            kernel::disk_kernel_wgsl(tier),
            GATHER_FS_WGSL
        );
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("DoF Gather Shader"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        self.pipeline = Some(device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("DoF Gather Pipeline"),
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
        self.compiled_tier = Some(tier);
    }

    /// Release GPU resources.
    pub fn shutdown(&mut self) {
        self.pipeline = None;
        self.bind_group_layout = None;
        self.uniform_buffer = None;
        self.sampler = None;
        self.compiled_tier = None;
    }

    /// Synthesize the half-resolution bokeh buffer.
    /// Output RGB is the blurred color; alpha is foreground coverage used by
    /// the compositor.
    #[allow(clippy::too_many_arguments)]
    pub fn render(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        half_input: &wgpu::TextureView,
        neighbor_max: &wgpu::TextureView,
        output: &wgpu::TextureView,
        quad_buffer: &wgpu::Buffer,
        uniform: &GatherUniform,
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
            label: Some("DoF Gather Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(half_input),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(neighbor_max),
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

        let mut pass = pass::begin_target_pass(encoder, "DoF Gather Pass", output);
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.set_vertex_buffer(0, quad_buffer.slice(..));
        pass.draw(0..6, 0..1);
    }
}

impl Default for GatherPass {
    fn default() -> Self {
        Self::new()
    }
}

const GATHER_FS_WGSL: &str = r#"
struct Params {
    // max_coc_px, 1/width, 1/height, tile_size
    params: vec4<f32>,
}

@group(0) @binding(0) var half_texture: texture_2d<f32>;
@group(0) @binding(1) var neighbor_texture: texture_2d<f32>;
@group(0) @binding(2) var linear_sampler: sampler;
@group(0) @binding(3) var<uniform> params: Params;

const PI: f32 = 3.14159265359;
// Below half a pixel of blur the kernel cannot resolve anything.
const COC_EPSILON: f32 = 0.5;

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let max_coc = params.params.x;
    let texel = params.params.yz;
    let tile = u32(params.params.w);

    let center = textureSampleLevel(half_texture, linear_sampler, in.uv, 0.0);
    let center_coc = center.a;

    // Per-tile upper bound on any CoC that could reach this pixel.
    let tile_coord = vec2<i32>(vec2<u32>(in.position.xy) / tile);
    let bound_pair = textureLoad(neighbor_texture, tile_coord, 0).rg;
    let bound = max(-bound_pair.x, bound_pair.y);

    if (bound < COC_EPSILON) {
        // Nothing in reach blurs: pass the sharp sample through.
        return vec4<f32>(center.rgb, 0.0);
    }

    let radius = min(bound, max_coc);
    let margin = 1.0;

    // Background and foreground accumulate separately: the foreground layer
    // composites over the background by its gathered coverage.
    var bg_acc = vec4<f32>(0.0);
    var fg_acc = vec4<f32>(0.0);

    for (var i = 0u; i < KERNEL_COUNT; i++) {
        let disp = kernel_taps[i] * radius;
        let dist = length(disp);

        let tap = textureSampleLevel(half_texture, linear_sampler, in.uv + disp * texel, 0.0);
        let tap_coc = tap.a;

        // A background tap contributes when the smaller of the two CoCs
        // covers the tap distance (scatter-as-gather test).
        let bg_coc = max(min(center_coc, tap_coc), 0.0);
        let bg_weight = saturate((bg_coc - dist + margin) / margin);

        // A foreground tap contributes when its own (near) CoC reaches here.
        let fg_weight = saturate((-tap_coc - dist + margin) / margin);

        bg_acc += vec4<f32>(tap.rgb, 1.0) * bg_weight;
        fg_acc += vec4<f32>(tap.rgb, 1.0) * fg_weight;
    }

    let bg_rgb = bg_acc.rgb / max(bg_acc.a, 1e-5);
    let fg_rgb = fg_acc.rgb / max(fg_acc.a, 1e-5);

    // Normalized foreground coverage; PI compensates for the disk area vs
    // tap count ratio of the kernel.
    let fg_alpha = saturate(fg_acc.a * PI / f32(KERNEL_COUNT));

    let rgb = mix(bg_rgb, fg_rgb, fg_alpha);
    return vec4<f32>(rgb, fg_alpha);
}
"#;
