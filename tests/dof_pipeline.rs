// tests/dof_pipeline.rs
// End-to-end tests for the depth-of-field pipeline on a real adapter.
// Each test skips cleanly when the host has no GPU.

use bokeh::pipeline::composite::{CompositePass, CompositeUniform};
use bokeh::pipeline::pass::{COC_BUFFER_FORMAT, FULLSCREEN_QUAD_VERTICES, TILE_BUFFER_FORMAT};
use bokeh::pipeline::pool::{texture_bytes, TexturePool};
use bokeh::pipeline::tile_max::{tile_grid, TileMaxPass};
use bokeh::pipeline::neighbor_max::NeighborMaxPass;
use bokeh::pipeline::{DofError, DofPipeline};
use bokeh::settings::{BlurMethod, CameraInfo, DofSettings, FocalLength, FocusSource, QualityTier};
use wgpu::util::DeviceExt;

fn create_test_device() -> Option<(wgpu::Device, wgpu::Queue)> {
    let _ = env_logger::builder().is_test(true).try_init();
    pollster::block_on(async {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await?;

        adapter
            .request_device(&wgpu::DeviceDescriptor::default(), None)
            .await
            .ok()
    })
}

fn f32_to_f16(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exp = ((bits >> 23) & 0xff) as i32;
    let mant = bits & 0x7f_ffff;
    if exp == 0xff {
        return sign | 0x7c00 | u16::from(mant != 0);
    }
    let e = exp - 127 + 15;
    if e >= 0x1f {
        return sign | 0x7c00;
    }
    if e <= 0 {
        if e < -10 {
            return sign;
        }
        let m = (mant | 0x80_0000) >> (1 - e);
        return sign | ((m + 0x1000) >> 13) as u16;
    }
    sign | (((e as u32) << 10) as u16) | ((mant + 0x1000) >> 13) as u16
}

fn f16_to_f32(bits: u16) -> f32 {
    let exp = (bits >> 10) & 0x1f;
    let mant = (bits & 0x3ff) as f32;
    let magnitude = match exp {
        0 => mant * 2f32.powi(-24),
        0x1f => f32::INFINITY,
        _ => (1.0 + mant / 1024.0) * 2f32.powi(i32::from(exp) - 15),
    };
    if bits & 0x8000 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Round-trip through half precision, matching what a 16-bit float texture
/// stores.
fn f16_quantize(value: f32) -> f32 {
    f16_to_f32(f32_to_f16(value))
}

fn create_texture(
    device: &wgpu::Device,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
    usage: wgpu::TextureUsages,
) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Test Texture"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage,
        view_formats: &[],
    })
}

fn upload_texture(
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    data: &[u8],
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
) {
    queue.write_texture(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        data,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(width * bytes_per_pixel),
            rows_per_image: Some(height),
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
}

/// Copy a texture back to the CPU, stripping the 256-byte row alignment.
fn read_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
) -> Vec<u8> {
    let unpadded = width * bytes_per_pixel;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let padded = unpadded.div_ceil(align) * align;

    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback Buffer"),
        size: u64::from(padded) * u64::from(height),
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Readback Encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer: &buffer,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(padded),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit([encoder.finish()]);

    let slice = buffer.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        tx.send(result).unwrap();
    });
    device.poll(wgpu::Maintain::Wait);
    rx.recv().unwrap().unwrap();

    let mapped = slice.get_mapped_range();
    let mut out = Vec::with_capacity((unpadded * height) as usize);
    for row in 0..height {
        let start = (row * padded) as usize;
        out.extend_from_slice(&mapped[start..start + unpadded as usize]);
    }
    drop(mapped);
    buffer.unmap();
    out
}

/// Gradient pattern with per-pixel variation in every channel.
fn source_pattern(width: u32, height: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            data.push((x * 4 % 256) as u8);
            data.push((y * 4 % 256) as u8);
            data.push(((x ^ y) % 256) as u8);
            data.push(255);
        }
    }
    data
}

/// Render a constant-depth frame and require the destination to match the
/// source byte for byte. Used for the zero-CoC identity and for the near/far
/// mask switches, which zero the CoC on their side of the focal plane.
fn run_passthrough_case(depth_value: f32, settings: &DofSettings) {
    let Some((device, queue)) = create_test_device() else {
        eprintln!("skipping: no GPU adapter available");
        return;
    };

    const SIZE: u32 = 64;

    let source = create_texture(
        &device,
        SIZE,
        SIZE,
        wgpu::TextureFormat::Rgba8Unorm,
        wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
    );
    let pattern = source_pattern(SIZE, SIZE);
    upload_texture(&queue, &source, &pattern, SIZE, SIZE, 4);

    let depth = create_texture(
        &device,
        SIZE,
        SIZE,
        wgpu::TextureFormat::R32Float,
        wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
    );
    let depth_data: Vec<f32> = vec![depth_value; (SIZE * SIZE) as usize];
    upload_texture(&queue, &depth, bytemuck::cast_slice(&depth_data), SIZE, SIZE, 4);

    let destination = create_texture(
        &device,
        SIZE,
        SIZE,
        wgpu::TextureFormat::Rgba8Unorm,
        wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
    );

    let mut pipeline = DofPipeline::new(SIZE, SIZE, wgpu::TextureFormat::Rgba8Unorm);
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Test Encoder"),
    });
    pipeline
        .render(
            &device,
            &queue,
            &mut encoder,
            &source.create_view(&Default::default()),
            &depth.create_view(&Default::default()),
            &destination.create_view(&Default::default()),
            settings,
            &CameraInfo::default(),
        )
        .expect("render failed");
    queue.submit([encoder.finish()]);

    let result = read_texture(&device, &queue, &destination, SIZE, SIZE, 4);
    for i in 0..(SIZE * SIZE) as usize {
        for c in 0..3 {
            assert_eq!(
                result[i * 4 + c],
                pattern[i * 4 + c],
                "pixel {} channel {} changed despite zero effective defocus",
                i,
                c
            );
        }
    }
}

fn run_passthrough(method: BlurMethod) {
    let settings = DofSettings {
        focus: FocusSource::Distance(4.0),
        f_number: 1.4,
        focal_length: FocalLength::Explicit(0.05),
        method,
        ..Default::default()
    };
    run_passthrough_case(4.0, &settings);
}

#[test]
fn test_in_focus_gather_passes_source_through() {
    run_passthrough(BlurMethod::Gather);
}

#[test]
fn test_in_focus_hexagonal_passes_source_through() {
    run_passthrough(BlurMethod::Hexagonal);
}

#[test]
fn test_near_mask_passes_near_field_through() {
    // Everything nearer than the focal plane, but near blur switched off:
    // the masked CoC collapses to zero and the frame must survive untouched.
    let settings = DofSettings {
        focus: FocusSource::Distance(4.0),
        f_number: 1.4,
        focal_length: FocalLength::Explicit(0.05),
        near_blur: false,
        ..Default::default()
    };
    run_passthrough_case(1.0, &settings);
}

#[test]
fn test_far_mask_passes_far_field_through() {
    let settings = DofSettings {
        focus: FocusSource::Distance(4.0),
        f_number: 1.4,
        focal_length: FocalLength::Explicit(0.05),
        far_blur: false,
        ..Default::default()
    };
    run_passthrough_case(100.0, &settings);
}

#[test]
fn test_visualize_marks_focus_red_and_far_field_green() {
    let Some((device, queue)) = create_test_device() else {
        eprintln!("skipping: no GPU adapter available");
        return;
    };

    const SIZE: u32 = 64;
    const FOCUS: f32 = 4.0;

    let source = create_texture(
        &device,
        SIZE,
        SIZE,
        wgpu::TextureFormat::Rgba8Unorm,
        wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
    );
    upload_texture(&queue, &source, &source_pattern(SIZE, SIZE), SIZE, SIZE, 4);

    // Left half at the focal plane, right half far behind it.
    let depth = create_texture(
        &device,
        SIZE,
        SIZE,
        wgpu::TextureFormat::R32Float,
        wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
    );
    let mut depth_data = vec![FOCUS; (SIZE * SIZE) as usize];
    for y in 0..SIZE {
        for x in SIZE / 2..SIZE {
            depth_data[(y * SIZE + x) as usize] = 100.0;
        }
    }
    upload_texture(&queue, &depth, bytemuck::cast_slice(&depth_data), SIZE, SIZE, 4);

    let destination = create_texture(
        &device,
        SIZE,
        SIZE,
        wgpu::TextureFormat::Rgba8Unorm,
        wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
    );

    let settings = DofSettings {
        focus: FocusSource::Distance(FOCUS),
        f_number: 1.4,
        focal_length: FocalLength::Explicit(0.05),
        visualize_coc: true,
        ..Default::default()
    };

    let mut pipeline = DofPipeline::new(SIZE, SIZE, wgpu::TextureFormat::Rgba8Unorm);
    let mut encoder = device.create_command_encoder(&Default::default());
    pipeline
        .render(
            &device,
            &queue,
            &mut encoder,
            &source.create_view(&Default::default()),
            &depth.create_view(&Default::default()),
            &destination.create_view(&Default::default()),
            &settings,
            &CameraInfo::default(),
        )
        .expect("render failed");
    queue.submit([encoder.finish()]);

    let result = read_texture(&device, &queue, &destination, SIZE, SIZE, 4);
    for y in 0..SIZE {
        // Sample away from the depth seam where bilinear filtering blends.
        let focused = ((y * SIZE + 4) * 4) as usize;
        assert_eq!(result[focused], 255, "focused pixel should be pure red");
        assert_eq!(result[focused + 1], 0);
        assert_eq!(result[focused + 2], 0);

        let far = ((y * SIZE + SIZE - 4) * 4) as usize;
        assert!(result[far + 1] > 0, "far-field pixel should show green");
        assert_eq!(result[far + 2], 0, "far-field pixel must not show blue");
    }
}

/// CPU mirror of the two-pass tile reduction: signed bounds seeded at zero.
fn cpu_tile_bounds(
    coc: &[f32],
    width: u32,
    height: u32,
    tile: u32,
) -> Vec<(f32, f32)> {
    let (grid_w, grid_h) = tile_grid(width, height, tile);
    let mut out = Vec::with_capacity((grid_w * grid_h) as usize);
    for ty in 0..grid_h {
        for tx in 0..grid_w {
            let mut lo = 0.0f32;
            let mut hi = 0.0f32;
            for dy in 0..tile {
                for dx in 0..tile {
                    let x = (tx * tile + dx).min(width - 1);
                    let y = (ty * tile + dy).min(height - 1);
                    let v = coc[(y * width + x) as usize];
                    lo = lo.min(v);
                    hi = hi.max(v);
                }
            }
            out.push((lo, hi));
        }
    }
    out
}

/// Deterministic signed CoC field with values spread across [-20, 20].
fn coc_field(width: u32, height: u32) -> Vec<f32> {
    let mut state = 0x2545_f491u32;
    (0..width * height)
        .map(|_| {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            let unit = (state >> 8) as f32 / (1 << 24) as f32;
            f16_quantize((unit - 0.5) * 40.0)
        })
        .collect()
}

struct TileSetup {
    quad: wgpu::Buffer,
    input: wgpu::Texture,
    intermediate: wgpu::Texture,
    output: wgpu::Texture,
}

fn build_tile_setup(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    coc: &[f32],
    width: u32,
    height: u32,
    tile: u32,
) -> TileSetup {
    let quad = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Test Quad Buffer"),
        contents: bytemuck::cast_slice(&FULLSCREEN_QUAD_VERTICES),
        usage: wgpu::BufferUsages::VERTEX,
    });

    // Pack the CoC field into the alpha channel, color left black.
    let mut texels = Vec::with_capacity(coc.len() * 4);
    for &value in coc {
        texels.extend_from_slice(&[0u16, 0, 0, f32_to_f16(value)]);
    }
    let input = create_texture(
        device,
        width,
        height,
        COC_BUFFER_FORMAT,
        wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
    );
    upload_texture(queue, &input, bytemuck::cast_slice(&texels), width, height, 8);

    let (grid_w, grid_h) = tile_grid(width, height, tile);
    let intermediate = create_texture(
        device,
        grid_w,
        height,
        TILE_BUFFER_FORMAT,
        wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
    );
    let output = create_texture(
        device,
        grid_w,
        grid_h,
        TILE_BUFFER_FORMAT,
        wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC,
    );

    TileSetup {
        quad,
        input,
        intermediate,
        output,
    }
}

fn decode_pairs(bytes: &[u8]) -> Vec<(f32, f32)> {
    bytes
        .chunks_exact(4)
        .map(|chunk| {
            let lo = u16::from_le_bytes([chunk[0], chunk[1]]);
            let hi = u16::from_le_bytes([chunk[2], chunk[3]]);
            (f16_to_f32(lo), f16_to_f32(hi))
        })
        .collect()
}

#[test]
fn test_tile_max_matches_cpu_reference() {
    let Some((device, queue)) = create_test_device() else {
        eprintln!("skipping: no GPU adapter available");
        return;
    };

    const WIDTH: u32 = 40;
    const HEIGHT: u32 = 24;
    const TILE: u32 = 8;

    let coc = coc_field(WIDTH, HEIGHT);
    let setup = build_tile_setup(&device, &queue, &coc, WIDTH, HEIGHT, TILE);
    let (grid_w, grid_h) = tile_grid(WIDTH, HEIGHT, TILE);

    let mut pass = TileMaxPass::new();
    pass.init(&device);

    let mut encoder = device.create_command_encoder(&Default::default());
    pass.render(
        &mut encoder,
        &setup.input.create_view(&Default::default()),
        &setup.intermediate.create_view(&Default::default()),
        &setup.output.create_view(&Default::default()),
        &setup.quad,
        WIDTH,
        HEIGHT,
        TILE,
        &device,
        &queue,
    );
    queue.submit([encoder.finish()]);

    let got = decode_pairs(&read_texture(&device, &queue, &setup.output, grid_w, grid_h, 4));
    let expected = cpu_tile_bounds(&coc, WIDTH, HEIGHT, TILE);

    assert_eq!(got.len(), expected.len());
    for (i, (g, e)) in got.iter().zip(&expected).enumerate() {
        assert!(
            (g.0 - e.0).abs() < 0.05 && (g.1 - e.1).abs() < 0.05,
            "tile {}: gpu ({}, {}) vs cpu ({}, {})",
            i,
            g.0,
            g.1,
            e.0,
            e.1
        );
    }
}

#[test]
fn test_neighbor_max_covers_adjacent_tiles() {
    let Some((device, queue)) = create_test_device() else {
        eprintln!("skipping: no GPU adapter available");
        return;
    };

    const WIDTH: u32 = 40;
    const HEIGHT: u32 = 24;
    const TILE: u32 = 8;

    let coc = coc_field(WIDTH, HEIGHT);
    let setup = build_tile_setup(&device, &queue, &coc, WIDTH, HEIGHT, TILE);
    let (grid_w, grid_h) = tile_grid(WIDTH, HEIGHT, TILE);

    let dilated = create_texture(
        &device,
        grid_w,
        grid_h,
        TILE_BUFFER_FORMAT,
        wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
    );

    let mut tile_pass = TileMaxPass::new();
    tile_pass.init(&device);
    let mut neighbor_pass = NeighborMaxPass::new();
    neighbor_pass.init(&device);

    let mut encoder = device.create_command_encoder(&Default::default());
    tile_pass.render(
        &mut encoder,
        &setup.input.create_view(&Default::default()),
        &setup.intermediate.create_view(&Default::default()),
        &setup.output.create_view(&Default::default()),
        &setup.quad,
        WIDTH,
        HEIGHT,
        TILE,
        &device,
        &queue,
    );
    neighbor_pass.render(
        &mut encoder,
        &setup.output.create_view(&Default::default()),
        &dilated.create_view(&Default::default()),
        &setup.quad,
        grid_w,
        grid_h,
        &device,
        &queue,
    );
    queue.submit([encoder.finish()]);

    let got = decode_pairs(&read_texture(&device, &queue, &dilated, grid_w, grid_h, 4));
    let tiles = cpu_tile_bounds(&coc, WIDTH, HEIGHT, TILE);

    for ty in 0..grid_h as i32 {
        for tx in 0..grid_w as i32 {
            let mut lo = 0.0f32;
            let mut hi = 0.0f32;
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let x = (tx + dx).clamp(0, grid_w as i32 - 1);
                    let y = (ty + dy).clamp(0, grid_h as i32 - 1);
                    let (tlo, thi) = tiles[(y * grid_w as i32 + x) as usize];
                    lo = lo.min(tlo);
                    hi = hi.max(thi);
                }
            }
            let g = got[(ty * grid_w as i32 + tx) as usize];
            assert!(
                (g.0 - lo).abs() < 0.05 && (g.1 - hi).abs() < 0.05,
                "cell ({}, {}): gpu ({}, {}) vs cpu ({}, {})",
                tx,
                ty,
                g.0,
                g.1,
                lo,
                hi
            );
        }
    }
}

#[test]
fn test_pool_budget_fails_frame_cleanly() {
    let Some((device, queue)) = create_test_device() else {
        eprintln!("skipping: no GPU adapter available");
        return;
    };

    const SIZE: u32 = 64;

    let source = create_texture(
        &device,
        SIZE,
        SIZE,
        wgpu::TextureFormat::Rgba8Unorm,
        wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
    );
    upload_texture(&queue, &source, &source_pattern(SIZE, SIZE), SIZE, SIZE, 4);

    let depth = create_texture(
        &device,
        SIZE,
        SIZE,
        wgpu::TextureFormat::R32Float,
        wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
    );
    let depth_data = vec![10.0f32; (SIZE * SIZE) as usize];
    upload_texture(&queue, &depth, bytemuck::cast_slice(&depth_data), SIZE, SIZE, 4);

    let destination = create_texture(
        &device,
        SIZE,
        SIZE,
        wgpu::TextureFormat::Rgba8Unorm,
        wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
    );

    // Far too small for even the full-resolution CoC buffer.
    let mut pipeline =
        DofPipeline::new(SIZE, SIZE, wgpu::TextureFormat::Rgba8Unorm).with_pool_budget(1024);
    let mut encoder = device.create_command_encoder(&Default::default());
    let result = pipeline.render(
        &device,
        &queue,
        &mut encoder,
        &source.create_view(&Default::default()),
        &depth.create_view(&Default::default()),
        &destination.create_view(&Default::default()),
        &DofSettings::default(),
        &CameraInfo::default(),
    );
    assert!(matches!(result, Err(DofError::PoolExhausted { .. })));

    // A second frame after the failure must still work once the budget allows.
    let mut pipeline = DofPipeline::new(SIZE, SIZE, wgpu::TextureFormat::Rgba8Unorm);
    let result = pipeline.render(
        &device,
        &queue,
        &mut encoder,
        &source.create_view(&Default::default()),
        &depth.create_view(&Default::default()),
        &destination.create_view(&Default::default()),
        &DofSettings::default(),
        &CameraInfo::default(),
    );
    assert!(result.is_ok());
    queue.submit([encoder.finish()]);
}

/// Render a high-contrast checkerboard far behind a close focal plane for
/// each settings variant and require the output to visibly differ from the
/// source. One pipeline instance serves all variants, so tier and method
/// switches exercise the rebuild paths.
fn run_defocused_blur_cases(variants: &[DofSettings]) {
    let Some((device, queue)) = create_test_device() else {
        eprintln!("skipping: no GPU adapter available");
        return;
    };

    const SIZE: u32 = 64;

    let mut pattern = Vec::with_capacity((SIZE * SIZE * 4) as usize);
    for y in 0..SIZE {
        for x in 0..SIZE {
            let on = (x / 8 + y / 8) % 2 == 0;
            let v = if on { 255 } else { 0 };
            pattern.extend_from_slice(&[v, v, v, 255]);
        }
    }
    let source = create_texture(
        &device,
        SIZE,
        SIZE,
        wgpu::TextureFormat::Rgba8Unorm,
        wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
    );
    upload_texture(&queue, &source, &pattern, SIZE, SIZE, 4);

    let depth = create_texture(
        &device,
        SIZE,
        SIZE,
        wgpu::TextureFormat::R32Float,
        wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
    );
    let depth_data = vec![100.0f32; (SIZE * SIZE) as usize];
    upload_texture(&queue, &depth, bytemuck::cast_slice(&depth_data), SIZE, SIZE, 4);

    let destination = create_texture(
        &device,
        SIZE,
        SIZE,
        wgpu::TextureFormat::Rgba8Unorm,
        wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
    );

    let mut pipeline = DofPipeline::new(SIZE, SIZE, wgpu::TextureFormat::Rgba8Unorm);
    for settings in variants {
        let mut encoder = device.create_command_encoder(&Default::default());
        pipeline
            .render(
                &device,
                &queue,
                &mut encoder,
                &source.create_view(&Default::default()),
                &depth.create_view(&Default::default()),
                &destination.create_view(&Default::default()),
                settings,
                &CameraInfo::default(),
            )
            .expect("render failed");
        queue.submit([encoder.finish()]);

        let result = read_texture(&device, &queue, &destination, SIZE, SIZE, 4);
        let changed = result
            .chunks_exact(4)
            .zip(pattern.chunks_exact(4))
            .any(|(got, src)| got[..3] != src[..3]);
        assert!(
            changed,
            "defocused frame should differ from the source ({:?}, {:?})",
            settings.method, settings.quality
        );
    }
}

fn defocused_settings() -> DofSettings {
    DofSettings {
        focus: FocusSource::Distance(1.0),
        f_number: 1.4,
        focal_length: FocalLength::Explicit(0.05),
        ..Default::default()
    }
}

#[test]
fn test_tier_change_rebuilds_and_blurs_defocused_frame() {
    run_defocused_blur_cases(&[
        DofSettings {
            quality: QualityTier::Low,
            ..defocused_settings()
        },
        DofSettings {
            quality: QualityTier::VeryHigh,
            ..defocused_settings()
        },
    ]);
}

#[test]
fn test_hexagonal_blurs_defocused_frame() {
    run_defocused_blur_cases(&[DofSettings {
        method: BlurMethod::Hexagonal,
        ..defocused_settings()
    }]);
}

/// Run the composite pass alone over a synthetic CoC buffer (white sharp
/// color, known CoC alphas) and a black blur buffer, returning the red
/// channel of each output pixel.
fn run_composite_row(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    cocs: &[f32],
    max_coc: f32,
) -> Vec<u8> {
    let width = cocs.len() as u32;

    let quad = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Test Quad Buffer"),
        contents: bytemuck::cast_slice(&FULLSCREEN_QUAD_VERTICES),
        usage: wgpu::BufferUsages::VERTEX,
    });

    let mut texels = Vec::with_capacity(cocs.len() * 4);
    let one = f32_to_f16(1.0);
    for &coc in cocs {
        texels.extend_from_slice(&[one, one, one, f32_to_f16(coc)]);
    }
    let coc_tex = create_texture(
        device,
        width,
        1,
        COC_BUFFER_FORMAT,
        wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
    );
    upload_texture(queue, &coc_tex, bytemuck::cast_slice(&texels), width, 1, 8);

    let blurred = create_texture(
        device,
        width,
        1,
        COC_BUFFER_FORMAT,
        wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
    );
    let black = vec![0u16; cocs.len() * 4];
    upload_texture(queue, &blurred, bytemuck::cast_slice(&black), width, 1, 8);

    let destination = create_texture(
        device,
        width,
        1,
        wgpu::TextureFormat::Rgba8Unorm,
        wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
    );

    let mut pass = CompositePass::new(wgpu::TextureFormat::Rgba8Unorm);
    pass.init(device);

    let uniform = CompositeUniform {
        params: [max_coc, 0.0, 0.0, 0.0],
    };
    let mut encoder = device.create_command_encoder(&Default::default());
    pass.render(
        &mut encoder,
        &coc_tex.create_view(&Default::default()),
        &blurred.create_view(&Default::default()),
        &destination.create_view(&Default::default()),
        &quad,
        &uniform,
        device,
        queue,
    );
    queue.submit([encoder.finish()]);

    read_texture(device, queue, &destination, width, 1, 4)
        .chunks_exact(4)
        .map(|px| px[0])
        .collect()
}

#[test]
fn test_composite_blend_normalized_by_coc_cap() {
    let Some((device, queue)) = create_test_device() else {
        eprintln!("skipping: no GPU adapter available");
        return;
    };

    // CoC values chosen exactly representable in half precision.
    let cocs = [0.0f32, 2.0, 8.0, 16.0];
    let reds = run_composite_row(&device, &queue, &cocs, 16.0);

    // Zero CoC keeps the sharp white source exactly.
    assert_eq!(reds[0], 255);
    // 2 px of a 16 px cap: smoothstep(0, 0.5, 0.125) = 0.15625 toward black.
    let expected = ((1.0 - 0.15625f32) * 255.0).round() as u8;
    assert!(
        reds[1].abs_diff(expected) <= 1,
        "got {}, expected ~{}",
        reds[1],
        expected
    );
    // At or beyond half the cap the blend saturates to the blurred color.
    assert_eq!(reds[2], 0);
    assert_eq!(reds[3], 0);

    // The same CoC under a wider cap must blend less: the ramp depends on the
    // normalization bound, not on raw pixels.
    let wide = run_composite_row(&device, &queue, &cocs, 64.0);
    assert!(
        wide[1] > reds[1],
        "cap 64 should blend less than cap 16 at 2 px ({} vs {})",
        wide[1],
        reds[1]
    );
}

#[test]
fn test_pool_clear_keeps_checked_out_bytes_counted() {
    let Some((device, _queue)) = create_test_device() else {
        eprintln!("skipping: no GPU adapter available");
        return;
    };

    let bytes = texture_bytes(8, 8, COC_BUFFER_FORMAT);
    let mut pool = TexturePool::with_budget(bytes);
    let held = pool
        .request(&device, 8, 8, COC_BUFFER_FORMAT)
        .expect("first allocation fits the budget");

    // Clearing while a texture is checked out must not free its budget share.
    pool.clear();
    assert_eq!(pool.allocated_bytes(), bytes);
    assert!(matches!(
        pool.request(&device, 8, 8, COC_BUFFER_FORMAT),
        Err(DofError::PoolExhausted { .. })
    ));

    // Once released, the texture is reused without growing the pool.
    pool.release(held);
    let reused = pool
        .request(&device, 8, 8, COC_BUFFER_FORMAT)
        .expect("pooled texture is reusable");
    assert_eq!(pool.allocated_bytes(), bytes);

    // Clearing with everything back in the free list empties the accounting.
    pool.release(reused);
    pool.clear();
    assert_eq!(pool.allocated_bytes(), 0);
}
