//! Bokeh sample-pattern generation.
//!
//! The gather synthesizer samples a concentric-ring disk kernel. The kernel is
//! generated on the CPU per quality tier and spliced into the WGSL source as a
//! `var<private>` array, so each tier gets its own precompiled pipeline variant
//! instead of a runtime branch over sample counts.

use std::f32::consts::PI;

use crate::settings::QualityTier;

/// Points placed on each kernel ring, per ring index.
const POINTS_PER_RING: u32 = 8;

/// Unit-disk sample offsets for a quality tier, center tap first.
///
/// Ring radii carry a small bias so the innermost ring does not collapse
/// toward the center and the outermost ring stays inside the unit disk.
pub fn disk_kernel(tier: QualityTier) -> Vec<[f32; 2]> {
    let rings = tier.ring_count();
    let mut points = Vec::with_capacity(tier.sample_count() as usize);
    points.push([0.0, 0.0]);

    let bias = 1.0 / POINTS_PER_RING as f32;
    for ring in 1..rings {
        let radius = (ring as f32 + bias) / ((rings - 1) as f32 + bias);
        let count = ring * POINTS_PER_RING;
        for pt in 0..count {
            let phi = 2.0 * PI * pt as f32 / count as f32;
            points.push([phi.cos() * radius, phi.sin() * radius]);
        }
    }
    points
}

/// Render the kernel as a WGSL module-scope array declaration.
///
/// `var<private>` rather than `const`: the gather loop indexes the table with
/// a runtime counter, which naga rejects for module-scope constants.
pub fn disk_kernel_wgsl(tier: QualityTier) -> String {
    let kernel = disk_kernel(tier);
    let mut out = String::with_capacity(kernel.len() * 32 + 128);
    out.push_str(&format!(
        "const KERNEL_COUNT: u32 = {}u;\nvar<private> kernel_taps: array<vec2<f32>, {}> = array<vec2<f32>, {}>(\n",
        kernel.len(),
        kernel.len(),
        kernel.len()
    ));
    for (i, p) in kernel.iter().enumerate() {
        out.push_str(&format!("    vec2<f32>({:?}, {:?})", p[0], p[1]));
        out.push_str(if i + 1 == kernel.len() { "\n" } else { ",\n" });
    }
    out.push_str(");\n");
    out
}

/// Displacement vector pairs for the three separable hexagonal passes:
/// horizontal, then two verticals skewed ±30° off the vertical axis.
/// Each vec4 holds two displacement directions (xy, zw), walked in opposite
/// senses by the directional blur shader.
pub fn hex_blur_directions() -> [[f32; 4]; 3] {
    [
        [1.0, 0.0, -1.0, 0.0],
        [-0.5, -1.0, 0.5, 1.0],
        [0.5, -1.0, -0.5, 1.0],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_counts_match_tiers() {
        assert_eq!(disk_kernel(QualityTier::Low).len(), 9);
        assert_eq!(disk_kernel(QualityTier::Medium).len(), 25);
        assert_eq!(disk_kernel(QualityTier::High).len(), 49);
        assert_eq!(disk_kernel(QualityTier::VeryHigh).len(), 81);
        for tier in [
            QualityTier::Low,
            QualityTier::Medium,
            QualityTier::High,
            QualityTier::VeryHigh,
        ] {
            assert_eq!(disk_kernel(tier).len() as u32, tier.sample_count());
        }
    }

    #[test]
    fn test_kernel_geometry() {
        let kernel = disk_kernel(QualityTier::High);
        assert_eq!(kernel[0], [0.0, 0.0]);
        let mut prev_radius = 0.0;
        for (i, p) in kernel.iter().enumerate().skip(1) {
            let r = (p[0] * p[0] + p[1] * p[1]).sqrt();
            assert!(r <= 1.0 + 1e-5, "tap {} outside unit disk", i);
            assert!(r >= prev_radius - 1e-5, "ring radii must not shrink");
            prev_radius = prev_radius.max(r);
        }
        // Outermost ring touches the disk edge.
        assert!((prev_radius - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_wgsl_splice_shape() {
        let wgsl = disk_kernel_wgsl(QualityTier::Low);
        assert!(wgsl.contains("const KERNEL_COUNT: u32 = 9u;"));
        assert!(wgsl.contains("array<vec2<f32>, 9>"));
        assert_eq!(wgsl.matches("vec2<f32>(").count(), 10); // decl + 9 taps
    }

    #[test]
    fn test_hex_directions_are_opposed_pairs() {
        for d in hex_blur_directions() {
            assert_eq!(d[0], -d[2]);
            assert_eq!(d[1], -d[3]);
        }
    }
}
