//! Thin-lens math for circle-of-confusion estimation.
//!
//! Everything here is pure CPU math; the GPU passes consume the derived
//! coefficient and radius cap through their uniform buffers.

use crate::settings::QualityTier;

/// Sensor height in meters (24mm, full-frame 35mm sensor).
pub const SENSOR_HEIGHT: f32 = 0.024;

/// Minimum separation between subject distance and focal length.
/// Below this the lens equation degenerates toward a division by zero.
pub const MIN_SEPARATION: f32 = 1e-4;

/// Compute the CoC scaling coefficient for the thin-lens model.
///
/// `coeff = f² / (N · (d − f) · sensor_height)`
///
/// The CoC diameter for a pixel at view distance `z` is then
/// `coeff · (z − d) / z`, expressed as a fraction of sensor height.
///
/// A degenerate configuration (`d ≈ f`) is clamped to a minimum separation
/// instead of producing an infinite or NaN coefficient.
pub fn lens_coefficient(subject_distance: f32, focal_length: f32, f_number: f32) -> f32 {
    let mut separation = subject_distance - focal_length;
    if separation.abs() < MIN_SEPARATION {
        log::warn!(
            "degenerate lens configuration (subject {} ~= focal {}), clamping separation",
            subject_distance,
            focal_length
        );
        separation = if separation < 0.0 {
            -MIN_SEPARATION
        } else {
            MIN_SEPARATION
        };
    }
    let f_number = f_number.max(1e-3);
    (focal_length * focal_length) / (f_number * separation * SENSOR_HEIGHT)
}

/// Derive the focal length (meters) from a vertical field of view in radians.
pub fn focal_length_from_fov(fov_y: f32) -> f32 {
    0.5 * SENSOR_HEIGHT / (0.5 * fov_y).tan()
}

/// Maximum CoC radius in pixels for a quality tier at a given frame height.
///
/// The per-tier radius is an empirical mapping (`index·4 + 10`); the result is
/// capped at 10% of the frame height so the tile reduction grids stay bounded.
pub fn max_coc_radius(tier: QualityTier, frame_height: u32) -> f32 {
    let tier_radius = (tier.index() * 4 + 10) as f32;
    tier_radius.min(0.1 * frame_height as f32)
}

/// Hyperfocal distance for a lens: focusing here makes everything from half
/// this distance to infinity acceptably sharp.
pub fn hyperfocal_distance(focal_length: f32, f_number: f32, coc_limit: f32) -> f32 {
    (focal_length * focal_length) / (f_number * coc_limit) + focal_length
}

/// Near and far limits of acceptable sharpness around a focus distance.
/// The far limit is infinite once the focus distance passes the hyperfocal.
pub fn depth_of_field_range(
    focal_length: f32,
    f_number: f32,
    focus_distance: f32,
    coc_limit: f32,
) -> (f32, f32) {
    let h = hyperfocal_distance(focal_length, f_number, coc_limit);
    let near = (h * focus_distance) / (h + focus_distance - focal_length);
    let far = if focus_distance < h - focal_length {
        (h * focus_distance) / (h - focus_distance + focal_length)
    } else {
        f32::INFINITY
    };
    (near, far)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coefficient_finite_and_positive_behind_focal() {
        for &(d, f, n) in &[(10.0, 0.05, 1.4), (2.0, 0.035, 8.0), (100.0, 0.3, 22.0)] {
            let c = lens_coefficient(d, f, n);
            assert!(c.is_finite());
            assert!(c > 0.0, "d > f must give a positive coefficient");
        }
    }

    #[test]
    fn test_coefficient_degenerate_clamped() {
        let c = lens_coefficient(0.05, 0.05, 1.4);
        assert!(c.is_finite());
        // Clamped separation means a very large, but bounded, coefficient.
        assert!(c.abs() > 1.0);
    }

    #[test]
    fn test_coefficient_negative_in_macro_range() {
        // Subject closer than the focal length: sign flips, still finite.
        let c = lens_coefficient(0.01, 0.05, 1.4);
        assert!(c.is_finite());
        assert!(c < 0.0);
    }

    #[test]
    fn test_focal_length_from_fov() {
        // 2·atan(S / 2f) must invert back to the input FOV.
        let f = focal_length_from_fov(60f32.to_radians());
        let fov = 2.0 * (0.5 * SENSOR_HEIGHT / f).atan();
        assert!((fov.to_degrees() - 60.0).abs() < 1e-3);
    }

    #[test]
    fn test_max_coc_radius_monotone_and_capped() {
        let tiers = [
            QualityTier::Low,
            QualityTier::Medium,
            QualityTier::High,
            QualityTier::VeryHigh,
        ];
        let mut prev = 0.0;
        for tier in tiers {
            let r = max_coc_radius(tier, 1080);
            assert!(r >= prev);
            assert!(r <= 0.1 * 1080.0);
            prev = r;
        }
        // VeryHigh (index 3) at 1000px: min(100, 3·4+10) = 22.
        assert_eq!(max_coc_radius(QualityTier::VeryHigh, 1000), 22.0);
        // Tiny frame: the 10% cap wins.
        assert_eq!(max_coc_radius(QualityTier::VeryHigh, 100), 10.0);
    }

    #[test]
    fn test_depth_of_field_range() {
        let (near, far) = depth_of_field_range(0.05, 2.8, 5.0, 3e-5);
        assert!(near < 5.0);
        assert!(far > 5.0);
        // Focus beyond the hyperfocal: far limit goes infinite.
        let h = hyperfocal_distance(0.05, 2.8, 3e-5);
        let (_, far) = depth_of_field_range(0.05, 2.8, h + 1.0, 3e-5);
        assert!(far.is_infinite());
    }
}
