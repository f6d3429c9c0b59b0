//! Configuration surface for the depth-of-field pipeline.
//!
//! One immutable [`DofSettings`] value (plus the camera description) is passed
//! into every `render` call; the pipeline holds no sticky parameter state.

use serde::{Deserialize, Serialize};

use crate::lens;

/// Quality presets for the bokeh synthesizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QualityTier {
    /// 9 samples (center plus 1 ring).
    Low,
    /// 25 samples (center plus 2 rings).
    #[default]
    Medium,
    /// 49 samples (center plus 3 rings).
    High,
    /// 81 samples (center plus 4 rings).
    VeryHigh,
}

impl QualityTier {
    /// Zero-based tier index (Low = 0 .. VeryHigh = 3).
    pub fn index(self) -> u32 {
        match self {
            QualityTier::Low => 0,
            QualityTier::Medium => 1,
            QualityTier::High => 2,
            QualityTier::VeryHigh => 3,
        }
    }

    /// Ring count for the disk kernel generator (counts the center as ring 0).
    pub fn ring_count(self) -> u32 {
        self.index() + 2
    }

    /// Total disk-kernel taps for this tier, center included.
    pub fn sample_count(self) -> u32 {
        let rings = self.ring_count();
        8 * (rings - 1) * rings / 2 + 1
    }

    /// Taps walked per direction by each separable hexagonal pass.
    pub fn hex_step_count(self) -> u32 {
        match self {
            QualityTier::Low => 6,
            QualityTier::Medium => 10,
            QualityTier::High => 14,
            QualityTier::VeryHigh => 18,
        }
    }
}

/// Where the focal plane comes from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FocusSource {
    /// Fixed distance along the camera view axis, in world units.
    Distance(f32),
    /// A world-space point; resolved to a view-axis distance per frame.
    WorldPoint([f32; 3]),
}

impl FocusSource {
    /// Resolve to a view-axis distance for the given camera.
    /// Clamped to a small positive minimum so the lens math stays sane when
    /// the tracked point slips behind the camera.
    pub fn resolve(&self, camera: &CameraInfo) -> f32 {
        match *self {
            FocusSource::Distance(d) => d.max(0.01),
            FocusSource::WorldPoint(p) => {
                let to_point = [
                    p[0] - camera.position[0],
                    p[1] - camera.position[1],
                    p[2] - camera.position[2],
                ];
                let d = to_point[0] * camera.forward[0]
                    + to_point[1] * camera.forward[1]
                    + to_point[2] * camera.forward[2];
                d.max(0.01)
            }
        }
    }
}

/// How the focal length is determined.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FocalLength {
    /// Explicit focal length in meters.
    Explicit(f32),
    /// Derived from the camera's vertical field of view.
    FromFov,
}

impl FocalLength {
    /// Resolve to meters for the given camera.
    pub fn resolve(&self, camera: &CameraInfo) -> f32 {
        match *self {
            FocalLength::Explicit(f) => f.max(1e-3),
            FocalLength::FromFov => lens::focal_length_from_fov(camera.fov_y),
        }
    }
}

/// Which bokeh synthesis strategy to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BlurMethod {
    /// Gather-based disk kernel with TileMax/NeighborMax bounding (half res).
    #[default]
    Gather,
    /// Three separable directional passes approximating a hexagonal aperture
    /// (full res). Cheaper, less physically accurate.
    Hexagonal,
}

/// Camera description needed to resolve focus and field of view.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CameraInfo {
    /// World-space camera position.
    pub position: [f32; 3],
    /// Normalized world-space view direction.
    pub forward: [f32; 3],
    /// Vertical field of view in radians.
    pub fov_y: f32,
}

impl Default for CameraInfo {
    fn default() -> Self {
        Self {
            position: [0.0, 0.0, 0.0],
            forward: [0.0, 0.0, -1.0],
            fov_y: 60f32.to_radians(),
        }
    }
}

/// Depth-of-field settings for one pipeline invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DofSettings {
    /// Focal plane source.
    pub focus: FocusSource,
    /// Aperture f-number; smaller values blur more.
    pub f_number: f32,
    /// Focal length source.
    pub focal_length: FocalLength,
    /// Sample-count tier for the synthesizer.
    pub quality: QualityTier,
    /// Synthesis strategy.
    pub method: BlurMethod,
    /// Blur objects nearer than the focal plane.
    pub near_blur: bool,
    /// Blur objects farther than the focal plane.
    pub far_blur: bool,
    /// Tap spacing scale for the hexagonal strategy.
    pub sample_spacing: f32,
    /// Render the CoC map as false color instead of blurring.
    pub visualize_coc: bool,
}

impl Default for DofSettings {
    fn default() -> Self {
        Self {
            focus: FocusSource::Distance(10.0),
            f_number: 2.8,
            focal_length: FocalLength::Explicit(0.05),
            quality: QualityTier::Medium,
            method: BlurMethod::Gather,
            near_blur: true,
            far_blur: true,
            sample_spacing: 1.0,
            visualize_coc: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_sample_counts() {
        assert_eq!(QualityTier::Low.sample_count(), 9);
        assert_eq!(QualityTier::Medium.sample_count(), 25);
        assert_eq!(QualityTier::High.sample_count(), 49);
        assert_eq!(QualityTier::VeryHigh.sample_count(), 81);
    }

    #[test]
    fn test_focus_world_point_projects_onto_view_axis() {
        let camera = CameraInfo {
            position: [1.0, 0.0, 0.0],
            forward: [0.0, 0.0, -1.0],
            fov_y: 60f32.to_radians(),
        };
        // Lateral offset must not affect the resolved distance.
        let focus = FocusSource::WorldPoint([5.0, 2.0, -8.0]);
        assert!((focus.resolve(&camera) - 8.0).abs() < 1e-6);
        // Behind the camera clamps to the minimum.
        let behind = FocusSource::WorldPoint([1.0, 0.0, 3.0]);
        assert_eq!(behind.resolve(&camera), 0.01);
    }

    #[test]
    fn test_focal_length_from_fov_matches_lens() {
        let camera = CameraInfo::default();
        let f = FocalLength::FromFov.resolve(&camera);
        assert!((f - lens::focal_length_from_fov(camera.fov_y)).abs() < 1e-9);
    }
}
