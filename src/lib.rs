//! # Bokeh - Depth-of-Field Post-Processing for wgpu
//!
//! A multi-pass depth-of-field effect driven by physical lens parameters.
//! Linear scene depth is converted into a signed per-pixel circle of
//! confusion, and out-of-focus regions are synthesized with either a
//! disk-kernel gather (accelerated by tile bounds) or a three-pass
//! hexagonal blur.
//!
//! ## Features
//!
//! - **Lens**: thin-lens CoC model with f-number, focal length, focus distance
//! - **Pipeline**: CoC estimation, TileMax/NeighborMax bounds, bokeh
//!   synthesis, and compositing as discrete render passes
//! - **Quality**: precompiled kernel variants from 9 to 81 taps
//! - **Scratch pool**: intermediate buffers reused across frames, with an
//!   optional memory budget
//!
//! ## Example
//!
//! ```ignore
//! use bokeh::prelude::*;
//!
//! let context = Context::new(&ContextConfig::default()).await?;
//! let mut dof = DofPipeline::new(1920, 1080, wgpu::TextureFormat::Rgba8Unorm);
//!
//! let settings = DofSettings {
//!     focus: FocusSource::Distance(4.0),
//!     f_number: 1.8,
//!     ..Default::default()
//! };
//!
//! let mut encoder = context.create_command_encoder();
//! dof.render(
//!     &context.device, &context.queue, &mut encoder,
//!     &scene_color, &linear_depth, &output,
//!     &settings, &camera,
//! )?;
//! context.submit([encoder.finish()]);
//! ```

#![warn(missing_docs)]

pub mod core;
pub mod kernel;
pub mod lens;
pub mod pipeline;
pub mod settings;

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types.

    pub use crate::core::*;
    pub use crate::pipeline::{DofError, DofPipeline};
    pub use crate::settings::*;
}

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = "Bokeh";
