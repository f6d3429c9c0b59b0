//! # Core Module
//!
//! wgpu context management for headless and embedded use.

mod context;

pub use context::{Context, ContextError};

/// Context configuration options.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Power preference for GPU selection.
    pub power_preference: wgpu::PowerPreference,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
        }
    }
}
