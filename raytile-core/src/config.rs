//! Render parameters and helpers shared by the controller and the workers.
//!
//! `RenderParams` is what the caller hands the session controller for one
//! render run. Every field has a default so partial JSON documents load.

use crate::CameraParams;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fallback when the platform cannot report its core count.
pub const DEFAULT_HARDWARE_CONCURRENCY: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParamsError {
    #[error("image dimensions must be non-zero (got {width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    #[error("rays per pixel must be at least 1")]
    NoRays,

    #[error("gamma must be a positive finite number")]
    InvalidGamma,
}

/// Engine quality settings, camera independent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityParams {
    /// Maximum recursion depth for bounce rays
    pub bounce_limit: u32,
    /// Rays spawned per bounce
    pub bounce_rays: u32,
    pub gamma_correction: bool,
    pub gamma: f64,
    /// Whether the engine traverses the shared index or brute-forces geometry
    pub use_bvh: bool,
    /// Maximum primitives per index leaf. Part of the scene identity.
    pub bvh_max_leaf_size: u32,
    pub draw_surface_normal: bool,
    pub debug: bool,
}

impl Default for QualityParams {
    fn default() -> Self {
        Self {
            bounce_limit: 10,
            bounce_rays: 1,
            gamma_correction: true,
            gamma: 2.2,
            use_bvh: true,
            bvh_max_leaf_size: 8,
            draw_surface_normal: true,
            debug: false,
        }
    }
}

/// Everything one render run needs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderParams {
    pub width: u32,
    pub height: u32,
    pub camera: CameraParams,
    pub quality: QualityParams,
    /// Number of workers in the pool.
    /// Positive: use that exact number of workers.
    /// Zero or negative: use hardware concurrency + this value (e.g., -1 leaves one core free).
    pub worker_count: i32,
    /// Requested task count. Rounded down to a square grid.
    pub task_count: u32,
    /// Base seed; each task uses `rng_seed + task_id`.
    pub rng_seed: u64,
    /// Progressive refinement: one tile per worker, refined pass by pass.
    pub incremental: bool,
    /// Start rendering as soon as the pool reaches `Ready`.
    pub render_after_initialization: bool,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            width: 100,
            height: 100,
            camera: CameraParams::default(),
            quality: QualityParams::default(),
            worker_count: 16,
            task_count: 16,
            rng_seed: 0,
            incremental: false,
            render_after_initialization: true,
        }
    }
}

impl RenderParams {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.width == 0 || self.height == 0 {
            return Err(ParamsError::EmptyImage {
                width: self.width,
                height: self.height,
            });
        }
        if self.camera.rays_per_pixel == 0 {
            return Err(ParamsError::NoRays);
        }
        if self.quality.gamma_correction
            && !(self.quality.gamma.is_finite() && self.quality.gamma > 0.0)
        {
            return Err(ParamsError::InvalidGamma);
        }
        Ok(())
    }

    /// Worker count for this machine.
    pub fn resolved_worker_count(&self) -> usize {
        let hardware = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(DEFAULT_HARDWARE_CONCURRENCY);
        resolve_worker_count(self.worker_count, hardware)
    }
}

/// Apply the worker-count convention against a known core count. Never below 1.
pub fn resolve_worker_count(requested: i32, hardware_concurrency: usize) -> usize {
    if requested > 0 {
        requested as usize
    } else {
        let adjusted = hardware_concurrency as i64 + requested as i64;
        adjusted.max(1) as usize
    }
}
