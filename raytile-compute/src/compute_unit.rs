//! The engine contract a worker thread drives.
//!
//! A compute unit owns all engine state for one worker. Calls are
//! synchronous and never shared between threads; the worker loop is the only
//! caller.

use raytile_core::{IndexBlob, PixelBlock, RenderParams, RenderTask, SceneAssets};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("compute unit is not initialized")]
    NotInitialized,

    #[error("no index loaded")]
    IndexNotLoaded,

    #[error("invalid scene: {0}")]
    Scene(String),

    #[error("corrupt index blob: {0}")]
    CorruptIndex(String),

    #[error("engine failure: {0}")]
    Engine(String),
}

/// Receives progress from inside an engine call.
pub trait ProgressSink {
    /// `progress` is in `[0, 1]`; `rays` is the unit's cumulative ray count.
    fn report(&mut self, event: &str, task_id: Option<u64>, progress: f64, rays: u64);
}

/// Discards progress.
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report(&mut self, _event: &str, _task_id: Option<u64>, _progress: f64, _rays: u64) {}
}

pub trait ComputeUnit: Send {
    /// Load scene data and camera-independent settings.
    fn initialize(&mut self, params: &RenderParams, assets: &SceneAssets) -> Result<(), ComputeError>;

    /// Build the shared index over the initialized scene and serialize it.
    fn build_index(&mut self, progress: &mut dyn ProgressSink) -> Result<IndexBlob, ComputeError>;

    /// Install an index built by this or another unit.
    fn load_index(&mut self, index: &IndexBlob) -> Result<(), ComputeError>;

    /// Render the task's tile. The block must match the tile dimensions.
    fn render(
        &mut self,
        task: &RenderTask,
        progress: &mut dyn ProgressSink,
    ) -> Result<PixelBlock, ComputeError>;

    /// Run ray-pass `pass` (0-based) for the tile and return the image so far.
    fn render_pass(
        &mut self,
        task: &RenderTask,
        pass: u32,
        progress: &mut dyn ProgressSink,
    ) -> Result<PixelBlock, ComputeError>;
}

impl<U: ComputeUnit + ?Sized> ComputeUnit for Box<U> {
    fn initialize(&mut self, params: &RenderParams, assets: &SceneAssets) -> Result<(), ComputeError> {
        (**self).initialize(params, assets)
    }

    fn build_index(&mut self, progress: &mut dyn ProgressSink) -> Result<IndexBlob, ComputeError> {
        (**self).build_index(progress)
    }

    fn load_index(&mut self, index: &IndexBlob) -> Result<(), ComputeError> {
        (**self).load_index(index)
    }

    fn render(
        &mut self,
        task: &RenderTask,
        progress: &mut dyn ProgressSink,
    ) -> Result<PixelBlock, ComputeError> {
        (**self).render(task, progress)
    }

    fn render_pass(
        &mut self,
        task: &RenderTask,
        pass: u32,
        progress: &mut dyn ProgressSink,
    ) -> Result<PixelBlock, ComputeError> {
        (**self).render_pass(task, pass, progress)
    }
}
