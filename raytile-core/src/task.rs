use crate::{CameraParams, Mat4, PixelBlock, PixelRect, QualityParams};
use serde::{Deserialize, Serialize};

/// One rectangular unit of work. Never mutated after the partitioner creates it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RenderTask {
    /// Unique across every pass rendered by one session
    pub task_id: u64,
    /// Sub-rectangle of the full image covered by this task
    pub tile: PixelRect,
    pub total_width: u32,
    pub total_height: u32,
    /// `base_seed + task_id`
    pub rng_seed: u64,
    pub camera: CameraParams,
    /// Precomputed `camera.transform()` so every worker uses identical math
    pub camera_transform: Mat4,
    pub quality: QualityParams,
}

impl RenderTask {
    /// Whether `block` has exactly this task's tile dimensions and a matching byte length.
    pub fn accepts(&self, block: &PixelBlock) -> bool {
        block.width == self.tile.width && block.height == self.tile.height && block.is_well_formed()
    }
}

/// A finished tile: the echoed task plus its pixels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TileOutput {
    pub task: RenderTask,
    pub pixels: PixelBlock,
}
