//! Splits an image into a square grid of near-equal tiles.
//!
//! The requested task count is a hint: it is rounded down to the nearest
//! perfect square `k * k`. Tiles are `floor(W / k)` x `floor(H / k)` and the
//! last column/row absorbs the remainder, so the grid covers every pixel
//! exactly once.

use crate::{PixelRect, RenderParams, RenderTask};

/// Grid side for a requested task count: `max(1, floor(sqrt(n)))`.
pub fn grid_side(requested_tasks: u32) -> u32 {
    let n = requested_tasks as u64;
    let mut side = (n as f64).sqrt() as u64;
    // Float sqrt can be off by one for large inputs.
    while side * side > n {
        side -= 1;
    }
    while (side + 1) * (side + 1) <= n {
        side += 1;
    }
    side.max(1) as u32
}

/// Grid side actually used for an image, clamped so no tile is empty.
pub fn effective_grid_side(width: u32, height: u32, requested_tasks: u32) -> u32 {
    grid_side(requested_tasks).min(width).min(height).max(1)
}

/// Tile rectangles in task order: index `i + j * side` is column `i`, row `j`.
pub fn generate_tiles(width: u32, height: u32, side: u32) -> Vec<PixelRect> {
    if width == 0 || height == 0 || side == 0 {
        return Vec::new();
    }

    let tile_width = width / side;
    let tile_height = height / side;
    let mut tiles = Vec::with_capacity((side * side) as usize);

    for j in 0..side {
        for i in 0..side {
            let mut w = tile_width;
            let mut h = tile_height;
            // Last column/row picks up the pixels lost to flooring
            if i == side - 1 {
                w += width - side * tile_width;
            }
            if j == side - 1 {
                h += height - side * tile_height;
            }
            tiles.push(PixelRect::new(i * tile_width, j * tile_height, w, h));
        }
    }

    tiles
}

/// Hands out task ids that keep increasing across passes of one session.
#[derive(Clone, Debug, Default)]
pub struct TaskPartitioner {
    next_task_id: u64,
}

impl TaskPartitioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next generated task will receive.
    pub fn next_task_id(&self) -> u64 {
        self.next_task_id
    }

    /// Generate the task set for one pass and advance the id base past it.
    pub fn partition(&mut self, params: &RenderParams, requested_tasks: u32) -> Vec<RenderTask> {
        let tasks = partition(params, requested_tasks, self.next_task_id);
        self.next_task_id += tasks.len() as u64;
        tasks
    }
}

/// Build tasks for `params` with ids starting at `first_task_id`.
///
/// Seeds are `params.rng_seed + task_id` (wrapping), so the same inputs always
/// yield the same task set.
pub fn partition(params: &RenderParams, requested_tasks: u32, first_task_id: u64) -> Vec<RenderTask> {
    let side = effective_grid_side(params.width, params.height, requested_tasks);
    let camera_transform = params.camera.transform();

    generate_tiles(params.width, params.height, side)
        .into_iter()
        .enumerate()
        .map(|(index, tile)| {
            let task_id = first_task_id + index as u64;
            RenderTask {
                task_id,
                tile,
                total_width: params.width,
                total_height: params.height,
                rng_seed: params.rng_seed.wrapping_add(task_id),
                camera: params.camera.clone(),
                camera_transform,
                quality: params.quality.clone(),
            }
        })
        .collect()
}
