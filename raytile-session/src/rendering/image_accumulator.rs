//! Collects finished tiles into one RGBA image.

use raytile_core::{PixelBlock, PixelRect, RenderTask, TileOutput, BYTES_PER_PIXEL};
use std::collections::HashMap;

/// A tile as last applied: the task it answers and its pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct TileRecord {
    pub task: RenderTask,
    pub pixels: PixelBlock,
    /// Ray-pass that produced `pixels`; `None` for batch tiles.
    pub pass: Option<u32>,
}

pub struct ImageAccumulator {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
    tiles: Vec<TileRecord>,
    // task id -> index into `tiles`
    by_task: HashMap<u64, usize>,
}

impl ImageAccumulator {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            rgba: vec![0; width as usize * height as usize * BYTES_PER_PIXEL],
            tiles: Vec::new(),
            by_task: HashMap::new(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row-major RGBA8 for the whole image. Unrendered pixels are transparent.
    pub fn rgba(&self) -> &[u8] {
        &self.rgba
    }

    pub fn tiles(&self) -> &[TileRecord] {
        &self.tiles
    }

    pub fn tile(&self, task_id: u64) -> Option<&TileRecord> {
        self.by_task.get(&task_id).map(|&i| &self.tiles[i])
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        let px = self.rgba.get(offset..offset + BYTES_PER_PIXEL)?;
        Some([px[0], px[1], px[2], px[3]])
    }

    /// Apply a finished batch tile. Returns false (and changes nothing) if the
    /// pixels do not fit the task's rectangle or the rectangle leaves the image.
    pub fn apply_tile(&mut self, output: TileOutput) -> bool {
        let TileOutput { task, pixels } = output;
        if !self.fits(&task, &pixels) {
            return false;
        }
        self.blit(task.tile, &pixels);
        self.store(TileRecord {
            task,
            pixels,
            pass: None,
        });
        true
    }

    /// Apply ray-pass `pass` of an incremental tile. Passes for one task must
    /// arrive in increasing order; an older or repeated pass is rejected.
    pub fn apply_partial(&mut self, task: RenderTask, pass: u32, pixels: PixelBlock) -> bool {
        if !self.fits(&task, &pixels) {
            return false;
        }
        if let Some(previous) = self.tile(task.task_id).and_then(|record| record.pass) {
            if pass <= previous {
                log::warn!(
                    "Dropping pass {} of task {} after pass {}",
                    pass,
                    task.task_id,
                    previous
                );
                return false;
            }
        }
        self.blit(task.tile, &pixels);
        self.store(TileRecord {
            task,
            pixels,
            pass: Some(pass),
        });
        true
    }

    pub fn clear(&mut self) {
        self.rgba.fill(0);
        self.tiles.clear();
        self.by_task.clear();
    }

    fn fits(&self, task: &RenderTask, pixels: &PixelBlock) -> bool {
        task.accepts(pixels) && task.tile.fits_within(self.width, self.height)
    }

    fn blit(&mut self, tile: PixelRect, pixels: &PixelBlock) {
        let row_bytes = tile.width as usize * BYTES_PER_PIXEL;
        for row in 0..tile.height as usize {
            let src = row * row_bytes;
            let dst = ((tile.y as usize + row) * self.width as usize + tile.x as usize)
                * BYTES_PER_PIXEL;
            self.rgba[dst..dst + row_bytes].copy_from_slice(&pixels.data[src..src + row_bytes]);
        }
    }

    fn store(&mut self, record: TileRecord) {
        match self.by_task.get(&record.task.task_id) {
            Some(&i) => self.tiles[i] = record,
            None => {
                self.by_task.insert(record.task.task_id, self.tiles.len());
                self.tiles.push(record);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raytile_core::{partition, RenderParams};

    fn tasks() -> Vec<RenderTask> {
        let params = RenderParams {
            width: 4,
            height: 4,
            ..RenderParams::default()
        };
        partition(&params, 4, 0)
    }

    fn solid(task: &RenderTask, value: u8) -> PixelBlock {
        let len = task.tile.area() as usize * BYTES_PER_PIXEL;
        PixelBlock::new(task.tile.width, task.tile.height, vec![value; len])
    }

    #[test]
    fn tiles_land_at_their_offsets() {
        let mut image = ImageAccumulator::new(4, 4);
        for (i, task) in tasks().into_iter().enumerate() {
            let pixels = solid(&task, 10 * (i as u8 + 1));
            assert!(image.apply_tile(TileOutput { task, pixels }));
        }

        assert_eq!(image.pixel(0, 0), Some([10; 4]));
        assert_eq!(image.pixel(3, 0), Some([20; 4]));
        assert_eq!(image.pixel(0, 3), Some([30; 4]));
        assert_eq!(image.pixel(3, 3), Some([40; 4]));
        assert_eq!(image.tiles().len(), 4);
    }

    #[test]
    fn mismatched_block_is_rejected() {
        let mut image = ImageAccumulator::new(4, 4);
        let task = tasks().remove(0);
        let pixels = PixelBlock::blank(task.tile.width + 1, task.tile.height);

        assert!(!image.apply_tile(TileOutput { task, pixels }));
        assert!(image.tiles().is_empty());
    }

    #[test]
    fn tile_outside_image_is_rejected() {
        let mut image = ImageAccumulator::new(2, 2);
        let task = tasks().remove(3);
        let pixels = solid(&task, 1);
        assert!(!image.apply_tile(TileOutput { task, pixels }));
    }

    #[test]
    fn partial_passes_overwrite_in_order() {
        let mut image = ImageAccumulator::new(4, 4);
        let task = tasks().remove(0);

        assert!(image.apply_partial(task.clone(), 0, solid(&task, 1)));
        assert!(image.apply_partial(task.clone(), 1, solid(&task, 2)));
        assert!(!image.apply_partial(task.clone(), 1, solid(&task, 9)));
        assert!(!image.apply_partial(task.clone(), 0, solid(&task, 9)));

        assert_eq!(image.pixel(0, 0), Some([2; 4]));
        assert_eq!(image.tile(task.task_id).and_then(|t| t.pass), Some(1));
        assert_eq!(image.tiles().len(), 1);
    }

    #[test]
    fn clear_resets_pixels_and_tiles() {
        let mut image = ImageAccumulator::new(4, 4);
        let task = tasks().remove(0);
        let pixels = solid(&task, 7);
        image.apply_tile(TileOutput { task, pixels });

        image.clear();

        assert!(image.rgba().iter().all(|&b| b == 0));
        assert!(image.tiles().is_empty());
    }
}
