//! Deterministic stand-in engine.
//!
//! Produces a seeded gradient with per-pixel noise instead of tracing rays,
//! so the control plane can be exercised without a real renderer. The index
//! it builds is a small JSON summary of the scene, which is enough to check
//! that every unit loads the same blob.

use crate::worker::{EVENT_BUILD_INDEX, EVENT_INCREMENTAL_RENDER, EVENT_RENDER};
use crate::{ComputeError, ComputeUnit, ProgressSink};
use raytile_core::{
    IndexBlob, PixelBlock, QualityParams, RenderParams, RenderTask, SceneAssets, BYTES_PER_PIXEL,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct IndexSummary {
    vertices: usize,
    faces: usize,
    max_leaf_size: u32,
    leaves: usize,
}

#[derive(Clone, Debug)]
struct LoadedScene {
    vertices: usize,
    faces: usize,
    quality: QualityParams,
}

/// Running per-pixel RGB sums for one tile under incremental rendering.
struct Accumulation {
    passes: u32,
    sums: Vec<f64>,
}

pub struct TestImageUnit {
    scene: Option<LoadedScene>,
    index: Option<IndexSummary>,
    rays: u64,
    row_delay: Option<Duration>,
    accumulations: HashMap<u64, Accumulation>,
}

impl Default for TestImageUnit {
    fn default() -> Self {
        Self::new()
    }
}

impl TestImageUnit {
    pub fn new() -> Self {
        Self {
            scene: None,
            index: None,
            rays: 0,
            row_delay: None,
            accumulations: HashMap::new(),
        }
    }

    /// Sleep after each rendered row. Used to keep tiles in flight long
    /// enough to observe progress or abort mid-render.
    pub fn with_row_delay(mut self, delay: Duration) -> Self {
        self.row_delay = Some(delay);
        self
    }

    /// Cumulative rays traced by this unit.
    pub fn rays(&self) -> u64 {
        self.rays
    }

    fn ready(&self) -> Result<&LoadedScene, ComputeError> {
        let scene = self.scene.as_ref().ok_or(ComputeError::NotInitialized)?;
        if self.index.is_none() {
            return Err(ComputeError::IndexNotLoaded);
        }
        Ok(scene)
    }

    fn pause(&self) {
        if let Some(delay) = self.row_delay {
            std::thread::sleep(delay);
        }
    }
}

fn count_prefixed(source: &str, prefix: &str) -> usize {
    source
        .lines()
        .filter(|line| line.trim_start().starts_with(prefix))
        .count()
}

/// xorshift64* over a mixed seed. Never returns the all-zero state.
fn noise(seed: u64, x: u32, y: u32, sample: u32) -> f64 {
    let mut state = seed
        ^ (u64::from(x)).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (u64::from(y)).wrapping_mul(0xC2B2_AE3D_27D4_EB4F)
        ^ (u64::from(sample)).wrapping_mul(0x1656_67B1_9E37_79F9);
    if state == 0 {
        state = 0x2545_F491_4F6C_DD1D;
    }
    state ^= state >> 12;
    state ^= state << 25;
    state ^= state >> 27;
    let value = state.wrapping_mul(0x2545_F491_4F6C_DD1D);
    (value >> 11) as f64 / (1u64 << 53) as f64
}

/// One sample's linear RGB for a pixel in full-image coordinates.
fn sample(task: &RenderTask, x: u32, y: u32, sample_index: u32) -> [f64; 3] {
    let u = (f64::from(x) + 0.5) / f64::from(task.total_width.max(1));
    let v = (f64::from(y) + 0.5) / f64::from(task.total_height.max(1));
    let n = noise(task.rng_seed, x, y, sample_index);
    [u, v, 0.25 + 0.5 * n]
}

fn encode(linear: [f64; 3], quality: &QualityParams) -> [u8; 4] {
    let correct = |c: f64| {
        let c = c.clamp(0.0, 1.0);
        if quality.gamma_correction && quality.gamma > 0.0 {
            c.powf(1.0 / quality.gamma)
        } else {
            c
        }
    };
    [
        (correct(linear[0]) * 255.0).round() as u8,
        (correct(linear[1]) * 255.0).round() as u8,
        (correct(linear[2]) * 255.0).round() as u8,
        255,
    ]
}

impl ComputeUnit for TestImageUnit {
    fn initialize(&mut self, params: &RenderParams, assets: &SceneAssets) -> Result<(), ComputeError> {
        if assets.obj.trim().is_empty() {
            return Err(ComputeError::Scene("empty OBJ source".to_string()));
        }
        self.scene = Some(LoadedScene {
            vertices: count_prefixed(&assets.obj, "v "),
            faces: count_prefixed(&assets.obj, "f "),
            quality: params.quality.clone(),
        });
        self.index = None;
        self.accumulations.clear();
        Ok(())
    }

    fn build_index(&mut self, progress: &mut dyn ProgressSink) -> Result<IndexBlob, ComputeError> {
        let scene = self.scene.as_ref().ok_or(ComputeError::NotInitialized)?;
        progress.report(EVENT_BUILD_INDEX, None, 0.0, self.rays);

        let max_leaf_size = scene.quality.bvh_max_leaf_size.max(1);
        let summary = IndexSummary {
            vertices: scene.vertices,
            faces: scene.faces,
            max_leaf_size,
            leaves: scene.faces.div_ceil(max_leaf_size as usize),
        };
        let bytes =
            serde_json::to_vec(&summary).map_err(|e| ComputeError::Engine(e.to_string()))?;

        self.index = Some(summary);
        progress.report(EVENT_BUILD_INDEX, None, 1.0, self.rays);
        Ok(IndexBlob::new(bytes))
    }

    fn load_index(&mut self, index: &IndexBlob) -> Result<(), ComputeError> {
        if self.scene.is_none() {
            return Err(ComputeError::NotInitialized);
        }
        let summary: IndexSummary = serde_json::from_slice(index.as_bytes())
            .map_err(|e| ComputeError::CorruptIndex(e.to_string()))?;
        self.index = Some(summary);
        Ok(())
    }

    fn render(
        &mut self,
        task: &RenderTask,
        progress: &mut dyn ProgressSink,
    ) -> Result<PixelBlock, ComputeError> {
        let quality = self.ready()?.quality.clone();
        let samples = task.camera.rays_per_pixel.max(1);
        let tile = task.tile;
        let mut data = Vec::with_capacity(tile.area() as usize * BYTES_PER_PIXEL);

        for row in 0..tile.height {
            let y = tile.y + row;
            for x in tile.x..tile.right() {
                let mut acc = [0.0; 3];
                for s in 0..samples {
                    let c = sample(task, x, y, s);
                    acc[0] += c[0];
                    acc[1] += c[1];
                    acc[2] += c[2];
                }
                let n = f64::from(samples);
                data.extend_from_slice(&encode([acc[0] / n, acc[1] / n, acc[2] / n], &quality));
            }
            self.rays += u64::from(tile.width) * u64::from(samples);
            progress.report(
                EVENT_RENDER,
                Some(task.task_id),
                f64::from(row + 1) / f64::from(tile.height),
                self.rays,
            );
            self.pause();
        }

        Ok(PixelBlock::new(tile.width, tile.height, data))
    }

    fn render_pass(
        &mut self,
        task: &RenderTask,
        pass: u32,
        progress: &mut dyn ProgressSink,
    ) -> Result<PixelBlock, ComputeError> {
        let quality = self.ready()?.quality.clone();
        let tile = task.tile;
        let channels = tile.area() as usize * 3;

        if pass == 0 {
            self.accumulations.insert(
                task.task_id,
                Accumulation {
                    passes: 0,
                    sums: vec![0.0; channels],
                },
            );
        }
        let acc = self
            .accumulations
            .get_mut(&task.task_id)
            .ok_or_else(|| ComputeError::Engine(format!("pass {} before pass 0", pass)))?;
        if acc.passes != pass {
            return Err(ComputeError::Engine(format!(
                "expected pass {}, got {}",
                acc.passes, pass
            )));
        }

        let mut i = 0;
        for y in tile.y..tile.bottom() {
            for x in tile.x..tile.right() {
                let c = sample(task, x, y, pass);
                acc.sums[i] += c[0];
                acc.sums[i + 1] += c[1];
                acc.sums[i + 2] += c[2];
                i += 3;
            }
        }
        acc.passes += 1;

        let n = f64::from(acc.passes);
        let mut data = Vec::with_capacity(tile.area() as usize * BYTES_PER_PIXEL);
        for rgb in acc.sums.chunks_exact(3) {
            data.extend_from_slice(&encode([rgb[0] / n, rgb[1] / n, rgb[2] / n], &quality));
        }

        self.rays += tile.area();
        let total = task.camera.rays_per_pixel.max(1);
        progress.report(
            EVENT_INCREMENTAL_RENDER,
            Some(task.task_id),
            f64::from(pass + 1) / f64::from(total),
            self.rays,
        );
        self.pause();

        Ok(PixelBlock::new(tile.width, tile.height, data))
    }
}
