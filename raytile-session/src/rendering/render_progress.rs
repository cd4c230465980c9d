use serde::Serialize;
use std::time::Duration;

/// Whole-render completion, as opposed to the per-worker detail kept by
/// `ProgressAggregator`.
///
/// A step is one tile in batch mode and one fully refined task in
/// incremental mode. Failed tiles never count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct RenderProgress {
    pub completed_steps: u32,
    pub total_steps: u32,
    /// Time since the pass started, as of the last step or `finish`.
    pub elapsed_ms: f64,
    pub is_complete: bool,
}

impl RenderProgress {
    pub fn new(total_steps: u32) -> Self {
        Self {
            total_steps,
            ..Self::default()
        }
    }

    pub fn step(&mut self, elapsed: Duration) {
        self.completed_steps = self.total_steps.min(self.completed_steps + 1);
        self.elapsed_ms = elapsed.as_secs_f64() * 1000.0;
    }

    pub fn finish(&mut self, elapsed: Duration) {
        self.elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        self.is_complete = true;
    }

    /// 0 to 100. A render with no steps reports 0.
    pub fn percentage(&self) -> f32 {
        match self.total_steps {
            0 => 0.0,
            total => self.completed_steps as f32 * 100.0 / total as f32,
        }
    }
}
