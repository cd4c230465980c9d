#![allow(dead_code)]

use raytile_compute::{ComputeError, ComputeUnit, ProgressSink, TestImageUnit};
use raytile_core::{IndexBlob, PixelBlock, RenderParams, RenderTask, SceneAssets};
use raytile_session::SessionController;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TRIANGLE: &str = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n";

pub fn assets() -> SceneAssets {
    SceneAssets::new(TRIANGLE, "")
}

pub fn params(width: u32, height: u32, workers: i32, tasks: u32) -> RenderParams {
    let mut params = RenderParams {
        width,
        height,
        worker_count: workers,
        task_count: tasks,
        ..RenderParams::default()
    };
    params.camera.rays_per_pixel = 2;
    params
}

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Initialize,
    BuildIndex,
    LoadIndex,
    Render(u64),
    RenderPass(u64, u32),
}

/// Shared record of what every unit in a pool was asked to do.
#[derive(Default)]
pub struct Journal {
    calls: Mutex<Vec<(usize, Call)>>,
    failed_renders: AtomicUsize,
}

impl Journal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<(usize, Call)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|(_, call)| matches(call)).count()
    }

    pub fn failed_renders(&self) -> usize {
        self.failed_renders.load(Ordering::SeqCst)
    }

    fn push(&self, worker_id: usize, call: Call) {
        self.calls.lock().unwrap().push((worker_id, call));
    }
}

/// Test image unit that reports its calls and can be told to misbehave.
pub struct RecordingUnit {
    id: usize,
    inner: TestImageUnit,
    journal: Arc<Journal>,
    init_delay: Option<Duration>,
    load_delay: Option<Duration>,
    fail_renders: bool,
}

impl RecordingUnit {
    pub fn new(id: usize, journal: Arc<Journal>) -> Self {
        Self {
            id,
            inner: TestImageUnit::new(),
            journal,
            init_delay: None,
            load_delay: None,
            fail_renders: false,
        }
    }

    pub fn with_row_delay(mut self, delay: Duration) -> Self {
        self.inner = self.inner.with_row_delay(delay);
        self
    }

    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = Some(delay);
        self
    }

    /// Stall inside `load_index` after the call is recorded.
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    pub fn failing_renders(mut self) -> Self {
        self.fail_renders = true;
        self
    }
}

impl ComputeUnit for RecordingUnit {
    fn initialize(&mut self, params: &RenderParams, assets: &SceneAssets) -> Result<(), ComputeError> {
        if let Some(delay) = self.init_delay {
            std::thread::sleep(delay);
        }
        self.journal.push(self.id, Call::Initialize);
        self.inner.initialize(params, assets)
    }

    fn build_index(&mut self, progress: &mut dyn ProgressSink) -> Result<IndexBlob, ComputeError> {
        self.journal.push(self.id, Call::BuildIndex);
        self.inner.build_index(progress)
    }

    fn load_index(&mut self, index: &IndexBlob) -> Result<(), ComputeError> {
        self.journal.push(self.id, Call::LoadIndex);
        if let Some(delay) = self.load_delay {
            std::thread::sleep(delay);
        }
        self.inner.load_index(index)
    }

    fn render(
        &mut self,
        task: &RenderTask,
        progress: &mut dyn ProgressSink,
    ) -> Result<PixelBlock, ComputeError> {
        self.journal.push(self.id, Call::Render(task.task_id));
        if self.fail_renders {
            self.journal.failed_renders.fetch_add(1, Ordering::SeqCst);
            return Err(ComputeError::Engine("ray budget exhausted".to_string()));
        }
        self.inner.render(task, progress)
    }

    fn render_pass(
        &mut self,
        task: &RenderTask,
        pass: u32,
        progress: &mut dyn ProgressSink,
    ) -> Result<PixelBlock, ComputeError> {
        self.journal.push(self.id, Call::RenderPass(task.task_id, pass));
        self.inner.render_pass(task, pass, progress)
    }
}

/// Controller whose units all report to `journal`.
pub fn recorded_controller(journal: &Arc<Journal>) -> SessionController {
    let journal = Arc::clone(journal);
    SessionController::from_fn(move |id| Box::new(RecordingUnit::new(id, Arc::clone(&journal))))
}
