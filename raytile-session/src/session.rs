use crate::rendering::{ImageAccumulator, ProgressAggregator, RenderProgress};
use crate::workers::{Dispatcher, IndexCoordinator, IndexSource, WorkerPool};
use raytile_core::{RenderParams, SceneKey};
use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SessionPhase {
    Idle,
    Initializing,
    Ready,
    Rendering,
    Aborting,
    Completed,
}

impl SessionPhase {
    pub fn name(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Initializing => "initializing",
            SessionPhase::Ready => "ready",
            SessionPhase::Rendering => "rendering",
            SessionPhase::Aborting => "aborting",
            SessionPhase::Completed => "completed",
        }
    }
}

/// State of one render run. Replaced wholesale when the next run starts.
pub struct Session {
    pub(crate) phase: SessionPhase,
    pub(crate) aborted: bool,
    pub(crate) failure: Option<String>,
    pub(crate) params: RenderParams,
    pub(crate) pool: Option<WorkerPool>,
    pub(crate) index: IndexCoordinator,
    pub(crate) index_source: Option<IndexSource>,
    pub(crate) dispatcher: Option<Dispatcher>,
    pub(crate) progress: ProgressAggregator,
    pub(crate) render_progress: RenderProgress,
    pub(crate) image: ImageAccumulator,
    pub(crate) render_started: Option<Instant>,
}

impl Session {
    pub(crate) fn new(params: RenderParams, scene_key: SceneKey) -> Self {
        let image = ImageAccumulator::new(params.width, params.height);
        Self {
            phase: SessionPhase::Initializing,
            aborted: false,
            failure: None,
            params,
            pool: None,
            index: IndexCoordinator::new(scene_key),
            index_source: None,
            dispatcher: None,
            progress: ProgressAggregator::new(),
            render_progress: RenderProgress::default(),
            image,
            render_started: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// True when the run ended through abort rather than completion.
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Why the run failed, if it did.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn params(&self) -> &RenderParams {
        &self.params
    }

    pub fn scene_key(&self) -> &SceneKey {
        self.index.scene_key()
    }

    pub fn index_source(&self) -> Option<IndexSource> {
        self.index_source
    }

    /// Index builds requested this session. Never more than one.
    pub fn index_builds(&self) -> u32 {
        self.index.builds_requested()
    }

    pub fn worker_count(&self) -> usize {
        self.pool.as_ref().map(WorkerPool::worker_count).unwrap_or(0)
    }

    pub fn pool(&self) -> Option<&WorkerPool> {
        self.pool.as_ref()
    }

    pub fn progress(&self) -> &ProgressAggregator {
        &self.progress
    }

    pub fn render_progress(&self) -> RenderProgress {
        self.render_progress
    }

    pub fn image(&self) -> &ImageAccumulator {
        &self.image
    }

    /// Time since the current pass started.
    pub fn render_time(&self) -> Duration {
        self.render_started
            .map(|started| started.elapsed())
            .unwrap_or_default()
    }

    pub fn summary(&self) -> SessionSummary {
        let snapshot = self.progress.snapshot();
        let elapsed = Duration::from_secs_f64(self.render_progress.elapsed_ms / 1000.0);
        SessionSummary {
            phase: self.phase,
            aborted: self.aborted,
            failure: self.failure.clone(),
            worker_count: self.worker_count(),
            index_source: self.index_source,
            progress: self.render_progress,
            total_rays: snapshot.total_rays,
            rays_per_second: snapshot.rays_per_second(elapsed),
        }
    }

    /// Terminate every worker and drop the pool. Idempotent.
    pub(crate) fn teardown(&mut self) {
        if let Some(mut pool) = self.pool.take() {
            pool.terminate_all();
        }
        if let Some(dispatcher) = self.dispatcher.as_mut() {
            dispatcher.clear();
        }
    }
}

/// Point-in-time report of a session, suitable for display or JSON export.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionSummary {
    pub phase: SessionPhase,
    pub aborted: bool,
    pub failure: Option<String>,
    pub worker_count: usize,
    pub index_source: Option<IndexSource>,
    pub progress: RenderProgress,
    pub total_rays: u64,
    pub rays_per_second: f64,
}
