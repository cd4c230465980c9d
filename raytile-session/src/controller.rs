//! Top-level render state machine.
//!
//! `Idle -> Initializing -> Ready -> Rendering -> Completed`, with
//! `Aborting` reachable from any non-terminal phase and always ending in
//! `Completed`. The controller is driven from one thread; workers run on
//! their own threads and only talk to it through the pool's event channel.

use crate::abort::{abort_pair, AbortHandle, AbortSignal};
use crate::blob_store::BlobStore;
use crate::rendering::{ImageAccumulator, ProgressAggregator, ProgressSnapshot, RenderProgress};
use crate::session::{Session, SessionPhase, SessionSummary};
use crate::workers::{
    DispatchMode, DispatchState, Dispatcher, IndexTransport, PoolEvent, Rejections, Reply,
    UnitFactory, Wait, WorkerPool,
};
use crate::{SessionConfig, SessionError, Stage};
use raytile_compute::ComputeUnit;
use raytile_core::{
    IndexBlob, MainToWorker, RenderParams, SceneAssets, SceneKey, TaskPartitioner, TileOutput,
    WorkerToMain,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct SessionController {
    factory: Box<dyn UnitFactory>,
    store: Option<Arc<dyn BlobStore>>,
    config: SessionConfig,
    abort_handle: AbortHandle,
    abort: AbortSignal,
    // Lives across sessions so task ids keep increasing for the whole run.
    partitioner: TaskPartitioner,
    session: Option<Session>,
}

impl SessionController {
    pub fn new(factory: impl UnitFactory + 'static) -> Self {
        let (abort_handle, abort) = abort_pair();
        Self {
            factory: Box::new(factory),
            store: None,
            config: SessionConfig::default(),
            abort_handle,
            abort,
            partitioner: TaskPartitioner::new(),
            session: None,
        }
    }

    /// Build units with a closure, e.g. `|_| Box::new(TestImageUnit::new())`.
    pub fn from_fn<F>(make_unit: F) -> Self
    where
        F: FnMut(usize) -> Box<dyn ComputeUnit> + Send + 'static,
    {
        Self::new(make_unit)
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Cache built indexes in `store` and reuse them for identical scenes.
    pub fn with_store(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Handle that aborts whatever session is current, from any thread.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.session
            .as_ref()
            .map(Session::phase)
            .unwrap_or(SessionPhase::Idle)
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn progress_snapshot(&self) -> ProgressSnapshot {
        self.session
            .as_ref()
            .map(|session| session.progress().snapshot())
            .unwrap_or_default()
    }

    pub fn render_progress(&self) -> RenderProgress {
        self.session
            .as_ref()
            .map(Session::render_progress)
            .unwrap_or_default()
    }

    pub fn image(&self) -> Option<&ImageAccumulator> {
        self.session.as_ref().map(Session::image)
    }

    pub fn summary(&self) -> Option<SessionSummary> {
        self.session.as_ref().map(Session::summary)
    }

    /// Id the next generated task will get.
    pub fn next_task_id(&self) -> u64 {
        self.partitioner.next_task_id()
    }

    /// Abort the previous session, set up a new one and render it to the end.
    pub fn render(&mut self, params: RenderParams, assets: SceneAssets) -> Result<(), SessionError> {
        self.setup(params, assets)?;
        if self.phase() == SessionPhase::Ready {
            self.start_render()?;
        }
        self.run_to_completion()
    }

    /// Spawn the pool, initialize every worker and load the shared index.
    ///
    /// Any previous session is aborted first. Ends in `Ready`, or in
    /// `Rendering` when `render_after_initialization` is set. An abort during
    /// setup is not an error: the session simply ends `Completed` and aborted.
    pub fn setup(&mut self, params: RenderParams, assets: SceneAssets) -> Result<(), SessionError> {
        self.abort();
        self.session = None;
        params.validate()?;
        self.abort.reset();

        let worker_count = params.resolved_worker_count();
        let scene_key = SceneKey::derive(&assets, &params.quality);
        let auto_start = params.render_after_initialization;
        log::info!(
            "Initializing session: {}x{} image, {} workers, scene {}",
            params.width,
            params.height,
            worker_count,
            scene_key
        );

        self.session = Some(Session::new(params, scene_key));

        let pool = match WorkerPool::spawn(
            worker_count,
            self.factory.as_mut(),
            self.abort.clone(),
            self.config.ack_timeout,
        ) {
            Ok(pool) => pool,
            Err(e) => return Err(self.fail(e)),
        };
        if let Some(session) = self.session.as_mut() {
            session.pool = Some(pool);
        }

        match self.prepare_workers(&assets) {
            Ok(Wait::Done(())) => {}
            Ok(Wait::Aborted) => {
                self.abort();
                return Ok(());
            }
            Err(e) => return Err(self.fail(e)),
        }

        if let Some(session) = self.session.as_mut() {
            session.phase = SessionPhase::Ready;
        }
        log::info!("Session ready");

        if auto_start {
            self.start_render()?;
        }
        Ok(())
    }

    fn prepare_workers(&mut self, assets: &SceneAssets) -> Result<Wait<()>, SessionError> {
        let store = if self.config.cache_index {
            self.store.clone()
        } else {
            None
        };
        let Some(session) = self.session.as_mut() else {
            return Ok(Wait::Aborted);
        };

        if let Wait::Aborted = initialize_workers(session, assets)? {
            return Ok(Wait::Aborted);
        }

        let Session {
            pool,
            progress,
            index,
            index_source,
            ..
        } = session;
        let Some(pool) = pool.as_mut() else {
            return Ok(Wait::Aborted);
        };
        let mut transport = PoolTransport { pool, progress };
        match index.run(&mut transport, store.as_deref())? {
            Wait::Done(source) => {
                *index_source = Some(source);
                Ok(Wait::Done(()))
            }
            Wait::Aborted => Ok(Wait::Aborted),
        }
    }

    /// Partition the image and start dispatching.
    ///
    /// Allowed from `Ready`, and from a `Completed` session that was neither
    /// aborted nor failed, which re-renders on the same initialized pool.
    pub fn start_render(&mut self) -> Result<(), SessionError> {
        let phase = self.phase();
        let startable = match self.session.as_ref() {
            Some(session) => {
                session.phase == SessionPhase::Ready
                    || (session.phase == SessionPhase::Completed
                        && !session.aborted
                        && session.failure.is_none()
                        && session.pool.is_some())
            }
            None => false,
        };
        if !startable {
            return Err(SessionError::WrongPhase {
                operation: "start render",
                phase: phase.name(),
            });
        }

        // Cancellation is checked before any task goes out.
        if self.abort.is_raised() {
            self.abort();
            return Ok(());
        }

        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        match begin_pass(session, &mut self.partitioner) {
            Ok(DispatchState::Drained) => {
                complete(session);
                Ok(())
            }
            Ok(DispatchState::Running) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Handle one worker event, waiting at most `timeout` for it.
    ///
    /// Returns whether the session is still rendering.
    pub fn process_next(&mut self, timeout: Option<Duration>) -> Result<bool, SessionError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(false);
        };
        if session.phase != SessionPhase::Rendering {
            return Ok(false);
        }
        let Some(pool) = session.pool.as_ref() else {
            return Ok(false);
        };

        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        match pool.recv(deadline) {
            PoolEvent::Aborted => {
                self.abort();
                Ok(false)
            }
            PoolEvent::TimedOut => Ok(true),
            PoolEvent::Disconnected => Err(self.fail(SessionError::WorkersExited)),
            PoolEvent::Message { worker_id, message } => {
                match handle_render_message(session, worker_id, message) {
                    Ok(DispatchState::Drained) => complete(session),
                    Ok(DispatchState::Running) => {}
                    Err(e) => return Err(self.fail(e)),
                }
                Ok(self.phase() == SessionPhase::Rendering)
            }
        }
    }

    /// Process events until the session leaves `Rendering`.
    pub fn run_to_completion(&mut self) -> Result<(), SessionError> {
        while self.process_next(None)? {}
        Ok(())
    }

    /// Stop the current session. Never fails and may be called any number of
    /// times; with no session it does nothing.
    ///
    /// Workers are terminated, pending tasks and progress are dropped, and the
    /// session ends `Completed` and aborted. On an already completed session
    /// this only releases the idle pool.
    pub fn abort(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        if session.phase == SessionPhase::Completed {
            if session.pool.is_some() {
                log::debug!("Releasing idle worker pool");
                session.teardown();
            }
            return;
        }

        session.phase = SessionPhase::Aborting;
        log::info!("Aborting render");
        session.teardown();
        session.progress.clear();
        session.image.clear();
        session.aborted = true;
        session.phase = SessionPhase::Completed;
    }

    fn fail(&mut self, err: SessionError) -> SessionError {
        log::error!("Session failed: {}", err);
        if let Some(session) = self.session.as_mut() {
            session.teardown();
            session.failure = Some(err.to_string());
            session.phase = SessionPhase::Completed;
        }
        err
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.abort();
    }
}

fn initialize_workers(session: &mut Session, assets: &SceneAssets) -> Result<Wait<()>, SessionError> {
    let Session {
        pool,
        progress,
        params,
        ..
    } = session;
    let Some(pool) = pool.as_mut() else {
        return Ok(Wait::Aborted);
    };

    let worker_ids = pool.worker_ids();
    for &worker_id in &worker_ids {
        if let Some(handle) = pool.handle(worker_id) {
            handle.initialize(params, assets)?;
        }
    }

    let acks = pool.gather(Stage::Initialize, &worker_ids, |worker_id, message| match message {
        WorkerToMain::InitDone => Reply::Ack(()),
        WorkerToMain::Error { message, .. } => Reply::Failed(message),
        other => {
            observe(progress, worker_id, other);
            Reply::Ignored
        }
    })?;

    match acks {
        Wait::Done(acked) => {
            for (worker_id, ()) in acked {
                if let Some(handle) = pool.handle_mut(worker_id) {
                    handle.set_initialized();
                }
            }
            log::info!("All {} workers initialized", worker_ids.len());
            Ok(Wait::Done(()))
        }
        Wait::Aborted => Ok(Wait::Aborted),
    }
}

/// Drives the index protocol over the live pool.
struct PoolTransport<'a> {
    pool: &'a mut WorkerPool,
    progress: &'a mut ProgressAggregator,
}

impl IndexTransport for PoolTransport<'_> {
    fn aborted(&self) -> bool {
        self.pool.abort_requested()
    }

    fn build(&mut self, worker_id: usize) -> Result<Wait<IndexBlob>, SessionError> {
        self.pool.ensure_initialized(&[worker_id])?;
        self.pool.post(worker_id, &MainToWorker::BuildIndex)?;

        let progress = &mut *self.progress;
        let acks = self
            .pool
            .gather(Stage::BuildIndex, &[worker_id], |id, message| match message {
                WorkerToMain::BuildDone { index } => Reply::Ack(index),
                WorkerToMain::Error { message, .. } => Reply::Failed(message),
                other => {
                    observe(progress, id, other);
                    Reply::Ignored
                }
            })?;

        match acks {
            Wait::Done(mut acked) => match acked.pop() {
                Some((_, index)) => Ok(Wait::Done(index)),
                None => Err(SessionError::WorkerFailed {
                    stage: Stage::BuildIndex,
                    worker_id,
                    message: "no index returned".to_string(),
                }),
            },
            Wait::Aborted => Ok(Wait::Aborted),
        }
    }

    fn load_all(&mut self, index: &IndexBlob) -> Result<Wait<Rejections>, SessionError> {
        self.pool.broadcast(&MainToWorker::LoadIndex {
            index: index.clone(),
        })?;

        // An error is still an answer: waiting for every worker keeps stale
        // replies out of a rebuild that may follow.
        let worker_ids = self.pool.worker_ids();
        let progress = &mut *self.progress;
        let acks = self
            .pool
            .gather(Stage::LoadIndex, &worker_ids, |id, message| match message {
                WorkerToMain::LoadDone => Reply::Ack(None),
                WorkerToMain::Error { message, .. } => Reply::Ack(Some(message)),
                other => {
                    observe(progress, id, other);
                    Reply::Ignored
                }
            })?;

        Ok(match acks {
            Wait::Done(acked) => {
                let mut rejected: Rejections = acked
                    .into_iter()
                    .filter_map(|(id, failure)| failure.map(|message| (id, message)))
                    .collect();
                rejected.sort_by_key(|(id, _)| *id);
                if rejected.is_empty() {
                    log::info!("Index loaded on all {} workers", worker_ids.len());
                }
                Wait::Done(rejected)
            }
            Wait::Aborted => Wait::Aborted,
        })
    }
}

/// Generate this pass's tasks and prime the dispatcher.
fn begin_pass(
    session: &mut Session,
    partitioner: &mut TaskPartitioner,
) -> Result<DispatchState, SessionError> {
    let Session {
        pool,
        params,
        dispatcher,
        progress,
        render_progress,
        image,
        render_started,
        phase,
        ..
    } = session;
    let Some(pool) = pool.as_mut() else {
        return Err(SessionError::WrongPhase {
            operation: "start render",
            phase: phase.name(),
        });
    };

    let worker_ids = pool.worker_ids();
    pool.ensure_initialized(&worker_ids)?;
    pool.reset_done();
    let (mode, requested) = if params.incremental {
        // One tile per worker, refined once per ray.
        let passes = params.camera.rays_per_pixel;
        (DispatchMode::Incremental { passes }, worker_ids.len() as u32)
    } else {
        (DispatchMode::Batch, params.task_count)
    };
    let tasks = partitioner.partition(params, requested);

    log::info!(
        "Starting render: {} tasks on {} workers ({:?})",
        tasks.len(),
        worker_ids.len(),
        mode
    );

    *render_progress = RenderProgress::new(tasks.len() as u32);
    *render_started = Some(Instant::now());
    progress.clear();
    image.clear();
    *phase = SessionPhase::Rendering;

    let mut next = Dispatcher::new(mode, worker_ids, tasks);
    let state = next.prime(pool);
    *dispatcher = Some(next);
    state
}

fn handle_render_message(
    session: &mut Session,
    worker_id: usize,
    message: WorkerToMain,
) -> Result<DispatchState, SessionError> {
    let Session {
        pool,
        dispatcher,
        progress,
        render_progress,
        image,
        render_started,
        ..
    } = session;
    let (Some(pool), Some(dispatcher)) = (pool.as_mut(), dispatcher.as_mut()) else {
        return Ok(DispatchState::Running);
    };
    let elapsed = render_started
        .map(|started| started.elapsed())
        .unwrap_or_default();

    let state = match message {
        WorkerToMain::RenderDone { output } => {
            match (output, dispatcher.take_in_flight(worker_id)) {
                (Some(output), Some(task)) => {
                    let task_id = task.task_id;
                    if output.task.task_id != task_id {
                        log::warn!(
                            "Worker {} returned task {} while rendering task {}; dropped",
                            worker_id,
                            output.task.task_id,
                            task_id
                        );
                    } else if image.apply_tile(TileOutput {
                        task,
                        pixels: output.pixels,
                    }) {
                        render_progress.step(elapsed);
                    } else {
                        log::warn!(
                            "Worker {} returned pixels that do not fit task {}; dropped",
                            worker_id,
                            task_id
                        );
                    }
                }
                (Some(output), None) => log::warn!(
                    "Unexpected tile for task {} from worker {}; dropped",
                    output.task.task_id,
                    worker_id
                ),
                (None, Some(task)) => log::warn!(
                    "Worker {} produced no pixels for task {}",
                    worker_id,
                    task.task_id
                ),
                (None, None) => {}
            }
            dispatcher.on_render_done(pool, worker_id)?
        }

        WorkerToMain::IncrementalRenderPartial { task, pass, pixels } => {
            match dispatcher.in_flight(worker_id) {
                Some(expected) if expected.task_id == task.task_id => {
                    if !image.apply_partial(expected.clone(), pass, pixels) {
                        log::warn!(
                            "Dropping pass {} of task {} from worker {}",
                            pass,
                            task.task_id,
                            worker_id
                        );
                    }
                }
                _ => log::warn!(
                    "Unexpected partial for task {} from worker {}; dropped",
                    task.task_id,
                    worker_id
                ),
            }
            DispatchState::of(&*pool)
        }

        WorkerToMain::IncrementalRenderDone { task_id } => {
            let expected = dispatcher.in_flight(worker_id).map(|task| task.task_id) == Some(task_id);
            let state = dispatcher.on_incremental_done(pool, worker_id, task_id)?;
            if expected {
                render_progress.step(elapsed);
            }
            state
        }

        other => {
            observe(progress, worker_id, other);
            DispatchState::of(&*pool)
        }
    };

    Ok(state)
}

fn complete(session: &mut Session) {
    let elapsed = session.render_time();
    session.render_progress.finish(elapsed);
    session.phase = SessionPhase::Completed;

    let progress = session.render_progress;
    let rays = session.progress.total_rays();
    log::info!(
        "Render complete: {}/{} tasks in {:.1} ms, {} rays",
        progress.completed_steps,
        progress.total_steps,
        progress.elapsed_ms,
        rays
    );
}

/// Messages that do not drive the state machine: progress, logs and errors.
fn observe(progress: &mut ProgressAggregator, worker_id: usize, message: WorkerToMain) {
    match message {
        WorkerToMain::ProgressUpdate {
            event,
            task_id,
            progress: fraction,
            rays,
        } => progress.record(worker_id, &event, task_id, fraction, rays),
        WorkerToMain::Log { message } => log::debug!("[worker {}] {}", worker_id, message),
        WorkerToMain::Error { task_id, message } => match task_id {
            Some(task_id) => log::error!("Worker {} failed task {}: {}", worker_id, task_id, message),
            None => log::error!("Worker {} error: {}", worker_id, message),
        },
        other => log::warn!(
            "Ignoring unexpected {} from worker {}",
            other.kind(),
            worker_id
        ),
    }
}
