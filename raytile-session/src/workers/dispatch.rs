//! Feeds render tasks to idle workers.
//!
//! Batch mode keeps every pending task on one LIFO stack. A worker pulls its
//! first task with `AskForWork` and gets the next one each time it reports
//! `RenderDone`; once the stack is empty it is marked done and told there is
//! no more work. Incremental mode hands each worker exactly one task up front
//! to refine over several ray-passes.
//!
//! The sink owns the per-worker `done` flags; the pass is drained once all of
//! them are set.

use crate::SessionError;
use raytile_core::{MainToWorker, RenderTask};
use std::collections::HashMap;

/// Where the dispatcher sends commands.
pub trait TaskSink {
    fn send(&mut self, worker_id: usize, message: &MainToWorker) -> Result<(), SessionError>;
    fn mark_done(&mut self, worker_id: usize);
    fn is_done(&self, worker_id: usize) -> bool;
    fn all_done(&self) -> bool;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchMode {
    Batch,
    Incremental { passes: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchState {
    Running,
    /// Every worker is done.
    Drained,
}

impl DispatchState {
    pub fn of(sink: &dyn TaskSink) -> Self {
        if sink.all_done() {
            DispatchState::Drained
        } else {
            DispatchState::Running
        }
    }
}

pub struct Dispatcher {
    mode: DispatchMode,
    workers: Vec<usize>,
    pending: Vec<RenderTask>,
    in_flight: HashMap<usize, RenderTask>,
    dispatched: usize,
}

impl Dispatcher {
    pub fn new(mode: DispatchMode, workers: Vec<usize>, tasks: Vec<RenderTask>) -> Self {
        Self {
            mode,
            workers,
            pending: tasks,
            in_flight: HashMap::new(),
            dispatched: 0,
        }
    }

    /// Tasks sent to a worker so far.
    pub fn dispatched(&self) -> usize {
        self.dispatched
    }

    pub fn in_flight(&self, worker_id: usize) -> Option<&RenderTask> {
        self.in_flight.get(&worker_id)
    }

    /// Start the pass once every worker has the index loaded.
    pub fn prime(&mut self, sink: &mut dyn TaskSink) -> Result<DispatchState, SessionError> {
        match self.mode {
            DispatchMode::Batch => {
                for &worker_id in &self.workers {
                    sink.send(worker_id, &MainToWorker::AskForWork)?;
                }
            }
            DispatchMode::Incremental { passes } => {
                let mut tasks = std::mem::take(&mut self.pending).into_iter();
                for worker_id in self.workers.clone() {
                    match tasks.next() {
                        Some(task) => {
                            sink.send(
                                worker_id,
                                &MainToWorker::IncrementalRender {
                                    task: task.clone(),
                                    passes,
                                },
                            )?;
                            self.in_flight.insert(worker_id, task);
                            self.dispatched += 1;
                        }
                        None => self.finish(sink, worker_id)?,
                    }
                }
                self.pending = tasks.collect();
            }
        }
        Ok(DispatchState::of(sink))
    }

    /// Remove and return the task `worker_id` was rendering.
    pub fn take_in_flight(&mut self, worker_id: usize) -> Option<RenderTask> {
        self.in_flight.remove(&worker_id)
    }

    /// A batch worker finished (or pulled for) a tile: hand it the next task.
    pub fn on_render_done(
        &mut self,
        sink: &mut dyn TaskSink,
        worker_id: usize,
    ) -> Result<DispatchState, SessionError> {
        if self.mode != DispatchMode::Batch {
            log::warn!("Worker {} sent RenderDone during incremental render", worker_id);
            return Ok(DispatchState::of(sink));
        }
        if sink.is_done(worker_id) {
            log::warn!("Worker {} asked for work after finishing", worker_id);
            return Ok(DispatchState::of(sink));
        }
        self.in_flight.remove(&worker_id);

        match self.pending.pop() {
            Some(task) => {
                log::debug!("Dispatching task {} to worker {}", task.task_id, worker_id);
                sink.send(worker_id, &MainToWorker::RenderTile { task: task.clone() })?;
                self.in_flight.insert(worker_id, task);
                self.dispatched += 1;
            }
            None => self.finish(sink, worker_id)?,
        }
        Ok(DispatchState::of(sink))
    }

    /// An incremental worker finished all passes of its tile.
    pub fn on_incremental_done(
        &mut self,
        sink: &mut dyn TaskSink,
        worker_id: usize,
        task_id: u64,
    ) -> Result<DispatchState, SessionError> {
        match self.in_flight.get(&worker_id) {
            Some(task) if task.task_id == task_id => {
                self.in_flight.remove(&worker_id);
                self.finish(sink, worker_id)?;
            }
            _ => log::warn!(
                "Worker {} finished task {} it was not rendering",
                worker_id,
                task_id
            ),
        }
        Ok(DispatchState::of(sink))
    }

    /// Drop every pending and in-flight task.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.in_flight.clear();
    }

    fn finish(&mut self, sink: &mut dyn TaskSink, worker_id: usize) -> Result<(), SessionError> {
        if !sink.is_done(worker_id) {
            sink.mark_done(worker_id);
            sink.send(worker_id, &MainToWorker::NoWork)?;
        }
        Ok(())
    }
}
