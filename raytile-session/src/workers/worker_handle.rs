use crate::SessionError;
use crossbeam_channel::{unbounded, Sender};
use raytile_compute::{run_worker, ComputeUnit, StopFlag};
use raytile_core::{MainToWorker, RenderParams, SceneAssets, WorkerEnvelope};
use std::thread::{self, JoinHandle};

/// Controller-side handle to one worker thread and the compute unit it owns.
pub struct WorkerHandle {
    id: usize,
    sender: Option<Sender<String>>,
    thread: Option<JoinHandle<()>>,
    cancel: StopFlag,
    initialized: bool,
    done: bool,
}

impl WorkerHandle {
    /// Start a worker thread running `unit`. Replies go to `outbox`.
    pub fn spawn<U>(id: usize, unit: U, outbox: Sender<WorkerEnvelope>) -> Result<Self, SessionError>
    where
        U: ComputeUnit + 'static,
    {
        let (sender, inbox) = unbounded();
        let cancel = StopFlag::new();
        let checker = cancel.clone();

        let thread = thread::Builder::new()
            .name(format!("raytile-worker-{}", id))
            .spawn(move || run_worker(id, unit, inbox, outbox, checker))
            .map_err(|source| SessionError::Spawn {
                worker_id: id,
                source,
            })?;

        log::debug!("Worker {} spawned", id);

        Ok(Self {
            id,
            sender: Some(sender),
            thread: Some(thread),
            cancel,
            initialized: false,
            done: false,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Encode and queue a command. Posting to a terminated handle is a no-op.
    pub fn post(&self, message: &MainToWorker) -> Result<(), SessionError> {
        let Some(sender) = &self.sender else {
            log::debug!("Dropping message for terminated worker {}", self.id);
            return Ok(());
        };
        let payload = serde_json::to_string(message)?;
        if sender.send(payload).is_err() {
            log::warn!("Worker {} has exited; message dropped", self.id);
        }
        Ok(())
    }

    /// Send the scene and settings. The unit answers once with `InitDone`.
    pub fn initialize(&self, params: &RenderParams, assets: &SceneAssets) -> Result<(), SessionError> {
        self.post(&MainToWorker::Initialize {
            worker_id: self.id,
            params: params.clone(),
            assets: assets.clone(),
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn set_initialized(&mut self) {
        self.initialized = true;
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn set_done(&mut self, done: bool) {
        self.done = done;
    }

    pub fn is_terminated(&self) -> bool {
        self.sender.is_none()
    }

    /// True while the worker thread is still executing.
    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .map(|thread| !thread.is_finished())
            .unwrap_or(false)
    }

    /// Stop the worker. Never blocks on a call inside the unit; the thread
    /// exits once that call returns. Safe to call repeatedly.
    pub fn terminate(&mut self) {
        let Some(sender) = self.sender.take() else {
            return;
        };
        self.cancel.raise();
        if let Ok(payload) = serde_json::to_string(&MainToWorker::Terminate) {
            let _ = sender.send(payload);
        }
        self.done = true;
        log::debug!("Worker {} terminated", self.id);
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}
