use super::dispatch::TaskSink;
use super::worker_handle::WorkerHandle;
use crate::abort::AbortSignal;
use crate::{SessionError, Stage};
use crossbeam_channel::{select, unbounded, Receiver, RecvError};
use raytile_compute::ComputeUnit;
use raytile_core::{MainToWorker, WorkerEnvelope, WorkerToMain};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

/// Creates the compute unit for each spawned worker.
pub trait UnitFactory: Send {
    fn create(&mut self, worker_id: usize) -> Box<dyn ComputeUnit>;
}

impl<F> UnitFactory for F
where
    F: FnMut(usize) -> Box<dyn ComputeUnit> + Send,
{
    fn create(&mut self, worker_id: usize) -> Box<dyn ComputeUnit> {
        self(worker_id)
    }
}

/// One step of the controller's wait on the pool.
#[derive(Debug)]
pub enum PoolEvent {
    Message {
        worker_id: usize,
        message: WorkerToMain,
    },
    Aborted,
    TimedOut,
    /// Every worker thread has exited.
    Disconnected,
}

/// How a barrier treats one incoming message.
pub enum Reply<T> {
    Ack(T),
    Failed(String),
    Ignored,
}

/// Outcome of a wait that an abort may cut short.
#[derive(Debug, PartialEq)]
pub enum Wait<T> {
    Done(T),
    Aborted,
}

enum Woken {
    Envelope(Result<WorkerEnvelope, RecvError>),
    Abort,
    Timeout,
}

/// The live workers of one session and the channel they all reply on.
///
/// Each pool gets a fresh event channel, so replies from a previous session's
/// threads can never reach it.
pub struct WorkerPool {
    handles: Vec<WorkerHandle>,
    events: Receiver<WorkerEnvelope>,
    abort: AbortSignal,
    ack_timeout: Option<Duration>,
}

impl WorkerPool {
    pub fn spawn(
        count: usize,
        factory: &mut dyn UnitFactory,
        abort: AbortSignal,
        ack_timeout: Option<Duration>,
    ) -> Result<Self, SessionError> {
        let (outbox, events) = unbounded();
        let mut handles = Vec::with_capacity(count);
        for id in 0..count {
            // Handles spawned so far are terminated on drop if this fails.
            handles.push(WorkerHandle::spawn(id, factory.create(id), outbox.clone())?);
        }

        log::info!("Created worker pool with {} workers", count);

        Ok(Self {
            handles,
            events,
            abort,
            ack_timeout,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    pub fn worker_ids(&self) -> Vec<usize> {
        self.handles.iter().map(WorkerHandle::id).collect()
    }

    pub fn handle(&self, worker_id: usize) -> Option<&WorkerHandle> {
        self.handles.get(worker_id)
    }

    pub fn handle_mut(&mut self, worker_id: usize) -> Option<&mut WorkerHandle> {
        self.handles.get_mut(worker_id)
    }

    pub fn abort_requested(&self) -> bool {
        self.abort.is_raised()
    }

    pub fn post(&self, worker_id: usize, message: &MainToWorker) -> Result<(), SessionError> {
        match self.handles.get(worker_id) {
            Some(handle) => handle.post(message),
            None => {
                log::warn!("No worker {} in pool", worker_id);
                Ok(())
            }
        }
    }

    pub fn broadcast(&self, message: &MainToWorker) -> Result<(), SessionError> {
        for handle in &self.handles {
            handle.post(message)?;
        }
        Ok(())
    }

    pub fn all_done(&self) -> bool {
        self.handles.iter().all(WorkerHandle::is_done)
    }

    /// Build and render commands need an acknowledged `Initialize`.
    pub fn ensure_initialized(&self, worker_ids: &[usize]) -> Result<(), SessionError> {
        let pending = worker_ids
            .iter()
            .find(|&&id| !self.handle(id).is_some_and(WorkerHandle::is_initialized));
        match pending {
            Some(&worker_id) => Err(SessionError::NotInitialized { worker_id }),
            None => Ok(()),
        }
    }

    /// Clear `done` flags before another pass over the same pool.
    pub fn reset_done(&mut self) {
        for handle in &mut self.handles {
            handle.set_done(false);
        }
    }

    pub fn terminate_all(&mut self) {
        for handle in &mut self.handles {
            handle.terminate();
        }
    }

    /// Block until a worker message, an abort, or `deadline`.
    pub fn recv(&self, deadline: Option<Instant>) -> PoolEvent {
        loop {
            if self.abort.is_raised() {
                return PoolEvent::Aborted;
            }

            let woken = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    select! {
                        recv(self.events) -> envelope => Woken::Envelope(envelope),
                        recv(self.abort.wake()) -> _ => Woken::Abort,
                        default(remaining) => Woken::Timeout,
                    }
                }
                None => select! {
                    recv(self.events) -> envelope => Woken::Envelope(envelope),
                    recv(self.abort.wake()) -> _ => Woken::Abort,
                },
            };

            match woken {
                Woken::Envelope(Ok(envelope)) => {
                    if let Some(event) = self.decode(envelope) {
                        return event;
                    }
                }
                Woken::Envelope(Err(_)) => return PoolEvent::Disconnected,
                Woken::Abort => continue,
                Woken::Timeout => return PoolEvent::TimedOut,
            }
        }
    }

    fn decode(&self, envelope: WorkerEnvelope) -> Option<PoolEvent> {
        let worker_id = envelope.worker_id;
        match self.handles.get(worker_id) {
            None => {
                log::warn!("Message from unknown worker {}", worker_id);
                return None;
            }
            Some(handle) if handle.is_terminated() => {
                log::debug!("Ignoring message from terminated worker {}", worker_id);
                return None;
            }
            Some(_) => {}
        }

        match serde_json::from_str::<WorkerToMain>(&envelope.payload) {
            Ok(message) => Some(PoolEvent::Message { worker_id, message }),
            Err(e) => {
                log::warn!("Worker {} sent invalid message: {}", worker_id, e);
                None
            }
        }
    }

    /// Wait until every worker in `from` acknowledges.
    ///
    /// `classify` sees every message that arrives meanwhile. An `Ack` from a
    /// waited-on worker is collected, a `Failed` from one fails the barrier.
    /// The whole barrier shares one `ack_timeout`.
    pub fn gather<T, F>(
        &self,
        stage: Stage,
        from: &[usize],
        mut classify: F,
    ) -> Result<Wait<Vec<(usize, T)>>, SessionError>
    where
        F: FnMut(usize, WorkerToMain) -> Reply<T>,
    {
        let mut pending: BTreeSet<usize> = from.iter().copied().collect();
        let mut acked = Vec::with_capacity(pending.len());
        let deadline = self.ack_timeout.map(|timeout| Instant::now() + timeout);

        while !pending.is_empty() {
            match self.recv(deadline) {
                PoolEvent::Message { worker_id, message } => match classify(worker_id, message) {
                    Reply::Ack(value) => {
                        if pending.remove(&worker_id) {
                            acked.push((worker_id, value));
                        } else {
                            log::warn!("Unexpected {} ack from worker {}", stage, worker_id);
                        }
                    }
                    Reply::Failed(message) => {
                        if pending.contains(&worker_id) {
                            return Err(SessionError::WorkerFailed {
                                stage,
                                worker_id,
                                message,
                            });
                        }
                        log::error!("Worker {} failed outside {}: {}", worker_id, stage, message);
                    }
                    Reply::Ignored => {}
                },
                PoolEvent::Aborted => return Ok(Wait::Aborted),
                PoolEvent::TimedOut => {
                    return Err(SessionError::AckTimeout {
                        stage,
                        timeout: self.ack_timeout.unwrap_or_default(),
                        missing: pending.into_iter().collect(),
                    })
                }
                PoolEvent::Disconnected => {
                    let worker_id = pending.iter().next().copied().unwrap_or_default();
                    return Err(SessionError::WorkerFailed {
                        stage,
                        worker_id,
                        message: "worker exited before acknowledging".to_string(),
                    });
                }
            }
        }

        Ok(Wait::Done(acked))
    }
}

impl TaskSink for WorkerPool {
    fn send(&mut self, worker_id: usize, message: &MainToWorker) -> Result<(), SessionError> {
        self.post(worker_id, message)
    }

    fn mark_done(&mut self, worker_id: usize) {
        if let Some(handle) = self.handles.get_mut(worker_id) {
            handle.set_done(true);
        }
    }

    fn is_done(&self, worker_id: usize) -> bool {
        self.handles.get(worker_id).is_some_and(WorkerHandle::is_done)
    }

    fn all_done(&self) -> bool {
        WorkerPool::all_done(self)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.terminate_all();
    }
}
