//! Build-once, load-everywhere protocol for the shared scene index.
//!
//! One designated worker builds the index over its already-initialized
//! scene, or a cached blob is used instead. The blob is then loaded into
//! every worker, the builder included, and the phase completes only when all
//! of them acknowledge. A cached blob that any worker rejects is replaced by
//! a fresh build; a freshly built blob that is rejected fails the session.

use super::worker_pool::Wait;
use crate::blob_store::BlobStore;
use crate::{SessionError, Stage};
use raytile_core::{IndexBlob, SceneKey};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexPhase {
    NotStarted,
    CheckingCache,
    CacheHit,
    Building,
    Broadcasting,
    Loaded,
    Cancelled,
}

/// Where the loaded index came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum IndexSource {
    Built,
    Cached,
}

/// The pool operations the coordinator needs.
pub trait IndexTransport {
    fn aborted(&self) -> bool;

    /// Ask `worker_id` to build and wait for its `BuildDone`.
    fn build(&mut self, worker_id: usize) -> Result<Wait<IndexBlob>, SessionError>;

    /// Send `index` to every worker and wait until each has answered, either
    /// with `LoadDone` or with an error. Returns the workers that refused it.
    fn load_all(&mut self, index: &IndexBlob) -> Result<Wait<Rejections>, SessionError>;
}

/// `(worker_id, message)` for each worker that could not load an index.
pub type Rejections = Vec<(usize, String)>;

pub struct IndexCoordinator {
    phase: IndexPhase,
    scene_key: SceneKey,
    index_worker: usize,
    builds_requested: u32,
}

impl IndexCoordinator {
    pub fn new(scene_key: SceneKey) -> Self {
        Self {
            phase: IndexPhase::NotStarted,
            scene_key,
            index_worker: 0,
            builds_requested: 0,
        }
    }

    pub fn phase(&self) -> IndexPhase {
        self.phase
    }

    pub fn scene_key(&self) -> &SceneKey {
        &self.scene_key
    }

    pub fn builds_requested(&self) -> u32 {
        self.builds_requested
    }

    /// Run the whole protocol once. `store` is consulted before building and
    /// receives the freshly built blob, which also replaces a rejected entry.
    /// At most one build is ever requested.
    pub fn run(
        &mut self,
        transport: &mut dyn IndexTransport,
        store: Option<&dyn BlobStore>,
    ) -> Result<Wait<IndexSource>, SessionError> {
        if self.phase != IndexPhase::NotStarted {
            return Err(SessionError::IndexAlreadyBuilt);
        }

        self.phase = IndexPhase::CheckingCache;
        if transport.aborted() {
            return Ok(self.cancel());
        }

        if let Some(index) = self.lookup(store) {
            self.phase = IndexPhase::CacheHit;
            log::info!("Using cached index for scene {}", self.scene_key);
            let rejected = match self.broadcast(transport, &index)? {
                Wait::Done(rejected) => rejected,
                Wait::Aborted => return Ok(self.cancel()),
            };
            if rejected.is_empty() {
                self.phase = IndexPhase::Loaded;
                return Ok(Wait::Done(IndexSource::Cached));
            }
            for (worker_id, message) in &rejected {
                log::warn!("Worker {} rejected cached index: {}", worker_id, message);
            }
            log::warn!("Discarding cached index for scene {}", self.scene_key);
        }

        let index = match self.build(transport)? {
            Wait::Done(index) => index,
            Wait::Aborted => return Ok(self.cancel()),
        };
        if let Some(store) = store {
            if let Err(e) = store.put(&self.scene_key, &index) {
                log::warn!("Failed to cache index for scene {}: {}", self.scene_key, e);
            }
        }

        match self.broadcast(transport, &index)? {
            Wait::Done(rejected) => match rejected.into_iter().next() {
                None => {
                    self.phase = IndexPhase::Loaded;
                    Ok(Wait::Done(IndexSource::Built))
                }
                Some((worker_id, message)) => Err(SessionError::WorkerFailed {
                    stage: Stage::LoadIndex,
                    worker_id,
                    message,
                }),
            },
            Wait::Aborted => Ok(self.cancel()),
        }
    }

    fn broadcast(
        &mut self,
        transport: &mut dyn IndexTransport,
        index: &IndexBlob,
    ) -> Result<Wait<Rejections>, SessionError> {
        if transport.aborted() {
            return Ok(Wait::Aborted);
        }
        self.phase = IndexPhase::Broadcasting;
        log::info!("Loading {} byte index into all workers", index.len());
        transport.load_all(index)
    }

    fn lookup(&self, store: Option<&dyn BlobStore>) -> Option<IndexBlob> {
        let store = store?;
        match store.get(&self.scene_key) {
            Ok(found) => found,
            Err(e) => {
                log::warn!("Index cache lookup failed, rebuilding: {}", e);
                None
            }
        }
    }

    fn build(&mut self, transport: &mut dyn IndexTransport) -> Result<Wait<IndexBlob>, SessionError> {
        if self.builds_requested > 0 {
            return Err(SessionError::IndexAlreadyBuilt);
        }
        if transport.aborted() {
            return Ok(Wait::Aborted);
        }

        self.phase = IndexPhase::Building;
        self.builds_requested += 1;
        log::info!("Building index on worker {}", self.index_worker);
        transport.build(self.index_worker)
    }

    fn cancel<T>(&mut self) -> Wait<T> {
        log::info!("Index phase cancelled during {:?}", self.phase);
        self.phase = IndexPhase::Cancelled;
        Wait::Aborted
    }
}
