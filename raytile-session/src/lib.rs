pub mod abort;
pub mod blob_store;
pub mod config;
pub mod controller;
pub mod error;
pub mod rendering;
pub mod session;
pub mod workers;

pub use abort::{abort_pair, AbortHandle, AbortSignal};
pub use blob_store::{BlobStore, FileBlobStore, MemoryBlobStore};
pub use config::{SessionConfig, DEFAULT_ACK_TIMEOUT};
pub use controller::SessionController;
pub use error::{SessionError, Stage, StoreError};
pub use rendering::{
    EventProgress, ImageAccumulator, ProgressAggregator, ProgressSnapshot, RenderProgress,
    TileRecord, WorkerProgress,
};
pub use session::{Session, SessionPhase, SessionSummary};
pub use workers::{
    DispatchMode, DispatchState, Dispatcher, IndexCoordinator, IndexPhase, IndexSource,
    UnitFactory, WorkerHandle, WorkerPool,
};
