pub mod dispatch;
pub mod index_coordinator;
pub mod worker_handle;
pub mod worker_pool;

pub use dispatch::{DispatchMode, DispatchState, Dispatcher, TaskSink};
pub use index_coordinator::{
    IndexCoordinator, IndexPhase, IndexSource, IndexTransport, Rejections,
};
pub use worker_handle::WorkerHandle;
pub use worker_pool::{PoolEvent, Reply, UnitFactory, Wait, WorkerPool};
