use raytile_core::ParamsError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Acknowledgement barrier a session waits on during setup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Initialize,
    BuildIndex,
    LoadIndex,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Initialize => "initialize",
            Stage::BuildIndex => "build index",
            Stage::LoadIndex => "load index",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid render parameters: {0}")]
    InvalidParams(#[from] ParamsError),

    #[error("failed to spawn worker {worker_id}: {source}")]
    Spawn {
        worker_id: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage} timed out after {timeout:?}; no reply from workers {missing:?}")]
    AckTimeout {
        stage: Stage,
        timeout: Duration,
        missing: Vec<usize>,
    },

    #[error("worker {worker_id} failed during {stage}: {message}")]
    WorkerFailed {
        stage: Stage,
        worker_id: usize,
        message: String,
    },

    #[error("every worker exited before the render finished")]
    WorkersExited,

    #[error("cannot {operation} while {phase}")]
    WrongPhase {
        operation: &'static str,
        phase: &'static str,
    },

    #[error("worker {worker_id} has not acknowledged initialization")]
    NotInitialized { worker_id: usize },

    #[error("index already built for this session")]
    IndexAlreadyBuilt,

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("blob store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("blob store lock poisoned")]
    Poisoned,
}
