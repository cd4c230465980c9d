use crate::{IndexBlob, PixelBlock, RenderParams, RenderTask, SceneAssets, TileOutput};
use serde::{Deserialize, Serialize};

/// Messages sent from the controller to a worker.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum MainToWorker {
    /// Load scene data and camera-independent settings. Answered by `InitDone`.
    Initialize {
        worker_id: usize,
        params: RenderParams,
        assets: SceneAssets,
    },

    /// Build the shared index over the initialized scene. Answered by `BuildDone`.
    BuildIndex,

    /// Install a built (or cached) index. Answered by `LoadDone`.
    LoadIndex { index: IndexBlob },

    /// Pull the first task. Answered by an empty `RenderDone`.
    AskForWork,

    /// Render one tile. Answered by `RenderDone` carrying the pixels.
    RenderTile { task: RenderTask },

    /// Refine one tile over `passes` ray-passes, reporting each pass.
    IncrementalRender { task: RenderTask, passes: u32 },

    /// No work available - worker should idle.
    NoWork,

    /// Terminate worker.
    Terminate,
}

/// Messages sent from a worker to the controller.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum WorkerToMain {
    InitDone,

    BuildDone { index: IndexBlob },

    LoadDone,

    /// `None` after `AskForWork` or a failed tile, `Some` after a rendered tile.
    RenderDone { output: Option<TileOutput> },

    /// Image so far for one tile after ray-pass `pass` (0-based).
    IncrementalRenderPartial {
        task: RenderTask,
        pass: u32,
        pixels: PixelBlock,
    },

    IncrementalRenderDone { task_id: u64 },

    /// Fire-and-forget progress. `rays` is the worker's cumulative count.
    ProgressUpdate {
        event: String,
        task_id: Option<u64>,
        progress: f64,
        rays: u64,
    },

    /// Forwarded log line from the worker.
    Log { message: String },

    /// Worker encountered an error.
    Error {
        task_id: Option<u64>,
        message: String,
    },
}

impl WorkerToMain {
    /// Short tag for logging without dumping payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerToMain::InitDone => "InitDone",
            WorkerToMain::BuildDone { .. } => "BuildDone",
            WorkerToMain::LoadDone => "LoadDone",
            WorkerToMain::RenderDone { .. } => "RenderDone",
            WorkerToMain::IncrementalRenderPartial { .. } => "IncrementalRenderPartial",
            WorkerToMain::IncrementalRenderDone { .. } => "IncrementalRenderDone",
            WorkerToMain::ProgressUpdate { .. } => "ProgressUpdate",
            WorkerToMain::Log { .. } => "Log",
            WorkerToMain::Error { .. } => "Error",
        }
    }
}

/// A worker's serialized message tagged with the sender, as it travels to the controller.
#[derive(Debug, Clone)]
pub struct WorkerEnvelope {
    pub worker_id: usize,
    pub payload: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{partition, PixelRect};

    fn sample_task() -> RenderTask {
        partition(&RenderParams::default(), 4, 0).remove(0)
    }

    #[test]
    fn main_to_worker_tagged_by_type() {
        let json = serde_json::to_string(&MainToWorker::AskForWork).unwrap();
        assert_eq!(json, r#"{"type":"AskForWork"}"#);

        let parsed: MainToWorker = serde_json::from_str(r#"{"type":"Terminate"}"#).unwrap();
        assert_eq!(parsed, MainToWorker::Terminate);
    }

    #[test]
    fn render_tile_roundtrip() {
        let msg = MainToWorker::RenderTile {
            task: sample_task(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: MainToWorker = serde_json::from_str(&json).unwrap();
        match parsed {
            MainToWorker::RenderTile { task } => {
                assert_eq!(task.task_id, 0);
                assert_eq!(task.tile, PixelRect::new(0, 0, 50, 50));
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn render_done_without_output() {
        let json = r#"{"type":"RenderDone","output":null}"#;
        let msg: WorkerToMain = serde_json::from_str(json).unwrap();
        assert_eq!(msg, WorkerToMain::RenderDone { output: None });
    }

    #[test]
    fn build_done_carries_base64_blob() {
        let msg = WorkerToMain::BuildDone {
            index: IndexBlob::new(vec![1, 2, 3]),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""index":"AQID""#), "{json}");
    }

    #[test]
    fn unknown_type_is_rejected() {
        let result = serde_json::from_str::<WorkerToMain>(r#"{"type":"Teleport"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn progress_update_roundtrip() {
        let msg = WorkerToMain::ProgressUpdate {
            event: "render".to_string(),
            task_id: Some(3),
            progress: 0.5,
            rays: 1200,
        };
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: WorkerToMain = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
        assert_eq!(parsed.kind(), "ProgressUpdate");
    }
}
