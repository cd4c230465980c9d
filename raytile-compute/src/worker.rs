//! Worker-side message loop.
//!
//! One loop runs per worker thread, owning exactly one compute unit. It
//! decodes commands from the controller, calls the unit, and replies on the
//! shared outbox tagged with its worker id. The loop ends on `Terminate`,
//! when the controller drops its end of the inbox, or once the cancellation
//! flag is raised.

use crate::{CancellationChecker, ComputeUnit, ProgressSink};
use crossbeam_channel::{Receiver, Sender};
use raytile_core::{
    IndexBlob, MainToWorker, RenderParams, RenderTask, SceneAssets, TileOutput, WorkerEnvelope,
    WorkerToMain,
};
use std::time::Instant;

/// Progress event names reported by the worker loop.
pub const EVENT_BUILD_INDEX: &str = "buildIndex";
pub const EVENT_RENDER: &str = "render";
pub const EVENT_INCREMENTAL_RENDER: &str = "incrementalRender";

enum Flow {
    Continue,
    Stop,
}

/// Outbound half of a worker: identity, reply channel and the stop flag.
struct WorkerLink<C> {
    worker_id: usize,
    outbox: Sender<WorkerEnvelope>,
    cancel: C,
}

impl<C: CancellationChecker> WorkerLink<C> {
    /// Serialize and post a reply. Returns false once the controller is gone
    /// or the worker has been cancelled.
    fn send(&self, message: &WorkerToMain) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(e) => {
                log::error!(
                    "Worker {} failed to encode {}: {}",
                    self.worker_id,
                    message.kind(),
                    e
                );
                return true;
            }
        };
        self.outbox
            .send(WorkerEnvelope {
                worker_id: self.worker_id,
                payload,
            })
            .is_ok()
    }

    fn log(&self, message: String) -> bool {
        self.send(&WorkerToMain::Log { message })
    }

    fn error(&self, task_id: Option<u64>, message: String) -> bool {
        self.send(&WorkerToMain::Error { task_id, message })
    }
}

impl<C: CancellationChecker> ProgressSink for WorkerLink<C> {
    fn report(&mut self, event: &str, task_id: Option<u64>, progress: f64, rays: u64) {
        self.send(&WorkerToMain::ProgressUpdate {
            event: event.to_string(),
            task_id,
            progress,
            rays,
        });
    }
}

struct Worker<U, C> {
    unit: U,
    link: WorkerLink<C>,
}

/// Run the message loop until terminated. Blocks the calling thread.
pub fn run_worker<U, C>(
    worker_id: usize,
    unit: U,
    inbox: Receiver<String>,
    outbox: Sender<WorkerEnvelope>,
    cancel: C,
) where
    U: ComputeUnit,
    C: CancellationChecker,
{
    let mut worker = Worker {
        unit,
        link: WorkerLink {
            worker_id,
            outbox,
            cancel,
        },
    };

    for raw in inbox.iter() {
        if worker.link.cancel.is_cancelled() {
            break;
        }

        let request = match serde_json::from_str::<MainToWorker>(&raw) {
            Ok(request) => request,
            Err(e) => {
                if !worker.link.error(None, format!("Parse error: {}", e)) {
                    break;
                }
                continue;
            }
        };

        if let Flow::Stop = worker.handle(request) {
            break;
        }
    }

    log::debug!("Worker {} stopped", worker_id);
}

impl<U: ComputeUnit, C: CancellationChecker> Worker<U, C> {
    fn handle(&mut self, request: MainToWorker) -> Flow {
        let delivered = match request {
            MainToWorker::Initialize {
                worker_id: _,
                params,
                assets,
            } => self.initialize(&params, &assets),
            MainToWorker::BuildIndex => self.build_index(),
            MainToWorker::LoadIndex { index } => self.load_index(&index),
            MainToWorker::AskForWork => self.link.send(&WorkerToMain::RenderDone { output: None }),
            MainToWorker::RenderTile { task } => self.render(task),
            MainToWorker::IncrementalRender { task, passes } => {
                self.incremental_render(task, passes)
            }
            MainToWorker::NoWork => true,
            MainToWorker::Terminate => return Flow::Stop,
        };

        if delivered {
            Flow::Continue
        } else {
            Flow::Stop
        }
    }

    fn initialize(&mut self, params: &RenderParams, assets: &SceneAssets) -> bool {
        let start = Instant::now();
        match self.unit.initialize(params, assets) {
            Ok(()) => {
                self.link
                    .log(format!("Initialized in {} ms", start.elapsed().as_millis()))
                    && self.link.send(&WorkerToMain::InitDone)
            }
            Err(e) => self.link.error(None, format!("Initialize failed: {}", e)),
        }
    }

    fn build_index(&mut self) -> bool {
        let start = Instant::now();
        match self.unit.build_index(&mut self.link) {
            Ok(index) => {
                self.link.log(format!(
                    "Built index ({} bytes) in {} ms",
                    index.len(),
                    start.elapsed().as_millis()
                )) && self.link.send(&WorkerToMain::BuildDone { index })
            }
            Err(e) => self.link.error(None, format!("Index build failed: {}", e)),
        }
    }

    fn load_index(&mut self, index: &IndexBlob) -> bool {
        match self.unit.load_index(index) {
            Ok(()) => self.link.send(&WorkerToMain::LoadDone),
            Err(e) => self.link.error(None, format!("Index load failed: {}", e)),
        }
    }

    fn render(&mut self, task: RenderTask) -> bool {
        let start = Instant::now();
        match self.unit.render(&task, &mut self.link) {
            Ok(pixels) => {
                let logged = self.link.log(format!(
                    "Rendered task {} in {} ms",
                    task.task_id,
                    start.elapsed().as_millis()
                ));
                logged
                    && self.link.send(&WorkerToMain::RenderDone {
                        output: Some(TileOutput { task, pixels }),
                    })
            }
            Err(e) => {
                // The tile is lost; ask for the next one anyway.
                self.link
                    .error(Some(task.task_id), format!("Render failed: {}", e))
                    && self.link.send(&WorkerToMain::RenderDone { output: None })
            }
        }
    }

    fn incremental_render(&mut self, task: RenderTask, passes: u32) -> bool {
        for pass in 0..passes {
            if self.link.cancel.is_cancelled() {
                return false;
            }
            match self.unit.render_pass(&task, pass, &mut self.link) {
                Ok(pixels) => {
                    let sent = self.link.send(&WorkerToMain::IncrementalRenderPartial {
                        task: task.clone(),
                        pass,
                        pixels,
                    });
                    if !sent {
                        return false;
                    }
                }
                Err(e) => {
                    if !self.link.error(
                        Some(task.task_id),
                        format!("Pass {} failed: {}", pass, e),
                    ) {
                        return false;
                    }
                    break;
                }
            }
        }

        self.link.send(&WorkerToMain::IncrementalRenderDone {
            task_id: task.task_id,
        })
    }
}
