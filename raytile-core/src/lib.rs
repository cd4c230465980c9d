pub mod camera;
pub mod config;
pub mod messages;
pub mod partition;
pub mod pixel_rect;
pub mod pixels;
pub mod scene;
pub mod task;

pub use camera::{CameraParams, Mat4, Projection};
pub use config::{resolve_worker_count, ParamsError, QualityParams, RenderParams};
pub use messages::{MainToWorker, WorkerEnvelope, WorkerToMain};
pub use partition::{effective_grid_side, generate_tiles, grid_side, partition, TaskPartitioner};
pub use pixel_rect::PixelRect;
pub use pixels::{PixelBlock, BYTES_PER_PIXEL};
pub use scene::{IndexBlob, SceneAssets, SceneKey, Texture};
pub use task::{RenderTask, TileOutput};
