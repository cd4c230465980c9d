pub mod image_accumulator;
pub mod progress_aggregator;
pub mod render_progress;

pub use image_accumulator::{ImageAccumulator, TileRecord};
pub use progress_aggregator::{EventProgress, ProgressAggregator, ProgressSnapshot, WorkerProgress};
pub use render_progress::RenderProgress;
