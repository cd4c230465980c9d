pub mod cancellation;
pub mod compute_unit;
pub mod test_image;
pub mod worker;

pub use cancellation::{CancellationChecker, NeverCancel, StopFlag};
pub use compute_unit::{ComputeError, ComputeUnit, NullProgress, ProgressSink};
pub use test_image::TestImageUnit;
pub use worker::{run_worker, EVENT_BUILD_INDEX, EVENT_INCREMENTAL_RENDER, EVENT_RENDER};
