pub mod loader;
pub mod grad;
pub mod session;
pub mod checkpoint;
pub mod sink;
pub mod epoch_stats;
pub mod controller;
pub mod trainer;

pub use loader::{Batch, BatchSource, DataLoader, Sample, SteeringDataset};
pub use grad::{no_grad, NoGradGuard};
pub use session::{SessionConfig, SessionPaths};
pub use checkpoint::{allocate_run_dir, CheckpointStore, CheckpointTag, RunId};
pub use sink::{JsonlSink, MetricSink};
pub use epoch_stats::{EpochStats, TrainingReport};
pub use controller::{EpochLoop, LoopConfig};
pub use trainer::run_session;
