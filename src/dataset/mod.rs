pub mod index;
pub mod walker;
pub mod materializer;

pub use index::{DatasetIndex, INDEX_FILE_NAME};
pub use walker::{walk, SourceDataset, Walk};
pub use materializer::{move_dataset, MaterializeMode, Materialized, Materializer, MoveSummary};
