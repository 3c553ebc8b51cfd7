pub mod error;
pub mod pipeline;
pub mod dataset;
pub mod model;
pub mod train;

// Convenience re-exports
pub use error::{Error, ErrorKind, Result};
pub use pipeline::executor::Pipeline;
pub use pipeline::operation::{Operation, OperationDescriptor};
pub use pipeline::record::{LabelRow, Record};
pub use dataset::index::DatasetIndex;
pub use dataset::materializer::{move_dataset, MaterializeMode, MoveSummary};
pub use dataset::walker::walk;
pub use model::regressor::DenseRegressor;
pub use model::steering_model::SteeringModel;
pub use train::session::SessionConfig;
pub use train::trainer::run_session;
