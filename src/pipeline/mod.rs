pub mod record;
pub mod operation;
pub mod executor;

pub use record::{LabelRow, Record, ANGLE_FIELD, FILENAME_FIELD};
pub use operation::{resolve, Operation, OperationDescriptor, OperationKind, RotationDirection};
pub use executor::Pipeline;
