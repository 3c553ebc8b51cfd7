use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::pipeline::operation::{Operation, OperationDescriptor, RotationDirection};
use crate::pipeline::record::Record;

/// An ordered chain of operations applied to every record of a dataset walk.
///
/// Every name is resolved and every argument checked when the pipeline is
/// built, so a bad steps file fails before the first image is read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    ops: Vec<Operation>,
}

impl Pipeline {
    pub fn new(ops: Vec<Operation>) -> Pipeline {
        for op in &ops {
            if *op == Operation::Rotate90(RotationDirection::Anticlockwise) {
                warn!("rotate-90 'anticlockwise' is not implemented; the step leaves images unchanged");
            }
        }
        Pipeline { ops }
    }

    pub fn from_descriptors(descriptors: &[OperationDescriptor]) -> Result<Pipeline> {
        let ops = descriptors
            .iter()
            .map(Operation::from_descriptor)
            .collect::<Result<Vec<_>>>()?;
        debug!(steps = ops.len(), "pipeline built");
        Ok(Pipeline::new(ops))
    }

    /// Parses a JSON array of descriptors.
    pub fn from_json_str(json: &str) -> Result<Pipeline> {
        let descriptors: Vec<OperationDescriptor> = serde_json::from_str(json)?;
        Pipeline::from_descriptors(&descriptors)
    }

    /// Loads a steps file previously written as a JSON array of descriptors.
    pub fn load_json(path: &Path) -> Result<Pipeline> {
        let file = File::open(path).map_err(|e| {
            Error::Session(format!("cannot open steps file '{}': {}", path.display(), e))
        })?;
        let descriptors: Vec<OperationDescriptor> = serde_json::from_reader(BufReader::new(file))?;
        Pipeline::from_descriptors(&descriptors)
    }

    pub fn operations(&self) -> &[Operation] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Runs every operation in order. The chain is not cut short by a
    /// rejection; callers check `flag` on the returned record.
    pub fn apply(&self, record: Record) -> Result<Record> {
        self.ops.iter().try_fold(record, |record, op| op.apply(record))
    }
}
