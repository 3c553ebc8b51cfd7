use std::path::Path;

use crate::error::Result;
use crate::train::loader::Batch;

/// One trainable parameter tensor (flattened) and its accumulated gradient.
pub struct ParamGrad<'a> {
    pub value: &'a mut [f64],
    pub grad: &'a [f64],
}

/// A model mapping a batch of images to predicted steering angles.
///
/// Gradient bookkeeping follows the usual contract: `forward` caches what
/// `backward` needs only while gradient tracking is enabled, `backward`
/// adds into the gradients, and `zero_grad` clears them.
pub trait SteeringModel {
    /// Returns one predicted angle per image in `batch`.
    fn forward(&mut self, batch: &Batch) -> Result<Vec<f64>>;

    /// Back-propagates `grad_output` (∂loss/∂prediction, one per image of the
    /// last forward pass) into the parameter gradients.
    fn backward(&mut self, grad_output: &[f64]) -> Result<()>;

    fn zero_grad(&mut self);

    fn grad_enabled(&self) -> bool;

    fn set_grad_enabled(&mut self, enabled: bool);

    /// Every parameter paired with its gradient, for the optimizer.
    fn parameters(&mut self) -> Vec<ParamGrad<'_>>;

    /// Serializes the current parameters to `path`, replacing any existing file.
    fn save_checkpoint(&self, path: &Path) -> Result<()>;
}

/// Updates a model's parameters from its accumulated gradients.
pub trait Optimizer {
    fn step(&mut self, model: &mut dyn SteeringModel) -> Result<()>;
}
