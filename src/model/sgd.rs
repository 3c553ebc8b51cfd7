use crate::error::{Error, Result};
use crate::model::steering_model::{Optimizer, SteeringModel};

pub struct Sgd {
    pub learning_rate: f64,
}

impl Sgd {
    pub fn new(learning_rate: f64) -> Sgd {
        Sgd { learning_rate }
    }
}

impl Optimizer for Sgd {
    /// Applies one plain SGD update: `value -= lr * grad`.
    fn step(&mut self, model: &mut dyn SteeringModel) -> Result<()> {
        let lr = self.learning_rate;
        for param in model.parameters() {
            if param.value.len() != param.grad.len() {
                return Err(Error::Model(format!(
                    "parameter has {} values but {} gradients",
                    param.value.len(),
                    param.grad.len()
                )));
            }
            for (v, g) in param.value.iter_mut().zip(param.grad) {
                *v -= lr * g;
            }
        }
        Ok(())
    }
}
