use std::f64::consts::PI;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::steering_model::{ParamGrad, SteeringModel};
use crate::train::loader::Batch;

/// Shape of the default regressor: a `input_width × input_height` grayscale
/// image, one ReLU hidden layer of `hidden` units, one linear output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressorSpec {
    pub input_width: u32,
    pub input_height: u32,
    pub hidden: usize,
}

impl Default for RegressorSpec {
    fn default() -> Self {
        RegressorSpec { input_width: 64, input_height: 32, hidden: 32 }
    }
}

impl RegressorSpec {
    pub fn input_size(&self) -> usize {
        self.input_width as usize * self.input_height as usize
    }
}

#[derive(Debug, Clone, Default)]
struct Grads {
    w1: Vec<f64>,
    b1: Vec<f64>,
    w2: Vec<f64>,
    b2: Vec<f64>,
}

/// What one sample's forward pass leaves behind for backprop.
#[derive(Debug, Clone)]
struct Activation {
    input: Vec<f64>,
    pre: Vec<f64>,   // pre-activation values (z = Wx + b) needed for the ReLU derivative
    hidden: Vec<f64>,
}

/// Small dense network predicting one steering angle per image.
///
/// Weights are stored flattened (`w1` is `hidden × input_size`, row-major).
/// Gradients, the activation cache and the gradient-tracking flag are
/// runtime state and are not serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseRegressor {
    pub spec: RegressorSpec,
    w1: Vec<f64>,
    b1: Vec<f64>,
    w2: Vec<f64>,
    b2: Vec<f64>,
    #[serde(skip)]
    grads: Grads,
    #[serde(skip)]
    cache: Vec<Activation>,
    #[serde(skip, default = "tracking_on")]
    grad_enabled: bool,
}

fn tracking_on() -> bool {
    true
}

impl DenseRegressor {
    /// He-initialised hidden weights, Xavier-initialised output weights,
    /// zero biases.
    pub fn new<R: Rng>(spec: RegressorSpec, rng: &mut R) -> DenseRegressor {
        let n_in = spec.input_size();
        let he = (2.0 / n_in.max(1) as f64).sqrt();
        let xavier = (1.0 / spec.hidden.max(1) as f64).sqrt();

        let mut model = DenseRegressor {
            spec,
            w1: (0..spec.hidden * n_in).map(|_| sample_standard_normal(rng) * he).collect(),
            b1: vec![0.0; spec.hidden],
            w2: (0..spec.hidden).map(|_| sample_standard_normal(rng) * xavier).collect(),
            b2: vec![0.0],
            grads: Grads::default(),
            cache: Vec::new(),
            grad_enabled: true,
        };
        model.zero_grad();
        model
    }

    /// Deserializes a model from a checkpoint written by `save_checkpoint`.
    pub fn load_json(path: &Path) -> Result<DenseRegressor> {
        let file = File::open(path)?;
        let mut model: DenseRegressor = serde_json::from_reader(BufReader::new(file))?;
        let n_in = model.spec.input_size();
        if model.w1.len() != model.spec.hidden * n_in
            || model.b1.len() != model.spec.hidden
            || model.w2.len() != model.spec.hidden
            || model.b2.len() != 1
        {
            return Err(Error::Model(format!(
                "checkpoint '{}' does not match its declared shape",
                path.display()
            )));
        }
        model.zero_grad();
        Ok(model)
    }
}

impl SteeringModel for DenseRegressor {
    fn forward(&mut self, batch: &Batch) -> Result<Vec<f64>> {
        let n_in = self.spec.input_size();
        self.cache.clear();

        let mut out = Vec::with_capacity(batch.len());
        for image in &batch.images {
            if image.len() != n_in {
                return Err(Error::Model(format!(
                    "expected {} input pixels, got {}",
                    n_in,
                    image.len()
                )));
            }
            let pre: Vec<f64> = self
                .w1
                .chunks(n_in)
                .zip(&self.b1)
                .map(|(row, b)| dot(row, image) + b)
                .collect();
            let hidden: Vec<f64> = pre.iter().map(|&z| z.max(0.0)).collect();
            out.push(dot(&self.w2, &hidden) + self.b2[0]);

            if self.grad_enabled {
                self.cache.push(Activation { input: image.clone(), pre, hidden });
            }
        }
        Ok(out)
    }

    fn backward(&mut self, grad_output: &[f64]) -> Result<()> {
        if !self.grad_enabled {
            return Err(Error::Model("backward called with gradient tracking disabled".into()));
        }
        if grad_output.len() != self.cache.len() {
            return Err(Error::Model(format!(
                "got {} output gradients for a forward pass of {} samples",
                grad_output.len(),
                self.cache.len()
            )));
        }

        let n_in = self.spec.input_size();
        for (act, &g) in self.cache.iter().zip(grad_output) {
            self.grads.b2[0] += g;
            for j in 0..self.spec.hidden {
                self.grads.w2[j] += g * act.hidden[j];
                if act.pre[j] <= 0.0 {
                    continue;
                }
                let dz = g * self.w2[j];
                self.grads.b1[j] += dz;
                let row = &mut self.grads.w1[j * n_in..(j + 1) * n_in];
                for (gw, x) in row.iter_mut().zip(&act.input) {
                    *gw += dz * x;
                }
            }
        }
        self.cache.clear();
        Ok(())
    }

    fn zero_grad(&mut self) {
        self.grads = Grads {
            w1: vec![0.0; self.w1.len()],
            b1: vec![0.0; self.b1.len()],
            w2: vec![0.0; self.w2.len()],
            b2: vec![0.0; self.b2.len()],
        };
    }

    fn grad_enabled(&self) -> bool {
        self.grad_enabled
    }

    fn set_grad_enabled(&mut self, enabled: bool) {
        self.grad_enabled = enabled;
        if !enabled {
            self.cache.clear();
        }
    }

    fn parameters(&mut self) -> Vec<ParamGrad<'_>> {
        vec![
            ParamGrad { value: &mut self.w1, grad: &self.grads.w1 },
            ParamGrad { value: &mut self.b1, grad: &self.grads.b1 },
            ParamGrad { value: &mut self.w2, grad: &self.grads.w2 },
            ParamGrad { value: &mut self.b2, grad: &self.grads.b2 },
        ]
    }

    fn save_checkpoint(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self).map_err(|e| {
            Error::Model(format!("cannot write checkpoint '{}': {}", path.display(), e))
        })?;
        writer.flush()?;
        Ok(())
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Samples a single value from N(0, 1) using the Box-Muller transform.
fn sample_standard_normal<R: Rng>(rng: &mut R) -> f64 {
    // Draw two independent uniform samples in (0, 1] to avoid log(0).
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = 1.0 - rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::loss::{LossFunction, LossType};
    use crate::model::sgd::Sgd;
    use crate::model::steering_model::Optimizer;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::tempdir;

    fn tiny() -> DenseRegressor {
        let spec = RegressorSpec { input_width: 2, input_height: 1, hidden: 8 };
        DenseRegressor::new(spec, &mut StdRng::seed_from_u64(7))
    }

    fn batch() -> Batch {
        Batch {
            images: vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            angles: vec![0.5, -0.5],
        }
    }

    #[test]
    fn sgd_steps_reduce_the_loss() {
        let mut model = tiny();
        let mut sgd = Sgd::new(0.05);
        let batch = batch();
        let loss = LossType::Mse;

        let initial = loss.loss(&model.forward(&batch).unwrap(), &batch.angles);
        for _ in 0..300 {
            model.zero_grad();
            let pred = model.forward(&batch).unwrap();
            model.backward(&loss.derivative(&pred, &batch.angles)).unwrap();
            sgd.step(&mut model).unwrap();
        }
        let last = loss.loss(&model.forward(&batch).unwrap(), &batch.angles);
        assert!(last < initial, "loss went from {} to {}", initial, last);
    }

    #[test]
    fn backward_is_refused_without_gradient_tracking() {
        let mut model = tiny();
        model.set_grad_enabled(false);
        let pred = model.forward(&batch()).unwrap();
        assert!(model.backward(&pred).is_err());
    }

    #[test]
    fn wrong_input_size_is_a_model_error() {
        let mut model = tiny();
        let bad = Batch { images: vec![vec![1.0; 3]], angles: vec![0.0] };
        assert!(matches!(model.forward(&bad), Err(Error::Model(_))));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn failed_checkpoint_write_is_not_a_configuration_error() {
        let full = Path::new("/dev/full");
        if !full.exists() {
            return;
        }
        let spec = RegressorSpec { input_width: 32, input_height: 16, hidden: 8 };
        let model = DenseRegressor::new(spec, &mut StdRng::seed_from_u64(3));
        let err = model.save_checkpoint(full).unwrap_err();
        assert!(matches!(err, Error::Model(_)));
        assert_eq!(err.kind(), crate::error::ErrorKind::TrainingStep);
    }

    #[test]
    fn checkpoint_round_trip_preserves_predictions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("best_valid_model");
        let mut model = tiny();
        model.save_checkpoint(&path).unwrap();

        let mut restored = DenseRegressor::load_json(&path).unwrap();
        assert!(restored.grad_enabled());
        let before = model.forward(&batch()).unwrap();
        let after = restored.forward(&batch()).unwrap();
        for (a, b) in before.iter().zip(&after) {
            assert!((a - b).abs() < 1e-9);
        }
    }
}
