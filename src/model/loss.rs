use serde::{Deserialize, Serialize};

/// A batch-level regression loss: a scalar error plus its gradient with
/// respect to each prediction.
pub trait LossFunction {
    fn loss(&self, predicted: &[f64], expected: &[f64]) -> f64;
    fn derivative(&self, predicted: &[f64], expected: &[f64]) -> Vec<f64>;
}

/// Selects which loss the training loop uses.
///
/// - `Mse`:   mean((p − y)²)
/// - `Mae`:   mean(|p − y|)
/// - `Huber`: quadratic within δ = 1.0 of the target, linear beyond it
///
/// Every variant averages over the batch, and so does its derivative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossType {
    #[default]
    Mse,
    Mae,
    Huber,
}

// Huber threshold between the quadratic and linear regimes.
const HUBER_DELTA: f64 = 1.0;

impl LossFunction for LossType {
    fn loss(&self, predicted: &[f64], expected: &[f64]) -> f64 {
        let n = predicted.len().max(1) as f64;
        let total: f64 = predicted
            .iter()
            .zip(expected)
            .map(|(p, y)| {
                let x = p - y;
                match self {
                    LossType::Mse => x * x,
                    LossType::Mae => x.abs(),
                    LossType::Huber if x.abs() <= HUBER_DELTA => 0.5 * x * x,
                    LossType::Huber => HUBER_DELTA * (x.abs() - 0.5 * HUBER_DELTA),
                }
            })
            .sum();
        total / n
    }

    fn derivative(&self, predicted: &[f64], expected: &[f64]) -> Vec<f64> {
        let n = predicted.len().max(1) as f64;
        predicted
            .iter()
            .zip(expected)
            .map(|(p, y)| {
                let x = p - y;
                let g = match self {
                    LossType::Mse => 2.0 * x,
                    LossType::Mae if x == 0.0 => 0.0,
                    LossType::Mae => x.signum(),
                    LossType::Huber if x.abs() <= HUBER_DELTA => x,
                    LossType::Huber => HUBER_DELTA * x.signum(),
                };
                g / n
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mse_averages_squared_error() {
        assert_eq!(LossType::Mse.loss(&[1.0, 3.0], &[0.0, 1.0]), 2.5);
        assert_eq!(LossType::Mse.derivative(&[1.0, 3.0], &[0.0, 1.0]), vec![1.0, 2.0]);
    }

    #[test]
    fn huber_is_linear_far_from_the_target() {
        assert_eq!(LossType::Huber.loss(&[0.5], &[0.0]), 0.125);
        assert_eq!(LossType::Huber.loss(&[3.0], &[0.0]), 2.5);
        assert_eq!(LossType::Huber.derivative(&[3.0], &[0.0]), vec![1.0]);
    }

    #[test]
    fn mae_gradient_is_zero_at_the_target() {
        assert_eq!(LossType::Mae.derivative(&[2.0, 0.0, -1.0], &[0.0, 0.0, 0.0]),
                   vec![1.0 / 3.0, 0.0, -1.0 / 3.0]);
    }
}
