pub mod steering_model;
pub mod regressor;
pub mod loss;
pub mod sgd;

pub use steering_model::{Optimizer, ParamGrad, SteeringModel};
pub use regressor::{DenseRegressor, RegressorSpec};
pub use loss::{LossFunction, LossType};
pub use sgd::Sgd;
