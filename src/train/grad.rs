use std::ops::{Deref, DerefMut};

use crate::model::steering_model::SteeringModel;

/// Disables gradient tracking on a model for as long as it lives.
///
/// The previous mode is restored on drop, so early returns through `?` and
/// unwinding both leave the model the way they found it.
pub struct NoGradGuard<'a, M: SteeringModel + ?Sized> {
    model: &'a mut M,
    previous: bool,
}

impl<'a, M: SteeringModel + ?Sized> NoGradGuard<'a, M> {
    pub fn new(model: &'a mut M) -> NoGradGuard<'a, M> {
        let previous = model.grad_enabled();
        model.set_grad_enabled(false);
        NoGradGuard { model, previous }
    }
}

impl<M: SteeringModel + ?Sized> Deref for NoGradGuard<'_, M> {
    type Target = M;

    fn deref(&self) -> &M {
        self.model
    }
}

impl<M: SteeringModel + ?Sized> DerefMut for NoGradGuard<'_, M> {
    fn deref_mut(&mut self) -> &mut M {
        self.model
    }
}

impl<M: SteeringModel + ?Sized> Drop for NoGradGuard<'_, M> {
    fn drop(&mut self) {
        self.model.set_grad_enabled(self.previous);
    }
}

/// Shorthand for [`NoGradGuard::new`].
pub fn no_grad<M: SteeringModel + ?Sized>(model: &mut M) -> NoGradGuard<'_, M> {
    NoGradGuard::new(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::regressor::{DenseRegressor, RegressorSpec};
    use crate::train::loader::Batch;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn model() -> DenseRegressor {
        let spec = RegressorSpec { input_width: 1, input_height: 1, hidden: 2 };
        DenseRegressor::new(spec, &mut StdRng::seed_from_u64(1))
    }

    #[test]
    fn guard_disables_then_restores() {
        let mut m = model();
        {
            let guard = no_grad(&mut m);
            assert!(!guard.grad_enabled());
        }
        assert!(m.grad_enabled());
    }

    #[test]
    fn guard_restores_after_an_early_error() {
        fn eval(m: &mut DenseRegressor) -> crate::error::Result<Vec<f64>> {
            let mut guard = no_grad(m);
            guard.forward(&Batch { images: vec![vec![0.0; 5]], angles: vec![0.0] })
        }
        let mut m = model();
        assert!(eval(&mut m).is_err());
        assert!(m.grad_enabled());
    }

    #[test]
    fn nested_guards_keep_tracking_off_until_the_outer_one_drops() {
        let mut m = model();
        {
            let mut outer = no_grad(&mut m);
            {
                let inner = no_grad(&mut *outer);
                assert!(!inner.grad_enabled());
            }
            assert!(!outer.grad_enabled());
        }
        assert!(m.grad_enabled());
    }
}
