use std::sync::mpsc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::loss::LossFunction;
use crate::model::steering_model::{Optimizer, SteeringModel};
use crate::train::checkpoint::{CheckpointStore, CheckpointTag, RunId};
use crate::train::epoch_stats::{EpochStats, TrainingReport};
use crate::train::grad::no_grad;
use crate::train::loader::BatchSource;
use crate::train::session::SessionConfig;
use crate::train::sink::MetricSink;

pub const TRAIN_LOSS_TAG: &str = "Train Loss";
pub const VALID_LOSS_TAG: &str = "Valid Loss";

/// Settings for one `EpochLoop::run`.
///
/// # Fields
/// - `num_epochs`:      number of train + validation passes
/// - `visualize_every`: batch `i` of a pass is visualized when `i % visualize_every == 0`
/// - `progress_tx`:     optional channel sender; one `EpochStats` is sent per
///                       completed epoch. A dropped receiver is ignored.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub num_epochs: usize,
    pub visualize_every: usize,
    pub progress_tx: Option<mpsc::Sender<EpochStats>>,
}

impl LoopConfig {
    pub fn new(num_epochs: usize) -> Self {
        LoopConfig { num_epochs, visualize_every: 20, progress_tx: None }
    }

    pub fn from_session(session: &SessionConfig) -> Self {
        LoopConfig {
            num_epochs: session.num_epochs,
            visualize_every: session.visualize_every,
            progress_tx: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Train,
    Valid,
}

impl Pass {
    fn name(self) -> &'static str {
        match self {
            Pass::Train => "train",
            Pass::Valid => "valid",
        }
    }
}

/// Drives a model through alternating train and validation passes, keeps
/// the best-loss checkpoints and reports to a metric sink.
pub struct EpochLoop<'a, S: MetricSink + ?Sized> {
    config: LoopConfig,
    session: &'a SessionConfig,
    run_id: RunId,
    checkpoints: CheckpointStore,
    sink: &'a mut S,
}

impl<'a, S: MetricSink + ?Sized> EpochLoop<'a, S> {
    pub fn new(
        config: LoopConfig,
        session: &'a SessionConfig,
        run_id: RunId,
        checkpoints: CheckpointStore,
        sink: &'a mut S,
    ) -> Self {
        EpochLoop { config, session, run_id, checkpoints, sink }
    }

    /// Runs every epoch, then logs the run summary. The sink is closed on
    /// every exit path; a failure to close only surfaces when the run itself
    /// succeeded.
    #[tracing::instrument(skip_all, fields(run_id = %self.run_id, epochs = self.config.num_epochs))]
    pub fn run(
        &mut self,
        model: &mut dyn SteeringModel,
        optimizer: &mut dyn Optimizer,
        loss_fn: &dyn LossFunction,
        train: &mut dyn BatchSource,
        valid: &mut dyn BatchSource,
    ) -> Result<TrainingReport> {
        let outcome = self.run_epochs(model, optimizer, loss_fn, train, valid);
        let closed = self.sink.close();
        match (outcome, closed) {
            (Ok(report), Ok(())) => Ok(report),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    warn!(error = %close_err, "metric sink failed to close after an aborted run");
                }
                Err(e)
            }
        }
    }

    fn run_epochs(
        &mut self,
        model: &mut dyn SteeringModel,
        optimizer: &mut dyn Optimizer,
        loss_fn: &dyn LossFunction,
        train: &mut dyn BatchSource,
        valid: &mut dyn BatchSource,
    ) -> Result<TrainingReport> {
        let mut best_train = f64::INFINITY;
        let mut best_valid = f64::INFINITY;
        let mut epochs = Vec::with_capacity(self.config.num_epochs);

        for epoch in 0..self.config.num_epochs {
            let t_start = Instant::now();
            info!(epoch, "starting epoch");

            let (train_loss, train_batches) =
                self.loss_pass(Pass::Train, model, Some(&mut *optimizer), loss_fn, train, epoch)?;
            let (valid_loss, valid_batches) = {
                let mut guard = no_grad(&mut *model);
                self.loss_pass(Pass::Valid, &mut *guard, None, loss_fn, valid, epoch)?
            };

            // ── Best-so-far checkpoints ───────────────────────────────────
            let saved_best_train = train_loss < best_train;
            if saved_best_train {
                best_train = train_loss;
                let path = self.checkpoints.save(&*model, CheckpointTag::BestTrain)?;
                debug!(epoch, path = %path.display(), "saved best train checkpoint");
            }
            let saved_best_valid = valid_loss < best_valid;
            if saved_best_valid {
                best_valid = valid_loss;
                let path = self.checkpoints.save(&*model, CheckpointTag::BestValid)?;
                debug!(epoch, path = %path.display(), "saved best valid checkpoint");
            }

            self.sink.add_scalar(TRAIN_LOSS_TAG, train_loss, epoch)?;
            self.sink.add_scalar(VALID_LOSS_TAG, valid_loss, epoch)?;

            let stats = EpochStats {
                epoch,
                total_epochs: self.config.num_epochs,
                train_loss,
                valid_loss,
                train_batches,
                valid_batches,
                saved_best_train,
                saved_best_valid,
                elapsed_ms: t_start.elapsed().as_millis() as u64,
            };
            info!(
                epoch,
                train_loss,
                valid_loss,
                elapsed_ms = stats.elapsed_ms,
                "epoch finished"
            );
            if let Some(ref tx) = self.config.progress_tx {
                let _ = tx.send(stats.clone());
            }
            epochs.push(stats);
        }

        self.sink.log_training(self.session, self.run_id, best_train, best_valid)?;
        Ok(TrainingReport {
            run_id: self.run_id,
            epochs,
            best_train_loss: best_train,
            best_valid_loss: best_valid,
        })
    }

    /// One full pass over `loader`. Returns the summed batch loss and the
    /// number of batches seen. The optimizer is only stepped in train passes.
    fn loss_pass(
        &mut self,
        pass: Pass,
        model: &mut dyn SteeringModel,
        mut optimizer: Option<&mut dyn Optimizer>,
        loss_fn: &dyn LossFunction,
        loader: &mut dyn BatchSource,
        epoch: usize,
    ) -> Result<(f64, usize)> {
        let t0 = Instant::now();
        let mut total = 0.0;
        let mut count = 0;

        for (i, batch) in loader.batches().enumerate() {
            let mut step = || -> Result<(f64, Vec<f64>)> {
                model.zero_grad();
                let predictions = model.forward(&batch)?;
                if predictions.len() != batch.len() {
                    return Err(Error::Model(format!(
                        "model returned {} predictions for a batch of {}",
                        predictions.len(),
                        batch.len()
                    )));
                }
                let loss = loss_fn.loss(&predictions, &batch.angles);
                if !loss.is_finite() {
                    return Err(Error::Model(format!("loss is not finite ({})", loss)));
                }
                if let Some(opt) = optimizer.as_deref_mut() {
                    model.backward(&loss_fn.derivative(&predictions, &batch.angles))?;
                    opt.step(&mut *model)?;
                }
                Ok((loss, predictions))
            };
            let (loss, predictions) = step().map_err(|e| e.in_training_step(epoch, i))?;
            if i % self.config.visualize_every.max(1) == 0 {
                self.sink.visualize_batch(&batch.images, &batch.angles, &predictions, epoch)?;
            }
            debug!(pass = pass.name(), epoch, batch = i, loss, "batch");
            total += loss;
            count += 1;
        }

        debug!(
            pass = pass.name(),
            epoch,
            batches = count,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "pass finished"
        );
        Ok((total, count))
    }
}
