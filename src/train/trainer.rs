use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::error::{Error, Result};
use crate::model::regressor::DenseRegressor;
use crate::model::sgd::Sgd;
use crate::train::checkpoint::{allocate_run_dir, CheckpointStore};
use crate::train::controller::{EpochLoop, LoopConfig};
use crate::train::epoch_stats::TrainingReport;
use crate::train::loader::{DataLoader, SteeringDataset};
use crate::train::session::SessionConfig;
use crate::train::sink::JsonlSink;

/// Trains the default regressor on the session's dataset.
///
/// Loads `datapath`, splits it by `vsplit`, allocates a fresh run directory
/// under `logs/`, and runs the epoch loop with plain SGD. Every random
/// choice (split, shuffles, weight init) derives from `session.seed`.
#[tracing::instrument(skip_all, fields(sess_id = %session.sess_id))]
pub fn run_session(session: &SessionConfig) -> Result<TrainingReport> {
    session.validate()?;
    let paths = session.paths();
    let spec = session.model;

    let dataset = SteeringDataset::load(&paths.datapath, spec.input_width, spec.input_height)?;
    if dataset.is_empty() {
        return Err(Error::Session(format!(
            "dataset '{}' has no samples",
            paths.datapath.display()
        )));
    }

    let mut rng = StdRng::seed_from_u64(session.seed);
    let (train_idx, valid_idx) = dataset.split_indices(session.vsplit, &mut rng);
    info!(train = train_idx.len(), valid = valid_idx.len(), "dataset split");

    let mut train = DataLoader::new(&dataset, train_idx, session.batch_size, session.seed.wrapping_add(1));
    let mut valid = DataLoader::new(&dataset, valid_idx, session.batch_size, session.seed.wrapping_add(2));

    let mut model = DenseRegressor::new(spec, &mut rng);
    let mut optimizer = Sgd::new(session.lr);

    let (run_id, run_dir) = allocate_run_dir(&paths.logs)?;
    let mut sink =
        JsonlSink::create(&run_dir, &paths.sess_path)?.with_previews(spec.input_width, spec.input_height);

    let mut epoch_loop = EpochLoop::new(
        LoopConfig::from_session(session),
        session,
        run_id,
        CheckpointStore::new(run_dir),
        &mut sink,
    );
    epoch_loop.run(&mut model, &mut optimizer, &session.loss, &mut train, &mut valid)
}
