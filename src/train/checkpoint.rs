use std::fmt;
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::model::steering_model::SteeringModel;

/// Numeric id of one training run; also the name of its log directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which running best a checkpoint tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointTag {
    BestTrain,
    BestValid,
}

impl CheckpointTag {
    pub fn file_name(self) -> &'static str {
        match self {
            CheckpointTag::BestTrain => "best_train_model",
            CheckpointTag::BestValid => "best_valid_model",
        }
    }
}

/// Creates `<logs_root>/<id>` where `id` is one past the largest numeric
/// directory name already present (0 for an empty root).
///
/// Creation is exclusive: a directory made concurrently by another run
/// bumps the id and retries.
pub fn allocate_run_dir(logs_root: &Path) -> Result<(RunId, PathBuf)> {
    fs::create_dir_all(logs_root)?;
    let mut next = fs::read_dir(logs_root)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().to_str()?.parse::<u64>().ok())
        .max()
        .map_or(0, |max| max + 1);

    loop {
        let dir = logs_root.join(next.to_string());
        match fs::create_dir(&dir) {
            Ok(()) => {
                info!(run_id = next, dir = %dir.display(), "allocated run directory");
                return Ok((RunId(next), dir));
            }
            Err(e) if e.kind() == IoErrorKind::AlreadyExists => {
                next = next.checked_add(1).ok_or_else(|| {
                    Error::Session(format!("no free run id under '{}'", logs_root.display()))
                })?;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Writes best-so-far model snapshots into one run directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> CheckpointStore {
        CheckpointStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, tag: CheckpointTag) -> PathBuf {
        self.dir.join(tag.file_name())
    }

    /// Overwrites the snapshot for `tag` with the model's current parameters.
    pub fn save(&self, model: &dyn SteeringModel, tag: CheckpointTag) -> Result<PathBuf> {
        let path = self.path(tag);
        model.save_checkpoint(&path)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn first_run_id_is_zero() {
        let dir = tempdir().unwrap();
        let (id, path) = allocate_run_dir(&dir.path().join("logs")).unwrap();
        assert_eq!(id, RunId(0));
        assert!(path.is_dir());
    }

    #[test]
    fn run_ids_increase_past_the_largest_existing_one() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("3")).unwrap();
        fs::create_dir(dir.path().join("notes")).unwrap();
        fs::write(dir.path().join("17"), b"a file, not a run").unwrap();

        let (a, _) = allocate_run_dir(dir.path()).unwrap();
        let (b, _) = allocate_run_dir(dir.path()).unwrap();
        assert_eq!(a, RunId(4));
        assert_eq!(b, RunId(5));
    }

    #[test]
    fn checkpoint_paths_use_fixed_names() {
        let store = CheckpointStore::new("/tmp/run");
        assert!(store.path(CheckpointTag::BestTrain).ends_with("best_train_model"));
        assert!(store.path(CheckpointTag::BestValid).ends_with("best_valid_model"));
    }
}
