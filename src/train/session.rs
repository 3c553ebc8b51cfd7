use std::fs::File;
use std::io::{BufReader, ErrorKind as IoErrorKind};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};
use crate::model::loss::LossType;
use crate::model::regressor::RegressorSpec;

/// Seed used for splitting, shuffling and weight init unless the session
/// overrides it.
pub const DEFAULT_SEED: u64 = 6582;

/// One training session as read from its JSON file.
///
/// Paths are resolved as
/// - `sess_path` = `abs_path/sess_root/sess_id`
/// - `datapath`  = `sess_path/foldername`
/// - run logs    = `sess_path/logs/<run id>/`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub abs_path: PathBuf,
    pub sess_root: String,
    #[serde(deserialize_with = "string_or_number")]
    pub sess_id: String,
    pub foldername: String,
    /// Fraction of the dataset held out for validation, in [0, 1).
    pub vsplit: f64,
    pub lr: f64,
    pub num_epochs: usize,
    pub batch_size: usize,
    pub loss: LossType,
    pub model: RegressorSpec,
    pub seed: u64,
    /// Visualize every N-th batch of each pass (batch index % N == 0).
    pub visualize_every: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            abs_path: PathBuf::from("."),
            sess_root: "sessions".to_string(),
            sess_id: "0".to_string(),
            foldername: "data".to_string(),
            vsplit: 0.2,
            lr: 1e-3,
            num_epochs: 10,
            batch_size: 32,
            loss: LossType::default(),
            model: RegressorSpec::default(),
            seed: DEFAULT_SEED,
            visualize_every: 20,
        }
    }
}

/// Directories derived from a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    pub sess_path: PathBuf,
    pub datapath: PathBuf,
    pub logs: PathBuf,
}

impl SessionConfig {
    /// Reads and validates a session file.
    pub fn load_json(path: &Path) -> Result<SessionConfig> {
        let file = File::open(path).map_err(|e| match e.kind() {
            IoErrorKind::NotFound => {
                Error::Session(format!("session file '{}' not found", path.display()))
            }
            _ => Error::Io(e),
        })?;
        let config: SessionConfig = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::Session(format!("'{}': {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.foldername.is_empty() {
            return Err(Error::Session("foldername must not be empty".into()));
        }
        if !(0.0..1.0).contains(&self.vsplit) {
            return Err(Error::Session(format!("vsplit must be in [0, 1), got {}", self.vsplit)));
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(Error::Session(format!("lr must be positive, got {}", self.lr)));
        }
        if self.num_epochs == 0 {
            return Err(Error::Session("num_epochs must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Session("batch_size must be at least 1".into()));
        }
        if self.visualize_every == 0 {
            return Err(Error::Session("visualize_every must be at least 1".into()));
        }
        if self.model.input_size() == 0 || self.model.hidden == 0 {
            return Err(Error::Session(format!(
                "model dimensions must be non-zero, got {}x{} input and {} hidden",
                self.model.input_width, self.model.input_height, self.model.hidden
            )));
        }
        Ok(())
    }

    pub fn paths(&self) -> SessionPaths {
        let sess_path = self.abs_path.join(&self.sess_root).join(&self.sess_id);
        SessionPaths {
            datapath: sess_path.join(&self.foldername),
            logs: sess_path.join("logs"),
            sess_path,
        }
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(u64),
    }
    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::tempdir;

    #[test]
    fn numeric_session_id_and_defaults() {
        let config: SessionConfig = serde_json::from_str(
            r#"{"abs_path": "/data", "sess_root": "runs", "sess_id": 7, "foldername": "set", "loss": "huber"}"#,
        )
        .unwrap();
        assert_eq!(config.sess_id, "7");
        assert_eq!(config.loss, LossType::Huber);
        assert_eq!(config.seed, DEFAULT_SEED);
        assert_eq!(config.visualize_every, 20);

        let paths = config.paths();
        assert_eq!(paths.sess_path, PathBuf::from("/data/runs/7"));
        assert_eq!(paths.datapath, PathBuf::from("/data/runs/7/set"));
        assert_eq!(paths.logs, PathBuf::from("/data/runs/7/logs"));
    }

    #[test]
    fn out_of_range_vsplit_is_rejected() {
        let config = SessionConfig { vsplit: 1.0, ..SessionConfig::default() };
        assert!(matches!(config.validate(), Err(Error::Session(_))));
    }

    #[test]
    fn unreadable_session_file_is_a_configuration_error() {
        let dir = tempdir().unwrap();
        let missing = SessionConfig::load_json(&dir.path().join("nope.json")).unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::Configuration);

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{ \"lr\": \"fast\" }").unwrap();
        let err = SessionConfig::load_json(&bad).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
