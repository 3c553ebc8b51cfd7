use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use image::{GrayImage, Luma};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::train::checkpoint::RunId;
use crate::train::session::SessionConfig;

/// Where the epoch loop reports scalars, sample batches and the final
/// summary of a run.
pub trait MetricSink {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()>;

    fn visualize_batch(
        &mut self,
        images: &[Vec<f64>],
        targets: &[f64],
        predictions: &[f64],
        step: usize,
    ) -> Result<()>;

    fn log_training(
        &mut self,
        config: &SessionConfig,
        run_id: RunId,
        best_train_loss: f64,
        best_valid_loss: f64,
    ) -> Result<()>;

    /// Flushes and releases the sink. Called exactly once per run, whether
    /// it succeeded or not.
    fn close(&mut self) -> Result<()>;
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Event<'a> {
    Scalar {
        tag: &'a str,
        value: f64,
        step: usize,
    },
    Batch {
        step: usize,
        size: usize,
        targets: &'a [f64],
        predictions: &'a [f64],
        mean_abs_error: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        preview: Option<&'a Path>,
    },
    Training {
        run_id: RunId,
        best_train_loss: f64,
        best_valid_loss: f64,
        config: &'a SessionConfig,
    },
}

// ---------------------------------------------------------------------------
// JSON-lines sink
// ---------------------------------------------------------------------------

pub const METRICS_FILE_NAME: &str = "metrics.jsonl";
pub const TRAINING_LOG_FILE_NAME: &str = "training_log.jsonl";

/// Appends one JSON object per event to `<run_dir>/metrics.jsonl` and
/// mirrors every event as a `tracing` event.
///
/// `log_training` additionally appends the run summary to
/// `<sess_path>/training_log.jsonl`, which accumulates across runs. When
/// `preview_dims` is set, the first image of each visualized batch is also
/// written as a grayscale PNG under `<run_dir>/batches/`.
pub struct JsonlSink {
    run_dir: PathBuf,
    sess_path: PathBuf,
    preview_dims: Option<(u32, u32)>,
    writer: Option<BufWriter<File>>,
    batches_seen: usize,
}

impl JsonlSink {
    pub fn create(run_dir: &Path, sess_path: &Path) -> Result<JsonlSink> {
        fs::create_dir_all(run_dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(run_dir.join(METRICS_FILE_NAME))?;
        Ok(JsonlSink {
            run_dir: run_dir.to_path_buf(),
            sess_path: sess_path.to_path_buf(),
            preview_dims: None,
            writer: Some(BufWriter::new(file)),
            batches_seen: 0,
        })
    }

    pub fn with_previews(mut self, width: u32, height: u32) -> JsonlSink {
        self.preview_dims = Some((width, height));
        self
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.run_dir.join(METRICS_FILE_NAME)
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }

    fn emit(&mut self, event: &Event<'_>) -> Result<()> {
        let writer = self.writer.as_mut().ok_or_else(closed)?;
        serde_json::to_writer(&mut *writer, event)?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    fn write_preview(&self, pixels: &[f64], step: usize) -> Result<Option<PathBuf>> {
        let Some((width, height)) = self.preview_dims else {
            return Ok(None);
        };
        if pixels.len() != width as usize * height as usize {
            return Ok(None);
        }
        let dir = self.run_dir.join("batches");
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("step{}_{}.png", step, self.batches_seen));
        let img = GrayImage::from_fn(width, height, |x, y| {
            let v = pixels[(y * width + x) as usize];
            Luma([(v.clamp(0.0, 1.0) * 255.0).round() as u8])
        });
        img.save(&path).map_err(|source| Error::WriteImage { path: path.clone(), source })?;
        Ok(Some(path))
    }
}

fn closed() -> Error {
    Error::Io(io::Error::new(io::ErrorKind::Other, "metric sink is closed"))
}

impl MetricSink for JsonlSink {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
        info!(tag, value, step, "scalar");
        self.emit(&Event::Scalar { tag, value, step })
    }

    fn visualize_batch(
        &mut self,
        images: &[Vec<f64>],
        targets: &[f64],
        predictions: &[f64],
        step: usize,
    ) -> Result<()> {
        if self.is_closed() {
            return Err(closed());
        }
        let n = targets.len().min(predictions.len());
        let mean_abs_error = if n == 0 {
            0.0
        } else {
            targets.iter().zip(predictions).map(|(t, p)| (t - p).abs()).sum::<f64>() / n as f64
        };
        let preview = match images.first() {
            Some(first) => self.write_preview(first, step)?,
            None => None,
        };
        self.batches_seen += 1;
        debug!(step, size = images.len(), mean_abs_error, "batch visualized");
        self.emit(&Event::Batch {
            step,
            size: images.len(),
            targets,
            predictions,
            mean_abs_error,
            preview: preview.as_deref(),
        })
    }

    fn log_training(
        &mut self,
        config: &SessionConfig,
        run_id: RunId,
        best_train_loss: f64,
        best_valid_loss: f64,
    ) -> Result<()> {
        info!(%run_id, best_train_loss, best_valid_loss, "training finished");
        let event = Event::Training { run_id, best_train_loss, best_valid_loss, config };
        self.emit(&event)?;

        fs::create_dir_all(&self.sess_path)?;
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.sess_path.join(TRAINING_LOG_FILE_NAME))?;
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        log.write_all(&line)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            debug!(dir = %self.run_dir.display(), "metric sink closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn lines(path: &Path) -> Vec<serde_json::Value> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn events_are_written_as_json_lines() {
        let dir = tempdir().unwrap();
        let run_dir = dir.path().join("logs").join("0");
        let mut sink = JsonlSink::create(&run_dir, dir.path()).unwrap();

        sink.add_scalar("Train Loss", 1.5, 0).unwrap();
        sink.visualize_batch(&[vec![0.0; 4]], &[0.5], &[0.25], 0).unwrap();
        sink.log_training(&SessionConfig::default(), RunId(0), 1.5, f64::INFINITY).unwrap();
        sink.close().unwrap();

        let events = lines(&sink.metrics_path());
        assert_eq!(events.len(), 3);
        assert_eq!(events[0]["event"], "scalar");
        assert_eq!(events[0]["tag"], "Train Loss");
        assert_eq!(events[1]["event"], "batch");
        assert_eq!(events[1]["mean_abs_error"], 0.25);
        assert_eq!(events[2]["event"], "training");
        assert_eq!(events[2]["run_id"], 0);
        assert!(events[2]["best_valid_loss"].is_null());

        let summary = lines(&dir.path().join(TRAINING_LOG_FILE_NAME));
        assert_eq!(summary.len(), 1);
    }

    #[test]
    fn previews_are_written_when_dimensions_are_known() {
        let dir = tempdir().unwrap();
        let mut sink = JsonlSink::create(dir.path(), dir.path()).unwrap().with_previews(2, 2);
        sink.visualize_batch(&[vec![0.0, 1.0, 1.0, 0.0]], &[0.0], &[0.0], 3).unwrap();
        sink.close().unwrap();

        let events = lines(&sink.metrics_path());
        let preview = PathBuf::from(events[0]["preview"].as_str().unwrap());
        let img = image::open(&preview).unwrap().to_luma8();
        assert_eq!(img.get_pixel(1, 0).0[0], 255);
        assert_eq!(img.get_pixel(0, 0).0[0], 0);
    }

    #[test]
    fn a_closed_sink_refuses_events_and_closes_idempotently() {
        let dir = tempdir().unwrap();
        let mut sink = JsonlSink::create(dir.path(), dir.path()).unwrap();
        sink.close().unwrap();
        sink.close().unwrap();
        assert!(sink.add_scalar("Valid Loss", 0.0, 0).is_err());
    }
}
