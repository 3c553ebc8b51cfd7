use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dataset::index::{DatasetIndex, INDEX_FILE_NAME};
use crate::dataset::walker::SourceDataset;
use crate::error::{Error, Result};
use crate::pipeline::executor::Pipeline;
use crate::pipeline::record::Record;

/// How transformed records are laid down.
///
/// - `Move`:    a new dataset folder next to the existing ones, holding only
///               the accepted records.
/// - `Augment`: accepted records are appended to the source dataset in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterializeMode {
    #[default]
    Move,
    Augment,
}

/// Result of one materialization run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Materialized {
    /// Folder holding the written images and `data.csv`.
    pub destination: PathBuf,
    /// Records written (images + index rows).
    pub written: usize,
    /// Records handed in with `flag == false` and discarded.
    pub discarded: usize,
    /// Total rows in the written index.
    pub index_rows: usize,
}

/// Writes accepted records under `destination_root/<folder>` according to
/// the mode's naming and index policy.
#[derive(Debug, Clone)]
pub struct Materializer {
    destination_root: PathBuf,
    folder_name: String,
    mode: MaterializeMode,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

impl Materializer {
    /// Checks the mode's path contract. In `Augment` mode `source_root` and
    /// `destination_root` must name the same directory.
    pub fn new(
        source_root: &Path,
        destination_root: &Path,
        folder_name: &str,
        mode: MaterializeMode,
    ) -> Result<Materializer> {
        if mode == MaterializeMode::Augment && !same_dir(source_root, destination_root) {
            return Err(Error::AugmentPathMismatch {
                src: source_root.to_path_buf(),
                dest: destination_root.to_path_buf(),
            });
        }
        Ok(Materializer {
            destination_root: destination_root.to_path_buf(),
            folder_name: folder_name.to_owned(),
            mode,
        })
    }

    pub fn mode(&self) -> MaterializeMode {
        self.mode
    }

    /// Consumes `records`, writes one image per accepted record and finally
    /// the consolidated index.
    ///
    /// `source_index` supplies the column header, and in `Augment` mode the
    /// rows that come first in the new index. The index is written only
    /// after every image write has succeeded. Failures are tagged with the
    /// record's position in `records`.
    #[tracing::instrument(skip_all, fields(folder = %self.folder_name, mode = ?self.mode))]
    pub fn materialize<I>(&self, records: I, source_index: &DatasetIndex) -> Result<Materialized>
    where
        I: IntoIterator<Item = Result<Record>>,
    {
        fs::create_dir_all(&self.destination_root)?;
        let destination = self.create_destination()?;

        let mut index = match self.mode {
            MaterializeMode::Move => DatasetIndex::new(source_index.columns().to_vec()),
            MaterializeMode::Augment => source_index.clone(),
        };
        let mut taken: HashSet<String> = match self.mode {
            MaterializeMode::Move => HashSet::new(),
            MaterializeMode::Augment => index.filenames(),
        };

        let mut written = 0;
        let mut discarded = 0;
        for (i, record) in records.into_iter().enumerate() {
            let mut record = record.map_err(|e| e.at_row(i))?;
            if !record.flag {
                discarded += 1;
                continue;
            }

            if self.mode == MaterializeMode::Augment && record.image_name_override.is_none() {
                let name = record.label_row.filename().map_err(|e| e.at_row(i))?;
                if taken.contains(name) {
                    record.image_name_override = Some(free_name(name, &taken));
                }
            }

            let name = record.output_name().map_err(|e| e.at_row(i))?.to_owned();
            if self.mode == MaterializeMode::Move && taken.contains(&name) {
                warn!(name = %name, "two accepted records share a file name; the later image wins");
            }

            let path = destination.join(&name);
            record
                .image
                .save(&path)
                .map_err(|source| Error::WriteImage { path: path.clone(), source }.at_row(i))?;
            debug!(path = %path.display(), "wrote image");

            let mut row = record.label_row;
            if record.image_name_override.is_some() {
                row.set_filename(name.clone());
            }
            index.push(row);
            taken.insert(name);
            written += 1;
        }

        index.write_atomic(&destination.join(INDEX_FILE_NAME))?;
        info!(
            destination = %destination.display(),
            written,
            discarded,
            index_rows = index.len(),
            "dataset materialized"
        );

        Ok(Materialized {
            destination,
            written,
            discarded,
            index_rows: index.len(),
        })
    }

    /// Creates and returns the destination folder.
    ///
    /// `Augment` reuses `<root>/<folder>`. `Move` uses `<root>/<folder><n>`
    /// where `n` starts at the number of entries already in the root and is
    /// bumped while that name is taken.
    fn create_destination(&self) -> Result<PathBuf> {
        match self.mode {
            MaterializeMode::Augment => {
                let path = self.destination_root.join(&self.folder_name);
                fs::create_dir_all(&path)?;
                Ok(path)
            }
            MaterializeMode::Move => {
                let mut n = fs::read_dir(&self.destination_root)?.count();
                loop {
                    let path = self.destination_root.join(format!("{}{}", self.folder_name, n));
                    match fs::create_dir(&path) {
                        Ok(()) => return Ok(path),
                        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
    }
}

/// Counts reported by [`move_dataset`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveSummary {
    pub destination: PathBuf,
    pub rows_read: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub index_rows: usize,
}

/// Walks `source_root/folder` through `pipeline` and materializes the result
/// under `destination_root`.
///
/// The augment path check runs before anything is read. Any walk error
/// aborts the run before the index is written.
#[tracing::instrument(skip(pipeline), fields(steps = pipeline.len()))]
pub fn move_dataset(
    source_root: &Path,
    folder: &str,
    destination_root: &Path,
    pipeline: &Pipeline,
    limit: Option<usize>,
    mode: MaterializeMode,
) -> Result<MoveSummary> {
    let materializer = Materializer::new(source_root, destination_root, folder, mode)?;
    let source = SourceDataset::open(source_root.join(folder))?;

    let mut walk = source.walk(pipeline, limit);
    let result = materializer.materialize(&mut walk, source.index())?;

    Ok(MoveSummary {
        destination: result.destination,
        rows_read: walk.rows_visited(),
        accepted: result.written,
        rejected: walk.rejected() + result.discarded,
        index_rows: result.index_rows,
    })
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// First `<stem>_aug<k>.<ext>` not already in `taken`.
fn free_name(name: &str, taken: &HashSet<String>) -> String {
    let path = Path::new(name);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(name);
    let ext = path.extension().and_then(|e| e.to_str());
    (0..)
        .map(|k| match ext {
            Some(ext) => format!("{}_aug{}.{}", stem, k, ext),
            None => format!("{}_aug{}", stem, k),
        })
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| name.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::pipeline::record::LabelRow;
    use image::RgbImage;
    use tempfile::tempdir;

    fn record(name: &str, angle: &str) -> Record {
        Record::new(RgbImage::new(2, 2), [name, angle].into_iter().collect::<LabelRow>())
    }

    fn header() -> DatasetIndex {
        DatasetIndex::new(vec!["filename".into(), "angle".into()])
    }

    #[test]
    fn rejected_records_are_discarded_whatever_they_hold() {
        let root = tempdir().unwrap();
        let materializer =
            Materializer::new(root.path(), root.path(), "run", MaterializeMode::Move).unwrap();
        let mut rejected = record("dropped.png", "0.4");
        rejected.flag = false;

        let out = materializer
            .materialize(vec![Ok(rejected), Ok(record("kept.png", "0.1"))], &header())
            .unwrap();

        assert_eq!(out.written, 1);
        assert_eq!(out.discarded, 1);
        assert!(!out.destination.join("dropped.png").exists());
        assert!(out.destination.join("kept.png").exists());
        let index = DatasetIndex::read_from_folder(&out.destination).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.rows()[0].filename().unwrap(), "kept.png");
    }

    #[test]
    fn write_failures_name_the_record_position() {
        let root = tempdir().unwrap();
        let materializer =
            Materializer::new(root.path(), root.path(), "run", MaterializeMode::Move).unwrap();

        let err = materializer
            .materialize(
                vec![Ok(record("a.png", "0.1")), Ok(record("b.not-an-image", "0.2"))],
                &header(),
            )
            .unwrap_err();
        match err {
            Error::AtRow { row, ref source } => {
                assert_eq!(row, 1);
                assert!(matches!(**source, Error::WriteImage { .. }));
            }
            other => panic!("expected a row-tagged error, got {:?}", other),
        }
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().starts_with("row 1:"));
    }

    #[test]
    fn missing_filename_field_names_the_record_position() {
        let root = tempdir().unwrap();
        let materializer =
            Materializer::new(root.path(), root.path(), "run", MaterializeMode::Move).unwrap();
        let nameless = Record::new(RgbImage::new(1, 1), LabelRow::new(Vec::new()));

        let err = materializer.materialize(vec![Ok(nameless)], &header()).unwrap_err();
        assert!(matches!(err, Error::AtRow { row: 0, .. }));
        assert_eq!(err.kind(), ErrorKind::MissingResource);
    }

    #[test]
    fn free_name_skips_taken_candidates() {
        let taken: HashSet<String> =
            ["a.png", "a_aug0.png"].iter().map(|s| s.to_string()).collect();
        assert_eq!(free_name("a.png", &taken), "a_aug1.png");
        assert_eq!(free_name("noext", &taken), "noext_aug0");
    }

    #[test]
    fn augment_requires_matching_roots() {
        let err = Materializer::new(
            Path::new("/data/a"),
            Path::new("/data/b"),
            "run",
            MaterializeMode::Augment,
        )
        .unwrap_err();
        assert!(matches!(err, Error::AugmentPathMismatch { .. }));
        assert!(Materializer::new(
            Path::new("/data/a"),
            Path::new("/data/b"),
            "run",
            MaterializeMode::Move
        )
        .is_ok());
    }
}
