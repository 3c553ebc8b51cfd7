use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::dataset::index::DatasetIndex;
use crate::error::{Error, Result};
use crate::pipeline::executor::Pipeline;
use crate::pipeline::record::Record;

/// A dataset folder opened for reading: its location plus the parsed index.
#[derive(Debug, Clone)]
pub struct SourceDataset {
    folder: PathBuf,
    index: DatasetIndex,
}

impl SourceDataset {
    /// Reads `<folder>/data.csv`. Images are only opened as rows are walked.
    pub fn open(folder: impl Into<PathBuf>) -> Result<SourceDataset> {
        let folder = folder.into();
        let index = DatasetIndex::read_from_folder(&folder)?;
        info!(folder = %folder.display(), rows = index.len(), "opened source dataset");
        Ok(SourceDataset { folder, index })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn index(&self) -> &DatasetIndex {
        &self.index
    }

    /// Decodes the image for index row `row` and pairs it with the row.
    pub fn load_record(&self, row: usize) -> Result<Record> {
        let label_row = self.index.row(row).cloned().ok_or_else(|| Error::MissingField {
            field: 0,
            reason: format!("index has no row {}", row),
        })?;
        let name = label_row.filename().map_err(|e| e.at_row(row))?;
        let path = self.folder.join(name);
        let image = image::open(&path).map_err(|e| Error::MissingImage {
            row,
            path: path.clone(),
            reason: e.to_string(),
        })?;
        Ok(Record::new(image.to_rgb8(), label_row))
    }

    /// Lazily walks rows `0..min(len, limit)` through `pipeline`, yielding
    /// only the records that are still accepted at the end of the chain.
    pub fn walk<'a>(&'a self, pipeline: &'a Pipeline, limit: Option<usize>) -> Walk<'a> {
        let bound = limit.map_or(self.index.len(), |l| l.min(self.index.len()));
        Walk {
            source: self,
            pipeline,
            next_row: 0,
            bound,
            rejected: 0,
            failed: false,
        }
    }
}

/// Iterator returned by [`SourceDataset::walk`].
///
/// The first error ends the walk: a missing image or a bad label is a defect
/// in the source index and is never skipped over.
pub struct Walk<'a> {
    source: &'a SourceDataset,
    pipeline: &'a Pipeline,
    next_row: usize,
    bound: usize,
    rejected: usize,
    failed: bool,
}

impl Walk<'_> {
    /// Number of rows this walk covers.
    pub fn bound(&self) -> usize {
        self.bound
    }

    /// Rows read so far, accepted or not.
    pub fn rows_visited(&self) -> usize {
        self.next_row
    }

    /// Rows dropped by the pipeline so far.
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    fn process(&self, row: usize) -> Result<Record> {
        let record = self.source.load_record(row)?;
        self.pipeline.apply(record).map_err(|e| e.at_row(row))
    }
}

impl Iterator for Walk<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.failed && self.next_row < self.bound {
            let row = self.next_row;
            self.next_row += 1;
            match self.process(row) {
                Ok(record) if record.flag => return Some(Ok(record)),
                Ok(_) => {
                    self.rejected += 1;
                    debug!(row, "record rejected by pipeline");
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

/// Opens `source_path`, walks it through `pipeline` and collects the accepted
/// records.
pub fn walk(source_path: &Path, pipeline: &Pipeline, limit: Option<usize>) -> Result<Vec<Record>> {
    let source = SourceDataset::open(source_path)?;
    source.walk(pipeline, limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::operation::OperationDescriptor;
    use image::RgbImage;
    use std::fs;
    use tempfile::tempdir;

    fn dataset(angles: &[&str]) -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        let mut csv = String::from("filename,angle\n");
        for (i, angle) in angles.iter().enumerate() {
            let name = format!("{}.png", i);
            RgbImage::new(2, 2).save(dir.path().join(&name)).unwrap();
            csv.push_str(&format!("{},{}\n", name, angle));
        }
        fs::write(dir.path().join("data.csv"), csv).unwrap();
        dir
    }

    fn flip() -> Pipeline {
        Pipeline::from_descriptors(&[OperationDescriptor::new("flip-if-nonzero-angle", vec![])])
            .unwrap()
    }

    #[test]
    fn rejected_records_are_counted_not_yielded() {
        let dir = dataset(&["0.0", "0.5", "0", "-1"]);
        let source = SourceDataset::open(dir.path()).unwrap();
        let pipeline = flip();
        let mut walk = source.walk(&pipeline, None);
        let accepted: Vec<Record> = walk.by_ref().collect::<Result<_>>().unwrap();

        assert_eq!(accepted.len(), 2);
        assert!(accepted.iter().all(Record::is_accepted));
        assert_eq!(walk.rows_visited(), 4);
        assert_eq!(walk.rejected(), 2);
    }

    #[test]
    fn limit_is_capped_at_the_index_length() {
        let dir = dataset(&["0.1", "0.2", "0.3"]);
        let source = SourceDataset::open(dir.path()).unwrap();
        let pipeline = Pipeline::default();
        assert_eq!(source.walk(&pipeline, Some(2)).bound(), 2);
        assert_eq!(source.walk(&pipeline, Some(10)).bound(), 3);
        assert_eq!(walk(dir.path(), &pipeline, Some(0)).unwrap().len(), 0);
    }

    #[test]
    fn the_walk_stops_after_the_first_error() {
        let dir = dataset(&["0.1", "0.2", "0.3"]);
        fs::remove_file(dir.path().join("1.png")).unwrap();
        let source = SourceDataset::open(dir.path()).unwrap();
        let pipeline = Pipeline::default();
        let items: Vec<Result<Record>> = source.walk(&pipeline, None).collect();

        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(Error::MissingImage { row: 1, .. })));
    }
}
