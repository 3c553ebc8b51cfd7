use std::path::Path;

use image::imageops::FilterType;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::info;

use crate::dataset::index::DatasetIndex;
use crate::error::{Error, Result};

/// One preprocessed training example.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Grayscale pixels in [0, 1], row-major.
    pub pixels: Vec<f64>,
    pub angle: f64,
}

/// A mini-batch: parallel vectors of images and target angles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub images: Vec<Vec<f64>>,
    pub angles: Vec<f64>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.angles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.angles.is_empty()
    }

    fn from_samples<'a>(samples: impl IntoIterator<Item = &'a Sample>) -> Batch {
        let mut batch = Batch::default();
        for sample in samples {
            batch.images.push(sample.pixels.clone());
            batch.angles.push(sample.angle);
        }
        batch
    }
}

/// Anything that can hand the epoch loop a fresh sequence of batches.
pub trait BatchSource {
    fn batches(&mut self) -> Box<dyn Iterator<Item = Batch> + '_>;
}

/// A fixed list of batches, replayed in order every epoch.
impl BatchSource for Vec<Batch> {
    fn batches(&mut self) -> Box<dyn Iterator<Item = Batch> + '_> {
        Box::new(self.iter().cloned())
    }
}

// ---------------------------------------------------------------------------
// Dataset
// ---------------------------------------------------------------------------

/// Every sample of one dataset folder, decoded and resized up front.
#[derive(Debug, Clone)]
pub struct SteeringDataset {
    samples: Vec<Sample>,
}

impl SteeringDataset {
    pub fn from_samples(samples: Vec<Sample>) -> SteeringDataset {
        SteeringDataset { samples }
    }

    /// Reads `<folder>/data.csv` and loads every referenced image as a
    /// `width × height` grayscale sample normalized to [0, 1].
    #[tracing::instrument(skip_all, fields(folder = %folder.display()))]
    pub fn load(folder: &Path, width: u32, height: u32) -> Result<SteeringDataset> {
        let index = DatasetIndex::read_from_folder(folder)?;
        let mut samples = Vec::with_capacity(index.len());
        for (row_idx, row) in index.rows().iter().enumerate() {
            let name = row.filename().map_err(|e| e.at_row(row_idx))?;
            let angle = row.angle().map_err(|e| e.at_row(row_idx))?;
            let path = folder.join(name);
            let pixels = load_grayscale(&path, width, height).map_err(|reason| {
                Error::MissingImage { row: row_idx, path: path.clone(), reason }
            })?;
            samples.push(Sample { pixels, angle });
        }
        info!(samples = samples.len(), width, height, "dataset loaded");
        Ok(SteeringDataset { samples })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Shuffles all indices and cuts off the first `floor(vsplit * len)` as
    /// the validation split. Returns `(train, valid)`.
    pub fn split_indices(&self, vsplit: f64, rng: &mut StdRng) -> (Vec<usize>, Vec<usize>) {
        let mut idxs: Vec<usize> = (0..self.samples.len()).collect();
        let split = ((vsplit * idxs.len() as f64).floor() as usize).min(idxs.len());
        idxs.shuffle(rng);
        let train = idxs.split_off(split);
        (train, idxs)
    }
}

/// Decodes an image file, resizes to `width × height`, converts to grayscale,
/// and normalizes pixels to [0, 1].
fn load_grayscale(path: &Path, width: u32, height: u32) -> std::result::Result<Vec<f64>, String> {
    let img = image::open(path).map_err(|e| e.to_string())?;
    let resized = img.resize_exact(width, height, FilterType::Lanczos3);
    let gray = resized.to_luma8();
    Ok(gray.pixels().map(|p| p.0[0] as f64 / 255.0).collect())
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Batches over a subset of a dataset, reshuffled at the start of every
/// epoch. The last batch may be short.
pub struct DataLoader<'a> {
    dataset: &'a SteeringDataset,
    indices: Vec<usize>,
    batch_size: usize,
    rng: StdRng,
}

impl<'a> DataLoader<'a> {
    pub fn new(
        dataset: &'a SteeringDataset,
        indices: Vec<usize>,
        batch_size: usize,
        seed: u64,
    ) -> DataLoader<'a> {
        DataLoader {
            dataset,
            indices,
            batch_size: batch_size.max(1),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn num_batches(&self) -> usize {
        self.indices.len().div_ceil(self.batch_size)
    }
}

impl BatchSource for DataLoader<'_> {
    fn batches(&mut self) -> Box<dyn Iterator<Item = Batch> + '_> {
        self.indices.shuffle(&mut self.rng);
        let samples = self.dataset.samples();
        Box::new(
            self.indices
                .chunks(self.batch_size)
                .map(move |chunk| Batch::from_samples(chunk.iter().map(|&i| &samples[i]))),
        )
    }
}
