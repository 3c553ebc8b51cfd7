use std::path::PathBuf;

/// Coarse classification of every failure the crate can report.
///
/// - `Configuration`:   the pipeline, paths or session file are wrong; fix the
///                       input and rerun.
/// - `MissingResource`: an image or index the dataset promises is absent or
///                       unreadable.
/// - `TrainingStep`:    a forward/backward/optimizer step failed mid-run.
/// - `Io`:              any other filesystem failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    MissingResource,
    TrainingStep,
    Io,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown operation '{name}'")]
    UnknownOperation { name: String },

    #[error("operation '{op}': {reason}")]
    InvalidArgument { op: &'static str, reason: String },

    #[error(
        "augment mode requires the source root to equal the destination root \
         (source '{}', destination '{}')",
        src.display(),
        dest.display()
    )]
    AugmentPathMismatch { src: PathBuf, dest: PathBuf },

    #[error("invalid session configuration: {0}")]
    Session(String),

    #[error("row {row}: cannot load image '{}': {reason}", path.display())]
    MissingImage {
        row: usize,
        path: PathBuf,
        reason: String,
    },

    #[error("dataset index '{}' not found", path.display())]
    MissingIndex { path: PathBuf },

    #[error("malformed dataset index '{}' at line {line}: {reason}", path.display())]
    MalformedIndex {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("label field {field}: {reason}")]
    MissingField { field: usize, reason: String },

    #[error("row {row}: {source}")]
    AtRow {
        row: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("model error: {0}")]
    Model(String),

    #[error("training failed at epoch {epoch}, batch {batch}: {reason}")]
    TrainingStep {
        epoch: usize,
        batch: usize,
        reason: String,
    },

    #[error("cannot write image '{}': {source}", path.display())]
    WriteImage {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnknownOperation { .. }
            | Error::InvalidArgument { .. }
            | Error::AugmentPathMismatch { .. }
            | Error::Session(_)
            | Error::Json(_) => ErrorKind::Configuration,
            Error::MissingImage { .. }
            | Error::MissingIndex { .. }
            | Error::MalformedIndex { .. }
            | Error::MissingField { .. }
            | Error::Image(_) => ErrorKind::MissingResource,
            Error::AtRow { source, .. } => source.kind(),
            Error::Model(_) | Error::TrainingStep { .. } => ErrorKind::TrainingStep,
            Error::WriteImage { .. } | Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Tags an error raised while processing index row `row`.
    pub(crate) fn at_row(self, row: usize) -> Error {
        match self {
            e @ (Error::AtRow { .. } | Error::MissingImage { .. }) => e,
            other => Error::AtRow { row, source: Box::new(other) },
        }
    }

    /// Wraps any failure inside one training batch as a `TrainingStep` error.
    pub(crate) fn in_training_step(self, epoch: usize, batch: usize) -> Error {
        match self {
            e @ Error::TrainingStep { .. } => e,
            other => Error::TrainingStep { epoch, batch, reason: other.to_string() },
        }
    }
}
