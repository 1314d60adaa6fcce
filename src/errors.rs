/// Failure taxonomy for a catalog embedding run.
///
/// `InvalidRecord` and `ImageFetch` are absorbed where they happen (the
/// record is skipped, the image becomes absent). Every other variant is
/// fatal and unwinds to `main`.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("invalid record #{index}: {reason}")]
    InvalidRecord { index: usize, reason: String },

    #[error("image fetch failed for {url}: {reason}")]
    ImageFetch { url: String, reason: String },

    #[error("{stage} embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        stage: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("no valid items found in dataset")]
    EmptyDataset,

    #[error("store write failed ({context}): {source:#}")]
    StoreWrite {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{stage} encoder failed: {source:#}")]
    Encoding {
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("malformed input: {0}")]
    Input(String),

    #[error("artifact format error: {0}")]
    Artifact(String),

    #[error("io error: {0:?}")]
    IO(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn invalid_record(index: usize, reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            index,
            reason: reason.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Fatal errors abort the run; the rest are absorbed per record or per item.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            PipelineError::InvalidRecord { .. } | PipelineError::ImageFetch { .. }
        )
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
