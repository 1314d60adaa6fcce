//! Embedding capability and the order-preserving batch adapter around it.
//!
//! - `Encoder`: one polymorphic capability (images and texts into the same space)
//! - `EncoderBackend`: concrete backend, chosen once from configuration
//! - `BatchEncoder`: fixed-size chunking, row-count and width checks
//! - `embeddings`: fastembed-backed implementation

mod embeddings;

pub use embeddings::FastembedEncoder;

use anyhow::anyhow;
use image::RgbImage;

use crate::errors::{PipelineError, PipelineResult};
use crate::fusion::Matrix;

/// Maps images or texts to fixed-width vectors, one row per input, in input order.
///
/// Implementations are called from a single thread, one chunk at a time.
pub trait Encoder: Send + Sync {
    fn name(&self) -> &str;

    fn encode_images(&self, images: &[RgbImage]) -> anyhow::Result<Vec<Vec<f32>>>;

    fn encode_texts(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Supported backends. Both encode images and texts into one shared space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncoderBackend {
    /// CLIP ViT-B/32, 512 dimensions
    ClipVitB32,
    /// nomic-embed vision + text v1.5, 768 dimensions
    NomicV15,
}

impl EncoderBackend {
    pub fn from_name(name: &str) -> PipelineResult<Self> {
        match name.trim().to_lowercase().as_str() {
            "clip-vit-b-32" | "clipvitb32" | "clip" => Ok(Self::ClipVitB32),
            "nomic-embed-v1.5" | "nomicv15" | "nomic" => Ok(Self::NomicV15),
            _ => Err(PipelineError::config(format!(
                "unknown encoder model: {name}. Supported models: clip-vit-b-32, nomic-embed-v1.5"
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ClipVitB32 => "clip-vit-b-32",
            Self::NomicV15 => "nomic-embed-v1.5",
        }
    }

    /// Native output width of the backend.
    pub fn dimensions(&self) -> usize {
        match self {
            Self::ClipVitB32 => 512,
            Self::NomicV15 => 768,
        }
    }
}

/// Chunks inputs for an [`Encoder`] and stitches the results back together.
pub struct BatchEncoder<'a> {
    encoder: &'a dyn Encoder,
    dim: usize,
    image_batch: usize,
    text_batch: usize,
}

impl<'a> BatchEncoder<'a> {
    pub fn new(encoder: &'a dyn Encoder, dim: usize, image_batch: usize, text_batch: usize) -> Self {
        Self {
            encoder,
            dim,
            image_batch: image_batch.max(1),
            text_batch: text_batch.max(1),
        }
    }

    pub fn encode_images(&self, images: &[RgbImage]) -> PipelineResult<Matrix> {
        self.encode_chunked("image", images, self.image_batch, |chunk| {
            self.encoder.encode_images(chunk)
        })
    }

    pub fn encode_texts(&self, texts: &[&str]) -> PipelineResult<Matrix> {
        self.encode_chunked("text", texts, self.text_batch, |chunk| {
            self.encoder.encode_texts(chunk)
        })
    }

    /// Empty input gives a zero-row matrix and no encoder call.
    fn encode_chunked<T>(
        &self,
        stage: &'static str,
        inputs: &[T],
        batch_size: usize,
        mut encode: impl FnMut(&[T]) -> anyhow::Result<Vec<Vec<f32>>>,
    ) -> PipelineResult<Matrix> {
        let mut out = Matrix::empty(self.dim);
        for chunk in inputs.chunks(batch_size) {
            let rows = encode(chunk).map_err(|source| PipelineError::Encoding { stage, source })?;
            if rows.len() != chunk.len() {
                return Err(PipelineError::Encoding {
                    stage,
                    source: anyhow!(
                        "encoder returned {} rows for {} inputs",
                        rows.len(),
                        chunk.len()
                    ),
                });
            }
            let rows = Matrix::from_rows(rows, self.dim).map_err(|got| {
                PipelineError::DimensionMismatch {
                    stage,
                    expected: self.dim,
                    got,
                }
            })?;
            out.extend(rows);
        }
        log::debug!(
            "stage={stage} encoded={} batch_size={batch_size}",
            out.rows()
        );
        Ok(out)
    }
}
