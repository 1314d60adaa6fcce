//! Encoder backed by fastembed.
//!
//! Loads a matching pair of image and text models for the selected
//! backend. Models are downloaded into `cache_dir/models` on first use.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::anyhow;
use fastembed::{
    ImageEmbedding, ImageEmbeddingModel, ImageInitOptions, InitOptions, TextEmbedding,
};
use image::{ImageFormat, RgbImage};

use super::{Encoder, EncoderBackend};

/// fastembed-backed [`Encoder`].
/// Uses a Mutex per model because fastembed's embed calls require &mut self.
pub struct FastembedEncoder {
    backend: EncoderBackend,
    text: Mutex<TextEmbedding>,
    image: Mutex<ImageEmbedding>,
}

/// Error type for model setup
#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),
}

impl FastembedEncoder {
    /// Load both models for `backend`.
    ///
    /// # Arguments
    /// * `backend` - Backend resolved from configuration
    /// * `cache_dir` - Directory to cache downloaded models
    pub fn new(backend: EncoderBackend, cache_dir: PathBuf) -> Result<Self, EncoderError> {
        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EncoderError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        let (text_model, image_model) = Self::models(backend);

        let text = TextEmbedding::try_new(
            InitOptions::new(text_model)
                .with_cache_dir(models_dir.clone())
                .with_show_download_progress(true),
        )
        .map_err(|e| EncoderError::InitFailed(format!("text model: {}", e)))?;

        let image = ImageEmbedding::try_new(
            ImageInitOptions::new(image_model)
                .with_cache_dir(models_dir)
                .with_show_download_progress(true),
        )
        .map_err(|e| EncoderError::InitFailed(format!("image model: {}", e)))?;

        log::info!(
            "loaded encoder backend={} dimensions={}",
            backend.name(),
            backend.dimensions()
        );

        Ok(Self {
            backend,
            text: Mutex::new(text),
            image: Mutex::new(image),
        })
    }

    /// Text and image model pair sharing one embedding space.
    fn models(backend: EncoderBackend) -> (fastembed::EmbeddingModel, ImageEmbeddingModel) {
        match backend {
            EncoderBackend::ClipVitB32 => (
                fastembed::EmbeddingModel::ClipVitB32,
                ImageEmbeddingModel::ClipVitB32,
            ),
            EncoderBackend::NomicV15 => (
                fastembed::EmbeddingModel::NomicEmbedTextV15,
                ImageEmbeddingModel::NomicEmbedVisionV15,
            ),
        }
    }
}

impl Encoder for FastembedEncoder {
    fn name(&self) -> &str {
        self.backend.name()
    }

    fn encode_images(&self, images: &[RgbImage]) -> anyhow::Result<Vec<Vec<f32>>> {
        if images.is_empty() {
            return Ok(vec![]);
        }

        let encoded = images
            .iter()
            .map(png_bytes)
            .collect::<anyhow::Result<Vec<_>>>()?;
        let slices: Vec<&[u8]> = encoded.iter().map(Vec::as_slice).collect();

        let mut model = self.image.lock().map_err(|e| {
            EncoderError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        model
            .embed_bytes(&slices, Some(slices.len()))
            .map_err(|e| anyhow!(EncoderError::EmbeddingFailed(e.to_string())))
    }

    fn encode_texts(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut model = self.text.lock().map_err(|e| {
            EncoderError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        model
            .embed(texts.to_vec(), Some(texts.len()))
            .map_err(|e| anyhow!(EncoderError::EmbeddingFailed(e.to_string())))
    }
}

/// fastembed decodes from bytes, so decoded images are re-encoded losslessly.
fn png_bytes(image: &RgbImage) -> anyhow::Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}
