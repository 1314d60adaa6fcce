mod pipeline;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;

use image::{ImageBuffer, Rgb, RgbImage};

use crate::config::{Config, EncoderConfig, FetchConfig, StoreConfig, WriteMode};
use crate::encoder::{Encoder, EncoderBackend};
use crate::images::ImageSource;
use crate::sink::{CollectionSpec, UpsertPoint, VectorStore};

pub const DIM: usize = 4;

/// Config for an in-process run with small batches and no progress bars.
pub fn test_config(mode: WriteMode) -> Config {
    Config {
        input: PathBuf::from("items.json"),
        collection: "catalog".to_string(),
        vector_name: "fashion_clip".to_string(),
        dim: DIM,
        qdrant_url: "http://localhost:6333".to_string(),
        qdrant_api_key: None,
        image_batch: 2,
        text_batch: 2,
        upsert_batch: 2,
        mode,
        show_progress: false,
        backend: EncoderBackend::ClipVitB32,
        fetch: FetchConfig {
            workers: 2,
            ..Default::default()
        },
        encoder: EncoderConfig::default(),
        store: StoreConfig::default(),
    }
}

pub fn solid(r: u8, g: u8, b: u8) -> RgbImage {
    ImageBuffer::from_pixel(2, 2, Rgb([r, g, b]))
}

/// Deterministic encoder: images map to their first pixel, texts to
/// their length and byte sum.
pub struct FakeEncoder {
    pub dim: usize,
    pub image_calls: Mutex<usize>,
    pub text_calls: Mutex<usize>,
}

impl FakeEncoder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            image_calls: Mutex::new(0),
            text_calls: Mutex::new(0),
        }
    }

    pub fn text_vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0; self.dim];
        v[0] = text.len() as f32;
        v[1] = text.bytes().map(f32::from).sum::<f32>() / 100.0;
        v
    }

    pub fn image_vector(&self, image: &RgbImage) -> Vec<f32> {
        let px = image.get_pixel(0, 0);
        let mut v = vec![0.0; self.dim];
        v[self.dim - 2] = f32::from(px[0]) + 1.0;
        v[self.dim - 1] = f32::from(px[1]) + 1.0;
        v
    }
}

impl Encoder for FakeEncoder {
    fn name(&self) -> &str {
        "fake"
    }

    fn encode_images(&self, images: &[RgbImage]) -> anyhow::Result<Vec<Vec<f32>>> {
        *self.image_calls.lock().unwrap() += 1;
        Ok(images.iter().map(|image| self.image_vector(image)).collect())
    }

    fn encode_texts(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        *self.text_calls.lock().unwrap() += 1;
        Ok(texts.iter().map(|text| self.text_vector(text)).collect())
    }
}

/// Image source keyed by url; unknown urls are absent.
#[derive(Default)]
pub struct FakeImages {
    pub images: HashMap<String, RgbImage>,
}

impl FakeImages {
    pub fn with(mut self, url: &str, image: RgbImage) -> Self {
        self.images.insert(url.to_string(), image);
        self
    }
}

impl ImageSource for FakeImages {
    fn fetch(&self, url: &str) -> Option<RgbImage> {
        self.images.get(url).cloned()
    }
}

/// In-memory store with replace-by-id upserts.
#[derive(Default)]
pub struct MemoryStore {
    pub collections: Mutex<BTreeMap<String, CollectionSpec>>,
    pub points: Mutex<BTreeMap<String, UpsertPoint>>,
    pub batches: Mutex<Vec<usize>>,
    /// Zero-based upsert call that fails
    pub fail_on_batch: Option<usize>,
}

impl MemoryStore {
    pub fn failing_on(batch: usize) -> Self {
        Self {
            fail_on_batch: Some(batch),
            ..Default::default()
        }
    }

    pub fn point_count(&self) -> usize {
        self.points.lock().unwrap().len()
    }
}

impl VectorStore for MemoryStore {
    fn collection_exists(&self, name: &str) -> anyhow::Result<bool> {
        Ok(self.collections.lock().unwrap().contains_key(name))
    }

    fn create_collection(&self, spec: &CollectionSpec) -> anyhow::Result<()> {
        self.collections
            .lock()
            .unwrap()
            .insert(spec.name.clone(), spec.clone());
        Ok(())
    }

    fn upsert(&self, _collection: &str, points: &[UpsertPoint]) -> anyhow::Result<()> {
        let mut batches = self.batches.lock().unwrap();
        if self.fail_on_batch == Some(batches.len()) {
            anyhow::bail!("503 service unavailable");
        }
        batches.push(points.len());
        let mut stored = self.points.lock().unwrap();
        for point in points {
            stored.insert(point.id.to_string(), point.clone());
        }
        Ok(())
    }
}
