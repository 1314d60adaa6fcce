use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::Args;
use crate::encoder::EncoderBackend;
use crate::errors::{PipelineError, PipelineResult};
use crate::images::RetryPolicy;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BACKOFF_STEP_MS: u64 = 1500;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;
const DEFAULT_FETCH_WORKERS: usize = 8;
const DEFAULT_USER_AGENT: &str = "CatalogEmbedder/1.0";

/// Default encoder backend (CLIP ViT-B/32, 512 dimensions)
const DEFAULT_ENCODER_MODEL: &str = "clip-vit-b-32";
const DEFAULT_MODEL_CACHE_DIR: &str = ".fastembed_cache";

const DEFAULT_HNSW_M: usize = 16;
const DEFAULT_HNSW_EF_CONSTRUCT: usize = 200;
const DEFAULT_STORE_TIMEOUT_SECS: u64 = 30;

/// Image download settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Attempts per image before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Linear backoff step; attempt n waits n * step
    #[serde(default = "default_backoff_step_ms")]
    pub backoff_step_ms: u64,

    /// Per-request timeout
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,

    /// Concurrent download workers
    #[serde(default = "default_fetch_workers")]
    pub workers: usize,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_step_ms: DEFAULT_BACKOFF_STEP_MS,
            timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            workers: DEFAULT_FETCH_WORKERS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl FetchConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_step: Duration::from_millis(self.backoff_step_ms),
        }
    }
}

/// Embedding backend settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Backend name (e.g. "clip-vit-b-32")
    #[serde(default = "default_encoder_model")]
    pub model: String,

    /// Directory where model files are cached
    #[serde(default = "default_model_cache_dir")]
    pub cache_dir: PathBuf,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_ENCODER_MODEL.to_string(),
            cache_dir: PathBuf::from(DEFAULT_MODEL_CACHE_DIR),
        }
    }
}

/// Vector store settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_hnsw_m")]
    pub hnsw_m: usize,

    #[serde(default = "default_hnsw_ef_construct")]
    pub hnsw_ef_construct: usize,

    /// Block each upsert until the store has applied it
    #[serde(default = "default_true")]
    pub wait: bool,

    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            hnsw_m: DEFAULT_HNSW_M,
            hnsw_ef_construct: DEFAULT_HNSW_EF_CONSTRUCT,
            wait: true,
            timeout_secs: DEFAULT_STORE_TIMEOUT_SECS,
        }
    }
}

/// Optional YAML file with tuning knobs. Every field has a default.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Tuning {
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_backoff_step_ms() -> u64 {
    DEFAULT_BACKOFF_STEP_MS
}

fn default_fetch_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

fn default_fetch_workers() -> usize {
    DEFAULT_FETCH_WORKERS
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_encoder_model() -> String {
    DEFAULT_ENCODER_MODEL.to_string()
}

fn default_model_cache_dir() -> PathBuf {
    PathBuf::from(DEFAULT_MODEL_CACHE_DIR)
}

fn default_hnsw_m() -> usize {
    DEFAULT_HNSW_M
}

fn default_hnsw_ef_construct() -> usize {
    DEFAULT_HNSW_EF_CONSTRUCT
}

fn default_true() -> bool {
    true
}

fn default_store_timeout_secs() -> u64 {
    DEFAULT_STORE_TIMEOUT_SECS
}

impl Tuning {
    pub fn load(path: &Path) -> PipelineResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_yml::from_str(&raw).map_err(|err| {
            PipelineError::config(format!("{} is malformed: {err}", path.display()))
        })
    }
}

/// Where fused vectors go. Exactly one per run.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteMode {
    /// Local artifacts only, no network.
    DryRun { output_dir: PathBuf },
    /// Upsert into the vector store.
    Live,
}

/// Fully resolved run configuration. Built once in `main`, read-only afterwards.
#[derive(Clone, Debug)]
pub struct Config {
    pub input: PathBuf,
    pub collection: String,
    pub vector_name: String,
    pub dim: usize,
    pub qdrant_url: String,
    pub qdrant_api_key: Option<String>,
    pub image_batch: usize,
    pub text_batch: usize,
    pub upsert_batch: usize,
    pub mode: WriteMode,
    pub show_progress: bool,
    pub backend: EncoderBackend,
    pub fetch: FetchConfig,
    pub encoder: EncoderConfig,
    pub store: StoreConfig,
}

impl Config {
    pub fn from_args(args: Args) -> PipelineResult<Self> {
        let mut tuning = match &args.config {
            Some(path) => Tuning::load(path)?,
            None => Tuning::default(),
        };
        if let Some(model) = args.model {
            tuning.encoder.model = model;
        }
        let backend = EncoderBackend::from_name(&tuning.encoder.model)?;

        let mode = if args.dry_run {
            WriteMode::DryRun {
                output_dir: args.output_dir,
            }
        } else {
            WriteMode::Live
        };

        let config = Self {
            input: args.input,
            collection: args.collection,
            vector_name: args.vector_name,
            dim: args.dim,
            qdrant_url: args.qdrant_url,
            qdrant_api_key: args.qdrant_api_key.filter(|key| !key.trim().is_empty()),
            image_batch: args.image_batch,
            text_batch: args.text_batch,
            upsert_batch: args.upsert_batch,
            mode,
            show_progress: !args.no_progress,
            backend,
            fetch: tuning.fetch,
            encoder: tuning.encoder,
            store: tuning.store,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        let positive = [
            ("dim", self.dim),
            ("image-batch", self.image_batch),
            ("text-batch", self.text_batch),
            ("upsert-batch", self.upsert_batch),
            ("fetch.workers", self.fetch.workers),
            ("fetch.max_retries", self.fetch.max_retries as usize),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(PipelineError::config(format!("{name} must be greater than 0")));
            }
        }
        if self.fetch.timeout_secs == 0 {
            return Err(PipelineError::config("fetch.timeout_secs must be greater than 0"));
        }

        if self.mode == WriteMode::Live {
            if self.collection.trim().is_empty() {
                return Err(PipelineError::config("collection name is empty"));
            }
            if self.vector_name.trim().is_empty() {
                return Err(PipelineError::config("vector name is empty"));
            }
            if !(self.qdrant_url.starts_with("http://") || self.qdrant_url.starts_with("https://"))
            {
                return Err(PipelineError::config(format!(
                    "qdrant url must be an http(s) URL, got {:?}",
                    self.qdrant_url
                )));
            }
        }
        Ok(())
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(self.mode, WriteMode::DryRun { .. })
    }
}
