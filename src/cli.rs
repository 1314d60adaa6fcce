use std::path::PathBuf;

use clap::Parser;

/// Embed catalog items (image + title) and upsert them into a Qdrant collection.
///
/// Add --dry-run to skip Qdrant and write the fused vectors and payloads locally.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Path to the items JSON file
    #[clap(long)]
    pub input: PathBuf,

    /// Qdrant collection name
    #[clap(long)]
    pub collection: String,

    /// Named vector slot inside the collection
    #[clap(long)]
    pub vector_name: String,

    /// Embedding dimensionality
    #[clap(long)]
    pub dim: usize,

    /// Qdrant base URL
    #[clap(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    pub qdrant_url: String,

    /// Qdrant API key, if the cluster requires one
    #[clap(long, env = "QDRANT_API_KEY", hide_env_values = true)]
    pub qdrant_api_key: Option<String>,

    /// Images per encoder call
    #[clap(long, default_value_t = 64)]
    pub image_batch: usize,

    /// Texts per encoder call
    #[clap(long, default_value_t = 128)]
    pub text_batch: usize,

    /// Points per upsert request
    #[clap(long, default_value_t = 256)]
    pub upsert_batch: usize,

    /// Skip Qdrant writes and emit artifacts locally
    #[clap(long, default_value = "false")]
    pub dry_run: bool,

    /// Directory for dry-run artifacts
    #[clap(long, default_value = "artifacts")]
    pub output_dir: PathBuf,

    /// Encoder backend: clip-vit-b-32 or nomic-embed-v1.5
    #[clap(long)]
    pub model: Option<String>,

    /// YAML file with fetch/encoder/store tuning
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Don't draw progress bars
    #[clap(long, default_value = "false")]
    pub no_progress: bool,
}
