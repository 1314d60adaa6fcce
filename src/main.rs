use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod catalog;
mod cli;
mod config;
mod encoder;
mod errors;
mod fusion;
mod identity;
mod images;
mod pipeline;
mod sink;
#[cfg(test)]
mod tests;

use config::Config;
use encoder::{Encoder, FastembedEncoder};
use images::HttpImageFetcher;
use pipeline::Pipeline;
use sink::QdrantStore;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    init_logging();

    let config = Config::from_args(args)?;
    log::info!(
        "using {} backend (native dim {}, configured dim {})",
        config.backend.name(),
        config.backend.dimensions(),
        config.dim
    );

    let records = catalog::load_records(&config.input)
        .with_context(|| format!("failed to load {}", config.input.display()))?;

    let encoder = FastembedEncoder::new(config.backend, config.encoder.cache_dir.clone())?;
    let fetcher = HttpImageFetcher::new(&config.fetch)?;

    let result = if config.is_dry_run() {
        Pipeline::new(&config, &encoder, &fetcher).run(&records)
    } else {
        let store = QdrantStore::new(
            &config.qdrant_url,
            config.qdrant_api_key.as_deref(),
            Duration::from_secs(config.store.timeout_secs),
            config.store.wait,
        )?;
        Pipeline::new(&config, &encoder, &fetcher)
            .with_store(&store)
            .run(&records)
    };
    let report = result.inspect_err(|err| {
        if err.is_fatal() {
            log::error!("run aborted: {err}");
        }
    })?;

    log::info!(
        "run report: loaded={} rejected={} images_fetched={} images_missing={} sanitized={} written={} duplicate_uids={}",
        report.loaded,
        report.rejected,
        report.images_fetched,
        report.images_missing,
        report.sanitized,
        report.written,
        report.duplicate_uids
    );
    if let Some(paths) = &report.artifacts {
        let header = sink::verify_embeddings(
            &paths.embeddings,
            report.written,
            config.dim,
            encoder.name(),
        )?;
        log::info!(
            "artifacts: {} ({} rows x {} dims) {}",
            paths.embeddings.display(),
            header.row_count,
            header.dimensions,
            paths.payload.display()
        );
    }
    log::debug!(
        "stages: {}",
        report
            .stages
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" -> ")
    );
    Ok(())
}
