//! Run orchestration.
//!
//! Stages run strictly in order:
//! `Loaded -> ImagesFetched -> ImagesEncoded -> TextsEncoded -> Fused -> Sanitized -> Written -> Done`.
//! Record-level failures are dropped during `Loaded`; any fatal error stops
//! the run before the next stage, so nothing is written after a bad encode.

use std::collections::HashSet;
use std::fmt::Display;
use std::path::PathBuf;

use image::RgbImage;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;

use crate::catalog::{self, Item};
use crate::config::{Config, WriteMode};
use crate::encoder::{BatchEncoder, Encoder};
use crate::errors::{PipelineError, PipelineResult};
use crate::fusion::{self, Matrix};
use crate::images::{self, ImageSource};
use crate::sink::{self, ArtifactPaths, ArtifactWriter, CollectionSpec, VectorStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Loaded,
    ImagesFetched,
    ImagesEncoded,
    TextsEncoded,
    Fused,
    Sanitized,
    Written,
    Done,
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Loaded => "loaded",
            Stage::ImagesFetched => "images_fetched",
            Stage::ImagesEncoded => "images_encoded",
            Stage::TextsEncoded => "texts_encoded",
            Stage::Fused => "fused",
            Stage::Sanitized => "sanitized",
            Stage::Written => "written",
            Stage::Done => "done",
        };
        write!(f, "{name}")
    }
}

/// Summary of a finished run.
#[derive(Debug, Default, Clone)]
pub struct RunReport {
    pub loaded: usize,
    pub rejected: usize,
    pub images_fetched: usize,
    pub images_missing: usize,
    /// NaN/Inf entries zeroed before writing
    pub sanitized: usize,
    /// Points upserted, or payload lines written in a dry run
    pub written: usize,
    /// Items whose uid already appeared earlier in the run
    pub duplicate_uids: usize,
    pub artifacts: Option<ArtifactPaths>,
    pub stages: Vec<Stage>,
}

/// Where the `Written` stage sends the fused vectors.
enum Target<'a> {
    Artifacts(&'a PathBuf),
    Store(&'a dyn VectorStore),
}

/// One-shot batch job over an in-memory record list.
pub struct Pipeline<'a> {
    config: &'a Config,
    encoder: &'a dyn Encoder,
    images: &'a dyn ImageSource,
    store: Option<&'a dyn VectorStore>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config, encoder: &'a dyn Encoder, images: &'a dyn ImageSource) -> Self {
        Self {
            config,
            encoder,
            images,
            store: None,
        }
    }

    /// Store used in live mode. Ignored in dry runs.
    pub fn with_store(mut self, store: &'a dyn VectorStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn run(&self, records: &[Value]) -> PipelineResult<RunReport> {
        let _span = tracing::info_span!(
            "run",
            backend = self.encoder.name(),
            dry_run = self.config.is_dry_run()
        )
        .entered();
        let target = self.target()?;
        let mut report = RunReport::default();

        let normalized = catalog::normalize_all(records);
        report.rejected = normalized.rejected;
        let items = normalized.items;
        if items.is_empty() {
            return Err(PipelineError::EmptyDataset);
        }
        report.loaded = items.len();
        report.duplicate_uids = count_duplicate_uids(&items);
        if report.duplicate_uids > 0 {
            log::warn!(
                "{} item(s) reuse an earlier uid; the last one written wins",
                report.duplicate_uids
            );
        }
        let detail = format!("items={} rejected={}", items.len(), report.rejected);
        self.enter(&mut report, Stage::Loaded, detail);

        let fetched = self.fetch_images(&items)?;
        report.images_fetched = fetched.iter().filter(|image| image.is_some()).count();
        report.images_missing = items.len() - report.images_fetched;
        let detail = format!("fetched={} missing={}", report.images_fetched, report.images_missing);
        self.enter(&mut report, Stage::ImagesFetched, detail);

        let batcher = BatchEncoder::new(
            self.encoder,
            self.config.dim,
            self.config.image_batch,
            self.config.text_batch,
        );

        let image_vectors = self.encode_images(&batcher, fetched)?;
        self.enter(
            &mut report,
            Stage::ImagesEncoded,
            format!("backend={}", self.encoder.name()),
        );

        let texts: Vec<&str> = items.iter().map(Item::embedding_text).collect();
        let text_vectors = batcher.encode_texts(&texts)?;
        self.enter(&mut report, Stage::TextsEncoded, format!("rows={}", text_vectors.rows()));

        let mut fused = fusion::fuse(&image_vectors, &text_vectors);
        self.enter(&mut report, Stage::Fused, format!("rows={}", fused.rows()));

        report.sanitized = fusion::sanitize(&mut fused);
        if report.sanitized > 0 {
            log::warn!("replaced {} non-finite vector entries with 0", report.sanitized);
        }
        let detail = format!("replaced={}", report.sanitized);
        self.enter(&mut report, Stage::Sanitized, detail);

        match target {
            Target::Artifacts(output_dir) => {
                let paths = ArtifactWriter::new(output_dir.clone()).write(
                    &fused,
                    &items,
                    self.encoder.name(),
                )?;
                report.written = items.len();
                report.artifacts = Some(paths);
                self.enter(
                    &mut report,
                    Stage::Written,
                    format!("mode=dry-run dir={}", output_dir.display()),
                );
            }
            Target::Store(store) => {
                report.written = self.write_live(store, &items, &fused)?;
                self.enter(
                    &mut report,
                    Stage::Written,
                    format!("mode=live collection={}", self.config.collection),
                );
            }
        }

        let detail = format!(
            "loaded={} rejected={} missing_images={} written={}",
            report.loaded, report.rejected, report.images_missing, report.written
        );
        self.enter(&mut report, Stage::Done, detail);
        Ok(report)
    }

    fn enter(&self, report: &mut RunReport, stage: Stage, detail: String) {
        log::info!("stage={stage} {detail}");
        report.stages.push(stage);
    }

    fn fetch_images(&self, items: &[Item]) -> PipelineResult<Vec<Option<RgbImage>>> {
        let urls: Vec<&str> = items.iter().map(|item| item.image_url.as_str()).collect();
        let progress = self.progress_bar("download-images");
        images::fetch_all(self.images, &urls, self.config.fetch.workers, &progress)
    }

    /// Encode only the fetched images, then scatter the rows back to their
    /// item indices. Items without an image keep a zero row.
    fn encode_images(
        &self,
        batcher: &BatchEncoder<'_>,
        fetched: Vec<Option<RgbImage>>,
    ) -> PipelineResult<Matrix> {
        let mut result = Matrix::zeros(fetched.len(), self.config.dim);

        let (indices, present): (Vec<usize>, Vec<RgbImage>) = fetched
            .into_iter()
            .enumerate()
            .filter_map(|(index, image)| image.map(|image| (index, image)))
            .unzip();

        if present.is_empty() {
            log::warn!("no images could be downloaded; image embeddings will be zeros");
            return Ok(result);
        }

        let encoded = batcher.encode_images(&present)?;
        result.scatter(&indices, &encoded);
        Ok(result)
    }

    /// Resolved before any work is done, so a live run without a store
    /// fails without fetching or encoding anything.
    fn target(&self) -> PipelineResult<Target<'a>> {
        let config: &'a Config = self.config;
        match (&config.mode, self.store) {
            (WriteMode::DryRun { output_dir }, _) => Ok(Target::Artifacts(output_dir)),
            (WriteMode::Live, Some(store)) => Ok(Target::Store(store)),
            (WriteMode::Live, None) => {
                Err(PipelineError::config("live mode requires a vector store"))
            }
        }
    }

    fn write_live(
        &self,
        store: &dyn VectorStore,
        items: &[Item],
        fused: &Matrix,
    ) -> PipelineResult<usize> {
        let spec = CollectionSpec {
            name: self.config.collection.clone(),
            vector_name: self.config.vector_name.clone(),
            dim: self.config.dim,
            hnsw_m: self.config.store.hnsw_m,
            hnsw_ef_construct: self.config.store.hnsw_ef_construct,
        };
        sink::ensure_collection(store, &spec)?;

        let progress = self.progress_bar("upsert");
        let written = sink::upsert_batches(
            store,
            &self.config.collection,
            &self.config.vector_name,
            items,
            fused,
            self.config.upsert_batch,
            &progress,
        )?;
        log::info!(
            "finished upserting {written} items into '{}'",
            self.config.collection
        );
        Ok(written)
    }

    fn progress_bar(&self, label: &'static str) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }
        let style = ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len} ({elapsed})")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        ProgressBar::new(0).with_style(style).with_message(label)
    }
}

fn count_duplicate_uids(items: &[Item]) -> usize {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .iter()
        .filter(|item| !seen.insert(item.uid.as_str()))
        .count()
}
