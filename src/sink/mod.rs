//! Destinations for fused vectors.
//!
//! - `artifacts`: dry-run files (`embeddings.bin`, `payload.ndjson`)
//! - `qdrant`: live upserts over the Qdrant REST API
//!
//! A run uses exactly one of them.

pub mod artifacts;
mod qdrant;

pub use artifacts::{verify_embeddings, ArtifactPaths, ArtifactWriter};
pub use qdrant::QdrantStore;

use std::collections::BTreeMap;

use indicatif::ProgressBar;
use serde::Serialize;

use crate::catalog::Item;
use crate::errors::{PipelineError, PipelineResult};
use crate::fusion::Matrix;
use crate::identity::PointId;

/// Collection layout requested from the store.
#[derive(Clone, Debug, PartialEq)]
pub struct CollectionSpec {
    pub name: String,
    pub vector_name: String,
    pub dim: usize,
    pub hnsw_m: usize,
    pub hnsw_ef_construct: usize,
}

/// One point as sent to the store. Built per item per run, never mutated.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UpsertPoint {
    pub id: PointId,
    /// Named vector slot -> fused vector
    pub vector: BTreeMap<String, Vec<f32>>,
    pub payload: Item,
}

impl UpsertPoint {
    pub fn new(item: &Item, vector_name: &str, vector: &[f32]) -> Self {
        Self {
            id: PointId::from_uid(&item.uid),
            vector: BTreeMap::from([(vector_name.to_string(), vector.to_vec())]),
            payload: item.clone(),
        }
    }
}

/// Vector store operations needed by the live sink.
///
/// `upsert` must have replace semantics by id.
pub trait VectorStore: Send + Sync {
    fn collection_exists(&self, name: &str) -> anyhow::Result<bool>;

    /// Cosine distance, one named vector slot.
    fn create_collection(&self, spec: &CollectionSpec) -> anyhow::Result<()>;

    fn upsert(&self, collection: &str, points: &[UpsertPoint]) -> anyhow::Result<()>;
}

/// Create the collection unless it is already there.
pub fn ensure_collection(store: &dyn VectorStore, spec: &CollectionSpec) -> PipelineResult<()> {
    let exists = store
        .collection_exists(&spec.name)
        .map_err(|source| PipelineError::StoreWrite {
            context: format!("lookup collection '{}'", spec.name),
            source,
        })?;
    if exists {
        log::info!("collection '{}' already exists", spec.name);
        return Ok(());
    }

    log::info!(
        "creating collection '{}' vector={} dim={}",
        spec.name,
        spec.vector_name,
        spec.dim
    );
    store
        .create_collection(spec)
        .map_err(|source| PipelineError::StoreWrite {
            context: format!("create collection '{}'", spec.name),
            source,
        })
}

/// Upsert `items` in consecutive batches, in index order.
///
/// The first failing batch aborts the rest; there is no retry here.
/// Returns the number of points written.
pub fn upsert_batches(
    store: &dyn VectorStore,
    collection: &str,
    vector_name: &str,
    items: &[Item],
    vectors: &Matrix,
    batch_size: usize,
    progress: &ProgressBar,
) -> PipelineResult<usize> {
    let total = items.len();
    progress.set_length(total as u64);

    let mut written = 0;
    for start in (0..total).step_by(batch_size.max(1)) {
        let end = (start + batch_size.max(1)).min(total);
        let points: Vec<UpsertPoint> = (start..end)
            .map(|index| UpsertPoint::new(&items[index], vector_name, vectors.row(index)))
            .collect();

        store
            .upsert(collection, &points)
            .map_err(|source| PipelineError::StoreWrite {
                context: format!("upsert items {start}..{end}"),
                source,
            })?;

        written = end;
        progress.set_position(end as u64);
        log::info!("upserted {end}/{total} items");
    }
    progress.finish_and_clear();
    Ok(written)
}
