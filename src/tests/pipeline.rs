use serde_json::{json, Value};

use super::{solid, test_config, FakeEncoder, FakeImages, MemoryStore, DIM};
use crate::config::WriteMode;
use crate::errors::PipelineError;
use crate::fusion::{l2_norm, l2_normalize};
use crate::identity::PointId;
use crate::pipeline::{Pipeline, Stage};
use crate::sink::artifacts::load_embeddings;

fn records() -> Vec<Value> {
    vec![
        json!({"uid": "sku-1", "name": "Linen Shirt", "brand": "Acme", "price": "$49.90",
               "available_size": "S, M, N/A", "image_url": "http://img/1.jpg"}),
        json!({"uid": "sku-2", "name": "Wool Coat", "price": 120, "image_url": "http://img/broken.jpg"}),
        json!({"item_id": 3, "title": "Canvas Tote", "image_url": "http://img/3.jpg"}),
    ]
}

fn images() -> FakeImages {
    FakeImages::default()
        .with("http://img/1.jpg", solid(10, 20, 30))
        .with("http://img/3.jpg", solid(200, 100, 0))
}

fn expected_row(encoder: &FakeEncoder, text: &str, image: Option<Vec<f32>>) -> Vec<f32> {
    let text = encoder.text_vector(text);
    let image = image.unwrap_or_else(|| vec![0.0; DIM]);
    let mut row: Vec<f32> = image
        .iter()
        .zip(&text)
        .map(|(i, t)| 0.7 * i + 0.3 * t)
        .collect();
    l2_normalize(&mut row);
    row
}

fn assert_close(a: &[f32], b: &[f32]) {
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b) {
        assert!((x - y).abs() < 1e-5, "{a:?} != {b:?}");
    }
}

#[test]
fn test_missing_image_leaves_text_only_row() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(WriteMode::DryRun {
        output_dir: tmp.path().to_path_buf(),
    });
    let encoder = FakeEncoder::new(DIM);
    let images = images();

    let report = Pipeline::new(&config, &encoder, &images)
        .run(&records())
        .unwrap();

    assert_eq!(report.loaded, 3);
    assert_eq!(report.images_fetched, 2);
    assert_eq!(report.images_missing, 1);
    assert_eq!(report.written, 3);

    let paths = report.artifacts.unwrap();
    let (header, vectors) = load_embeddings(&paths.embeddings).unwrap();
    assert_eq!(header.row_count, 3);
    assert_eq!(header.dimensions as usize, DIM);

    let coat = expected_row(&encoder, "Wool Coat", None);
    assert_close(vectors.row(1), &coat);

    let shirt = expected_row(
        &encoder,
        "Linen Shirt",
        Some(encoder.image_vector(&solid(10, 20, 30))),
    );
    assert_close(vectors.row(0), &shirt);

    for row in vectors.iter_rows() {
        assert!((l2_norm(row) - 1.0).abs() < 1e-5);
    }
}

#[test]
fn test_dry_run_without_any_image() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(WriteMode::DryRun {
        output_dir: tmp.path().join("out"),
    });
    let encoder = FakeEncoder::new(DIM);
    let images = FakeImages::default();

    let report = Pipeline::new(&config, &encoder, &images)
        .run(&records())
        .unwrap();

    assert_eq!(report.images_fetched, 0);
    assert_eq!(*encoder.image_calls.lock().unwrap(), 0);

    let paths = report.artifacts.unwrap();
    let (_, vectors) = load_embeddings(&paths.embeddings).unwrap();
    for (row, text) in vectors
        .iter_rows()
        .zip(["Linen Shirt", "Wool Coat", "Canvas Tote"])
    {
        let mut expected = encoder.text_vector(text);
        l2_normalize(&mut expected);
        assert_close(row, &expected);
    }

    let payload = std::fs::read_to_string(&paths.payload).unwrap();
    let lines: Vec<Value> = payload
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["price_value"], 49.9);
    assert_eq!(lines[0]["available_size"], json!(["S", "M"]));
    assert_eq!(lines[2]["uid"], "3");
    assert_eq!(lines[2]["name"], "Canvas Tote");
}

#[test]
fn test_live_run_is_idempotent() {
    let config = test_config(WriteMode::Live);
    let encoder = FakeEncoder::new(DIM);
    let images = images();
    let store = MemoryStore::default();

    let first = Pipeline::new(&config, &encoder, &images)
        .with_store(&store)
        .run(&records())
        .unwrap();
    let snapshot = store.points.lock().unwrap().clone();

    let second = Pipeline::new(&config, &encoder, &images)
        .with_store(&store)
        .run(&records())
        .unwrap();

    assert_eq!(first.written, 3);
    assert_eq!(second.written, 3);
    assert_eq!(*store.points.lock().unwrap(), snapshot);
    assert_eq!(store.collections.lock().unwrap().len(), 1);

    let spec = store.collections.lock().unwrap()["catalog"].clone();
    assert_eq!(spec.vector_name, "fashion_clip");
    assert_eq!(spec.dim, DIM);
    assert_eq!(spec.hnsw_m, 16);

    let id = PointId::from_uid("sku-1").to_string();
    let point = &snapshot[&id];
    assert_eq!(point.payload.name, "Linen Shirt");
    assert_eq!(point.vector["fashion_clip"].len(), DIM);
}

#[test]
fn test_upsert_batches_follow_batch_size() {
    let mut config = test_config(WriteMode::Live);
    config.upsert_batch = 2;
    let encoder = FakeEncoder::new(DIM);
    let images = images();
    let store = MemoryStore::default();

    let mut input = records();
    input.push(json!({"uid": "sku-4", "name": "Scarf"}));
    input.push(json!({"uid": "sku-5", "name": "Beanie"}));

    Pipeline::new(&config, &encoder, &images)
        .with_store(&store)
        .run(&input)
        .unwrap();

    assert_eq!(*store.batches.lock().unwrap(), vec![2, 2, 1]);
}

#[test]
fn test_duplicate_uid_last_write_wins() {
    let config = test_config(WriteMode::Live);
    let encoder = FakeEncoder::new(DIM);
    let images = FakeImages::default();
    let store = MemoryStore::default();

    let input = vec![
        json!({"uid": "dup", "name": "First"}),
        json!({"uid": "dup", "name": "Second"}),
    ];
    let report = Pipeline::new(&config, &encoder, &images)
        .with_store(&store)
        .run(&input)
        .unwrap();

    assert_eq!(report.duplicate_uids, 1);
    assert_eq!(store.point_count(), 1);
    let points = store.points.lock().unwrap();
    let point = points.values().next().unwrap();
    assert_eq!(point.payload.name, "Second");
}

#[test]
fn test_invalid_records_are_skipped() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(WriteMode::DryRun {
        output_dir: tmp.path().to_path_buf(),
    });
    let encoder = FakeEncoder::new(DIM);
    let images = FakeImages::default();

    let input = vec![
        json!({"name": "no uid"}),
        json!("not an object"),
        json!({"uid": "ok", "name": "Kept"}),
    ];
    let report = Pipeline::new(&config, &encoder, &images)
        .run(&input)
        .unwrap();

    assert_eq!(report.rejected, 2);
    assert_eq!(report.loaded, 1);
    assert_eq!(report.written, 1);
}

#[test]
fn test_no_valid_items_is_fatal() {
    let config = test_config(WriteMode::Live);
    let encoder = FakeEncoder::new(DIM);
    let images = FakeImages::default();
    let store = MemoryStore::default();

    let result = Pipeline::new(&config, &encoder, &images)
        .with_store(&store)
        .run(&[json!({"name": "orphan"})]);

    assert!(matches!(result, Err(PipelineError::EmptyDataset)));
    assert!(store.collections.lock().unwrap().is_empty());
    assert_eq!(*encoder.text_calls.lock().unwrap(), 0);
}

#[test]
fn test_dimension_mismatch_halts_before_write() {
    let mut config = test_config(WriteMode::Live);
    config.dim = DIM + 1;
    let encoder = FakeEncoder::new(DIM);
    let images = images();
    let store = MemoryStore::default();

    let result = Pipeline::new(&config, &encoder, &images)
        .with_store(&store)
        .run(&records());

    assert!(matches!(
        result,
        Err(PipelineError::DimensionMismatch {
            stage: "image",
            expected: 5,
            got: 4
        })
    ));
    assert!(store.collections.lock().unwrap().is_empty());
    assert_eq!(store.point_count(), 0);
}

#[test]
fn test_store_failure_aborts_remaining_batches() {
    let config = test_config(WriteMode::Live);
    let encoder = FakeEncoder::new(DIM);
    let images = images();
    let store = MemoryStore::failing_on(1);

    let mut input = records();
    input.push(json!({"uid": "sku-4", "name": "Scarf"}));
    input.push(json!({"uid": "sku-5", "name": "Beanie"}));

    let result = Pipeline::new(&config, &encoder, &images)
        .with_store(&store)
        .run(&input);

    match result {
        Err(PipelineError::StoreWrite { context, .. }) => {
            assert_eq!(context, "upsert items 2..4")
        }
        other => panic!("expected StoreWrite, got {other:?}"),
    }
    assert_eq!(*store.batches.lock().unwrap(), vec![2]);
    assert_eq!(store.point_count(), 2);
}

#[test]
fn test_stages_run_in_order() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(WriteMode::DryRun {
        output_dir: tmp.path().to_path_buf(),
    });
    let encoder = FakeEncoder::new(DIM);
    let images = images();

    let report = Pipeline::new(&config, &encoder, &images)
        .run(&records())
        .unwrap();

    assert_eq!(
        report.stages,
        vec![
            Stage::Loaded,
            Stage::ImagesFetched,
            Stage::ImagesEncoded,
            Stage::TextsEncoded,
            Stage::Fused,
            Stage::Sanitized,
            Stage::Written,
            Stage::Done,
        ]
    );
}

#[test]
fn test_live_mode_without_store_is_config_error() {
    let config = test_config(WriteMode::Live);
    let encoder = FakeEncoder::new(DIM);
    let images = FakeImages::default();

    let result = Pipeline::new(&config, &encoder, &images).run(&records());
    assert!(matches!(result, Err(PipelineError::Config(_))));
    assert_eq!(*encoder.image_calls.lock().unwrap(), 0);
    assert_eq!(*encoder.text_calls.lock().unwrap(), 0);
}
