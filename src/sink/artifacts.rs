//! Dry-run artifacts.
//!
//! `embeddings.bin`:
//!
//! Header (49 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of the encoder backend name)
//! - dimensions: u32 (little-endian)
//! - row_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Rows (repeated, input order):
//! - vector: [f32; dimensions] (little-endian)
//!
//! `payload.ndjson`: one JSON payload per line, same order as the rows.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::catalog::Item;
use crate::errors::{PipelineError, PipelineResult};
use crate::fusion::{l2_norm, Matrix};

pub const EMBEDDINGS_FILE: &str = "embeddings.bin";
pub const PAYLOAD_FILE: &str = "payload.ndjson";

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + dimensions(4) + row_count(8) + checksum(4)
const HEADER_SIZE: usize = 49;

/// Decoded `embeddings.bin` header.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingsHeader {
    pub version: u8,
    pub model_id: [u8; 32],
    pub dimensions: u32,
    pub row_count: u64,
}

/// Paths written by a dry run.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub embeddings: PathBuf,
    pub payload: PathBuf,
}

/// SHA256 of the encoder backend name, stored in the header.
pub fn model_id(model_name: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(model_name.as_bytes());
    hasher.finalize().into()
}

/// Writes fused vectors and payloads to a local directory. Never touches the network.
pub struct ArtifactWriter {
    output_dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }

    /// Write both artifacts, creating the output directory if needed.
    pub fn write(
        &self,
        vectors: &Matrix,
        items: &[Item],
        model_name: &str,
    ) -> PipelineResult<ArtifactPaths> {
        if vectors.rows() != items.len() {
            return Err(PipelineError::Artifact(format!(
                "{} vectors for {} items",
                vectors.rows(),
                items.len()
            )));
        }
        std::fs::create_dir_all(&self.output_dir)?;

        let paths = ArtifactPaths {
            embeddings: self.output_dir.join(EMBEDDINGS_FILE),
            payload: self.output_dir.join(PAYLOAD_FILE),
        };

        atomic_write(&paths.embeddings, |writer| {
            write_embeddings(writer, vectors, &model_id(model_name))
        })?;
        atomic_write(&paths.payload, |writer| write_payloads(writer, items))?;

        log::info!("dry-run artifacts written to {}", self.output_dir.display());
        Ok(paths)
    }
}

/// Write through a temp file, fsync, then rename over the target.
fn atomic_write(
    path: &Path,
    fill: impl FnOnce(&mut BufWriter<File>) -> PipelineResult<()>,
) -> PipelineResult<()> {
    let temp_path = path.with_extension("tmp");

    let result = write_synced(&temp_path, fill);
    if result.is_err() {
        // Clean up temp file on error
        let _ = std::fs::remove_file(&temp_path);
        return result;
    }

    std::fs::rename(&temp_path, path)?;
    Ok(())
}

fn write_synced(
    path: &Path,
    fill: impl FnOnce(&mut BufWriter<File>) -> PipelineResult<()>,
) -> PipelineResult<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    fill(&mut writer)?;
    writer.flush()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}

fn write_embeddings(
    writer: &mut impl Write,
    vectors: &Matrix,
    model_id: &[u8; 32],
) -> PipelineResult<()> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    header_bytes[0] = FORMAT_VERSION;
    header_bytes[1..33].copy_from_slice(model_id);
    header_bytes[33..37].copy_from_slice(&(vectors.dim() as u32).to_le_bytes());
    header_bytes[37..45].copy_from_slice(&(vectors.rows() as u64).to_le_bytes());
    let checksum = crc32fast::hash(&header_bytes[0..45]);
    header_bytes[45..49].copy_from_slice(&checksum.to_le_bytes());
    writer.write_all(&header_bytes)?;

    for row in vectors.iter_rows() {
        for &value in row {
            writer.write_all(&value.to_le_bytes())?;
        }
    }
    Ok(())
}

fn write_payloads(writer: &mut impl Write, items: &[Item]) -> PipelineResult<()> {
    for item in items {
        serde_json::to_writer(&mut *writer, item)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

/// Read an `embeddings.bin` back, validating its header.
pub fn load_embeddings(path: &Path) -> PipelineResult<(EmbeddingsHeader, Matrix)> {
    let mut reader = BufReader::new(File::open(path)?);

    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes)?;

    let version = header_bytes[0];
    if version > FORMAT_VERSION {
        return Err(PipelineError::Artifact(format!(
            "file version {version}, supported version {FORMAT_VERSION}"
        )));
    }

    let stored_checksum = u32::from_le_bytes([
        header_bytes[45],
        header_bytes[46],
        header_bytes[47],
        header_bytes[48],
    ]);
    if stored_checksum != crc32fast::hash(&header_bytes[0..45]) {
        return Err(PipelineError::Artifact(
            "checksum mismatch: file may be corrupted".to_string(),
        ));
    }

    let mut model_id = [0u8; 32];
    model_id.copy_from_slice(&header_bytes[1..33]);
    let mut dim_bytes = [0u8; 4];
    dim_bytes.copy_from_slice(&header_bytes[33..37]);
    let mut rows_bytes = [0u8; 8];
    rows_bytes.copy_from_slice(&header_bytes[37..45]);

    let header = EmbeddingsHeader {
        version,
        model_id,
        dimensions: u32::from_le_bytes(dim_bytes),
        row_count: u64::from_le_bytes(rows_bytes),
    };

    let dim = header.dimensions as usize;
    let mut rows = Vec::with_capacity(header.row_count as usize);
    for _ in 0..header.row_count {
        let mut row = Vec::with_capacity(dim);
        for _ in 0..dim {
            let mut float_bytes = [0u8; 4];
            reader.read_exact(&mut float_bytes)?;
            row.push(f32::from_le_bytes(float_bytes));
        }
        rows.push(row);
    }

    let matrix = Matrix::from_rows(rows, dim)
        .map_err(|got| PipelineError::Artifact(format!("row width {got} != {dim}")))?;
    Ok((header, matrix))
}

/// Re-read a written `embeddings.bin` and check it against what the run produced.
pub fn verify_embeddings(
    path: &Path,
    expected_rows: usize,
    expected_dim: usize,
    model_name: &str,
) -> PipelineResult<EmbeddingsHeader> {
    let (header, vectors) = load_embeddings(path)?;
    if header.model_id != model_id(model_name) {
        return Err(PipelineError::Artifact(format!(
            "{} was not written by {model_name}",
            path.display()
        )));
    }
    if header.row_count as usize != expected_rows || header.dimensions as usize != expected_dim {
        return Err(PipelineError::Artifact(format!(
            "expected {expected_rows}x{expected_dim}, found {}x{}",
            header.row_count, header.dimensions
        )));
    }
    let unit_rows = vectors
        .iter_rows()
        .filter(|row| (l2_norm(row) - 1.0).abs() < 1e-3)
        .count();
    log::debug!(
        "verified {} (version {}, {unit_rows}/{expected_rows} unit rows)",
        path.display(),
        header.version
    );
    Ok(header)
}
