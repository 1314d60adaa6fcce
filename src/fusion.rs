//! Dense row-major matrices and the image/text fusion transform.
//!
//! Pure functions only; nothing here touches the network or disk.

/// Weight of the image vector in the fused vector.
pub const IMAGE_WEIGHT: f32 = 0.7;
/// Weight of the text vector in the fused vector.
pub const TEXT_WEIGHT: f32 = 0.3;

/// Row-major `rows x dim` matrix of f32.
#[derive(Clone, Debug, PartialEq)]
pub struct Matrix {
    dim: usize,
    data: Vec<f32>,
}

impl Matrix {
    /// All-zero matrix.
    pub fn zeros(rows: usize, dim: usize) -> Self {
        Self {
            dim,
            data: vec![0.0; rows * dim],
        }
    }

    /// Zero-row matrix of the given width.
    pub fn empty(dim: usize) -> Self {
        Self::zeros(0, dim)
    }

    /// Build from rows that are all exactly `dim` wide.
    ///
    /// Returns the offending width on mismatch.
    pub fn from_rows(rows: Vec<Vec<f32>>, dim: usize) -> Result<Self, usize> {
        let mut data = Vec::with_capacity(rows.len() * dim);
        for row in rows {
            if row.len() != dim {
                return Err(row.len());
            }
            data.extend(row);
        }
        Ok(Self { dim, data })
    }

    pub fn rows(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn row(&self, index: usize) -> &[f32] {
        &self.data[index * self.dim..(index + 1) * self.dim]
    }

    pub fn row_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.data[index * self.dim..(index + 1) * self.dim]
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dim.max(1))
    }

    /// Append all rows of `other`.
    pub fn extend(&mut self, other: Matrix) {
        debug_assert_eq!(self.dim, other.dim);
        self.data.extend(other.data);
    }

    /// Copy each row of `rows` to the matching target index, leaving other rows untouched.
    pub fn scatter(&mut self, indices: &[usize], rows: &Matrix) {
        for (source, &target) in indices.iter().enumerate() {
            self.row_mut(target).copy_from_slice(rows.row(source));
        }
    }
}

pub fn l2_norm(vector: &[f32]) -> f32 {
    l2_norm_wide(vector) as f32
}

/// Accumulated in f64 so large finite rows don't overflow.
fn l2_norm_wide(vector: &[f32]) -> f64 {
    vector
        .iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        .sqrt()
}

/// Normalize in place. Zero-norm vectors stay zero; a row with a NaN or
/// infinite norm becomes all zeros.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = l2_norm_wide(vector);
    if !norm.is_finite() {
        vector.fill(0.0);
        return;
    }
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value = (f64::from(*value) / norm) as f32;
    }
}

/// `normalize(0.7 * image + 0.3 * text)` per row.
///
/// Both matrices must have the same shape.
pub fn fuse(images: &Matrix, texts: &Matrix) -> Matrix {
    assert_eq!(images.rows(), texts.rows(), "fusion row count mismatch");
    assert_eq!(images.dim(), texts.dim(), "fusion width mismatch");

    let data = images
        .data
        .iter()
        .zip(&texts.data)
        .map(|(image, text)| IMAGE_WEIGHT * image + TEXT_WEIGHT * text)
        .collect();
    let mut fused = Matrix {
        dim: images.dim,
        data,
    };
    for index in 0..fused.rows() {
        l2_normalize(fused.row_mut(index));
    }
    fused
}

/// Replace NaN and infinite entries with 0. Returns how many were replaced.
pub fn sanitize(matrix: &mut Matrix) -> usize {
    let mut replaced = 0;
    for value in matrix.data.iter_mut() {
        if !value.is_finite() {
            *value = 0.0;
            replaced += 1;
        }
    }
    replaced
}
