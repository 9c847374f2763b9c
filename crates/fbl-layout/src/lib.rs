#![forbid(unsafe_code)]

//! Column-major layouts for the arrays a Hermitian kernel touches: strided
//! vectors, dense matrices with a leading dimension, packed triangles and
//! strided batches of any of those.

/// Triangle selector (`uplo`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fill {
    Upper,
    Lower,
}

impl Fill {
    #[must_use]
    pub fn from_char(value: char) -> Option<Self> {
        match value.to_ascii_uppercase() {
            'U' => Some(Self::Upper),
            'L' => Some(Self::Lower),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::Upper => 'U',
            Self::Lower => 'L',
        }
    }

    /// Whether `(row, col)` lies in the selected triangle, diagonal included.
    #[must_use]
    pub const fn contains(self, row: usize, col: usize) -> bool {
        match self {
            Self::Upper => row <= col,
            Self::Lower => row >= col,
        }
    }
}

/// Transpose selector (`transA`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    None,
    Transpose,
    ConjugateTranspose,
}

impl Operation {
    #[must_use]
    pub fn from_char(value: char) -> Option<Self> {
        match value.to_ascii_uppercase() {
            'N' => Some(Self::None),
            'T' => Some(Self::Transpose),
            'C' => Some(Self::ConjugateTranspose),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::None => 'N',
            Self::Transpose => 'T',
            Self::ConjugateTranspose => 'C',
        }
    }

    #[must_use]
    pub const fn is_transposed(self) -> bool {
        !matches!(self, Self::None)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShapeError {
    InvalidDimension(i64),
    InvalidStrideScale(f64),
    Overflow,
}

impl std::fmt::Display for ShapeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidDimension(dim) => write!(f, "invalid dimension {dim}"),
            Self::InvalidStrideScale(scale) => {
                write!(f, "stride_scale {scale} must be finite and >= 1")
            }
            Self::Overflow => write!(f, "size arithmetic overflow"),
        }
    }
}

impl std::error::Error for ShapeError {}

/// Convert a signed dimension that has already passed argument validation.
pub fn dim(value: i64) -> Result<usize, ShapeError> {
    usize::try_from(value).map_err(|_| ShapeError::InvalidDimension(value))
}

/// Number of stored elements of an `n x n` packed triangle.
pub fn packed_len(n: usize) -> Result<usize, ShapeError> {
    n.checked_add(1)
        .and_then(|next| n.checked_mul(next))
        .map(|product| product / 2)
        .ok_or(ShapeError::Overflow)
}

/// Offset of `(row, col)` inside a column-major packed triangle.
///
/// Returns `None` for positions outside the stored triangle.
#[must_use]
pub fn packed_index(fill: Fill, n: usize, row: usize, col: usize) -> Option<usize> {
    if row >= n || col >= n || !fill.contains(row, col) {
        return None;
    }
    Some(match fill {
        Fill::Upper => row + col * (col + 1) / 2,
        Fill::Lower => col * (2 * n - col + 1) / 2 + (row - col),
    })
}

/// Storage of one batch element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// `len` logical entries spaced `inc` apart.
    Vector { len: usize, inc: usize },
    /// `rows x cols` column-major with leading dimension `ld >= rows`.
    Dense { rows: usize, cols: usize, ld: usize },
    /// `n x n` triangle stored column by column.
    Packed { n: usize },
}

impl Storage {
    /// Elements one batch element occupies, padding included.
    pub fn footprint(&self) -> Result<usize, ShapeError> {
        match *self {
            Self::Vector { len, inc } => len.checked_mul(inc).ok_or(ShapeError::Overflow),
            Self::Dense { cols, ld, .. } => ld.checked_mul(cols).ok_or(ShapeError::Overflow),
            Self::Packed { n } => packed_len(n),
        }
    }

    /// Offset of logical `(row, col)` within one batch element.
    ///
    /// Vectors are addressed as a single row; packed storage as a single
    /// column of `packed_len(n)` entries.
    #[must_use]
    pub const fn offset(&self, row: usize, col: usize) -> usize {
        match *self {
            Self::Vector { inc, .. } => col * inc,
            Self::Dense { ld, .. } => row + col * ld,
            Self::Packed { .. } => row + col,
        }
    }
}

/// Region compared element by element against the reference result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckRegion {
    pub rows: usize,
    pub cols: usize,
    pub ld: usize,
    pub stride: usize,
    pub batch_count: usize,
}

impl CheckRegion {
    #[must_use]
    pub const fn index(&self, batch: usize, row: usize, col: usize) -> usize {
        batch * self.stride + col * self.ld + row
    }
}

/// A logical array: per-batch storage, batch stride and batch count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayLayout {
    pub storage: Storage,
    pub stride: usize,
    pub batch_count: usize,
}

impl ArrayLayout {
    /// A single, unbatched array.
    pub fn single(storage: Storage) -> Result<Self, ShapeError> {
        Ok(Self {
            storage,
            stride: storage.footprint()?,
            batch_count: 1,
        })
    }

    /// A strided batch with `stride = floor(footprint * stride_scale)`.
    pub fn batched(
        storage: Storage,
        stride_scale: f64,
        batch_count: usize,
    ) -> Result<Self, ShapeError> {
        if !stride_scale.is_finite() || stride_scale < 1.0 {
            return Err(ShapeError::InvalidStrideScale(stride_scale));
        }
        let footprint = storage.footprint()?;
        let scaled = (footprint as f64 * stride_scale).floor();
        if scaled >= usize::MAX as f64 {
            return Err(ShapeError::Overflow);
        }
        Ok(Self {
            storage,
            stride: (scaled as usize).max(footprint),
            batch_count,
        })
    }

    /// Total elements of the single contiguous allocation backing the batch.
    pub fn element_count(&self) -> Result<usize, ShapeError> {
        self.stride
            .checked_mul(self.batch_count)
            .ok_or(ShapeError::Overflow)
    }

    #[must_use]
    pub const fn batch_offset(&self, batch: usize) -> usize {
        batch * self.stride
    }

    /// Index of logical `(row, col)` of batch element `batch`.
    #[must_use]
    pub const fn index(&self, batch: usize, row: usize, col: usize) -> usize {
        self.batch_offset(batch) + self.storage.offset(row, col)
    }

    #[must_use]
    pub fn comparison_region(&self) -> CheckRegion {
        let (rows, cols, ld) = match self.storage {
            Storage::Vector { len, inc } => (1, len, inc),
            Storage::Dense { rows, cols, ld } => (rows, cols, ld),
            Storage::Packed { n } => {
                let len = n * (n + 1) / 2;
                (len, 1, len)
            }
        };
        CheckRegion {
            rows,
            cols,
            ld,
            stride: self.stride,
            batch_count: self.batch_count,
        }
    }
}
