#![forbid(unsafe_code)]

use fbl_dtype::{Element, RealElement as _};
use fbl_layout::{ArrayLayout, Fill, ShapeError, Storage, packed_index};

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;
const MIX_CONST1: u64 = 0xBF58_476D_1CE4_E5B9;
const MIX_CONST2: u64 = 0x94D0_49BB_1331_11EB;
pub const DEFAULT_DATA_SEED: u64 = 0xC0DE_CAFE_F00D_BAAD;

/// Inclusive bounds of the integer values written into generated arrays.
pub const VALUE_RANGE: (u64, u64) = (1, 10);

#[derive(Debug, Clone, PartialEq)]
pub enum GeneratorError {
    InvalidUpperBound,
    BufferTooSmall { needed: usize, actual: usize },
    KindMismatch { kind: MatrixKind, storage: Storage },
    Layout(ShapeError),
}

impl GeneratorError {
    #[must_use]
    pub const fn reason_code(&self) -> &'static str {
        match self {
            Self::InvalidUpperBound => "random_upper_bound_rejected",
            Self::BufferTooSmall { .. } => "random_fill_length_contract",
            Self::KindMismatch { .. } => "random_matrix_kind_mismatch",
            Self::Layout(_) => "random_layout_invalid",
        }
    }
}

impl std::fmt::Display for GeneratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidUpperBound => write!(f, "upper_bound must be > 0"),
            Self::BufferTooSmall { needed, actual } => {
                write!(f, "buffer holds {actual} elements, layout needs {needed}")
            }
            Self::KindMismatch { kind, storage } => {
                write!(f, "matrix kind {kind:?} cannot fill storage {storage:?}")
            }
            Self::Layout(err) => write!(f, "layout error: {err}"),
        }
    }
}

impl std::error::Error for GeneratorError {}

impl From<ShapeError> for GeneratorError {
    fn from(err: ShapeError) -> Self {
        Self::Layout(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeterministicRng {
    stream_seed: u64,
    counter: u64,
}

impl DeterministicRng {
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            stream_seed: seed,
            counter: 0,
        }
    }

    #[must_use]
    pub fn next_u64(&mut self) -> u64 {
        self.counter = self.counter.wrapping_add(1);
        splitmix64(
            self.stream_seed
                .wrapping_add(self.counter.wrapping_mul(GOLDEN_GAMMA)),
        )
    }

    pub fn bounded_u64(&mut self, upper_bound: u64) -> Result<u64, GeneratorError> {
        if upper_bound == 0 {
            return Err(GeneratorError::InvalidUpperBound);
        }

        let threshold = u64::MAX - u64::MAX % upper_bound;

        loop {
            let candidate = self.next_u64();
            if candidate < threshold {
                return Ok(candidate % upper_bound);
            }
        }
    }

    /// Integer drawn uniformly from `low..=high`.
    pub fn integer_in(&mut self, low: u64, high: u64) -> Result<u64, GeneratorError> {
        let span = high
            .checked_sub(low)
            .and_then(|span| span.checked_add(1))
            .ok_or(GeneratorError::InvalidUpperBound)?;
        Ok(low + self.bounded_u64(span)?)
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(MIX_CONST1);
    x ^= x >> 27;
    x = x.wrapping_mul(MIX_CONST2);
    x ^ (x >> 31)
}

/// When an input array is replaced by NaN sentinels.
///
/// A kernel must not read an array whose contribution is scaled by an exact
/// zero; poisoning it turns any such read into a visible mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NanPolicy {
    Never,
    AlphaSetsNan,
    BetaSetsNan,
}

impl NanPolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Never => "never_set_nan",
            Self::AlphaSetsNan => "alpha_sets_nan",
            Self::BetaSetsNan => "beta_sets_nan",
        }
    }

    #[must_use]
    pub const fn poisons(self, zeros: ScalarZeros) -> bool {
        match self {
            Self::Never => false,
            Self::AlphaSetsNan => zeros.alpha,
            Self::BetaSetsNan => zeros.beta,
        }
    }
}

/// Which of the case scalars are exactly zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScalarZeros {
    pub alpha: bool,
    pub beta: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatrixKind {
    /// Independent entries over the whole logical region.
    General,
    /// Dense square matrix equal to its conjugate transpose.
    Hermitian,
    /// Packed triangle of a Hermitian matrix.
    PackedHermitian(Fill),
}

/// Argument roles; each draws from its own stream of the case seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayRole {
    A,
    B,
    C,
    X,
}

impl ArrayRole {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::X => "x",
        }
    }

    const fn stream_tag(self) -> u64 {
        match self {
            Self::A => 0x0A0A_0A0A_0A0A_0A0A,
            Self::B => 0x0B0B_0B0B_0B0B_0B0B,
            Self::C => 0x0C0C_0C0C_0C0C_0C0C,
            Self::X => 0x5858_5858_5858_5858,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillSpec {
    pub kind: MatrixKind,
    pub policy: NanPolicy,
    pub alternating_sign: bool,
}

impl FillSpec {
    #[must_use]
    pub const fn new(kind: MatrixKind, policy: NanPolicy) -> Self {
        Self {
            kind,
            policy,
            alternating_sign: false,
        }
    }

    #[must_use]
    pub const fn alternating(mut self) -> Self {
        self.alternating_sign = true;
        self
    }
}

/// Seeded source of host input data for one test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataGenerator {
    seed: u64,
}

impl DataGenerator {
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self { seed }
    }

    #[must_use]
    pub const fn stream(&self, role: ArrayRole) -> DeterministicRng {
        DeterministicRng::new(self.seed ^ role.stream_tag())
    }

    /// Fill `buffer` for `role`; the result depends only on the seed and the role.
    pub fn fill<T: Element>(
        &self,
        role: ArrayRole,
        buffer: &mut [T],
        layout: &ArrayLayout,
        spec: FillSpec,
        zeros: ScalarZeros,
    ) -> Result<(), GeneratorError> {
        let mut rng = self.stream(role);
        fill_array(buffer, layout, spec, zeros, &mut rng)
    }
}

impl Default for DataGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_DATA_SEED)
    }
}

fn draw<T: Element>(rng: &mut DeterministicRng, negate: bool) -> Result<T, GeneratorError> {
    let (low, high) = VALUE_RANGE;
    let re = rng.integer_in(low, high)? as f64;
    let im = rng.integer_in(low, high)? as f64;
    let value = T::from_parts(T::Real::from_f64(re), T::Real::from_f64(im));
    Ok(if negate {
        value.scale(-T::Real::ONE)
    } else {
        value
    })
}

fn logical_positions(storage: Storage) -> Vec<(usize, usize)> {
    match storage {
        Storage::Vector { len, .. } => (0..len).map(|col| (0, col)).collect(),
        Storage::Dense { rows, cols, .. } => (0..cols)
            .flat_map(|col| (0..rows).map(move |row| (row, col)))
            .collect(),
        Storage::Packed { n } => (0..n * (n + 1) / 2).map(|row| (row, 0)).collect(),
    }
}

/// Fill every batch element of `layout` in `buffer`.
///
/// Padding (rows past the logical extent and gaps between strided batches)
/// is zeroed. A poisoned role gets NaN over its whole logical region.
pub fn fill_array<T: Element>(
    buffer: &mut [T],
    layout: &ArrayLayout,
    spec: FillSpec,
    zeros: ScalarZeros,
    rng: &mut DeterministicRng,
) -> Result<(), GeneratorError> {
    let needed = layout.element_count()?;
    if buffer.len() < needed {
        return Err(GeneratorError::BufferTooSmall {
            needed,
            actual: buffer.len(),
        });
    }
    match (spec.kind, layout.storage) {
        (MatrixKind::General, _)
        | (MatrixKind::PackedHermitian(_), Storage::Packed { .. }) => {}
        (MatrixKind::Hermitian, Storage::Dense { rows, cols, .. }) if rows == cols => {}
        (kind, storage) => return Err(GeneratorError::KindMismatch { kind, storage }),
    }

    buffer[..needed].fill(T::zero());
    let poisoned = spec.policy.poisons(zeros);
    let sign = |row: usize, col: usize| spec.alternating_sign && (row + col) % 2 == 1;

    for batch in 0..layout.batch_count {
        if poisoned {
            for (row, col) in logical_positions(layout.storage) {
                buffer[layout.index(batch, row, col)] = T::nan();
            }
            continue;
        }

        match (spec.kind, layout.storage) {
            (MatrixKind::Hermitian, Storage::Dense { rows: n, .. }) => {
                for col in 0..n {
                    for row in col..n {
                        let value: T = draw(rng, sign(row, col))?;
                        if row == col {
                            buffer[layout.index(batch, row, col)] = value.real_part();
                        } else {
                            buffer[layout.index(batch, row, col)] = value;
                            buffer[layout.index(batch, col, row)] = value.conj();
                        }
                    }
                }
            }
            (MatrixKind::PackedHermitian(fill), Storage::Packed { n }) => {
                let base = layout.batch_offset(batch);
                for col in 0..n {
                    for row in 0..n {
                        let Some(offset) = packed_index(fill, n, row, col) else {
                            continue;
                        };
                        let value: T = draw(rng, sign(row, col))?;
                        buffer[base + offset] = if row == col {
                            value.real_part()
                        } else {
                            value
                        };
                    }
                }
            }
            _ => {
                for (row, col) in logical_positions(layout.storage) {
                    buffer[layout.index(batch, row, col)] = draw(rng, sign(row, col))?;
                }
            }
        }
    }
    Ok(())
}
