#![forbid(unsafe_code)]

use core::fmt;

use fbl_dtype::{ComplexElement, Element, RealElement};
use fbl_layout::{Fill, Operation, packed_index, packed_len};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormType {
    One,
    Infinity,
    Frobenius,
    Max,
}

impl NormType {
    #[must_use]
    pub fn from_char(value: char) -> Option<Self> {
        match value.to_ascii_uppercase() {
            'O' | '1' => Some(Self::One),
            'I' => Some(Self::Infinity),
            'F' | 'E' => Some(Self::Frobenius),
            'M' => Some(Self::Max),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::One => 'O',
            Self::Infinity => 'I',
            Self::Frobenius => 'F',
            Self::Max => 'M',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    ShapeContractViolation(&'static str),
    BufferTooShort {
        array: &'static str,
        needed: usize,
        actual: usize,
    },
    UnsupportedOperation(Operation),
}

impl ReferenceError {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::ShapeContractViolation(_) => "reference_shape_contract_violation",
            Self::BufferTooShort { .. } => "reference_buffer_too_short",
            Self::UnsupportedOperation(_) => "reference_operation_unsupported",
        }
    }
}

impl fmt::Display for ReferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShapeContractViolation(msg) => write!(f, "{msg}"),
            Self::BufferTooShort {
                array,
                needed,
                actual,
            } => write!(f, "{array} holds {actual} elements, operation needs {needed}"),
            Self::UnsupportedOperation(op) => {
                write!(f, "operation '{}' is not defined for Hermitian updates", op.as_char())
            }
        }
    }
}

impl std::error::Error for ReferenceError {}

/// Trusted host implementation of the Hermitian updates, column-major.
///
/// Implementations follow reference BLAS: only the `uplo` triangle of the
/// output is referenced, the diagonal comes out purely real, `beta == 0`
/// overwrites the output without reading it and `alpha == 0` never reads the
/// scaled inputs.
#[allow(clippy::too_many_arguments)]
pub trait HostReference {
    /// `A := alpha * x * x^H + A`
    fn her<T: ComplexElement>(
        &self,
        uplo: Fill,
        n: usize,
        alpha: T::Real,
        x: &[T],
        incx: usize,
        a: &mut [T],
        lda: usize,
    ) -> Result<(), ReferenceError>;

    /// `AP := alpha * x * x^H + AP` with `AP` packed.
    fn hpr<T: ComplexElement>(
        &self,
        uplo: Fill,
        n: usize,
        alpha: T::Real,
        x: &[T],
        incx: usize,
        ap: &mut [T],
    ) -> Result<(), ReferenceError>;

    /// `C := alpha * op(A) * op(A)^H + beta * C`
    fn herk<T: ComplexElement>(
        &self,
        uplo: Fill,
        trans: Operation,
        n: usize,
        k: usize,
        alpha: T::Real,
        a: &[T],
        lda: usize,
        beta: T::Real,
        c: &mut [T],
        ldc: usize,
    ) -> Result<(), ReferenceError>;

    /// `C := alpha * op(A) * op(B)^H + conj(alpha) * op(B) * op(A)^H + beta * C`
    fn her2k<T: ComplexElement>(
        &self,
        uplo: Fill,
        trans: Operation,
        n: usize,
        k: usize,
        alpha: T,
        a: &[T],
        lda: usize,
        b: &[T],
        ldb: usize,
        beta: T::Real,
        c: &mut [T],
        ldc: usize,
    ) -> Result<(), ReferenceError>;
}

/// Straightforward loop nests over column-major storage.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NaiveReference;

fn matrix_extent(rows: usize, cols: usize, ld: usize) -> usize {
    if rows == 0 || cols == 0 {
        0
    } else {
        ld * (cols - 1) + rows
    }
}

fn vector_extent(n: usize, inc: usize) -> usize {
    if n == 0 { 0 } else { 1 + (n - 1) * inc }
}

fn require(array: &'static str, actual: usize, needed: usize) -> Result<(), ReferenceError> {
    if actual < needed {
        return Err(ReferenceError::BufferTooShort {
            array,
            needed,
            actual,
        });
    }
    Ok(())
}

fn require_ld(rows: usize, ld: usize) -> Result<(), ReferenceError> {
    if ld < rows {
        return Err(ReferenceError::ShapeContractViolation(
            "leading dimension is smaller than the row count",
        ));
    }
    Ok(())
}

/// Rows strictly inside the `uplo` triangle of column `col`.
fn off_diagonal_rows(uplo: Fill, col: usize, n: usize) -> core::ops::Range<usize> {
    match uplo {
        Fill::Upper => 0..col,
        Fill::Lower => col + 1..n,
    }
}

/// `(rows, cols)` of the stored matrix behind `op(X)` for an `n x k` product.
fn op_shape(trans: Operation, n: usize, k: usize) -> Result<(usize, usize), ReferenceError> {
    match trans {
        Operation::None => Ok((n, k)),
        Operation::ConjugateTranspose => Ok((k, n)),
        Operation::Transpose => Err(ReferenceError::UnsupportedOperation(trans)),
    }
}

/// `C := beta * C` over the `uplo` triangle, diagonal forced real.
fn scale_triangle<T: ComplexElement>(uplo: Fill, n: usize, beta: T::Real, c: &mut [T], ldc: usize) {
    for j in 0..n {
        let diag = j + j * ldc;
        if beta == T::Real::ZERO {
            for i in off_diagonal_rows(uplo, j, n) {
                c[i + j * ldc] = T::zero();
            }
            c[diag] = T::zero();
        } else {
            for i in off_diagonal_rows(uplo, j, n) {
                c[i + j * ldc] = c[i + j * ldc].scale(beta);
            }
            c[diag] = T::from_real(beta * c[diag].re());
        }
    }
}

/// Column prologue of the non-transposed rank-k loops.
fn prepare_column<T: ComplexElement>(
    uplo: Fill,
    n: usize,
    j: usize,
    beta: T::Real,
    c: &mut [T],
    ldc: usize,
) {
    let diag = j + j * ldc;
    if beta == T::Real::ZERO {
        for i in off_diagonal_rows(uplo, j, n) {
            c[i + j * ldc] = T::zero();
        }
        c[diag] = T::zero();
    } else if beta != T::Real::ONE {
        for i in off_diagonal_rows(uplo, j, n) {
            c[i + j * ldc] = c[i + j * ldc].scale(beta);
        }
        c[diag] = T::from_real(beta * c[diag].re());
    } else {
        c[diag] = c[diag].real_part();
    }
}

impl HostReference for NaiveReference {
    fn her<T: ComplexElement>(
        &self,
        uplo: Fill,
        n: usize,
        alpha: T::Real,
        x: &[T],
        incx: usize,
        a: &mut [T],
        lda: usize,
    ) -> Result<(), ReferenceError> {
        if incx == 0 {
            return Err(ReferenceError::ShapeContractViolation("incx must be positive"));
        }
        require_ld(n, lda)?;
        if n == 0 || alpha == T::Real::ZERO {
            return Ok(());
        }
        require("x", x.len(), vector_extent(n, incx))?;
        require("A", a.len(), matrix_extent(n, n, lda))?;

        for j in 0..n {
            let diag = j + j * lda;
            let xj = x[j * incx];
            if xj == T::zero() {
                a[diag] = a[diag].real_part();
                continue;
            }
            let temp = xj.conj().scale(alpha);
            for i in off_diagonal_rows(uplo, j, n) {
                a[i + j * lda] = a[i + j * lda] + x[i * incx] * temp;
            }
            a[diag] = T::from_real(a[diag].re() + (xj * temp).re());
        }
        Ok(())
    }

    fn hpr<T: ComplexElement>(
        &self,
        uplo: Fill,
        n: usize,
        alpha: T::Real,
        x: &[T],
        incx: usize,
        ap: &mut [T],
    ) -> Result<(), ReferenceError> {
        if incx == 0 {
            return Err(ReferenceError::ShapeContractViolation("incx must be positive"));
        }
        if n == 0 || alpha == T::Real::ZERO {
            return Ok(());
        }
        let stored = packed_len(n)
            .map_err(|_| ReferenceError::ShapeContractViolation("packed length overflows"))?;
        require("x", x.len(), vector_extent(n, incx))?;
        require("AP", ap.len(), stored)?;

        for j in 0..n {
            let xj = x[j * incx];
            let Some(diag) = packed_index(uplo, n, j, j) else {
                continue;
            };
            if xj == T::zero() {
                ap[diag] = ap[diag].real_part();
                continue;
            }
            let temp = xj.conj().scale(alpha);
            for i in off_diagonal_rows(uplo, j, n) {
                if let Some(idx) = packed_index(uplo, n, i, j) {
                    ap[idx] = ap[idx] + x[i * incx] * temp;
                }
            }
            ap[diag] = T::from_real(ap[diag].re() + (xj * temp).re());
        }
        Ok(())
    }

    fn herk<T: ComplexElement>(
        &self,
        uplo: Fill,
        trans: Operation,
        n: usize,
        k: usize,
        alpha: T::Real,
        a: &[T],
        lda: usize,
        beta: T::Real,
        c: &mut [T],
        ldc: usize,
    ) -> Result<(), ReferenceError> {
        let (a_rows, a_cols) = op_shape(trans, n, k)?;
        require_ld(a_rows, lda)?;
        require_ld(n, ldc)?;
        let zero = T::Real::ZERO;
        if n == 0 || ((alpha == zero || k == 0) && beta == T::Real::ONE) {
            return Ok(());
        }
        require("C", c.len(), matrix_extent(n, n, ldc))?;
        if alpha == zero {
            scale_triangle(uplo, n, beta, c, ldc);
            return Ok(());
        }
        require("A", a.len(), matrix_extent(a_rows, a_cols, lda))?;

        match trans {
            Operation::None => {
                for j in 0..n {
                    prepare_column(uplo, n, j, beta, c, ldc);
                    let diag = j + j * ldc;
                    for l in 0..k {
                        let ajl = a[j + l * lda];
                        if ajl == T::zero() {
                            continue;
                        }
                        let temp = ajl.conj().scale(alpha);
                        for i in off_diagonal_rows(uplo, j, n) {
                            c[i + j * ldc] = c[i + j * ldc] + temp * a[i + l * lda];
                        }
                        c[diag] = T::from_real(c[diag].re() + (temp * ajl).re());
                    }
                }
            }
            _ => {
                for j in 0..n {
                    for i in off_diagonal_rows(uplo, j, n) {
                        let mut temp = T::zero();
                        for l in 0..k {
                            temp = temp + a[l + i * lda].conj() * a[l + j * lda];
                        }
                        let scaled = temp.scale(alpha);
                        c[i + j * ldc] = if beta == zero {
                            scaled
                        } else {
                            scaled + c[i + j * ldc].scale(beta)
                        };
                    }
                    let mut rtemp = zero;
                    for l in 0..k {
                        let alj = a[l + j * lda];
                        rtemp = rtemp + (alj.conj() * alj).re();
                    }
                    let diag = j + j * ldc;
                    c[diag] = if beta == zero {
                        T::from_real(alpha * rtemp)
                    } else {
                        T::from_real(alpha * rtemp + beta * c[diag].re())
                    };
                }
            }
        }
        Ok(())
    }

    fn her2k<T: ComplexElement>(
        &self,
        uplo: Fill,
        trans: Operation,
        n: usize,
        k: usize,
        alpha: T,
        a: &[T],
        lda: usize,
        b: &[T],
        ldb: usize,
        beta: T::Real,
        c: &mut [T],
        ldc: usize,
    ) -> Result<(), ReferenceError> {
        let (ab_rows, ab_cols) = op_shape(trans, n, k)?;
        require_ld(ab_rows, lda)?;
        require_ld(ab_rows, ldb)?;
        require_ld(n, ldc)?;
        let zero = T::Real::ZERO;
        if n == 0 || ((alpha.is_zero() || k == 0) && beta == T::Real::ONE) {
            return Ok(());
        }
        require("C", c.len(), matrix_extent(n, n, ldc))?;
        if alpha.is_zero() {
            scale_triangle(uplo, n, beta, c, ldc);
            return Ok(());
        }
        require("A", a.len(), matrix_extent(ab_rows, ab_cols, lda))?;
        require("B", b.len(), matrix_extent(ab_rows, ab_cols, ldb))?;

        match trans {
            Operation::None => {
                for j in 0..n {
                    prepare_column(uplo, n, j, beta, c, ldc);
                    let diag = j + j * ldc;
                    for l in 0..k {
                        let ajl = a[j + l * lda];
                        let bjl = b[j + l * ldb];
                        if ajl == T::zero() && bjl == T::zero() {
                            continue;
                        }
                        let temp1 = alpha * bjl.conj();
                        let temp2 = (alpha * ajl).conj();
                        for i in off_diagonal_rows(uplo, j, n) {
                            c[i + j * ldc] =
                                c[i + j * ldc] + a[i + l * lda] * temp1 + b[i + l * ldb] * temp2;
                        }
                        c[diag] = T::from_real(c[diag].re() + (ajl * temp1 + bjl * temp2).re());
                    }
                }
            }
            _ => {
                for j in 0..n {
                    let diag = j + j * ldc;
                    let rows = off_diagonal_rows(uplo, j, n).chain(core::iter::once(j));
                    for i in rows {
                        let mut temp1 = T::zero();
                        let mut temp2 = T::zero();
                        for l in 0..k {
                            temp1 = temp1 + a[l + i * lda].conj() * b[l + j * ldb];
                            temp2 = temp2 + b[l + i * ldb].conj() * a[l + j * lda];
                        }
                        let update = alpha * temp1 + alpha.conj() * temp2;
                        if i == j {
                            c[diag] = if beta == zero {
                                T::from_real(update.re())
                            } else {
                                T::from_real(beta * c[diag].re() + update.re())
                            };
                        } else {
                            c[i + j * ldc] = if beta == zero {
                                update
                            } else {
                                c[i + j * ldc].scale(beta) + alpha * temp1 + alpha.conj() * temp2
                            };
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn magnitude(re: f64, im: f64) -> f64 {
    re.hypot(im)
}

fn nan_max(lhs: f64, rhs: f64) -> f64 {
    if lhs.is_nan() || rhs.is_nan() {
        f64::NAN
    } else {
        lhs.max(rhs)
    }
}

fn norm_from_magnitudes(
    norm: NormType,
    rows: usize,
    cols: usize,
    magnitude_at: impl Fn(usize, usize) -> f64,
) -> f64 {
    match norm {
        NormType::Frobenius => {
            let mut sum_sq = 0.0;
            for col in 0..cols {
                for row in 0..rows {
                    let value = magnitude_at(row, col);
                    sum_sq += value * value;
                }
            }
            sum_sq.sqrt()
        }
        NormType::Max => (0..cols)
            .flat_map(|col| (0..rows).map(move |row| (row, col)))
            .fold(0.0, |acc, (row, col)| nan_max(acc, magnitude_at(row, col))),
        NormType::One => (0..cols).fold(0.0, |acc, col| {
            nan_max(acc, (0..rows).map(|row| magnitude_at(row, col)).sum())
        }),
        NormType::Infinity => (0..rows).fold(0.0, |acc, row| {
            nan_max(acc, (0..cols).map(|col| magnitude_at(row, col)).sum())
        }),
    }
}

/// Norm of a `rows x cols` column-major matrix, computed in `f64`.
#[must_use]
pub fn matrix_norm<T: Element>(
    norm: NormType,
    rows: usize,
    cols: usize,
    ld: usize,
    data: &[T],
) -> f64 {
    norm_from_magnitudes(norm, rows, cols, |row, col| {
        let value = data[row + col * ld];
        magnitude(value.re().to_f64(), value.im().to_f64())
    })
}

/// `‖gold - result‖ / ‖gold‖`, falling back to `‖gold - result‖` when `‖gold‖ == 0`.
///
/// Positions where gold and result are both NaN are treated as zero in both
/// norms; a NaN on one side only propagates into the error.
#[must_use]
pub fn relative_error<T: Element>(
    norm: NormType,
    rows: usize,
    cols: usize,
    ld: usize,
    gold: &[T],
    result: &[T],
) -> f64 {
    let masked = |row: usize, col: usize| {
        let idx = row + col * ld;
        gold[idx].is_nan() && result[idx].is_nan()
    };
    let gold_norm = norm_from_magnitudes(norm, rows, cols, |row, col| {
        if masked(row, col) {
            return 0.0;
        }
        let value = gold[row + col * ld];
        magnitude(value.re().to_f64(), value.im().to_f64())
    });
    let error_norm = norm_from_magnitudes(norm, rows, cols, |row, col| {
        if masked(row, col) {
            return 0.0;
        }
        let (g, r) = (gold[row + col * ld], result[row + col * ld]);
        magnitude(
            g.re().to_f64() - r.re().to_f64(),
            g.im().to_f64() - r.im().to_f64(),
        )
    });
    if gold_norm == 0.0 {
        error_norm
    } else {
        error_norm / gold_norm
    }
}

#[cfg(test)]
mod tests {
    use super::{
        HostReference, NaiveReference, NormType, ReferenceError, matrix_norm, relative_error,
    };
    use fbl_dtype::Element;
    use fbl_layout::{Fill, Operation, packed_index};
    use num_complex::Complex;

    type C64 = Complex<f64>;

    fn c(re: f64, im: f64) -> C64 {
        Complex::new(re, im)
    }

    fn sample(len: usize, salt: f64) -> Vec<C64> {
        (0..len)
            .map(|i| c(((i * 7) % 5) as f64 + 1.0 + salt, ((i * 3) % 4) as f64 - 1.5))
            .collect()
    }

    fn dense_to_packed(uplo: Fill, n: usize, dense: &[C64], ld: usize) -> Vec<C64> {
        let mut packed = vec![c(0.0, 0.0); n * (n + 1) / 2];
        for col in 0..n {
            for row in 0..n {
                if let Some(idx) = packed_index(uplo, n, row, col) {
                    packed[idx] = dense[row + col * ld];
                }
            }
        }
        packed
    }

    #[test]
    fn norm_tokens_parse() {
        assert_eq!(NormType::from_char('f'), Some(NormType::Frobenius));
        assert_eq!(NormType::from_char('1'), Some(NormType::One));
        assert_eq!(NormType::from_char('Z'), None);
        assert_eq!(NormType::Infinity.as_char(), 'I');
    }

    #[test]
    fn her_matches_hand_computed_update() {
        let x = vec![c(1.0, 1.0), c(2.0, 0.0)];
        let mut a = vec![c(1.0, 5.0), c(9.0, 9.0), c(0.0, 1.0), c(3.0, 0.0)];
        NaiveReference
            .her(Fill::Upper, 2, 2.0, &x, 1, &mut a, 2)
            .expect("her");
        // a00 = re(1+5i) + 2*|1+i|^2, a01 = i + 2*(1+i)*2, a11 = 3 + 2*4
        assert_eq!(a[0], c(5.0, 0.0));
        assert_eq!(a[2], c(4.0, 5.0));
        assert_eq!(a[3], c(11.0, 0.0));
        assert_eq!(a[1], c(9.0, 9.0), "lower triangle untouched");
    }

    #[test]
    fn her_with_zero_alpha_never_reads_x() {
        let x = vec![C64::nan(); 3];
        let mut a = sample(9, 0.0);
        let before = a.clone();
        NaiveReference
            .her(Fill::Lower, 3, 0.0, &x, 1, &mut a, 3)
            .expect("her");
        assert_eq!(a, before);
    }

    #[test]
    fn hpr_agrees_with_dense_her() {
        for uplo in [Fill::Upper, Fill::Lower] {
            let n = 4;
            let x = sample(2 * n, 0.5);
            let mut dense = sample(n * n, 1.0);
            let mut packed = dense_to_packed(uplo, n, &dense, n);
            NaiveReference
                .her(uplo, n, 1.5, &x, 2, &mut dense, n)
                .expect("her");
            NaiveReference
                .hpr(uplo, n, 1.5, &x, 2, &mut packed)
                .expect("hpr");
            assert_eq!(packed, dense_to_packed(uplo, n, &dense, n), "{uplo:?}");
        }
    }

    #[test]
    fn herk_no_transpose_matches_conjugate_transpose_form() {
        let (n, k) = (3, 2);
        let a = sample(n * k, 0.0);
        let mut a_h = vec![c(0.0, 0.0); k * n];
        for row in 0..n {
            for col in 0..k {
                a_h[col + row * k] = a[row + col * n].conj();
            }
        }
        let mut lhs = sample(n * n, 2.0);
        let mut rhs = lhs.clone();
        NaiveReference
            .herk(Fill::Lower, Operation::None, n, k, 2.0, &a, n, 0.5, &mut lhs, n)
            .expect("herk N");
        NaiveReference
            .herk(Fill::Lower, Operation::ConjugateTranspose, n, k, 2.0, &a_h, k, 0.5, &mut rhs, n)
            .expect("herk C");
        assert_eq!(lhs, rhs);
        for j in 0..n {
            assert_eq!(lhs[j + j * n].im, 0.0);
        }
    }

    #[test]
    fn herk_beta_zero_overwrites_nan_output() {
        let (n, k) = (3, 2);
        let a = sample(n * k, 0.0);
        let mut out = vec![C64::nan(); n * n];
        NaiveReference
            .herk(Fill::Upper, Operation::None, n, k, 1.0, &a, n, 0.0, &mut out, n)
            .expect("herk");
        for col in 0..n {
            for row in 0..n {
                let value = out[row + col * n];
                assert_eq!(value.is_nan(), row > col, "({row},{col}) = {value}");
            }
        }
    }

    #[test]
    fn herk_quick_returns_leave_output_untouched() {
        let a = vec![C64::nan(); 6];
        let mut out = sample(9, 0.0);
        let before = out.clone();
        NaiveReference
            .herk(Fill::Upper, Operation::None, 3, 2, 0.0, &a, 3, 1.0, &mut out, 3)
            .expect("herk");
        assert_eq!(out, before);
        NaiveReference
            .herk(Fill::Upper, Operation::None, 3, 0, 4.0, &a, 3, 1.0, &mut out, 3)
            .expect("herk k=0");
        assert_eq!(out, before);
    }

    #[test]
    fn her2k_with_equal_inputs_doubles_real_part_of_alpha() {
        let (n, k) = (3, 2);
        let a = sample(n * k, 0.0);
        let mut via_her2k = sample(n * n, 1.0);
        let mut via_herk = via_her2k.clone();
        NaiveReference
            .her2k(
                Fill::Upper,
                Operation::None,
                n,
                k,
                c(1.5, -4.0),
                &a,
                n,
                &a,
                n,
                2.0,
                &mut via_her2k,
                n,
            )
            .expect("her2k");
        NaiveReference
            .herk(Fill::Upper, Operation::None, n, k, 3.0, &a, n, 2.0, &mut via_herk, n)
            .expect("herk");
        assert!(relative_error(NormType::Frobenius, n, n, n, &via_herk, &via_her2k) < 1e-14);
    }

    #[test]
    fn her2k_transposed_writes_only_selected_triangle() {
        let (n, k) = (3, 2);
        let a = sample(k * n, 0.0);
        let b = sample(k * n, 3.0);
        let mut out = vec![c(-7.0, -7.0); n * n];
        NaiveReference
            .her2k(
                Fill::Lower,
                Operation::ConjugateTranspose,
                n,
                k,
                c(1.0, 2.0),
                &a,
                k,
                &b,
                k,
                0.0,
                &mut out,
                n,
            )
            .expect("her2k");
        for col in 0..n {
            for row in 0..col {
                assert_eq!(out[row + col * n], c(-7.0, -7.0));
            }
            assert_eq!(out[col + col * n].im, 0.0);
        }
    }

    #[test]
    fn reference_evaluation_is_idempotent() {
        let (n, k) = (4, 3);
        let a = sample(n * k, 0.25);
        let b = sample(n * k, 0.75);
        let seed = sample(n * n, 1.0);
        let mut first = seed.clone();
        let mut second = seed;
        for out in [&mut first, &mut second] {
            NaiveReference
                .her2k(Fill::Lower, Operation::None, n, k, c(0.5, 0.5), &a, n, &b, n, 1.5, out, n)
                .expect("her2k");
        }
        let bits = |v: &[C64]| -> Vec<(u64, u64)> {
            v.iter().map(|z| (z.re.to_bits(), z.im.to_bits())).collect()
        };
        assert_eq!(bits(&first), bits(&second));
    }

    #[test]
    fn plain_transpose_is_rejected_for_complex_updates() {
        let a = sample(4, 0.0);
        let mut out = sample(4, 0.0);
        let err = NaiveReference
            .herk(Fill::Upper, Operation::Transpose, 2, 2, 1.0, &a, 2, 1.0, &mut out, 2)
            .expect_err("transpose");
        assert_eq!(err, ReferenceError::UnsupportedOperation(Operation::Transpose));
        assert_eq!(err.reason_code(), "reference_operation_unsupported");
    }

    #[test]
    fn short_buffers_are_reported() {
        let x = sample(2, 0.0);
        let mut a = sample(4, 0.0);
        let err = NaiveReference
            .her(Fill::Upper, 3, 1.0, &x, 1, &mut a, 3)
            .expect_err("short");
        assert!(matches!(err, ReferenceError::BufferTooShort { array: "x", .. }));
    }

    #[test]
    fn matrix_norms_match_definitions() {
        // [[3, -1], [4i, 2]] column-major
        let data = vec![c(3.0, 0.0), c(0.0, 4.0), c(-1.0, 0.0), c(2.0, 0.0)];
        assert_eq!(matrix_norm(NormType::Max, 2, 2, 2, &data), 4.0);
        assert_eq!(matrix_norm(NormType::One, 2, 2, 2, &data), 7.0);
        assert_eq!(matrix_norm(NormType::Infinity, 2, 2, 2, &data), 6.0);
        assert_eq!(matrix_norm(NormType::Frobenius, 2, 2, 2, &data), 30.0_f64.sqrt());
    }

    #[test]
    fn relative_error_masks_nan_pairs_and_handles_zero_gold() {
        let gold = vec![c(f64::NAN, 0.0), c(2.0, 0.0)];
        let same = vec![c(f64::NAN, f64::NAN), c(2.0, 0.0)];
        assert_eq!(relative_error(NormType::Frobenius, 2, 1, 2, &gold, &same), 0.0);

        let one_sided = vec![c(1.0, 0.0), c(2.0, 0.0)];
        assert!(relative_error(NormType::Frobenius, 2, 1, 2, &gold, &one_sided).is_nan());

        let zeros = vec![c(0.0, 0.0); 2];
        let off = vec![c(0.0, 3.0), c(4.0, 0.0)];
        assert_eq!(relative_error(NormType::Frobenius, 2, 1, 2, &zeros, &off), 5.0);
    }
}
