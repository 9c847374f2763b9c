#![forbid(unsafe_code)]

use core::fmt;

use fbl_device::{BlasStatus, PointerMode};
use fbl_dtype::{Element, UNIT_CHECK_MAX_ULP};
use fbl_layout::CheckRegion;
use fbl_reference::{NormType, relative_error};
use serde::Serialize;

/// First element outside the unit-check window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    pub batch: usize,
    pub row: usize,
    pub col: usize,
    pub expected: String,
    pub actual: String,
    /// `None` when exactly one side is NaN.
    pub ulp: Option<u64>,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch {} ({}, {}): expected {} got {}",
            self.batch, self.row, self.col, self.expected, self.actual
        )?;
        match self.ulp {
            Some(ulp) => write!(f, " ({ulp} ulp)"),
            None => f.write_str(" (NaN on one side)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Verdict {
    Exact { max_ulp: u64 },
    Normed { error: f64, threshold: f64 },
}

impl Verdict {
    #[must_use]
    pub fn passed(&self) -> bool {
        match *self {
            Self::Exact { max_ulp } => max_ulp <= UNIT_CHECK_MAX_ULP,
            // A NaN error never passes.
            Self::Normed { error, threshold } => error <= threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckFailure {
    Unit {
        mode: PointerMode,
        array: &'static str,
        mismatch: Mismatch,
    },
    Norm {
        mode: PointerMode,
        array: &'static str,
        error: f64,
        threshold: f64,
    },
    KernelStatus {
        mode: PointerMode,
        expected: BlasStatus,
        actual: BlasStatus,
    },
}

impl CheckFailure {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Unit { .. } => "unit_check_failed",
            Self::Norm { .. } => "norm_check_failed",
            Self::KernelStatus { .. } => "kernel_status_mismatch",
        }
    }

    #[must_use]
    pub const fn mode(&self) -> PointerMode {
        match self {
            Self::Unit { mode, .. }
            | Self::Norm { mode, .. }
            | Self::KernelStatus { mode, .. } => *mode,
        }
    }
}

impl fmt::Display for CheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit {
                mode,
                array,
                mismatch,
            } => write!(f, "unit check on {array} ({mode} pointer mode): {mismatch}"),
            Self::Norm {
                mode,
                array,
                error,
                threshold,
            } => write!(
                f,
                "norm check on {array} ({mode} pointer mode): error {error:e} exceeds {threshold:e}"
            ),
            Self::KernelStatus {
                mode,
                expected,
                actual,
            } => write!(
                f,
                "kernel returned {actual} in {mode} pointer mode, expected {expected}"
            ),
        }
    }
}

impl std::error::Error for CheckFailure {}

/// Element-wise comparison over `region`, per component within
/// [`UNIT_CHECK_MAX_ULP`]; NaN matches NaN.
pub fn unit_check<T: Element>(
    region: &CheckRegion,
    gold: &[T],
    result: &[T],
) -> Result<Verdict, Mismatch> {
    let mut max_ulp = 0;
    for batch in 0..region.batch_count {
        for col in 0..region.cols {
            for row in 0..region.rows {
                let idx = region.index(batch, row, col);
                let (expected, actual) = (gold[idx], result[idx]);
                let ulp = expected.max_component_ulp(actual);
                match ulp {
                    Some(ulp) if ulp <= UNIT_CHECK_MAX_ULP => max_ulp = max_ulp.max(ulp),
                    _ => {
                        return Err(Mismatch {
                            batch,
                            row,
                            col,
                            expected: format!("{expected:?}"),
                            actual: format!("{actual:?}"),
                            ulp,
                        });
                    }
                }
            }
        }
    }
    Ok(Verdict::Exact { max_ulp })
}

/// Aggregate relative error over every batch element.
///
/// Frobenius errors are summed and held to `tolerance * batch_count`; the
/// other norms take the worst batch element against `tolerance`.
#[must_use]
pub fn norm_check<T: Element>(
    norm: NormType,
    region: &CheckRegion,
    tolerance: f64,
    gold: &[T],
    result: &[T],
) -> Verdict {
    let errors = (0..region.batch_count).map(|batch| {
        let base = batch * region.stride;
        relative_error(
            norm,
            region.rows,
            region.cols,
            region.ld,
            &gold[base..],
            &result[base..],
        )
    });
    match norm {
        NormType::Frobenius => Verdict::Normed {
            error: errors.sum(),
            threshold: tolerance * region.batch_count as f64,
        },
        _ => Verdict::Normed {
            error: errors.fold(0.0, |worst: f64, error| {
                if error.is_nan() || worst.is_nan() {
                    f64::NAN
                } else {
                    worst.max(error)
                }
            }),
            threshold: tolerance,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{CheckFailure, Verdict, norm_check, unit_check};
    use fbl_device::{BlasStatus, PointerMode};
    use fbl_dtype::{Element, RealElement};
    use fbl_layout::CheckRegion;
    use fbl_reference::NormType;
    use num_complex::Complex;

    type C32 = Complex<f32>;

    fn region(
        rows: usize,
        cols: usize,
        ld: usize,
        stride: usize,
        batch_count: usize,
    ) -> CheckRegion {
        CheckRegion {
            rows,
            cols,
            ld,
            stride,
            batch_count,
        }
    }

    #[test]
    fn unit_check_tolerates_four_ulp_and_nan_pairs() {
        let gold = vec![C32::new(1.0, 2.0), C32::nan(), C32::new(3.0, 0.0)];
        let result = vec![
            C32::new(1.0_f32.nudge(4), 2.0),
            C32::nan(),
            C32::new(3.0, 0.0),
        ];
        let verdict = unit_check(&region(3, 1, 3, 3, 1), &gold, &result).expect("within window");
        assert_eq!(verdict, Verdict::Exact { max_ulp: 4 });
        assert!(verdict.passed());
    }

    #[test]
    fn unit_check_reports_first_mismatch_with_position() {
        let region = region(2, 2, 3, 7, 2);
        let gold = vec![C32::new(1.0, 1.0); 14];
        let mut result = gold.clone();
        result[region.index(1, 1, 1)] = C32::new(1.0_f32.nudge(5), 1.0);
        result[region.index(1, 0, 1)] = C32::nan();
        let mismatch = unit_check(&region, &gold, &result).expect_err("mismatch");
        assert_eq!((mismatch.batch, mismatch.row, mismatch.col), (1, 0, 1));
        assert_eq!(mismatch.ulp, None);

        // Padding rows are never compared.
        let mut padded = gold.clone();
        padded[2] = C32::new(99.0, 0.0);
        assert!(unit_check(&region, &gold, &padded).is_ok());
    }

    #[test]
    fn frobenius_errors_sum_over_the_batch() {
        let region = region(1, 2, 1, 2, 2);
        let gold = vec![
            C32::new(3.0, 4.0),
            C32::new(0.0, 0.0),
            C32::new(1.0, 0.0),
            C32::new(0.0, 0.0),
        ];
        let mut result = gold.clone();
        result[0] = C32::new(3.0, 4.5);
        let Verdict::Normed { error, threshold } =
            norm_check(NormType::Frobenius, &region, 1.0e-4, &gold, &result)
        else {
            panic!("norm check yields a normed verdict");
        };
        assert!((error - 0.1).abs() < 1e-6);
        assert!((threshold - 2.0e-4).abs() < 1e-12);

        let max = norm_check(NormType::Max, &region, 0.2, &gold, &result);
        assert!(max.passed());
        assert!(matches!(max, Verdict::Normed { threshold, .. } if threshold == 0.2));
    }

    #[test]
    fn norm_check_fails_on_one_sided_nan() {
        let region = region(2, 1, 2, 2, 1);
        let gold = vec![C32::new(1.0, 0.0), C32::new(2.0, 0.0)];
        let result = vec![C32::new(1.0, 0.0), C32::new(f32::NAN, 0.0)];
        let verdict = norm_check(NormType::One, &region, 1.0e-4, &gold, &result);
        assert!(!verdict.passed());
    }

    #[test]
    fn failures_name_mode_and_array() {
        let failure = CheckFailure::KernelStatus {
            mode: PointerMode::Device,
            expected: BlasStatus::Success,
            actual: BlasStatus::InternalError,
        };
        assert_eq!(failure.reason_code(), "kernel_status_mismatch");
        assert_eq!(failure.mode(), PointerMode::Device);
        assert!(failure.to_string().contains("device pointer mode"));
        let norm = CheckFailure::Norm {
            mode: PointerMode::Host,
            array: "C",
            error: 1.0,
            threshold: 1.0e-4,
        };
        assert!(norm.to_string().starts_with("norm check on C (host pointer mode)"));
    }
}
