#![forbid(unsafe_code)]

use core::fmt;
use std::fs;
use std::path::Path;

use fbl_dtype::DType;
use fbl_layout::{Fill, Operation};
use fbl_random::DEFAULT_DATA_SEED;
use fbl_reference::NormType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Function {
    Her,
    Hpr,
    Herk,
    Her2k,
}

impl Function {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Her => "her",
            Self::Hpr => "hpr",
            Self::Herk => "herk",
            Self::Her2k => "her2k",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    Plain,
    StridedBatched,
}

/// Split a routine name such as `her2k_strided_batched`.
#[must_use]
pub fn parse_routine(name: &str) -> Option<(Function, Variant)> {
    let (base, variant) = match name.trim().strip_suffix("_strided_batched") {
        Some(base) => (base, Variant::StridedBatched),
        None => (name.trim(), Variant::Plain),
    };
    let function = match base {
        "her" => Function::Her,
        "hpr" => Function::Hpr,
        "herk" => Function::Herk,
        "her2k" => Function::Her2k,
        _ => return None,
    };
    Some((function, variant))
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentsError {
    UnknownFunction(String),
    UnknownDType(String),
    RealDType(DType),
    InvalidSelector { field: &'static str, value: char },
    InvalidIterations { field: &'static str, value: i64 },
    InvalidStrideScale(f64),
}

impl ArgumentsError {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::UnknownFunction(_) => "arguments_unknown_function",
            Self::UnknownDType(_) => "arguments_unknown_dtype",
            Self::RealDType(_) => "arguments_real_dtype",
            Self::InvalidSelector { .. } => "arguments_invalid_selector",
            Self::InvalidIterations { .. } => "arguments_invalid_iterations",
            Self::InvalidStrideScale(_) => "arguments_invalid_stride_scale",
        }
    }
}

impl fmt::Display for ArgumentsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownFunction(name) => write!(f, "unknown function '{name}'"),
            Self::UnknownDType(name) => write!(f, "unknown a_type '{name}'"),
            Self::RealDType(dtype) => {
                write!(f, "Hermitian updates need a complex a_type, got {dtype}")
            }
            Self::InvalidSelector { field, value } => {
                write!(f, "invalid {field} selector '{value}'")
            }
            Self::InvalidIterations { field, value } => {
                write!(f, "{field} must be positive, got {value}")
            }
            Self::InvalidStrideScale(scale) => write!(
                f,
                "stride_scale {scale} must be at least 1 and keep the batch addressable"
            ),
        }
    }
}

impl std::error::Error for ArgumentsError {}

fn default_a_type() -> String {
    "f32_c".to_string()
}

fn default_uplo() -> char {
    'U'
}

fn default_trans() -> char {
    'N'
}

fn default_norm() -> char {
    'F'
}

fn default_one_i64() -> i64 {
    1
}

fn default_one_f64() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_iters() -> i64 {
    10
}

fn default_cold_iters() -> i64 {
    2
}

fn default_seed() -> u64 {
    DEFAULT_DATA_SEED
}

/// One fixture entry as written on disk.
///
/// Leading dimensions left out default to the smallest legal value for the
/// routine; negative values are kept so invalid-size cases can be expressed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arguments {
    pub id: String,
    pub function: String,
    #[serde(default = "default_a_type")]
    pub a_type: String,
    #[serde(default = "default_uplo")]
    pub uplo: char,
    #[serde(default = "default_trans")]
    pub trans_a: char,
    pub n: i64,
    #[serde(default)]
    pub k: i64,
    #[serde(default)]
    pub lda: Option<i64>,
    #[serde(default)]
    pub ldb: Option<i64>,
    #[serde(default)]
    pub ldc: Option<i64>,
    #[serde(default = "default_one_i64")]
    pub incx: i64,
    #[serde(default = "default_one_f64")]
    pub stride_scale: f64,
    #[serde(default = "default_one_i64")]
    pub batch_count: i64,
    #[serde(default = "default_one_f64")]
    pub alpha: f64,
    #[serde(default)]
    pub alphai: f64,
    #[serde(default)]
    pub beta: f64,
    #[serde(default = "default_norm")]
    pub norm_type: char,
    #[serde(default = "default_true")]
    pub unit_check: bool,
    #[serde(default = "default_true")]
    pub norm_check: bool,
    #[serde(default)]
    pub timing: bool,
    #[serde(default = "default_iters")]
    pub iters: i64,
    #[serde(default = "default_cold_iters")]
    pub cold_iters: i64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Arguments {
    /// An entry with every optional field at its fixture default.
    #[must_use]
    pub fn new(id: &str, function: &str, n: i64) -> Self {
        Self {
            id: id.to_string(),
            function: function.to_string(),
            a_type: default_a_type(),
            uplo: default_uplo(),
            trans_a: default_trans(),
            n,
            k: 0,
            lda: None,
            ldb: None,
            ldc: None,
            incx: default_one_i64(),
            stride_scale: default_one_f64(),
            batch_count: default_one_i64(),
            alpha: default_one_f64(),
            alphai: 0.0,
            beta: 0.0,
            norm_type: default_norm(),
            unit_check: true,
            norm_check: true,
            timing: false,
            iters: default_iters(),
            cold_iters: default_cold_iters(),
            seed: default_seed(),
        }
    }
}

/// A validated, immutable test case.
///
/// Dimensions stay signed: size validity is the kernel's to judge, and the
/// harness must be able to hand it negative values.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    pub id: String,
    pub function: Function,
    pub variant: Variant,
    pub dtype: DType,
    pub uplo: Fill,
    pub trans: Operation,
    pub n: i64,
    pub k: i64,
    pub lda: i64,
    pub ldb: i64,
    pub ldc: i64,
    pub incx: i64,
    pub stride_scale: f64,
    pub batch_count: i64,
    pub alpha_re: f64,
    pub alpha_im: f64,
    pub beta: f64,
    pub norm: NormType,
    pub unit_check: bool,
    pub norm_check: bool,
    pub timing: bool,
    pub iters: usize,
    pub cold_iters: usize,
    pub seed: u64,
}

impl TestCase {
    pub fn from_arguments(args: &Arguments) -> Result<Self, ArgumentsError> {
        let (function, variant) = parse_routine(&args.function)
            .ok_or_else(|| ArgumentsError::UnknownFunction(args.function.clone()))?;
        let dtype = DType::parse(&args.a_type)
            .ok_or_else(|| ArgumentsError::UnknownDType(args.a_type.clone()))?;
        if !dtype.is_complex() {
            return Err(ArgumentsError::RealDType(dtype));
        }
        let uplo = Fill::from_char(args.uplo).ok_or(ArgumentsError::InvalidSelector {
            field: "uplo",
            value: args.uplo,
        })?;
        let trans = Operation::from_char(args.trans_a).ok_or(ArgumentsError::InvalidSelector {
            field: "trans_a",
            value: args.trans_a,
        })?;
        let norm = NormType::from_char(args.norm_type).ok_or(ArgumentsError::InvalidSelector {
            field: "norm_type",
            value: args.norm_type,
        })?;
        let iters = positive(args.iters, "iters")?;
        let cold_iters = usize::try_from(args.cold_iters).map_err(|_| {
            ArgumentsError::InvalidIterations {
                field: "cold_iters",
                value: args.cold_iters,
            }
        })?;
        let batched = variant == Variant::StridedBatched;
        if batched && !batch_fits(args) {
            return Err(ArgumentsError::InvalidStrideScale(args.stride_scale));
        }

        let inner_rows = if trans.is_transposed() {
            args.k
        } else {
            args.n
        };
        let (lda_min, ldc_min) = match function {
            Function::Her => (args.n.max(1), 1),
            Function::Hpr => (1, 1),
            Function::Herk | Function::Her2k => (inner_rows.max(1), args.n.max(1)),
        };

        Ok(Self {
            id: args.id.clone(),
            function,
            variant,
            dtype,
            uplo,
            trans,
            n: args.n,
            k: args.k,
            lda: args.lda.unwrap_or(lda_min),
            ldb: args.ldb.unwrap_or(lda_min),
            ldc: args.ldc.unwrap_or(ldc_min),
            incx: args.incx,
            stride_scale: if batched { args.stride_scale } else { 1.0 },
            batch_count: if batched { args.batch_count } else { 1 },
            alpha_re: args.alpha,
            alpha_im: args.alphai,
            beta: args.beta,
            norm,
            unit_check: args.unit_check,
            norm_check: args.norm_check,
            timing: args.timing,
            iters,
            cold_iters,
            seed: args.seed,
        })
    }

    #[must_use]
    pub const fn is_batched(&self) -> bool {
        matches!(self.variant, Variant::StridedBatched)
    }

    /// Routine name as the kernel library exports it.
    #[must_use]
    pub fn routine(&self) -> String {
        match self.variant {
            Variant::Plain => self.function.as_str().to_string(),
            Variant::StridedBatched => format!("{}_strided_batched", self.function.as_str()),
        }
    }
}

/// The scaled batch allocation must be addressable with signed 64-bit strides.
///
/// The per-batch footprint is bounded by the square of the largest dimension,
/// leading dimension or increment.
fn batch_fits(args: &Arguments) -> bool {
    let scale = args.stride_scale;
    if !scale.is_finite() || scale < 1.0 {
        return false;
    }
    let extent = [
        Some(args.n),
        Some(args.k),
        args.lda,
        args.ldb,
        args.ldc,
        Some(args.incx),
    ]
    .into_iter()
    .flatten()
    .map(i64::unsigned_abs)
    .fold(1, u64::max) as f64;
    let batches = args.batch_count.unsigned_abs().max(1) as f64;
    extent * extent * scale * batches < i64::MAX as f64
}

fn positive(value: i64, field: &'static str) -> Result<usize, ArgumentsError> {
    usize::try_from(value)
        .ok()
        .filter(|&count| count > 0)
        .ok_or(ArgumentsError::InvalidIterations { field, value })
}

/// Load and validate every entry of a JSON fixture file.
pub fn load_cases(path: &Path) -> Result<Vec<TestCase>, String> {
    let raw = fs::read_to_string(path)
        .map_err(|err| format!("failed reading {}: {err}", path.display()))?;
    let entries: Vec<Arguments> =
        serde_json::from_str(&raw).map_err(|err| format!("invalid json: {err}"))?;
    entries
        .iter()
        .map(|args| {
            TestCase::from_arguments(args).map_err(|err| {
                format!("{}: {} ({err})", args.id, err.reason_code())
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{Arguments, ArgumentsError, Function, TestCase, Variant, parse_routine};
    use fbl_dtype::DType;
    use fbl_layout::{Fill, Operation};

    #[test]
    fn routine_names_split_into_function_and_variant() {
        assert_eq!(parse_routine("hpr"), Some((Function::Hpr, Variant::Plain)));
        assert_eq!(
            parse_routine("her2k_strided_batched"),
            Some((Function::Her2k, Variant::StridedBatched))
        );
        assert_eq!(parse_routine("gemm"), None);
    }

    #[test]
    fn fixture_defaults_fill_missing_fields() {
        let raw = r#"{"id": "herk-min", "function": "herk", "n": 5, "k": 3, "trans_a": "C"}"#;
        let args: Arguments = serde_json::from_str(raw).expect("fixture parses");
        let case = TestCase::from_arguments(&args).expect("valid case");
        assert_eq!(case.dtype, DType::Complex64);
        assert_eq!(case.uplo, Fill::Upper);
        assert_eq!(case.trans, Operation::ConjugateTranspose);
        assert_eq!(case.lda, 3, "op(A) = A^H stores K rows");
        assert_eq!(case.ldc, 5);
        assert_eq!(case.batch_count, 1);
        assert_eq!((case.iters, case.cold_iters), (10, 2));
        assert!(case.unit_check && case.norm_check && !case.timing);
    }

    #[test]
    fn plain_routines_ignore_batch_fields() {
        let mut args = Arguments::new("plain", "her", 4);
        args.batch_count = 7;
        args.stride_scale = 0.5;
        let case = TestCase::from_arguments(&args).expect("plain case");
        assert_eq!(case.batch_count, 1);
        assert!(!case.is_batched());
        assert_eq!(case.routine(), "her");
    }

    #[test]
    fn overlapping_batch_stride_is_rejected() {
        let mut args = Arguments::new("overlap", "hpr_strided_batched", 4);
        args.stride_scale = 0.75;
        let err = TestCase::from_arguments(&args).expect_err("stride below footprint");
        assert_eq!(err, ArgumentsError::InvalidStrideScale(0.75));
        assert_eq!(err.reason_code(), "arguments_invalid_stride_scale");
    }

    #[test]
    fn unaddressable_batch_stride_is_rejected() {
        let mut args = Arguments::new("huge", "her_strided_batched", 3);
        args.batch_count = 2;
        args.stride_scale = 1e30;
        let err = TestCase::from_arguments(&args).expect_err("stride overflows");
        assert_eq!(err, ArgumentsError::InvalidStrideScale(1e30));

        args.stride_scale = 2.5;
        let case = TestCase::from_arguments(&args).expect("moderate scale");
        assert_eq!(case.stride_scale, 2.5);
    }

    #[test]
    fn bad_configuration_is_reported_by_field() {
        let mut args = Arguments::new("bad", "her", 4);
        args.uplo = 'X';
        assert!(matches!(
            TestCase::from_arguments(&args),
            Err(ArgumentsError::InvalidSelector { field: "uplo", value: 'X' })
        ));

        let mut args = Arguments::new("bad", "her", 4);
        args.iters = 0;
        assert!(matches!(
            TestCase::from_arguments(&args),
            Err(ArgumentsError::InvalidIterations { field: "iters", .. })
        ));

        let mut args = Arguments::new("bad", "her", 4);
        args.a_type = "f64_r".to_string();
        assert_eq!(
            TestCase::from_arguments(&args),
            Err(ArgumentsError::RealDType(DType::F64))
        );

        let args = Arguments::new("bad", "syrk", 4);
        assert!(matches!(
            TestCase::from_arguments(&args),
            Err(ArgumentsError::UnknownFunction(_))
        ));
    }

    #[test]
    fn negative_sizes_survive_loading() {
        let mut args = Arguments::new("neg", "her", -1);
        args.incx = 0;
        let case = TestCase::from_arguments(&args).expect("invalid sizes are a kernel matter");
        assert_eq!(case.n, -1);
        assert_eq!(case.incx, 0);
        assert_eq!(case.lda, 1);
    }
}
