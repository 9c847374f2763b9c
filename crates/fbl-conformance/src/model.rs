#![forbid(unsafe_code)]

use serde::Serialize;
use serde_json::{Map, Value};

use crate::arguments::{Function, TestCase, Variant};

/// A parameter that may appear in a test name or log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Param {
    AType,
    Uplo,
    TransA,
    N,
    K,
    Alpha,
    Lda,
    Ldb,
    Beta,
    Ldc,
    Incx,
    StrideScale,
    BatchCount,
}

impl Param {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::AType => "a_type",
            Self::Uplo => "uplo",
            Self::TransA => "transA",
            Self::N => "N",
            Self::K => "K",
            Self::Alpha => "alpha",
            Self::Lda => "lda",
            Self::Ldb => "ldb",
            Self::Beta => "beta",
            Self::Ldc => "ldc",
            Self::Incx => "incx",
            Self::StrideScale => "stride_scale",
            Self::BatchCount => "batch_count",
        }
    }
}

/// Parameters that distinguish cases of one routine, in display order.
#[must_use]
pub fn relevant_params(function: Function, variant: Variant) -> Vec<Param> {
    use Param::{AType, Alpha, Beta, Incx, K, Lda, Ldb, Ldc, N, TransA, Uplo};
    let mut params = match function {
        Function::Her => vec![AType, Uplo, N, Alpha, Incx, Lda],
        Function::Hpr => vec![AType, Uplo, N, Alpha, Incx],
        Function::Herk => vec![AType, Uplo, TransA, N, K, Alpha, Lda, Beta, Ldc],
        Function::Her2k => vec![AType, Uplo, TransA, N, K, Alpha, Lda, Ldb, Beta, Ldc],
    };
    if variant == Variant::StridedBatched {
        params.extend([Param::StrideScale, Param::BatchCount]);
    }
    params
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1.0e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

fn alpha_value(case: &TestCase) -> String {
    // Only her2k takes a complex alpha.
    if case.function == Function::Her2k && case.alpha_im != 0.0 {
        format!(
            "{}_{}",
            format_number(case.alpha_re),
            format_number(case.alpha_im)
        )
    } else {
        format_number(case.alpha_re)
    }
}

#[must_use]
pub fn param_value(case: &TestCase, param: Param) -> String {
    match param {
        Param::AType => case.dtype.name().to_string(),
        Param::Uplo => case.uplo.as_char().to_string(),
        Param::TransA => case.trans.as_char().to_string(),
        Param::N => case.n.to_string(),
        Param::K => case.k.to_string(),
        Param::Alpha => alpha_value(case),
        Param::Lda => case.lda.to_string(),
        Param::Ldb => case.ldb.to_string(),
        Param::Beta => format_number(case.beta),
        Param::Ldc => case.ldc.to_string(),
        Param::Incx => case.incx.to_string(),
        Param::StrideScale => format_number(case.stride_scale),
        Param::BatchCount => case.batch_count.to_string(),
    }
}

/// Identifier-safe name: `<routine>_<value>_<value>...`.
///
/// `-` is written as `m` and `.` as `p`.
#[must_use]
pub fn test_name(case: &TestCase) -> String {
    let mut name = case.routine();
    for param in relevant_params(case.function, case.variant) {
        name.push('_');
        name.extend(param_value(case, param).chars().map(|ch| match ch {
            '-' => 'm',
            '.' => 'p',
            other => other,
        }));
    }
    name
}

/// Relevant parameters of a case plus the measured counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub params: Vec<(&'static str, String)>,
    pub gpu_us: Option<f64>,
    pub gflops: Option<f64>,
    pub gbytes_per_s: Option<f64>,
    pub norm_error_host_ptr: Option<f64>,
    pub norm_error_device_ptr: Option<f64>,
}

const COUNTER_COLUMNS: [&str; 5] = [
    "gpu_us",
    "gflops",
    "gbytes_per_s",
    "norm_error_host_ptr",
    "norm_error_device_ptr",
];

impl LogRecord {
    #[must_use]
    pub fn new(case: &TestCase) -> Self {
        let params = relevant_params(case.function, case.variant)
            .into_iter()
            .map(|param| (param.name(), param_value(case, param)))
            .collect();
        Self {
            params,
            gpu_us: None,
            gflops: None,
            gbytes_per_s: None,
            norm_error_host_ptr: None,
            norm_error_device_ptr: None,
        }
    }

    fn counters(&self) -> [Option<f64>; 5] {
        [
            self.gpu_us,
            self.gflops,
            self.gbytes_per_s,
            self.norm_error_host_ptr,
            self.norm_error_device_ptr,
        ]
    }

    #[must_use]
    pub fn csv_header(&self) -> String {
        self.params
            .iter()
            .map(|(name, _)| *name)
            .chain(COUNTER_COLUMNS)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Values row matching [`Self::csv_header`]; unmeasured counters are `-`.
    #[must_use]
    pub fn csv_values(&self) -> String {
        self.params
            .iter()
            .map(|(_, value)| value.clone())
            .chain(self.counters().into_iter().map(|counter| {
                counter.map_or_else(|| "-".to_string(), |value| format!("{value}"))
            }))
            .collect::<Vec<_>>()
            .join(",")
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        for (name, value) in &self.params {
            object.insert((*name).to_string(), Value::String(value.clone()));
        }
        for (name, counter) in COUNTER_COLUMNS.into_iter().zip(self.counters()) {
            let value = counter
                .and_then(serde_json::Number::from_f64)
                .map_or(Value::Null, Value::Number);
            object.insert(name.to_string(), value);
        }
        Value::Object(object)
    }
}

#[cfg(test)]
mod tests {
    use super::{LogRecord, Param, relevant_params, test_name};
    use crate::arguments::{Arguments, Function, TestCase, Variant};

    fn case(args: &Arguments) -> TestCase {
        TestCase::from_arguments(args).expect("fixture case")
    }

    #[test]
    fn families_declare_their_parameter_subsets() {
        assert_eq!(relevant_params(Function::Hpr, Variant::Plain).len(), 5);
        let batched = relevant_params(Function::Her2k, Variant::StridedBatched);
        assert_eq!(batched.first(), Some(&Param::AType));
        assert_eq!(
            &batched[batched.len() - 2..],
            &[Param::StrideScale, Param::BatchCount]
        );
        assert!(!relevant_params(Function::Her, Variant::Plain).contains(&Param::Beta));
    }

    #[test]
    fn names_are_identifier_safe() {
        let mut args = Arguments::new("name", "her_strided_batched", 3);
        args.alpha = -0.5;
        args.incx = -2;
        args.stride_scale = 1.5;
        args.batch_count = 2;
        assert_eq!(
            test_name(&case(&args)),
            "her_strided_batched_f32_c_U_3_m0p5_m2_3_1p5_2"
        );
    }

    #[test]
    fn complex_alpha_renders_both_parts_only_when_needed() {
        let mut args = Arguments::new("alpha", "her2k", 2);
        args.k = 1;
        args.alpha = 2.0;
        assert!(test_name(&case(&args)).contains("_2_2_"));
        args.alphai = -1.0;
        assert!(test_name(&case(&args)).contains("_2_m1_"));

        let mut args = Arguments::new("alpha", "herk", 2);
        args.alphai = 3.0;
        assert!(!test_name(&case(&args)).contains("_3_"), "herk alpha is real");
    }

    #[test]
    fn log_record_renders_csv_pair_and_json() {
        let mut args = Arguments::new("log", "hpr", 4);
        args.alpha = 2.0;
        let mut record = LogRecord::new(&case(&args));
        record.norm_error_host_ptr = Some(0.0);
        assert_eq!(
            record.csv_header(),
            "a_type,uplo,N,alpha,incx,gpu_us,gflops,gbytes_per_s,norm_error_host_ptr,norm_error_device_ptr"
        );
        assert_eq!(record.csv_values(), "f32_c,U,4,2,1,-,-,-,0,-");

        let json = record.to_json();
        assert_eq!(json["N"], "4");
        assert!(json["gpu_us"].is_null());
        assert_eq!(json["norm_error_host_ptr"], 0.0);
    }
}
