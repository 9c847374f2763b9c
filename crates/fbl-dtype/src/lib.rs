#![forbid(unsafe_code)]

use core::fmt;
use core::ops::{Add, Mul, Neg, Sub};
use num_complex::Complex;

/// Maximum ULP distance accepted by the element-wise unit check.
///
/// Matches the 4-ULP window of gtest's floating-point equality assertions.
pub const UNIT_CHECK_MAX_ULP: u64 = 4;

/// Element types a kernel under test can operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    F64,
    Complex64,
    Complex128,
}

impl DType {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::F32 => "f32_r",
            Self::F64 => "f64_r",
            Self::Complex64 => "f32_c",
            Self::Complex128 => "f64_c",
        }
    }

    #[must_use]
    pub const fn item_size(self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F64 | Self::Complex64 => 8,
            Self::Complex128 => 16,
        }
    }

    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "f32_r" | "f32" | "float32" | "s" => Some(Self::F32),
            "f64_r" | "f64" | "float64" | "d" => Some(Self::F64),
            "f32_c" | "c8" | "complex64" | "c" => Some(Self::Complex64),
            "f64_c" | "c16" | "complex128" | "z" => Some(Self::Complex128),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_complex(self) -> bool {
        matches!(self, Self::Complex64 | Self::Complex128)
    }

    /// The real type backing this element type (`real_t<T>`).
    #[must_use]
    pub const fn real(self) -> Self {
        match self {
            Self::F32 | Self::Complex64 => Self::F32,
            Self::F64 | Self::Complex128 => Self::F64,
        }
    }

    /// Relative-error bound for the norm check at this precision.
    #[must_use]
    pub const fn norm_tolerance(self) -> f64 {
        match self.real() {
            Self::F32 => 1.0e-4,
            _ => 1.0e-12,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Plain values that can be copied to and from accelerator memory.
pub trait DeviceCopy: Copy + Default + fmt::Debug + Send + Sync + 'static {}

impl DeviceCopy for f32 {}
impl DeviceCopy for f64 {}
impl DeviceCopy for Complex<f32> {}
impl DeviceCopy for Complex<f64> {}

/// Scalar coefficient types (`alpha`, `beta`).
///
/// Hermitian kernels mix a complex `alpha` with a real `beta`, so scalars are
/// either an element type or its real precision.
pub trait ScalarValue: DeviceCopy + PartialEq {
    /// Build from the `(re, im)` pair carried by a test case; real types drop `im`.
    fn from_case(re: f64, im: f64) -> Self;

    fn is_exact_zero(self) -> bool;
}

impl ScalarValue for f32 {
    fn from_case(re: f64, _im: f64) -> Self {
        re as f32
    }

    fn is_exact_zero(self) -> bool {
        self == 0.0
    }
}

impl ScalarValue for f64 {
    fn from_case(re: f64, _im: f64) -> Self {
        re
    }

    fn is_exact_zero(self) -> bool {
        self == 0.0
    }
}

impl ScalarValue for Complex<f32> {
    fn from_case(re: f64, im: f64) -> Self {
        Complex::new(re as f32, im as f32)
    }

    fn is_exact_zero(self) -> bool {
        self.re == 0.0 && self.im == 0.0
    }
}

impl ScalarValue for Complex<f64> {
    fn from_case(re: f64, im: f64) -> Self {
        Complex::new(re, im)
    }

    fn is_exact_zero(self) -> bool {
        self.re == 0.0 && self.im == 0.0
    }
}

/// Real scalar precision (`f32` or `f64`).
pub trait RealElement:
    ScalarValue
    + PartialOrd
    + fmt::Display
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Neg<Output = Self>
{
    const DTYPE: DType;
    const ZERO: Self;
    const ONE: Self;
    const EPSILON: Self;

    fn from_f64(value: f64) -> Self;
    fn to_f64(self) -> f64;
    fn nan() -> Self;
    fn is_nan(self) -> bool;

    /// Distance in units in the last place, `None` when exactly one side is NaN.
    ///
    /// Two NaNs are at distance zero; `+0.0` and `-0.0` are at distance zero.
    fn ulp_distance(self, other: Self) -> Option<u64>;

    /// Step `steps` representable values away from zero.
    fn nudge(self, steps: u32) -> Self;
}

fn ordered_key_f32(value: f32) -> i64 {
    let bits = value.to_bits() as i32;
    if bits < 0 {
        i64::from(i32::MIN) - i64::from(bits)
    } else {
        i64::from(bits)
    }
}

fn ordered_key_f64(value: f64) -> i128 {
    let bits = value.to_bits() as i64;
    if bits < 0 {
        i128::from(i64::MIN) - i128::from(bits)
    } else {
        i128::from(bits)
    }
}

impl RealElement for f32 {
    const DTYPE: DType = DType::F32;
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;
    const EPSILON: Self = f32::EPSILON;

    fn from_f64(value: f64) -> Self {
        value as f32
    }

    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    fn nan() -> Self {
        f32::NAN
    }

    fn is_nan(self) -> bool {
        f32::is_nan(self)
    }

    fn ulp_distance(self, other: Self) -> Option<u64> {
        match (self.is_nan(), other.is_nan()) {
            (true, true) => Some(0),
            (true, false) | (false, true) => None,
            (false, false) => Some(ordered_key_f32(self).abs_diff(ordered_key_f32(other))),
        }
    }

    fn nudge(self, steps: u32) -> Self {
        if self.is_nan() || self.is_infinite() {
            return self;
        }
        let bits = self.to_bits();
        f32::from_bits(bits.wrapping_add(steps))
    }
}

impl RealElement for f64 {
    const DTYPE: DType = DType::F64;
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;
    const EPSILON: Self = f64::EPSILON;

    fn from_f64(value: f64) -> Self {
        value
    }

    fn to_f64(self) -> f64 {
        self
    }

    fn nan() -> Self {
        f64::NAN
    }

    fn is_nan(self) -> bool {
        f64::is_nan(self)
    }

    fn ulp_distance(self, other: Self) -> Option<u64> {
        match (self.is_nan(), other.is_nan()) {
            (true, true) => Some(0),
            (true, false) | (false, true) => None,
            (false, false) => {
                let diff = ordered_key_f64(self).abs_diff(ordered_key_f64(other));
                Some(u64::try_from(diff).unwrap_or(u64::MAX))
            }
        }
    }

    fn nudge(self, steps: u32) -> Self {
        if self.is_nan() || self.is_infinite() {
            return self;
        }
        let bits = self.to_bits();
        f64::from_bits(bits.wrapping_add(u64::from(steps)))
    }
}

/// Matrix/vector element: a real precision or a complex number over one.
pub trait Element:
    ScalarValue
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
{
    type Real: RealElement;
    const DTYPE: DType;

    fn zero() -> Self;
    fn from_parts(re: Self::Real, im: Self::Real) -> Self;
    fn re(self) -> Self::Real;
    fn im(self) -> Self::Real;
    fn conj(self) -> Self;
    fn scale(self, factor: Self::Real) -> Self;

    fn from_real(re: Self::Real) -> Self {
        Self::from_parts(re, Self::Real::ZERO)
    }

    fn nan() -> Self {
        Self::from_parts(Self::Real::nan(), Self::Real::nan())
    }

    fn is_nan(self) -> bool {
        self.re().is_nan() || self.im().is_nan()
    }

    fn is_zero(self) -> bool {
        self.re() == Self::Real::ZERO && self.im() == Self::Real::ZERO
    }

    /// Drop the imaginary part (the Hermitian diagonal rule).
    fn real_part(self) -> Self {
        Self::from_real(self.re())
    }

    /// Worst per-component ULP distance, `None` when a component pairs NaN with a number.
    fn max_component_ulp(self, other: Self) -> Option<u64> {
        let re = self.re().ulp_distance(other.re())?;
        let im = self.im().ulp_distance(other.im())?;
        Some(re.max(im))
    }
}

/// Marker for the element types Hermitian kernels are defined over.
pub trait ComplexElement: Element {}

impl Element for f32 {
    type Real = f32;
    const DTYPE: DType = DType::F32;

    fn zero() -> Self {
        0.0
    }

    fn from_parts(re: f32, _im: f32) -> Self {
        re
    }

    fn re(self) -> f32 {
        self
    }

    fn im(self) -> f32 {
        0.0
    }

    fn conj(self) -> Self {
        self
    }

    fn scale(self, factor: f32) -> Self {
        self * factor
    }
}

impl Element for f64 {
    type Real = f64;
    const DTYPE: DType = DType::F64;

    fn zero() -> Self {
        0.0
    }

    fn from_parts(re: f64, _im: f64) -> Self {
        re
    }

    fn re(self) -> f64 {
        self
    }

    fn im(self) -> f64 {
        0.0
    }

    fn conj(self) -> Self {
        self
    }

    fn scale(self, factor: f64) -> Self {
        self * factor
    }
}

impl Element for Complex<f32> {
    type Real = f32;
    const DTYPE: DType = DType::Complex64;

    fn zero() -> Self {
        Complex::new(0.0, 0.0)
    }

    fn from_parts(re: f32, im: f32) -> Self {
        Complex::new(re, im)
    }

    fn re(self) -> f32 {
        self.re
    }

    fn im(self) -> f32 {
        self.im
    }

    fn conj(self) -> Self {
        Complex::conj(&self)
    }

    fn scale(self, factor: f32) -> Self {
        Complex::new(self.re * factor, self.im * factor)
    }
}

impl Element for Complex<f64> {
    type Real = f64;
    const DTYPE: DType = DType::Complex128;

    fn zero() -> Self {
        Complex::new(0.0, 0.0)
    }

    fn from_parts(re: f64, im: f64) -> Self {
        Complex::new(re, im)
    }

    fn re(self) -> f64 {
        self.re
    }

    fn im(self) -> f64 {
        self.im
    }

    fn conj(self) -> Self {
        Complex::conj(&self)
    }

    fn scale(self, factor: f64) -> Self {
        Complex::new(self.re * factor, self.im * factor)
    }
}

impl ComplexElement for Complex<f32> {}
impl ComplexElement for Complex<f64> {}

#[cfg(test)]
mod tests {
    use super::{ComplexElement, DType, Element, RealElement, ScalarValue, UNIT_CHECK_MAX_ULP};
    use num_complex::Complex;

    #[test]
    fn dtype_tokens_parse_to_expected_variants() {
        assert_eq!(DType::parse("f32_c"), Some(DType::Complex64));
        assert_eq!(DType::parse("z"), Some(DType::Complex128));
        assert_eq!(DType::parse("f64_r"), Some(DType::F64));
        assert_eq!(DType::parse("bf16_r"), None);
        assert_eq!(DType::Complex64.item_size(), 8);
        assert_eq!(DType::Complex128.real(), DType::F64);
    }

    #[test]
    fn norm_tolerance_is_looser_for_single_precision() {
        assert!(DType::Complex64.norm_tolerance() > DType::Complex128.norm_tolerance());
        assert_eq!(DType::F32.norm_tolerance(), DType::Complex64.norm_tolerance());
    }

    #[test]
    fn ulp_distance_counts_representable_steps() {
        let one = 1.0_f32;
        assert_eq!(one.ulp_distance(one), Some(0));
        assert_eq!(one.ulp_distance(one.nudge(3)), Some(3));
        assert_eq!(0.0_f32.ulp_distance(-0.0), Some(0));
        assert_eq!((1.0_f64).ulp_distance(1.0_f64.nudge(UNIT_CHECK_MAX_ULP as u32)), Some(4));
    }

    #[test]
    fn ulp_distance_treats_nan_pairs_as_equal() {
        assert_eq!(f64::NAN.ulp_distance(f64::NAN), Some(0));
        assert_eq!(f64::NAN.ulp_distance(1.0), None);
        assert_eq!(2.0_f32.ulp_distance(f32::NAN), None);
    }

    #[test]
    fn ulp_distance_spans_zero() {
        let tiny = f32::from_bits(1);
        assert_eq!(tiny.ulp_distance(-tiny), Some(2));
    }

    #[test]
    fn complex_elements_take_worst_component() {
        let a = Complex::new(1.0_f64, 2.0);
        let b = Complex::new(1.0_f64.nudge(1), 2.0_f64.nudge(5));
        assert_eq!(a.max_component_ulp(b), Some(5));
        assert_eq!(a.max_component_ulp(Complex::new(f64::NAN, 2.0)), None);
    }

    #[test]
    fn hermitian_diagonal_rule_drops_imaginary_part() {
        let z = Complex::new(3.0_f32, -7.0);
        assert_eq!(z.real_part(), Complex::new(3.0, 0.0));
        assert_eq!(z.conj(), Complex::new(3.0, 7.0));
        assert_eq!(z.scale(2.0), Complex::new(6.0, -14.0));
    }

    #[test]
    fn scalar_values_build_from_case_pairs() {
        let real: f32 = ScalarValue::from_case(2.0, 5.0);
        assert_eq!(real, 2.0);
        let complex: Complex<f64> = ScalarValue::from_case(2.0, -1.0);
        assert_eq!(complex, Complex::new(2.0, -1.0));
        assert!(0.0_f64.is_exact_zero());
        assert!(!Complex::new(0.0_f32, 1.0).is_exact_zero());
    }

    #[test]
    fn complex_types_are_hermitian_capable() {
        fn real_dtype<T: ComplexElement>() -> DType {
            <T::Real as RealElement>::DTYPE
        }
        assert_eq!(real_dtype::<Complex<f32>>(), DType::F32);
        assert_eq!(real_dtype::<Complex<f64>>(), DType::F64);
        assert!(<Complex<f64> as Element>::nan().is_nan());
    }
}
