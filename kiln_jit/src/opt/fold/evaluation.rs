//! Compile-time evaluation of operations on constants.
//!
//! Integer arithmetic wraps at the operand width and masks shift distances;
//! floating-point arithmetic is IEEE-754 with `%` as fmod. Division by zero
//! is never evaluated. The interpreter shares these routines so that folded
//! and executed code agree bit for bit.

use std::cmp::Ordering;
use std::ops::{Add, Div, Mul, Rem, Sub};

use crate::ir::graph::Graph;
use crate::ir::instruction::InstId;
use crate::ir::operators::{BinaryOp, ComparisonBias, CondKind, Operator, UnaryOp};
use crate::ir::types::DataType;

// =============================================================================
// Constant Values
// =============================================================================

/// The value of a constant instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Null,
}

impl ConstValue {
    /// Value of a constant operator.
    pub fn of(op: &Operator) -> Option<Self> {
        match *op {
            Operator::IntConstant(v) => Some(ConstValue::Int(v)),
            Operator::LongConstant(v) => Some(ConstValue::Long(v)),
            Operator::FloatConstant(bits) => Some(ConstValue::Float(f32::from_bits(bits))),
            Operator::DoubleConstant(bits) => Some(ConstValue::Double(f64::from_bits(bits))),
            Operator::NullConstant => Some(ConstValue::Null),
            _ => None,
        }
    }

    /// Value of instruction `id` if it is a constant.
    #[inline]
    pub fn of_inst(graph: &Graph, id: InstId) -> Option<Self> {
        Self::of(graph.op(id))
    }

    /// The cached constant instruction holding this value.
    pub fn materialize(self, graph: &mut Graph) -> InstId {
        match self {
            ConstValue::Int(v) => graph.int_constant(v),
            ConstValue::Long(v) => graph.long_constant(v),
            ConstValue::Float(v) => graph.float_constant(v),
            ConstValue::Double(v) => graph.double_constant(v),
            ConstValue::Null => graph.null_constant(),
        }
    }

    /// Integral payload, sign-extended.
    #[inline]
    pub fn as_i64(self) -> Option<i64> {
        match self {
            ConstValue::Int(v) => Some(v as i64),
            ConstValue::Long(v) => Some(v),
            _ => None,
        }
    }

    fn as_f64(self) -> Option<f64> {
        match self {
            ConstValue::Float(v) => Some(v as f64),
            ConstValue::Double(v) => Some(v),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConstValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConstValue::Int(v) => write!(f, "{}", v),
            ConstValue::Long(v) => write!(f, "{}", v),
            ConstValue::Float(v) => write!(f, "{:?}", v),
            ConstValue::Double(v) => write!(f, "{:?}", v),
            ConstValue::Null => f.write_str("null"),
        }
    }
}

// =============================================================================
// Arithmetic
// =============================================================================

/// Evaluate a binary operation. `None` when the operands do not fit the
/// operator or the result is undefined (division by zero).
pub fn eval_binary(op: BinaryOp, lhs: ConstValue, rhs: ConstValue) -> Option<ConstValue> {
    match (lhs, rhs) {
        (ConstValue::Int(a), ConstValue::Int(b)) => eval_int(op, a, b).map(ConstValue::Int),
        (ConstValue::Long(a), ConstValue::Int(b)) if op.is_shift() => {
            eval_long(op, a, b as i64).map(ConstValue::Long)
        }
        (ConstValue::Long(a), ConstValue::Long(b)) if !op.is_shift() => {
            eval_long(op, a, b).map(ConstValue::Long)
        }
        (ConstValue::Float(a), ConstValue::Float(b)) => eval_float(op, a, b).map(ConstValue::Float),
        (ConstValue::Double(a), ConstValue::Double(b)) => {
            eval_float(op, a, b).map(ConstValue::Double)
        }
        _ => None,
    }
}

fn eval_int(op: BinaryOp, a: i32, b: i32) -> Option<i32> {
    let distance = b as u32;
    Some(match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div if b == 0 => return None,
        BinaryOp::Div => a.wrapping_div(b),
        BinaryOp::Rem if b == 0 => return None,
        BinaryOp::Rem => a.wrapping_rem(b),
        BinaryOp::Shl => a.wrapping_shl(distance),
        BinaryOp::Shr => a.wrapping_shr(distance),
        BinaryOp::UShr => (a as u32).wrapping_shr(distance) as i32,
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
        BinaryOp::Ror => a.rotate_right(distance & 31),
    })
}

fn eval_long(op: BinaryOp, a: i64, b: i64) -> Option<i64> {
    let distance = b as u32;
    Some(match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div if b == 0 => return None,
        BinaryOp::Div => a.wrapping_div(b),
        BinaryOp::Rem if b == 0 => return None,
        BinaryOp::Rem => a.wrapping_rem(b),
        BinaryOp::Shl => a.wrapping_shl(distance),
        BinaryOp::Shr => a.wrapping_shr(distance),
        BinaryOp::UShr => (a as u64).wrapping_shr(distance) as i64,
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
        BinaryOp::Ror => a.rotate_right(distance & 63),
    })
}

fn eval_float<T>(op: BinaryOp, a: T, b: T) -> Option<T>
where
    T: Add<Output = T> + Sub<Output = T> + Mul<Output = T> + Div<Output = T> + Rem<Output = T>,
{
    Some(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        _ => return None,
    })
}

/// Evaluate `Neg` or `Not`.
pub fn eval_unary(op: UnaryOp, value: ConstValue) -> Option<ConstValue> {
    match (op, value) {
        (UnaryOp::Neg, ConstValue::Int(v)) => Some(ConstValue::Int(v.wrapping_neg())),
        (UnaryOp::Neg, ConstValue::Long(v)) => Some(ConstValue::Long(v.wrapping_neg())),
        (UnaryOp::Neg, ConstValue::Float(v)) => Some(ConstValue::Float(-v)),
        (UnaryOp::Neg, ConstValue::Double(v)) => Some(ConstValue::Double(-v)),
        (UnaryOp::Not, ConstValue::Int(v)) => Some(ConstValue::Int(!v)),
        (UnaryOp::Not, ConstValue::Long(v)) => Some(ConstValue::Long(!v)),
        _ => None,
    }
}

// =============================================================================
// Comparisons
// =============================================================================

fn ordering(lhs: ConstValue, rhs: ConstValue, unsigned: bool) -> Option<Option<Ordering>> {
    Some(match (lhs, rhs) {
        (ConstValue::Int(a), ConstValue::Int(b)) if unsigned => Some((a as u32).cmp(&(b as u32))),
        (ConstValue::Int(a), ConstValue::Int(b)) => Some(a.cmp(&b)),
        (ConstValue::Long(a), ConstValue::Long(b)) if unsigned => {
            Some((a as u64).cmp(&(b as u64)))
        }
        (ConstValue::Long(a), ConstValue::Long(b)) => Some(a.cmp(&b)),
        (ConstValue::Null, ConstValue::Null) => Some(Ordering::Equal),
        (ConstValue::Float(_), ConstValue::Float(_))
        | (ConstValue::Double(_), ConstValue::Double(_)) => {
            lhs.as_f64()?.partial_cmp(&rhs.as_f64()?)
        }
        _ => return None,
    })
}

/// Three-way comparison; an unordered result yields the bias sentinel.
pub fn eval_compare(bias: ComparisonBias, lhs: ConstValue, rhs: ConstValue) -> Option<i32> {
    Some(match ordering(lhs, rhs, false)? {
        Some(Ordering::Less) => -1,
        Some(Ordering::Equal) => 0,
        Some(Ordering::Greater) => 1,
        None => bias.unordered_result(),
    })
}

/// Evaluate a condition. Unordered floating operands compare as greater
/// under `GtBias` and as less under `LtBias`; without a bias only
/// `NotEqual` holds.
pub fn eval_condition(
    kind: CondKind,
    bias: ComparisonBias,
    lhs: ConstValue,
    rhs: ConstValue,
) -> Option<bool> {
    if matches!(lhs, ConstValue::Null) != matches!(rhs, ConstValue::Null)
        || (matches!(lhs, ConstValue::Null)
            && !matches!(kind, CondKind::Equal | CondKind::NotEqual))
    {
        return None;
    }
    let ord = match ordering(lhs, rhs, kind.is_unsigned())? {
        Some(ord) => ord,
        None => match bias {
            ComparisonBias::GtBias => Ordering::Greater,
            ComparisonBias::LtBias => Ordering::Less,
            ComparisonBias::NoBias => return Some(kind == CondKind::NotEqual),
        },
    };
    Some(kind.holds(ord))
}

// =============================================================================
// Conversions
// =============================================================================

/// Convert a constant to `to`. Narrow integral targets keep the low bits and
/// re-extend; floating-point to integral saturates with NaN mapping to 0.
pub fn eval_conversion(value: ConstValue, to: DataType) -> Option<ConstValue> {
    let integral = value.as_i64();
    Some(match to {
        DataType::Int8 => ConstValue::Int(integral? as i8 as i32),
        DataType::Uint8 => ConstValue::Int(integral? as u8 as i32),
        DataType::Int16 => ConstValue::Int(integral? as i16 as i32),
        DataType::Uint16 => ConstValue::Int(integral? as u16 as i32),
        DataType::Int32 => match value {
            ConstValue::Int(v) => ConstValue::Int(v),
            ConstValue::Long(v) => ConstValue::Int(v as i32),
            ConstValue::Float(v) => ConstValue::Int(v as i32),
            ConstValue::Double(v) => ConstValue::Int(v as i32),
            ConstValue::Null => return None,
        },
        DataType::Int64 => match value {
            ConstValue::Int(v) => ConstValue::Long(v as i64),
            ConstValue::Long(v) => ConstValue::Long(v),
            ConstValue::Float(v) => ConstValue::Long(v as i64),
            ConstValue::Double(v) => ConstValue::Long(v as i64),
            ConstValue::Null => return None,
        },
        DataType::Float32 => match value {
            ConstValue::Int(v) => ConstValue::Float(v as f32),
            ConstValue::Long(v) => ConstValue::Float(v as f32),
            ConstValue::Float(v) => ConstValue::Float(v),
            ConstValue::Double(v) => ConstValue::Float(v as f32),
            ConstValue::Null => return None,
        },
        DataType::Float64 => match value {
            ConstValue::Int(v) => ConstValue::Double(v as f64),
            ConstValue::Long(v) => ConstValue::Double(v as f64),
            ConstValue::Float(v) => ConstValue::Double(v as f64),
            ConstValue::Double(v) => ConstValue::Double(v),
            ConstValue::Null => return None,
        },
        DataType::Bool | DataType::Reference | DataType::Void => return None,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ConstValue::{Double, Float, Int, Long};

    #[test]
    fn test_int_arithmetic_wraps() {
        assert_eq!(eval_binary(BinaryOp::Add, Int(i32::MAX), Int(1)), Some(Int(i32::MIN)));
        assert_eq!(eval_binary(BinaryOp::Sub, Int(i32::MIN), Int(1)), Some(Int(i32::MAX)));
        assert_eq!(eval_binary(BinaryOp::Mul, Int(0x10000), Int(0x10000)), Some(Int(0)));
        assert_eq!(eval_binary(BinaryOp::Mul, Long(i64::MAX), Long(2)), Some(Long(-2)));
    }

    #[test]
    fn test_division_edge_cases() {
        assert_eq!(eval_binary(BinaryOp::Div, Int(i32::MIN), Int(-1)), Some(Int(i32::MIN)));
        assert_eq!(eval_binary(BinaryOp::Rem, Int(i32::MIN), Int(-1)), Some(Int(0)));
        assert_eq!(eval_binary(BinaryOp::Div, Int(-7), Int(2)), Some(Int(-3)));
        assert_eq!(eval_binary(BinaryOp::Rem, Int(-7), Int(2)), Some(Int(-1)));
        assert_eq!(eval_binary(BinaryOp::Div, Int(1), Int(0)), None);
        assert_eq!(eval_binary(BinaryOp::Rem, Long(1), Long(0)), None);
        assert_eq!(eval_binary(BinaryOp::Div, Long(i64::MIN), Long(-1)), Some(Long(i64::MIN)));
    }

    #[test]
    fn test_shift_distance_masked() {
        assert_eq!(eval_binary(BinaryOp::Shl, Int(1), Int(33)), Some(Int(2)));
        assert_eq!(eval_binary(BinaryOp::Shl, Int(1), Int(-1)), Some(Int(i32::MIN)));
        assert_eq!(eval_binary(BinaryOp::Shr, Int(-8), Int(1)), Some(Int(-4)));
        assert_eq!(eval_binary(BinaryOp::UShr, Int(-8), Int(28)), Some(Int(15)));
        assert_eq!(eval_binary(BinaryOp::Shl, Long(1), Int(65)), Some(Long(2)));
        assert_eq!(eval_binary(BinaryOp::UShr, Long(-1), Int(63)), Some(Long(1)));
        // A long distance is not a valid shift operand.
        assert_eq!(eval_binary(BinaryOp::Shl, Long(1), Long(1)), None);
    }

    #[test]
    fn test_rotate() {
        assert_eq!(eval_binary(BinaryOp::Ror, Int(8), Int(2)), Some(Int(2)));
        assert_eq!(eval_binary(BinaryOp::Ror, Int(1), Int(-1)), Some(Int(2)));
        assert_eq!(eval_binary(BinaryOp::Ror, Int(5), Int(32)), Some(Int(5)));
        assert_eq!(eval_binary(BinaryOp::Ror, Long(1), Int(1)), Some(Long(i64::MIN)));
    }

    #[test]
    fn test_float_arithmetic() {
        assert_eq!(eval_binary(BinaryOp::Rem, Double(5.5), Double(2.0)), Some(Double(1.5)));
        assert_eq!(eval_binary(BinaryOp::Div, Float(1.0), Float(0.0)), Some(Float(f32::INFINITY)));
        let nan = eval_binary(BinaryOp::Add, Double(f64::NAN), Double(1.0));
        assert!(matches!(nan, Some(Double(v)) if v.is_nan()));
        let neg_zero = eval_unary(UnaryOp::Neg, Double(0.0));
        assert!(matches!(neg_zero, Some(Double(v)) if v == 0.0 && v.is_sign_negative()));
        assert_eq!(eval_binary(BinaryOp::And, Double(1.0), Double(1.0)), None);
    }

    #[test]
    fn test_unary() {
        assert_eq!(eval_unary(UnaryOp::Neg, Int(i32::MIN)), Some(Int(i32::MIN)));
        assert_eq!(eval_unary(UnaryOp::Not, Long(0)), Some(Long(-1)));
        assert_eq!(eval_unary(UnaryOp::Not, Float(1.0)), None);
    }

    #[test]
    fn test_compare_bias() {
        assert_eq!(eval_compare(ComparisonBias::NoBias, Long(1), Long(2)), Some(-1));
        assert_eq!(eval_compare(ComparisonBias::GtBias, Float(f32::NAN), Float(0.0)), Some(1));
        assert_eq!(eval_compare(ComparisonBias::LtBias, Double(0.0), Double(f64::NAN)), Some(-1));
        assert_eq!(eval_compare(ComparisonBias::GtBias, Double(-0.0), Double(0.0)), Some(0));
    }

    #[test]
    fn test_conditions() {
        let eval = |k, l, r| eval_condition(k, ComparisonBias::NoBias, l, r);
        assert_eq!(eval(CondKind::LessThan, Int(-1), Int(0)), Some(true));
        assert_eq!(eval(CondKind::Below, Int(-1), Int(0)), Some(false));
        assert_eq!(eval(CondKind::AboveOrEqual, Long(-1), Long(5)), Some(true));
        assert_eq!(eval(CondKind::Equal, ConstValue::Null, ConstValue::Null), Some(true));
        assert_eq!(eval(CondKind::LessThan, ConstValue::Null, ConstValue::Null), None);
        assert_eq!(eval(CondKind::NotEqual, Float(f32::NAN), Float(f32::NAN)), Some(true));
        assert_eq!(eval(CondKind::Equal, Float(f32::NAN), Float(f32::NAN)), Some(false));
        let (nan, one) = (Double(f64::NAN), Double(1.0));
        let gt = eval_condition(CondKind::GreaterThan, ComparisonBias::GtBias, nan, one);
        assert_eq!(gt, Some(true));
        let lt = eval_condition(CondKind::GreaterThan, ComparisonBias::LtBias, nan, one);
        assert_eq!(lt, Some(false));
    }

    #[test]
    fn test_narrowing_conversions() {
        assert_eq!(eval_conversion(Int(0x1ff), DataType::Int8), Some(Int(-1)));
        assert_eq!(eval_conversion(Int(-1), DataType::Uint16), Some(Int(0xffff)));
        assert_eq!(eval_conversion(Int(0x18000), DataType::Int16), Some(Int(-32768)));
        assert_eq!(eval_conversion(Int(0x1ff), DataType::Uint8), Some(Int(0xff)));
        assert_eq!(eval_conversion(Long(0x1_0000_0005), DataType::Int32), Some(Int(5)));
        assert_eq!(eval_conversion(Int(-5), DataType::Int64), Some(Long(-5)));
    }

    #[test]
    fn test_float_to_integral_saturates() {
        assert_eq!(eval_conversion(Float(f32::NAN), DataType::Int32), Some(Int(0)));
        assert_eq!(eval_conversion(Double(1e20), DataType::Int32), Some(Int(i32::MAX)));
        assert_eq!(
            eval_conversion(Double(f64::NEG_INFINITY), DataType::Int64),
            Some(Long(i64::MIN))
        );
        assert_eq!(eval_conversion(Float(-2.9), DataType::Int32), Some(Int(-2)));
        assert_eq!(
            eval_conversion(Long(1 << 40), DataType::Float64),
            Some(Double(1099511627776.0))
        );
        assert_eq!(eval_conversion(Double(1.5), DataType::Int8), None);
    }
}
