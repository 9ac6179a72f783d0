//! Arithmetic, conversion and comparison bytecodes.

use super::{BuildResult, GraphBuilder};
use crate::ir::operators::{BinaryOp, ComparisonBias, Operator, UnaryOp};
use crate::ir::types::DataType;

use super::guards::GuardBuilder;

/// Builder trait for value-producing arithmetic.
pub trait ArithmeticBuilder {
    /// Pop two operands of kind `ty` (the distance of a shift is an int) and
    /// push their combination. Integral division and remainder guard the
    /// divisor with a `DivZeroCheck`.
    fn binary(&mut self, ty: DataType, op: BinaryOp) -> BuildResult<()>;

    fn negate(&mut self, ty: DataType) -> BuildResult<()>;

    fn convert(&mut self, from: DataType, to: DataType) -> BuildResult<()>;

    /// Three-way comparison, `bias` deciding the NaN result.
    fn compare(&mut self, ty: DataType, bias: ComparisonBias) -> BuildResult<()>;

    /// `iinc`: add a constant to an int local.
    fn increment(&mut self, slot: u16, delta: i32) -> BuildResult<()>;
}

impl ArithmeticBuilder for GraphBuilder<'_> {
    fn binary(&mut self, ty: DataType, op: BinaryOp) -> BuildResult<()> {
        let rhs_kind = if op.is_shift() { DataType::Int32 } else { ty };
        let mut rhs = self.pop_kind(rhs_kind)?;
        let lhs = self.pop_kind(ty)?;
        if ty.is_integral() && matches!(op, BinaryOp::Div | BinaryOp::Rem) {
            rhs = self.div_zero_check(rhs);
        }
        let result = self.emit(Operator::Binary(op), ty, &[lhs, rhs]);
        self.push(result);
        Ok(())
    }

    fn negate(&mut self, ty: DataType) -> BuildResult<()> {
        let value = self.pop_kind(ty)?;
        let result = self.emit(Operator::Unary(UnaryOp::Neg), ty, &[value]);
        self.push(result);
        Ok(())
    }

    fn convert(&mut self, from: DataType, to: DataType) -> BuildResult<()> {
        let value = self.pop_kind(from)?;
        let result = self.emit(Operator::TypeConversion, to, &[value]);
        self.push(result);
        Ok(())
    }

    fn compare(&mut self, ty: DataType, bias: ComparisonBias) -> BuildResult<()> {
        let rhs = self.pop_kind(ty)?;
        let lhs = self.pop_kind(ty)?;
        let result = self.emit(Operator::Compare(bias), DataType::Int32, &[lhs, rhs]);
        self.push(result);
        Ok(())
    }

    fn increment(&mut self, slot: u16, delta: i32) -> BuildResult<()> {
        let value = self.local(slot, DataType::Int32)?;
        let constant = self.graph.int_constant(delta);
        let result = self.emit(
            Operator::Binary(BinaryOp::Add),
            DataType::Int32,
            &[value, constant],
        );
        self.set_local(slot, result)
    }
}
