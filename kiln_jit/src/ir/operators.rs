//! Instruction kinds.
//!
//! Operators are grouped the way passes dispatch on them:
//! - **Constants** and method parameters
//! - **Arithmetic**: binary and unary integer/float operations
//! - **Conditions**: boolean-producing relational tests
//! - **Guards**: null, bounds and division checks that may throw
//! - **Arrays**: allocation, length, element access
//! - **Control**: block terminators
//!
//! Each operator answers the questions the passes ask of it: can it throw,
//! does it have side effects, does it need an environment, can it be removed
//! when unused.

use std::fmt;

// =============================================================================
// Binary Operators
// =============================================================================

/// Two-operand arithmetic and bitwise operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    UShr,
    And,
    Or,
    Xor,
    /// Rotate right. The distance is taken modulo the operand width.
    Ror,
}

impl BinaryOp {
    pub const fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "Add",
            BinaryOp::Sub => "Sub",
            BinaryOp::Mul => "Mul",
            BinaryOp::Div => "Div",
            BinaryOp::Rem => "Rem",
            BinaryOp::Shl => "Shl",
            BinaryOp::Shr => "Shr",
            BinaryOp::UShr => "UShr",
            BinaryOp::And => "And",
            BinaryOp::Or => "Or",
            BinaryOp::Xor => "Xor",
            BinaryOp::Ror => "Ror",
        }
    }

    #[inline]
    pub const fn is_commutative(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Mul | BinaryOp::And | BinaryOp::Or | BinaryOp::Xor
        )
    }

    /// Shifts and rotates: integral left operand, int32 distance.
    #[inline]
    pub const fn is_shift(self) -> bool {
        matches!(
            self,
            BinaryOp::Shl | BinaryOp::Shr | BinaryOp::UShr | BinaryOp::Ror
        )
    }

    #[inline]
    pub const fn is_bitwise(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or | BinaryOp::Xor)
    }
}

/// Single-operand operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    /// Bitwise complement.
    Not,
}

impl UnaryOp {
    pub const fn name(self) -> &'static str {
        match self {
            UnaryOp::Neg => "Neg",
            UnaryOp::Not => "Not",
        }
    }
}

// =============================================================================
// Conditions
// =============================================================================

/// Relational test kinds. `Below`/`Above` compare as unsigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CondKind {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Below,
    BelowOrEqual,
    Above,
    AboveOrEqual,
}

impl CondKind {
    pub const fn name(self) -> &'static str {
        match self {
            CondKind::Equal => "Equal",
            CondKind::NotEqual => "NotEqual",
            CondKind::LessThan => "LessThan",
            CondKind::LessThanOrEqual => "LessThanOrEqual",
            CondKind::GreaterThan => "GreaterThan",
            CondKind::GreaterThanOrEqual => "GreaterThanOrEqual",
            CondKind::Below => "Below",
            CondKind::BelowOrEqual => "BelowOrEqual",
            CondKind::Above => "Above",
            CondKind::AboveOrEqual => "AboveOrEqual",
        }
    }

    /// The condition that holds exactly when `self` does not.
    pub const fn negate(self) -> Self {
        match self {
            CondKind::Equal => CondKind::NotEqual,
            CondKind::NotEqual => CondKind::Equal,
            CondKind::LessThan => CondKind::GreaterThanOrEqual,
            CondKind::LessThanOrEqual => CondKind::GreaterThan,
            CondKind::GreaterThan => CondKind::LessThanOrEqual,
            CondKind::GreaterThanOrEqual => CondKind::LessThan,
            CondKind::Below => CondKind::AboveOrEqual,
            CondKind::BelowOrEqual => CondKind::Above,
            CondKind::Above => CondKind::BelowOrEqual,
            CondKind::AboveOrEqual => CondKind::Below,
        }
    }

    /// The condition that holds for swapped operands.
    pub const fn mirror(self) -> Self {
        match self {
            CondKind::Equal => CondKind::Equal,
            CondKind::NotEqual => CondKind::NotEqual,
            CondKind::LessThan => CondKind::GreaterThan,
            CondKind::LessThanOrEqual => CondKind::GreaterThanOrEqual,
            CondKind::GreaterThan => CondKind::LessThan,
            CondKind::GreaterThanOrEqual => CondKind::LessThanOrEqual,
            CondKind::Below => CondKind::Above,
            CondKind::BelowOrEqual => CondKind::AboveOrEqual,
            CondKind::Above => CondKind::Below,
            CondKind::AboveOrEqual => CondKind::BelowOrEqual,
        }
    }

    #[inline]
    pub const fn is_unsigned(self) -> bool {
        matches!(
            self,
            CondKind::Below | CondKind::BelowOrEqual | CondKind::Above | CondKind::AboveOrEqual
        )
    }

    /// Evaluate against the sign of a three-way comparison result.
    pub const fn holds(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CondKind::Equal => matches!(ordering, Equal),
            CondKind::NotEqual => !matches!(ordering, Equal),
            CondKind::LessThan | CondKind::Below => matches!(ordering, Less),
            CondKind::LessThanOrEqual | CondKind::BelowOrEqual => !matches!(ordering, Greater),
            CondKind::GreaterThan | CondKind::Above => matches!(ordering, Greater),
            CondKind::GreaterThanOrEqual | CondKind::AboveOrEqual => !matches!(ordering, Less),
        }
    }
}

/// How a floating-point comparison treats unordered (NaN) operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ComparisonBias {
    #[default]
    NoBias,
    /// NaN compares as greater (`fcmpg`).
    GtBias,
    /// NaN compares as less (`fcmpl`).
    LtBias,
}

impl ComparisonBias {
    /// Three-way result an unordered comparison produces.
    pub const fn unordered_result(self) -> i32 {
        match self {
            ComparisonBias::GtBias => 1,
            ComparisonBias::LtBias | ComparisonBias::NoBias => -1,
        }
    }
}

// =============================================================================
// Guards and Deoptimization
// =============================================================================

/// Why a `Deoptimize` guard was inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeoptimizationKind {
    /// Dominator-based range guard for a group of checks in straight-line code.
    BlockBCE,
    /// Range guard hoisted into a loop preheader.
    LoopBoundsBCE,
    /// Null guard hoisted into a loop preheader.
    LoopNullBCE,
}

impl DeoptimizationKind {
    pub const fn name(self) -> &'static str {
        match self {
            DeoptimizationKind::BlockBCE => "BlockBCE",
            DeoptimizationKind::LoopBoundsBCE => "LoopBoundsBCE",
            DeoptimizationKind::LoopNullBCE => "LoopNullBCE",
        }
    }
}

// =============================================================================
// Shifter Operands
// =============================================================================

/// Operand modifier folded into a data-processing instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShifterOpKind {
    Lsl,
    Lsr,
    Asr,
    Uxtb,
    Uxth,
    Uxtw,
    Sxtb,
    Sxth,
    Sxtw,
}

impl ShifterOpKind {
    pub const fn name(self) -> &'static str {
        match self {
            ShifterOpKind::Lsl => "LSL",
            ShifterOpKind::Lsr => "LSR",
            ShifterOpKind::Asr => "ASR",
            ShifterOpKind::Uxtb => "UXTB",
            ShifterOpKind::Uxth => "UXTH",
            ShifterOpKind::Uxtw => "UXTW",
            ShifterOpKind::Sxtb => "SXTB",
            ShifterOpKind::Sxth => "SXTH",
            ShifterOpKind::Sxtw => "SXTW",
        }
    }

    #[inline]
    pub const fn is_shift(self) -> bool {
        matches!(
            self,
            ShifterOpKind::Lsl | ShifterOpKind::Lsr | ShifterOpKind::Asr
        )
    }

    #[inline]
    pub const fn is_extension(self) -> bool {
        !self.is_shift()
    }
}

/// Operation performed by a `DataProcWithShifterOp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataProcKind {
    Add,
    Sub,
    And,
    Or,
    Xor,
    /// `0 - operand`; the zero is the left input.
    Neg,
}

impl DataProcKind {
    pub const fn name(self) -> &'static str {
        match self {
            DataProcKind::Add => "Add",
            DataProcKind::Sub => "Sub",
            DataProcKind::And => "And",
            DataProcKind::Or => "Or",
            DataProcKind::Xor => "Xor",
            DataProcKind::Neg => "Neg",
        }
    }
}

/// Attributes of a fused data-processing instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShifterOperation {
    pub kind: DataProcKind,
    pub op_kind: ShifterOpKind,
    /// Shift amount, already masked to the operand width. Zero for extensions.
    pub shift: u32,
}

// =============================================================================
// Invokes
// =============================================================================

/// Library methods the compiler understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    IntegerRotateRight,
    IntegerRotateLeft,
    LongRotateRight,
    LongRotateLeft,
}

impl Intrinsic {
    /// Recognize an intrinsic by its qualified name.
    pub fn lookup(class: &str, method: &str) -> Option<Self> {
        match (class, method) {
            ("Integer", "rotateRight") => Some(Intrinsic::IntegerRotateRight),
            ("Integer", "rotateLeft") => Some(Intrinsic::IntegerRotateLeft),
            ("Long", "rotateRight") => Some(Intrinsic::LongRotateRight),
            ("Long", "rotateLeft") => Some(Intrinsic::LongRotateLeft),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Intrinsic::IntegerRotateRight => "IntegerRotateRight",
            Intrinsic::IntegerRotateLeft => "IntegerRotateLeft",
            Intrinsic::LongRotateRight => "LongRotateRight",
            Intrinsic::LongRotateLeft => "LongRotateLeft",
        }
    }
}

/// Call target of an `InvokeStaticOrDirect`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvokeTarget {
    pub class: String,
    pub method: String,
    pub intrinsic: Option<Intrinsic>,
}

impl InvokeTarget {
    pub fn new(class: impl Into<String>, method: impl Into<String>) -> Self {
        let class = class.into();
        let method = method.into();
        let intrinsic = Intrinsic::lookup(&class, &method);
        Self {
            class,
            method,
            intrinsic,
        }
    }
}

// =============================================================================
// Operator
// =============================================================================

/// What an instruction computes.
#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    IntConstant(i32),
    LongConstant(i64),
    /// IEEE bits, so that `-0.0` and NaN payloads are kept distinct.
    FloatConstant(u32),
    DoubleConstant(u64),
    NullConstant,
    ParameterValue(u16),

    Binary(BinaryOp),
    Unary(UnaryOp),
    Condition(CondKind, ComparisonBias),
    /// Three-way comparison producing -1, 0 or 1.
    Compare(ComparisonBias),
    TypeConversion,
    Phi,

    NullCheck,
    ArrayLength,
    /// Inputs: index, length. Produces the index.
    BoundsCheck,
    DivZeroCheck,
    ArrayGet,
    ArraySet,
    NewArray,

    InvokeStaticOrDirect(Box<InvokeTarget>),
    SuspendCheck,
    /// Leaves compiled code when its condition input is true.
    Deoptimize(DeoptimizationKind),
    DataProcWithShifterOp(ShifterOperation),

    Goto,
    If,
    Return,
    ReturnVoid,
    Exit,
}

impl Operator {
    /// Name shown in IR dumps.
    pub fn name(&self) -> &'static str {
        match self {
            Operator::IntConstant(_) => "IntConstant",
            Operator::LongConstant(_) => "LongConstant",
            Operator::FloatConstant(_) => "FloatConstant",
            Operator::DoubleConstant(_) => "DoubleConstant",
            Operator::NullConstant => "NullConstant",
            Operator::ParameterValue(_) => "ParameterValue",
            Operator::Binary(op) => op.name(),
            Operator::Unary(op) => op.name(),
            Operator::Condition(kind, _) => kind.name(),
            Operator::Compare(_) => "Compare",
            Operator::TypeConversion => "TypeConversion",
            Operator::Phi => "Phi",
            Operator::NullCheck => "NullCheck",
            Operator::ArrayLength => "ArrayLength",
            Operator::BoundsCheck => "BoundsCheck",
            Operator::DivZeroCheck => "DivZeroCheck",
            Operator::ArrayGet => "ArrayGet",
            Operator::ArraySet => "ArraySet",
            Operator::NewArray => "NewArray",
            Operator::InvokeStaticOrDirect(_) => "InvokeStaticOrDirect",
            Operator::SuspendCheck => "SuspendCheck",
            Operator::Deoptimize(_) => "Deoptimize",
            Operator::DataProcWithShifterOp(_) => "DataProcWithShifterOp",
            Operator::Goto => "Goto",
            Operator::If => "If",
            Operator::Return => "Return",
            Operator::ReturnVoid => "ReturnVoid",
            Operator::Exit => "Exit",
        }
    }

    #[inline]
    pub const fn is_constant(&self) -> bool {
        matches!(
            self,
            Operator::IntConstant(_)
                | Operator::LongConstant(_)
                | Operator::FloatConstant(_)
                | Operator::DoubleConstant(_)
                | Operator::NullConstant
        )
    }

    /// Block terminators.
    #[inline]
    pub const fn is_control_flow(&self) -> bool {
        matches!(
            self,
            Operator::Goto | Operator::If | Operator::Return | Operator::ReturnVoid | Operator::Exit
        )
    }

    #[inline]
    pub const fn is_binary(&self) -> bool {
        matches!(self, Operator::Binary(_))
    }

    #[inline]
    pub const fn is_condition(&self) -> bool {
        matches!(self, Operator::Condition(..))
    }

    /// Whether executing this instruction may raise an exception or bail out.
    pub const fn can_throw(&self) -> bool {
        matches!(
            self,
            Operator::NullCheck
                | Operator::BoundsCheck
                | Operator::DivZeroCheck
                | Operator::NewArray
                | Operator::InvokeStaticOrDirect(_)
                | Operator::Deoptimize(_)
        )
    }

    /// Writes memory, allocates, calls, or otherwise observes program state.
    pub const fn has_side_effects(&self) -> bool {
        matches!(
            self,
            Operator::ArraySet
                | Operator::NewArray
                | Operator::InvokeStaticOrDirect(_)
                | Operator::SuspendCheck
                | Operator::Deoptimize(_)
        )
    }

    /// Reads memory that a side-effecting instruction could change.
    pub const fn reads_memory(&self) -> bool {
        matches!(self, Operator::ArrayGet)
    }

    /// Instructions that carry an environment for resuming in the interpreter.
    pub const fn needs_environment(&self) -> bool {
        matches!(
            self,
            Operator::NullCheck
                | Operator::BoundsCheck
                | Operator::DivZeroCheck
                | Operator::NewArray
                | Operator::InvokeStaticOrDirect(_)
                | Operator::SuspendCheck
                | Operator::Deoptimize(_)
        )
    }

    /// Safe to delete once nothing uses the value.
    pub const fn is_removable_when_unused(&self) -> bool {
        !self.has_side_effects()
            && !self.can_throw()
            && !self.is_control_flow()
            && !matches!(self, Operator::ParameterValue(_))
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Tests
// =============================================================================
