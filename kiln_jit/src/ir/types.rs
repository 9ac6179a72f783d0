//! Primitive result types of IR instructions.
//!
//! The set mirrors the value kinds of the bytecode: sub-int integral kinds
//! only appear as array element types and conversion results, while
//! arithmetic happens at `Int32`/`Int64` width.

use std::fmt;

/// Result type of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Bool,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Int64,
    Float32,
    Float64,
    Reference,
    Void,
}

impl DataType {
    /// One-letter tag used by the IR dumps.
    pub const fn short_name(self) -> char {
        match self {
            DataType::Bool => 'z',
            DataType::Int8 => 'b',
            DataType::Uint8 => 'a',
            DataType::Int16 => 's',
            DataType::Uint16 => 'c',
            DataType::Int32 => 'i',
            DataType::Int64 => 'j',
            DataType::Float32 => 'f',
            DataType::Float64 => 'd',
            DataType::Reference => 'l',
            DataType::Void => 'v',
        }
    }

    /// Size in bytes of a value of this type.
    pub const fn size(self) -> u32 {
        match self {
            DataType::Bool | DataType::Int8 | DataType::Uint8 => 1,
            DataType::Int16 | DataType::Uint16 => 2,
            DataType::Int32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::Float64 => 8,
            DataType::Reference => 4,
            DataType::Void => 0,
        }
    }

    #[inline]
    pub const fn is_integral(self) -> bool {
        matches!(
            self,
            DataType::Bool
                | DataType::Int8
                | DataType::Uint8
                | DataType::Int16
                | DataType::Uint16
                | DataType::Int32
                | DataType::Int64
        )
    }

    #[inline]
    pub const fn is_floating_point(self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    #[inline]
    pub const fn is_int_or_long(self) -> bool {
        matches!(self, DataType::Int32 | DataType::Int64)
    }

    #[inline]
    pub const fn is_unsigned(self) -> bool {
        matches!(self, DataType::Bool | DataType::Uint8 | DataType::Uint16)
    }

    #[inline]
    pub const fn is_64_bit(self) -> bool {
        matches!(self, DataType::Int64 | DataType::Float64)
    }

    /// Width in bits used for shift masking and rotates.
    #[inline]
    pub const fn bit_width(self) -> u32 {
        if self.is_64_bit() {
            64
        } else {
            32
        }
    }

    /// Type that values of this type take on the operand stack.
    pub const fn kind(self) -> DataType {
        match self {
            DataType::Bool
            | DataType::Int8
            | DataType::Uint8
            | DataType::Int16
            | DataType::Uint16
            | DataType::Int32 => DataType::Int32,
            other => other,
        }
    }

    /// Whether two types agree once widened to their stack kind.
    #[inline]
    pub fn same_kind(self, other: DataType) -> bool {
        self.kind() == other.kind()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Bool => "bool",
            DataType::Int8 => "int8",
            DataType::Uint8 => "uint8",
            DataType::Int16 => "int16",
            DataType::Uint16 => "uint16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::Reference => "reference",
            DataType::Void => "void",
        };
        f.write_str(name)
    }
}
