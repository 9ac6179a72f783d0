//! Array bytecodes.

use super::guards::GuardBuilder;
use super::{BuildResult, GraphBuilder};
use crate::ir::instruction::InstId;
use crate::ir::operators::Operator;
use crate::ir::types::DataType;

/// Builder trait for primitive array operations.
pub trait ArrayBuilder {
    fn new_array(&mut self, elem: DataType) -> BuildResult<()>;
    fn array_length(&mut self) -> BuildResult<()>;
    fn array_load(&mut self, elem: DataType) -> BuildResult<()>;
    fn array_store(&mut self, elem: DataType) -> BuildResult<()>;
}

impl GraphBuilder<'_> {
    /// `NullCheck(array)`, `ArrayLength`, `BoundsCheck(index, length)`.
    fn checked_element(&mut self, array: InstId, index: InstId) -> (InstId, InstId) {
        let object = self.null_check(array);
        let length = self.emit(Operator::ArrayLength, DataType::Int32, &[object]);
        let checked = self.bounds_check(index, length);
        (object, checked)
    }
}

impl ArrayBuilder for GraphBuilder<'_> {
    fn new_array(&mut self, _elem: DataType) -> BuildResult<()> {
        let length = self.pop_kind(DataType::Int32)?;
        let array = self.emit_with_env(Operator::NewArray, DataType::Reference, &[length]);
        self.push(array);
        Ok(())
    }

    fn array_length(&mut self) -> BuildResult<()> {
        let array = self.pop_kind(DataType::Reference)?;
        let object = self.null_check(array);
        let length = self.emit(Operator::ArrayLength, DataType::Int32, &[object]);
        self.push(length);
        Ok(())
    }

    fn array_load(&mut self, elem: DataType) -> BuildResult<()> {
        let index = self.pop_kind(DataType::Int32)?;
        let array = self.pop_kind(DataType::Reference)?;
        let (object, checked) = self.checked_element(array, index);
        let value = self.emit(Operator::ArrayGet, elem, &[object, checked]);
        self.push(value);
        Ok(())
    }

    fn array_store(&mut self, elem: DataType) -> BuildResult<()> {
        let value = self.pop_kind(elem)?;
        let index = self.pop_kind(DataType::Int32)?;
        let array = self.pop_kind(DataType::Reference)?;
        let (object, checked) = self.checked_element(array, index);
        self.emit(Operator::ArraySet, DataType::Void, &[object, checked, value]);
        Ok(())
    }
}
