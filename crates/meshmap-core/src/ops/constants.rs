use std::{fmt::Display, sync::Arc};

use ndarray::{ArrayD, IxDyn};

use crate::{
    assert_input_count_matches,
    errors::Error,
    programs::Op,
    tracer::{Tracer, apply_unary, is_tracing, lookup_axis},
    types::{AbstractValue, DataType, NamedShape},
    values::NamedArray,
};

// ======================================================= FULL =======================================================

/// Value filled with a constant, optionally varying over named axes.
#[derive(Clone, Debug, PartialEq)]
pub struct FullOp {
    value: f64,
    tpe: AbstractValue,
}

impl Display for FullOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "full[{}, {}]", self.value, self.tpe)
    }
}

impl Op for FullOp {
    fn infer_output_types(&self, input_types: &[&AbstractValue]) -> Result<Vec<AbstractValue>, Error> {
        assert_input_count_matches!(input_types.len(), 0);
        Ok(vec![self.tpe.clone()])
    }

    fn interpret(&self, inputs: &[&NamedArray]) -> Result<Vec<NamedArray>, Error> {
        assert_input_count_matches!(inputs.len(), 0);
        let named_shape = self.tpe.named_shape.axes();
        let names = named_shape.iter().map(|(name, _)| name.clone()).collect::<Vec<_>>();
        let shape = named_shape.iter().map(|(_, size)| *size).chain(self.tpe.shape.iter().copied()).collect::<Vec<_>>();
        Ok(vec![NamedArray::new(names, ArrayD::from_elem(IxDyn(&shape), self.value))?])
    }
}

/// Creates a value of `shape` filled with `value` that varies over the named axes in `named_shape`.
///
/// Every named axis must be bound by an enclosing mapped function, with the size given in `named_shape`.
pub fn full(value: f64, data_type: DataType, shape: &[usize], named_shape: &NamedShape) -> Result<Tracer, Error> {
    if !is_tracing() {
        return Err(Error::NoActiveTrace { op: "full".to_string() });
    }
    for (axis, declared) in named_shape.axes() {
        let binding = lookup_axis(axis)?;
        if binding.size != *declared {
            return Err(Error::NamedShapeMismatch { axis: axis.clone(), declared: *declared, actual: binding.size });
        }
    }
    let tpe = AbstractValue::new(data_type, shape.to_vec(), named_shape.clone());
    apply_unary(Arc::new(FullOp { value, tpe }), &[], "full")
}

/// Creates a value of `shape` filled with zeros.
pub fn zeros(data_type: DataType, shape: &[usize]) -> Result<Tracer, Error> {
    full(0.0, data_type, shape, &NamedShape::new())
}

// ==================================================== AXIS INDEX ====================================================

/// Position along a named axis, as an `int32` scalar that varies over that axis.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AxisIndexOp {
    axis: String,
    size: usize,
}

impl Display for AxisIndexOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "axis_index[{}]", self.axis)
    }
}

impl Op for AxisIndexOp {
    fn infer_output_types(&self, input_types: &[&AbstractValue]) -> Result<Vec<AbstractValue>, Error> {
        assert_input_count_matches!(input_types.len(), 0);
        let named_shape = NamedShape::from_axes([(self.axis.as_str(), self.size)]);
        Ok(vec![AbstractValue::new(DataType::Int32, Vec::new(), named_shape)])
    }

    fn interpret(&self, inputs: &[&NamedArray]) -> Result<Vec<NamedArray>, Error> {
        assert_input_count_matches!(inputs.len(), 0);
        let data = ArrayD::from_shape_fn(IxDyn(&[self.size]), |index| index[0] as f64);
        Ok(vec![NamedArray::new(vec![self.axis.clone()], data)?])
    }
}

/// Returns the index of the current element along the logical axis `name`.
pub fn axis_index(name: &str) -> Result<Tracer, Error> {
    if !is_tracing() {
        return Err(Error::NoActiveTrace { op: "axis_index".to_string() });
    }
    let binding = lookup_axis(name)?;
    apply_unary(Arc::new(AxisIndexOp { axis: binding.name, size: binding.size }), &[], "axis_index")
}
