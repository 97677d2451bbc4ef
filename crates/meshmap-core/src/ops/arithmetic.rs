use std::{fmt::Display, sync::Arc};

use crate::{
    assert_input_count_matches,
    errors::Error,
    programs::Op,
    tracer::{Tracer, apply_unary},
    types::{AbstractValue, DataType, broadcast_shapes},
    values::NamedArray,
};

// ======================================================= UNARY =======================================================

/// Elementwise operation on a single value.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum UnaryOp {
    Neg,
    Sin,
    Cos,
    Exp,
    /// Multiplication by a constant.
    Scale(f64),
    /// Addition of a constant.
    Shift(f64),
}

impl UnaryOp {
    fn apply(&self, value: f64) -> f64 {
        match self {
            UnaryOp::Neg => -value,
            UnaryOp::Sin => value.sin(),
            UnaryOp::Cos => value.cos(),
            UnaryOp::Exp => value.exp(),
            UnaryOp::Scale(factor) => value * factor,
            UnaryOp::Shift(offset) => value + offset,
        }
    }

    fn output_data_type(&self, data_type: DataType) -> DataType {
        match self {
            UnaryOp::Neg => data_type,
            UnaryOp::Sin | UnaryOp::Cos | UnaryOp::Exp => data_type.to_floating_point(),
            UnaryOp::Scale(constant) | UnaryOp::Shift(constant) => {
                if data_type.is_floating_point() || constant.fract() == 0.0 {
                    data_type
                } else {
                    data_type.to_floating_point()
                }
            }
        }
    }
}

impl Display for UnaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnaryOp::Neg => write!(f, "neg"),
            UnaryOp::Sin => write!(f, "sin"),
            UnaryOp::Cos => write!(f, "cos"),
            UnaryOp::Exp => write!(f, "exp"),
            UnaryOp::Scale(factor) => write!(f, "scale[{factor}]"),
            UnaryOp::Shift(offset) => write!(f, "shift[{offset}]"),
        }
    }
}

impl Op for UnaryOp {
    fn infer_output_types(&self, input_types: &[&AbstractValue]) -> Result<Vec<AbstractValue>, Error> {
        assert_input_count_matches!(input_types.len(), 1);
        let mut output_type = input_types[0].clone();
        output_type.data_type = self.output_data_type(output_type.data_type);
        Ok(vec![output_type])
    }

    fn interpret(&self, inputs: &[&NamedArray]) -> Result<Vec<NamedArray>, Error> {
        assert_input_count_matches!(inputs.len(), 1);
        Ok(vec![inputs[0].map(|value| self.apply(value))])
    }
}

// ====================================================== BINARY ======================================================

/// Elementwise operation on two values.
///
/// Positional dimensions broadcast NumPy-style and named axes broadcast by name: the result varies over the union of
/// the axes its operands vary over.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    fn apply(&self, lhs: f64, rhs: f64) -> f64 {
        match self {
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Sub => lhs - rhs,
            BinaryOp::Mul => lhs * rhs,
            BinaryOp::Div => lhs / rhs,
        }
    }
}

impl Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BinaryOp::Add => write!(f, "add"),
            BinaryOp::Sub => write!(f, "sub"),
            BinaryOp::Mul => write!(f, "mul"),
            BinaryOp::Div => write!(f, "div"),
        }
    }
}

impl Op for BinaryOp {
    fn infer_output_types(&self, input_types: &[&AbstractValue]) -> Result<Vec<AbstractValue>, Error> {
        assert_input_count_matches!(input_types.len(), 2);
        let (lhs, rhs) = (input_types[0], input_types[1]);
        let op = self.to_string();
        let shape = broadcast_shapes(&lhs.shape, &rhs.shape, &op)?;
        let named_shape = lhs.named_shape.join(&rhs.named_shape, &op)?;
        let data_type = match self {
            BinaryOp::Div => lhs.data_type.promote(rhs.data_type).to_floating_point(),
            _ => lhs.data_type.promote(rhs.data_type),
        };
        Ok(vec![AbstractValue::new(data_type, shape, named_shape)])
    }

    fn interpret(&self, inputs: &[&NamedArray]) -> Result<Vec<NamedArray>, Error> {
        assert_input_count_matches!(inputs.len(), 2);
        Ok(vec![inputs[0].zip_with(inputs[1], &self.to_string(), |lhs, rhs| self.apply(lhs, rhs))?])
    }
}

// ===================================================== FUNCTIONS =====================================================

impl Tracer {
    fn unary(&self, op: UnaryOp) -> Result<Tracer, Error> {
        apply_unary(Arc::new(op), &[self], &op.to_string())
    }

    fn binary(&self, other: &Tracer, op: BinaryOp) -> Result<Tracer, Error> {
        apply_unary(Arc::new(op), &[self, other], &op.to_string())
    }

    pub fn neg(&self) -> Result<Tracer, Error> {
        self.unary(UnaryOp::Neg)
    }

    pub fn sin(&self) -> Result<Tracer, Error> {
        self.unary(UnaryOp::Sin)
    }

    pub fn cos(&self) -> Result<Tracer, Error> {
        self.unary(UnaryOp::Cos)
    }

    pub fn exp(&self) -> Result<Tracer, Error> {
        self.unary(UnaryOp::Exp)
    }

    /// Multiplies every element by `factor`.
    pub fn scale(&self, factor: f64) -> Result<Tracer, Error> {
        self.unary(UnaryOp::Scale(factor))
    }

    /// Adds `offset` to every element.
    pub fn shift(&self, offset: f64) -> Result<Tracer, Error> {
        self.unary(UnaryOp::Shift(offset))
    }

    pub fn add(&self, other: &Tracer) -> Result<Tracer, Error> {
        self.binary(other, BinaryOp::Add)
    }

    pub fn sub(&self, other: &Tracer) -> Result<Tracer, Error> {
        self.binary(other, BinaryOp::Sub)
    }

    pub fn mul(&self, other: &Tracer) -> Result<Tracer, Error> {
        self.binary(other, BinaryOp::Mul)
    }

    pub fn div(&self, other: &Tracer) -> Result<Tracer, Error> {
        self.binary(other, BinaryOp::Div)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::types::NamedShape;

    #[test]
    fn test_unary_op_types() {
        let int = AbstractValue::positional(DataType::Int32, vec![3]);
        assert_eq!(UnaryOp::Neg.infer_output_types(&[&int]).unwrap()[0].data_type, DataType::Int32);
        assert_eq!(UnaryOp::Sin.infer_output_types(&[&int]).unwrap()[0].data_type, DataType::Float32);
        assert_eq!(UnaryOp::Scale(2.0).infer_output_types(&[&int]).unwrap()[0].data_type, DataType::Int32);
        assert_eq!(UnaryOp::Scale(0.5).infer_output_types(&[&int]).unwrap()[0].data_type, DataType::Float32);
        assert_eq!(UnaryOp::Neg.infer_output_types(&[]), Err(Error::InvalidInputCount { expected: 1, got: 0 }));
    }

    #[test]
    fn test_binary_op_types() {
        let lhs = AbstractValue::new(DataType::Int32, vec![3, 1], NamedShape::from_axes([("i", 4)]));
        let rhs = AbstractValue::new(DataType::Int32, vec![5], NamedShape::from_axes([("j", 2)]));
        let output = BinaryOp::Div.infer_output_types(&[&lhs, &rhs]).unwrap().remove(0);
        assert_eq!(output.to_string(), "float32[3,5]{i:4, j:2}");

        let conflicting = AbstractValue::new(DataType::Int32, vec![], NamedShape::from_axes([("i", 5)]));
        assert!(matches!(
            BinaryOp::Add.infer_output_types(&[&lhs, &conflicting]),
            Err(Error::IncompatibleShapes { op, .. }) if op == "add",
        ));
    }

    #[test]
    fn test_ops_interpret() {
        let lhs = NamedArray::positional(array![1.0, 2.0, 3.0].into_dyn());
        let rhs = NamedArray::positional(array![2.0].into_dyn());
        let quotient = BinaryOp::Div.interpret(&[&lhs, &rhs]).unwrap().remove(0);
        assert_eq!(quotient.data(), &array![0.5, 1.0, 1.5].into_dyn());
        let shifted = UnaryOp::Shift(1.0).interpret(&[&lhs]).unwrap().remove(0);
        assert_eq!(shifted.data(), &array![2.0, 3.0, 4.0].into_dyn());
        assert_eq!(UnaryOp::Scale(-1.0).to_string(), "scale[-1]");
    }
}
