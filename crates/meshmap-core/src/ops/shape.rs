use std::{fmt::Display, sync::Arc};

use ndarray::IxDyn;

use crate::{
    assert_input_count_matches,
    errors::Error,
    programs::Op,
    tracer::{Tracer, apply_unary},
    types::AbstractValue,
    values::NamedArray,
};

// ===================================================== TRANSPOSE =====================================================

/// Permutation of positional dimensions: dimension `i` of the output is dimension `permutation[i]` of the input.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TransposeOp {
    permutation: Vec<usize>,
}

impl Display for TransposeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "transpose[permutation={:?}]", self.permutation)
    }
}

impl Op for TransposeOp {
    fn infer_output_types(&self, input_types: &[&AbstractValue]) -> Result<Vec<AbstractValue>, Error> {
        assert_input_count_matches!(input_types.len(), 1);
        let input_type = input_types[0];
        let rank = input_type.rank();
        let mut seen = vec![false; rank];
        for axis in &self.permutation {
            if *axis >= rank || std::mem::replace(&mut seen[*axis], true) {
                return Err(Error::InvalidPermutation { permutation: self.permutation.clone(), size: rank });
            }
        }
        if self.permutation.len() != rank {
            return Err(Error::InvalidPermutation { permutation: self.permutation.clone(), size: rank });
        }
        let mut output_type = input_type.clone();
        output_type.shape = self.permutation.iter().map(|axis| input_type.shape[*axis]).collect();
        Ok(vec![output_type])
    }

    fn interpret(&self, inputs: &[&NamedArray]) -> Result<Vec<NamedArray>, Error> {
        assert_input_count_matches!(inputs.len(), 1);
        let input = inputs[0];
        let offset = input.names().len();
        let permutation =
            (0..offset).chain(self.permutation.iter().map(|axis| offset + axis)).collect::<Vec<_>>();
        let data = input.data().view().permuted_axes(permutation).to_owned();
        Ok(vec![NamedArray::new(input.names().to_vec(), data)?])
    }
}

// ====================================================== RESHAPE ======================================================

/// Row-major reshape of the positional dimensions.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReshapeOp {
    shape: Vec<usize>,
}

impl Display for ReshapeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "reshape[shape={:?}]", self.shape)
    }
}

impl Op for ReshapeOp {
    fn infer_output_types(&self, input_types: &[&AbstractValue]) -> Result<Vec<AbstractValue>, Error> {
        assert_input_count_matches!(input_types.len(), 1);
        let input_type = input_types[0];
        if input_type.shape.iter().product::<usize>() != self.shape.iter().product::<usize>() {
            return Err(Error::IncompatibleShapes {
                op: "reshape".to_string(),
                message: format!("cannot reshape {:?} into {:?}", input_type.shape, self.shape),
            });
        }
        let mut output_type = input_type.clone();
        output_type.shape = self.shape.clone();
        Ok(vec![output_type])
    }

    fn interpret(&self, inputs: &[&NamedArray]) -> Result<Vec<NamedArray>, Error> {
        assert_input_count_matches!(inputs.len(), 1);
        let input = inputs[0];
        let offset = input.names().len();
        let shape = input.data().shape()[..offset].iter().chain(&self.shape).copied().collect::<Vec<_>>();
        let data = input
            .data()
            .to_shape(IxDyn(&shape))
            .map_err(|error| Error::IncompatibleShapes { op: "reshape".to_string(), message: error.to_string() })?
            .into_owned();
        Ok(vec![NamedArray::new(input.names().to_vec(), data)?])
    }
}

impl Tracer {
    pub fn transpose(&self, permutation: &[usize]) -> Result<Tracer, Error> {
        apply_unary(Arc::new(TransposeOp { permutation: permutation.to_vec() }), &[self], "transpose")
    }

    pub fn reshape(&self, shape: &[usize]) -> Result<Tracer, Error> {
        apply_unary(Arc::new(ReshapeOp { shape: shape.to_vec() }), &[self], "reshape")
    }
}
