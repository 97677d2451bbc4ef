use std::{fmt::Display, sync::Arc};

use ndarray::{Axis, IxDyn};

use crate::{
    assert_input_count_matches,
    errors::Error,
    programs::Op,
    tracer::{Tracer, apply_unary},
    types::AbstractValue,
    values::NamedArray,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ReductionKind {
    Sum,
    Max,
    Min,
}

impl ReductionKind {
    pub fn identity(&self) -> f64 {
        match self {
            ReductionKind::Sum => 0.0,
            ReductionKind::Max => f64::NEG_INFINITY,
            ReductionKind::Min => f64::INFINITY,
        }
    }

    pub fn combine(&self, lhs: f64, rhs: f64) -> f64 {
        match self {
            ReductionKind::Sum => lhs + rhs,
            ReductionKind::Max => lhs.max(rhs),
            ReductionKind::Min => lhs.min(rhs),
        }
    }
}

impl Display for ReductionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReductionKind::Sum => write!(f, "sum"),
            ReductionKind::Max => write!(f, "max"),
            ReductionKind::Min => write!(f, "min"),
        }
    }
}

/// Reduces named axis `axis` of `value`, which has size `size` and is split over resources of sizes
/// `resource_sizes`.
///
/// The axis is viewed as `[resource_sizes..., remainder]`. The per-device remainder is reduced first and the partial
/// results are then combined across each resource, minor to major. If `value` does not vary over `axis`, a sum
/// multiplies it by `size` and a max or min leaves it unchanged.
pub(crate) fn reduce_named_axis(
    value: &NamedArray,
    axis: &str,
    size: usize,
    kind: ReductionKind,
    resource_sizes: &[usize],
) -> Result<NamedArray, Error> {
    let Some(index) = value.named_axis(axis) else {
        return Ok(match kind {
            ReductionKind::Sum => value.map(|element| element * size as f64),
            ReductionKind::Max | ReductionKind::Min => value.clone(),
        });
    };

    let device_factor = resource_sizes.iter().product::<usize>();
    let extent = value.data().shape()[index];
    if device_factor == 0 || extent % device_factor != 0 {
        return Err(Error::IncompatibleShapes {
            op: kind.to_string(),
            message: format!("axis {axis} of size {extent} cannot be split over resources of sizes {resource_sizes:?}"),
        });
    }

    let full_shape = value.data().shape();
    let split = resource_sizes.iter().copied().chain([extent / device_factor]).collect::<Vec<_>>();
    let shape = [&full_shape[..index], split.as_slice(), &full_shape[index + 1..]].concat();
    let mut data = value
        .data()
        .to_shape(IxDyn(&shape))
        .map_err(|error| Error::IncompatibleShapes { op: kind.to_string(), message: error.to_string() })?
        .into_owned();
    for reduced in (index..=index + resource_sizes.len()).rev() {
        data = data.fold_axis(Axis(reduced), kind.identity(), |lhs, rhs| kind.combine(*lhs, *rhs));
    }

    let names = value.names().iter().filter(|name| *name != axis).cloned().collect();
    NamedArray::new(names, data)
}

// ====================================================== REDUCE ======================================================

/// Reduction over positional dimensions.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReduceOp {
    kind: ReductionKind,
    axes: Vec<usize>,
}

impl Display for ReduceOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "reduce_{}[axes={:?}]", self.kind, self.axes)
    }
}

impl Op for ReduceOp {
    fn infer_output_types(&self, input_types: &[&AbstractValue]) -> Result<Vec<AbstractValue>, Error> {
        assert_input_count_matches!(input_types.len(), 1);
        let input_type = input_types[0];
        for (index, axis) in self.axes.iter().enumerate() {
            if *axis >= input_type.rank() || self.axes[..index].contains(axis) {
                return Err(Error::IncompatibleShapes {
                    op: format!("reduce_{}", self.kind),
                    message: format!("invalid axes {:?} for a value of rank {}", self.axes, input_type.rank()),
                });
            }
        }
        let mut output_type = input_type.clone();
        output_type.shape = (0..input_type.rank())
            .filter(|axis| !self.axes.contains(axis))
            .map(|axis| input_type.shape[axis])
            .collect();
        Ok(vec![output_type])
    }

    fn interpret(&self, inputs: &[&NamedArray]) -> Result<Vec<NamedArray>, Error> {
        assert_input_count_matches!(inputs.len(), 1);
        let input = inputs[0];
        let offset = input.names().len();
        let mut axes = self.axes.clone();
        axes.sort_unstable_by(|lhs, rhs| rhs.cmp(lhs));
        let mut data = input.data().clone();
        for axis in axes {
            data = data.fold_axis(Axis(offset + axis), self.kind.identity(), |lhs, rhs| self.kind.combine(*lhs, *rhs));
        }
        Ok(vec![NamedArray::new(input.names().to_vec(), data)?])
    }
}

impl Tracer {
    fn reduce(&self, kind: ReductionKind, axes: &[usize]) -> Result<Tracer, Error> {
        apply_unary(Arc::new(ReduceOp { kind, axes: axes.to_vec() }), &[self], &format!("reduce_{kind}"))
    }

    /// Sums over the positional dimensions `axes`.
    pub fn sum(&self, axes: &[usize]) -> Result<Tracer, Error> {
        self.reduce(ReductionKind::Sum, axes)
    }

    pub fn max(&self, axes: &[usize]) -> Result<Tracer, Error> {
        self.reduce(ReductionKind::Max, axes)
    }

    pub fn min(&self, axes: &[usize]) -> Result<Tracer, Error> {
        self.reduce(ReductionKind::Min, axes)
    }
}
