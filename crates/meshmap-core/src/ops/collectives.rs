//! Collectives over logical axes.
//!
//! Inside a mapped function every value conceptually lives on the devices its logical axes are assigned to, so these
//! operations are the only way to move data along a logical axis:
//!
//! - [`Tracer::psum`], [`Tracer::pmax`] and [`Tracer::pmin`] reduce over named axes.
//! - [`Tracer::pshuffle`] permutes elements along one or more named axes.
//! - [`Tracer::pgather`] gathers along a group of named and positional axes.
//! - [`Tracer::pdot`] contracts named and positional axes of two values.
//!
//! Collectives may name any axis bound by an enclosing mapped function, not only the innermost one.

use std::{fmt::Display, sync::Arc};

use ndarray::{ArrayD, Axis, IxDyn};

use crate::{
    assert_input_count_matches,
    config::LoweringStrategy,
    errors::Error,
    ops::reductions::{ReductionKind, reduce_named_axis},
    programs::Op,
    tracer::{AxisBinding, Tracer, apply_unary, lookup_axis, lowering_strategy},
    types::{AbstractValue, NamedShape},
    values::NamedArray,
};

/// Named axis reduced by a collective, with the sizes of the resources it is split over.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NamedReduction {
    pub axis: String,
    pub size: usize,
    pub resource_sizes: Vec<usize>,
}

impl From<AxisBinding> for NamedReduction {
    fn from(binding: AxisBinding) -> Self {
        let resource_sizes = binding.resource_sizes();
        Self { axis: binding.name, size: binding.size, resource_sizes }
    }
}

/// Axis taking part in a [`Tracer::pgather`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AxisRef {
    Named(String),
    Positional(usize),
}

impl AxisRef {
    pub fn named<N: Into<String>>(name: N) -> Self {
        Self::Named(name.into())
    }
}

impl Display for AxisRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AxisRef::Named(name) => write!(f, "{name}"),
            AxisRef::Positional(axis) => write!(f, "{axis}"),
        }
    }
}

fn bindings<N: AsRef<str>>(axes: &[N], collective: &str) -> Result<Vec<AxisBinding>, Error> {
    let mut bindings: Vec<AxisBinding> = Vec::with_capacity(axes.len());
    for axis in axes {
        let binding = lookup_axis(axis.as_ref())?;
        if bindings.iter().any(|existing| existing.name == binding.name) {
            return Err(Error::IncompatibleShapes {
                op: collective.to_string(),
                message: format!("axis {} is listed more than once", binding.name),
            });
        }
        bindings.push(binding);
    }
    Ok(bindings)
}

fn render_names<'a, I: Iterator<Item = &'a str>>(names: I) -> String {
    names.collect::<Vec<_>>().join(", ")
}

// ======================================================= PSUM =======================================================

/// Reduction over named axes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CollectiveReduceOp {
    kind: ReductionKind,
    axes: Vec<NamedReduction>,
}

impl Display for CollectiveReduceOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "p{}[{}]", self.kind, render_names(self.axes.iter().map(|axis| axis.axis.as_str())))
    }
}

impl Op for CollectiveReduceOp {
    fn infer_output_types(&self, input_types: &[&AbstractValue]) -> Result<Vec<AbstractValue>, Error> {
        assert_input_count_matches!(input_types.len(), 1);
        let mut output_type = input_types[0].clone();
        for axis in &self.axes {
            output_type.named_shape.remove(&axis.axis);
        }
        Ok(vec![output_type])
    }

    fn interpret(&self, inputs: &[&NamedArray]) -> Result<Vec<NamedArray>, Error> {
        assert_input_count_matches!(inputs.len(), 1);
        let mut value = inputs[0].clone();
        for axis in &self.axes {
            value = reduce_named_axis(&value, &axis.axis, axis.size, self.kind, &axis.resource_sizes)?;
        }
        Ok(vec![value])
    }
}

// ===================================================== PSHUFFLE =====================================================

/// Permutation along a group of named axes, flattened row-major in the given order: element `i` of the output is
/// element `permutation[i]` of the input.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PermuteOp {
    axes: Vec<(String, usize)>,
    permutation: Vec<usize>,
}

impl PermuteOp {
    fn new(axes: Vec<(String, usize)>, permutation: Vec<usize>) -> Result<Self, Error> {
        let size = axes.iter().map(|(_, size)| *size).product::<usize>();
        let mut seen = vec![false; size];
        let is_bijection = permutation.len() == size
            && permutation.iter().all(|index| *index < size && !std::mem::replace(&mut seen[*index], true));
        if !is_bijection {
            return Err(Error::InvalidPermutation { permutation, size });
        }
        Ok(Self { axes, permutation })
    }
}

impl Display for PermuteOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let axes = render_names(self.axes.iter().map(|(name, _)| name.as_str()));
        write!(f, "pshuffle[{axes}; {:?}]", self.permutation)
    }
}

impl Op for PermuteOp {
    fn infer_output_types(&self, input_types: &[&AbstractValue]) -> Result<Vec<AbstractValue>, Error> {
        assert_input_count_matches!(input_types.len(), 1);
        Ok(vec![input_types[0].clone()])
    }

    fn interpret(&self, inputs: &[&NamedArray]) -> Result<Vec<NamedArray>, Error> {
        assert_input_count_matches!(inputs.len(), 1);
        let input = inputs[0];
        if self.axes.iter().all(|(name, _)| input.named_axis(name).is_none()) {
            return Ok(vec![input.clone()]);
        }

        let mut names = self.axes.iter().map(|(name, _)| name.clone()).collect::<Vec<_>>();
        let mut named_sizes = self.axes.iter().map(|(_, size)| *size).collect::<Vec<_>>();
        for name in input.names() {
            if !names.contains(name) {
                named_sizes.push(input.named_size(name).unwrap_or(1));
                names.push(name.clone());
            }
        }
        let data = input.broadcast_to(&names, &named_sizes, input.positional_shape())?;

        let group_size = self.permutation.len();
        let shape = data.shape().to_vec();
        let flat_shape = [&[group_size][..], &shape[self.axes.len()..]].concat();
        let flat = data
            .to_shape(IxDyn(&flat_shape))
            .map_err(|error| Error::IncompatibleShapes { op: "pshuffle".to_string(), message: error.to_string() })?;
        let permuted = flat.select(Axis(0), &self.permutation);
        let data = permuted
            .to_shape(IxDyn(&shape))
            .map_err(|error| Error::IncompatibleShapes { op: "pshuffle".to_string(), message: error.to_string() })?
            .into_owned();
        Ok(vec![NamedArray::new(names, data)?])
    }
}

// ====================================================== PGATHER ======================================================

/// Gather along a group of axes: every element of the index operand is a flat, row-major index into the group.
///
/// The result varies over the named axes of the index operand and the ungathered named axes of the source. Its
/// positional dimensions are those of the index operand followed by the ungathered positional dimensions of the
/// source.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GatherOp {
    axes: Vec<(AxisRef, usize)>,
}

impl GatherOp {
    fn group_size(&self) -> usize {
        self.axes.iter().map(|(_, size)| *size).product()
    }

    fn gathers_positional(&self, axis: usize) -> Option<usize> {
        self.axes.iter().position(|(reference, _)| *reference == AxisRef::Positional(axis))
    }

    fn gathers_named(&self, name: &str) -> Option<usize> {
        self.axes.iter().position(|(reference, _)| matches!(reference, AxisRef::Named(named) if named == name))
    }
}

impl Display for GatherOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let axes = self.axes.iter().map(|(axis, _)| axis.to_string()).collect::<Vec<_>>();
        write!(f, "pgather[{}]", axes.join(", "))
    }
}

impl Op for GatherOp {
    fn infer_output_types(&self, input_types: &[&AbstractValue]) -> Result<Vec<AbstractValue>, Error> {
        assert_input_count_matches!(input_types.len(), 2);
        let (source, indices) = (input_types[0], input_types[1]);
        for (axis, size) in &self.axes {
            let actual = match axis {
                AxisRef::Named(name) => source.named_shape.size(name),
                AxisRef::Positional(axis) => source.shape.get(*axis).copied(),
            };
            if actual != Some(*size) {
                return Err(Error::IncompatibleShapes {
                    op: "pgather".to_string(),
                    message: format!("source of type {source} does not have an axis {axis} of size {size}"),
                });
            }
        }

        let mut named_shape = NamedShape::new();
        for (name, size) in source.named_shape.axes() {
            if self.gathers_named(name).is_none() {
                named_shape.insert(name.clone(), *size);
            }
        }
        let named_shape = named_shape.join(&indices.named_shape, "pgather")?;
        let shape = indices
            .shape
            .iter()
            .copied()
            .chain((0..source.rank()).filter(|axis| self.gathers_positional(*axis).is_none()).map(|a| source.shape[a]))
            .collect();
        Ok(vec![AbstractValue::new(source.data_type, shape, named_shape)])
    }

    fn interpret(&self, inputs: &[&NamedArray]) -> Result<Vec<NamedArray>, Error> {
        assert_input_count_matches!(inputs.len(), 2);
        let (source, indices) = (inputs[0], inputs[1]);
        let group_sizes = self.axes.iter().map(|(_, size)| *size).collect::<Vec<_>>();
        let group_size = self.group_size();
        for index in indices.data().iter() {
            if !index.is_finite() || index.fract() != 0.0 {
                return Err(Error::NonIntegralIndex { index: index.to_string() });
            }
            let index = *index as i64;
            if index < 0 || index as usize >= group_size {
                return Err(Error::IndexOutOfBounds { index, size: group_size });
            }
        }

        let mut names = Vec::new();
        let mut named_sizes = Vec::new();
        for name in source.names().iter().filter(|name| self.gathers_named(name).is_none()).chain(indices.names()) {
            if !names.contains(name) {
                names.push(name.clone());
                named_sizes.push(source.named_size(name).or_else(|| indices.named_size(name)).unwrap_or(1));
            }
        }
        let index_rank = indices.rank();
        let kept_positional = (0..source.rank()).filter(|axis| self.gathers_positional(*axis).is_none());
        let kept_positional = kept_positional.collect::<Vec<_>>();

        enum Coordinate {
            Output(usize),
            Group(usize),
        }

        let mut source_coordinates = Vec::with_capacity(source.data().ndim());
        for name in source.names() {
            source_coordinates.push(match self.gathers_named(name) {
                Some(group_index) => Coordinate::Group(group_index),
                None => Coordinate::Output(names.iter().position(|existing| existing == name).unwrap_or_default()),
            });
        }
        for axis in 0..source.rank() {
            source_coordinates.push(match self.gathers_positional(axis) {
                Some(group_index) => Coordinate::Group(group_index),
                None => {
                    let kept_index = kept_positional.iter().position(|kept| *kept == axis).unwrap_or_default();
                    Coordinate::Output(names.len() + index_rank + kept_index)
                }
            });
        }
        let index_coordinates = indices
            .names()
            .iter()
            .map(|name| names.iter().position(|existing| existing == name).unwrap_or_default())
            .chain((0..index_rank).map(|axis| names.len() + axis))
            .collect::<Vec<_>>();

        let shape = named_sizes
            .iter()
            .copied()
            .chain(indices.positional_shape().iter().copied())
            .chain(kept_positional.iter().map(|axis| source.positional_shape()[*axis]))
            .collect::<Vec<_>>();
        let data = ArrayD::from_shape_fn(IxDyn(&shape), |output| {
            let index_coordinate = index_coordinates.iter().map(|axis| output[*axis]).collect::<Vec<_>>();
            let mut flat = indices.data()[index_coordinate.as_slice()] as usize;
            let mut group = vec![0; group_sizes.len()];
            for (position, size) in group_sizes.iter().enumerate().rev() {
                group[position] = flat % size;
                flat /= size;
            }
            let source_coordinate = source_coordinates
                .iter()
                .map(|coordinate| match coordinate {
                    Coordinate::Output(axis) => output[*axis],
                    Coordinate::Group(position) => group[*position],
                })
                .collect::<Vec<_>>();
            source.data()[source_coordinate.as_slice()]
        });
        Ok(vec![NamedArray::new(names, data)?])
    }
}

// ======================================================= PDOT =======================================================

/// Contraction over named axes fused with a `dot_general`-style positional contraction.
///
/// Result positional dimensions are the batch dimensions, then the free dimensions of the left operand, then the free
/// dimensions of the right operand. Contracted named axes are summed with the same hierarchical schedule as
/// [`Tracer::psum`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DotOp {
    axes: Vec<NamedReduction>,
    contract: (Vec<usize>, Vec<usize>),
    batch: (Vec<usize>, Vec<usize>),
}

impl DotOp {
    fn free_dimensions(&self, rank: usize, contract: &[usize], batch: &[usize]) -> Vec<usize> {
        (0..rank).filter(|axis| !contract.contains(axis) && !batch.contains(axis)).collect()
    }

    fn check_dimensions(&self, value: &AbstractValue, contract: &[usize], batch: &[usize]) -> Result<(), Error> {
        let all = contract.iter().chain(batch).collect::<Vec<_>>();
        for (index, axis) in all.iter().enumerate() {
            if **axis >= value.rank() || all[..index].contains(axis) {
                return Err(Error::IncompatibleShapes {
                    op: "pdot".to_string(),
                    message: format!(
                        "invalid contracting dimensions {contract:?} and batch dimensions {batch:?} for {value}"
                    ),
                });
            }
        }
        Ok(())
    }
}

impl Display for DotOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let axes = render_names(self.axes.iter().map(|axis| axis.axis.as_str()));
        write!(f, "pdot[{axes}; contract={:?}, batch={:?}]", self.contract, self.batch)
    }
}

impl Op for DotOp {
    fn infer_output_types(&self, input_types: &[&AbstractValue]) -> Result<Vec<AbstractValue>, Error> {
        assert_input_count_matches!(input_types.len(), 2);
        let (lhs, rhs) = (input_types[0], input_types[1]);
        self.check_dimensions(lhs, &self.contract.0, &self.batch.0)?;
        self.check_dimensions(rhs, &self.contract.1, &self.batch.1)?;

        let lhs_batch = self.batch.0.iter().map(|axis| lhs.shape[*axis]).collect::<Vec<_>>();
        let rhs_batch = self.batch.1.iter().map(|axis| rhs.shape[*axis]).collect::<Vec<_>>();
        if lhs_batch != rhs_batch {
            return Err(Error::BatchAxisMismatch {
                message: format!(
                    "dimensions {:?} of {lhs} have sizes {lhs_batch:?} but dimensions {:?} of {rhs} have sizes \
                     {rhs_batch:?}",
                    self.batch.0, self.batch.1,
                ),
            });
        }
        let lhs_contract = self.contract.0.iter().map(|axis| lhs.shape[*axis]).collect::<Vec<_>>();
        let rhs_contract = self.contract.1.iter().map(|axis| rhs.shape[*axis]).collect::<Vec<_>>();
        if lhs_contract != rhs_contract {
            return Err(Error::IncompatibleShapes {
                op: "pdot".to_string(),
                message: format!("contracting dimensions have sizes {lhs_contract:?} and {rhs_contract:?}"),
            });
        }

        let mut named_shape = lhs.named_shape.join(&rhs.named_shape, "pdot")?;
        for axis in &self.axes {
            named_shape.remove(&axis.axis);
        }
        let shape = lhs_batch
            .into_iter()
            .chain(self.free_dimensions(lhs.rank(), &self.contract.0, &self.batch.0).iter().map(|a| lhs.shape[*a]))
            .chain(self.free_dimensions(rhs.rank(), &self.contract.1, &self.batch.1).iter().map(|a| rhs.shape[*a]))
            .collect();
        Ok(vec![AbstractValue::new(lhs.data_type.promote(rhs.data_type), shape, named_shape)])
    }

    fn interpret(&self, inputs: &[&NamedArray]) -> Result<Vec<NamedArray>, Error> {
        assert_input_count_matches!(inputs.len(), 2);
        let (lhs, rhs) = (inputs[0], inputs[1]);

        // Contracted named axes are kept as named dimensions of the product and reduced afterwards.
        let mut names = Vec::new();
        let mut named_sizes = Vec::new();
        for name in lhs.names().iter().chain(rhs.names()) {
            if !names.contains(name) {
                names.push(name.clone());
                named_sizes.push(lhs.named_size(name).or_else(|| rhs.named_size(name)).unwrap_or(1));
            }
        }

        enum Coordinate {
            Output(usize),
            Contract(usize),
        }

        let batch_count = self.batch.0.len();
        let lhs_free = self.free_dimensions(lhs.rank(), &self.contract.0, &self.batch.0);
        let rhs_free = self.free_dimensions(rhs.rank(), &self.contract.1, &self.batch.1);
        let coordinates = |value: &NamedArray, contract: &[usize], batch: &[usize], free: &[usize], offset: usize| {
            let mut coordinates = value
                .names()
                .iter()
                .map(|name| Coordinate::Output(names.iter().position(|existing| existing == name).unwrap_or_default()))
                .collect::<Vec<_>>();
            for axis in 0..value.rank() {
                coordinates.push(if let Some(index) = contract.iter().position(|a| *a == axis) {
                    Coordinate::Contract(index)
                } else if let Some(index) = batch.iter().position(|a| *a == axis) {
                    Coordinate::Output(names.len() + index)
                } else {
                    let index = free.iter().position(|a| *a == axis).unwrap_or_default();
                    Coordinate::Output(names.len() + batch_count + offset + index)
                });
            }
            coordinates
        };
        let lhs_coordinates = coordinates(lhs, &self.contract.0, &self.batch.0, &lhs_free, 0);
        let rhs_coordinates = coordinates(rhs, &self.contract.1, &self.batch.1, &rhs_free, lhs_free.len());

        let contract_sizes = self.contract.0.iter().map(|axis| lhs.positional_shape()[*axis]).collect::<Vec<_>>();
        let contract_count = contract_sizes.iter().product::<usize>();
        let contract_indices = (0..contract_count)
            .map(|mut flat| {
                let mut index = vec![0; contract_sizes.len()];
                for (position, size) in contract_sizes.iter().enumerate().rev() {
                    index[position] = flat % size;
                    flat /= size;
                }
                index
            })
            .collect::<Vec<_>>();

        let shape = named_sizes
            .iter()
            .copied()
            .chain(self.batch.0.iter().map(|axis| lhs.positional_shape()[*axis]))
            .chain(lhs_free.iter().map(|axis| lhs.positional_shape()[*axis]))
            .chain(rhs_free.iter().map(|axis| rhs.positional_shape()[*axis]))
            .collect::<Vec<_>>();
        let resolve = |coordinates: &[Coordinate], output: &IxDyn, contract: &[usize]| {
            coordinates
                .iter()
                .map(|coordinate| match coordinate {
                    Coordinate::Output(axis) => output[*axis],
                    Coordinate::Contract(index) => contract[*index],
                })
                .collect::<Vec<_>>()
        };
        let data = ArrayD::from_shape_fn(IxDyn(&shape), |output| {
            contract_indices
                .iter()
                .map(|contract| {
                    let lhs_index = resolve(&lhs_coordinates, &output, contract);
                    let rhs_index = resolve(&rhs_coordinates, &output, contract);
                    lhs.data()[lhs_index.as_slice()] * rhs.data()[rhs_index.as_slice()]
                })
                .sum::<f64>()
        });

        let mut value = NamedArray::new(names, data)?;
        for axis in &self.axes {
            value = reduce_named_axis(&value, &axis.axis, axis.size, ReductionKind::Sum, &axis.resource_sizes)?;
        }
        Ok(vec![value])
    }
}

// ===================================================== FUNCTIONS =====================================================

impl Tracer {
    fn collective_reduce<N: AsRef<str>>(&self, kind: ReductionKind, axes: &[N]) -> Result<Tracer, Error> {
        let name = format!("p{kind}");
        let axes = bindings(axes, &name)?.into_iter().map(NamedReduction::from).collect();
        apply_unary(Arc::new(CollectiveReduceOp { kind, axes }), &[self], &name)
    }

    /// Sums over the named axes `axes`.
    ///
    /// Summing over an axis this value does not vary over multiplies it by the size of that axis.
    pub fn psum<N: AsRef<str>>(&self, axes: &[N]) -> Result<Tracer, Error> {
        self.collective_reduce(ReductionKind::Sum, axes)
    }

    pub fn pmax<N: AsRef<str>>(&self, axes: &[N]) -> Result<Tracer, Error> {
        self.collective_reduce(ReductionKind::Max, axes)
    }

    pub fn pmin<N: AsRef<str>>(&self, axes: &[N]) -> Result<Tracer, Error> {
        self.collective_reduce(ReductionKind::Min, axes)
    }

    /// Permutes this value along the named axes `axes`, flattened row-major in the given order, so that element `i`
    /// of the result is element `permutation[i]` of this value.
    pub fn pshuffle<N: AsRef<str>>(&self, axes: &[N], permutation: &[usize]) -> Result<Tracer, Error> {
        let bindings = bindings(axes, "pshuffle")?;
        if bindings.len() > 1 && lowering_strategy() == Some(LoweringStrategy::Spmd) {
            return Err(Error::UnimplementedCollective {
                collective: "pshuffle".to_string(),
                reason: "over multiple named axes with the SPMD lowering".to_string(),
            });
        }
        let axes = bindings.into_iter().map(|binding| (binding.name, binding.size)).collect();
        apply_unary(Arc::new(PermuteOp::new(axes, permutation.to_vec())?), &[self], "pshuffle")
    }

    /// Gathers from this value along `axes` using `indices` as flat indices into the axis group.
    ///
    /// Gathering over a logical axis that is split over mesh axes is only supported by
    /// [`LoweringStrategy::Spmd`].
    pub fn pgather(&self, indices: &Tracer, axes: &[AxisRef]) -> Result<Tracer, Error> {
        let mut group = Vec::with_capacity(axes.len());
        for axis in axes {
            if group.iter().any(|(existing, _)| existing == axis) {
                return Err(Error::IncompatibleShapes {
                    op: "pgather".to_string(),
                    message: format!("axis {axis} is listed more than once"),
                });
            }
            let size = match axis {
                AxisRef::Named(name) => {
                    let binding = lookup_axis(name)?;
                    if !binding.is_vectorized() && lowering_strategy() != Some(LoweringStrategy::Spmd) {
                        return Err(Error::UnimplementedCollective {
                            collective: "pgather".to_string(),
                            reason: "over mesh-mapped axes with the sharded lowering".to_string(),
                        });
                    }
                    binding.size
                }
                AxisRef::Positional(dimension) => self.shape().get(*dimension).copied().ok_or_else(|| {
                    Error::IncompatibleShapes {
                        op: "pgather".to_string(),
                        message: format!("dimension {dimension} is out of range for {}", self.tpe()),
                    }
                })?,
            };
            group.push((axis.clone(), size));
        }
        apply_unary(Arc::new(GatherOp { axes: group }), &[self, indices], "pgather")
    }

    /// Contracts this value with `other` over the named axes `axes` and the positional dimension pairs in `contract`,
    /// batching over the dimension pairs in `batch`.
    pub fn pdot<N: AsRef<str>>(
        &self,
        other: &Tracer,
        axes: &[N],
        contract: (&[usize], &[usize]),
        batch: (&[usize], &[usize]),
    ) -> Result<Tracer, Error> {
        if contract.0.len() != contract.1.len() {
            return Err(Error::IncompatibleShapes {
                op: "pdot".to_string(),
                message: format!("contracting dimensions {:?} and {:?} differ in length", contract.0, contract.1),
            });
        }
        if batch.0.len() != batch.1.len() {
            return Err(Error::BatchAxisMismatch {
                message: format!("batch dimensions {:?} and {:?} differ in length", batch.0, batch.1),
            });
        }
        let axes = bindings(axes, "pdot")?.into_iter().map(NamedReduction::from).collect();
        let op = DotOp {
            axes,
            contract: (contract.0.to_vec(), contract.1.to_vec()),
            batch: (batch.0.to_vec(), batch.1.to_vec()),
        };
        apply_unary(Arc::new(op), &[self, other], "pdot")
    }

    /// Positional contraction without named axes.
    pub fn dot_general(
        &self,
        other: &Tracer,
        contract: (&[usize], &[usize]),
        batch: (&[usize], &[usize]),
    ) -> Result<Tracer, Error> {
        self.pdot::<&str>(other, &[], contract, batch)
    }
}
