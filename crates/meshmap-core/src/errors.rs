use thiserror::Error;

use crate::axes::{format_names, format_shape};

/// Error type for every fallible operation in this crate.
///
/// Errors are [`Clone`] so that a failed lowering can be cached and replayed to later callers that request the same
/// abstract signature. Messages are part of the public interface and mirror the wording users see when mapping a
/// function over named axes.
#[derive(Error, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Error {
    // -----------------------------------------------------------------------
    // Axis size inference
    // -----------------------------------------------------------------------
    /// Error returned when two observations of the same logical axis disagree on its size.
    #[error(
        "The size of axis {axis} was previously inferred to be {expected}, but found an argument of shape {} with \
         in_axes specification {spec}. Shape mismatch occurs in dimension {dimension}: {actual} != {expected}",
        format_shape(.shape)
    )]
    AxisSizeMismatch {
        axis: String,
        expected: usize,
        actual: usize,
        shape: Vec<usize>,
        spec: String,
        dimension: usize,
    },

    /// Error returned when a value created inside a mapped function declares a named axis with the wrong size.
    #[error("The shape of axis {axis} was specified as {declared}, but it really is {actual}")]
    NamedShapeMismatch { axis: String, declared: usize, actual: usize },

    /// Error returned when the size of one or more logical axes cannot be determined.
    #[error("Failed to infer size of axes: {}.", .axes.join(", "))]
    UnresolvedAxisSize { axes: Vec<String> },

    /// Error returned when an explicitly declared axis size is zero.
    #[error("axis '{axis}' must have size > 0")]
    InvalidAxisSize { axis: String },

    /// Error returned when an input axis specification places a name past the rank of its argument.
    #[error(
        "One of xmap arguments has an in_axes specification of {spec}, which implies that it has at least {required} \
         dimensions, but the argument has rank {rank}"
    )]
    InAxesRankError { spec: String, required: usize, rank: usize },

    /// Error returned when an input axis specification without an ellipsis does not match the argument rank exactly.
    #[error(
        "xmap argument has an in_axes specification of {spec}, which asserts that it should be of rank {expected}, \
         but the argument has rank {rank} (and shape {})",
        format_shape(.shape)
    )]
    InAxesRankAssertion { spec: String, expected: usize, rank: usize, shape: Vec<usize> },

    /// Error returned when an output axis specification requires more positional dimensions than a result has.
    #[error(
        "One of xmap outputs has an out_axes specification of {spec}, which requires the result of the xmapped \
         function to have at least {required} positional dimensions, but it only has {rank}"
    )]
    OutAxesRankError { spec: String, required: usize, rank: usize },

    /// Error returned when an output axis specification without an ellipsis does not match the output rank exactly.
    #[error(
        "xmap output has an out_axes specification of {spec}, which asserts that it should be of rank {expected}, \
         but the output has rank {rank} (and shape {})",
        format_shape(.shape)
    )]
    OutAxesRankAssertion { spec: String, expected: usize, rank: usize, shape: Vec<usize> },

    /// Error returned when an axis specification uses a negative dimension index.
    #[error("xmap doesn't support negative axes in {side}")]
    NegativeAxisUnsupported { side: String },

    /// Error returned when the same logical axis name appears twice in one axis specification.
    #[error("axis {axis} appears more than once in the {side} specification {spec}")]
    DuplicateAxisInSpec { axis: String, side: String, spec: String },

    // -----------------------------------------------------------------------
    // Resource resolution
    // -----------------------------------------------------------------------
    /// Error returned when a logical axis is assigned to a resource axis that the active mesh does not define.
    #[error("Resource axis: {resource} of {axis} is not found in mesh: {}.", format_names(.mesh_axes))]
    UnknownResourceAxis { axis: String, resource: String, mesh_axes: Vec<String> },

    /// Error returned when the resource tuple of a single logical axis repeats a resource.
    #[error(
        "xmap requires each axis to be mapped to distinct resources, but specified {} for axis {axis}",
        format_names(.resources)
    )]
    DuplicateResourceAssignment { axis: String, resources: Vec<String> },

    /// Error returned when a resource is already claimed by another logical axis.
    #[error("Resource {resource} is already assigned to axis {owner}, so it cannot also be used by axis {axis}")]
    ResourceAlreadyAssigned { resource: String, owner: String, axis: String },

    /// Error returned when a logical axis size is not a multiple of the product of its resource sizes.
    #[error(
        "Size of axis {axis} ({size}) is not divisible by the number of resources it is assigned to ({}, {product} in \
         total)",
        format_names(.resources)
    )]
    IndivisibleAxisSize { axis: String, size: usize, resources: Vec<String>, product: usize },

    /// Error returned when a mapped function is traced under a resource environment that differs from the one that
    /// was active when the enclosing mapped function started tracing.
    #[error("Changing the resource environment (e.g. hardware mesh spec) is not allowed inside xmap.")]
    ResourceEnvironmentChanged,

    /// Error returned when a nested mapped function binds a name that an enclosing mapped function already binds.
    #[error("axis {axis} is already bound by an enclosing xmap")]
    AxisNameConflict { axis: String },

    /// Error returned when a collective or named value refers to an axis outside of any mapped function.
    #[error("unbound axis name: {axis}")]
    UnboundAxisName { axis: String },

    // -----------------------------------------------------------------------
    // Collectives
    // -----------------------------------------------------------------------
    /// Error returned when the batch dimensions of a named contraction disagree between operands.
    #[error("pdot batch dimensions do not match: {message}")]
    BatchAxisMismatch { message: String },

    /// Error returned when a collective cannot be expressed by the active lowering strategy.
    #[error("{collective} is not implemented {reason}")]
    UnimplementedCollective { collective: String, reason: String },

    /// Error returned when a permutation is not a bijection over the flattened extent of its axes.
    #[error("invalid permutation {permutation:?} for an axis group of size {size}")]
    InvalidPermutation { permutation: Vec<usize>, size: usize },

    /// Error returned when a gather index falls outside the gathered axis group.
    #[error("gather index {index} is out of bounds for an axis group of size {size}")]
    IndexOutOfBounds { index: i64, size: usize },

    /// Error returned when a gather index is not a finite integer.
    #[error("gather index {index} is not an integer")]
    NonIntegralIndex { index: String },

    /// Error returned when operand types are incompatible for an operation.
    #[error("incompatible operand shapes for '{op}': {message}")]
    IncompatibleShapes { op: String, message: String },

    // -----------------------------------------------------------------------
    // Mesh
    // -----------------------------------------------------------------------
    /// Error returned when a mesh needs more devices than are available.
    #[error("Mesh requires {required} devices, but only {available} are available")]
    DeviceShortage { required: usize, available: usize },

    /// Error returned when a mesh axis name is empty.
    #[error("mesh axis names must be non-empty")]
    EmptyMeshAxisName,

    /// Error returned when a mesh axis has size `0`.
    #[error("mesh axis '{axis}' must have size > 0")]
    InvalidMeshAxisSize { axis: String },

    /// Error returned when mesh axis names are not unique.
    #[error("mesh axis '{axis}' appears more than once")]
    DuplicateMeshAxisName { axis: String },

    /// Error returned when device IDs in a mesh are not unique.
    #[error("mesh device id {device_id} appears more than once")]
    DuplicateMeshDeviceId { device_id: usize },

    /// Error returned when the number of mesh devices does not match the product of axis sizes.
    #[error("mesh has {actual} device(s), but axis sizes imply {expected} device(s)")]
    MeshDeviceCountMismatch { expected: usize, actual: usize },

    /// Error returned when the product of the mesh axis sizes does not fit in a `usize`.
    #[error("mesh axis sizes {sizes:?} overflow the number of addressable devices")]
    MeshSizeOverflow { sizes: Vec<usize> },

    // -----------------------------------------------------------------------
    // Calls and tracing
    // -----------------------------------------------------------------------
    /// Error returned when a mapped function is called with the wrong number of arguments.
    #[error("xmap expected {expected} argument(s), but got {actual}")]
    ArgumentCountMismatch { expected: usize, actual: usize },

    /// Error returned when a mapped function body returns a different number of results than `out_axes` describes.
    #[error("xmap out_axes describes {expected} output(s), but the function returned {actual}")]
    OutputCountMismatch { expected: usize, actual: usize },

    /// Error returned when a result still varies over a mapped axis that its `out_axes` does not place.
    #[error("xmap output varies over axis {axis}, which is not present in its out_axes specification {spec}")]
    UnmappedOutputAxis { axis: String, spec: String },

    /// Error returned when a donated array is used after the call that consumed it.
    #[error("array has been deleted")]
    DeletedArray,

    /// Error returned when host data does not match the declared array shape.
    #[error("array data has {actual} element(s), but shape {} implies {expected}", format_shape(.shape))]
    InvalidArray { shape: Vec<usize>, expected: usize, actual: usize },

    /// Error returned when a traced value is used outside of the trace that produced it.
    #[error("encountered a traced value that escaped the trace it belongs to")]
    EscapedTracer,

    /// Error returned when an operation that needs an active trace is invoked outside of a mapped function.
    #[error("'{op}' can only be used inside of a mapped function")]
    NoActiveTrace { op: String },

    // -----------------------------------------------------------------------
    // Programs
    // -----------------------------------------------------------------------
    /// Error returned when an operation or program receives the wrong number of inputs.
    #[error("invalid number of inputs; got {got} but expected {expected}")]
    InvalidInputCount { expected: usize, got: usize },

    /// Error returned when a program refers to an atom that no input or expression defines.
    #[error("unbound atom ID: {id}")]
    UnboundAtomId { id: usize },

    /// Error returned when the type inferred for an atom differs from the type recorded for it.
    #[error("expected type {expected} for atom {id} but got {got}")]
    InvalidAtomType { id: usize, expected: String, got: String },

    /// Error returned when an environment-provided configuration value is invalid.
    #[error("invalid value '{value}' for configuration variable '{variable}'")]
    InvalidConfiguration { variable: String, value: String },
}
