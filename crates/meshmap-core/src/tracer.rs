//! Tracers and the stack of active trace frames.
//!
//! Mapped function bodies never see data. They receive [`Tracer`]s, and every operation on a tracer records an
//! expression in the [`ProgramBuilder`] of the innermost active [`TraceFrame`]. Each frame also records the logical
//! axes its mapped function binds and where they live on the mesh, so collectives can resolve axis names against
//! every enclosing mapped function without capturing any of their state.

use std::{cell::RefCell, collections::HashMap, fmt::Display, rc::Rc, sync::Arc};

use tracing::debug;

use crate::{
    config::LoweringStrategy,
    errors::Error,
    mesh::Mesh,
    programs::{AtomId, Op, ProgramBuilder},
    types::{AbstractValue, DataType, NamedShape},
};

#[derive(Clone)]
pub struct Tracer {
    id: AtomId,
    tpe: AbstractValue,
    builder: Rc<RefCell<ProgramBuilder>>,
}

impl Tracer {
    pub(crate) fn new(id: AtomId, tpe: AbstractValue, builder: Rc<RefCell<ProgramBuilder>>) -> Self {
        Self { id, tpe, builder }
    }

    #[inline]
    pub fn id(&self) -> AtomId {
        self.id
    }

    #[inline]
    pub fn tpe(&self) -> &AbstractValue {
        &self.tpe
    }

    #[inline]
    pub fn data_type(&self) -> DataType {
        self.tpe.data_type
    }

    /// Positional shape of the traced value.
    #[inline]
    pub fn shape(&self) -> &[usize] {
        self.tpe.shape.as_slice()
    }

    #[inline]
    pub fn named_shape(&self) -> &NamedShape {
        &self.tpe.named_shape
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.tpe.rank()
    }

    pub(crate) fn builder(&self) -> &Rc<RefCell<ProgramBuilder>> {
        &self.builder
    }
}

impl Display for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.id)
    }
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tracer(%{}: {})", self.id, self.tpe)
    }
}

// ---------------------------------------------------------------------------
// Trace frames
// ---------------------------------------------------------------------------

/// Logical axis bound by a mapped function that is being traced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AxisBinding {
    pub name: String,
    pub size: usize,
    /// Mesh axes the logical axis is split over, with their sizes, major to minor.
    pub resources: Vec<(String, usize)>,
}

impl AxisBinding {
    pub fn resource_sizes(&self) -> Vec<usize> {
        self.resources.iter().map(|(_, size)| *size).collect()
    }

    pub fn is_vectorized(&self) -> bool {
        self.resources.is_empty()
    }
}

/// State of one mapped function that is being traced.
pub struct TraceFrame {
    pub builder: Rc<RefCell<ProgramBuilder>>,
    /// Mesh that was active when tracing started.
    pub mesh: Mesh,
    pub bindings: Vec<AxisBinding>,
    pub lowering_strategy: LoweringStrategy,
}

thread_local! {
    static TRACE_FRAMES: RefCell<Vec<Rc<TraceFrame>>> = const { RefCell::new(Vec::new()) };
}

/// Scope guard returned by [`push_frame`]. Dropping it pops the frame and every frame pushed after it.
#[must_use = "the trace frame is popped as soon as the guard is dropped"]
pub struct FrameGuard {
    depth: usize,
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        TRACE_FRAMES.with_borrow_mut(|frames| frames.truncate(self.depth));
    }
}

pub fn push_frame(frame: TraceFrame) -> FrameGuard {
    TRACE_FRAMES.with_borrow_mut(|frames| {
        let depth = frames.len();
        let axes = frame.bindings.iter().map(|binding| binding.name.as_str()).collect::<Vec<_>>();
        debug!(depth, ?axes, "pushing trace frame");
        frames.push(Rc::new(frame));
        FrameGuard { depth }
    })
}

/// Innermost active trace frame, if any.
pub fn current_frame() -> Option<Rc<TraceFrame>> {
    TRACE_FRAMES.with_borrow(|frames| frames.last().cloned())
}

/// Returns `true` if a mapped function is being traced on this thread.
pub fn is_tracing() -> bool {
    TRACE_FRAMES.with_borrow(|frames| !frames.is_empty())
}

/// Looks up `name` in the active frames, innermost first.
///
/// Inside a trace, a name that no frame binds has no size, so the lookup fails with
/// [`Error::UnresolvedAxisSize`]. Outside of any trace it fails with [`Error::UnboundAxisName`].
pub fn lookup_axis(name: &str) -> Result<AxisBinding, Error> {
    TRACE_FRAMES.with_borrow(|frames| {
        if frames.is_empty() {
            return Err(Error::UnboundAxisName { axis: name.to_string() });
        }
        frames
            .iter()
            .rev()
            .find_map(|frame| frame.bindings.iter().find(|binding| binding.name == name).cloned())
            .ok_or_else(|| Error::UnresolvedAxisSize { axes: vec![name.to_string()] })
    })
}

/// Names bound by every active frame.
pub fn bound_axis_names() -> Vec<String> {
    TRACE_FRAMES.with_borrow(|frames| {
        frames.iter().flat_map(|frame| frame.bindings.iter().map(|binding| binding.name.clone())).collect()
    })
}

/// Resources claimed by every active frame, mapped to the logical axis claiming them.
pub fn claimed_resources() -> HashMap<String, String> {
    TRACE_FRAMES.with_borrow(|frames| {
        frames
            .iter()
            .flat_map(|frame| frame.bindings.iter())
            .flat_map(|binding| binding.resources.iter().map(|(resource, _)| (resource.clone(), binding.name.clone())))
            .collect()
    })
}

/// Lowering strategy of the outermost active frame.
pub fn lowering_strategy() -> Option<LoweringStrategy> {
    TRACE_FRAMES.with_borrow(|frames| frames.first().map(|frame| frame.lowering_strategy))
}

/// Records `op` applied to `inputs` in the innermost active frame.
///
/// `name` is only used for error reporting when no frame is active.
pub fn apply(op: Arc<dyn Op>, inputs: &[&Tracer], name: &str) -> Result<Vec<Tracer>, Error> {
    let Some(frame) = current_frame() else {
        if inputs.is_empty() {
            return Err(Error::NoActiveTrace { op: name.to_string() });
        }
        return Err(Error::EscapedTracer);
    };
    if inputs.iter().any(|input| !Rc::ptr_eq(&input.builder, &frame.builder)) {
        return Err(Error::EscapedTracer);
    }
    let mut builder = frame.builder.try_borrow_mut().map_err(|_| Error::EscapedTracer)?;
    let output_ids = builder.add_expression(op, inputs.iter().map(|input| input.id).collect())?;
    output_ids
        .into_iter()
        .map(|id| match builder.atom_type(id) {
            Some(tpe) => Ok(Tracer::new(id, tpe.clone(), frame.builder.clone())),
            None => Err(Error::UnboundAtomId { id }),
        })
        .collect()
}

/// Like [`apply`] for operations with exactly one output.
pub fn apply_unary(op: Arc<dyn Op>, inputs: &[&Tracer], name: &str) -> Result<Tracer, Error> {
    let mut outputs = apply(op, inputs, name)?;
    match outputs.len() {
        1 => Ok(outputs.remove(0)),
        got => Err(Error::InvalidInputCount { expected: 1, got }),
    }
}
