//! Mapping functions over named axes.
//!
//! [`xmap`] turns a function of positional values into a function that is applied independently along a set of
//! named (logical) axes. For every argument, `in_axes` says which dimensions are logical axes. For every result,
//! `out_axes` says where they are reinserted. Inside the body those dimensions are invisible: values only carry their
//! remaining positional dimensions and a named shape listing the logical axes they vary over. Logical axes can be
//! distributed over the axes of the active [`Mesh`] through `axis_resources`.
//!
//! ```ignore
//! let double = xmap(|inputs| Ok(vec![inputs[0].scale(2.0)?]))
//!     .in_axes(vec![AxisSpec::leading(["a"])])
//!     .out_axes(vec![AxisSpec::leading(["a"])])
//!     .axis_resource("a", ["x"])
//!     .build()?;
//! let _mesh = mesh(&[("x", 2)])?;
//! let outputs = double.call(&[&Array::arange(DataType::Float32, &[4])])?;
//! ```
//!
//! Calling a mapped function outside of any trace lowers it for the abstract signature of its arguments (through the
//! process-wide [`CallCache`](crate::cache::CallCache)) and interprets the resulting program. Inside the body of
//! another mapped function, [`Xmap::trace`] records the nested function in the enclosing program instead.

use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
    fmt::Display,
    rc::Rc,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tracing::debug;

use crate::{
    arrays::Array,
    assert_input_count_matches,
    axes::{AxisResources, AxisSpec, Side},
    cache::{self, CacheKey, Lowered},
    config::{Config, LoweringStrategy},
    errors::Error,
    inference::{AxisSizeTable, infer_axis_sizes},
    mesh::{self, Mesh},
    programs::{Op, Program, ProgramBuilder},
    resources::ShardingPlan,
    sharding::ShardingSpec,
    tracer::{AxisBinding, TraceFrame, Tracer, apply, bound_axis_names, claimed_resources, current_frame, push_frame},
    types::{AbstractValue, NamedShape},
    values::NamedArray,
};

/// Body of a mapped function.
pub type Body = dyn Fn(&[Tracer]) -> Result<Vec<Tracer>, Error> + Send + Sync;

static NEXT_FUNCTION_ID: AtomicU64 = AtomicU64::new(0);
static NEXT_VMAP_AXIS: AtomicU64 = AtomicU64::new(0);

/// Starts building a mapped version of `body`.
pub fn xmap<F>(body: F) -> XmapBuilder
where
    F: Fn(&[Tracer]) -> Result<Vec<Tracer>, Error> + Send + Sync + 'static,
{
    XmapBuilder {
        body: Arc::new(body),
        in_axes: Vec::new(),
        out_axes: Vec::new(),
        axis_resources: AxisResources::new(),
        axis_sizes: Vec::new(),
        donate_argnums: Vec::new(),
        lowering_strategy: None,
    }
}

/// Vectorizes `body` over a fresh anonymous axis.
///
/// `in_axes[i]` is the dimension of argument `i` that is mapped over, or `None` if the argument is shared by every
/// element. The mapped axis of the result is inserted at dimension `out_axes`.
pub fn vmap<F>(body: F, in_axes: Vec<Option<usize>>, out_axes: usize) -> Result<Xmap, Error>
where
    F: Fn(&[Tracer]) -> Result<Vec<Tracer>, Error> + Send + Sync + 'static,
{
    let axis = format!("_vmap{}", NEXT_VMAP_AXIS.fetch_add(1, Ordering::Relaxed));
    let in_axes = in_axes
        .into_iter()
        .map(|dimension| match dimension {
            Some(dimension) => AxisSpec::positional([(dimension as isize, axis.as_str())]),
            None => AxisSpec::empty(),
        })
        .collect();
    xmap(body).in_axes(in_axes).out_axes(vec![AxisSpec::positional([(out_axes as isize, axis.as_str())])]).build()
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct XmapBuilder {
    body: Arc<Body>,
    in_axes: Vec<AxisSpec>,
    out_axes: Vec<AxisSpec>,
    axis_resources: AxisResources,
    axis_sizes: Vec<(String, usize)>,
    donate_argnums: Vec<usize>,
    lowering_strategy: Option<LoweringStrategy>,
}

impl XmapBuilder {
    /// One specification per argument.
    pub fn in_axes(mut self, in_axes: Vec<AxisSpec>) -> Self {
        self.in_axes = in_axes;
        self
    }

    /// One specification per result.
    pub fn out_axes(mut self, out_axes: Vec<AxisSpec>) -> Self {
        self.out_axes = out_axes;
        self
    }

    /// Splits logical axis `axis` over the mesh axes `resources`, major to minor.
    pub fn axis_resource<A, I, R>(mut self, axis: A, resources: I) -> Self
    where
        A: Into<String>,
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        self.axis_resources.insert(axis, resources);
        self
    }

    pub fn axis_resources(mut self, axis_resources: AxisResources) -> Self {
        self.axis_resources = axis_resources;
        self
    }

    /// Declares the size of logical axis `axis`, which is then checked against every argument.
    pub fn axis_size<A: Into<String>>(mut self, axis: A, size: usize) -> Self {
        let axis = axis.into();
        match self.axis_sizes.iter_mut().find(|(existing, _)| *existing == axis) {
            Some((_, existing)) => *existing = size,
            None => self.axis_sizes.push((axis, size)),
        }
        self
    }

    /// Arguments whose arrays are deleted after every call. Indices past the last argument are ignored.
    pub fn donate_argnums(mut self, donate_argnums: Vec<usize>) -> Self {
        self.donate_argnums = donate_argnums;
        self
    }

    /// Overrides the lowering strategy configured through `MESHMAP_SPMD_LOWERING`.
    pub fn lowering_strategy(mut self, lowering_strategy: LoweringStrategy) -> Self {
        self.lowering_strategy = Some(lowering_strategy);
        self
    }

    pub fn build(self) -> Result<Xmap, Error> {
        for spec in &self.in_axes {
            spec.validate(Side::Input)?;
        }
        for spec in &self.out_axes {
            spec.validate(Side::Output)?;
        }
        self.axis_resources.check_distinct()?;
        if let Some((axis, _)) = self.axis_sizes.iter().find(|(_, size)| *size == 0) {
            return Err(Error::InvalidAxisSize { axis: axis.clone() });
        }
        let lowering_strategy = match self.lowering_strategy {
            Some(lowering_strategy) => lowering_strategy,
            None => Config::global()?.lowering_strategy,
        };
        Ok(Xmap {
            function_id: NEXT_FUNCTION_ID.fetch_add(1, Ordering::Relaxed),
            body: self.body,
            in_axes: self.in_axes,
            out_axes: self.out_axes,
            axis_resources: self.axis_resources,
            axis_sizes: self.axis_sizes,
            donate_argnums: self.donate_argnums,
            lowering_strategy,
        })
    }
}

// ---------------------------------------------------------------------------
// Mapped functions
// ---------------------------------------------------------------------------

/// Function mapped over named axes, created by [`xmap`] or [`vmap`].
///
/// Clones share the function identity, and therefore the cached lowerings.
#[derive(Clone)]
pub struct Xmap {
    function_id: u64,
    body: Arc<Body>,
    in_axes: Vec<AxisSpec>,
    out_axes: Vec<AxisSpec>,
    axis_resources: AxisResources,
    axis_sizes: Vec<(String, usize)>,
    donate_argnums: Vec<usize>,
    lowering_strategy: LoweringStrategy,
}

impl std::fmt::Debug for Xmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Xmap")
            .field("function_id", &self.function_id)
            .field("in_axes", &self.in_axes)
            .field("out_axes", &self.out_axes)
            .field("axis_resources", &self.axis_resources)
            .field("axis_sizes", &self.axis_sizes)
            .field("lowering_strategy", &self.lowering_strategy)
            .finish_non_exhaustive()
    }
}

/// Everything a call needs besides the lowered program.
struct CallPlan {
    table: AxisSizeTable,
    in_positions: Vec<BTreeMap<usize, String>>,
    sharding_plan: ShardingPlan,
    mesh: Mesh,
    lowered: Arc<Lowered>,
}

impl Xmap {
    pub fn function_id(&self) -> u64 {
        self.function_id
    }

    pub fn lowering_strategy(&self) -> LoweringStrategy {
        self.lowering_strategy
    }

    /// Lowers this function for the abstract signature of `arguments` under the active mesh.
    pub fn lower(&self, arguments: &[&Array]) -> Result<Arc<Lowered>, Error> {
        Ok(self.plan(arguments)?.lowered)
    }

    fn plan(&self, arguments: &[&Array]) -> Result<CallPlan, Error> {
        if arguments.len() != self.in_axes.len() {
            return Err(Error::ArgumentCountMismatch { expected: self.in_axes.len(), actual: arguments.len() });
        }
        if arguments.iter().any(|argument| argument.is_deleted()) {
            return Err(Error::DeletedArray);
        }

        let mesh = mesh::current();
        let shapes = arguments.iter().map(|argument| argument.shape()).collect::<Vec<_>>();
        let (table, in_positions) = infer_axis_sizes(&self.axis_sizes, &shapes, &self.in_axes)?;
        table.require(self.required_axes())?;
        let sharding_plan = ShardingPlan::resolve(&table, &self.axis_resources, &mesh, &HashMap::new())?;

        let (mesh_axes, mesh_devices) = CacheKey::mesh_signature(&mesh);
        let key = CacheKey {
            function_id: self.function_id,
            arguments: arguments.iter().map(|argument| (argument.data_type(), argument.shape().to_vec())).collect(),
            in_axes: self.in_axes.clone(),
            out_axes: self.out_axes.clone(),
            axis_resources: self.axis_resources.clone(),
            axis_sizes: self.axis_sizes.clone(),
            mesh_axes,
            mesh_devices,
            lowering_strategy: self.lowering_strategy,
        };
        let argument_types = arguments
            .iter()
            .zip(&in_positions)
            .map(|(argument, positions)| {
                named_type(&AbstractValue::positional(argument.data_type(), argument.shape().to_vec()), positions)
            })
            .collect::<Vec<_>>();
        let lowered =
            cache::global().get_or_lower(key, || self.lower_body(&argument_types, &table, &sharding_plan, &mesh))?;
        Ok(CallPlan { table, in_positions, sharding_plan, mesh, lowered })
    }

    /// Calls this function on `arguments`, returning one array per entry of `out_axes`.
    ///
    /// Every output carries the [`ShardingSpec`] describing how it is laid out over the active mesh. Donated
    /// arguments are deleted once the call succeeds.
    pub fn call(&self, arguments: &[&Array]) -> Result<Vec<Array>, Error> {
        let CallPlan { table, in_positions, sharding_plan, mesh, lowered } = self.plan(arguments)?;

        let inputs = arguments
            .iter()
            .zip(&in_positions)
            .map(|(argument, positions)| NamedArray::positional(argument.to_ndarray()?).to_named(positions))
            .collect::<Result<Vec<_>, _>>()?;
        let outputs = lowered.program.interpret(&inputs.iter().collect::<Vec<_>>())?;

        let size_of = |name: &str| table.size(name).unwrap_or(1);
        let outputs = outputs
            .into_iter()
            .zip(&lowered.out_positions)
            .zip(&lowered.program.outputs)
            .map(|((output, positions), variable)| {
                let data = output.to_positional(positions, size_of)?.into_data();
                let spec = ShardingSpec::for_output(&sharding_plan, positions, data.ndim(), &mesh);
                Ok(Array::from_ndarray(variable.tpe.data_type, data).with_sharding(spec, mesh.clone()))
            })
            .collect::<Result<Vec<_>, Error>>()?;

        for index in &self.donate_argnums {
            if let Some(argument) = arguments.get(*index) {
                debug!(function_id = self.function_id, argument = index, "donating argument");
                argument.delete();
            }
        }
        Ok(outputs)
    }

    /// Records a call of this function on traced `arguments` in the enclosing trace.
    ///
    /// The nested function may not bind any logical axis that an enclosing mapped function binds, but its body can
    /// use collectives over the enclosing axes. It is traced under the active mesh, which must be the mesh the
    /// enclosing function is traced under or one that extends it.
    pub fn trace(&self, arguments: &[&Tracer]) -> Result<Vec<Tracer>, Error> {
        let Some(outer) = current_frame() else {
            return Err(Error::NoActiveTrace { op: "xmap".to_string() });
        };
        if arguments.len() != self.in_axes.len() {
            return Err(Error::ArgumentCountMismatch { expected: self.in_axes.len(), actual: arguments.len() });
        }

        let mesh = mesh::current();
        if !outer.mesh.is_empty() && !mesh.extends(&outer.mesh) {
            return Err(Error::ResourceEnvironmentChanged);
        }
        let bound = bound_axis_names();
        if let Some(axis) = self.required_axes().find(|axis| bound.iter().any(|name| name == axis)) {
            return Err(Error::AxisNameConflict { axis: axis.to_string() });
        }

        let shapes = arguments.iter().map(|argument| argument.shape()).collect::<Vec<_>>();
        let (table, in_positions) = infer_axis_sizes(&self.axis_sizes, &shapes, &self.in_axes)?;
        table.require(self.required_axes())?;
        let sharding_plan = ShardingPlan::resolve(&table, &self.axis_resources, &mesh, &claimed_resources())?;

        let argument_types = arguments
            .iter()
            .zip(&in_positions)
            .map(|(argument, positions)| named_type(argument.tpe(), positions))
            .collect::<Vec<_>>();
        let lowered = self.trace_body(&argument_types, &table, &sharding_plan, &mesh, outer.lowering_strategy)?;
        let op = NestedXmapOp {
            program: lowered.program,
            in_positions,
            out_positions: lowered.out_positions,
            axis_sizes: table.sizes(),
        };
        apply(Arc::new(op), arguments, "xmap")
    }

    fn required_axes(&self) -> impl Iterator<Item = &str> {
        self.in_axes
            .iter()
            .chain(&self.out_axes)
            .flat_map(AxisSpec::names)
            .chain(self.axis_resources.iter().map(|(axis, _)| axis))
            .chain(self.axis_sizes.iter().map(|(axis, _)| axis.as_str()))
    }

    fn lower_body(
        &self,
        argument_types: &[AbstractValue],
        table: &AxisSizeTable,
        sharding_plan: &ShardingPlan,
        mesh: &Mesh,
    ) -> Result<Lowered, Error> {
        debug!(function_id = self.function_id, mesh = %mesh, "lowering mapped function");
        self.trace_body(argument_types, table, sharding_plan, mesh, self.lowering_strategy)
    }

    /// Traces the body with one input per entry of `argument_types` in a new trace frame binding the axes of `table`.
    fn trace_body(
        &self,
        argument_types: &[AbstractValue],
        table: &AxisSizeTable,
        sharding_plan: &ShardingPlan,
        mesh: &Mesh,
        lowering_strategy: LoweringStrategy,
    ) -> Result<Lowered, Error> {
        let builder = Rc::new(RefCell::new(ProgramBuilder::new()));
        let inputs = argument_types
            .iter()
            .map(|tpe| Tracer::new(builder.borrow_mut().add_variable(tpe.clone()), tpe.clone(), builder.clone()))
            .collect::<Vec<_>>();
        let bindings = sharding_plan
            .assignments()
            .iter()
            .map(|assignment| AxisBinding {
                name: assignment.axis().to_string(),
                size: assignment.size(),
                resources: assignment
                    .resources()
                    .iter()
                    .map(|resource| (resource.name().to_string(), resource.size()))
                    .collect(),
            })
            .collect();
        let frame = TraceFrame { builder: builder.clone(), mesh: mesh.clone(), bindings, lowering_strategy };

        let outputs = {
            let _guard = push_frame(frame);
            (self.body)(&inputs)?
        };
        if outputs.len() != self.out_axes.len() {
            return Err(Error::OutputCountMismatch { expected: self.out_axes.len(), actual: outputs.len() });
        }

        let size_of = |name: &str| table.size(name).unwrap_or(1);
        let mut out_positions = Vec::with_capacity(outputs.len());
        for (output, spec) in outputs.iter().zip(&self.out_axes) {
            if !Rc::ptr_eq(output.builder(), &builder) {
                return Err(Error::EscapedTracer);
            }
            let names = spec.names();
            let mut unmapped = output.named_shape().names().filter(|axis| table.size(axis).is_some());
            let unmapped = unmapped.find(|axis| !names.contains(axis));
            if let Some(axis) = unmapped {
                return Err(Error::UnmappedOutputAxis { axis: axis.to_string(), spec: spec.to_string() });
            }
            out_positions.push(spec.resolve_output(output.shape(), size_of)?);
        }

        let input_ids = inputs.iter().map(Tracer::id).collect();
        let output_ids = outputs.iter().map(Tracer::id).collect();
        let program = builder.take().build(input_ids, output_ids)?;
        Ok(Lowered { program, out_positions })
    }
}

/// Type of an argument of shape `tpe.shape` inside a mapped function that binds the dimensions at `positions`.
fn named_type(tpe: &AbstractValue, positions: &BTreeMap<usize, String>) -> AbstractValue {
    let mut named_shape = tpe.named_shape.clone();
    for (position, name) in positions {
        named_shape.insert(name.clone(), tpe.shape[*position]);
    }
    let shape = tpe
        .shape
        .iter()
        .enumerate()
        .filter(|(position, _)| !positions.contains_key(position))
        .map(|(_, size)| *size)
        .collect();
    AbstractValue::new(tpe.data_type, shape, named_shape)
}

// ---------------------------------------------------------------------------
// Nested mapped functions
// ---------------------------------------------------------------------------

/// Call of a mapped function traced inside the body of another mapped function.
#[derive(Debug)]
pub struct NestedXmapOp {
    program: Program,
    in_positions: Vec<BTreeMap<usize, String>>,
    out_positions: Vec<BTreeMap<usize, String>>,
    axis_sizes: Vec<(String, usize)>,
}

impl NestedXmapOp {
    fn axis_size(&self, name: &str) -> Option<usize> {
        self.axis_sizes.iter().find(|(axis, _)| axis == name).map(|(_, size)| *size)
    }
}

impl Display for NestedXmapOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let axes = self.axis_sizes.iter().map(|(name, size)| format!("{name}:{size}")).collect::<Vec<_>>();
        write!(f, "xmap[{}]", axes.join(", "))
    }
}

impl Op for NestedXmapOp {
    fn infer_output_types(&self, input_types: &[&AbstractValue]) -> Result<Vec<AbstractValue>, Error> {
        assert_input_count_matches!(input_types.len(), self.program.input_count());
        for ((input_type, positions), variable) in input_types.iter().zip(&self.in_positions).zip(&self.program.inputs)
        {
            if positions.keys().any(|position| *position >= input_type.rank())
                || named_type(input_type, positions) != variable.tpe
            {
                return Err(Error::IncompatibleShapes {
                    op: "xmap".to_string(),
                    message: format!("argument of type {input_type} does not match the traced type {}", variable.tpe),
                });
            }
        }

        Ok(self
            .program
            .outputs
            .iter()
            .zip(&self.out_positions)
            .map(|(variable, positions)| {
                let mut shape = variable.tpe.shape.clone();
                for (position, name) in positions {
                    shape.insert((*position).min(shape.len()), self.axis_size(name).unwrap_or(1));
                }
                let named_shape = NamedShape::from_axes(
                    variable.tpe.named_shape.axes().iter().filter(|(name, _)| self.axis_size(name).is_none()).cloned(),
                );
                AbstractValue::new(variable.tpe.data_type, shape, named_shape)
            })
            .collect())
    }

    fn interpret(&self, inputs: &[&NamedArray]) -> Result<Vec<NamedArray>, Error> {
        assert_input_count_matches!(inputs.len(), self.program.input_count());
        let inputs = inputs
            .iter()
            .zip(&self.in_positions)
            .map(|(input, positions)| input.to_named(positions))
            .collect::<Result<Vec<_>, _>>()?;
        let outputs = self.program.interpret(&inputs.iter().collect::<Vec<_>>())?;
        outputs
            .iter()
            .zip(&self.out_positions)
            .map(|(output, positions)| output.to_positional(positions, |name| self.axis_size(name).unwrap_or(1)))
            .collect()
    }
}
