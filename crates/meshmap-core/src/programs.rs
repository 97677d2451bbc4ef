//! Traced programs: typed variables, expressions over [`Op`]s, and their interpretation on host values.

use std::{
    borrow::Cow,
    collections::{HashMap, hash_map::Entry},
    fmt::{Debug, Display},
    sync::Arc,
};

use tracing::trace;

use crate::{errors::Error, types::AbstractValue, values::NamedArray};

pub type AtomId = usize;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Variable {
    pub id: AtomId,
    pub tpe: AbstractValue,
}

/// Operation recorded in a [`Program`].
///
/// An [`Op`] knows how to type-check its inputs and how to compute its outputs on host values. Interpretation is the
/// only execution strategy: it is meant to be correct rather than fast.
pub trait Op: Display + Debug + Send + Sync {
    /// Type checks the operation's inputs and returns the types of its outputs.
    fn infer_output_types(&self, input_types: &[&AbstractValue]) -> Result<Vec<AbstractValue>, Error>;

    /// Computes the operation's outputs from its input values.
    fn interpret(&self, inputs: &[&NamedArray]) -> Result<Vec<NamedArray>, Error>;
}

#[macro_export]
macro_rules! assert_input_count_matches {
    ($input_count:expr, $expected_input_count:expr) => {
        let input_count = $input_count;
        let expected_input_count = $expected_input_count;
        if input_count != expected_input_count {
            return Err($crate::errors::Error::InvalidInputCount { expected: expected_input_count, got: input_count });
        }
    };
}

#[derive(Clone, Debug)]
pub struct Expression {
    pub op: Arc<dyn Op>,
    pub inputs: Vec<AtomId>,
    pub outputs: Vec<AtomId>,
}

#[derive(Clone, Debug)]
pub struct Program {
    pub inputs: Vec<Variable>,
    pub variables: Vec<Variable>,
    pub expressions: Vec<Expression>,
    /// Program outputs. Unlike expression outputs, these may repeat and may refer to inputs.
    pub outputs: Vec<Variable>,
}

impl Program {
    #[inline]
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    #[inline]
    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Re-infers the type of every atom and checks it against the recorded types.
    pub fn type_check(&self) -> Result<(), Error> {
        let mut atom_types = HashMap::new();
        for input in &self.inputs {
            atom_types.insert(input.id, input.tpe.clone());
        }

        for expression in &self.expressions {
            let mut input_types = Vec::with_capacity(expression.inputs.len());
            for input_id in &expression.inputs {
                let Some(input_type) = atom_types.get(input_id) else {
                    return Err(Error::UnboundAtomId { id: *input_id });
                };
                input_types.push(input_type);
            }
            let output_types = expression.op.infer_output_types(input_types.as_slice())?;
            for (output_id, output_type) in expression.outputs.iter().zip(output_types) {
                match atom_types.entry(*output_id) {
                    Entry::Occupied(_) => return Err(Error::UnboundAtomId { id: *output_id }),
                    Entry::Vacant(entry) => _ = entry.insert(output_type),
                }
            }
        }

        for output in &self.outputs {
            let Some(output_type) = atom_types.get(&output.id) else {
                return Err(Error::UnboundAtomId { id: output.id });
            };
            if output_type != &output.tpe {
                return Err(Error::InvalidAtomType {
                    id: output.id,
                    expected: output.tpe.to_string(),
                    got: output_type.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Interprets this [`Program`] on `inputs`, returning one value per program output.
    pub fn interpret(&self, inputs: &[&NamedArray]) -> Result<Vec<NamedArray>, Error> {
        assert_input_count_matches!(inputs.len(), self.inputs.len());

        // Atom IDs are contiguous and start at 0, so the environment can be indexed by them directly. Inputs are
        // borrowed and only the values computed here are owned.
        let environment_len = self.inputs.len() + self.variables.len();
        let mut environment: Vec<Option<Cow<'_, NamedArray>>> = vec![None; environment_len];
        for (variable, value) in self.inputs.iter().zip(inputs) {
            environment[variable.id] = Some(Cow::Borrowed(*value));
        }

        for expression in &self.expressions {
            let mut values = Vec::with_capacity(expression.inputs.len());
            for input in &expression.inputs {
                let Some(value) = environment.get(*input).and_then(Option::as_ref) else {
                    return Err(Error::UnboundAtomId { id: *input });
                };
                values.push(value.as_ref());
            }
            trace!(op = %expression.op, inputs = ?expression.inputs, "interpreting expression");
            let outputs = expression.op.interpret(values.as_slice())?;
            for (atom_id, value) in expression.outputs.iter().zip(outputs) {
                environment[*atom_id] = Some(Cow::Owned(value));
            }
        }

        self.outputs
            .iter()
            .map(|output| match environment.get(output.id).and_then(Option::as_ref) {
                Some(value) => Ok(value.clone().into_owned()),
                None => Err(Error::UnboundAtomId { id: output.id }),
            })
            .collect()
    }
}

impl Display for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inputs = self
            .inputs
            .iter()
            .map(|input| format!("%{}:{}", input.id, input.tpe))
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(f, "lambda {inputs} .")?;
        for (index, expression) in self.expressions.iter().enumerate() {
            let inputs = expression.inputs.iter().map(|input| format!(" %{input}")).collect::<String>();
            let outputs = expression.outputs.iter().map(|output| format!("%{output}")).collect::<Vec<_>>().join(", ");
            let prefix = if index == 0 { "let" } else { "   " };
            writeln!(f, "{prefix} {outputs} = {}{inputs}", expression.op)?;
        }
        let outputs = self.outputs.iter().map(|output| format!("%{}", output.id)).collect::<Vec<_>>().join(", ");
        write!(f, "in ({outputs})")
    }
}

#[derive(Clone, Debug, Default)]
pub struct ProgramBuilder {
    variables: Vec<Variable>,
    expressions: Vec<Expression>,
    atom_types: HashMap<AtomId, AbstractValue>,
}

impl ProgramBuilder {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn atom_type(&self, atom_id: AtomId) -> Option<&AbstractValue> {
        self.atom_types.get(&atom_id)
    }

    pub fn add_variable(&mut self, tpe: AbstractValue) -> AtomId {
        let id = self.variables.len();
        self.atom_types.insert(id, tpe.clone());
        self.variables.push(Variable { id, tpe });
        id
    }

    pub fn add_expression(&mut self, op: Arc<dyn Op>, inputs: Vec<AtomId>) -> Result<Vec<AtomId>, Error> {
        let input_types = inputs
            .iter()
            .map(|input| self.atom_types.get(input).ok_or(Error::UnboundAtomId { id: *input }))
            .collect::<Result<Vec<_>, Error>>()?;
        let output_types = op.infer_output_types(input_types.as_slice())?;
        let outputs = output_types.into_iter().map(|output_type| self.add_variable(output_type)).collect::<Vec<_>>();
        self.expressions.push(Expression { op, inputs, outputs: outputs.clone() });
        Ok(outputs)
    }

    /// Builds a [`Program`] whose inputs are the variables `inputs` and whose outputs are the variables `outputs`.
    pub fn build(self, inputs: Vec<AtomId>, outputs: Vec<AtomId>) -> Result<Program, Error> {
        let lookup = |id: &AtomId| {
            let variable = self.variables.get(*id).filter(|variable| variable.id == *id);
            variable.cloned().ok_or(Error::UnboundAtomId { id: *id })
        };
        let input_variables = inputs.iter().map(lookup).collect::<Result<Vec<_>, _>>()?;
        let output_variables = outputs.iter().map(lookup).collect::<Result<Vec<_>, _>>()?;
        let variables = self.variables.into_iter().filter(|variable| !inputs.contains(&variable.id)).collect();
        let program =
            Program { inputs: input_variables, variables, expressions: self.expressions, outputs: output_variables };
        program.type_check()?;
        Ok(program)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use ndarray::array;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::types::{DataType, NamedShape};

    #[derive(Debug)]
    struct Double;

    impl Display for Double {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "double")
        }
    }

    impl Op for Double {
        fn infer_output_types(&self, input_types: &[&AbstractValue]) -> Result<Vec<AbstractValue>, Error> {
            assert_input_count_matches!(input_types.len(), 1);
            Ok(vec![input_types[0].clone()])
        }

        fn interpret(&self, inputs: &[&NamedArray]) -> Result<Vec<NamedArray>, Error> {
            assert_input_count_matches!(inputs.len(), 1);
            Ok(vec![inputs[0].map(|value| 2.0 * value)])
        }
    }

    fn test_program() -> Program {
        let mut builder = ProgramBuilder::new();
        let tpe = AbstractValue::new(DataType::Float32, vec![2], NamedShape::from_axes([("i", 3)]));
        let x = builder.add_variable(tpe);
        let y = builder.add_expression(Arc::new(Double), vec![x]).unwrap()[0];
        let z = builder.add_expression(Arc::new(Double), vec![y]).unwrap()[0];
        builder.build(vec![x], vec![z, x]).unwrap()
    }

    #[test]
    fn test_program_rendering() {
        assert_eq!(
            test_program().to_string(),
            indoc! {"
                lambda %0:float32[2]{i:3} .
                let %1 = double %0
                    %2 = double %1
                in (%2, %0)"},
        );
    }

    #[test]
    fn test_program_interpret() {
        let program = test_program();
        assert_eq!(program.input_count(), 1);
        assert_eq!(program.output_count(), 2);
        let input = NamedArray::new(vec!["i".to_string()], array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]].into_dyn())
            .unwrap();
        let outputs = program.interpret(&[&input]).unwrap();
        assert_eq!(outputs[0].data(), &array![[4.0, 8.0], [12.0, 16.0], [20.0, 24.0]].into_dyn());
        assert_eq!(outputs[1], input);
        assert_eq!(program.interpret(&[]), Err(Error::InvalidInputCount { expected: 1, got: 0 }));
    }

    #[test]
    fn test_builder_rejects_unbound_atoms() {
        let mut builder = ProgramBuilder::new();
        assert!(matches!(
            builder.add_expression(Arc::new(Double), vec![3]),
            Err(Error::UnboundAtomId { id: 3 }),
        ));
        assert!(matches!(builder.build(vec![], vec![0]), Err(Error::UnboundAtomId { id: 0 })));
    }
}
