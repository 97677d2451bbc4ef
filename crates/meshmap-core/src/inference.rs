//! Inference of logical axis sizes from arguments and explicit declarations.
//!
//! The first observation of an axis fixes its size. Explicit `axis_sizes` declarations are observed before any
//! argument, so they take precedence and every argument is checked against them.

use std::collections::BTreeMap;

use crate::{axes::AxisSpec, errors::Error};

/// Where the size of a logical axis was first observed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Provenance {
    /// The size was declared through `axis_sizes`.
    Declared,
    /// The size was read from dimension `dimension` of argument `argument`.
    Argument { argument: usize, dimension: usize },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AxisSizeEntry {
    pub name: String,
    pub size: usize,
    pub provenance: Provenance,
}

/// Logical axis sizes for one call, in first-observation order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct AxisSizeTable {
    entries: Vec<AxisSizeEntry>,
}

impl AxisSizeTable {
    /// Creates a table seeded with explicitly declared sizes.
    pub fn with_declared(declared: &[(String, usize)]) -> Result<Self, Error> {
        let mut table = Self::default();
        for (name, size) in declared {
            if *size == 0 {
                return Err(Error::InvalidAxisSize { axis: name.clone() });
            }
            if table.size(name).is_none() {
                table.entries.push(AxisSizeEntry { name: name.clone(), size: *size, provenance: Provenance::Declared });
            }
        }
        Ok(table)
    }

    /// Records the named dimensions of argument `argument`, whose shape is `shape` and whose specification `spec`
    /// resolved to `positions`.
    pub fn observe(
        &mut self,
        argument: usize,
        shape: &[usize],
        spec: &AxisSpec,
        positions: &BTreeMap<usize, String>,
    ) -> Result<(), Error> {
        for (dimension, name) in positions {
            let actual = shape[*dimension];
            match self.entries.iter().find(|entry| entry.name == *name) {
                Some(entry) if entry.size != actual => {
                    return Err(Error::AxisSizeMismatch {
                        axis: name.clone(),
                        expected: entry.size,
                        actual,
                        shape: shape.to_vec(),
                        spec: spec.to_string(),
                        dimension: *dimension,
                    });
                }
                Some(_) => {}
                None => self.entries.push(AxisSizeEntry {
                    name: name.clone(),
                    size: actual,
                    provenance: Provenance::Argument { argument, dimension: *dimension },
                }),
            }
        }
        Ok(())
    }

    /// Checks that every axis in `names` has a known size.
    pub fn require<'a, I: IntoIterator<Item = &'a str>>(&self, names: I) -> Result<(), Error> {
        let mut missing = names.into_iter().filter(|name| self.size(name).is_none()).collect::<Vec<_>>();
        if missing.is_empty() {
            return Ok(());
        }
        missing.sort_unstable();
        missing.dedup();
        Err(Error::UnresolvedAxisSize { axes: missing.into_iter().map(str::to_string).collect() })
    }

    pub fn size(&self, name: &str) -> Option<usize> {
        self.entry(name).map(|entry| entry.size)
    }

    pub fn entry(&self, name: &str) -> Option<&AxisSizeEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn entries(&self) -> &[AxisSizeEntry] {
        self.entries.as_slice()
    }

    /// Returns `(name, size)` pairs in first-observation order.
    pub fn sizes(&self) -> Vec<(String, usize)> {
        self.entries.iter().map(|entry| (entry.name.clone(), entry.size)).collect()
    }
}

/// Infers axis sizes for a call whose arguments have `shapes` and specifications `specs`.
///
/// Returns the table together with the resolved named positions of every argument.
pub fn infer_axis_sizes(
    declared: &[(String, usize)],
    shapes: &[&[usize]],
    specs: &[AxisSpec],
) -> Result<(AxisSizeTable, Vec<BTreeMap<usize, String>>), Error> {
    let mut table = AxisSizeTable::with_declared(declared)?;
    let mut positions = Vec::with_capacity(shapes.len());
    for (argument, (shape, spec)) in shapes.iter().zip(specs).enumerate() {
        let argument_positions = spec.resolve_input(shape)?;
        table.observe(argument, shape, spec, &argument_positions)?;
        positions.push(argument_positions);
    }
    Ok((table, positions))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_infer_axis_sizes_from_arguments() {
        let specs = vec![AxisSpec::positional([(0, "a"), (1, "b")]), AxisSpec::leading(["c"])];
        let (table, positions) = infer_axis_sizes(&[], &[&[16, 8, 5][..], &[2, 7][..]], &specs).unwrap();
        assert_eq!(table.sizes(), vec![("a".to_string(), 16), ("b".to_string(), 8), ("c".to_string(), 2)]);
        assert_eq!(table.entry("b").unwrap().provenance, Provenance::Argument { argument: 0, dimension: 1 });
        assert_eq!(positions[1], BTreeMap::from([(0, "c".to_string())]));
    }

    #[test]
    fn test_axis_size_mismatch_between_arguments() {
        let specs = vec![AxisSpec::leading(["i"]), AxisSpec::leading(["i"])];
        let error = infer_axis_sizes(&[], &[&[5][..], &[6][..]], &specs).unwrap_err();
        assert_eq!(
            error.to_string(),
            "The size of axis i was previously inferred to be 5, but found an argument of shape (6,) with in_axes \
             specification ['i', ...]. Shape mismatch occurs in dimension 0: 6 != 5",
        );
    }

    #[test]
    fn test_declared_sizes_take_precedence() {
        let specs = vec![AxisSpec::leading(["i"])];
        let error = infer_axis_sizes(&[("i".to_string(), 5)], &[&[6][..]], &specs).unwrap_err();
        assert!(matches!(error, Error::AxisSizeMismatch { expected: 5, actual: 6, dimension: 0, .. }));

        let (table, _) = infer_axis_sizes(&[("i".to_string(), 6)], &[], &[]).unwrap();
        assert_eq!(table.entry("i").unwrap().provenance, Provenance::Declared);
        assert!(matches!(
            AxisSizeTable::with_declared(&[("i".to_string(), 0)]),
            Err(Error::InvalidAxisSize { axis }) if axis == "i",
        ));
    }

    #[test]
    fn test_unresolved_axis_sizes() {
        let table = AxisSizeTable::with_declared(&[("k".to_string(), 2)]).unwrap();
        assert!(table.require(["k"]).is_ok());
        let error = table.require(["j", "i", "k", "i"]).unwrap_err();
        assert_eq!(error, Error::UnresolvedAxisSize { axes: vec!["i".to_string(), "j".to_string()] });
        assert_eq!(error.to_string(), "Failed to infer size of axes: i, j.");
    }
}
