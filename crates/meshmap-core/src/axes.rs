//! Axis specifications: how logical axis names map to positional dimensions of arguments and results.
//!
//! A specification comes in one of two forms:
//!
//! - [`AxisSpec::Positional`] (dict form, rendered `{1: 'i'}`) names individual dimension indices.
//! - [`AxisSpec::OrderedPrefix`] (list form, rendered `['i', None, ...]`) names a prefix of the dimensions, with
//!   `None` leaving a dimension positional. Without the trailing ellipsis the list also asserts the exact rank.
//!
//! For an argument, the named dimensions are removed and become logical axes inside the mapped function. For a
//! result, the logical axes are inserted back at the named positions.

use std::{collections::BTreeMap, fmt::Display};

use crate::errors::Error;

/// Which side of a mapped function an [`AxisSpec`] describes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Input,
    Output,
}

impl Side {
    pub fn argument_name(&self) -> &'static str {
        match self {
            Side::Input => "in_axes",
            Side::Output => "out_axes",
        }
    }
}

/// Maps dimension positions to logical axis names.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AxisSpec {
    Positional(BTreeMap<isize, String>),
    OrderedPrefix { entries: Vec<Option<String>>, ellipsis: bool },
}

impl AxisSpec {
    /// Dict form, e.g. `{0: 'a', 2: 'b'}`.
    pub fn positional<I: IntoIterator<Item = (isize, N)>, N: Into<String>>(entries: I) -> Self {
        Self::Positional(entries.into_iter().map(|(position, name)| (position, name.into())).collect())
    }

    /// The specification that maps no dimensions (`{}`).
    pub fn empty() -> Self {
        Self::Positional(BTreeMap::new())
    }

    /// List form with a trailing ellipsis, e.g. `['i', 'j', ...]`.
    pub fn leading<I: IntoIterator<Item = N>, N: Into<String>>(names: I) -> Self {
        Self::OrderedPrefix { entries: names.into_iter().map(|name| Some(name.into())).collect(), ellipsis: true }
    }

    /// List form without an ellipsis, e.g. `['i', None]`, which also asserts the exact rank.
    pub fn exact<I: IntoIterator<Item = Option<N>>, N: Into<String>>(entries: I) -> Self {
        Self::prefix(entries, false)
    }

    /// List form with explicit entries and ellipsis flag.
    pub fn prefix<I: IntoIterator<Item = Option<N>>, N: Into<String>>(entries: I, ellipsis: bool) -> Self {
        Self::OrderedPrefix { entries: entries.into_iter().map(|entry| entry.map(Into::into)).collect(), ellipsis }
    }

    /// Logical axis names in this specification, in dimension order.
    pub fn names(&self) -> Vec<&str> {
        match self {
            AxisSpec::Positional(entries) => entries.values().map(String::as_str).collect(),
            AxisSpec::OrderedPrefix { entries, .. } => entries.iter().flatten().map(String::as_str).collect(),
        }
    }

    /// Checks the parts of this specification that do not depend on any value: no negative positions and no name
    /// appearing twice.
    pub fn validate(&self, side: Side) -> Result<(), Error> {
        if let AxisSpec::Positional(entries) = self {
            if entries.keys().any(|position| *position < 0) {
                return Err(Error::NegativeAxisUnsupported { side: side.argument_name().to_string() });
            }
        }
        let names = self.names();
        for (index, name) in names.iter().enumerate() {
            if names[..index].contains(name) {
                return Err(Error::DuplicateAxisInSpec {
                    axis: name.to_string(),
                    side: side.argument_name().to_string(),
                    spec: self.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Resolves this specification against an argument of shape `shape`, returning the named dimension positions.
    pub fn resolve_input(&self, shape: &[usize]) -> Result<BTreeMap<usize, String>, Error> {
        self.validate(Side::Input)?;
        let rank = shape.len();
        match self {
            AxisSpec::Positional(entries) => {
                let required = entries.keys().last().map_or(0, |position| *position as usize + 1);
                if rank < required {
                    return Err(Error::InAxesRankError { spec: self.to_string(), required, rank });
                }
            }
            AxisSpec::OrderedPrefix { entries, ellipsis: true } => {
                if rank < entries.len() {
                    return Err(Error::InAxesRankError { spec: self.to_string(), required: entries.len(), rank });
                }
            }
            AxisSpec::OrderedPrefix { entries, ellipsis: false } => {
                if rank != entries.len() {
                    return Err(Error::InAxesRankAssertion {
                        spec: self.to_string(),
                        expected: entries.len(),
                        rank,
                        shape: shape.to_vec(),
                    });
                }
            }
        }
        Ok(self.positions())
    }

    /// Resolves this specification against a result whose positional shape is `shape`, returning the positions at
    /// which the logical axes are inserted. `size_of` returns the size of a logical axis and is used to describe the
    /// full output shape in error messages.
    pub fn resolve_output<F: Fn(&str) -> usize>(
        &self,
        shape: &[usize],
        size_of: F,
    ) -> Result<BTreeMap<usize, String>, Error> {
        self.validate(Side::Output)?;
        let rank = shape.len();
        let named_count = self.names().len();
        match self {
            AxisSpec::Positional(entries) => {
                if let Some(last) = entries.keys().last().map(|position| *position as usize) {
                    if last >= rank + named_count {
                        return Err(Error::OutAxesRankError {
                            spec: self.to_string(),
                            required: last + 1 - named_count,
                            rank,
                        });
                    }
                }
            }
            AxisSpec::OrderedPrefix { entries, ellipsis: true } => {
                if rank + named_count < entries.len() {
                    return Err(Error::OutAxesRankError {
                        spec: self.to_string(),
                        required: entries.len() - named_count,
                        rank,
                    });
                }
            }
            AxisSpec::OrderedPrefix { entries, ellipsis: false } => {
                if rank + named_count != entries.len() {
                    let mut full_shape = shape.to_vec();
                    for (position, name) in self.positions() {
                        full_shape.insert(position.min(full_shape.len()), size_of(&name));
                    }
                    return Err(Error::OutAxesRankAssertion {
                        spec: self.to_string(),
                        expected: entries.len(),
                        rank: full_shape.len(),
                        shape: full_shape,
                    });
                }
            }
        }
        Ok(self.positions())
    }

    fn positions(&self) -> BTreeMap<usize, String> {
        match self {
            AxisSpec::Positional(entries) => {
                entries.iter().map(|(position, name)| (*position as usize, name.clone())).collect()
            }
            AxisSpec::OrderedPrefix { entries, .. } => entries
                .iter()
                .enumerate()
                .filter_map(|(position, name)| name.as_ref().map(|name| (position, name.clone())))
                .collect(),
        }
    }
}

impl Display for AxisSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AxisSpec::Positional(entries) => {
                let entries =
                    entries.iter().map(|(position, name)| format!("{position}: '{name}'")).collect::<Vec<_>>();
                write!(f, "{{{}}}", entries.join(", "))
            }
            AxisSpec::OrderedPrefix { entries, ellipsis } => {
                let mut rendered = entries
                    .iter()
                    .map(|entry| match entry {
                        Some(name) => format!("'{name}'"),
                        None => "None".to_string(),
                    })
                    .collect::<Vec<_>>();
                if *ellipsis {
                    rendered.push("...".to_string());
                }
                write!(f, "[{}]", rendered.join(", "))
            }
        }
    }
}

/// Assignment of logical axes to ordered tuples of mesh (resource) axes.
///
/// Entries keep their insertion order, which decides which axis wins when two axes claim the same resource.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct AxisResources {
    entries: Vec<(String, Vec<String>)>,
}

impl AxisResources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns `resources` to `axis`, replacing any previous assignment.
    pub fn insert<A: Into<String>, I: IntoIterator<Item = R>, R: Into<String>>(&mut self, axis: A, resources: I) {
        let axis = axis.into();
        let resources = resources.into_iter().map(Into::into).collect::<Vec<_>>();
        match self.entries.iter_mut().find(|(existing, _)| *existing == axis) {
            Some((_, existing)) => *existing = resources,
            None => self.entries.push((axis, resources)),
        }
    }

    pub fn get(&self, axis: &str) -> Option<&[String]> {
        self.entries.iter().find(|(name, _)| name == axis).map(|(_, resources)| resources.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(axis, resources)| (axis.as_str(), resources.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Checks that no resource tuple repeats a resource.
    pub fn check_distinct(&self) -> Result<(), Error> {
        for (axis, resources) in &self.entries {
            for (index, resource) in resources.iter().enumerate() {
                if resources[..index].contains(resource) {
                    return Err(Error::DuplicateResourceAssignment { axis: axis.clone(), resources: resources.clone() });
                }
            }
        }
        Ok(())
    }
}

/// Renders a shape as a Python tuple, e.g. `(6,)` or `(5, 2, 2)`.
pub fn format_shape(shape: &[usize]) -> String {
    format_tuple(shape.iter().map(ToString::to_string))
}

/// Renders names as a Python tuple of strings, e.g. `('x', 'y')`.
pub fn format_names(names: &[String]) -> String {
    format_tuple(names.iter().map(|name| format!("'{name}'")))
}

fn format_tuple<I: Iterator<Item = String>>(items: I) -> String {
    let items = items.collect::<Vec<_>>();
    match items.len() {
        1 => format!("({},)", items[0]),
        _ => format!("({})", items.join(", ")),
    }
}
