//! Abstract value types used while tracing mapped functions.
//!
//! An [`AbstractValue`] describes a value without holding its data: a [`DataType`], a positional shape, and a
//! [`NamedShape`] listing the logical axes the value varies over. Named axes behave like extra dimensions that have
//! no position: they broadcast by name rather than by position.

use std::fmt::Display;

use crate::errors::Error;

/// Element type of an array.
///
/// Values are stored as `f64` on the host regardless of their [`DataType`]; the tag only drives promotion (e.g., the
/// result of dividing two integer arrays is floating-point) and is part of the abstract signature used for caching.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    Boolean,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl DataType {
    #[inline]
    pub fn is_floating_point(&self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    #[inline]
    pub fn is_integer(&self) -> bool {
        matches!(self, DataType::Int32 | DataType::Int64)
    }

    /// Returns the narrowest type both `self` and `other` can be promoted to.
    pub fn promote(self, other: DataType) -> DataType {
        self.max(other)
    }

    /// Returns the floating-point type that values of this type are converted to by transcendental operations.
    pub fn to_floating_point(self) -> DataType {
        match self {
            DataType::Float64 => DataType::Float64,
            _ => DataType::Float32,
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::Boolean => write!(f, "bool"),
            DataType::Int32 => write!(f, "int32"),
            DataType::Int64 => write!(f, "int64"),
            DataType::Float32 => write!(f, "float32"),
            DataType::Float64 => write!(f, "float64"),
        }
    }
}

/// Ordered set of `(axis name, size)` pairs that a value varies over.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct NamedShape {
    axes: Vec<(String, usize)>,
}

impl NamedShape {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_axes<I: IntoIterator<Item = (N, usize)>, N: Into<String>>(axes: I) -> Self {
        let mut shape = Self::new();
        for (name, size) in axes {
            shape.insert(name, size);
        }
        shape
    }

    #[inline]
    pub fn axes(&self) -> &[(String, usize)] {
        self.axes.as_slice()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.axes.iter().map(|(name, _)| name.as_str())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.axes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    pub fn size(&self, name: &str) -> Option<usize> {
        self.axes.iter().find(|(axis, _)| axis == name).map(|(_, size)| *size)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.size(name).is_some()
    }

    /// Inserts `name` with `size`, replacing the size if `name` is already present.
    pub fn insert<N: Into<String>>(&mut self, name: N, size: usize) {
        let name = name.into();
        match self.axes.iter_mut().find(|(axis, _)| *axis == name) {
            Some((_, existing)) => *existing = size,
            None => self.axes.push((name, size)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<usize> {
        let index = self.axes.iter().position(|(axis, _)| axis == name)?;
        Some(self.axes.remove(index).1)
    }

    /// Returns the union of two named shapes, failing if a shared axis has different sizes.
    pub fn join(&self, other: &NamedShape, op: &str) -> Result<NamedShape, Error> {
        let mut joined = self.clone();
        for (name, size) in &other.axes {
            match self.size(name) {
                Some(existing) if existing != *size => {
                    return Err(Error::IncompatibleShapes {
                        op: op.to_string(),
                        message: format!("axis {name} has size {existing} in one operand and {size} in the other"),
                    });
                }
                Some(_) => {}
                None => joined.axes.push((name.clone(), *size)),
            }
        }
        Ok(joined)
    }
}

impl Display for NamedShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let axes = self.axes.iter().map(|(name, size)| format!("{name}:{size}")).collect::<Vec<_>>().join(", ");
        write!(f, "{{{axes}}}")
    }
}

/// Type of a traced value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AbstractValue {
    pub data_type: DataType,
    pub shape: Vec<usize>,
    pub named_shape: NamedShape,
}

impl AbstractValue {
    pub fn new(data_type: DataType, shape: Vec<usize>, named_shape: NamedShape) -> Self {
        Self { data_type, shape, named_shape }
    }

    /// Creates an abstract value that does not vary over any named axis.
    pub fn positional(data_type: DataType, shape: Vec<usize>) -> Self {
        Self { data_type, shape, named_shape: NamedShape::new() }
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }
}

impl Display for AbstractValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shape = self.shape.iter().map(|size| size.to_string()).collect::<Vec<_>>().join(",");
        write!(f, "{}[{shape}]", self.data_type)?;
        if !self.named_shape.is_empty() {
            write!(f, "{}", self.named_shape)?;
        }
        Ok(())
    }
}

/// Broadcasts two positional shapes following NumPy's right-aligned broadcasting rules.
pub(crate) fn broadcast_shapes(lhs: &[usize], rhs: &[usize], op: &str) -> Result<Vec<usize>, Error> {
    let rank = lhs.len().max(rhs.len());
    let mut shape = vec![0; rank];
    for index in 0..rank {
        let l = if index + lhs.len() >= rank { lhs[index + lhs.len() - rank] } else { 1 };
        let r = if index + rhs.len() >= rank { rhs[index + rhs.len() - rank] } else { 1 };
        shape[index] = match (l, r) {
            (l, r) if l == r => l,
            (1, r) => r,
            (l, 1) => l,
            (l, r) => {
                return Err(Error::IncompatibleShapes {
                    op: op.to_string(),
                    message: format!("cannot broadcast {lhs:?} with {rhs:?} (dimension of size {l} vs {r})"),
                });
            }
        };
    }
    Ok(shape)
}
