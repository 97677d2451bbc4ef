//! Host values flowing through program interpretation.
//!
//! A [`NamedArray`] stores one `f64` array whose leading dimensions are the named axes the value varies over (in
//! [`NamedArray::names`] order) followed by its positional dimensions. Operations align named dimensions by name, so
//! two values that vary over the same axes in different orders combine correctly, and a value that does not vary over
//! an axis broadcasts along it.

use std::collections::BTreeMap;

use ndarray::{ArrayD, Axis, IxDyn, Zip};

use crate::errors::Error;

#[derive(Clone, Debug, PartialEq)]
pub struct NamedArray {
    names: Vec<String>,
    data: ArrayD<f64>,
}

impl NamedArray {
    pub fn new(names: Vec<String>, data: ArrayD<f64>) -> Result<Self, Error> {
        if data.ndim() < names.len() {
            return Err(Error::IncompatibleShapes {
                op: "named_array".to_string(),
                message: format!("{} named axes do not fit in an array of rank {}", names.len(), data.ndim()),
            });
        }
        Ok(Self { names, data })
    }

    /// Creates a value that does not vary over any named axis.
    pub fn positional(data: ArrayD<f64>) -> Self {
        Self { names: Vec::new(), data }
    }

    #[inline]
    pub fn names(&self) -> &[String] {
        self.names.as_slice()
    }

    #[inline]
    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    pub fn into_data(self) -> ArrayD<f64> {
        self.data
    }

    /// Index of the data dimension holding named axis `name`.
    pub fn named_axis(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|existing| existing == name)
    }

    pub fn named_size(&self, name: &str) -> Option<usize> {
        self.named_axis(name).map(|axis| self.data.shape()[axis])
    }

    pub fn positional_shape(&self) -> &[usize] {
        &self.data.shape()[self.names.len()..]
    }

    pub fn rank(&self) -> usize {
        self.data.ndim() - self.names.len()
    }

    /// Returns the data laid out as `[names..., positional...]`, with a unit dimension for every name in `names` that
    /// this value does not vary over.
    pub fn align(&self, names: &[String]) -> Result<ArrayD<f64>, Error> {
        if let Some(extra) = self.names.iter().find(|name| !names.contains(name)) {
            return Err(Error::IncompatibleShapes {
                op: "align".to_string(),
                message: format!("value varies over axis {extra}, which is not among {names:?}"),
            });
        }
        let present = names.iter().filter_map(|name| self.named_axis(name)).collect::<Vec<_>>();
        let permutation = present.into_iter().chain(self.names.len()..self.data.ndim()).collect::<Vec<_>>();
        let mut view = self.data.view().permuted_axes(permutation);
        for (index, name) in names.iter().enumerate() {
            if self.named_axis(name).is_none() {
                view = view.insert_axis(Axis(index));
            }
        }
        Ok(view.to_owned())
    }

    /// Returns the data laid out as `[names..., positional...]` and broadcast to `named_sizes` along the named
    /// dimensions and to `positional_shape` along the positional ones (right-aligned).
    pub fn broadcast_to(
        &self,
        names: &[String],
        named_sizes: &[usize],
        positional_shape: &[usize],
    ) -> Result<ArrayD<f64>, Error> {
        let mut aligned = self.align(names)?;
        let rank = self.rank();
        if rank > positional_shape.len() {
            return Err(Error::IncompatibleShapes {
                op: "broadcast".to_string(),
                message: format!("cannot broadcast rank {rank} to shape {positional_shape:?}"),
            });
        }
        for _ in rank..positional_shape.len() {
            aligned = aligned.insert_axis(Axis(names.len()));
        }
        let shape = named_sizes.iter().chain(positional_shape).copied().collect::<Vec<_>>();
        aligned.broadcast(IxDyn(&shape)).map(|view| view.to_owned()).ok_or_else(|| Error::IncompatibleShapes {
            op: "broadcast".to_string(),
            message: format!("cannot broadcast {:?} to {shape:?}", self.data.shape()),
        })
    }

    /// Moves the positional dimensions at `positions` to named axes, appended in position order.
    pub fn to_named(&self, positions: &BTreeMap<usize, String>) -> Result<Self, Error> {
        let offset = self.names.len();
        if let Some(position) = positions.keys().find(|position| **position >= self.rank()) {
            return Err(Error::IncompatibleShapes {
                op: "to_named".to_string(),
                message: format!("dimension {position} is out of range for rank {}", self.rank()),
            });
        }
        let mut permutation = (0..offset).collect::<Vec<_>>();
        permutation.extend(positions.keys().map(|position| offset + position));
        permutation.extend((0..self.rank()).filter(|position| !positions.contains_key(position)).map(|p| offset + p));
        let mut names = self.names.clone();
        names.extend(positions.values().cloned());
        Ok(Self { names, data: self.data.view().permuted_axes(permutation).to_owned() })
    }

    /// Moves the named axes listed in `positions` to those positional dimensions of the result.
    ///
    /// Named axes this value does not vary over are broadcast using `size_of`.
    pub fn to_positional<F: Fn(&str) -> usize>(
        &self,
        positions: &BTreeMap<usize, String>,
        size_of: F,
    ) -> Result<Self, Error> {
        let remaining = self.names.iter().filter(|name| !positions.values().any(|moved| moved == *name)).cloned();
        let remaining = remaining.collect::<Vec<_>>();
        let moved = positions.values().cloned().collect::<Vec<_>>();
        let names = remaining.iter().chain(&moved).cloned().collect::<Vec<_>>();
        let named_sizes = names
            .iter()
            .map(|name| self.named_size(name).unwrap_or_else(|| size_of(name)))
            .collect::<Vec<_>>();
        let data = self.broadcast_to(&names, &named_sizes, self.positional_shape())?;

        let output_rank = self.rank() + moved.len();
        let mut permutation = (0..remaining.len()).collect::<Vec<_>>();
        let mut moved_index = remaining.len();
        let mut positional_index = names.len();
        for position in 0..output_rank {
            if positions.contains_key(&position) {
                permutation.push(moved_index);
                moved_index += 1;
            } else {
                permutation.push(positional_index);
                positional_index += 1;
            }
        }
        if positional_index != data.ndim() {
            return Err(Error::IncompatibleShapes {
                op: "to_positional".to_string(),
                message: format!("positions {:?} do not fit in an output of rank {output_rank}", positions.keys()),
            });
        }
        Ok(Self { names: remaining, data: data.permuted_axes(permutation) })
    }

    /// Applies `f` elementwise, broadcasting named axes by name and positional dimensions NumPy-style.
    pub fn zip_with<F: Fn(f64, f64) -> f64>(&self, other: &NamedArray, op: &str, f: F) -> Result<Self, Error> {
        let mut names = self.names.clone();
        names.extend(other.names.iter().filter(|name| !self.names.contains(name)).cloned());
        let mut named_sizes = Vec::with_capacity(names.len());
        for name in &names {
            let size = match (self.named_size(name), other.named_size(name)) {
                (Some(lhs), Some(rhs)) if lhs != rhs => {
                    return Err(Error::IncompatibleShapes {
                        op: op.to_string(),
                        message: format!("axis {name} has size {lhs} in one operand and {rhs} in the other"),
                    });
                }
                (Some(size), _) | (None, Some(size)) => size,
                (None, None) => 1,
            };
            named_sizes.push(size);
        }
        let shape = crate::types::broadcast_shapes(self.positional_shape(), other.positional_shape(), op)?;
        let lhs = self.broadcast_to(&names, &named_sizes, &shape)?;
        let rhs = other.broadcast_to(&names, &named_sizes, &shape)?;
        Ok(Self { names, data: Zip::from(&lhs).and(&rhs).map_collect(|lhs, rhs| f(*lhs, *rhs)) })
    }

    pub fn map<F: Fn(f64) -> f64>(&self, f: F) -> Self {
        Self { names: self.names.clone(), data: self.data.mapv(f) }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn, array};
    use pretty_assertions::assert_eq;

    use super::*;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn test_to_named_and_back() {
        let data = ArrayD::from_shape_fn(IxDyn(&[2, 3, 4]), |ix| (ix[0] * 100 + ix[1] * 10 + ix[2]) as f64);
        let value = NamedArray::positional(data.clone());
        let positions = BTreeMap::from([(1, "j".to_string())]);
        let named = value.to_named(&positions).unwrap();
        assert_eq!(named.names(), &names(&["j"]));
        assert_eq!(named.positional_shape(), &[2, 4]);
        assert_eq!(named.data()[[2, 1, 3].as_slice()], 123.0);

        let restored = named.to_positional(&positions, |_| 0).unwrap();
        assert!(restored.names().is_empty());
        assert_eq!(restored.data(), &data);
    }

    #[test]
    fn test_to_positional_broadcasts_missing_axes() {
        let value = NamedArray::positional(array![1.0, 2.0].into_dyn());
        let restored = value.to_positional(&BTreeMap::from([(0, "i".to_string())]), |_| 3).unwrap();
        assert_eq!(restored.data(), &array![[1.0, 2.0], [1.0, 2.0], [1.0, 2.0]].into_dyn());
    }

    #[test]
    fn test_zip_with_aligns_names() {
        let lhs = NamedArray::new(names(&["i", "j"]), array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]].into_dyn()).unwrap();
        let rhs = NamedArray::new(names(&["j"]), array![10.0, 20.0, 30.0].into_dyn()).unwrap();
        let sum = lhs.zip_with(&rhs, "add", |a, b| a + b).unwrap();
        assert_eq!(sum.names(), &names(&["i", "j"]));
        assert_eq!(sum.data(), &array![[11.0, 22.0, 33.0], [14.0, 25.0, 36.0]].into_dyn());

        let transposed = NamedArray::new(names(&["j", "i"]), lhs.align(&names(&["j", "i"])).unwrap()).unwrap();
        let difference = lhs.zip_with(&transposed, "sub", |a, b| a - b).unwrap();
        assert!(difference.data().iter().all(|value| *value == 0.0));
    }

    #[test]
    fn test_zip_with_rejects_mismatched_axes() {
        let lhs = NamedArray::new(names(&["i"]), ArrayD::zeros(IxDyn(&[2]))).unwrap();
        let rhs = NamedArray::new(names(&["i"]), ArrayD::zeros(IxDyn(&[3]))).unwrap();
        assert!(matches!(lhs.zip_with(&rhs, "mul", |a, b| a * b), Err(Error::IncompatibleShapes { .. })));
    }
}
