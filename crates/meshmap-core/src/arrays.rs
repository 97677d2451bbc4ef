//! Host arrays passed to and returned from mapped functions.
//!
//! An [`Array`] pairs a global value with the metadata describing how it is laid out across the devices of a mesh:
//!
//! - Inputs are plain host values without sharding metadata.
//! - Outputs of a mapped function carry the [`ShardingSpec`] and [`Mesh`] they were produced for, so that
//!   [`Array::addressable_shards`] can describe which slice of the value every device holds.
//!
//! Clones share storage. Donating an array to a call deletes the storage for every clone: any later read fails with
//! [`Error::DeletedArray`].

use std::{
    fmt::Debug,
    ops::Range,
    sync::{Arc, PoisonError, RwLock},
};

use ndarray::{ArrayD, IxDyn, Slice};
use tracing::debug;

use crate::{
    errors::Error,
    mesh::{Device, Mesh, local_devices},
    sharding::ShardingSpec,
    types::DataType,
};

/// Slice of an [`Array`] held by one device.
#[derive(Clone, Debug, PartialEq)]
pub struct Shard {
    device: Device,
    index: Vec<Range<usize>>,
    data: ArrayD<f64>,
}

impl Shard {
    /// Device holding this shard.
    pub fn device(&self) -> Device {
        self.device
    }

    /// Per-dimension index ranges of this shard within the global value.
    pub fn index(&self) -> &[Range<usize>] {
        self.index.as_slice()
    }

    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }
}

#[derive(Clone)]
pub struct Array {
    data_type: DataType,
    shape: Vec<usize>,
    storage: Arc<RwLock<Option<Arc<ArrayD<f64>>>>>,
    sharding: Option<(ShardingSpec, Mesh)>,
}

impl Array {
    /// Creates an array of `shape` from row-major `data`.
    pub fn from_vec(data_type: DataType, shape: &[usize], data: Vec<f64>) -> Result<Self, Error> {
        let expected = shape.iter().product::<usize>();
        let actual = data.len();
        let data = ArrayD::from_shape_vec(IxDyn(shape), data).map_err(|_| Error::InvalidArray {
            shape: shape.to_vec(),
            expected,
            actual,
        })?;
        Ok(Self::from_ndarray(data_type, data))
    }

    pub fn from_ndarray(data_type: DataType, data: ArrayD<f64>) -> Self {
        Self {
            data_type,
            shape: data.shape().to_vec(),
            storage: Arc::new(RwLock::new(Some(Arc::new(data)))),
            sharding: None,
        }
    }

    /// Creates an array of `shape` holding `0, 1, 2, ...` in row-major order.
    pub fn arange(data_type: DataType, shape: &[usize]) -> Self {
        let data = ArrayD::from_shape_fn(IxDyn(shape), |index| {
            let mut flat = 0;
            for (axis, size) in shape.iter().enumerate() {
                flat = flat * size + index[axis];
            }
            flat as f64
        });
        Self::from_ndarray(data_type, data)
    }

    pub fn full(data_type: DataType, shape: &[usize], value: f64) -> Self {
        Self::from_ndarray(data_type, ArrayD::from_elem(IxDyn(shape), value))
    }

    pub(crate) fn with_sharding(mut self, spec: ShardingSpec, mesh: Mesh) -> Self {
        self.sharding = Some((spec, mesh));
        self
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn shape(&self) -> &[usize] {
        self.shape.as_slice()
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Sharding of this array, if it was produced by a mapped function.
    pub fn sharding_spec(&self) -> Option<&ShardingSpec> {
        self.sharding.as_ref().map(|(spec, _)| spec)
    }

    /// Mesh this array was produced on, if it was produced by a mapped function.
    pub fn mesh(&self) -> Option<&Mesh> {
        self.sharding.as_ref().map(|(_, mesh)| mesh)
    }

    pub(crate) fn storage(&self) -> Result<Arc<ArrayD<f64>>, Error> {
        self.storage.read().unwrap_or_else(PoisonError::into_inner).clone().ok_or(Error::DeletedArray)
    }

    pub fn to_ndarray(&self) -> Result<ArrayD<f64>, Error> {
        Ok(self.storage()?.as_ref().clone())
    }

    /// Returns the elements of this array in row-major order.
    pub fn to_vec(&self) -> Result<Vec<f64>, Error> {
        Ok(self.storage()?.iter().copied().collect())
    }

    pub fn is_deleted(&self) -> bool {
        self.storage.read().unwrap_or_else(PoisonError::into_inner).is_none()
    }

    /// Releases the storage of this array and of every clone sharing it.
    pub fn delete(&self) {
        debug!(shape = ?self.shape, "deleting array");
        *self.storage.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Returns the shard of this array held by every device.
    ///
    /// Arrays without sharding metadata are held in full by the first local device.
    pub fn addressable_shards(&self) -> Result<Vec<Shard>, Error> {
        let data = self.storage()?;
        let slices = match &self.sharding {
            Some((spec, mesh)) if !mesh.is_empty() => spec.shard_slices(&self.shape, mesh)?,
            _ => {
                let device = local_devices()?.first().copied().unwrap_or_else(|| Device::new(0, 0));
                vec![(device, self.shape.iter().map(|size| 0..*size).collect())]
            }
        };
        Ok(slices
            .into_iter()
            .map(|(device, index)| {
                let data = data.slice_each_axis(|axis| Slice::from(index[axis.axis.index()].clone())).to_owned();
                Shard { device, index, data }
            })
            .collect())
    }
}

impl Debug for Array {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Array")
            .field("data_type", &self.data_type)
            .field("shape", &self.shape)
            .field("sharding", &self.sharding_spec().map(ToString::to_string))
            .field("deleted", &self.is_deleted())
            .finish()
    }
}
