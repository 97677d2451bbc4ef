//! Physical device meshes and the scoped resource environment.
//!
//! A [`Mesh`] organizes devices into a named, row-major grid. For example, eight devices arranged as
//! `[("data", 4), ("model", 2)]` give the `data` axis four coordinates and the `model` axis two, with the device at
//! linear index `k` sitting at coordinate `(k / 2, k % 2)`.
//!
//! Mapped functions resolve their `axis_resources` against the *active* mesh. Each thread keeps a stack of active
//! meshes, the resource environment. [`enter`] pushes a mesh and returns a [`MeshGuard`] that pops it again when
//! dropped, so the prior environment is restored on every exit path, including early returns and panics:
//!
//! ```ignore
//! let _guard = mesh(&[("x", 2), ("y", 2)])?;
//! let outputs = mapped.call(&[&input])?;
//! ```

use std::{cell::RefCell, collections::HashMap, fmt::Display, marker::PhantomData};

use tracing::debug;

use crate::{config::Config, errors::Error};

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

/// Device entry in a mesh, identified by a global id and the process (host) that owns it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Device {
    id: usize,
    process_index: usize,
}

impl Device {
    pub fn new(id: usize, process_index: usize) -> Self {
        Self { id, process_index }
    }

    /// Global device id.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Index of the process owning this device.
    pub fn process_index(&self) -> usize {
        self.process_index
    }
}

/// Returns the devices addressable by this process.
///
/// Devices are emulated on the host and their number is controlled by `MESHMAP_HOST_DEVICE_COUNT`.
pub fn local_devices() -> Result<Vec<Device>, Error> {
    let count = Config::global()?.host_device_count;
    Ok((0..count).map(|id| Device::new(id, 0)).collect())
}

// ---------------------------------------------------------------------------
// Mesh
// ---------------------------------------------------------------------------

/// A named axis of a device mesh.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MeshAxis {
    name: String,
    size: usize,
}

impl MeshAxis {
    pub fn new<N: Into<String>>(name: N, size: usize) -> Result<Self, Error> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::EmptyMeshAxisName);
        }
        if size == 0 {
            return Err(Error::InvalidMeshAxisSize { axis: name });
        }
        Ok(Self { name, size })
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

/// Named grid of devices.
///
/// Two meshes are equal when they have the same axes (names, sizes, and order) over the same devices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mesh {
    axes: Vec<MeshAxis>,
    devices: Vec<Device>,
    axis_index_by_name: HashMap<String, usize>,
}

impl Mesh {
    /// Creates a mesh whose devices, in row-major order, fill the grid described by `axes`.
    pub fn new(axes: Vec<MeshAxis>, devices: Vec<Device>) -> Result<Self, Error> {
        let mut axis_index_by_name = HashMap::with_capacity(axes.len());
        for (axis_index, axis) in axes.iter().enumerate() {
            if axis_index_by_name.insert(axis.name.clone(), axis_index).is_some() {
                return Err(Error::DuplicateMeshAxisName { axis: axis.name.clone() });
            }
        }

        let expected = device_count_for(&axes)?;
        if !axes.is_empty() && devices.len() != expected {
            return Err(Error::MeshDeviceCountMismatch { expected, actual: devices.len() });
        }

        let mut seen = HashMap::with_capacity(devices.len());
        for device in &devices {
            if seen.insert(device.id, ()).is_some() {
                return Err(Error::DuplicateMeshDeviceId { device_id: device.id });
            }
        }

        let devices = if axes.is_empty() { Vec::new() } else { devices };
        Ok(Self { axes, devices, axis_index_by_name })
    }

    /// Creates a mesh from the first `product(sizes)` entries of `devices`.
    pub fn from_devices<N: AsRef<str>>(devices: &[Device], axes: &[(N, usize)]) -> Result<Self, Error> {
        let axes = axes.iter().map(|(name, size)| MeshAxis::new(name.as_ref(), *size)).collect::<Result<Vec<_>, _>>()?;
        let required = device_count_for(&axes)?;
        if devices.len() < required {
            return Err(Error::DeviceShortage { required, available: devices.len() });
        }
        Self::new(axes, devices[..required].to_vec())
    }

    /// The mesh with no axes and no devices.
    pub fn empty() -> Self {
        Self { axes: Vec::new(), devices: Vec::new(), axis_index_by_name: HashMap::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    pub fn axes(&self) -> &[MeshAxis] {
        self.axes.as_slice()
    }

    pub fn axis_names(&self) -> Vec<String> {
        self.axes.iter().map(|axis| axis.name.clone()).collect()
    }

    pub fn devices(&self) -> &[Device] {
        self.devices.as_slice()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn axis_index(&self, name: &str) -> Option<usize> {
        self.axis_index_by_name.get(name).copied()
    }

    pub fn axis(&self, name: &str) -> Option<&MeshAxis> {
        self.axis_index(name).map(|index| &self.axes[index])
    }

    /// Returns `true` if this mesh only adds axes and devices to `other`.
    ///
    /// The axes of `other` must appear here with the same sizes and in the same relative order, and every device of
    /// `other` must also be a device of this mesh.
    pub fn extends(&self, other: &Mesh) -> bool {
        let mut own_axes = self.axes.iter();
        let axes_kept = other.axes.iter().all(|axis| own_axes.any(|own| own == axis));
        axes_kept && other.devices.iter().all(|device| self.devices.contains(device))
    }

    /// Returns the row-major mesh coordinate of the device at `device_index`.
    pub fn coordinate_for_device_index(&self, device_index: usize) -> Option<Vec<usize>> {
        let axis_sizes = self.axes.iter().map(MeshAxis::size).collect::<Vec<_>>();
        (device_index < self.devices.len()).then(|| coordinate_for_linear_index(device_index, &axis_sizes))
    }
}

impl Display for Mesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let axes = self.axes.iter().map(|axis| format!("'{}': {}", axis.name, axis.size)).collect::<Vec<_>>();
        write!(f, "Mesh({{{}}})", axes.join(", "))
    }
}

fn device_count_for(axes: &[MeshAxis]) -> Result<usize, Error> {
    axes.iter()
        .try_fold(1usize, |count, axis| count.checked_mul(axis.size))
        .ok_or_else(|| Error::MeshSizeOverflow { sizes: axes.iter().map(MeshAxis::size).collect() })
}

pub(crate) fn coordinate_for_linear_index(mut index: usize, axis_sizes: &[usize]) -> Vec<usize> {
    let mut coordinate = vec![0usize; axis_sizes.len()];
    for axis in (0..axis_sizes.len()).rev() {
        coordinate[axis] = index % axis_sizes[axis];
        index /= axis_sizes[axis];
    }
    coordinate
}

// ---------------------------------------------------------------------------
// Resource environment
// ---------------------------------------------------------------------------

thread_local! {
    static RESOURCE_ENVIRONMENT: RefCell<Vec<Mesh>> = const { RefCell::new(Vec::new()) };
}

/// Scope guard returned by [`enter`]. Dropping it restores the resource environment that was active before.
#[must_use = "the mesh is deactivated as soon as the guard is dropped"]
#[derive(Debug)]
pub struct MeshGuard {
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl Drop for MeshGuard {
    fn drop(&mut self) {
        RESOURCE_ENVIRONMENT.with_borrow_mut(|stack| {
            if let Some(mesh) = stack.get(self.depth) {
                debug!(mesh = %mesh, depth = self.depth, "leaving mesh");
            }
            stack.truncate(self.depth);
        });
    }
}

/// Makes `mesh` the active mesh of the current thread until the returned guard is dropped.
pub fn enter(mesh: Mesh) -> MeshGuard {
    RESOURCE_ENVIRONMENT.with_borrow_mut(|stack| {
        let depth = stack.len();
        debug!(mesh = %mesh, depth, "entering mesh");
        stack.push(mesh);
        MeshGuard { depth, _not_send: PhantomData }
    })
}

/// Builds a mesh over the local devices and activates it.
pub fn mesh<N: AsRef<str>>(axes: &[(N, usize)]) -> Result<MeshGuard, Error> {
    let mesh = Mesh::from_devices(&local_devices()?, axes)?;
    Ok(enter(mesh))
}

/// Runs `f` with `mesh` active.
pub fn with_mesh<R, F: FnOnce() -> R>(mesh: Mesh, f: F) -> R {
    let _guard = enter(mesh);
    f()
}

/// Returns the active mesh of the current thread, or [`Mesh::empty`] if none is active.
pub fn current() -> Mesh {
    RESOURCE_ENVIRONMENT.with_borrow(|stack| stack.last().cloned().unwrap_or_else(Mesh::empty))
}
