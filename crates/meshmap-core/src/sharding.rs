//! Positional sharding descriptions of mapped-function outputs.
//!
//! A [`ShardingSpec`] has two parts:
//!
//! - `sharding`: one [`DimensionSharding`] per output dimension. A dimension bound to a logical axis with resources
//!   is `Chunked` with one factor per resource, in the order the resources were listed; every other dimension is
//!   `Unsharded`.
//! - `mesh_mapping`: one [`MeshMapping`] per mesh axis, in mesh order. A mesh axis that carries the `k`-th chunk
//!   factor of the output (counting factors across dimensions in dimension order) is `ShardedAxis(k)`; any other mesh
//!   axis holds full replicas of the output and is `Replicated(size)`.
//!
//! For example, on mesh `{x: 2, y: 2}`, a `(5, 4)` output whose second dimension is logical axis `a` assigned to
//! `('x', 'y')` has:
//!
//! ```text
//! sharding     = [Unsharded, Chunked([2, 2])]
//! mesh_mapping = [ShardedAxis(0), ShardedAxis(1)]
//! ```
//!
//! while assigning `a` to `('y', 'x')` keeps the same `sharding` but flips `mesh_mapping` to
//! `[ShardedAxis(1), ShardedAxis(0)]`. Structural equality of two specs is the compatibility contract between the
//! values they describe.

use std::{collections::BTreeMap, fmt::Display, ops::Range};

use crate::{
    errors::Error,
    mesh::{Device, Mesh},
    resources::ShardingPlan,
};

/// How one dimension of a value is split across devices.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DimensionSharding {
    Unsharded,
    /// Split into `factors.iter().product()` equal chunks, factor `i` being the extent of the `i`-th resource.
    Chunked(Vec<usize>),
}

/// What one mesh axis does with a value.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MeshMapping {
    /// The value is replicated over the mesh axis, which has the given size.
    Replicated(usize),
    /// The mesh axis carries the chunk factor with this global index.
    ShardedAxis(usize),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShardingSpec {
    pub sharding: Vec<DimensionSharding>,
    pub mesh_mapping: Vec<MeshMapping>,
}

impl ShardingSpec {
    /// Fully replicated spec for a value of rank `rank` on `mesh`.
    pub fn replicated(rank: usize, mesh: &Mesh) -> Self {
        Self {
            sharding: vec![DimensionSharding::Unsharded; rank],
            mesh_mapping: mesh.axes().iter().map(|axis| MeshMapping::Replicated(axis.size())).collect(),
        }
    }

    /// Builds the spec of an output of rank `rank` whose logical axes sit at `positions`.
    ///
    /// Only axes in `plan` are considered: dimensions introduced by nested mapped functions are not visible at this
    /// level and stay `Unsharded`.
    pub fn for_output(plan: &ShardingPlan, positions: &BTreeMap<usize, String>, rank: usize, mesh: &Mesh) -> Self {
        let mut spec = Self::replicated(rank, mesh);
        let mut factor_index = 0;
        for (position, name) in positions {
            let Some(assignment) = plan.assignment(name) else { continue };
            if assignment.is_vectorized() {
                continue;
            }
            spec.sharding[*position] = DimensionSharding::Chunked(assignment.resource_sizes());
            for resource in assignment.resources() {
                if let Some(mesh_index) = mesh.axis_index(resource.name()) {
                    spec.mesh_mapping[mesh_index] = MeshMapping::ShardedAxis(factor_index);
                }
                factor_index += 1;
            }
        }
        spec
    }

    pub fn rank(&self) -> usize {
        self.sharding.len()
    }

    /// Computes, for every device of `mesh`, the per-dimension index ranges of the shard it holds for a value of
    /// shape `shape`.
    pub fn shard_slices(&self, shape: &[usize], mesh: &Mesh) -> Result<Vec<(Device, Vec<Range<usize>>)>, Error> {
        if shape.len() != self.rank() {
            return Err(Error::IncompatibleShapes {
                op: "shard_slices".to_string(),
                message: format!("sharding spec has rank {} but the value has shape {shape:?}", self.rank()),
            });
        }

        let mut mesh_axis_by_factor = BTreeMap::new();
        for (mesh_index, mapping) in self.mesh_mapping.iter().enumerate() {
            if let MeshMapping::ShardedAxis(factor) = mapping {
                mesh_axis_by_factor.insert(*factor, mesh_index);
            }
        }

        let mut shards = Vec::with_capacity(mesh.device_count());
        for (device_index, device) in mesh.devices().iter().enumerate() {
            let coordinate = mesh.coordinate_for_device_index(device_index).unwrap_or_default();
            let mut factor_index = 0;
            let mut slices = Vec::with_capacity(shape.len());
            for (dimension, dimension_sharding) in self.sharding.iter().enumerate() {
                let slice = match dimension_sharding {
                    DimensionSharding::Unsharded => 0..shape[dimension],
                    DimensionSharding::Chunked(factors) => {
                        let mut partition_index = 0;
                        let mut partition_count = 1;
                        for factor in factors {
                            let axis_coordinate = mesh_axis_by_factor
                                .get(&factor_index)
                                .and_then(|mesh_index| coordinate.get(*mesh_index))
                                .copied()
                                .unwrap_or(0);
                            partition_index = partition_index * factor + axis_coordinate;
                            partition_count *= factor;
                            factor_index += 1;
                        }
                        partition_slice(shape[dimension], partition_count, partition_index)
                    }
                };
                slices.push(slice);
            }
            shards.push((*device, slices));
        }
        Ok(shards)
    }
}

impl Display for ShardingSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sharding = self
            .sharding
            .iter()
            .map(|dimension| match dimension {
                DimensionSharding::Unsharded => "NoSharding()".to_string(),
                DimensionSharding::Chunked(factors) => format!("Chunked({factors:?})"),
            })
            .collect::<Vec<_>>();
        let mesh_mapping = self
            .mesh_mapping
            .iter()
            .map(|mapping| match mapping {
                MeshMapping::Replicated(size) => format!("Replicated({size})"),
                MeshMapping::ShardedAxis(index) => format!("ShardedAxis({index})"),
            })
            .collect::<Vec<_>>();
        write!(f, "ShardingSpec(({}), ({}))", sharding.join(", "), mesh_mapping.join(", "))
    }
}

fn partition_slice(dimension_size: usize, partition_count: usize, partition_index: usize) -> Range<usize> {
    let base_size = dimension_size / partition_count;
    let remainder = dimension_size % partition_count;
    let start = partition_index * base_size + partition_index.min(remainder);
    let size = base_size + usize::from(partition_index < remainder);
    start..start + size
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{axes::AxisResources, inference::AxisSizeTable, mesh::Device};

    fn test_mesh(axes: &[(&str, usize)]) -> Mesh {
        let count = axes.iter().map(|(_, size)| *size).product::<usize>();
        let devices = (0..count).map(|id| Device::new(id, 0)).collect::<Vec<_>>();
        Mesh::from_devices(&devices, axes).unwrap()
    }

    fn test_plan(mesh: &Mesh, sizes: &[(&str, usize)], resources: &[(&str, Vec<&str>)]) -> ShardingPlan {
        let table =
            AxisSizeTable::with_declared(&sizes.iter().map(|(n, s)| (n.to_string(), *s)).collect::<Vec<_>>()).unwrap();
        let mut axis_resources = AxisResources::new();
        for (axis, tuple) in resources {
            axis_resources.insert(*axis, tuple.iter().copied());
        }
        ShardingPlan::resolve(&table, &axis_resources, mesh, &HashMap::new()).unwrap()
    }

    #[test]
    fn test_sharding_spec_resource_order() {
        let mesh = test_mesh(&[("x", 2), ("y", 2)]);
        let positions = BTreeMap::from([(1, "a".to_string())]);

        let xy = test_plan(&mesh, &[("a", 4)], &[("a", vec!["x", "y"])]);
        assert_eq!(
            ShardingSpec::for_output(&xy, &positions, 2, &mesh),
            ShardingSpec {
                sharding: vec![DimensionSharding::Unsharded, DimensionSharding::Chunked(vec![2, 2])],
                mesh_mapping: vec![MeshMapping::ShardedAxis(0), MeshMapping::ShardedAxis(1)],
            },
        );

        let yx = test_plan(&mesh, &[("a", 4)], &[("a", vec!["y", "x"])]);
        assert_eq!(
            ShardingSpec::for_output(&yx, &positions, 2, &mesh),
            ShardingSpec {
                sharding: vec![DimensionSharding::Unsharded, DimensionSharding::Chunked(vec![2, 2])],
                mesh_mapping: vec![MeshMapping::ShardedAxis(1), MeshMapping::ShardedAxis(0)],
            },
        );
    }

    #[test]
    fn test_sharding_spec_replicates_unused_mesh_axes() {
        let mesh = test_mesh(&[("x", 2), ("y", 2), ("z", 2)]);
        let plan = test_plan(&mesh, &[("a", 2), ("b", 6)], &[("a", vec!["y"])]);
        let positions = BTreeMap::from([(0, "a".to_string()), (2, "b".to_string())]);
        let spec = ShardingSpec::for_output(&plan, &positions, 3, &mesh);
        assert_eq!(
            spec.sharding,
            vec![DimensionSharding::Chunked(vec![2]), DimensionSharding::Unsharded, DimensionSharding::Unsharded],
        );
        assert_eq!(
            spec.mesh_mapping,
            vec![MeshMapping::Replicated(2), MeshMapping::ShardedAxis(0), MeshMapping::Replicated(2)],
        );
        assert_eq!(
            spec.to_string(),
            "ShardingSpec((Chunked([2]), NoSharding(), NoSharding()), (Replicated(2), ShardedAxis(0), Replicated(2)))",
        );
    }

    #[test]
    fn test_sharding_spec_on_empty_mesh() {
        let mesh = Mesh::empty();
        let plan = test_plan(&mesh, &[("i", 4)], &[]);
        let spec = ShardingSpec::for_output(&plan, &BTreeMap::from([(0, "i".to_string())]), 1, &mesh);
        assert_eq!(spec, ShardingSpec { sharding: vec![DimensionSharding::Unsharded], mesh_mapping: vec![] });
    }

    #[test]
    fn test_shard_slices() {
        let mesh = test_mesh(&[("x", 2), ("y", 2)]);
        let plan = test_plan(&mesh, &[("a", 8)], &[("a", vec!["y", "x"])]);
        let spec = ShardingSpec::for_output(&plan, &BTreeMap::from([(0, "a".to_string())]), 2, &mesh);
        let shards = spec.shard_slices(&[8, 3], &mesh).unwrap();
        let slices = shards.iter().map(|(device, slices)| (device.id(), slices.clone())).collect::<Vec<_>>();
        // Device `k` sits at coordinate `(x, y) = (k / 2, k % 2)` and `y` is the major chunk factor.
        assert_eq!(
            slices,
            vec![(0, vec![0..2, 0..3]), (1, vec![4..6, 0..3]), (2, vec![2..4, 0..3]), (3, vec![6..8, 0..3])],
        );
        assert!(spec.shard_slices(&[8], &mesh).is_err());
    }

    #[test]
    fn test_shard_slices_replicated() {
        let mesh = test_mesh(&[("x", 2)]);
        let spec = ShardingSpec::replicated(1, &mesh);
        let shards = spec.shard_slices(&[5], &mesh).unwrap();
        assert_eq!(shards.len(), 2);
        assert!(shards.iter().all(|(_, slices)| slices == &vec![0..5]));
    }
}
