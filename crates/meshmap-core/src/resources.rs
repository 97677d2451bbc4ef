//! Resolution of logical axes onto mesh (resource) axes.
//!
//! Each logical axis with a non-empty resource tuple is split into one chunk per resource, in the order the user
//! listed them, and keeps a vectorized *remainder* of `size / product(resource sizes)` elements per device. For
//! example, with mesh `{x: 2, y: 2}` an axis of size 8 assigned to `('x', 'y')` has remainder 2, so every device
//! holds two consecutive elements and the axis index `i` lives on the device at coordinate `(i / 4, (i / 2) % 2)`.

use std::collections::HashMap;

use crate::{
    axes::AxisResources,
    errors::Error,
    inference::AxisSizeTable,
    mesh::{Mesh, MeshAxis},
};

/// Resolved placement of one logical axis.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AxisAssignment {
    axis: String,
    size: usize,
    resources: Vec<MeshAxis>,
}

impl AxisAssignment {
    pub fn axis(&self) -> &str {
        self.axis.as_str()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Mesh axes this logical axis is split over, major to minor.
    pub fn resources(&self) -> &[MeshAxis] {
        self.resources.as_slice()
    }

    pub fn resource_sizes(&self) -> Vec<usize> {
        self.resources.iter().map(MeshAxis::size).collect()
    }

    /// Number of devices the axis is split over.
    pub fn device_factor(&self) -> usize {
        self.resources.iter().map(MeshAxis::size).product()
    }

    /// Number of elements of the axis held by each device.
    pub fn remainder(&self) -> usize {
        self.size / self.device_factor()
    }

    pub fn is_vectorized(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Resolved placement of every logical axis of one call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ShardingPlan {
    assignments: Vec<AxisAssignment>,
}

impl ShardingPlan {
    /// Resolves `axis_resources` against `mesh`.
    ///
    /// `claimed` maps resources already claimed by enclosing mapped functions to the logical axis that claimed them.
    /// Checks run per axis in assignment order: every resource must exist in the mesh, a tuple must not repeat a
    /// resource, a resource may be claimed by at most one axis (the first claim wins), and the axis size must be
    /// divisible by the product of its resource sizes.
    pub fn resolve(
        table: &AxisSizeTable,
        axis_resources: &AxisResources,
        mesh: &Mesh,
        claimed: &HashMap<String, String>,
    ) -> Result<Self, Error> {
        let mut claimed = claimed.clone();
        let mut resolved = HashMap::new();
        for (axis, resources) in axis_resources.iter() {
            let Some(size) = table.size(axis) else {
                return Err(Error::UnresolvedAxisSize { axes: vec![axis.to_string()] });
            };

            let mut mesh_axes = Vec::with_capacity(resources.len());
            for resource in resources {
                let Some(mesh_axis) = mesh.axis(resource) else {
                    return Err(Error::UnknownResourceAxis {
                        axis: axis.to_string(),
                        resource: resource.clone(),
                        mesh_axes: mesh.axis_names(),
                    });
                };
                mesh_axes.push(mesh_axis.clone());
            }

            for (index, resource) in resources.iter().enumerate() {
                if resources[..index].contains(resource) {
                    return Err(Error::DuplicateResourceAssignment {
                        axis: axis.to_string(),
                        resources: resources.to_vec(),
                    });
                }
            }

            for resource in resources {
                if let Some(owner) = claimed.get(resource) {
                    return Err(Error::ResourceAlreadyAssigned {
                        resource: resource.clone(),
                        owner: owner.clone(),
                        axis: axis.to_string(),
                    });
                }
                claimed.insert(resource.clone(), axis.to_string());
            }

            let product = mesh_axes.iter().map(MeshAxis::size).product::<usize>();
            if size % product != 0 {
                return Err(Error::IndivisibleAxisSize {
                    axis: axis.to_string(),
                    size,
                    resources: resources.to_vec(),
                    product,
                });
            }

            resolved.insert(axis.to_string(), mesh_axes);
        }

        let assignments = table
            .entries()
            .iter()
            .map(|entry| AxisAssignment {
                axis: entry.name.clone(),
                size: entry.size,
                resources: resolved.remove(&entry.name).unwrap_or_default(),
            })
            .collect();
        Ok(Self { assignments })
    }

    pub fn assignments(&self) -> &[AxisAssignment] {
        self.assignments.as_slice()
    }

    pub fn assignment(&self, axis: &str) -> Option<&AxisAssignment> {
        self.assignments.iter().find(|assignment| assignment.axis == axis)
    }

    /// Resources claimed by this plan, mapped to the logical axis claiming them.
    pub fn claimed_resources(&self) -> HashMap<String, String> {
        self.assignments
            .iter()
            .flat_map(|assignment| {
                assignment.resources.iter().map(|resource| (resource.name().to_string(), assignment.axis.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;
    use crate::mesh::Device;

    fn test_mesh(axes: &[(&str, usize)]) -> Mesh {
        let count = axes.iter().map(|(_, size)| *size).product::<usize>();
        let devices = (0..count).map(|id| Device::new(id, 0)).collect::<Vec<_>>();
        Mesh::from_devices(&devices, axes).unwrap()
    }

    fn test_table(sizes: &[(&str, usize)]) -> AxisSizeTable {
        AxisSizeTable::with_declared(&sizes.iter().map(|(name, size)| (name.to_string(), *size)).collect::<Vec<_>>())
            .unwrap()
    }

    fn test_resources(entries: &[(&str, &[&str])]) -> AxisResources {
        let mut resources = AxisResources::new();
        for (axis, tuple) in entries {
            resources.insert(*axis, tuple.iter().copied());
        }
        resources
    }

    #[test]
    fn test_resolve_with_remainders() {
        let mesh = test_mesh(&[("x", 2), ("y", 2)]);
        let table = test_table(&[("a", 8), ("b", 2), ("c", 3)]);
        let resources = test_resources(&[("a", &["x", "y"][..]), ("b", &[][..])]);
        let plan = ShardingPlan::resolve(&table, &resources, &mesh, &HashMap::new()).unwrap();

        let a = plan.assignment("a").unwrap();
        assert_eq!(a.resource_sizes(), vec![2, 2]);
        assert_eq!(a.device_factor(), 4);
        assert_eq!(a.remainder(), 2);
        assert!(plan.assignment("b").unwrap().is_vectorized());
        assert_eq!(plan.assignment("c").unwrap().remainder(), 3);
        assert_eq!(plan.claimed_resources().get("y"), Some(&"a".to_string()));
    }

    #[test]
    fn test_resolve_remainder_one() {
        let mesh = test_mesh(&[("x", 2), ("y", 2)]);
        let plan = ShardingPlan::resolve(
            &test_table(&[("a", 4)]),
            &test_resources(&[("a", &["y", "x"][..])]),
            &mesh,
            &HashMap::new(),
        )
        .unwrap();
        let a = plan.assignment("a").unwrap();
        assert_eq!(a.remainder(), 1);
        assert_eq!(a.resources().iter().map(MeshAxis::name).collect::<Vec<_>>(), vec!["y", "x"]);
    }

    #[test]
    fn test_resolve_unknown_resource() {
        let error = ShardingPlan::resolve(
            &test_table(&[("a", 4)]),
            &test_resources(&[("a", &["z"][..])]),
            &test_mesh(&[("x", 2)]),
            &HashMap::new(),
        )
        .unwrap_err();
        assert_eq!(error.to_string(), "Resource axis: z of a is not found in mesh: ('x',).");
    }

    #[test]
    fn test_resolve_duplicate_and_reused_resources() {
        let mesh = test_mesh(&[("x", 2), ("y", 2)]);
        let table = test_table(&[("a", 4), ("b", 4)]);
        assert!(matches!(
            ShardingPlan::resolve(&table, &test_resources(&[("a", &["x", "x"][..])]), &mesh, &HashMap::new()),
            Err(Error::DuplicateResourceAssignment { axis, .. }) if axis == "a",
        ));
        let resources = test_resources(&[("a", &["x"][..]), ("b", &["y", "x"][..])]);
        assert_eq!(
            ShardingPlan::resolve(&table, &resources, &mesh, &HashMap::new()),
            Err(Error::ResourceAlreadyAssigned {
                resource: "x".to_string(),
                owner: "a".to_string(),
                axis: "b".to_string()
            }),
        );

        let claimed = HashMap::from([("y".to_string(), "outer".to_string())]);
        assert!(matches!(
            ShardingPlan::resolve(&table, &test_resources(&[("a", &["y"][..])]), &mesh, &claimed),
            Err(Error::ResourceAlreadyAssigned { owner, .. }) if owner == "outer",
        ));
    }

    #[test]
    fn test_resolve_indivisible_axis() {
        let error = ShardingPlan::resolve(
            &test_table(&[("i", 5)]),
            &test_resources(&[("i", &["x", "y"][..])]),
            &test_mesh(&[("x", 2), ("y", 2)]),
            &HashMap::new(),
        )
        .unwrap_err();
        assert_eq!(
            error.to_string(),
            "Size of axis i (5) is not divisible by the number of resources it is assigned to (('x', 'y'), 4 in total)",
        );
    }

    proptest! {
        #[test]
        fn test_resolve_divisibility(size in 1usize..64, x in 1usize..5, y in 1usize..5) {
            let mesh = test_mesh(&[("x", x), ("y", y)]);
            let result = ShardingPlan::resolve(
                &test_table(&[("a", size)]),
                &test_resources(&[("a", &["x", "y"][..])]),
                &mesh,
                &HashMap::new(),
            );
            if size % (x * y) == 0 {
                let plan = result.unwrap();
                let assignment = plan.assignment("a").unwrap();
                prop_assert_eq!(assignment.remainder() * assignment.device_factor(), size);
            } else {
                let indivisible = matches!(result, Err(Error::IndivisibleAxisSize { product, .. }) if product == x * y);
                prop_assert!(indivisible);
            }
        }
    }
}
