pub use meshmap_core as core;

pub use meshmap_core::arrays::Array;
pub use meshmap_core::arrays::Shard;
pub use meshmap_core::axes::AxisResources;
pub use meshmap_core::axes::AxisSpec;
pub use meshmap_core::cache::clear_cache;
pub use meshmap_core::config::Config;
pub use meshmap_core::config::LoweringStrategy;
pub use meshmap_core::errors::Error;
pub use meshmap_core::mesh::Device;
pub use meshmap_core::mesh::Mesh;
pub use meshmap_core::mesh::MeshGuard;
pub use meshmap_core::mesh::local_devices;
pub use meshmap_core::mesh::mesh;
pub use meshmap_core::ops::collectives::AxisRef;
pub use meshmap_core::ops::constants::axis_index;
pub use meshmap_core::ops::constants::full;
pub use meshmap_core::ops::constants::zeros;
pub use meshmap_core::sharding::DimensionSharding;
pub use meshmap_core::sharding::MeshMapping;
pub use meshmap_core::sharding::ShardingSpec;
pub use meshmap_core::tracer::Tracer;
pub use meshmap_core::types::DataType;
pub use meshmap_core::types::NamedShape;
pub use meshmap_core::xmap::Xmap;
pub use meshmap_core::xmap::vmap;
pub use meshmap_core::xmap::xmap;
