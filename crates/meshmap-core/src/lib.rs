pub mod arrays;
pub mod axes;
pub mod cache;
pub mod config;
pub mod errors;
pub mod inference;
pub mod mesh;
pub mod ops;
pub mod programs;
pub mod resources;
pub mod sharding;
pub mod tracer;
pub mod types;
pub mod values;
pub mod xmap;
