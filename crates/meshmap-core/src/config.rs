//! Process-wide configuration read from `MESHMAP_*` environment variables.
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `MESHMAP_HOST_DEVICE_COUNT` | `8` | Number of emulated devices returned by [`crate::mesh::local_devices`]. |
//! | `MESHMAP_SPMD_LOWERING` | `0` | When `1`, new mapped functions default to [`LoweringStrategy::Spmd`]. |
//!
//! The environment is read once, the first time [`Config::global`] is called.

use std::{env, sync::OnceLock};

use crate::errors::Error;

pub const HOST_DEVICE_COUNT_VARIABLE: &str = "MESHMAP_HOST_DEVICE_COUNT";
pub const SPMD_LOWERING_VARIABLE: &str = "MESHMAP_SPMD_LOWERING";

const DEFAULT_HOST_DEVICE_COUNT: usize = 8;

/// Strategy used to lower mapped functions onto the mesh.
///
/// The two strategies agree on results but differ in which collectives they can express:
///
/// | Collective | `Sharded` | `Spmd` |
/// |---|---|---|
/// | `pshuffle` over several axes | supported | unsupported |
/// | `pgather` over a mesh-mapped axis | unsupported | supported |
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum LoweringStrategy {
    /// Each device runs a vectorized copy of the function over its chunk of every mapped axis.
    #[default]
    Sharded,
    /// The whole function is lowered once and partitioned by an SPMD partitioner.
    Spmd,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub host_device_count: usize,
    pub lowering_strategy: LoweringStrategy,
}

impl Default for Config {
    fn default() -> Self {
        Self { host_device_count: DEFAULT_HOST_DEVICE_COUNT, lowering_strategy: LoweringStrategy::Sharded }
    }
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|variable| env::var(variable).ok())
    }

    /// Reads the configuration using `lookup` to resolve variable values.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self, Error> {
        let mut config = Self::default();
        if let Some(value) = lookup(HOST_DEVICE_COUNT_VARIABLE) {
            config.host_device_count = match value.trim().parse::<usize>() {
                Ok(count) if count > 0 => count,
                _ => return Err(invalid(HOST_DEVICE_COUNT_VARIABLE, value)),
            };
        }
        if let Some(value) = lookup(SPMD_LOWERING_VARIABLE) {
            config.lowering_strategy = match value.trim() {
                "" | "0" => LoweringStrategy::Sharded,
                "1" => LoweringStrategy::Spmd,
                _ => return Err(invalid(SPMD_LOWERING_VARIABLE, value)),
            };
        }
        Ok(config)
    }

    /// Returns the process-wide configuration, reading the environment on first use.
    pub fn global() -> Result<&'static Self, Error> {
        static CONFIG: OnceLock<Result<Config, Error>> = OnceLock::new();
        CONFIG.get_or_init(Config::from_env).as_ref().map_err(Clone::clone)
    }
}

fn invalid(variable: &str, value: String) -> Error {
    Error::InvalidConfiguration { variable: variable.to_string(), value }
}
