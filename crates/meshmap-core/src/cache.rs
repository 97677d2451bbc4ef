//! Memoization of lowered mapped functions.
//!
//! Lowering traces the body of a mapped function into a [`Program`]. The result only depends on the abstract
//! signature of a call, captured by [`CacheKey`], so every signature is lowered at most once per process, even when
//! several threads call the same function concurrently. Failed lowerings are cached too: later calls with the same
//! signature get the original error back without tracing the body again.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, LazyLock, Mutex, OnceLock, PoisonError},
};

use tracing::debug;

use crate::{
    axes::{AxisResources, AxisSpec},
    config::LoweringStrategy,
    errors::Error,
    mesh::Mesh,
    programs::Program,
    types::DataType,
};

/// Abstract signature of a call to a mapped function.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub function_id: u64,
    /// Data type and shape of every argument.
    pub arguments: Vec<(DataType, Vec<usize>)>,
    pub in_axes: Vec<AxisSpec>,
    pub out_axes: Vec<AxisSpec>,
    pub axis_resources: AxisResources,
    pub axis_sizes: Vec<(String, usize)>,
    /// Names and sizes of the active mesh axes.
    pub mesh_axes: Vec<(String, usize)>,
    pub mesh_devices: Vec<usize>,
    pub lowering_strategy: LoweringStrategy,
}

impl CacheKey {
    pub(crate) fn mesh_signature(mesh: &Mesh) -> (Vec<(String, usize)>, Vec<usize>) {
        let axes = mesh.axes().iter().map(|axis| (axis.name().to_string(), axis.size())).collect();
        let devices = mesh.devices().iter().map(|device| device.id()).collect();
        (axes, devices)
    }
}

/// Result of lowering a mapped function for one [`CacheKey`].
#[derive(Debug)]
pub struct Lowered {
    /// Traced body. Its inputs vary over the logical axes of the corresponding arguments.
    pub program: Program,
    /// Positions at which the logical axes of every output are inserted.
    pub out_positions: Vec<BTreeMap<usize, String>>,
}

type Slot = Arc<OnceLock<Result<Arc<Lowered>, Error>>>;

/// Thread-safe cache of [`Lowered`] functions.
#[derive(Default)]
pub struct CallCache {
    entries: Mutex<HashMap<CacheKey, Slot>>,
}

impl CallCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lowering cached for `key`, invoking `lower` to populate the cache if there is none.
    ///
    /// Concurrent callers with the same key wait for a single invocation of `lower`. The map lock is only held while
    /// looking up the slot, so lowering one key never blocks lookups for another.
    pub fn get_or_lower<F>(&self, key: CacheKey, lower: F) -> Result<Arc<Lowered>, Error>
    where
        F: FnOnce() -> Result<Lowered, Error>,
    {
        let function_id = key.function_id;
        let slot = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            entries.entry(key).or_default().clone()
        };
        if let Some(lowered) = slot.get() {
            debug!(function_id, "call cache hit");
            return lowered.clone();
        }
        slot.get_or_init(|| {
            debug!(function_id, "call cache miss; lowering");
            lower().map(Arc::new)
        })
        .clone()
    }

    /// Removes every cached lowering, forcing the next call of every function to lower it again.
    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(entries = entries.len(), "clearing call cache");
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static CALL_CACHE: LazyLock<CallCache> = LazyLock::new(CallCache::new);

/// Process-wide cache used by mapped functions.
pub fn global() -> &'static CallCache {
    &CALL_CACHE
}

/// Clears the process-wide cache.
pub fn clear_cache() {
    global().clear();
}
