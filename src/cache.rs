use std::{collections::HashMap, sync::Arc};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::{error::Result, provenance::Digest};

/// Memoises stage results by provenance digest.
///
/// Concurrent requests for the same key share one computation; a failed or cancelled
/// computation drops its slot so that a later request retries it.
pub struct ProvenanceCache<V> {
    slots: Mutex<HashMap<Digest, Arc<OnceCell<Arc<V>>>>>,
}

impl<V> Default for ProvenanceCache<V> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<V> ProvenanceCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached value, or runs `init` and caches its result. The flag is
    /// true on a cache hit.
    pub fn get_or_try_insert_with<F>(&self, key: Digest, init: F) -> Result<(Arc<V>, bool)>
    where
        F: FnOnce() -> Result<V>,
    {
        let slot = Arc::clone(self.slots.lock().entry(key).or_default());
        if let Some(value) = slot.get() {
            return Ok((Arc::clone(value), true));
        }
        let mut computed = false;
        let value = match slot.get_or_try_init(|| {
            computed = true;
            init().map(Arc::new)
        }) {
            Ok(value) => value,
            Err(err) => {
                self.discard_empty(&key, &slot);
                return Err(err);
            }
        };
        Ok((Arc::clone(value), !computed))
    }

    /// Removes a slot left empty by a failed computation unless another caller still holds it.
    fn discard_empty(&self, key: &Digest, slot: &Arc<OnceCell<Arc<V>>>) {
        let mut slots = self.slots.lock();
        let unused = slots.get(key).map_or(false, |current| {
            Arc::ptr_eq(current, slot) && current.get().is_none() && Arc::strong_count(slot) == 2
        });
        if unused {
            slots.remove(key);
        }
    }
}
