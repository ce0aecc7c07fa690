use super::handle::FactoryHandle;
use super::key::FactoryKey;
use crate::core::{ProviderError, Result};
use futures::future::join_all;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

/// Process-wide registry of pooled factory handles keyed by configuration
/// identity.
///
/// Per key the lifecycle is UNSEEN -> CONSTRUCTING -> READY -> (closed ->
/// removed -> UNSEEN). At most one caller constructs for a given key;
/// everyone else requesting that key while construction is in flight
/// suspends on the key's slot lock and observes the winner's outcome: the
/// same handle, or the same error.
///
/// The pool is an explicit object with its own lifecycle: create it at
/// startup, inject it into the provider, and `shutdown()` it when done.
pub struct FactoryPool {
    entries: Mutex<HashMap<FactoryKey, Slot>>,
    weak_self: Weak<FactoryPool>,
}

/// Per-key construction lock plus the key's current state.
type Slot = Arc<tokio::sync::Mutex<SlotState>>;

enum SlotState {
    Vacant,
    Ready(FactoryHandle),
    Failed(ProviderError),
}

impl FactoryPool {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            entries: Mutex::new(HashMap::new()),
            weak_self: weak_self.clone(),
        })
    }

    /// Returns the pooled handle for `key`, constructing it if absent.
    ///
    /// With pooling disabled this always constructs a fresh, unpooled
    /// handle; the cache is neither consulted nor populated. Construction
    /// failures are not cached: the key reverts to unseen and the error
    /// propagates to every caller that joined the attempt. The map lock is
    /// never held across `construct`, so constructions for different keys
    /// proceed in parallel.
    pub async fn get_or_create<F, Fut>(
        &self,
        key: FactoryKey,
        pooling_enabled: bool,
        construct: F,
    ) -> Result<FactoryHandle>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<FactoryHandle>>,
    {
        if !pooling_enabled {
            debug!(?key, "pooling disabled, constructing unpooled factory");
            return construct().await;
        }

        enum Next {
            Hit(FactoryHandle),
            Fail(ProviderError),
            Construct,
            Retry,
        }

        let (slot, mut state) = loop {
            let slot = self.slot_for(&key)?;
            let state = slot.clone().lock_owned().await;

            let next = match &*state {
                SlotState::Ready(handle) if handle.is_open() => Next::Hit(handle.clone()),
                // A closed handle that raced its own deregistration.
                SlotState::Ready(_) => Next::Construct,
                // Joined a construction attempt that failed.
                SlotState::Failed(err) => Next::Fail(err.clone()),
                // A vacant slot may have been deregistered between the map
                // lookup and the lock acquisition; constructing into a
                // detached slot would let a second handle go live for this
                // key, so start over on the current slot.
                SlotState::Vacant => {
                    if self.holds(&key, &slot)? {
                        Next::Construct
                    } else {
                        Next::Retry
                    }
                }
            };

            match next {
                Next::Hit(handle) => {
                    debug!(?key, "pool hit");
                    return Ok(handle);
                }
                Next::Fail(err) => return Err(err),
                Next::Construct => break (slot, state),
                Next::Retry => {}
            }
        };

        *state = SlotState::Vacant;
        debug!(?key, "pool miss, constructing");
        match construct().await {
            Ok(handle) => {
                handle.attach_pool(self.weak_self.clone(), key.clone());
                *state = SlotState::Ready(handle.clone());
                Ok(handle)
            }
            Err(err) => {
                *state = SlotState::Failed(err.clone());
                self.remove_slot(&key, &slot)?;
                Err(err)
            }
        }
    }

    fn slot_for(&self, key: &FactoryKey) -> Result<Slot> {
        let mut entries = self.entries.lock()?;
        Ok(entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(SlotState::Vacant)))
            .clone())
    }

    fn holds(&self, key: &FactoryKey, slot: &Slot) -> Result<bool> {
        let entries = self.entries.lock()?;
        Ok(entries.get(key).is_some_and(|current| Arc::ptr_eq(current, slot)))
    }

    /// Drops `key` if its slot still holds `handle`. Invoked by
    /// [`FactoryHandle::close`]; the key reverts to unseen.
    pub(crate) async fn deregister(&self, key: &FactoryKey, handle: &FactoryHandle) -> Result<()> {
        let slot = {
            let entries = self.entries.lock()?;
            entries.get(key).cloned()
        };
        let Some(slot) = slot else {
            return Ok(());
        };

        let mut state = slot.lock().await;
        if matches!(&*state, SlotState::Ready(current) if current == handle) {
            *state = SlotState::Vacant;
            self.remove_slot(key, &slot)?;
            debug!(?key, "pooled factory deregistered");
        }
        Ok(())
    }

    fn remove_slot(&self, key: &FactoryKey, slot: &Slot) -> Result<()> {
        let mut entries = self.entries.lock()?;
        if entries.get(key).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            entries.remove(key);
        }
        Ok(())
    }

    pub fn contains(&self, key: &FactoryKey) -> bool {
        self.entries
            .lock()
            .map(|entries| entries.contains_key(key))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes every pooled handle and drains the map.
    pub async fn shutdown(&self) -> Result<()> {
        let slots: Vec<Slot> = {
            let mut entries = self.entries.lock()?;
            entries.drain().map(|(_, slot)| slot).collect()
        };

        let mut handles = Vec::new();
        for slot in slots {
            let mut state = slot.lock().await;
            if let SlotState::Ready(handle) = std::mem::replace(&mut *state, SlotState::Vacant) {
                handles.push(handle);
            }
        }

        debug!(closing = handles.len(), "pool shutdown");
        for result in join_all(handles.iter().map(|handle| handle.close())).await {
            result?;
        }
        Ok(())
    }
}
