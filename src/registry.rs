//! Registry of buffer pools addressed by opaque handles

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{BufferPool, Error, PoolConfig};

/// Opaque handle of a buffer pool
///
/// The handle packs the index of a registry slot (low 32 bits) together with the generation of
/// that slot (high 32 bits). Generations start at `1` and increase every time a slot is reused,
/// so a released handle never aliases a pool created later, and `0` is never a valid handle.
#[derive(Clone, Eq, Hash, Ord, PartialEq, PartialOrd, Debug, Copy, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Handle(u64);

impl Handle {
    /// Returns handle for given slot index and generation.
    fn new(index: u32, generation: u32) -> Self {
        Self((u64::from(generation) << 32) | u64::from(index))
    }

    /// Returns slot index encoded in the handle.
    #[allow(clippy::cast_possible_truncation)]
    fn index(self) -> u32 {
        self.0 as u32
    }

    /// Returns slot generation encoded in the handle.
    #[allow(clippy::cast_possible_truncation)]
    fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Returns position of the slot in the registry.
    fn position(self) -> usize {
        self.index() as usize
    }

    /// Returns the raw value of the handle.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for Handle {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<Handle> for u64 {
    fn from(handle: Handle) -> Self {
        handle.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Registry slot
#[derive(Debug)]
struct Slot {
    /// Generation of the latest handle issued for this slot
    generation: u32,
    /// Pool owned by the slot, if live
    pool: Option<BufferPool>,
}

/// Owner of independently-lived buffer pools
///
/// Pools persist until released explicitly. Handles of released pools are rejected, even after
/// their slot has been reused.
#[derive(Debug, Default)]
pub struct HandleRegistry {
    /// Pool slots
    slots: Vec<Slot>,
    /// Indices of slots without a live pool
    free: Vec<u32>,
}

impl HandleRegistry {
    /// Returns empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty buffer pool and returns its handle.
    ///
    /// # Errors
    ///
    /// Returns an error if any bound in `config` is `0`, or if the registry has run out of
    /// handles.
    ///
    /// # Examples
    ///
    /// ```
    /// use harqbuf::{HandleRegistry, PoolConfig};
    ///
    /// let config = PoolConfig {
    ///     max_codeblock_size: 8192,
    ///     max_buffers: 4,
    ///     max_codeblocks: 16,
    ///     expire_timeout_slots: 10,
    /// };
    /// let mut registry = HandleRegistry::new();
    /// let first = registry.create(config)?;
    /// assert!(registry.release(first));
    /// let second = registry.create(config)?;
    /// assert_ne!(first, second);
    /// assert!(registry.get(first).is_err());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn create(&mut self, config: PoolConfig) -> Result<Handle, Error> {
        let pool = BufferPool::new(config)?;
        let handle = if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation += 1;
            slot.pool = Some(pool);
            Handle::new(index, slot.generation)
        } else {
            let index = u32::try_from(self.slots.len())
                .map_err(|_| Error::InvalidArgument("Buffer pool registry is full".to_string()))?;
            self.slots.push(Slot {
                generation: 1,
                pool: Some(pool),
            });
            Handle::new(index, 1)
        };
        info!(%handle, ?config, "created buffer pool");
        Ok(handle)
    }

    /// Returns pool addressed by `handle`.
    ///
    /// # Errors
    ///
    /// Returns an error if `handle` was never issued or has been released.
    pub fn get(&self, handle: Handle) -> Result<&BufferPool, Error> {
        self.slots
            .get(handle.position())
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.pool.as_ref())
            .ok_or(Error::HandleNotFound(handle.as_u64()))
    }

    /// Returns mutable pool addressed by `handle`.
    ///
    /// # Errors
    ///
    /// Returns an error if `handle` was never issued or has been released.
    pub fn get_mut(&mut self, handle: Handle) -> Result<&mut BufferPool, Error> {
        self.slots
            .get_mut(handle.position())
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.pool.as_mut())
            .ok_or(Error::HandleNotFound(handle.as_u64()))
    }

    /// Destroys the pool addressed by `handle` together with all its soft buffers.
    ///
    /// Returns `true` if there was a live pool for `handle`, and `false` otherwise.
    pub fn release(&mut self, handle: Handle) -> bool {
        let Some(slot) = self
            .slots
            .get_mut(handle.position())
            .filter(|slot| slot.generation == handle.generation())
        else {
            return false;
        };
        match slot.pool.take() {
            Some(pool) => {
                // A slot whose generation space is exhausted is retired instead of reused.
                if slot.generation < u32::MAX {
                    self.free.push(handle.index());
                }
                info!(%handle, nof_buffers = pool.len(), "released buffer pool");
                true
            }
            None => false,
        }
    }

    /// Returns number of live pools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.pool.is_some()).count()
    }

    /// Returns `true` if there are no live pools.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns handles of all live pools.
    #[must_use]
    pub fn handles(&self) -> Vec<Handle> {
        self.slots
            .iter()
            .zip(0 ..)
            .filter(|(slot, _)| slot.pool.is_some())
            .map(|(slot, index)| Handle::new(index, slot.generation))
            .collect()
    }
}
