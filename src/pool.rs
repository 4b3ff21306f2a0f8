//! Bounded pool of soft buffers indexed by buffer identifier

use std::collections::{btree_map, BTreeMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{BufferIdentifier, Error, SoftBuffer};

/// Configuration of a soft-buffer pool
#[derive(Clone, Eq, Hash, PartialEq, Debug, Copy, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Maximum number of LLR values stored per codeblock
    pub max_codeblock_size: usize,
    /// Maximum number of soft buffers in the pool
    pub max_buffers: usize,
    /// Maximum number of codeblocks in the pool (shared by all soft buffers)
    pub max_codeblocks: usize,
    /// Number of slots after which an untouched soft buffer may be evicted
    pub expire_timeout_slots: u64,
}

impl PoolConfig {
    /// Checks that all bounds are positive and that a full pool is addressable.
    ///
    /// # Errors
    ///
    /// Returns an error if any field is `0`, or if `max_codeblock_size * max_codeblocks` exceeds
    /// `isize::MAX`.
    pub fn validate(&self) -> Result<(), Error> {
        let fields = [
            ("max_codeblock_size", self.max_codeblock_size == 0),
            ("max_buffers", self.max_buffers == 0),
            ("max_codeblocks", self.max_codeblocks == 0),
            ("expire_timeout_slots", self.expire_timeout_slots == 0),
        ];
        if let Some((name, _)) = fields.iter().find(|(_, is_zero)| *is_zero) {
            return Err(Error::InvalidArgument(format!(
                "Pool configuration field '{name}' must be a positive integer"
            )));
        }
        let total_size = self
            .max_codeblock_size
            .checked_mul(self.max_codeblocks)
            .and_then(|total_size| isize::try_from(total_size).ok());
        if total_size.is_none() {
            return Err(Error::InvalidArgument(format!(
                "Pool of {} codeblocks of {} LLR values exceeds the address space",
                self.max_codeblocks, self.max_codeblock_size
            )));
        }
        Ok(())
    }
}

/// Soft buffer together with its access bookkeeping
#[derive(Debug)]
struct Entry {
    /// Stored soft buffer
    buffer: SoftBuffer,
    /// Slot of the latest reservation or CRC reset
    last_access_slot: u64,
}

/// Bounded collection of soft buffers indexed by [`BufferIdentifier`]
///
/// The pool never holds more than `max_buffers` soft buffers or more than `max_codeblocks`
/// codeblocks in total. Soft buffers that have not been accessed for more than
/// `expire_timeout_slots` slots are evicted only when a new allocation would not fit otherwise.
#[derive(Debug)]
pub struct BufferPool {
    /// Pool configuration
    config: PoolConfig,
    /// Live soft buffers
    entries: BTreeMap<BufferIdentifier, Entry>,
    /// Sum of codeblocks over all live soft buffers
    nof_codeblocks_in_use: usize,
    /// Logical time
    current_slot: u64,
}

impl BufferPool {
    /// Returns empty pool with given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any bound in `config` is `0`.
    pub fn new(config: PoolConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            config,
            entries: BTreeMap::new(),
            nof_codeblocks_in_use: 0,
            current_slot: 0,
        })
    }

    /// Returns soft buffer for a transmission, creating or reusing it as needed.
    ///
    /// # Parameters
    ///
    /// - `id`: Soft-buffer identifier.
    ///
    /// - `nof_codeblocks`: Number of codeblocks in the transport block.
    ///
    /// - `is_new_data`: `true` for a new transmission, in which case any soft buffer stored for
    ///   `id` is discarded and replaced by a zero-initialized one; `false` for a retransmission,
    ///   in which case the stored soft buffer is returned with its combined LLR values.
    ///
    /// # Errors
    ///
    /// Returns an error if `nof_codeblocks` is `0`, if a new soft buffer does not fit in the pool
    /// even after evicting expired ones (the pool is then left unchanged), if a retransmission
    /// refers to an identifier without a soft buffer, or if the stored soft buffer for a
    /// retransmission has a different number of codeblocks.
    ///
    /// # Examples
    ///
    /// ```
    /// use harqbuf::{BufferIdentifier, BufferPool, PoolConfig};
    ///
    /// let mut pool = BufferPool::new(PoolConfig {
    ///     max_codeblock_size: 64,
    ///     max_buffers: 2,
    ///     max_codeblocks: 4,
    ///     expire_timeout_slots: 10,
    /// })?;
    /// let id = BufferIdentifier::new(0x4601, 0);
    /// assert!(pool.reserve(id, 2, false).is_err());
    /// pool.reserve(id, 2, true)?.codeblock_mut(0)[0] = 5;
    /// assert_eq!(pool.reserve(id, 2, false)?.codeblock(0)[0], 5);
    /// assert_eq!(pool.reserve(id, 2, true)?.codeblock(0)[0], 0);
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn reserve(
        &mut self,
        id: BufferIdentifier,
        nof_codeblocks: usize,
        is_new_data: bool,
    ) -> Result<&mut SoftBuffer, Error> {
        self.reserve_at(self.current_slot, id, nof_codeblocks, is_new_data)
    }

    /// Returns soft buffer for a transmission in `slot`, as [`BufferPool::reserve`] does.
    ///
    /// Expiration is evaluated at `slot` (or at the current slot, if later), and the logical time
    /// of the pool advances to it only if the reservation succeeds.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`BufferPool::reserve`], leaving the pool and its logical time
    /// unchanged.
    pub fn reserve_at(
        &mut self,
        slot: u64,
        id: BufferIdentifier,
        nof_codeblocks: usize,
        is_new_data: bool,
    ) -> Result<&mut SoftBuffer, Error> {
        if nof_codeblocks == 0 {
            return Err(Error::InvalidArgument(format!(
                "Soft buffer {id} requested with zero codeblocks"
            )));
        }
        let now = self.current_slot.max(slot);
        if is_new_data {
            self.reserve_new(id, nof_codeblocks, now)
        } else {
            self.reserve_existing(id, nof_codeblocks, now)
        }
    }

    /// Clears the CRC flags of a soft buffer without discarding its LLR values.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no soft buffer for `id`.
    pub fn reset_codeblocks_crc(&mut self, id: BufferIdentifier) -> Result<(), Error> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(Error::IdentifierNotFound { id })?;
        entry.buffer.reset_codeblocks_crc();
        entry.last_access_slot = self.current_slot;
        debug!(%id, "reset codeblock CRCs");
        Ok(())
    }

    /// Advances the logical time of the pool to `slot` (earlier slots are ignored).
    pub fn run_slot(&mut self, slot: u64) {
        self.current_slot = self.current_slot.max(slot);
    }

    /// Returns the logical time of the pool.
    #[must_use]
    pub fn current_slot(&self) -> u64 {
        self.current_slot
    }

    /// Returns pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Returns soft buffer stored for `id`, if any.
    #[must_use]
    pub fn get(&self, id: BufferIdentifier) -> Option<&SoftBuffer> {
        self.entries.get(&id).map(|entry| &entry.buffer)
    }

    /// Returns `true` if a soft buffer is stored for `id`.
    #[must_use]
    pub fn contains(&self, id: BufferIdentifier) -> bool {
        self.entries.contains_key(&id)
    }

    /// Returns number of live soft buffers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the pool holds no soft buffers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns total number of codeblocks held by live soft buffers.
    #[must_use]
    pub fn nof_codeblocks_in_use(&self) -> usize {
        self.nof_codeblocks_in_use
    }

    /// Returns iterator over live soft buffers, in identifier order.
    pub fn buffers(&self) -> impl Iterator<Item = (BufferIdentifier, &SoftBuffer)> {
        self.entries.iter().map(|(&id, entry)| (id, &entry.buffer))
    }

    /// Returns existing soft buffer for a retransmission.
    fn reserve_existing(
        &mut self,
        id: BufferIdentifier,
        nof_codeblocks: usize,
        now: u64,
    ) -> Result<&mut SoftBuffer, Error> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(Error::IdentifierNotFound { id })?;
        let expected = entry.buffer.nof_codeblocks();
        if expected != nof_codeblocks {
            return Err(Error::CodeblockCountMismatch {
                id,
                expected,
                found: nof_codeblocks,
            });
        }
        entry.last_access_slot = now;
        self.current_slot = now;
        debug!(%id, nof_codeblocks, "reserved soft buffer for retransmission");
        Ok(&mut entry.buffer)
    }

    /// Returns fresh soft buffer for a new transmission.
    fn reserve_new(
        &mut self,
        id: BufferIdentifier,
        nof_codeblocks: usize,
        now: u64,
    ) -> Result<&mut SoftBuffer, Error> {
        let superseded = self
            .entries
            .get(&id)
            .map_or(0, |entry| entry.buffer.nof_codeblocks());
        let other_buffers = self.entries.len() - usize::from(self.entries.contains_key(&id));
        let other_codeblocks = self.nof_codeblocks_in_use - superseded;
        let capacity_exceeded = Error::CapacityExceeded {
            id,
            requested: nof_codeblocks,
            in_use: other_codeblocks,
            max_codeblocks: self.config.max_codeblocks,
            nof_buffers: other_buffers,
            max_buffers: self.config.max_buffers,
        };
        let victims = if self.fits(other_buffers, other_codeblocks, nof_codeblocks) {
            Vec::new()
        } else {
            match self.expired_victims(id, now, other_buffers, other_codeblocks, nof_codeblocks) {
                Some(victims) => victims,
                None => return Err(capacity_exceeded),
            }
        };
        let Some(buffer) = SoftBuffer::try_new(nof_codeblocks, self.config.max_codeblock_size)
        else {
            return Err(capacity_exceeded);
        };
        self.current_slot = now;
        for victim in victims {
            self.evict(victim);
        }
        let fresh = Entry {
            buffer,
            last_access_slot: now,
        };
        self.nof_codeblocks_in_use = self.nof_codeblocks_in_use - superseded + nof_codeblocks;
        if superseded > 0 {
            debug!(%id, "discarded soft buffer superseded by new data");
        }
        debug!(%id, nof_codeblocks, "reserved soft buffer for new data");
        let entry = match self.entries.entry(id) {
            btree_map::Entry::Occupied(mut occupied) => {
                occupied.insert(fresh);
                occupied.into_mut()
            }
            btree_map::Entry::Vacant(vacant) => vacant.insert(fresh),
        };
        Ok(&mut entry.buffer)
    }

    /// Returns `true` if a soft buffer with `nof_codeblocks` codeblocks can be added to
    /// `nof_buffers` soft buffers holding `nof_codeblocks_in_use` codeblocks.
    fn fits(&self, nof_buffers: usize, nof_codeblocks_in_use: usize, nof_codeblocks: usize) -> bool {
        nof_buffers < self.config.max_buffers
            && nof_codeblocks_in_use + nof_codeblocks <= self.config.max_codeblocks
    }

    /// Returns `true` if the entry has not been accessed for longer than the expiration timeout.
    fn is_expired(&self, entry: &Entry, now: u64) -> bool {
        now.saturating_sub(entry.last_access_slot) > self.config.expire_timeout_slots
    }

    /// Returns the least recently used soft buffers (other than `id`) expired at slot `now` whose
    /// eviction makes room for `nof_codeblocks` codeblocks, or `None` if evicting all of them
    /// would not.
    fn expired_victims(
        &self,
        id: BufferIdentifier,
        now: u64,
        mut nof_buffers: usize,
        mut nof_codeblocks_in_use: usize,
        nof_codeblocks: usize,
    ) -> Option<Vec<BufferIdentifier>> {
        let mut candidates: Vec<(u64, BufferIdentifier, usize)> = self
            .entries
            .iter()
            .filter(|&(&other, entry)| other != id && self.is_expired(entry, now))
            .map(|(&other, entry)| (entry.last_access_slot, other, entry.buffer.nof_codeblocks()))
            .collect();
        candidates.sort_unstable();
        let mut victims = Vec::new();
        for (_, victim, victim_codeblocks) in candidates {
            if self.fits(nof_buffers, nof_codeblocks_in_use, nof_codeblocks) {
                break;
            }
            victims.push(victim);
            nof_buffers -= 1;
            nof_codeblocks_in_use -= victim_codeblocks;
        }
        self.fits(nof_buffers, nof_codeblocks_in_use, nof_codeblocks)
            .then_some(victims)
    }

    /// Removes an expired soft buffer.
    fn evict(&mut self, id: BufferIdentifier) {
        if let Some(entry) = self.entries.remove(&id) {
            self.nof_codeblocks_in_use -= entry.buffer.nof_codeblocks();
            debug!(
                %id,
                last_access_slot = entry.last_access_slot,
                current_slot = self.current_slot,
                "evicted expired soft buffer"
            );
        }
    }
}
