//! # Packet Pool
//!
//! Bookkeeping for a fixed number of packet slots grouped in payload size
//! classes.
//!
//! ## Storage
//!
//! The pool holds no buffers. Every [`Packet`] carries its own
//! `MAX_PAYLOAD_SIZE` frame, so a size class limits how long a packet's
//! payload may grow, not how much memory it takes. What the pool bounds is
//! the number of packets alive at once, per class.
//!
//! ## Size Classes
//!
//! Slots are numbered consecutively across classes: class 0 owns slots
//! `0..count0`, class 1 the next `count1` slots and so on. A request is served
//! from the smallest class whose payload capacity holds the requested size; if
//! that class has no free slot the next larger class is tried. Running out of
//! slots is ordinary backpressure (`ResourceExhausted`), never a fault.
//!
//! ## Ownership Tracking
//!
//! Each pool gets a process-wide identity when created and stamps it into
//! every packet it lends. A return is accepted only if the identity matches,
//! the slot is currently lent and the capacity matches the slot's class.
//! Anything else came from another pool or was already returned; such returns
//! are rejected and logged, and the free counts stay untouched.

use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::{Level, log};

use crate::packet::Packet;
use crate::{MAX_PAYLOAD_SIZE, MAX_POOL_SLOTS, NUM_SIZE_CLASSES, RadioError};

/// One payload size class of the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeClass {
    /// Largest payload, in bytes, a slot of this class can hold
    pub max_payload: usize,
    /// Number of slots in this class
    pub count: usize,
}

/// Size class table, sorted ascending by `max_payload`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfiguration {
    pub classes: [SizeClass; NUM_SIZE_CLASSES],
}

impl PoolConfiguration {
    pub const fn new(classes: [SizeClass; NUM_SIZE_CLASSES]) -> Self {
        PoolConfiguration { classes }
    }

    pub fn total_slots(&self) -> usize {
        self.classes.iter().map(|class| class.count).sum()
    }

    /// Checks ordering, payload bounds and the slot budget
    ///
    /// # Errors
    /// `InvalidPoolConfiguration` when classes are not strictly ascending,
    /// a class has zero or more than `MAX_PAYLOAD_SIZE` payload, or the total
    /// slot count is zero or above `MAX_POOL_SLOTS`.
    pub fn validate(&self) -> Result<(), RadioError> {
        let mut previous = 0;
        for class in self.classes.iter() {
            if class.max_payload == 0 || class.max_payload > MAX_PAYLOAD_SIZE || class.max_payload <= previous {
                return Err(RadioError::InvalidPoolConfiguration);
            }
            previous = class.max_payload;
        }
        let total = self.total_slots();
        if total == 0 || total > MAX_POOL_SLOTS {
            return Err(RadioError::InvalidPoolConfiguration);
        }
        Ok(())
    }
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        PoolConfiguration::new([
            SizeClass { max_payload: 12, count: 20 },
            SizeClass { max_payload: 86, count: 8 },
            SizeClass {
                max_payload: MAX_PAYLOAD_SIZE,
                count: 2,
            },
        ])
    }
}

static NEXT_POOL_ID: Mutex<CriticalSectionRawMutex, Cell<u16>> = Mutex::new(Cell::new(1));

fn next_pool_id() -> u16 {
    NEXT_POOL_ID.lock(|next| {
        let id = next.get();
        // 0 is never handed out
        next.set(id.checked_add(1).unwrap_or(1));
        id
    })
}

/// Slot accounting for the packets of one driver
#[derive(Debug)]
pub struct PacketPool {
    id: u16,
    classes: [SizeClass; NUM_SIZE_CLASSES],
    lent: [bool; MAX_POOL_SLOTS],
    free: [usize; NUM_SIZE_CLASSES],
    capacity: usize,
}

impl PacketPool {
    /// Creates a pool with every slot free
    ///
    /// # Errors
    /// `InvalidPoolConfiguration` if `config` fails validation.
    pub fn new(config: PoolConfiguration) -> Result<Self, RadioError> {
        config.validate()?;
        let mut free = [0; NUM_SIZE_CLASSES];
        for (index, class) in config.classes.iter().enumerate() {
            free[index] = class.count;
        }
        Ok(PacketPool {
            id: next_pool_id(),
            classes: config.classes,
            lent: [false; MAX_POOL_SLOTS],
            free,
            capacity: config.total_slots(),
        })
    }

    /// Lends a packet able to carry `payload_size` bytes
    ///
    /// The returned packet's payload length is set to `payload_size`.
    ///
    /// # Errors
    /// * `PayloadTooLarge` - no class can hold `payload_size`
    /// * `ResourceExhausted` - every fitting class is empty
    pub fn request(&mut self, payload_size: usize) -> Result<Packet, RadioError> {
        let first_fit = self
            .classes
            .iter()
            .position(|class| class.max_payload >= payload_size)
            .ok_or(RadioError::PayloadTooLarge)?;

        for class_index in first_fit..NUM_SIZE_CLASSES {
            if self.free[class_index] == 0 {
                continue;
            }
            let (start, end) = self.slot_range(class_index);
            if let Some(slot) = (start..end).find(|slot| !self.lent[*slot]) {
                self.lent[slot] = true;
                self.free[class_index] -= 1;
                if class_index != first_fit {
                    log::trace!("Pool class {} empty, lending slot {} from class {}", first_fit, slot, class_index);
                }
                return Ok(Packet::lend(self.id, slot as u8, self.classes[class_index].max_payload, payload_size));
            }
        }

        log::debug!("Pool exhausted for payload size {}", payload_size);
        Err(RadioError::ResourceExhausted)
    }

    /// Takes a packet back into the pool
    ///
    /// # Errors
    /// `ForeignPacket` if the packet was not lent by this pool; the packet is
    /// dropped and the free counts stay unchanged.
    pub fn release(&mut self, packet: Packet) -> Result<(), RadioError> {
        let slot = packet.slot();
        if packet.pool_id() != self.id {
            log!(Level::Error, "Returned packet slot {} belongs to pool {}, not {}", slot, packet.pool_id(), self.id);
            return Err(RadioError::ForeignPacket);
        }
        let class_index = match self.class_of(slot) {
            Some(index) => index,
            None => {
                log!(Level::Error, "Returned packet slot {} is outside of the pool", slot);
                return Err(RadioError::ForeignPacket);
            }
        };
        if !self.lent[slot] || self.classes[class_index].max_payload != packet.capacity() {
            log!(Level::Error, "Returned packet slot {} was not lent by this pool", slot);
            return Err(RadioError::ForeignPacket);
        }
        self.lent[slot] = false;
        self.free[class_index] += 1;
        Ok(())
    }

    /// Free slots across all classes
    pub fn free_count(&self) -> usize {
        self.free.iter().sum()
    }

    /// Free slots in one class
    pub fn free_in_class(&self, class_index: usize) -> usize {
        self.free.get(class_index).copied().unwrap_or(0)
    }

    pub fn lent_count(&self) -> usize {
        self.capacity - self.free_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn classes(&self) -> &[SizeClass; NUM_SIZE_CLASSES] {
        &self.classes
    }

    fn slot_range(&self, class_index: usize) -> (usize, usize) {
        let start: usize = self.classes[..class_index].iter().map(|class| class.count).sum();
        (start, start + self.classes[class_index].count)
    }

    fn class_of(&self, slot: usize) -> Option<usize> {
        let mut end = 0;
        for (index, class) in self.classes.iter().enumerate() {
            end += class.count;
            if slot < end {
                return Some(index);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_pool() -> PacketPool {
        PacketPool::new(PoolConfiguration::new([
            SizeClass { max_payload: 12, count: 2 },
            SizeClass { max_payload: 86, count: 1 },
            SizeClass { max_payload: 117, count: 1 },
        ]))
        .unwrap()
    }

    #[test]
    fn default_configuration_is_valid() {
        let config = PoolConfiguration::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.total_slots(), 30);
    }

    #[test]
    fn rejects_invalid_configurations() {
        let unsorted = PoolConfiguration::new([
            SizeClass { max_payload: 86, count: 1 },
            SizeClass { max_payload: 12, count: 1 },
            SizeClass { max_payload: 117, count: 1 },
        ]);
        assert_eq!(PacketPool::new(unsorted).err(), Some(RadioError::InvalidPoolConfiguration));

        let oversized = PoolConfiguration::new([
            SizeClass { max_payload: 12, count: 1 },
            SizeClass { max_payload: 86, count: 1 },
            SizeClass { max_payload: 200, count: 1 },
        ]);
        assert_eq!(oversized.validate(), Err(RadioError::InvalidPoolConfiguration));

        let too_many = PoolConfiguration::new([
            SizeClass { max_payload: 12, count: 20 },
            SizeClass { max_payload: 86, count: 10 },
            SizeClass { max_payload: 117, count: 3 },
        ]);
        assert_eq!(too_many.validate(), Err(RadioError::InvalidPoolConfiguration));

        let empty = PoolConfiguration::new([
            SizeClass { max_payload: 12, count: 0 },
            SizeClass { max_payload: 86, count: 0 },
            SizeClass { max_payload: 117, count: 0 },
        ]);
        assert_eq!(empty.validate(), Err(RadioError::InvalidPoolConfiguration));
    }

    #[test]
    fn request_picks_best_fit_class() {
        let mut pool = small_pool();
        let small = pool.request(5).unwrap();
        assert_eq!(small.capacity(), 12);
        assert_eq!(small.len(), 5);
        let medium = pool.request(13).unwrap();
        assert_eq!(medium.capacity(), 86);
        assert_eq!(pool.free_in_class(0), 1);
        assert_eq!(pool.free_in_class(1), 0);
        pool.release(small).unwrap();
        pool.release(medium).unwrap();
        assert_eq!(pool.free_count(), pool.capacity());
    }

    #[test]
    fn request_falls_back_to_larger_class() {
        let mut pool = small_pool();
        let a = pool.request(10).unwrap();
        let b = pool.request(10).unwrap();
        let c = pool.request(10).unwrap();
        assert_eq!(c.capacity(), 86);
        let d = pool.request(10).unwrap();
        assert_eq!(d.capacity(), 117);
        assert_eq!(pool.request(1).err(), Some(RadioError::ResourceExhausted));
        assert_eq!(pool.lent_count(), 4);
        for packet in [a, b, c, d] {
            pool.release(packet).unwrap();
        }
        assert_eq!(pool.lent_count(), 0);
    }

    #[test]
    fn request_too_large_payload() {
        let mut pool = small_pool();
        assert_eq!(pool.request(MAX_PAYLOAD_SIZE + 1).err(), Some(RadioError::PayloadTooLarge));
        assert_eq!(pool.free_count(), 4);
    }

    #[test]
    fn release_rejects_foreign_packets() {
        let mut pool = small_pool();
        let mut other = small_pool();

        // Slot 0 is not lent by `pool`
        let foreign = other.request(4).unwrap();
        assert_eq!(pool.release(foreign), Err(RadioError::ForeignPacket));
        assert_eq!(pool.free_count(), 4);

        // Slot out of range
        let out_of_range = Packet::lend(pool.id, 31, 12, 0);
        assert_eq!(pool.release(out_of_range), Err(RadioError::ForeignPacket));

        // Same slot lent, but the capacity belongs to another class
        let _own = pool.request(4).unwrap();
        let mismatched = Packet::lend(pool.id, 0, 86, 0);
        assert_eq!(pool.release(mismatched), Err(RadioError::ForeignPacket));
        assert_eq!(pool.free_count(), 3);
    }

    #[test]
    fn release_rejects_packet_of_other_pool_with_same_slot_lent() {
        let mut pool = small_pool();
        let mut other = small_pool();
        assert_ne!(pool.id, other.id);

        let own = pool.request(4).unwrap();
        let foreign = other.request(4).unwrap();
        assert_eq!(own.slot(), foreign.slot());
        assert_eq!(own.capacity(), foreign.capacity());

        assert_eq!(pool.release(foreign), Err(RadioError::ForeignPacket));
        assert_eq!(pool.lent_count(), 1);
        // The slot stays lent to its real holder
        let next = pool.request(4).unwrap();
        assert_ne!(next.slot(), own.slot());

        pool.release(own).unwrap();
        pool.release(next).unwrap();
        assert_eq!(pool.free_count(), pool.capacity());
    }
}
