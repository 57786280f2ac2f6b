//! Bounded packet queues with a capacity chosen at initialization

use heapless::Deque;

use crate::packet::Packet;
use crate::{MAX_QUEUE_DEPTH, RadioError};

/// FIFO with a runtime capacity of at most `N` entries
///
/// Failed inserts hand the item back so ownership is never lost.
#[derive(Debug)]
pub(crate) struct BoundedQueue<T, const N: usize> {
    items: Deque<T, N>,
    capacity: usize,
}

impl<T, const N: usize> BoundedQueue<T, N> {
    pub(crate) fn new(capacity: usize) -> Result<Self, RadioError> {
        if capacity == 0 || capacity > N {
            return Err(RadioError::InvalidQueueDepth);
        }
        Ok(BoundedQueue {
            items: Deque::new(),
            capacity,
        })
    }

    pub(crate) fn push_back(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        self.items.push_back(item)
    }

    /// Head insert, used for retries
    pub(crate) fn push_front(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        self.items.push_front(item)
    }

    pub(crate) fn pop_front(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }
}

/// Queued transmission together with its fast-fail flag
#[derive(Debug)]
pub(crate) struct TxRequest {
    pub(crate) packet: Packet,
    pub(crate) fast_fail: bool,
}

pub(crate) type TxQueue = BoundedQueue<TxRequest, MAX_QUEUE_DEPTH>;
pub(crate) type RxQueue = BoundedQueue<Packet, MAX_QUEUE_DEPTH>;
