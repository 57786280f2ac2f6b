#![cfg_attr(not(any(test, feature = "std")), no_std)]

//! # Radio Link Library
//!
//! Link-layer driver for half-duplex IEEE 802.15.4 transceivers on small
//! controllers. The driver owns every packet buffer in the system and moves
//! them between a fixed pool, a bounded TX queue, a single in-flight slot and a
//! bounded RX queue while a radio state machine drives the transceiver.
//!
//! ## Architecture
//!
//! - **PacketPool**: slot accounting for packets, grouped in payload size classes
//! - **Queues**: bounded TX/RX FIFOs; retried packets go back to the TX head
//! - **RetryController**: soft retries and the per-packet fast-fail flag
//! - **Watchdog**: resets the radio when no state progress is observed
//! - **RadioDriver**: the state machine, split into an interrupt top half
//!   (`on_interrupt`) and a cooperative bottom half (`process`)
//!
//! The transceiver itself is an external collaborator described by the
//! [`Transceiver`] trait; a simulated implementation is available behind the
//! `radio-device-simulator` feature.
//!
//! ## Example
//! ```rust,ignore
//! let driver = RadioDriver::new(transceiver);
//! driver.initialize(8, 8)?;
//! driver.power_up()?;
//! driver.enable_listen()?;
//!
//! let mut packet = driver.request_packet(4)?;
//! packet.set_destination(0x2202);
//! packet.data_mut().copy_from_slice(&[1, 2, 3, 4]);
//! if let Err(rejected) = driver.enqueue_tx(packet, false) {
//!     driver.return_packet(rejected.into_packet())?;
//! }
//!
//! // From the transceiver interrupt:
//! driver.on_interrupt(RadioIrq::TxSuccess);
//! // From the main loop:
//! driver.process();
//! ```

pub mod config;
pub mod driver;
pub mod packet;
pub mod pool;
pub(crate) mod queue;
pub mod retry;
pub mod status;
pub mod task;
pub mod transceiver;
pub mod transceivers;
pub(crate) mod watchdog;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

pub use config::{RadioAddress, RadioConfiguration};
pub use driver::{EnqueueError, RadioDriver};
pub use packet::{MacFrame, MacHeader, Packet};
pub use pool::{PacketPool, PoolConfiguration, SizeClass};
pub use retry::{RetryController, RetryDecision};
pub use status::{RadioState, RadioStatus, TxOutcome, TxReport};
pub use transceiver::{LinkStatus, RadioIrq, Transceiver, TransceiverError, TransceiverMode};

//Hardware dependent constants, that affect compatibility of a node

/// Largest payload an 802.15.4 frame carries (127 - 8 MPDU header - 2 payload header)
pub const MAX_PAYLOAD_SIZE: usize = 117;

/// Lowest channel of the 2.4 GHz 802.15.4 band
pub const MIN_CHANNEL: u8 = 11;
/// Highest channel of the 2.4 GHz 802.15.4 band
pub const MAX_CHANNEL: u8 = 26;

//Hardware dependent constants, that only affect memory usage of a node

/// Upper bound for the runtime TX/RX queue depths passed to `initialize`
pub const MAX_QUEUE_DEPTH: usize = 16;

/// Upper bound for the number of buffers across all pool size classes
pub const MAX_POOL_SLOTS: usize = 32;

/// Number of payload size classes in a pool configuration
pub const NUM_SIZE_CLASSES: usize = 3;

const EVENT_QUEUE_SIZE: usize = 8;
type EventQueue = Channel<CriticalSectionRawMutex, driver::RadioEvent, EVENT_QUEUE_SIZE>;

const TX_REPORT_QUEUE_SIZE: usize = 16;

/// Errors reported synchronously by the driver
///
/// Transient transmission failures never show up here: they are absorbed by
/// the retry controller. Terminal delivery failures are reported through
/// [`TxReport`]s and fatal hardware failures only through status counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioError {
    /// The driver has not been initialized yet
    NotInitialized,
    /// No pool buffer or queue slot is available; back off or drop the data
    ResourceExhausted,
    /// The requested payload does not fit in any pool size class
    PayloadTooLarge,
    /// Channel outside of the 802.15.4 2.4 GHz range
    InvalidChannel(u8),
    /// Queue depth is zero or above `MAX_QUEUE_DEPTH`
    InvalidQueueDepth,
    /// Pool size classes are unsorted, empty or exceed `MAX_POOL_SLOTS`
    InvalidPoolConfiguration,
    /// The request is not valid in the current radio state
    InvalidState(RadioState),
    /// The packet was not lent by this pool (or was already reclaimed)
    ForeignPacket,
    /// The transceiver rejected a command
    Transceiver(TransceiverError),
}

impl From<TransceiverError> for RadioError {
    fn from(error: TransceiverError) -> Self {
        RadioError::Transceiver(error)
    }
}
