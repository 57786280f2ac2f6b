//! # Radio Status
//!
//! Snapshot types returned by the driver: the radio state, traffic and
//! diagnostic counters, and per-packet transmission reports.

use embassy_time::Instant;

use crate::transceivers::link_quality;

/// Operating state of the radio state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    /// Low power, entered on request; left only through resume
    Sleep,
    /// Transceiver not initialized (after driver init or a failed power-up)
    Off,
    /// Powered, neither listening nor transmitting
    Idle,
    /// Reconfiguring the transceiver
    Transitioning,
    /// Listening, no frame in progress
    RxIdle,
    /// Frame reception in progress
    RxBusy,
    /// Transmit mode, nothing on air
    TxIdle,
    /// Frame transmission in progress
    TxBusy,
}

impl RadioState {
    /// States in which the radio waits for work
    pub fn is_resting(&self) -> bool {
        matches!(self, RadioState::Sleep | RadioState::Off | RadioState::Idle | RadioState::RxIdle)
    }
}

/// Copy of the driver status at the time it was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioStatus {
    pub state: RadioState,
    /// Successful transmissions, wrapping
    pub packets_sent: u32,
    /// Frames delivered to the RX queue, wrapping
    pub packets_received: u32,
    /// Sequence number of the most recent transmit attempt
    pub sequence_number: u8,
    /// Soft retries spent on the in-flight packet
    pub retry_number: u8,
    /// RSSI register of the last received frame
    pub last_rssi: u8,
    /// Energy detect register of the last received frame
    pub last_ed: u8,
    pub last_calibration_time: Option<Instant>,
    pub last_progress_time: Instant,
    /// Packets dropped after retries or fast-fail
    pub delivery_failures: u32,
    /// Received frames dropped for lack of RX queue space or pool buffers
    pub rx_dropped: u32,
    /// Recoveries triggered by hardware failure interrupts
    pub hardware_resets: u32,
    /// Recoveries triggered by the watchdog
    pub watchdog_resets: u32,
}

impl RadioStatus {
    /// Link quality (0-63) of the last received frame
    pub fn link_quality(&self) -> u8 {
        link_quality::calculate_link_quality(self.last_rssi, self.last_ed)
    }
}

/// Terminal outcome of a queued transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Delivered,
    /// Soft retries used up
    RetriesExhausted,
    /// First failure of a fast-fail packet
    FastFail,
    /// Dropped by a queue flush or a recovery
    Flushed,
}

/// Report produced once per queued packet when it leaves the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReport {
    pub sequence_number: u8,
    pub destination: u16,
    pub outcome: TxOutcome,
}
