//! # Transceiver Interface
//!
//! Downstream boundary of the driver. Implementations translate these
//! commands into the register and SPI operations of a concrete chip; the
//! driver never touches hardware directly.
//!
//! ## Interrupts
//!
//! Completion of an operation is reported asynchronously: the platform
//! interrupt handler reads the chip's interrupt cause, maps it to a
//! [`RadioIrq`] and passes it to `RadioDriver::on_interrupt`. On `RxSuccess`
//! the driver reads the frame out of the chip from within that call through
//! `received_length` and `read_frame`.

use crate::packet::Packet;

/// Operating mode requested from the transceiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransceiverMode {
    Off,
    Idle,
    Rx,
    Tx,
    Sleep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransceiverError {
    /// The chip did not respond or reported an unexpected part number
    NotResponding,
    /// The frame does not fit in the chip's frame buffer
    FrameTooLarge,
    /// The frame buffer content could not be decoded
    InvalidFrame,
    /// The chip is busy with another operation
    Busy,
}

/// Signal quality registers latched at the end of a reception
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStatus {
    /// RSSI register, 0..=28 in 3 dB steps above -91 dBm
    pub rssi: u8,
    /// Energy detect register, 0..=0x54 in 1 dB steps above -91 dBm
    pub ed: u8,
}

/// Interrupt causes reported by the transceiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioIrq {
    TxSuccess,
    /// Hardware retries exhausted or channel access failure
    TxFailure,
    RxStart,
    RxSuccess,
    /// CRC error or aborted reception
    RxFailure,
    /// PLL unlock, brown out or any other fatal condition
    HardwareFailure,
}

/// Commands the driver issues to the radio chip
///
/// All methods are called with the driver's critical section held and must not
/// block for longer than a register access.
pub trait Transceiver {
    /// Resets the chip and verifies it responds
    fn initialize(&mut self) -> Result<(), TransceiverError>;

    fn set_address(&mut self, address: u16, pan_id: u16);

    fn set_channel(&mut self, channel: u8);

    /// Number of retransmissions the chip performs before raising `TxFailure`
    fn set_hard_retries(&mut self, retries: u8);

    fn set_mode(&mut self, mode: TransceiverMode);

    /// Loads the frame buffer and starts the transmission
    fn begin_transmit(&mut self, packet: &Packet) -> Result<(), TransceiverError>;

    /// Arms the receiver (with automatic acknowledgement)
    fn begin_receive(&mut self);

    /// Payload length of the frame waiting in the receive buffer
    fn received_length(&mut self) -> usize;

    /// Copies the received frame into `packet`
    fn read_frame(&mut self, packet: &mut Packet) -> Result<(), TransceiverError>;

    /// Drops the frame waiting in the receive buffer without reading it
    fn discard_frame(&mut self) {}

    fn read_status(&mut self) -> LinkStatus;

    /// Runs the chip's RF calibration
    fn calibrate(&mut self) {}
}
