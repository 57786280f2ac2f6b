//! # Simulated Transceiver - Testing and Development Mock
//!
//! A transceiver implementation that runs without hardware. It records the
//! commands issued by the driver and talks to the outside world through a
//! [`SimulatorLink`] made of embassy channels.
//!
//! ## Architecture
//!
//! - **Air queue**: frames the simulated chip transmitted, read by the test or
//!   network simulator with `SimulatorLink::transmitted`
//! - **Incoming queue**: frames waiting to be received, pushed with
//!   `SimulatorLink::deliver`
//! - **IRQ line**: interrupt causes raised by the simulated chip; the platform
//!   side forwards them to `RadioDriver::on_interrupt`
//!
//! ## Behavior
//!
//! - With `auto_complete` set, `begin_transmit` immediately raises `TxSuccess`
//!   or `TxFailure`; the failure rate is drawn from a seeded `WyRand` so runs are
//!   reproducible. Without it the test raises completion interrupts itself.
//! - With `loopback` set, every successfully transmitted frame is delivered
//!   back to this node the next time the receiver is armed.
//! - `fail_initialize` makes `initialize` report `NotResponding`, emulating a
//!   dead chip.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use log::{Level, log};
use rand_core::RngCore;
use rand_core::SeedableRng;
use rand_wyrand::WyRand;

use crate::packet::{MacFrame, Packet};
use crate::transceiver::{LinkStatus, RadioIrq, Transceiver, TransceiverError, TransceiverMode};

/// Size of the air queue (frames transmitted by the simulated chip)
const AIR_QUEUE_SIZE: usize = 8;

/// Size of the incoming frame queue
const INCOMING_QUEUE_SIZE: usize = 4;

/// Size of the simulated interrupt line buffer
const IRQ_QUEUE_SIZE: usize = 16;

pub type AirQueue = Channel<CriticalSectionRawMutex, MacFrame, AIR_QUEUE_SIZE>;
pub type IncomingQueue = Channel<CriticalSectionRawMutex, MacFrame, INCOMING_QUEUE_SIZE>;
pub type IrqLine = Channel<CriticalSectionRawMutex, RadioIrq, IRQ_QUEUE_SIZE>;

/// Channels connecting a simulated chip to its environment
///
/// Usually placed in a `static` so both the driver side and the simulated
/// network side can reach it.
pub struct SimulatorLink {
    air: AirQueue,
    incoming: IncomingQueue,
    irq: IrqLine,
}

impl Default for SimulatorLink {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatorLink {
    pub const fn new() -> Self {
        SimulatorLink {
            air: Channel::new(),
            incoming: Channel::new(),
            irq: Channel::new(),
        }
    }

    /// Next frame put on air by the simulated chip
    pub fn transmitted(&self) -> Option<MacFrame> {
        self.air.try_receive().ok()
    }

    /// Waits for the next frame put on air
    pub async fn wait_transmitted(&self) -> MacFrame {
        self.air.receive().await
    }

    /// Offers a frame to the simulated receiver and raises `RxStart` and `RxSuccess`
    ///
    /// Returns `false` if the incoming queue is full; nothing is raised then.
    pub fn deliver(&self, frame: MacFrame) -> bool {
        match self.incoming.try_send(frame) {
            Ok(()) => {
                self.raise(RadioIrq::RxStart);
                self.raise(RadioIrq::RxSuccess);
                true
            }
            Err(TrySendError::Full(_)) => {
                log!(Level::Warn, "Simulated incoming queue full, frame dropped");
                false
            }
        }
    }

    /// Emulates a reception aborted by a CRC error
    pub fn deliver_corrupted(&self) {
        self.raise(RadioIrq::RxStart);
        self.raise(RadioIrq::RxFailure);
    }

    pub fn raise(&self, irq: RadioIrq) {
        if self.irq.try_send(irq).is_err() {
            log!(Level::Warn, "Simulated IRQ line overflow, {:?} lost", irq);
        }
    }

    /// Pending interrupt, if any
    pub fn next_irq(&self) -> Option<RadioIrq> {
        self.irq.try_receive().ok()
    }

    pub async fn wait_irq(&self) -> RadioIrq {
        self.irq.receive().await
    }
}

/// Simulated radio chip
pub struct SimulatedTransceiver<'a> {
    link: &'a SimulatorLink,
    rng: WyRand,
    tx_failure_percent: u8,
    loopback: bool,
    auto_complete: bool,
    fail_initialize: bool,
    mode: TransceiverMode,
    address: u16,
    pan_id: u16,
    channel: u8,
    hard_retries: u8,
    init_count: u32,
    calibration_count: u32,
    current_rx: Option<MacFrame>,
    pending_loopback: Option<MacFrame>,
    link_status: LinkStatus,
}

impl<'a> SimulatedTransceiver<'a> {
    /// Creates a chip that completes nothing on its own
    pub fn new(link: &'a SimulatorLink, seed: u64) -> Self {
        SimulatedTransceiver {
            link,
            rng: WyRand::seed_from_u64(seed),
            tx_failure_percent: 0,
            loopback: false,
            auto_complete: false,
            fail_initialize: false,
            mode: TransceiverMode::Off,
            address: 0,
            pan_id: 0,
            channel: 0,
            hard_retries: 0,
            init_count: 0,
            calibration_count: 0,
            current_rx: None,
            pending_loopback: None,
            link_status: LinkStatus { rssi: 20, ed: 60 },
        }
    }

    /// Raise TX completion interrupts immediately, failing `percent` % of transmissions
    pub fn with_auto_complete(mut self, percent: u8) -> Self {
        self.auto_complete = true;
        self.tx_failure_percent = percent.min(100);
        self
    }

    pub fn with_loopback(mut self) -> Self {
        self.loopback = true;
        self
    }

    pub fn with_link_status(mut self, link_status: LinkStatus) -> Self {
        self.link_status = link_status;
        self
    }

    pub fn set_fail_initialize(&mut self, fail: bool) {
        self.fail_initialize = fail;
    }

    pub fn mode(&self) -> TransceiverMode {
        self.mode
    }

    /// `(address, pan_id, channel)` as last written by the driver
    pub fn addressing(&self) -> (u16, u16, u8) {
        (self.address, self.pan_id, self.channel)
    }

    pub fn hard_retries(&self) -> u8 {
        self.hard_retries
    }

    pub fn init_count(&self) -> u32 {
        self.init_count
    }

    pub fn calibration_count(&self) -> u32 {
        self.calibration_count
    }

    fn take_received(&mut self) -> Option<MacFrame> {
        match self.current_rx.take() {
            Some(frame) => Some(frame),
            None => self.link.incoming.try_receive().ok(),
        }
    }
}

impl Transceiver for SimulatedTransceiver<'_> {
    fn initialize(&mut self) -> Result<(), TransceiverError> {
        self.init_count += 1;
        if self.fail_initialize {
            log!(Level::Debug, "Simulated chip not responding");
            return Err(TransceiverError::NotResponding);
        }
        self.mode = TransceiverMode::Idle;
        self.current_rx = None;
        self.pending_loopback = None;
        Ok(())
    }

    fn set_address(&mut self, address: u16, pan_id: u16) {
        self.address = address;
        self.pan_id = pan_id;
    }

    fn set_channel(&mut self, channel: u8) {
        self.channel = channel;
    }

    fn set_hard_retries(&mut self, retries: u8) {
        self.hard_retries = retries;
    }

    fn set_mode(&mut self, mode: TransceiverMode) {
        log::trace!("Simulated chip mode {:?} -> {:?}", self.mode, mode);
        self.mode = mode;
    }

    fn begin_transmit(&mut self, packet: &Packet) -> Result<(), TransceiverError> {
        if self.mode != TransceiverMode::Tx {
            return Err(TransceiverError::Busy);
        }
        let frame = packet.frame().clone();
        if !self.auto_complete {
            if self.link.air.try_send(frame).is_err() {
                log!(Level::Warn, "Simulated air queue full, frame dropped");
            }
            return Ok(());
        }

        let failed = (self.rng.next_u64() % 100) < self.tx_failure_percent as u64;
        if failed {
            self.link.raise(RadioIrq::TxFailure);
            return Ok(());
        }
        if self.loopback {
            self.pending_loopback = Some(frame.clone());
        }
        if self.link.air.try_send(frame).is_err() {
            log!(Level::Warn, "Simulated air queue full, frame dropped");
        }
        self.link.raise(RadioIrq::TxSuccess);
        Ok(())
    }

    fn begin_receive(&mut self) {
        self.mode = TransceiverMode::Rx;
        if let Some(frame) = self.pending_loopback.take() {
            self.link.deliver(frame);
        }
    }

    fn received_length(&mut self) -> usize {
        if self.current_rx.is_none() {
            self.current_rx = self.link.incoming.try_receive().ok();
        }
        self.current_rx.as_ref().map(|frame| frame.length).unwrap_or(0)
    }

    fn read_frame(&mut self, packet: &mut Packet) -> Result<(), TransceiverError> {
        let frame = self.take_received().ok_or(TransceiverError::InvalidFrame)?;
        packet.load_frame(&frame).map_err(|_| TransceiverError::FrameTooLarge)
    }

    fn discard_frame(&mut self) {
        let _ = self.take_received();
    }

    fn read_status(&mut self) -> LinkStatus {
        self.link_status
    }

    fn calibrate(&mut self) {
        self.calibration_count += 1;
    }
}
