//! # Radio Driver
//!
//! The coordinating core of the library: a radio state machine that moves
//! packet buffers between the pool, the TX queue, the in-flight slot and the RX
//! queue while commanding a [`Transceiver`].
//!
//! ## Execution Model
//!
//! The driver is split in two halves:
//!
//! - **Top half** (`on_interrupt`): called from the transceiver interrupt. It
//!   only records the event in a small event queue; for `RxSuccess` it also
//!   copies the received frame into a pool buffer before the chip overwrites
//!   it. No retry, queue service or watchdog logic runs here.
//! - **Bottom half** (`process` / `process_at`): called cooperatively from the
//!   main loop or the async [`run`](RadioDriver::run) task. It consumes pending
//!   events, services the TX queue, evaluates the watchdog and performs the
//!   periodic calibration.
//!
//! All shared state sits behind a blocking mutex over a
//! `CriticalSectionRawMutex`, so every multi-step update happens with
//! interrupts masked.
//!
//! ## State Machine
//!
//! ```text
//!  Off --power_up--> Idle --enable_listen--> RxIdle --RxStart--> RxBusy
//!                     |  ^                     ^  |                |
//!                     |  +------ rest ---------+  +---- poll ---+  +--RxSuccess/RxFailure--> RxIdle
//!                     +--------- poll (TX queued) --------------+--> TxIdle --> TxBusy
//!                                                                       ^          |
//!                                                   retry (queue head) -+    TxSuccess/TxFailure
//! ```
//!
//! Any awake state goes to `Transitioning` on a hardware failure or watchdog
//! expiry, and any state to `Sleep` on request. `Sleep` is left only through
//! `resume`; a failure reported while asleep flushes the queues and defers the
//! chip reinitialization to that resume. Events a state does not accept are
//! ignored.
//!
//! ## Packet Conservation
//!
//! Every packet is in exactly one place: pool, TX queue, in-flight slot, RX
//! queue, event queue (captured frame not yet processed) or the application.
//! Failed submissions hand the packet back to the caller.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant};
use heapless::Deque;
use log::{Level, log};

use crate::config::RadioConfiguration;
use crate::packet::Packet;
use crate::pool::{PacketPool, PoolConfiguration};
use crate::queue::{RxQueue, TxQueue, TxRequest};
use crate::retry::{RetryController, RetryDecision};
use crate::status::{RadioState, RadioStatus, TxOutcome, TxReport};
use crate::transceiver::{RadioIrq, Transceiver, TransceiverError, TransceiverMode};
use crate::watchdog::Watchdog;
use crate::{EventQueue, RadioError, TX_REPORT_QUEUE_SIZE};

/// Interrupt event recorded by the top half
#[derive(Debug)]
pub(crate) enum RadioEvent {
    TxSuccess,
    TxFailure,
    RxStart,
    /// Captured frame, `None` if it could not be stored
    RxSuccess(Option<Packet>),
    RxFailure,
    HardwareFailure,
}

/// Rejected transmission request, carrying the packet back to the caller
#[derive(Debug)]
pub enum EnqueueError {
    /// The TX queue is at capacity
    QueueFull(Packet),
    /// The driver has not been initialized
    NotInitialized(Packet),
}

impl EnqueueError {
    pub fn into_packet(self) -> Packet {
        match self {
            EnqueueError::QueueFull(packet) | EnqueueError::NotInitialized(packet) => packet,
        }
    }

    pub fn error(&self) -> RadioError {
        match self {
            EnqueueError::QueueFull(_) => RadioError::ResourceExhausted,
            EnqueueError::NotInitialized(_) => RadioError::NotInitialized,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    packets_sent: u32,
    packets_received: u32,
    delivery_failures: u32,
    rx_dropped: u32,
    hardware_resets: u32,
    watchdog_resets: u32,
}

/// Everything that exists only after `initialize`
struct Session {
    pool: PacketPool,
    tx_queue: TxQueue,
    rx_queue: RxQueue,
    in_flight: Option<TxRequest>,
    state: RadioState,
    config: RadioConfiguration,
    retry: RetryController,
    watchdog: Watchdog,
    counters: Counters,
    reports: Deque<TxReport, TX_REPORT_QUEUE_SIZE>,
    listening: bool,
    powered: bool,
    /// Chip failed and has not been reinitialized yet; retried while
    /// `Transitioning`, otherwise deferred to `resume`
    reinit_pending: bool,
    last_calibration: Option<Instant>,
    sequence_number: u8,
    last_rssi: u8,
    last_ed: u8,
}

enum DriverState {
    Uninitialized,
    Initialized(Session),
}

struct DriverCore<T> {
    transceiver: T,
    state: DriverState,
}

/// Link-layer driver for one transceiver
///
/// Created with [`new`](Self::new) (usable in a `static`), then set up with
/// [`initialize`](Self::initialize) and powered with
/// [`power_up`](Self::power_up). All methods take `&self` and may be called from
/// the interrupt and the poll context alike.
pub struct RadioDriver<T> {
    core: Mutex<CriticalSectionRawMutex, RefCell<DriverCore<T>>>,
    events: EventQueue,
    pub(crate) wake: Signal<CriticalSectionRawMutex, ()>,
}

impl<T: Transceiver> RadioDriver<T> {
    pub const fn new(transceiver: T) -> Self {
        RadioDriver {
            core: Mutex::new(RefCell::new(DriverCore {
                transceiver,
                state: DriverState::Uninitialized,
            })),
            events: Channel::new(),
            wake: Signal::new(),
        }
    }

    fn with_core<R>(&self, f: impl FnOnce(&mut T, &mut DriverState) -> R) -> R {
        self.core.lock(|cell| {
            let mut core = cell.borrow_mut();
            let DriverCore { transceiver, state } = &mut *core;
            f(transceiver, state)
        })
    }

    fn with_session<R>(&self, f: impl FnOnce(&mut Session, &mut T) -> Result<R, RadioError>) -> Result<R, RadioError> {
        self.with_core(|transceiver, state| match state {
            DriverState::Uninitialized => Err(RadioError::NotInitialized),
            DriverState::Initialized(session) => f(session, transceiver),
        })
    }

    /// Initializes the driver with the default pool layout
    ///
    /// See [`initialize_with_pool`](Self::initialize_with_pool).
    pub fn initialize(&self, tx_queue_depth: usize, rx_queue_depth: usize) -> Result<(), RadioError> {
        self.initialize_with_pool(tx_queue_depth, rx_queue_depth, PoolConfiguration::default())
    }

    /// Creates the pool and the queues, leaving the radio in `Off`
    ///
    /// The transceiver is not touched until [`power_up`](Self::power_up).
    ///
    /// # Errors
    /// * `InvalidQueueDepth` - a depth is zero or above `MAX_QUEUE_DEPTH`
    /// * `InvalidPoolConfiguration` - the size class table is invalid
    /// * `InvalidState` - the driver is already initialized
    pub fn initialize_with_pool(&self, tx_queue_depth: usize, rx_queue_depth: usize, pool_config: PoolConfiguration) -> Result<(), RadioError> {
        self.with_core(|_, state| {
            if let DriverState::Initialized(session) = state {
                log!(Level::Warn, "Radio driver already initialized");
                return Err(RadioError::InvalidState(session.state));
            }
            let session = Session::new(tx_queue_depth, rx_queue_depth, pool_config, Instant::now())?;
            log!(
                Level::Info,
                "Radio driver initialized: TX depth {}, RX depth {}, {} packet buffers",
                tx_queue_depth,
                rx_queue_depth,
                session.pool.capacity()
            );
            *state = DriverState::Initialized(session);
            Ok(())
        })
    }

    /// Replaces the whole configuration
    ///
    /// The configuration is validated before anything is applied. Address,
    /// retries and watchdog settings are written together, the channel last,
    /// all within one critical section.
    ///
    /// # Errors
    /// * `InvalidChannel` - channel outside of 11..=26, nothing applied
    /// * `NotInitialized`
    pub fn configure(&self, conf: RadioConfiguration) -> Result<(), RadioError> {
        self.update_configuration(|current| *current = conf)
    }

    pub fn configuration(&self) -> Result<RadioConfiguration, RadioError> {
        self.with_session(|session, _| Ok(session.config))
    }

    pub fn set_address(&self, address: u16, pan_id: u16) -> Result<(), RadioError> {
        self.update_configuration(|conf| {
            conf.address.address = address;
            conf.address.pan_id = pan_id;
        })
    }

    pub fn set_channel(&self, channel: u8) -> Result<(), RadioError> {
        self.update_configuration(|conf| conf.address.channel = channel)
    }

    pub fn set_soft_retries(&self, retries: u8) -> Result<(), RadioError> {
        self.update_configuration(|conf| conf.soft_retries = retries)
    }

    pub fn set_hard_retries(&self, retries: u8) -> Result<(), RadioError> {
        self.update_configuration(|conf| conf.hard_retries = retries)
    }

    pub fn set_watchdog_enabled(&self, enabled: bool) -> Result<(), RadioError> {
        self.update_configuration(|conf| conf.watchdog_enabled = enabled)
    }

    pub fn set_watchdog_timeout(&self, timeout: Duration) -> Result<(), RadioError> {
        self.update_configuration(|conf| conf.watchdog_timeout = timeout)
    }

    pub fn set_calibration_period(&self, period: Option<Duration>) -> Result<(), RadioError> {
        self.update_configuration(|conf| conf.calibration_period = period)
    }

    fn update_configuration(&self, update: impl FnOnce(&mut RadioConfiguration)) -> Result<(), RadioError> {
        self.with_session(|session, transceiver| {
            let mut conf = session.config;
            update(&mut conf);
            conf.validate()?;
            session.apply_configuration(transceiver, conf, Instant::now());
            Ok(())
        })
    }

    /// Snapshot of the state and counters
    pub fn status(&self) -> Result<RadioStatus, RadioError> {
        self.with_session(|session, _| Ok(session.status()))
    }

    /// Borrows a packet able to carry `payload_size` bytes
    ///
    /// The packet comes pre-addressed: source address and PAN, and destination
    /// PAN are taken from the current configuration.
    ///
    /// # Errors
    /// * `ResourceExhausted` - no free buffer, back off and retry later
    /// * `PayloadTooLarge` - no size class holds `payload_size`
    /// * `NotInitialized`
    pub fn request_packet(&self, payload_size: usize) -> Result<Packet, RadioError> {
        self.with_session(|session, _| {
            let mut packet = session.pool.request(payload_size)?;
            let address = session.config.address;
            packet.set_source(address.pan_id, address.address);
            packet.set_destination_pan(address.pan_id);
            Ok(packet)
        })
    }

    /// Gives a packet back to the pool
    ///
    /// # Errors
    /// `ForeignPacket` if the packet was not lent by this driver's pool.
    pub fn return_packet(&self, packet: Packet) -> Result<(), RadioError> {
        self.with_session(|session, _| session.pool.release(packet))
    }

    /// Appends a packet to the TX queue
    ///
    /// With `fast_fail` set the packet is dropped on its first failed
    /// transmission instead of being retried.
    ///
    /// On failure the packet is handed back inside the error; the caller
    /// still owns it and must return or resubmit it.
    pub fn enqueue_tx(&self, packet: Packet, fast_fail: bool) -> Result<(), EnqueueError> {
        self.with_core(|_, state| match state {
            DriverState::Uninitialized => Err(EnqueueError::NotInitialized(packet)),
            DriverState::Initialized(session) => session
                .tx_queue
                .push_back(TxRequest { packet, fast_fail })
                .map_err(|request| {
                    log::debug!("TX queue full, rejecting packet");
                    EnqueueError::QueueFull(request.packet)
                }),
        })?;
        self.wake.signal(());
        Ok(())
    }

    /// Takes the oldest received packet; the caller must return it to the pool
    pub fn dequeue_rx(&self) -> Option<Packet> {
        self.with_core(|_, state| match state {
            DriverState::Uninitialized => None,
            DriverState::Initialized(session) => session.rx_queue.pop_front(),
        })
    }

    /// Requests a packet, fills it and queues it for transmission
    ///
    /// # Errors
    /// * `ResourceExhausted` - no buffer or no TX queue slot; nothing is queued
    /// * `PayloadTooLarge` - `data` does not fit in any size class
    /// * `NotInitialized`
    pub fn send_data(&self, destination: u16, payload_type: u8, payload_status: u8, data: &[u8], fast_fail: bool) -> Result<(), RadioError> {
        let mut packet = self.request_packet(data.len())?;
        packet.set_destination(destination);
        packet.set_payload_type(payload_type);
        packet.set_payload_status(payload_status);
        packet.data_mut().copy_from_slice(data);
        match self.enqueue_tx(packet, fast_fail) {
            Ok(()) => Ok(()),
            Err(rejected) => {
                let error = rejected.error();
                self.return_packet(rejected.into_packet())?;
                Err(error)
            }
        }
    }

    pub fn tx_queue_empty(&self) -> bool {
        self.tx_queue_size() == 0
    }

    /// `true` also before initialization, when nothing can be queued
    pub fn tx_queue_full(&self) -> bool {
        self.with_core(|_, state| match state {
            DriverState::Uninitialized => true,
            DriverState::Initialized(session) => session.tx_queue.is_full(),
        })
    }

    pub fn tx_queue_size(&self) -> usize {
        self.with_core(|_, state| match state {
            DriverState::Uninitialized => 0,
            DriverState::Initialized(session) => session.tx_queue.len(),
        })
    }

    pub fn rx_queue_empty(&self) -> bool {
        self.rx_queue_size() == 0
    }

    pub fn rx_queue_full(&self) -> bool {
        self.with_core(|_, state| match state {
            DriverState::Uninitialized => true,
            DriverState::Initialized(session) => session.rx_queue.is_full(),
        })
    }

    pub fn rx_queue_size(&self) -> usize {
        self.with_core(|_, state| match state {
            DriverState::Uninitialized => 0,
            DriverState::Initialized(session) => session.rx_queue.len(),
        })
    }

    /// Returns every queued packet to the pool
    ///
    /// Queued transmissions produce `Flushed` reports. The in-flight packet is
    /// not affected.
    pub fn flush_queues(&self) -> Result<(), RadioError> {
        self.with_session(|session, _| {
            session.flush();
            Ok(())
        })
    }

    /// Oldest pending transmission report
    pub fn take_tx_report(&self) -> Option<TxReport> {
        self.with_core(|_, state| match state {
            DriverState::Uninitialized => None,
            DriverState::Initialized(session) => session.reports.pop_front(),
        })
    }

    pub fn pool_free_count(&self) -> usize {
        self.with_core(|_, state| match state {
            DriverState::Uninitialized => 0,
            DriverState::Initialized(session) => session.pool.free_count(),
        })
    }

    pub fn pool_capacity(&self) -> usize {
        self.with_core(|_, state| match state {
            DriverState::Uninitialized => 0,
            DriverState::Initialized(session) => session.pool.capacity(),
        })
    }

    /// `true` while a packet occupies the in-flight slot
    pub fn in_flight(&self) -> bool {
        self.with_core(|_, state| match state {
            DriverState::Uninitialized => false,
            DriverState::Initialized(session) => session.in_flight.is_some(),
        })
    }

    /// Runs `f` on the transceiver inside the driver's critical section
    pub fn with_transceiver<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.with_core(|transceiver, _| f(transceiver))
    }

    /// Initializes the transceiver and moves from `Off` to `Idle`
    ///
    /// Does nothing if the radio is already powered.
    ///
    /// # Errors
    /// * `Transceiver` - the chip did not come up; the radio stays `Off`
    /// * `InvalidState(Sleep)` - use [`resume`](Self::resume) instead
    pub fn power_up(&self) -> Result<(), RadioError> {
        self.with_session(|session, transceiver| match session.state {
            RadioState::Off => session.bring_up(transceiver, Instant::now()),
            RadioState::Sleep => Err(RadioError::InvalidState(RadioState::Sleep)),
            _ => Ok(()),
        })?;
        self.wake.signal(());
        Ok(())
    }

    /// Keeps the receiver armed whenever the radio is not transmitting
    pub fn enable_listen(&self) -> Result<(), RadioError> {
        self.with_session(|session, transceiver| {
            session.listening = true;
            if session.state == RadioState::Idle {
                transceiver.begin_receive();
                session.set_state(RadioState::RxIdle, Instant::now());
            }
            Ok(())
        })
    }

    /// Stops listening; a reception in progress still completes
    pub fn disable_listen(&self) -> Result<(), RadioError> {
        self.with_session(|session, transceiver| {
            session.listening = false;
            if session.state == RadioState::RxIdle {
                transceiver.set_mode(TransceiverMode::Idle);
                session.set_state(RadioState::Idle, Instant::now());
            }
            Ok(())
        })
    }

    /// Puts the radio to sleep
    ///
    /// A packet in flight is put back at the head of the TX queue and sent
    /// again after [`resume`](Self::resume).
    pub fn sleep(&self) -> Result<(), RadioError> {
        self.with_session(|session, transceiver| {
            if session.state != RadioState::Sleep {
                session.enter_sleep(transceiver, Instant::now());
            }
            Ok(())
        })
    }

    /// Wakes the radio: `Idle` if it was powered before sleeping, `Off` otherwise
    ///
    /// A chip that failed before or during sleep is reinitialized first; if it
    /// still does not respond the radio stays `Transitioning` and the poll
    /// keeps retrying.
    ///
    /// # Errors
    /// `InvalidState` if the radio is not asleep.
    pub fn resume(&self) -> Result<(), RadioError> {
        self.with_session(|session, transceiver| {
            if session.state != RadioState::Sleep {
                return Err(RadioError::InvalidState(session.state));
            }
            let now = Instant::now();
            if session.powered && session.reinit_pending {
                session.set_state(RadioState::Transitioning, now);
                session.reinitialize(transceiver, now);
            } else if session.powered {
                session.apply_to_transceiver(transceiver);
                transceiver.set_mode(TransceiverMode::Idle);
                session.set_state(RadioState::Idle, now);
            } else {
                session.set_state(RadioState::Off, now);
            }
            log!(Level::Debug, "Radio resumed to {:?}", session.state);
            Ok(())
        })?;
        self.wake.signal(());
        Ok(())
    }

    /// Interrupt entry point
    ///
    /// Records the event for the next poll. On `RxSuccess` the received frame
    /// is copied into a pool buffer right away; it is dropped when the RX
    /// queue is full or no buffer is free.
    pub fn on_interrupt(&self, irq: RadioIrq) {
        let event = match irq {
            RadioIrq::TxSuccess => RadioEvent::TxSuccess,
            RadioIrq::TxFailure => RadioEvent::TxFailure,
            RadioIrq::RxStart => RadioEvent::RxStart,
            RadioIrq::RxSuccess => RadioEvent::RxSuccess(self.capture_frame()),
            RadioIrq::RxFailure => RadioEvent::RxFailure,
            RadioIrq::HardwareFailure => RadioEvent::HardwareFailure,
        };
        if let Err(TrySendError::Full(event)) = self.events.try_send(event) {
            log!(Level::Warn, "Radio event queue full, dropping {:?}", irq);
            if let RadioEvent::RxSuccess(captured) = event {
                self.with_core(|_, state| {
                    if let DriverState::Initialized(session) = state {
                        session.counters.rx_dropped = session.counters.rx_dropped.wrapping_add(1);
                        if let Some(packet) = captured {
                            session.release(packet);
                        }
                    }
                });
            }
        }
        self.wake.signal(());
    }

    fn capture_frame(&self) -> Option<Packet> {
        self.with_core(|transceiver, state| {
            let session = match state {
                DriverState::Initialized(session) => session,
                DriverState::Uninitialized => {
                    transceiver.discard_frame();
                    return None;
                }
            };
            if session.rx_queue.is_full() {
                log!(Level::Warn, "RX queue full, dropping received frame");
                transceiver.discard_frame();
                return None;
            }
            let length = transceiver.received_length();
            let mut packet = match session.pool.request(length) {
                Ok(packet) => packet,
                Err(error) => {
                    log!(Level::Warn, "No buffer for received frame of {} bytes: {:?}", length, error);
                    transceiver.discard_frame();
                    return None;
                }
            };
            match transceiver.read_frame(&mut packet) {
                Ok(()) => {
                    packet.set_timestamp(Instant::now());
                    Some(packet)
                }
                Err(error) => {
                    log!(Level::Warn, "Reading received frame failed: {:?}", error);
                    session.release(packet);
                    None
                }
            }
        })
    }

    /// Bottom half, using the current time
    pub fn process(&self) -> Result<(), RadioError> {
        self.process_at(Instant::now())
    }

    /// Bottom half: consumes pending events, then services the TX queue,
    /// the watchdog and the calibration timer as of `now`
    pub fn process_at(&self, now: Instant) -> Result<(), RadioError> {
        self.with_core(|transceiver, state| {
            let session = match state {
                DriverState::Initialized(session) => session,
                DriverState::Uninitialized => {
                    while self.events.try_receive().is_ok() {}
                    return Err(RadioError::NotInitialized);
                }
            };
            while let Ok(event) = self.events.try_receive() {
                session.handle_event(transceiver, event, now);
            }
            session.service(transceiver, now);
            Ok(())
        })
    }
}

impl Session {
    fn new(tx_queue_depth: usize, rx_queue_depth: usize, pool_config: PoolConfiguration, now: Instant) -> Result<Self, RadioError> {
        let config = RadioConfiguration::default();
        Ok(Session {
            pool: PacketPool::new(pool_config)?,
            tx_queue: TxQueue::new(tx_queue_depth)?,
            rx_queue: RxQueue::new(rx_queue_depth)?,
            in_flight: None,
            state: RadioState::Off,
            config,
            retry: RetryController::new(),
            watchdog: Watchdog::new(config.watchdog_enabled, config.watchdog_timeout, now),
            counters: Counters::default(),
            reports: Deque::new(),
            listening: false,
            powered: false,
            reinit_pending: false,
            last_calibration: None,
            sequence_number: 0,
            last_rssi: 0,
            last_ed: 0,
        })
    }

    fn status(&self) -> RadioStatus {
        RadioStatus {
            state: self.state,
            packets_sent: self.counters.packets_sent,
            packets_received: self.counters.packets_received,
            sequence_number: self.sequence_number,
            retry_number: self.retry.retry_number(),
            last_rssi: self.last_rssi,
            last_ed: self.last_ed,
            last_calibration_time: self.last_calibration,
            last_progress_time: self.watchdog.last_progress(),
            delivery_failures: self.counters.delivery_failures,
            rx_dropped: self.counters.rx_dropped,
            hardware_resets: self.counters.hardware_resets,
            watchdog_resets: self.counters.watchdog_resets,
        }
    }

    fn set_state(&mut self, state: RadioState, now: Instant) {
        if self.state != state {
            log::trace!("Radio state {:?} -> {:?}", self.state, state);
            self.state = state;
            self.watchdog.progress(now);
        }
    }

    fn release(&mut self, packet: Packet) {
        // The pool logs foreign packets itself
        let _ = self.pool.release(packet);
    }

    fn report(&mut self, packet: &Packet, outcome: TxOutcome) {
        let report = TxReport {
            sequence_number: packet.sequence_number(),
            destination: packet.destination(),
            outcome,
        };
        if self.reports.is_full() {
            if let Some(evicted) = self.reports.pop_front() {
                log!(Level::Warn, "TX report queue full, dropping report {:?}", evicted);
            }
        }
        let _ = self.reports.push_back(report);
    }

    fn apply_configuration<T: Transceiver>(&mut self, transceiver: &mut T, conf: RadioConfiguration, now: Instant) {
        let previous = self.config;
        self.config = conf;
        if previous.watchdog_enabled != conf.watchdog_enabled || previous.watchdog_timeout != conf.watchdog_timeout {
            self.watchdog.configure(conf.watchdog_enabled, conf.watchdog_timeout, now);
        }
        if !matches!(self.state, RadioState::Off | RadioState::Sleep) {
            self.apply_to_transceiver(transceiver);
        }
        log::debug!("Radio configuration applied: {:?}", conf);
    }

    /// Writes addressing and hard retries, the channel last
    fn apply_to_transceiver<T: Transceiver>(&self, transceiver: &mut T) {
        let address = self.config.address;
        transceiver.set_address(address.address, address.pan_id);
        transceiver.set_hard_retries(self.config.hard_retries);
        transceiver.set_channel(address.channel);
    }

    fn init_transceiver<T: Transceiver>(&mut self, transceiver: &mut T) -> Result<(), TransceiverError> {
        transceiver.initialize()?;
        self.apply_to_transceiver(transceiver);
        transceiver.set_mode(TransceiverMode::Idle);
        Ok(())
    }

    fn bring_up<T: Transceiver>(&mut self, transceiver: &mut T, now: Instant) -> Result<(), RadioError> {
        self.set_state(RadioState::Transitioning, now);
        match self.init_transceiver(transceiver) {
            Ok(()) => {
                self.powered = true;
                self.set_state(RadioState::Idle, now);
                log!(Level::Info, "Radio powered up on channel {}", self.config.address.channel);
                Ok(())
            }
            Err(error) => {
                log!(Level::Warn, "Radio power up failed: {:?}", error);
                self.powered = false;
                self.set_state(RadioState::Off, now);
                Err(error.into())
            }
        }
    }

    fn enter_sleep<T: Transceiver>(&mut self, transceiver: &mut T, now: Instant) {
        if let Some(request) = self.in_flight.take() {
            if let Err(request) = self.tx_queue.push_front(request) {
                log!(Level::Warn, "TX queue full, in-flight packet dropped on sleep");
                self.report(&request.packet, TxOutcome::Flushed);
                self.release(request.packet);
                self.retry.reset();
            }
        }
        transceiver.set_mode(TransceiverMode::Sleep);
        self.set_state(RadioState::Sleep, now);
        log!(Level::Debug, "Radio asleep");
    }

    fn handle_event<T: Transceiver>(&mut self, transceiver: &mut T, event: RadioEvent, now: Instant) {
        match (self.state, event) {
            (_, RadioEvent::HardwareFailure) => {
                log!(Level::Warn, "Radio hardware failure in state {:?}", self.state);
                self.counters.hardware_resets = self.counters.hardware_resets.wrapping_add(1);
                self.recover(transceiver, now);
            }
            (RadioState::RxIdle, RadioEvent::RxStart) => self.set_state(RadioState::RxBusy, now),
            (RadioState::RxBusy, RadioEvent::RxSuccess(captured)) => self.complete_rx(transceiver, captured, now),
            (RadioState::RxBusy, RadioEvent::RxFailure) => {
                log::trace!("Reception failed");
                self.rest(transceiver, now);
            }
            (RadioState::TxBusy, RadioEvent::TxSuccess) => self.complete_tx(transceiver, now),
            (RadioState::TxBusy, RadioEvent::TxFailure) => self.fail_tx(transceiver, now),
            (state, event) => {
                log::trace!("Ignoring {:?} in state {:?}", event, state);
                if let RadioEvent::RxSuccess(Some(packet)) = event {
                    self.release(packet);
                }
            }
        }
    }

    fn complete_rx<T: Transceiver>(&mut self, transceiver: &mut T, captured: Option<Packet>, now: Instant) {
        let link = transceiver.read_status();
        self.last_rssi = link.rssi;
        self.last_ed = link.ed;
        match captured {
            Some(packet) => match self.rx_queue.push_back(packet) {
                Ok(()) => {
                    self.counters.packets_received = self.counters.packets_received.wrapping_add(1);
                    log::trace!("Frame received, RSSI {} ED {}", link.rssi, link.ed);
                }
                Err(packet) => {
                    log!(Level::Warn, "RX queue full, dropping received packet");
                    self.counters.rx_dropped = self.counters.rx_dropped.wrapping_add(1);
                    self.release(packet);
                }
            },
            None => {
                self.counters.rx_dropped = self.counters.rx_dropped.wrapping_add(1);
            }
        }
        self.rest(transceiver, now);
    }

    fn complete_tx<T: Transceiver>(&mut self, transceiver: &mut T, now: Instant) {
        if let Some(request) = self.in_flight.take() {
            self.counters.packets_sent = self.counters.packets_sent.wrapping_add(1);
            self.retry.on_tx_success();
            log::trace!("Packet {} delivered", request.packet.sequence_number());
            self.report(&request.packet, TxOutcome::Delivered);
            self.release(request.packet);
        }
        self.finish_tx(transceiver, now);
    }

    fn fail_tx<T: Transceiver>(&mut self, transceiver: &mut T, now: Instant) {
        let request = match self.in_flight.take() {
            Some(request) => request,
            None => {
                self.finish_tx(transceiver, now);
                return;
            }
        };
        match self.retry.on_tx_failure(self.config.soft_retries, request.fast_fail) {
            RetryDecision::Retry { attempt } => {
                log!(Level::Debug, "Transmission failed, retry {} of {}", attempt, self.config.soft_retries);
                match self.tx_queue.push_front(request) {
                    Ok(()) => self.set_state(RadioState::TxIdle, now),
                    Err(request) => {
                        log!(Level::Warn, "TX queue full, retry not possible");
                        self.retry.reset();
                        self.give_up(request, TxOutcome::RetriesExhausted);
                        self.finish_tx(transceiver, now);
                    }
                }
            }
            RetryDecision::GiveUp(outcome) => {
                self.give_up(request, outcome);
                self.finish_tx(transceiver, now);
            }
        }
    }

    /// Terminal delivery failure
    fn give_up(&mut self, request: TxRequest, outcome: TxOutcome) {
        log!(
            Level::Debug,
            "Packet {} to {:#06x} not delivered: {:?}",
            request.packet.sequence_number(),
            request.packet.destination(),
            outcome
        );
        self.counters.delivery_failures = self.counters.delivery_failures.wrapping_add(1);
        self.report(&request.packet, outcome);
        self.release(request.packet);
    }

    fn finish_tx<T: Transceiver>(&mut self, transceiver: &mut T, now: Instant) {
        if self.tx_queue.is_empty() {
            self.rest(transceiver, now);
        } else {
            self.set_state(RadioState::TxIdle, now);
        }
    }

    /// Back to listening or idle
    fn rest<T: Transceiver>(&mut self, transceiver: &mut T, now: Instant) {
        if self.listening {
            transceiver.begin_receive();
            self.set_state(RadioState::RxIdle, now);
        } else {
            transceiver.set_mode(TransceiverMode::Idle);
            self.set_state(RadioState::Idle, now);
        }
    }

    fn start_tx<T: Transceiver>(&mut self, transceiver: &mut T, now: Instant) {
        let Some(mut request) = self.tx_queue.pop_front() else {
            return;
        };
        if self.state != RadioState::TxIdle {
            self.set_state(RadioState::Transitioning, now);
            transceiver.set_mode(TransceiverMode::Tx);
            self.set_state(RadioState::TxIdle, now);
        }
        self.sequence_number = self.sequence_number.wrapping_add(1);
        request.packet.set_sequence_number(self.sequence_number);
        let result = transceiver.begin_transmit(&request.packet);
        self.in_flight = Some(request);
        match result {
            Ok(()) => {
                log::trace!("Transmitting packet {}", self.sequence_number);
                self.set_state(RadioState::TxBusy, now);
            }
            Err(error) => {
                log!(Level::Warn, "Transmit start failed: {:?}", error);
                self.fail_tx(transceiver, now);
            }
        }
    }

    fn drop_request(&mut self, request: TxRequest) {
        self.report(&request.packet, TxOutcome::Flushed);
        self.release(request.packet);
    }

    fn flush(&mut self) {
        let mut flushed = 0;
        while let Some(request) = self.tx_queue.pop_front() {
            self.drop_request(request);
            flushed += 1;
        }
        while let Some(packet) = self.rx_queue.pop_front() {
            self.release(packet);
            flushed += 1;
        }
        if flushed > 0 {
            log!(Level::Debug, "Flushed {} queued packets", flushed);
        }
    }

    /// Fatal failure handling shared by hardware failures and the watchdog
    ///
    /// A sleeping radio stays asleep; its chip is reinitialized on resume.
    fn recover<T: Transceiver>(&mut self, transceiver: &mut T, now: Instant) {
        if let Some(request) = self.in_flight.take() {
            self.drop_request(request);
        }
        self.retry.reset();
        self.flush();
        match self.state {
            RadioState::Sleep => {
                if self.powered {
                    self.reinit_pending = true;
                    log!(Level::Debug, "Radio reinitialization deferred until resume");
                }
            }
            _ if self.powered => {
                self.set_state(RadioState::Transitioning, now);
                self.reinitialize(transceiver, now);
            }
            _ => self.set_state(RadioState::Off, now),
        }
    }

    fn reinitialize<T: Transceiver>(&mut self, transceiver: &mut T, now: Instant) {
        match self.init_transceiver(transceiver) {
            Ok(()) => {
                self.reinit_pending = false;
                self.set_state(RadioState::Idle, now);
                log!(Level::Info, "Radio reinitialized");
            }
            Err(error) => {
                if !self.reinit_pending {
                    log!(Level::Warn, "Radio reinitialization failed: {:?}", error);
                }
                self.reinit_pending = true;
            }
        }
    }

    fn service<T: Transceiver>(&mut self, transceiver: &mut T, now: Instant) {
        if self.reinit_pending {
            if self.state != RadioState::Transitioning {
                return;
            }
            self.reinitialize(transceiver, now);
            if self.reinit_pending {
                return;
            }
        }

        if !matches!(self.state, RadioState::Off | RadioState::Sleep) && self.watchdog.expired(now) {
            log!(Level::Warn, "Radio watchdog expired in state {:?}", self.state);
            self.counters.watchdog_resets = self.counters.watchdog_resets.wrapping_add(1);
            self.recover(transceiver, now);
            return;
        }

        match self.state {
            RadioState::Idle | RadioState::RxIdle | RadioState::TxIdle if !self.tx_queue.is_empty() => {
                self.start_tx(transceiver, now);
            }
            RadioState::TxIdle => self.rest(transceiver, now),
            RadioState::Idle if self.listening => {
                transceiver.begin_receive();
                self.set_state(RadioState::RxIdle, now);
            }
            _ => {}
        }

        self.calibrate_if_due(transceiver, now);

        if self.state.is_resting() {
            self.watchdog.progress(now);
        }
    }

    fn calibrate_if_due<T: Transceiver>(&mut self, transceiver: &mut T, now: Instant) {
        let Some(period) = self.config.calibration_period else {
            return;
        };
        if !matches!(self.state, RadioState::Idle | RadioState::RxIdle) {
            return;
        }
        let due = match self.last_calibration {
            Some(last) => now.saturating_duration_since(last) >= period,
            None => true,
        };
        if !due {
            return;
        }
        transceiver.set_mode(TransceiverMode::Off);
        transceiver.calibrate();
        if self.state == RadioState::RxIdle {
            transceiver.begin_receive();
        } else {
            transceiver.set_mode(TransceiverMode::Idle);
        }
        self.last_calibration = Some(now);
        log!(Level::Debug, "Radio calibrated");
    }
}
