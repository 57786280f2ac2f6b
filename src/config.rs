//! # Radio Configuration
//!
//! Addressing, retry and watchdog settings of the driver.
//!
//! Settings are applied as a whole by `RadioDriver::configure` or one at a
//! time by the individual setters. The channel is validated before anything is
//! applied and is always written to the transceiver last.

use embassy_time::Duration;
use log::{Level, log};

use crate::{MAX_CHANNEL, MIN_CHANNEL, RadioError};

/// Default short address of the node
pub const DEFAULT_ADDRESS: u16 = 0x1101;
/// Default PAN identifier
pub const DEFAULT_PAN_ID: u16 = 0x1001;
/// Default channel (2455 MHz)
pub const DEFAULT_CHANNEL: u8 = 0x15;
/// Default number of transceiver-level retransmissions
pub const DEFAULT_HARD_RETRIES: u8 = 3;
/// Default number of driver-level retransmissions
pub const DEFAULT_SOFT_RETRIES: u8 = 2;
/// Default watchdog timeout
pub const DEFAULT_WATCHDOG_TIMEOUT: Duration = Duration::from_millis(400);

/// Network identity of the node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioAddress {
    /// Short link address
    pub address: u16,
    /// PAN identifier
    pub pan_id: u16,
    /// 802.15.4 channel, 11..=26
    pub channel: u8,
}

impl Default for RadioAddress {
    fn default() -> Self {
        RadioAddress {
            address: DEFAULT_ADDRESS,
            pan_id: DEFAULT_PAN_ID,
            channel: DEFAULT_CHANNEL,
        }
    }
}

/// Runtime configuration of the driver
///
/// # Fields
/// * `soft_retries` - driver retries after the transceiver reported a failure
/// * `hard_retries` - retries performed by the transceiver itself, passed through
/// * `watchdog_enabled` / `watchdog_timeout` - stall recovery
/// * `calibration_period` - periodic transceiver calibration while resting, `None` disables it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioConfiguration {
    pub address: RadioAddress,
    pub soft_retries: u8,
    pub hard_retries: u8,
    pub watchdog_enabled: bool,
    pub watchdog_timeout: Duration,
    pub calibration_period: Option<Duration>,
}

impl Default for RadioConfiguration {
    fn default() -> Self {
        RadioConfiguration {
            address: RadioAddress::default(),
            soft_retries: DEFAULT_SOFT_RETRIES,
            hard_retries: DEFAULT_HARD_RETRIES,
            watchdog_enabled: false,
            watchdog_timeout: DEFAULT_WATCHDOG_TIMEOUT,
            calibration_period: None,
        }
    }
}

impl RadioConfiguration {
    /// # Errors
    /// `InvalidChannel` if the channel is outside of the 2.4 GHz band.
    pub fn validate(&self) -> Result<(), RadioError> {
        validate_channel(self.address.channel)
    }
}

pub(crate) fn validate_channel(channel: u8) -> Result<(), RadioError> {
    if !(MIN_CHANNEL..=MAX_CHANNEL).contains(&channel) {
        log!(Level::Error, "Channel {} is outside of {}..={}", channel, MIN_CHANNEL, MAX_CHANNEL);
        return Err(RadioError::InvalidChannel(channel));
    }
    Ok(())
}
