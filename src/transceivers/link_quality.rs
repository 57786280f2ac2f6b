//! Link quality utilities
//!
//! Converts the transceiver's RSSI and energy detect (ED) registers to dBm and
//! combines them into a single quality score on a 0-63 scale. ED is measured
//! over the whole received frame and is weighted more heavily than the RSSI
//! sample.

/// dBm value of register reading 0 for both RSSI and ED
pub const RSSI_BASE_DBM: i16 = -91;

/// RSSI register resolution in dB
const RSSI_STEP_DB: i16 = 3;

/// Largest valid RSSI register value
const RSSI_REGISTER_MAX: u8 = 28;

/// Largest valid ED register value
const ED_REGISTER_MAX: u8 = 0x54;

/// Receiver sensitivity, the bottom of the scale (in dBm)
const SIGNAL_MIN: i16 = RSSI_BASE_DBM;

/// Very strong signal, the top of the scale (in dBm)
const SIGNAL_MAX: i16 = -10;

/// Converts an RSSI register reading (0..=28) to dBm
pub fn rssi_to_dbm(rssi: u8) -> i16 {
    RSSI_BASE_DBM + rssi.min(RSSI_REGISTER_MAX) as i16 * RSSI_STEP_DB
}

/// Converts an ED register reading (0..=0x54) to dBm
pub fn ed_to_dbm(ed: u8) -> i16 {
    RSSI_BASE_DBM + ed.min(ED_REGISTER_MAX) as i16
}

/// Normalizes a value to a 0-63 scale based on defined min/max bounds
///
/// Values below `min` result in 0, values above `max` result in 63.
///
/// # Example
/// ```rust
/// use radio_link_lib::transceivers::link_quality::normalize;
///
/// assert_eq!(normalize(-95, -91, -10), 0);
/// assert_eq!(normalize(-5, -91, -10), 63);
/// ```
pub fn normalize(value: i16, min: i16, max: i16) -> u8 {
    let clamped_value = value.max(min).min(max);
    let shifted_value = clamped_value - min;
    // Multiply first to keep precision in integer math
    let scaled_value = (shifted_value as u32 * 63) / (max - min) as u32;
    scaled_value as u8
}

/// Calculates combined link quality from the RSSI and ED registers
///
/// # Returns
/// A score in the range 0-63
/// - 0: at the sensitivity limit
/// - 63: strong signal on both measurements
///
/// # Algorithm
/// 1. Convert both registers to dBm
/// 2. Normalize each to 0-63 between receiver sensitivity and `SIGNAL_MAX`
/// 3. Weighted average: 30% RSSI, 70% ED
pub fn calculate_link_quality(rssi: u8, ed: u8) -> u8 {
    let norm_rssi = normalize(rssi_to_dbm(rssi), SIGNAL_MIN, SIGNAL_MAX);
    let norm_ed = normalize(ed_to_dbm(ed), SIGNAL_MIN, SIGNAL_MAX);

    let quality = (3 * norm_rssi as u32 + 7 * norm_ed as u32) / 10;
    quality as u8
}
