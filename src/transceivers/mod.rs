//! Transceiver implementations and signal quality helpers

pub mod link_quality;

#[cfg(any(test, feature = "radio-device-simulator"))]
pub mod simulator;
