//! Async poll loop
//!
//! Runs the driver's bottom half whenever an interrupt was recorded, a packet
//! was queued, or the poll interval elapsed. The interval bounds the watchdog
//! and calibration resolution, so it should be well below the watchdog
//! timeout.

use embassy_futures::select::{Either, select};
use embassy_time::{Duration, Timer};

use crate::RadioError;
use crate::driver::RadioDriver;
use crate::transceiver::Transceiver;

impl<T: Transceiver> RadioDriver<T> {
    /// Polls the driver forever
    ///
    /// Meant to be spawned as its own task next to the one forwarding
    /// transceiver interrupts to `on_interrupt`.
    pub async fn run(&self, poll_interval: Duration) -> ! {
        log::info!("Radio poll loop started, interval {} ms", poll_interval.as_millis());
        loop {
            if let Err(error) = self.step(poll_interval).await {
                log::trace!("Radio poll skipped: {:?}", error);
            }
        }
    }

    /// Waits for a wake-up or `poll_interval`, whichever comes first, then polls once
    pub async fn step(&self, poll_interval: Duration) -> Result<(), RadioError> {
        match select(self.wake.wait(), Timer::after(poll_interval)).await {
            Either::First(()) => log::trace!("Radio poll woken"),
            Either::Second(()) => {}
        }
        self.process()
    }

    /// Resolves once an interrupt or submission was recorded since the last wait
    pub async fn wait_for_interrupt(&self) {
        self.wake.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use crate::driver::RadioDriver;
    use crate::status::RadioState;
    use crate::transceiver::RadioIrq;
    use crate::transceivers::simulator::{SimulatedTransceiver, SimulatorLink};
    use embassy_time::Duration;
    use futures::executor::block_on;

    #[test]
    fn interrupt_wakes_waiter() {
        let link = SimulatorLink::new();
        let driver = RadioDriver::new(SimulatedTransceiver::new(&link, 1));
        driver.initialize(4, 4).unwrap();
        driver.on_interrupt(RadioIrq::RxStart);
        block_on(driver.wait_for_interrupt());
    }

    #[test]
    fn step_processes_queued_packet() {
        let link = SimulatorLink::new();
        let driver = RadioDriver::new(SimulatedTransceiver::new(&link, 1));
        driver.initialize(4, 4).unwrap();
        driver.power_up().unwrap();
        driver.send_data(0x2202, 0, 0, &[1, 2], false).unwrap();

        // Signalled by the submission, so no timer is involved
        block_on(driver.step(Duration::from_secs(60))).unwrap();
        assert_eq!(driver.status().unwrap().state, RadioState::TxBusy);
        assert!(link.transmitted().is_some());
    }
}
