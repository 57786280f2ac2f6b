use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use env_logger::Builder;
use log::{LevelFilter, log};
use radio_link_lib::packet::MacHeader;
use radio_link_lib::transceivers::simulator::{SimulatedTransceiver, SimulatorLink};
use radio_link_lib::{MacFrame, RadioConfiguration, RadioDriver};

type Driver = RadioDriver<SimulatedTransceiver<'static>>;

static LINK: SimulatorLink = SimulatorLink::new();

const PEER_ADDRESS: u16 = 0x2202;

#[embassy_executor::task]
async fn radio_task(driver: &'static Driver) -> ! {
    driver.run(Duration::from_millis(10)).await
}

/// Forwards the simulated IRQ line to the driver's interrupt entry point
#[embassy_executor::task]
async fn irq_task(driver: &'static Driver) -> ! {
    loop {
        let irq = LINK.wait_irq().await;
        driver.on_interrupt(irq);
    }
}

/// Simulated remote node answering every frame it hears
#[embassy_executor::task]
async fn peer_task() -> ! {
    loop {
        let frame = LINK.wait_transmitted().await;
        Timer::after(Duration::from_millis(50)).await;
        let header = MacHeader {
            seq_num: frame.header.seq_num,
            dest_pan: frame.header.src_pan,
            dest_addr: frame.header.src_addr,
            src_pan: frame.header.dest_pan,
            src_addr: frame.header.dest_addr,
        };
        match MacFrame::with(header, frame.payload_type, 0x01, frame.payload()) {
            Ok(reply) => {
                LINK.deliver(reply);
            }
            Err(error) => log!(log::Level::Error, "Peer cannot build reply: {:?}", error),
        }
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    Builder::new().filter_level(LevelFilter::Debug).init();

    log!(log::Level::Debug, "Starting up");
    let transceiver = SimulatedTransceiver::new(&LINK, 0x5eed).with_auto_complete(20);
    let driver: &'static Driver = Box::leak(Box::new(RadioDriver::new(transceiver)));

    driver.initialize(8, 8).unwrap();
    let radio_configuration = RadioConfiguration {
        watchdog_enabled: true,
        calibration_period: Some(Duration::from_secs(30)),
        ..RadioConfiguration::default()
    };
    driver.configure(radio_configuration).unwrap();
    driver.power_up().unwrap();
    driver.enable_listen().unwrap();

    spawner.spawn(radio_task(driver)).unwrap();
    spawner.spawn(irq_task(driver)).unwrap();
    spawner.spawn(peer_task()).unwrap();

    let mut i: u8 = 0;
    loop {
        let payload = [i; 16];
        if let Err(error) = driver.send_data(PEER_ADDRESS, 0x10, 0x00, &payload, false) {
            log!(log::Level::Warn, "Sending {} failed: {:?}", i, error);
        }
        Timer::after(Duration::from_secs(1)).await;

        while let Some(packet) = driver.dequeue_rx() {
            log!(
                log::Level::Info,
                "Received {} bytes from {:#06x}, first byte {}",
                packet.len(),
                packet.source().1,
                packet.data().first().copied().unwrap_or(0)
            );
            let _ = driver.return_packet(packet);
        }
        while let Some(report) = driver.take_tx_report() {
            log!(log::Level::Debug, "TX report: {:?}", report);
        }
        if let Ok(status) = driver.status() {
            log!(
                log::Level::Info,
                "State {:?}, sent {}, received {}, failures {}, link quality {}",
                status.state,
                status.packets_sent,
                status.packets_received,
                status.delivery_failures,
                status.link_quality()
            );
        }
        i = i.wrapping_add(1);
    }
}
