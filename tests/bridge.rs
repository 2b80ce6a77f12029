use std::sync::Arc;

use acw02_bridge::attribute::{
    attr, cluster, endpoint, mirror_values, AttributePath, AttributeValue, AttributeWrite,
    MemoryAttributeTree,
};
use acw02_bridge::bridge::{frame_stream, Bridge, BridgeConfig};
use acw02_bridge::hvac::{HvacDriver, HvacState, HvacStore};
use acw02_bridge::protocol::{HvacMode, KEEPALIVE, STATUS_REQUEST};
use acw02_bridge::settings::{FileSettings, MemorySettings, SettingsStore};
use acw02_bridge::transport::MemoryTransport;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tokio_stream::wrappers::UnboundedReceiverStream;

const STATUS_HEAT_22: [u8; 34] = [
    0x7A, 0x7A, 0x21, 0xD5, 0x22, 0x00, 0x00, 0xA5, 0x0C, 0x16, 0x00, 0x80, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x17, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x2A, 0x03,
];

const ACK: [u8; 13] = [
    0x7A, 0x7A, 0x21, 0xD5, 0x0D, 0x00, 0x00, 0xA0, 0x00, 0x00, 0x00, 0x04, 0x08,
];

struct Harness {
    transport: Arc<MemoryTransport>,
    driver: Arc<HvacDriver>,
    tree: Arc<MemoryAttributeTree>,
    writes: mpsc::UnboundedSender<AttributeWrite>,
    chunks: mpsc::UnboundedSender<Vec<u8>>,
    run: JoinHandle<()>,
}

impl Harness {
    fn start() -> Harness {
        Harness::with_settings(Box::new(MemorySettings::new()))
    }

    fn with_settings(settings: Box<dyn SettingsStore>) -> Harness {
        let transport = Arc::new(MemoryTransport::new());
        let driver =
            Arc::new(HvacDriver::new(HvacStore::default(), transport.clone(), settings).unwrap());
        let tree = Arc::new(MemoryAttributeTree::new());
        let config = BridgeConfig::default();
        let bridge = Bridge::new(driver.clone(), tree.clone(), config.clone());

        let (writes, write_receiver) = mpsc::unbounded_channel();
        let (chunks, chunk_receiver) = mpsc::unbounded_channel();
        let frames = frame_stream(
            UnboundedReceiverStream::new(chunk_receiver),
            config.quiet_window,
        );
        let run = tokio::spawn(async move { bridge.run(write_receiver, frames).await });

        Harness {
            transport,
            driver,
            tree,
            writes,
            chunks,
            run,
        }
    }

    fn state(&self) -> HvacState {
        self.driver.store().snapshot().unwrap()
    }

    async fn stop(self) {
        drop(self.writes);
        drop(self.chunks);
        self.run.await.unwrap();
    }
}

fn thermostat(attribute: u16) -> AttributePath {
    AttributePath::new(endpoint::THERMOSTAT, cluster::THERMOSTAT, attribute)
}

#[cfg(not(feature = "fahrenheit-table"))]
#[tokio::test(start_paused = true)]
async fn power_on_then_heat_status() {
    let harness = Harness::start();

    harness.driver.set_power(true).unwrap();
    let written = harness.transport.take_written().unwrap();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].len(), 24);
    assert_eq!(written[0][8] & 0x0F, 0x08 | 0x01);

    harness.chunks.send(vec![0x00, 0x7A, 0x13]).unwrap();
    harness.chunks.send(STATUS_HEAT_22[..20].to_vec()).unwrap();
    harness.chunks.send(STATUS_HEAT_22[20..].to_vec()).unwrap();
    harness.chunks.send(vec![0x7A, 0x7A, 0x01]).unwrap();
    time::sleep(Duration::from_secs(1)).await;

    let state = harness.state();
    assert!(state.power_on);
    assert_eq!(state.mode, HvacMode::Heat);
    assert_eq!(state.target_temp_c, 22);
    assert_eq!(state.ambient_temp_c, 23.5);

    assert_eq!(
        harness.tree.get(thermostat(attr::RUNNING_MODE)),
        Some(AttributeValue::Enum8(0x04))
    );
    assert_eq!(
        harness.tree.get(thermostat(attr::LOCAL_TEMPERATURE)),
        Some(AttributeValue::I16(2350))
    );
    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn corrupted_block_before_ack() {
    let harness = Harness::start();

    let mut corrupted = STATUS_HEAT_22;
    corrupted[33] ^= 0x01;
    let mut stream = corrupted.to_vec();
    stream.extend_from_slice(&ACK);
    harness.chunks.send(stream).unwrap();
    time::sleep(Duration::from_secs(1)).await;

    assert_eq!(harness.state(), HvacState::default());
    assert_eq!(harness.tree.pushes(), 0);
    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn writes_are_mirrored_once_after_settling() {
    let harness = Harness::start();

    harness
        .writes
        .send(AttributeWrite {
            path: thermostat(attr::SYSTEM_MODE),
            value: AttributeValue::Enum8(0x04),
        })
        .unwrap();
    time::sleep(Duration::from_millis(100)).await;
    harness
        .writes
        .send(AttributeWrite {
            path: thermostat(attr::OCCUPIED_HEATING_SETPOINT),
            value: AttributeValue::I16(2100),
        })
        .unwrap();
    time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.tree.pushes(), 0);

    time::sleep(Duration::from_secs(1)).await;
    let state = harness.state();
    assert_eq!(harness.tree.pushes(), mirror_values(&state).len());
    assert_eq!(
        harness.tree.get(thermostat(attr::OCCUPIED_COOLING_SETPOINT)),
        Some(AttributeValue::I16(2100))
    );
    assert_eq!(
        harness.tree.get(thermostat(attr::SYSTEM_MODE)),
        Some(AttributeValue::Enum8(0x04))
    );
    assert_eq!(harness.transport.written().unwrap().len(), 2);
    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn attribute_writes_reach_settings_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.toml");
    let harness = Harness::with_settings(Box::new(FileSettings::open(&path, "hvac")));

    harness
        .writes
        .send(AttributeWrite {
            path: thermostat(attr::SYSTEM_MODE),
            value: AttributeValue::Enum8(0x04),
        })
        .unwrap();
    time::sleep(Duration::from_secs(1)).await;
    harness.stop().await;

    let mut restored = HvacState::default();
    restored.restore(&FileSettings::open(&path, "hvac"));
    assert_eq!(restored.mode, HvacMode::Heat);
    assert!(restored.power_on);
}

#[tokio::test(start_paused = true)]
async fn rejected_setpoint_is_reverted_in_tree() {
    let harness = Harness::start();

    harness
        .writes
        .send(AttributeWrite {
            path: thermostat(attr::OCCUPIED_COOLING_SETPOINT),
            value: AttributeValue::I16(3500),
        })
        .unwrap();
    time::sleep(Duration::from_secs(1)).await;

    assert!(harness.transport.written().unwrap().is_empty());
    assert_eq!(
        harness.tree.get(thermostat(attr::OCCUPIED_COOLING_SETPOINT)),
        Some(AttributeValue::I16(2400))
    );
    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn polling_requests_status_then_keepalive() {
    let harness = Harness::start();

    time::sleep(Duration::from_secs(29)).await;
    assert!(harness.transport.written().unwrap().is_empty());

    time::sleep(Duration::from_secs(2)).await;
    assert_eq!(
        harness.transport.take_written().unwrap(),
        vec![STATUS_REQUEST.to_vec(), KEEPALIVE.to_vec()]
    );
    assert_eq!(
        harness.tree.pushes(),
        mirror_values(&HvacState::default()).len()
    );

    harness.transport.set_fail_writes(true);
    time::sleep(Duration::from_secs(30)).await;
    assert_eq!(
        harness.tree.pushes(),
        2 * mirror_values(&HvacState::default()).len()
    );
    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn startup_keepalive_after_settling() {
    let transport = Arc::new(MemoryTransport::new());
    let driver = Arc::new(
        HvacDriver::new(
            HvacStore::default(),
            transport.clone(),
            Box::new(MemorySettings::new()),
        )
        .unwrap(),
    );
    let bridge = Bridge::new(
        driver,
        Arc::new(MemoryAttributeTree::new()),
        BridgeConfig::default(),
    );

    let started = time::Instant::now();
    bridge.start().await;
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(transport.written().unwrap(), vec![KEEPALIVE.to_vec()]);
}
