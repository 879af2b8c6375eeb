//! Discovery tests over simulated ports.

use freewili_host::protocol::{ProcessorType, CMD_IDENTIFY};
use freewili_host::sim::{Personality, SimConfig, SimEnumerator, SimulatedDevice};
use freewili_host::{DiscoveryConfig, Discovery, HostError, PortInfo, RetryPolicy};

fn config() -> DiscoveryConfig {
    DiscoveryConfig {
        probe_timeout_ms: 30,
        usb_filter: Vec::new(),
    }
}

fn device(name: &str, personality: Personality) -> SimulatedDevice {
    SimulatedDevice::named(name, SimConfig::default().with_personality(personality))
}

#[test]
fn test_garbage_port_is_excluded() {
    let garbage = device("/dev/ttyACM0", Personality::Garbage);
    let board = device("/dev/ttyACM1", Personality::FreeWili);
    let enumerator = SimEnumerator::new()
        .with_device(PortInfo::new("/dev/ttyACM0"), garbage.clone())
        .with_device(PortInfo::new("/dev/ttyACM1"), board.clone());

    let devices = Discovery::new(enumerator, config()).find_all().unwrap();

    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].index, 1);
    assert_eq!(devices[0].transport_identifier(), "/dev/ttyACM1");
    assert_eq!(devices[0].processor_type, ProcessorType::Main);
    // One identification attempt per port, nothing left open.
    assert_eq!(garbage.write_count(), 1);
    assert_eq!(board.write_count(), 1);
    assert_eq!(garbage.open_connections(), 0);
    assert_eq!(board.open_connections(), 0);
}

#[test]
fn test_failed_probes_are_excluded() {
    let enumerator = SimEnumerator::new()
        .with_device(PortInfo::new("COM1"), device("COM1", Personality::Impostor))
        .with_device(PortInfo::new("COM2"), device("COM2", Personality::Silent))
        .with_device(PortInfo::new("COM3"), device("COM3", Personality::FreeWili))
        .with_device(PortInfo::new("COM4"), device("COM4", Personality::FreeWili))
        .with_unopenable("COM4");

    let devices = Discovery::new(enumerator, config()).find_all().unwrap();

    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].transport_identifier(), "COM3");
}

#[test]
fn test_stale_bytes_are_cleared_before_probing() {
    let board = device("COM5", Personality::FreeWili);
    // A header promising 256 bytes that never arrive would swallow the reply.
    board.emit_stale_output(&[CMD_IDENTIFY, 0, 0, 1]);
    let enumerator = SimEnumerator::new().with_device(PortInfo::new("COM5"), board.clone());

    let devices = Discovery::new(enumerator, config()).find_all().unwrap();

    assert_eq!(devices.len(), 1);
    assert_eq!(board.write_count(), 1);
}

#[test]
fn test_indices_follow_port_order() {
    let enumerator = SimEnumerator::new()
        .with_device(PortInfo::new("b"), device("b", Personality::FreeWili))
        .with_device(PortInfo::new("x"), device("x", Personality::Garbage))
        .with_device(PortInfo::new("a"), device("a", Personality::FreeWili));

    let devices = Discovery::new(enumerator, config()).find_all().unwrap();

    let found: Vec<_> = devices
        .iter()
        .map(|d| (d.index, d.transport_identifier()))
        .collect();
    assert_eq!(found, vec![(1, "b"), (2, "a")]);
}

#[test]
fn test_select() {
    let board = device("ttyACM0", Personality::FreeWili);
    let enumerator = SimEnumerator::new().with_device(PortInfo::new("ttyACM0"), board.clone());
    let discovery = Discovery::new(enumerator, config());

    let selected = discovery.select(1).unwrap();
    assert_eq!(selected.transport_identifier(), "ttyACM0");

    let mut session = discovery.open(&selected, RetryPolicy::default()).unwrap();
    session.set_io(25, true).unwrap();
    assert_eq!(board.open_connections(), 1);
    drop(session);
    assert_eq!(board.open_connections(), 0);

    assert!(matches!(discovery.select(2), Err(HostError::DeviceNotFound(_))));
    assert!(matches!(discovery.select(0), Err(HostError::DeviceNotFound(_))));
}

#[test]
fn test_no_ports() {
    let discovery = Discovery::new(SimEnumerator::new(), config());
    assert!(discovery.find_all().unwrap().is_empty());
    assert!(matches!(discovery.select(1), Err(HostError::DeviceNotFound(_))));
}
