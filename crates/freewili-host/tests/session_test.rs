//! Session behavior against the simulated device and scripted transports.
//!
//! Covers retry counting, stale and corrupt traffic, notification dispatch
//! and the typed device commands.
//!
//! ## Note on Serial Execution
//!
//! Tests that assert on elapsed time use #[serial] so they are not slowed by
//! other tests competing for the CPU.

use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

use freewili_host::protocol::{
    crc16_ccitt_false, Command, DeviceErrorCode, Frame, IoAck, Notification, ProtocolError,
    Response, CMD_IDENTIFY, CMD_SPI_TRANSFER, RESP_OK,
};
use freewili_host::sim::{Personality, SimConfig, SimConnection, SimulatedDevice};
use freewili_host::{ChannelHandler, HostError, RetryPolicy, ScriptContext, Session, Transport};
use serial_test::serial;

// ============================================================================
// Helpers
// ============================================================================

fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        timeout: Duration::from_millis(20),
        timeout_step: Duration::from_millis(10),
        max_resyncs: 16,
    }
}

fn connect(config: SimConfig, max_attempts: u32) -> (Session<SimConnection>, SimulatedDevice) {
    let device = SimulatedDevice::new(config);
    let session = Session::new(device.connect(), policy(max_attempts));
    (session, device)
}

/// A transport that answers each write with canned bytes.
#[derive(Default)]
struct ScriptedTransport {
    replies: VecDeque<Vec<u8>>,
    pending: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
}

impl ScriptedTransport {
    fn reply(mut self, bytes: Vec<u8>) -> Self {
        self.replies.push_back(bytes);
        self
    }
}

impl Transport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    fn read(&mut self, max_bytes: usize, timeout: Duration) -> io::Result<Vec<u8>> {
        if self.pending.is_empty() {
            std::thread::sleep(timeout);
            return Ok(Vec::new());
        }
        let n = max_bytes.min(self.pending.len());
        Ok(self.pending.drain(..n).collect())
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.writes.push(data.to_vec());
        if let Some(reply) = self.replies.pop_front() {
            self.pending.extend(reply);
        }
        Ok(())
    }
}

fn ok_frame(sequence_id: u8, payload: Vec<u8>) -> Vec<u8> {
    Response::Ok { payload }.to_frame(sequence_id).unwrap().encode()
}

// ============================================================================
// Retry and timeout
// ============================================================================

#[test]
#[serial]
fn test_silent_device_is_retried_exactly_max_attempts() {
    let (mut session, device) = connect(
        SimConfig::default().with_personality(Personality::Silent),
        3,
    );
    let started = Instant::now();
    let err = session.identify().unwrap_err();

    assert!(matches!(err, HostError::Timeout { attempts: 3, .. }));
    assert_eq!(device.write_count(), 3);
    // 20 + 30 + 40 ms
    assert!(started.elapsed() >= Duration::from_millis(90));
}

#[test]
fn test_retries_resend_the_same_frame() {
    let mut session = Session::new(ScriptedTransport::default(), policy(2));
    session.poll_i2c().unwrap_err();
    let writes = &session.transport().writes;
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0], writes[1]);
}

#[test]
fn test_lost_response_is_recovered_by_retry() {
    let (mut session, device) = connect(SimConfig::default(), 3);
    device.drop_response_to_write(1);
    session.set_io(25, true).unwrap();
    assert_eq!(device.write_count(), 2);
}

#[test]
fn test_every_response_lost_is_timeout() {
    let (mut session, device) = connect(SimConfig::default(), 2);
    device.drop_every_nth_response(1);
    let err = session.set_io(25, true).unwrap_err();
    assert!(err.is_no_response());
    assert_eq!(device.write_count(), 2);
}

#[test]
fn test_every_second_response_lost() {
    let (mut session, device) = connect(SimConfig::default(), 3);
    device.drop_every_nth_response(2);
    for pin in 0..5 {
        session.set_io(pin, true).unwrap();
    }
    assert_eq!(session.get_all_io().unwrap(), 0b1_1111);
}

// ============================================================================
// Stream hygiene
// ============================================================================

#[test]
fn test_stale_response_is_dropped() {
    let mut reply = ok_frame(0x7F, vec![9]);
    reply.extend(ok_frame(1, IoAck { pin: 25 }.encode()));
    let transport = ScriptedTransport::default().reply(reply);
    let mut session = Session::new(transport, policy(1));
    session.set_io(25, true).unwrap();
}

#[test]
fn test_wrong_pin_ack_is_protocol_error() {
    let transport = ScriptedTransport::default().reply(ok_frame(1, IoAck { pin: 24 }.encode()));
    let mut session = Session::new(transport, policy(1));
    let err = session.set_io(25, true).unwrap_err();
    assert!(matches!(err, HostError::Protocol(ProtocolError::InvalidData(_))));
}

/// An `Ok` frame whose checksum bytes were overwritten.
fn damaged_frame() -> Vec<u8> {
    let header = [RESP_OK, 0xEE, 0x00, 0x00];
    assert_ne!(crc16_ccitt_false(&header), 0xFFFF);
    let mut frame = header.to_vec();
    frame.extend_from_slice(&[0xFF, 0xFF]);
    frame
}

#[test]
fn test_noise_before_response_is_skipped() {
    let (mut session, device) = connect(SimConfig::default(), 1);
    device.set_i2c_data(vec![0xAB]);
    device.inject_noise(b"\xFF\xFEboot ok");
    assert_eq!(session.poll_i2c().unwrap(), vec![0xAB]);
}

#[test]
fn test_damaged_frame_before_response_is_skipped() {
    let (mut session, device) = connect(SimConfig::default(), 1);
    device.inject_noise(&damaged_frame());
    session.set_io(3, false).unwrap();
    assert_eq!(device.write_count(), 1);
}

#[test]
fn test_stalled_header_is_recovered_by_retry() {
    // An identify header promising 256 bytes swallows the first response.
    let (mut session, device) = connect(SimConfig::default(), 3);
    device.inject_noise(&[CMD_IDENTIFY, 0x00, 0x00, 0x01]);
    session.identify().unwrap();
    assert_eq!(device.write_count(), 2);
}

#[test]
fn test_persistent_corruption_is_corrupt_stream() {
    let device = SimulatedDevice::new(SimConfig::default());
    let mut session = Session::new(
        device.connect(),
        RetryPolicy {
            max_resyncs: 4,
            ..policy(1)
        },
    );
    device.inject_noise(&damaged_frame().repeat(10));
    let err = session.identify().unwrap_err();
    assert!(matches!(err, HostError::CorruptStream { resyncs: 5, .. }));
}

#[test]
fn test_byte_at_a_time_reads() {
    let (mut session, _device) = connect(
        SimConfig {
            read_chunk: 1,
            ..Default::default()
        },
        1,
    );
    let info = session.identify().unwrap();
    assert_eq!(info.version, 12);
}

// ============================================================================
// Notifications
// ============================================================================

#[test]
fn test_notifications_are_dispatched_during_call() {
    let (tx, rx) = crossbeam_channel::unbounded();
    let device = SimulatedDevice::new(SimConfig::default());
    let mut session =
        Session::new(device.connect(), policy(1)).with_handler(ChannelHandler(tx));

    device.queue_notification(Notification::Log {
        text: "script started".to_string(),
    });
    device.queue_notification(Notification::I2cInterrupt { data: vec![7] });
    session.set_io(25, true).unwrap();

    let received: Vec<_> = rx.try_iter().collect();
    assert_eq!(
        received,
        vec![
            Notification::Log {
                text: "script started".to_string()
            },
            Notification::I2cInterrupt { data: vec![7] },
        ]
    );
}

#[test]
fn test_closure_handler() {
    let (tx, rx) = crossbeam_channel::unbounded();
    let device = SimulatedDevice::new(SimConfig::default());
    let mut session = Session::new(device.connect(), policy(1))
        .with_handler(move |n: Notification| tx.send(n).unwrap());
    device.queue_notification(Notification::IoChanged { mask: 0x10 });
    session.get_all_io().unwrap();
    assert_eq!(rx.try_recv().unwrap(), Notification::IoChanged { mask: 0x10 });
}

// ============================================================================
// Device commands
// ============================================================================

#[test]
fn test_set_io() {
    let (mut session, _device) = connect(SimConfig::default(), 1);
    session.set_io(25, true).unwrap();
    assert_eq!(session.get_all_io().unwrap(), 1 << 25);
    session.set_io(25, false).unwrap();
    assert_eq!(session.get_all_io().unwrap(), 0);

    let err = session.set_io(255, true).unwrap_err();
    assert!(matches!(
        err,
        HostError::Protocol(ProtocolError::DeviceError(DeviceErrorCode::InvalidPin))
    ));
}

#[test]
fn test_poll_i2c() {
    let (mut session, device) = connect(SimConfig::default(), 1);
    assert_eq!(session.poll_i2c().unwrap(), Vec::<u8>::new());
    device.set_i2c_data(vec![1, 2]);
    assert_eq!(session.poll_i2c().unwrap(), vec![1, 2]);
}

#[test]
fn test_poll_i2c_bus_error() {
    let (mut session, _device) = connect(
        SimConfig {
            i2c_bus_error: true,
            ..Default::default()
        },
        1,
    );
    let err = session.poll_i2c().unwrap_err();
    assert_eq!(err.device_error(), Some(DeviceErrorCode::BusError));
}

#[test]
fn test_run_script_without_name_sends_nothing() {
    let (mut session, device) = connect(SimConfig::default(), 1);
    let err = session.run_script(None, &ScriptContext::new()).unwrap_err();
    assert!(matches!(err, HostError::MissingScriptName));
    assert_eq!(device.write_count(), 0);
}

#[test]
fn test_run_script_resolves_name() {
    let (mut session, device) = connect(SimConfig::default(), 1);
    device.add_file("blink.wasm", vec![0; 10]);

    let context = ScriptContext::new().with_file_name("blink.wasm");
    let output = session.run_script(None, &context).unwrap();
    assert_eq!(output, "ran blink.wasm (10 bytes)");

    let err = session.run_script(Some("missing.wasm"), &context).unwrap_err();
    assert_eq!(err.device_error(), Some(DeviceErrorCode::NotFound));
    assert_eq!(
        device.commands().last(),
        Some(&Command::RunScript {
            name: "missing.wasm".to_string()
        })
    );
}

#[test]
fn test_peripheral_commands() {
    let (mut session, device) = connect(SimConfig::default(), 1);

    assert_eq!(session.spi_transfer(&[1, 2, 3]).unwrap(), vec![1, 2, 3]);

    session.write_i2c(0x20, 0x01, &[0xAA, 0xBB]).unwrap();
    assert_eq!(session.read_i2c(0x20, 0x01, 3).unwrap(), vec![0xAA, 0xBB, 0x00]);
    assert!(session.read_i2c(0x21, 0x01, 1).is_err());

    session.write_radio(b"ping").unwrap();
    assert_eq!(session.read_radio(2).unwrap(), b"pi".to_vec());
    assert!(session.read_radio(16).unwrap().is_empty());

    session.write_uart(b"hello").unwrap();
    assert_eq!(device.uart_output(), b"hello".to_vec());

    session.generate_pwm(4, 1000, 50).unwrap();
    assert!(matches!(
        session.generate_pwm(4, 1000, 150),
        Err(HostError::InvalidArgument(_))
    ));

    device.add_file("top.bit", vec![1]);
    assert_eq!(session.load_fpga("top.bit").unwrap(), "loaded top.bit");
}

#[test]
fn test_raw_call() {
    let (mut session, _device) = connect(SimConfig::default(), 1);
    let response = session.call_raw(CMD_SPI_TRANSFER, vec![9, 8]).unwrap();
    assert_eq!(response, Response::Ok { payload: vec![9, 8] });
    assert!(Frame::new(0x3E, 0, Vec::new()).is_err());
}

#[test]
fn test_sessions_on_separate_threads() {
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let device = SimulatedDevice::named(format!("sim{}", i), SimConfig::default());
            let mut session = Session::new(device.connect(), policy(1));
            std::thread::spawn(move || {
                for _ in 0..10 {
                    session.set_io(i, true).unwrap();
                }
                session.get_all_io().unwrap()
            })
        })
        .collect();
    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.join().unwrap(), 1 << i);
    }
}
