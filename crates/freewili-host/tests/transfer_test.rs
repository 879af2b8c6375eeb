//! File transfer tests against the simulated device.

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use freewili_host::protocol::{
    decode_frame, file_checksum, ChunkData, Command, Decoded, FileInfo, ProtocolError, Response,
    RESP_OK,
};
use freewili_host::sim::{SimConfig, SimConnection, SimulatedDevice};
use freewili_host::{
    AbortReason, CancelToken, FileTransfer, HostError, RetryPolicy, Session, TransferConfig,
    Transport,
};

fn session(device: &SimulatedDevice) -> Session<SimConnection> {
    let policy = RetryPolicy {
        max_attempts: 1,
        timeout: Duration::from_millis(20),
        timeout_step: Duration::ZERO,
        max_resyncs: 16,
    };
    Session::new(device.connect(), policy)
}

fn transfer_config() -> TransferConfig {
    TransferConfig {
        chunk_size: 256,
        chunk_retries: 2,
    }
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

fn chunk_indices(device: &SimulatedDevice) -> Vec<u32> {
    device
        .commands()
        .iter()
        .filter_map(|c| match c {
            Command::FileChunk { index, .. } => Some(*index),
            _ => None,
        })
        .collect()
}

/// A device stand-in that answers each command through a closure.
///
/// The closure gets the decoded command and its sequence id and returns the
/// raw reply bytes; an empty reply means silence.
struct ScriptedDevice<F> {
    respond: F,
    pending: VecDeque<u8>,
    commands: Vec<Command>,
}

impl<F> ScriptedDevice<F>
where
    F: FnMut(&Command, u8) -> io::Result<Vec<u8>>,
{
    fn new(respond: F) -> Self {
        ScriptedDevice {
            respond,
            pending: VecDeque::new(),
            commands: Vec::new(),
        }
    }
}

impl<F> Transport for ScriptedDevice<F>
where
    F: FnMut(&Command, u8) -> io::Result<Vec<u8>>,
{
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
        let Decoded::Frame(frame, _) = decode_frame(data) else {
            panic!("host wrote an undecodable frame");
        };
        let command = Command::from_frame(&frame).unwrap();
        let reply = (self.respond)(&command, frame.sequence_id())?;
        self.commands.push(command);
        self.pending.extend(reply);
        Ok(())
    }
}

fn scripted<F>(respond: F) -> Session<ScriptedDevice<F>>
where
    F: FnMut(&Command, u8) -> io::Result<Vec<u8>>,
{
    let policy = RetryPolicy {
        max_attempts: 1,
        timeout: Duration::from_millis(20),
        timeout_step: Duration::ZERO,
        max_resyncs: 2,
    };
    Session::new(ScriptedDevice::new(respond), policy)
}

fn ok_reply(sequence_id: u8, payload: Vec<u8>) -> Vec<u8> {
    Response::Ok { payload }.to_frame(sequence_id).unwrap().encode()
}

fn abort_reason(err: HostError) -> AbortReason {
    match err {
        HostError::TransferAborted { reason, .. } => reason,
        other => panic!("expected an aborted transfer, got {other}"),
    }
}

// ============================================================================
// Outbound
// ============================================================================

#[test]
fn test_lossless_send_exchanges_ceil_chunks() {
    let device = SimulatedDevice::new(SimConfig::default());
    let mut session = session(&device);
    let data = payload(1000);

    let report = FileTransfer::new(&transfer_config())
        .send(&mut session, &data, "/scripts/blink.wasm")
        .unwrap();

    assert_eq!(report.chunks, 4);
    assert_eq!(report.chunk_retries, 0);
    assert_eq!(report.checksum, file_checksum(&data));
    assert_eq!(chunk_indices(&device), vec![0, 1, 2, 3]);
    // begin + 4 chunks + end
    assert_eq!(device.write_count(), 6);
    assert_eq!(device.file("/scripts/blink.wasm"), Some(data));
}

#[test]
fn test_exact_multiple_of_chunk_size() {
    let device = SimulatedDevice::new(SimConfig::default());
    let mut session = session(&device);
    let report = FileTransfer::new(&transfer_config())
        .send(&mut session, &payload(512), "two")
        .unwrap();
    assert_eq!(report.chunks, 2);
}

#[test]
fn test_one_lost_chunk_adds_one_retry() {
    let device = SimulatedDevice::new(SimConfig::default());
    device.drop_first_chunk_response(2);
    let mut session = session(&device);
    let data = payload(1000);

    let report = FileTransfer::new(&transfer_config())
        .send(&mut session, &data, "lossy.bin")
        .unwrap();

    assert_eq!(report.chunk_retries, 1);
    assert_eq!(chunk_indices(&device), vec![0, 1, 2, 2, 3]);
    assert_eq!(device.write_count(), 7);
    // The duplicate was acknowledged but stored once.
    assert_eq!(device.file("lossy.bin"), Some(data));
}

#[test]
fn test_silent_chunk_aborts_after_retries() {
    let device = SimulatedDevice::new(SimConfig::default());
    // begin is write 1; chunk 0 and its two resends are writes 2-4
    for write in 2..=4 {
        device.drop_response_to_write(write);
    }
    let mut session = session(&device);

    let err = FileTransfer::new(&transfer_config())
        .send(&mut session, &payload(600), "never.bin")
        .unwrap_err();

    match err {
        HostError::TransferAborted { name, reason } => {
            assert_eq!(name, "never.bin");
            assert_eq!(reason, AbortReason::NoResponse { chunk: Some(0) });
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(chunk_indices(&device), vec![0, 0, 0]);
    assert!(device.file("never.bin").is_none());
}

#[test]
fn test_cancel_between_chunks() {
    let device = SimulatedDevice::new(SimConfig::default());
    let mut session = session(&device);
    let token = CancelToken::new();
    let trigger = token.clone();

    let err = FileTransfer::new(&transfer_config())
        .with_cancel(token)
        .with_progress(move |_, _| trigger.cancel())
        .send(&mut session, &payload(1000), "cancelled.bin")
        .unwrap_err();

    assert!(matches!(
        err,
        HostError::TransferAborted {
            reason: AbortReason::Cancelled,
            ..
        }
    ));
    assert_eq!(chunk_indices(&device), vec![0]);
    assert!(device.file("cancelled.bin").is_none());
}

#[test]
fn test_existing_file_kept_until_commit() {
    let device = SimulatedDevice::new(SimConfig::default());
    device.add_file("app.wasm", b"old".to_vec());
    for write in 3..=5 {
        device.drop_response_to_write(write);
    }
    let mut session = session(&device);

    FileTransfer::new(&transfer_config())
        .send(&mut session, &payload(300), "app.wasm")
        .unwrap_err();
    assert_eq!(device.file("app.wasm"), Some(b"old".to_vec()));

    session.send_file(b"new", "app.wasm").unwrap();
    assert_eq!(device.file("app.wasm"), Some(b"new".to_vec()));
}

#[test]
fn test_malformed_chunk_ack_aborts() {
    let mut session = scripted(|_, seq| Ok(ok_reply(seq, Vec::new())));

    let err = FileTransfer::new(&transfer_config())
        .send(&mut session, &payload(300), "short.bin")
        .unwrap_err();

    assert_eq!(
        abort_reason(err),
        AbortReason::Malformed(ProtocolError::PayloadTooShort {
            expected: 4,
            actual: 0
        })
    );
}

#[test]
fn test_corrupt_stream_during_chunk_aborts() {
    // The trailing checksum does not match this header.
    let damaged = [RESP_OK, 0xEE, 0, 0, 0xFF, 0xFF];
    let mut session = scripted(move |command, seq| {
        Ok(match command {
            Command::FileChunk { .. } => damaged.repeat(6),
            _ => ok_reply(seq, Vec::new()),
        })
    });

    let err = FileTransfer::new(&transfer_config())
        .send(&mut session, &payload(300), "noisy.bin")
        .unwrap_err();

    assert_eq!(abort_reason(err), AbortReason::CorruptStream { resyncs: 3 });
}

#[test]
fn test_transport_failure_aborts() {
    let mut session = scripted(|command, seq| match command {
        Command::FileChunk { .. } => Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")),
        _ => Ok(ok_reply(seq, Vec::new())),
    });

    let err = FileTransfer::new(&transfer_config())
        .send(&mut session, &payload(300), "gone.bin")
        .unwrap_err();

    assert!(matches!(abort_reason(err), AbortReason::Transport(_)));
}

// ============================================================================
// Inbound
// ============================================================================

/// Replies for a device that announces `total_length` bytes and answers
/// every chunk request with `chunk(index)`.
fn serve_file(
    total_length: u32,
    mut chunk: impl FnMut(u32) -> ChunkData,
) -> impl FnMut(&Command, u8) -> io::Result<Vec<u8>> {
    move |command: &Command, seq: u8| {
        let payload = match command {
            Command::FileGetBegin { .. } => FileInfo {
                total_length,
                checksum: 0,
            }
            .encode(),
            Command::FileGetChunk { index } => chunk(*index).encode(),
            _ => Vec::new(),
        };
        Ok(ok_reply(seq, payload))
    }
}

#[test]
fn test_get_cancel_between_chunks_releases_device() {
    let device = SimulatedDevice::new(SimConfig::default());
    device.add_file("log.txt", payload(700));
    let mut session = session(&device);
    let token = CancelToken::new();
    let trigger = token.clone();

    let err = FileTransfer::new(&transfer_config())
        .with_cancel(token)
        .with_progress(move |_, _| trigger.cancel())
        .get(&mut session, "log.txt")
        .unwrap_err();

    assert_eq!(abort_reason(err), AbortReason::Cancelled);
    let chunk_requests = device
        .commands()
        .iter()
        .filter(|c| matches!(c, Command::FileGetChunk { .. }))
        .count();
    assert_eq!(chunk_requests, 1);
    assert_eq!(device.commands().last(), Some(&Command::FileGetEnd));
}

#[test]
fn test_get_rejects_wrong_chunk_index() {
    let mut session = scripted(serve_file(10, |index| ChunkData {
        index: index + 1,
        data: vec![0; 10],
    }));

    let err = FileTransfer::new(&transfer_config())
        .get(&mut session, "skip.bin")
        .unwrap_err();

    assert_eq!(
        abort_reason(err),
        AbortReason::SequenceMismatch {
            expected: 0,
            actual: 1
        }
    );
    assert_eq!(
        session.transport().commands.last(),
        Some(&Command::FileGetEnd)
    );
}

#[test]
fn test_get_empty_chunk_aborts() {
    // A huge announced size must not be reserved up front either.
    let mut session = scripted(serve_file(u32::MAX, |index| ChunkData {
        index,
        data: Vec::new(),
    }));

    let err = FileTransfer::new(&transfer_config())
        .get(&mut session, "stuck.bin")
        .unwrap_err();

    assert_eq!(
        abort_reason(err),
        AbortReason::LengthMismatch {
            expected: u64::from(u32::MAX),
            actual: 0
        }
    );
    let commands = &session.transport().commands;
    assert_eq!(commands.len(), 3);
    assert_eq!(commands.last(), Some(&Command::FileGetEnd));
}

#[test]
fn test_get_oversized_chunk_aborts() {
    let mut session = scripted(serve_file(4, |index| ChunkData {
        index,
        data: vec![1; 8],
    }));

    let err = FileTransfer::new(&transfer_config())
        .get(&mut session, "long.bin")
        .unwrap_err();

    assert_eq!(
        abort_reason(err),
        AbortReason::LengthMismatch {
            expected: 4,
            actual: 8
        }
    );
}

#[test]
fn test_get_malformed_file_info_aborts() {
    let mut session = scripted(|_, seq| Ok(ok_reply(seq, vec![1, 2])));

    let err = FileTransfer::new(&transfer_config())
        .get(&mut session, "odd.bin")
        .unwrap_err();

    assert!(matches!(abort_reason(err), AbortReason::Malformed(_)));
}

#[test]
fn test_get_file() {
    let device = SimulatedDevice::new(SimConfig::default());
    let data = payload(700);
    device.add_file("log.txt", data.clone());
    let mut session = session(&device);

    let mut progress = Vec::new();
    let (received, report) = FileTransfer::new(&transfer_config())
        .with_progress(|done, total| progress.push((done, total)))
        .get(&mut session, "log.txt")
        .unwrap();

    assert_eq!(received, data);
    assert_eq!(report.chunks, 3);
    assert_eq!(progress, vec![(256, 700), (512, 700), (700, 700)]);
    assert_eq!(device.commands().last(), Some(&Command::FileGetEnd));
}

#[test]
fn test_get_empty_file() {
    let device = SimulatedDevice::new(SimConfig::default());
    device.add_file("empty", Vec::new());
    let mut session = session(&device);
    assert!(session.get_file("empty").unwrap().is_empty());
}

#[test]
fn test_get_retries_lost_chunk() {
    let device = SimulatedDevice::new(SimConfig::default());
    let data = payload(700);
    device.add_file("log.txt", data.clone());
    // begin is write 1, chunk 0 is write 2, chunk 1 is write 3
    device.drop_response_to_write(3);
    let mut session = session(&device);

    let (received, report) = FileTransfer::new(&transfer_config())
        .get(&mut session, "log.txt")
        .unwrap();
    assert_eq!(received, data);
    assert_eq!(report.chunk_retries, 1);
}

#[test]
fn test_get_detects_checksum_mismatch() {
    let device = SimulatedDevice::new(SimConfig {
        report_wrong_checksum: true,
        ..Default::default()
    });
    device.add_file("log.txt", payload(100));
    let mut session = session(&device);

    let err = session.get_file("log.txt").unwrap_err();
    assert!(matches!(
        err,
        HostError::TransferAborted {
            reason: AbortReason::IntegrityMismatch { .. },
            ..
        }
    ));
    // The device side is released even when the data is discarded.
    assert_eq!(device.commands().last(), Some(&Command::FileGetEnd));
}

#[test]
fn test_send_then_get_round_trip() {
    let device = SimulatedDevice::new(SimConfig {
        chunk_size: 100,
        ..Default::default()
    });
    let mut session = session(&device);
    let data = payload(4321);
    session.send_file(&data, "round.bin").unwrap();
    assert_eq!(session.get_file("round.bin").unwrap(), data);
}
