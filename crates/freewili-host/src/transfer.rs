//! Chunked file transfer over a session.
//!
//! Outbound transfers move through `Init -> Transferring -> Finalizing` and end
//! `Completed` or `Aborted`:
//!
//! 1. `FileBegin` announces the size and target name; the device may refuse,
//!    for example for lack of storage.
//! 2. Fixed-size `FileChunk`s follow, each acknowledged with its index before
//!    the next is sent. A chunk that times out is resent up to
//!    `chunk_retries` times; the device acknowledges a repeated chunk again
//!    without storing it twice.
//! 3. `FileEnd` carries the file checksum. The device commits the file under
//!    its final name only if the checksum matches.
//!
//! Inbound transfers ask for the size and checksum with `FileGetBegin`, pull
//! chunks by index and verify the checksum before returning any data.

use freewili_metrics::metric_defs;
use freewili_protocol::{
    file_checksum, ChunkAck, ChunkData, Command, FileChecksum, FileInfo, ProtocolError,
    MAX_PAYLOAD_SIZE,
};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::TransferConfig;
use crate::error::{AbortReason, HostError, Result};
use crate::session::Session;
use crate::transport::Transport;

/// Upper bound on the buffer reserved up front for an inbound file. The
/// announced size comes from the device; larger files grow as data arrives.
const MAX_INITIAL_RESERVE: usize = MAX_PAYLOAD_SIZE * 64;

/// Phase of a file transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    /// Announcing the transfer.
    Init,
    /// Moving chunks.
    Transferring,
    /// Waiting for the integrity check.
    Finalizing,
    /// Done; the file is committed or returned.
    Completed,
    /// Stopped early; nothing was committed or returned.
    Aborted,
}

/// Direction of a transfer, used for metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to device.
    Send,
    /// Device to host.
    Get,
}

impl Direction {
    fn as_str(&self) -> &'static str {
        match self {
            Direction::Send => "send",
            Direction::Get => "get",
        }
    }
}

/// Progress of one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTransferState {
    /// File name on the device.
    pub name: String,
    /// Direction.
    pub direction: Direction,
    /// Total file size in bytes.
    pub total_length: u64,
    /// Bytes acknowledged so far.
    pub bytes_transferred: u64,
    /// Index of the next chunk to move.
    pub next_chunk_index: u32,
    /// Chunk resends so far.
    pub chunk_retries: u32,
    /// Current phase.
    pub phase: TransferPhase,
}

impl FileTransferState {
    fn new(name: &str, direction: Direction, total_length: u64) -> Self {
        FileTransferState {
            name: name.to_string(),
            direction,
            total_length,
            bytes_transferred: 0,
            next_chunk_index: 0,
            chunk_retries: 0,
            phase: TransferPhase::Init,
        }
    }
}

/// Summary of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    /// File name on the device.
    pub name: String,
    /// File size in bytes.
    pub total_length: u64,
    /// Chunks exchanged, resends excluded.
    pub chunks: u32,
    /// Chunk resends.
    pub chunk_retries: u32,
    /// File checksum.
    pub checksum: u32,
}

/// A configured file transfer.
///
/// ```no_run
/// use freewili_host::{CancelToken, FileTransfer, TransferConfig};
/// # fn demo<T: freewili_host::Transport>(session: &mut freewili_host::Session<T>) -> freewili_host::Result<()> {
/// let cancel = CancelToken::new();
/// let report = FileTransfer::new(&TransferConfig::default())
///     .with_cancel(cancel.clone())
///     .with_progress(|done, total| println!("{}/{}", done, total))
///     .send(session, b"\0asm", "/scripts/blink.wasm")?;
/// println!("sent {} chunks", report.chunks);
/// # Ok(())
/// # }
/// ```
pub struct FileTransfer<'a> {
    chunk_size: usize,
    chunk_retries: u32,
    cancel: Option<CancelToken>,
    progress: Option<Box<dyn FnMut(u64, u64) + 'a>>,
}

impl<'a> FileTransfer<'a> {
    /// A transfer using the given chunk settings.
    pub fn new(config: &TransferConfig) -> Self {
        FileTransfer {
            chunk_size: config.chunk_size,
            chunk_retries: config.chunk_retries,
            cancel: None,
            progress: None,
        }
    }

    /// Check `token` between chunks.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Call `progress(bytes_transferred, total)` after every chunk.
    pub fn with_progress(mut self, progress: impl FnMut(u64, u64) + 'a) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    fn validate(&self) -> Result<()> {
        TransferConfig {
            chunk_size: self.chunk_size,
            chunk_retries: self.chunk_retries,
        }
        .validate()
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    fn report_progress(&mut self, state: &FileTransferState) {
        if let Some(progress) = self.progress.as_mut() {
            progress(state.bytes_transferred, state.total_length);
        }
    }

    /// Send `data` to the device as `name`.
    pub fn send<T: Transport>(
        mut self,
        session: &mut Session<T>,
        data: &[u8],
        name: &str,
    ) -> Result<TransferReport> {
        self.validate()?;
        let total_length = u32::try_from(data.len()).map_err(|_| {
            HostError::InvalidArgument(format!("{} bytes is too large to send", data.len()))
        })?;
        let checksum = file_checksum(data);
        let mut state = FileTransferState::new(name, Direction::Send, data.len() as u64);

        info!(
            "{}: sending {} ({} bytes, checksum 0x{:06X})",
            session.port_name(),
            name,
            total_length,
            checksum
        );
        let begin = Command::FileBegin {
            total_length,
            name: name.to_string(),
        };
        if let Err(e) = session.call_ok(&begin) {
            return Err(abort(session, &mut state, e, None));
        }

        state.phase = TransferPhase::Transferring;
        for chunk in data.chunks(self.chunk_size) {
            if self.cancelled() {
                return Err(abort_with(session, &mut state, AbortReason::Cancelled));
            }
            let index = state.next_chunk_index;
            let command = Command::FileChunk {
                index,
                data: chunk.to_vec(),
            };
            let payload = match self.call_chunk(session, &mut state, &command) {
                Ok(payload) => payload,
                Err(e) => return Err(abort(session, &mut state, e, Some(index))),
            };
            let ack = match ChunkAck::decode(&payload) {
                Ok(ack) => ack,
                Err(e) => return Err(abort(session, &mut state, e.into(), Some(index))),
            };
            if ack.index != index {
                let reason = AbortReason::SequenceMismatch {
                    expected: index,
                    actual: ack.index,
                };
                return Err(abort_with(session, &mut state, reason));
            }
            state.bytes_transferred += chunk.len() as u64;
            state.next_chunk_index += 1;
            count_bytes(session, Direction::Send, chunk.len());
            self.report_progress(&state);
        }

        state.phase = TransferPhase::Finalizing;
        if let Err(e) = session.call_ok(&Command::FileEnd { checksum }) {
            return Err(abort(session, &mut state, e, None));
        }
        state.phase = TransferPhase::Completed;
        info!(
            "{}: sent {} in {} chunks ({} retries)",
            session.port_name(),
            name,
            state.next_chunk_index,
            state.chunk_retries
        );

        Ok(TransferReport {
            name: state.name,
            total_length: state.total_length,
            chunks: state.next_chunk_index,
            chunk_retries: state.chunk_retries,
            checksum,
        })
    }

    /// Fetch the device file `name`, verifying its checksum.
    pub fn get<T: Transport>(
        mut self,
        session: &mut Session<T>,
        name: &str,
    ) -> Result<(Vec<u8>, TransferReport)> {
        self.validate()?;
        let mut state = FileTransferState::new(name, Direction::Get, 0);

        let begin = Command::FileGetBegin {
            name: name.to_string(),
        };
        let info = match session
            .call_ok(&begin)
            .and_then(|payload| Ok(FileInfo::decode(&payload)?))
        {
            Ok(info) => info,
            Err(e) => return Err(abort(session, &mut state, e, None)),
        };
        state.total_length = u64::from(info.total_length);
        info!(
            "{}: fetching {} ({} bytes)",
            session.port_name(),
            name,
            info.total_length
        );

        state.phase = TransferPhase::Transferring;
        let mut data = Vec::with_capacity((info.total_length as usize).min(MAX_INITIAL_RESERVE));
        let mut checksum = FileChecksum::new();
        while state.bytes_transferred < state.total_length {
            if self.cancelled() {
                release(session);
                return Err(abort_with(session, &mut state, AbortReason::Cancelled));
            }
            let index = state.next_chunk_index;
            let payload = match self.call_chunk(session, &mut state, &Command::FileGetChunk { index }) {
                Ok(payload) => payload,
                Err(e) => {
                    release(session);
                    return Err(abort(session, &mut state, e, Some(index)));
                }
            };
            let chunk = match ChunkData::decode(&payload) {
                Ok(chunk) => chunk,
                Err(e) => {
                    release(session);
                    return Err(abort(session, &mut state, e.into(), Some(index)));
                }
            };
            if chunk.index != index {
                release(session);
                let reason = AbortReason::SequenceMismatch {
                    expected: index,
                    actual: chunk.index,
                };
                return Err(abort_with(session, &mut state, reason));
            }
            let received = state.bytes_transferred + chunk.data.len() as u64;
            if chunk.data.is_empty() || received > state.total_length {
                release(session);
                let reason = AbortReason::LengthMismatch {
                    expected: state.total_length,
                    actual: received,
                };
                return Err(abort_with(session, &mut state, reason));
            }
            checksum.update(&chunk.data);
            data.extend_from_slice(&chunk.data);
            state.bytes_transferred = received;
            state.next_chunk_index += 1;
            count_bytes(session, Direction::Get, chunk.data.len());
            self.report_progress(&state);
        }

        state.phase = TransferPhase::Finalizing;
        release(session);
        if checksum.value() != info.checksum {
            let reason = AbortReason::IntegrityMismatch {
                expected: info.checksum,
                actual: checksum.value(),
            };
            return Err(abort_with(session, &mut state, reason));
        }
        state.phase = TransferPhase::Completed;
        debug!(
            "{}: fetched {} in {} chunks",
            session.port_name(),
            name,
            state.next_chunk_index
        );

        let report = TransferReport {
            name: state.name,
            total_length: state.total_length,
            chunks: state.next_chunk_index,
            chunk_retries: state.chunk_retries,
            checksum: info.checksum,
        };
        Ok((data, report))
    }

    /// One chunk exchange, resending on timeout within the chunk budget.
    fn call_chunk<T: Transport>(
        &self,
        session: &mut Session<T>,
        state: &mut FileTransferState,
        command: &Command,
    ) -> Result<Vec<u8>> {
        let mut retries = 0;
        loop {
            match session.call_ok(command) {
                Err(HostError::Timeout { .. }) if retries < self.chunk_retries => {
                    retries += 1;
                    state.chunk_retries += 1;
                    warn!(
                        "{}: chunk {} of {} timed out, retry {}/{}",
                        session.port_name(),
                        state.next_chunk_index,
                        state.name,
                        retries,
                        self.chunk_retries
                    );
                    let labels = session
                        .labels()
                        .with(&[("direction", state.direction.as_str().to_string())]);
                    metrics::counter!(metric_defs::TRANSFER_CHUNK_RETRIES.name, &labels).increment(1);
                }
                result => return result,
            }
        }
    }
}

impl<T: Transport> Session<T> {
    /// Send `data` as `name` with the default transfer settings.
    pub fn send_file(&mut self, data: &[u8], name: &str) -> Result<TransferReport> {
        FileTransfer::new(&TransferConfig::default()).send(self, data, name)
    }

    /// Fetch `name` with the default transfer settings.
    pub fn get_file(&mut self, name: &str) -> Result<Vec<u8>> {
        FileTransfer::new(&TransferConfig::default())
            .get(self, name)
            .map(|(data, _)| data)
    }
}

/// Tell the device to release an inbound transfer. Failures only get logged.
fn release<T: Transport>(session: &mut Session<T>) {
    if let Err(e) = session.call_ok(&Command::FileGetEnd) {
        warn!("{}: failed to release transfer: {}", session.port_name(), e);
    }
}

fn count_bytes<T: Transport>(session: &Session<T>, direction: Direction, bytes: usize) {
    let labels = session
        .labels()
        .with(&[("direction", direction.as_str().to_string())]);
    metrics::counter!(metric_defs::TRANSFER_BYTES.name, &labels).increment(bytes as u64);
}

/// Abort on a failed call, keeping "no response" apart from "rejected".
fn abort<T: Transport>(
    session: &Session<T>,
    state: &mut FileTransferState,
    error: HostError,
    chunk: Option<u32>,
) -> HostError {
    let reason = match error {
        HostError::Timeout { .. } => AbortReason::NoResponse { chunk },
        HostError::Protocol(ProtocolError::DeviceError(code)) => AbortReason::Rejected(code),
        HostError::Protocol(e) => AbortReason::Malformed(e),
        HostError::CorruptStream { resyncs, .. } => AbortReason::CorruptStream { resyncs },
        HostError::TransferAborted { reason, .. } => reason,
        other => AbortReason::Transport(other.to_string()),
    };
    abort_with(session, state, reason)
}

fn abort_with<T: Transport>(
    session: &Session<T>,
    state: &mut FileTransferState,
    reason: AbortReason,
) -> HostError {
    state.phase = TransferPhase::Aborted;
    warn!(
        "{}: transfer of {} aborted after {}/{} bytes: {}",
        session.port_name(),
        state.name,
        state.bytes_transferred,
        state.total_length,
        reason
    );
    let labels = session
        .labels()
        .with(&[("direction", state.direction.as_str().to_string())]);
    metrics::counter!(metric_defs::TRANSFER_ABORTED.name, &labels).increment(1);
    HostError::TransferAborted {
        name: state.name.clone(),
        reason,
    }
}
