//! In-memory simulated FreeWili device.
//!
//! [`SimulatedDevice`] answers framed commands the way the firmware does and
//! can lose responses, inject line noise or push notifications on demand. It
//! backs the test suite and lets tools be exercised without hardware.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use freewili_protocol::{
    file_checksum, AppInfo, ChunkAck, ChunkData, Command, Decoded, DeviceErrorCode, FileInfo,
    Frame, FrameCodec, IoAck, Notification, ProcessorType, Response, RESP_IDENTITY,
};
use parking_lot::Mutex;

use crate::error::{HostError, Result};
use crate::transport::{PortEnumerator, PortInfo, Transport};

/// What the thing on the other end of the port is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Personality {
    /// A FreeWili board speaking the framed protocol.
    #[default]
    FreeWili,
    /// Some other serial device that prints text at anything it receives.
    Garbage,
    /// A device answering identification with a foreign signature.
    Impostor,
    /// Never answers.
    Silent,
}

/// Simulated device behavior.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Identity reported to `Identify`.
    pub app_info: AppInfo,
    /// Overall behavior.
    pub personality: Personality,
    /// Highest valid IO pin.
    pub max_pin: u8,
    /// Data returned by `PollI2c`.
    pub i2c_data: Vec<u8>,
    /// Fail `PollI2c` with a bus error.
    pub i2c_bus_error: bool,
    /// Bytes of file storage.
    pub storage_capacity: usize,
    /// Chunk size used when serving `FileGetChunk`.
    pub chunk_size: usize,
    /// Report a wrong checksum in `FileGetBegin`.
    pub report_wrong_checksum: bool,
    /// Most bytes returned by one transport read.
    pub read_chunk: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            app_info: AppInfo::new(ProcessorType::Main, 12),
            personality: Personality::FreeWili,
            max_pin: 31,
            i2c_data: Vec::new(),
            i2c_bus_error: false,
            storage_capacity: 1 << 20,
            chunk_size: 256,
            report_wrong_checksum: false,
            read_chunk: 64,
        }
    }
}

impl SimConfig {
    /// A board identifying as `processor_type`.
    pub fn with_processor(mut self, processor_type: ProcessorType) -> Self {
        self.app_info.processor_type = processor_type;
        self
    }

    /// Set the personality.
    pub fn with_personality(mut self, personality: Personality) -> Self {
        self.personality = personality;
        self
    }
}

const GARBAGE: &[u8] = b"FreeWili Main Menu\r\n> ";

struct Upload {
    name: String,
    total_length: usize,
    data: Vec<u8>,
    next_index: u32,
}

struct DeviceState {
    config: SimConfig,
    rx: FrameCodec,
    outbound: VecDeque<u8>,
    files: BTreeMap<String, Vec<u8>>,
    upload: Option<Upload>,
    download: Option<Vec<u8>>,
    io_levels: u32,
    i2c_registers: HashMap<(u8, u8), Vec<u8>>,
    radio: VecDeque<Vec<u8>>,
    uart: Vec<u8>,
    commands: Vec<Command>,
    writes: usize,
    drop_writes: HashSet<usize>,
    drop_every: Option<usize>,
    drop_chunks: HashSet<u32>,
    pending_noise: Vec<u8>,
    pending_notifications: Vec<Notification>,
    open_connections: usize,
}

impl DeviceState {
    fn new(config: SimConfig) -> Self {
        DeviceState {
            config,
            rx: FrameCodec::new(),
            outbound: VecDeque::new(),
            files: BTreeMap::new(),
            upload: None,
            download: None,
            io_levels: 0,
            i2c_registers: HashMap::new(),
            radio: VecDeque::new(),
            uart: Vec::new(),
            commands: Vec::new(),
            writes: 0,
            drop_writes: HashSet::new(),
            drop_every: None,
            drop_chunks: HashSet::new(),
            pending_noise: Vec::new(),
            pending_notifications: Vec::new(),
            open_connections: 0,
        }
    }

    fn receive(&mut self, data: &[u8]) {
        self.writes += 1;
        let ordinal = self.writes;
        match self.config.personality {
            Personality::Silent => return,
            Personality::Garbage => {
                self.outbound.extend(GARBAGE);
                return;
            }
            Personality::FreeWili | Personality::Impostor => {}
        }

        self.rx.push(data);
        loop {
            match self.rx.decode() {
                Decoded::Frame(frame, _) => self.handle_frame(frame, ordinal),
                Decoded::Corrupt => continue,
                Decoded::NeedMoreData => break,
            }
        }
    }

    fn handle_frame(&mut self, frame: Frame, ordinal: usize) {
        let sequence_id = frame.sequence_id();
        let response = match Command::from_frame(&frame) {
            Ok(command) => {
                let response = self.execute(&command);
                let drop_chunk = match &command {
                    Command::FileChunk { index, .. } => self.drop_chunks.remove(index),
                    _ => false,
                };
                self.commands.push(command);
                if drop_chunk || self.should_drop(ordinal) {
                    return;
                }
                response
            }
            Err(_) => error(DeviceErrorCode::UnsupportedCommand),
        };

        let noise = std::mem::take(&mut self.pending_noise);
        self.outbound.extend(noise);
        for notification in std::mem::take(&mut self.pending_notifications) {
            if let Ok(frame) = notification.to_frame() {
                self.outbound.extend(frame.encode());
            }
        }

        let wire = if self.config.personality == Personality::Impostor
            && matches!(response, Response::Identity(_))
        {
            Frame::new(RESP_IDENTITY, sequence_id, b"MPY!\x01\x0c\x00".to_vec()).map(|f| f.encode())
        } else {
            response.to_frame(sequence_id).map(|f| f.encode())
        };
        if let Ok(wire) = wire {
            self.outbound.extend(wire);
        }
    }

    fn should_drop(&self, ordinal: usize) -> bool {
        self.drop_writes.contains(&ordinal)
            || self.drop_every.is_some_and(|n| n > 0 && ordinal % n == 0)
    }

    fn execute(&mut self, command: &Command) -> Response {
        match command {
            Command::Identify => Response::Identity(self.config.app_info),
            Command::SetIo { pin, high } => {
                if *pin > self.config.max_pin {
                    return Response::Error {
                        code: DeviceErrorCode::InvalidPin,
                        detail: vec![*pin],
                    };
                }
                if *pin < 32 {
                    if *high {
                        self.io_levels |= 1 << pin;
                    } else {
                        self.io_levels &= !(1 << pin);
                    }
                }
                ok(IoAck { pin: *pin }.encode())
            }
            Command::PollI2c => {
                if self.config.i2c_bus_error {
                    error(DeviceErrorCode::BusError)
                } else {
                    ok(self.config.i2c_data.clone())
                }
            }
            Command::RunScript { name } => match self.files.get(name) {
                Some(script) => ok(format!("ran {} ({} bytes)", name, script.len()).into_bytes()),
                None => error(DeviceErrorCode::NotFound),
            },
            Command::GeneratePwm {
                pin, duty_percent, ..
            } => {
                if *pin > self.config.max_pin {
                    error(DeviceErrorCode::InvalidPin)
                } else if *duty_percent > 100 {
                    error(DeviceErrorCode::IllegalArg)
                } else {
                    ok(Vec::new())
                }
            }
            Command::GetAllIo => ok(self.io_levels.to_le_bytes().to_vec()),
            Command::SpiTransfer { data } => ok(data.clone()),
            Command::WriteI2c {
                address,
                register,
                data,
            } => {
                self.i2c_registers.insert((*address, *register), data.clone());
                ok(Vec::new())
            }
            Command::ReadI2c {
                address,
                register,
                length,
            } => match self.i2c_registers.get(&(*address, *register)) {
                Some(data) => {
                    let mut out = data.clone();
                    out.resize(*length as usize, 0);
                    ok(out)
                }
                None => error(DeviceErrorCode::BusError),
            },
            Command::WriteRadio { data } => {
                self.radio.push_back(data.clone());
                ok(Vec::new())
            }
            Command::ReadRadio { max_len } => {
                let mut packet = self.radio.pop_front().unwrap_or_default();
                packet.truncate(*max_len as usize);
                ok(packet)
            }
            Command::WriteUart { data } => {
                self.uart.extend_from_slice(data);
                ok(Vec::new())
            }
            Command::LoadFpga { name } => match self.files.get(name) {
                Some(_) => ok(format!("loaded {}", name).into_bytes()),
                None => error(DeviceErrorCode::NotFound),
            },
            Command::FileBegin { total_length, name } => self.file_begin(*total_length, name),
            Command::FileChunk { index, data } => self.file_chunk(*index, data),
            Command::FileEnd { checksum } => self.file_end(*checksum),
            Command::FileGetBegin { name } => match self.files.get(name) {
                Some(data) => {
                    let mut checksum = file_checksum(data);
                    if self.config.report_wrong_checksum {
                        checksum ^= 1;
                    }
                    let info = FileInfo {
                        total_length: data.len() as u32,
                        checksum,
                    };
                    self.download = Some(data.clone());
                    ok(info.encode())
                }
                None => error(DeviceErrorCode::NotFound),
            },
            Command::FileGetChunk { index } => {
                let Some(data) = self.download.as_ref() else {
                    return error(DeviceErrorCode::BadState);
                };
                let start = *index as usize * self.config.chunk_size;
                if start > data.len() {
                    return error(DeviceErrorCode::IllegalArg);
                }
                let end = (start + self.config.chunk_size).min(data.len());
                ok(ChunkData {
                    index: *index,
                    data: data[start..end].to_vec(),
                }
                .encode())
            }
            Command::FileGetEnd => {
                self.download = None;
                ok(Vec::new())
            }
        }
    }

    fn used_storage(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }

    fn file_begin(&mut self, total_length: u32, name: &str) -> Response {
        if name.is_empty() {
            return error(DeviceErrorCode::IllegalArg);
        }
        let replaced = self.files.get(name).map_or(0, Vec::len);
        let free = (self.config.storage_capacity + replaced).saturating_sub(self.used_storage());
        if total_length as usize > free {
            return error(DeviceErrorCode::InsufficientStorage);
        }
        self.upload = Some(Upload {
            name: name.to_string(),
            total_length: total_length as usize,
            data: Vec::with_capacity(total_length as usize),
            next_index: 0,
        });
        ok(Vec::new())
    }

    fn file_chunk(&mut self, index: u32, data: &[u8]) -> Response {
        let Some(upload) = self.upload.as_mut() else {
            return error(DeviceErrorCode::BadState);
        };
        if index == upload.next_index {
            if upload.data.len() + data.len() > upload.total_length {
                return error(DeviceErrorCode::IllegalArg);
            }
            upload.data.extend_from_slice(data);
            upload.next_index += 1;
        } else if index.wrapping_add(1) != upload.next_index {
            return error(DeviceErrorCode::BadSequence);
        }
        // A repeated chunk is acknowledged again without being stored twice.
        ok(ChunkAck { index }.encode())
    }

    fn file_end(&mut self, checksum: u32) -> Response {
        let Some(upload) = self.upload.take() else {
            return error(DeviceErrorCode::BadState);
        };
        if upload.data.len() != upload.total_length || file_checksum(&upload.data) != checksum {
            return error(DeviceErrorCode::ChecksumMismatch);
        }
        self.files.insert(upload.name, upload.data);
        ok(Vec::new())
    }
}

fn ok(payload: Vec<u8>) -> Response {
    Response::Ok { payload }
}

fn error(code: DeviceErrorCode) -> Response {
    Response::Error {
        code,
        detail: Vec::new(),
    }
}

/// A simulated device. Clones share the same device.
#[derive(Clone)]
pub struct SimulatedDevice {
    name: String,
    state: Arc<Mutex<DeviceState>>,
}

impl SimulatedDevice {
    /// A device on port `sim0`.
    pub fn new(config: SimConfig) -> Self {
        Self::named("sim0", config)
    }

    /// A device on the named port.
    pub fn named(name: impl Into<String>, config: SimConfig) -> Self {
        SimulatedDevice {
            name: name.into(),
            state: Arc::new(Mutex::new(DeviceState::new(config))),
        }
    }

    /// Open a connection.
    pub fn connect(&self) -> SimConnection {
        self.state.lock().open_connections += 1;
        SimConnection {
            name: self.name.clone(),
            state: Arc::clone(&self.state),
        }
    }

    /// Port name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store a file without a transfer.
    pub fn add_file(&self, name: impl Into<String>, data: Vec<u8>) {
        self.state.lock().files.insert(name.into(), data);
    }

    /// Contents of a committed file.
    pub fn file(&self, name: &str) -> Option<Vec<u8>> {
        self.state.lock().files.get(name).cloned()
    }

    /// Names of committed files.
    pub fn file_names(&self) -> Vec<String> {
        self.state.lock().files.keys().cloned().collect()
    }

    /// Set the data `PollI2c` returns.
    pub fn set_i2c_data(&self, data: Vec<u8>) {
        self.state.lock().config.i2c_data = data;
    }

    /// Bytes written to the UART so far.
    pub fn uart_output(&self) -> Vec<u8> {
        self.state.lock().uart.clone()
    }

    /// Commands received, duplicates included.
    pub fn commands(&self) -> Vec<Command> {
        self.state.lock().commands.clone()
    }

    /// Transport writes received.
    pub fn write_count(&self) -> usize {
        self.state.lock().writes
    }

    /// Connections currently open.
    pub fn open_connections(&self) -> usize {
        self.state.lock().open_connections
    }

    /// Lose the response to the 1-based `ordinal` write.
    pub fn drop_response_to_write(&self, ordinal: usize) {
        self.state.lock().drop_writes.insert(ordinal);
    }

    /// Lose the response to every `n`th write.
    pub fn drop_every_nth_response(&self, n: usize) {
        self.state.lock().drop_every = Some(n);
    }

    /// Lose the response to the first `FileChunk` carrying `index`.
    pub fn drop_first_chunk_response(&self, index: u32) {
        self.state.lock().drop_chunks.insert(index);
    }

    /// Emit `noise` before the next response.
    pub fn inject_noise(&self, noise: &[u8]) {
        self.state.lock().pending_noise.extend_from_slice(noise);
    }

    /// Put bytes on the wire right away, as if left over from before the host
    /// connected.
    pub fn emit_stale_output(&self, bytes: &[u8]) {
        self.state.lock().outbound.extend(bytes);
    }

    /// Emit a notification before the next response.
    pub fn queue_notification(&self, notification: Notification) {
        self.state.lock().pending_notifications.push(notification);
    }
}

impl std::fmt::Debug for SimulatedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedDevice")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// One open connection to a [`SimulatedDevice`].
pub struct SimConnection {
    name: String,
    state: Arc<Mutex<DeviceState>>,
}

impl Transport for SimConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, max_bytes: usize, timeout: Duration) -> io::Result<Vec<u8>> {
        {
            let mut state = self.state.lock();
            if !state.outbound.is_empty() {
                let n = max_bytes.min(state.config.read_chunk.max(1)).min(state.outbound.len());
                return Ok(state.outbound.drain(..n).collect());
            }
        }
        std::thread::sleep(timeout);
        Ok(Vec::new())
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.state.lock().receive(data);
        Ok(())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.state.lock().outbound.clear();
        Ok(())
    }
}

impl Drop for SimConnection {
    fn drop(&mut self) {
        self.state.lock().open_connections -= 1;
    }
}

/// A [`PortEnumerator`] over simulated devices.
#[derive(Debug, Default)]
pub struct SimEnumerator {
    ports: Vec<(PortInfo, SimulatedDevice)>,
    unopenable: HashSet<String>,
}

impl SimEnumerator {
    /// Empty enumerator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device behind `port`.
    pub fn with_device(mut self, port: PortInfo, device: SimulatedDevice) -> Self {
        self.ports.push((port, device));
        self
    }

    /// Make opening `port` fail.
    pub fn with_unopenable(mut self, port: impl Into<String>) -> Self {
        self.unopenable.insert(port.into());
        self
    }
}

impl PortEnumerator for SimEnumerator {
    type Transport = SimConnection;

    fn available_ports(&self) -> Result<Vec<PortInfo>> {
        Ok(self.ports.iter().map(|(port, _)| port.clone()).collect())
    }

    fn open(&self, port: &PortInfo) -> Result<Self::Transport> {
        if self.unopenable.contains(&port.name) {
            return Err(HostError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} is busy", port.name),
            )));
        }
        self.ports
            .iter()
            .find(|(info, _)| info.name == port.name)
            .map(|(_, device)| device.connect())
            .ok_or_else(|| {
                HostError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} not present", port.name),
                ))
            })
    }
}
