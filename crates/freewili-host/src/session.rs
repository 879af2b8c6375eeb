//! Request/response sessions over a transport.
//!
//! A [`Session`] owns one [`Transport`] and serializes calls on it. Each call
//! allocates a sequence id, writes the command frame and reads until the
//! response carrying the same id arrives. Notifications that arrive meanwhile
//! go to the registered [`NotificationHandler`]; stale responses are dropped
//! and corrupt frames resynchronize the decoder.

use std::time::Instant;

use freewili_metrics::{metric_defs, PortLabels};
use freewili_protocol::{
    decode_text_reply, decode_u32_reply, AppInfo, Command, Decoded, Frame, FrameCodec,
    FrameKind, IoAck, Notification, ProtocolError, Response, CMD_IDENTIFY,
};
use tracing::{debug, trace, warn};

use crate::config::RetryPolicy;
use crate::context::ScriptContext;
use crate::error::{HostError, Result};
use crate::notify::{log_notification, NotificationHandler};
use crate::transport::Transport;

/// Bytes requested per transport read.
const READ_CHUNK: usize = 512;

/// A connection to one device.
///
/// Not reentrant: every call takes `&mut self`. Share a session between
/// threads behind a mutex.
pub struct Session<T: Transport> {
    transport: T,
    codec: FrameCodec,
    policy: RetryPolicy,
    next_sequence_id: u8,
    handler: Option<Box<dyn NotificationHandler>>,
    labels: PortLabels,
}

impl<T: Transport> Session<T> {
    /// Create a session with the given retry policy.
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        let labels = PortLabels::new(transport.name());
        Session {
            transport,
            codec: FrameCodec::new(),
            policy,
            next_sequence_id: 1,
            handler: None,
            labels,
        }
    }

    /// Register the handler for unsolicited notifications.
    pub fn with_handler(mut self, handler: impl NotificationHandler + 'static) -> Self {
        self.set_handler(handler);
        self
    }

    /// Replace the notification handler.
    pub fn set_handler(&mut self, handler: impl NotificationHandler + 'static) {
        self.handler = Some(Box::new(handler));
    }

    /// The retry policy in use.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Change the retry policy.
    pub fn set_policy(&mut self, policy: RetryPolicy) {
        self.policy = policy;
    }

    /// Transport identifier.
    pub fn port_name(&self) -> &str {
        self.transport.name()
    }

    /// Get a reference to the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Get a mutable reference to the transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Consume the session, returning the transport.
    pub fn into_transport(self) -> T {
        self.transport
    }

    pub(crate) fn labels(&self) -> &PortLabels {
        &self.labels
    }

    fn allocate_sequence_id(&mut self) -> u8 {
        let id = self.next_sequence_id;
        self.next_sequence_id = self.next_sequence_id.wrapping_add(1);
        id
    }

    /// Send a raw opcode and payload, returning the matching response.
    pub fn call_raw(&mut self, opcode: u8, payload: Vec<u8>) -> Result<Response> {
        let sequence_id = self.allocate_sequence_id();
        let frame = Frame::new(opcode, sequence_id, payload)?;
        self.exchange(frame)
    }

    /// Send a command and wait for its response.
    ///
    /// A device error reply becomes [`HostError::Protocol`] carrying the device
    /// error code; silence after the last attempt becomes [`HostError::Timeout`].
    pub fn call(&mut self, command: &Command) -> Result<Response> {
        let sequence_id = self.allocate_sequence_id();
        let frame = command.to_frame(sequence_id)?;
        self.exchange(frame)
    }

    /// Send a command and return the payload of its `Ok` response.
    pub fn call_ok(&mut self, command: &Command) -> Result<Vec<u8>> {
        let response = self.call(command)?;
        Ok(response.into_ok_payload(command.code())?)
    }

    fn exchange(&mut self, frame: Frame) -> Result<Response> {
        let opcode = frame.opcode();
        let sequence_id = frame.sequence_id();
        let wire = frame.encode();
        let op_labels = self.labels.with_opcode(opcode);
        let started = Instant::now();
        let mut resyncs = 0u32;

        for attempt in 1..=self.policy.max_attempts {
            if attempt > 1 {
                debug!(
                    "{}: resending 0x{:02X} seq {} (attempt {}/{})",
                    self.labels.port, opcode, sequence_id, attempt, self.policy.max_attempts
                );
                metrics::counter!(metric_defs::SESSION_RETRIES.name, &op_labels).increment(1);
            }
            trace!("{}: tx {}", self.labels.port, hex::encode(&wire));
            self.transport.write(&wire)?;
            metrics::counter!(metric_defs::SESSION_FRAMES_TX.name, &op_labels).increment(1);

            let deadline = Instant::now() + self.policy.timeout_for(attempt);
            loop {
                match self.codec.decode() {
                    Decoded::Frame(reply, _) => {
                        metrics::counter!(metric_defs::SESSION_FRAMES_RX.name, &self.labels.to_labels())
                            .increment(1);
                        if let Some(response) = self.route(reply, opcode, sequence_id)? {
                            let elapsed = started.elapsed().as_secs_f64() * 1000.0;
                            metrics::histogram!(metric_defs::SESSION_CALL_LATENCY.name, &op_labels)
                                .record(elapsed);
                            return Ok(response);
                        }
                        continue;
                    }
                    Decoded::Corrupt => {
                        resyncs += 1;
                        metrics::counter!(metric_defs::SESSION_RESYNCS.name, &self.labels.to_labels())
                            .increment(1);
                        if resyncs > self.policy.max_resyncs {
                            warn!(
                                "{}: giving up on 0x{:02X} after {} corrupt frames",
                                self.labels.port, opcode, resyncs
                            );
                            self.codec.clear();
                            return Err(HostError::CorruptStream { opcode, resyncs });
                        }
                        continue;
                    }
                    Decoded::NeedMoreData => {}
                }

                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let data = self.transport.read(READ_CHUNK, deadline - now)?;
                if !data.is_empty() {
                    trace!("{}: rx {}", self.labels.port, hex::encode(&data));
                    self.codec.push(&data);
                }
            }

            // A damaged length field can stall the decoder on a header that
            // promises more bytes than will ever arrive.
            if self.codec.buffered_len() > 0 {
                let dropped = self.codec.resync();
                debug!(
                    "{}: dropped {} stalled bytes after timeout",
                    self.labels.port, dropped
                );
            }
        }

        warn!(
            "{}: no response to 0x{:02X} seq {} after {} attempts",
            self.labels.port, opcode, sequence_id, self.policy.max_attempts
        );
        metrics::counter!(metric_defs::SESSION_TIMEOUTS.name, &op_labels).increment(1);
        Err(HostError::Timeout {
            opcode,
            attempts: self.policy.max_attempts,
        })
    }

    /// Handle one decoded frame while waiting for `sequence_id`.
    ///
    /// Returns the response when it answers the pending call.
    fn route(&mut self, frame: Frame, opcode: u8, sequence_id: u8) -> Result<Option<Response>> {
        match frame.kind() {
            FrameKind::Response if frame.sequence_id() == sequence_id => {
                match Response::decode(frame.opcode(), frame.payload())? {
                    Response::Error { code, detail } => {
                        debug!(
                            "{}: 0x{:02X} rejected: {} {}",
                            self.labels.port,
                            opcode,
                            code,
                            hex::encode(&detail)
                        );
                        Err(HostError::Protocol(ProtocolError::DeviceError(code)))
                    }
                    response => Ok(Some(response)),
                }
            }
            FrameKind::Response => {
                debug!(
                    "{}: dropping stale response seq {} (waiting for {})",
                    self.labels.port,
                    frame.sequence_id(),
                    sequence_id
                );
                Ok(None)
            }
            FrameKind::Notification => {
                match Notification::decode(frame.opcode(), frame.payload()) {
                    Ok(notification) => self.dispatch(notification),
                    Err(e) => warn!("{}: undecodable notification: {}", self.labels.port, e),
                }
                Ok(None)
            }
            FrameKind::Command => {
                debug!(
                    "{}: ignoring command frame 0x{:02X} from device",
                    self.labels.port,
                    frame.opcode()
                );
                Ok(None)
            }
        }
    }

    fn dispatch(&mut self, notification: Notification) {
        metrics::counter!(metric_defs::SESSION_NOTIFICATIONS.name, &self.labels.to_labels())
            .increment(1);
        match self.handler.as_mut() {
            Some(handler) => handler.on_notification(notification),
            None => log_notification(&self.labels.port, &notification),
        }
    }

    // ------------------------------------------------------------------------
    // Device commands
    // ------------------------------------------------------------------------

    /// Ask the device who it is. The reply must carry the FreeWili signature.
    pub fn identify(&mut self) -> Result<AppInfo> {
        match self.call(&Command::Identify)? {
            Response::Identity(info) => Ok(info),
            other => Err(ProtocolError::UnexpectedResponse {
                command: CMD_IDENTIFY,
                actual: other.code(),
            }
            .into()),
        }
    }

    /// Drive an IO pin high or low.
    pub fn set_io(&mut self, pin: u8, high: bool) -> Result<()> {
        let payload = self.call_ok(&Command::SetIo { pin, high })?;
        let ack = IoAck::decode(&payload)?;
        if ack.pin != pin {
            return Err(ProtocolError::InvalidData(format!(
                "set_io acknowledged pin {} instead of {}",
                ack.pin, pin
            ))
            .into());
        }
        Ok(())
    }

    /// Read pending I2C data. An empty result means nothing was pending.
    pub fn poll_i2c(&mut self) -> Result<Vec<u8>> {
        self.call_ok(&Command::PollI2c)
    }

    /// Run a script stored on the device and return its output.
    ///
    /// Without an explicit name the name is resolved from `context`; if that
    /// fails nothing is sent.
    pub fn run_script(&mut self, name: Option<&str>, context: &ScriptContext) -> Result<String> {
        let name = context.resolve(name)?;
        debug!("{}: running script {}", self.labels.port, name);
        let payload = self.call_ok(&Command::RunScript { name })?;
        Ok(decode_text_reply(&payload))
    }

    /// Start PWM output on a pin.
    pub fn generate_pwm(&mut self, pin: u8, frequency_hz: u32, duty_percent: u8) -> Result<()> {
        if duty_percent > 100 {
            return Err(HostError::InvalidArgument(format!(
                "duty cycle must be 0-100%, got {}",
                duty_percent
            )));
        }
        self.call_ok(&Command::GeneratePwm {
            pin,
            frequency_hz,
            duty_percent,
        })?;
        Ok(())
    }

    /// Levels of all IOs as a bitmask, bit n for pin n.
    pub fn get_all_io(&mut self) -> Result<u32> {
        let payload = self.call_ok(&Command::GetAllIo)?;
        Ok(decode_u32_reply(&payload)?)
    }

    /// Full-duplex SPI exchange; returns the bytes clocked in.
    pub fn spi_transfer(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.call_ok(&Command::SpiTransfer {
            data: data.to_vec(),
        })
    }

    /// Write `data` to a register of an I2C device.
    pub fn write_i2c(&mut self, address: u8, register: u8, data: &[u8]) -> Result<()> {
        self.call_ok(&Command::WriteI2c {
            address,
            register,
            data: data.to_vec(),
        })?;
        Ok(())
    }

    /// Read `length` bytes from a register of an I2C device.
    pub fn read_i2c(&mut self, address: u8, register: u8, length: u8) -> Result<Vec<u8>> {
        self.call_ok(&Command::ReadI2c {
            address,
            register,
            length,
        })
    }

    /// Transmit a packet on the sub-GHz radio.
    pub fn write_radio(&mut self, data: &[u8]) -> Result<()> {
        self.call_ok(&Command::WriteRadio {
            data: data.to_vec(),
        })?;
        Ok(())
    }

    /// Read up to `max_len` bytes received by the radio.
    pub fn read_radio(&mut self, max_len: u16) -> Result<Vec<u8>> {
        self.call_ok(&Command::ReadRadio { max_len })
    }

    /// Write bytes to the board UART.
    pub fn write_uart(&mut self, data: &[u8]) -> Result<()> {
        self.call_ok(&Command::WriteUart {
            data: data.to_vec(),
        })?;
        Ok(())
    }

    /// Load an FPGA bitstream stored on the device; returns the device output.
    pub fn load_fpga(&mut self, name: &str) -> Result<String> {
        let payload = self.call_ok(&Command::LoadFpga {
            name: name.to_string(),
        })?;
        Ok(decode_text_reply(&payload))
    }
}

impl<T: Transport> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("port", &self.labels.port)
            .field("policy", &self.policy)
            .field("next_sequence_id", &self.next_sequence_id)
            .finish()
    }
}
