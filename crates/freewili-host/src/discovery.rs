//! Finding FreeWili boards among the serial ports of the machine.
//!
//! Every candidate port is opened briefly and asked to identify itself with a
//! single short attempt. Only ports whose answer carries the FreeWili
//! signature are reported. Probe failures are logged and skipped, and every
//! probe transport is closed before the next port is tried.

use std::fmt;

use freewili_metrics::metric_defs;
use freewili_protocol::{AppInfo, ProcessorType};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{DiscoveryConfig, RetryPolicy};
use crate::error::{HostError, Result};
use crate::session::Session;
use crate::transport::{PortEnumerator, PortInfo, Transport};

/// A board found by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    /// 1-based position in the discovery result.
    pub index: usize,
    /// Port the board answered on.
    pub port: PortInfo,
    /// Processor that answered.
    #[serde(serialize_with = "serialize_display")]
    pub processor_type: ProcessorType,
    /// Firmware application version.
    pub app_version: u16,
}

impl DeviceDescriptor {
    /// Identifier to open the transport with.
    pub fn transport_identifier(&self) -> &str {
        &self.port.name
    }

    /// Identification data.
    pub fn app_info(&self) -> AppInfo {
        AppInfo::new(self.processor_type, self.app_version)
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.app_info(), self.port.name)?;
        if let Some(serial) = &self.port.serial_number {
            write!(f, " ({})", serial)?;
        }
        Ok(())
    }
}

fn serialize_display<S: serde::Serializer>(
    value: &ProcessorType,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// Device discovery over a [`PortEnumerator`].
#[derive(Debug)]
pub struct Discovery<E> {
    enumerator: E,
    config: DiscoveryConfig,
    processor: Option<ProcessorType>,
}

impl<E: PortEnumerator> Discovery<E> {
    /// Discover through `enumerator`.
    pub fn new(enumerator: E, config: DiscoveryConfig) -> Self {
        Discovery {
            enumerator,
            config,
            processor: None,
        }
    }

    /// Only report boards whose answering processor is `processor`.
    pub fn with_processor(mut self, processor: ProcessorType) -> Self {
        self.processor = Some(processor);
        self
    }

    /// The enumerator in use.
    pub fn enumerator(&self) -> &E {
        &self.enumerator
    }

    fn passes_usb_filter(&self, port: &PortInfo) -> bool {
        if self.config.usb_filter.is_empty() {
            return true;
        }
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => self
                .config
                .usb_filter
                .iter()
                .any(|id| id.vid == vid && id.pid == pid),
            _ => false,
        }
    }

    fn probe(&self, port: &PortInfo) -> Result<AppInfo> {
        let transport = self.enumerator.open(port)?;
        let mut session = Session::new(transport, RetryPolicy::single(self.config.probe_timeout()));
        // Menu text or a half-sent frame from an earlier connection would
        // otherwise sit in front of the identify reply.
        session.transport_mut().clear_input()?;
        session.identify()
    }

    /// All boards present, in platform port order, indexed from 1.
    ///
    /// Fails only if the ports cannot be enumerated at all.
    pub fn find_all(&self) -> Result<Vec<DeviceDescriptor>> {
        let ports = self.enumerator.available_ports()?;
        let mut devices = Vec::new();

        for port in ports {
            if !self.passes_usb_filter(&port) {
                debug!("Skipping {}: USB id not in filter", port.name);
                continue;
            }
            metrics::counter!(metric_defs::DISCOVERY_PROBES.name).increment(1);
            let app_info = match self.probe(&port) {
                Ok(app_info) => app_info,
                Err(e) => {
                    debug!("Probe of {} failed: {}", port.name, e);
                    continue;
                }
            };
            if self
                .processor
                .is_some_and(|wanted| wanted != app_info.processor_type)
            {
                debug!("Skipping {}: {} processor", port.name, app_info.processor_type);
                continue;
            }
            devices.push(DeviceDescriptor {
                index: devices.len() + 1,
                port,
                processor_type: app_info.processor_type,
                app_version: app_info.version,
            });
        }

        info!("Found {} FreeWili device(s)", devices.len());
        metrics::gauge!(metric_defs::DISCOVERY_DEVICES.name).set(devices.len() as f64);
        Ok(devices)
    }

    /// The board at 1-based `index`.
    pub fn select(&self, index: usize) -> Result<DeviceDescriptor> {
        let devices = self.find_all()?;
        let count = devices.len();
        devices
            .into_iter()
            .find(|device| device.index == index)
            .ok_or_else(|| {
                HostError::DeviceNotFound(format!(
                    "no device at index {} ({} found)",
                    index, count
                ))
            })
    }

    /// Open a session to a discovered board.
    pub fn open(
        &self,
        device: &DeviceDescriptor,
        policy: RetryPolicy,
    ) -> Result<Session<E::Transport>> {
        let transport = self.enumerator.open(&device.port)?;
        Ok(Session::new(transport, policy))
    }
}
