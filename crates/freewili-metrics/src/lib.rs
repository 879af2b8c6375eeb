//! Metrics declarations for the FreeWili host driver.
//!
//! This crate describes every metric the driver records. It re-exports the
//! `metrics` crate and defines all metrics as structured [`Metric`] constants
//! so names are never typed twice. Nothing is exported unless the embedding
//! application installs a recorder.
//!
//! # Example
//!
//! ```rust
//! use freewili_metrics::{metric_defs, PortLabels};
//!
//! let labels = PortLabels::new("/dev/ttyACM0");
//! metrics::counter!(metric_defs::SESSION_FRAMES_TX.name, &labels.to_labels()).increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// The kind of metric (counter, gauge, or histogram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A gauge that can go up and down.
    Gauge,
    /// A histogram for recording distributions.
    Histogram,
}

impl MetricKind {
    /// Returns the kind as a lowercase string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric declaration with its metadata.
///
/// ```rust
/// use freewili_metrics::{Metric, MetricKind};
/// use metrics::Unit;
///
/// const RETRIES: Metric = Metric::counter("freewili.session.retries")
///     .with_description("Command frames resent after a timeout")
///     .with_unit(Unit::Count)
///     .with_labels(&["port"]);
///
/// assert_eq!(RETRIES.kind, MetricKind::Counter);
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g., "freewili.session.frames_tx").
    pub name: &'static str,
    /// The kind of metric.
    pub kind: MetricKind,
    /// Human-readable description.
    pub description: &'static str,
    /// Unit of measurement, if any.
    pub unit: Option<Unit>,
    /// Expected label keys.
    pub labels: &'static [&'static str],
}

impl Metric {
    const fn with_kind(name: &'static str, kind: MetricKind) -> Self {
        Self {
            name,
            kind,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Creates a new counter metric with the given name.
    pub const fn counter(name: &'static str) -> Self {
        Self::with_kind(name, MetricKind::Counter)
    }

    /// Creates a new gauge metric with the given name.
    pub const fn gauge(name: &'static str) -> Self {
        Self::with_kind(name, MetricKind::Gauge)
    }

    /// Creates a new histogram metric with the given name.
    pub const fn histogram(name: &'static str) -> Self {
        Self::with_kind(name, MetricKind::Histogram)
    }

    /// Sets the description for the metric.
    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Sets the unit for the metric.
    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Sets the expected label keys for the metric.
    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Registers this metric's description with the installed recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => {
                describe_counter!(self.name, unit, self.description);
            }
            (MetricKind::Counter, None) => {
                describe_counter!(self.name, self.description);
            }
            (MetricKind::Gauge, Some(unit)) => {
                describe_gauge!(self.name, unit, self.description);
            }
            (MetricKind::Gauge, None) => {
                describe_gauge!(self.name, self.description);
            }
            (MetricKind::Histogram, Some(unit)) => {
                describe_histogram!(self.name, unit, self.description);
            }
            (MetricKind::Histogram, None) => {
                describe_histogram!(self.name, self.description);
            }
        }
    }
}

/// All metric definitions for the driver.
pub mod metric_defs {
    use super::{Metric, Unit};

    /// Labels present on all port-scoped metrics.
    pub const PORT_LABELS: &[&str] = &["port"];

    /// Labels on per-command metrics.
    pub const COMMAND_LABELS: &[&str] = &["port", "opcode"];

    // ========================================================================
    // Session
    // ========================================================================

    /// Command frames written, retries included.
    pub const SESSION_FRAMES_TX: Metric = Metric::counter("freewili.session.frames_tx")
        .with_description("Command frames written to the transport, retries included")
        .with_unit(Unit::Count)
        .with_labels(COMMAND_LABELS);

    /// Valid frames decoded from the transport.
    pub const SESSION_FRAMES_RX: Metric = Metric::counter("freewili.session.frames_rx")
        .with_description("Valid frames decoded from the transport")
        .with_unit(Unit::Count)
        .with_labels(PORT_LABELS);

    /// Command frames resent after a timeout.
    pub const SESSION_RETRIES: Metric = Metric::counter("freewili.session.retries")
        .with_description("Command frames resent after a response timeout")
        .with_unit(Unit::Count)
        .with_labels(COMMAND_LABELS);

    /// Calls that exhausted their retry budget.
    pub const SESSION_TIMEOUTS: Metric = Metric::counter("freewili.session.timeouts")
        .with_description("Calls that exhausted their retry budget")
        .with_unit(Unit::Count)
        .with_labels(COMMAND_LABELS);

    /// Corrupt frame events that forced resynchronization.
    pub const SESSION_RESYNCS: Metric = Metric::counter("freewili.session.resyncs")
        .with_description("Corrupt frame events that forced stream resynchronization")
        .with_unit(Unit::Count)
        .with_labels(PORT_LABELS);

    /// Notifications dispatched out of band.
    pub const SESSION_NOTIFICATIONS: Metric = Metric::counter("freewili.session.notifications")
        .with_description("Unsolicited notifications dispatched to the handler")
        .with_unit(Unit::Count)
        .with_labels(PORT_LABELS);

    /// Round trip time of successful calls.
    pub const SESSION_CALL_LATENCY: Metric = Metric::histogram("freewili.session.call_latency_ms")
        .with_description("Time from first write to matching response")
        .with_unit(Unit::Milliseconds)
        .with_labels(COMMAND_LABELS);

    // ========================================================================
    // File transfer
    // ========================================================================

    /// File payload bytes acknowledged, both directions.
    pub const TRANSFER_BYTES: Metric = Metric::counter("freewili.transfer.bytes")
        .with_description("File payload bytes acknowledged by the receiving side")
        .with_unit(Unit::Bytes)
        .with_labels(&["port", "direction"]);

    /// Chunks resent after a timeout.
    pub const TRANSFER_CHUNK_RETRIES: Metric = Metric::counter("freewili.transfer.chunk_retries")
        .with_description("File chunks resent after a timeout")
        .with_unit(Unit::Count)
        .with_labels(&["port", "direction"]);

    /// Transfers that ended aborted.
    pub const TRANSFER_ABORTED: Metric = Metric::counter("freewili.transfer.aborted")
        .with_description("File transfers that ended in the aborted state")
        .with_unit(Unit::Count)
        .with_labels(&["port", "direction"]);

    // ========================================================================
    // Discovery
    // ========================================================================

    /// Ports probed during discovery.
    pub const DISCOVERY_PROBES: Metric = Metric::counter("freewili.discovery.probes")
        .with_description("Serial ports probed with an identification exchange")
        .with_unit(Unit::Count);

    /// Devices found by the last discovery pass.
    pub const DISCOVERY_DEVICES: Metric = Metric::gauge("freewili.discovery.devices")
        .with_description("Devices identified by the most recent discovery pass")
        .with_unit(Unit::Count);

    /// All metrics, for bulk description.
    pub const ALL: &[&Metric] = &[
        &SESSION_FRAMES_TX,
        &SESSION_FRAMES_RX,
        &SESSION_RETRIES,
        &SESSION_TIMEOUTS,
        &SESSION_RESYNCS,
        &SESSION_NOTIFICATIONS,
        &SESSION_CALL_LATENCY,
        &TRANSFER_BYTES,
        &TRANSFER_CHUNK_RETRIES,
        &TRANSFER_ABORTED,
        &DISCOVERY_PROBES,
        &DISCOVERY_DEVICES,
    ];
}

/// Labels identifying the serial port a metric belongs to.
#[derive(Debug, Clone)]
pub struct PortLabels {
    /// Port name, e.g. `/dev/ttyACM0` or `COM3`.
    pub port: String,
}

impl PortLabels {
    /// Create labels for a port.
    pub fn new(port: impl Into<String>) -> Self {
        Self { port: port.into() }
    }

    /// Converts the labels to the metrics crate label format.
    pub fn to_labels(&self) -> Vec<(&'static str, String)> {
        vec![("port", self.port.clone())]
    }

    /// Labels for a per-command metric.
    pub fn with_opcode(&self, opcode: u8) -> Vec<(&'static str, String)> {
        self.with(&[("opcode", format!("0x{:02X}", opcode))])
    }

    /// Returns labels with additional key-value pairs.
    pub fn with(&self, extra: &[(&'static str, String)]) -> Vec<(&'static str, String)> {
        let mut labels = self.to_labels();
        labels.extend_from_slice(extra);
        labels
    }
}

/// Describes all metrics used by the driver.
///
/// Call once at startup, after installing a recorder. The `freewili` binary
/// calls it; applications embedding the host crate call it themselves.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}
