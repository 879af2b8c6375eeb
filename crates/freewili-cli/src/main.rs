//! `freewili`: command line access to FreeWili boards.
//!
//! Actions run in a fixed order within one invocation (list, send, get, run,
//! set IO, poll I2C, bootloader reset), so a script sent with `--send-file`
//! can be started by a bare `--run-script` in the same call.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{ArgAction, Parser};
use freewili_host::context::basename;
use freewili_host::{
    reset_to_uf2_bootloader, CancelToken, DeviceDescriptor, Discovery, FileTransfer, HostConfig,
    HostError, ScriptContext, SerialPortEnumerator,
};
use thiserror::Error;
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Talk to FreeWili boards over USB serial
#[derive(Parser, Debug)]
#[command(name = "freewili", version, about, long_about = None)]
struct Args {
    /// List discovered devices
    #[arg(short, long)]
    list: bool,

    /// Print the device list as JSON
    #[arg(long, requires = "list")]
    json: bool,

    /// Device to use, as numbered by --list
    #[arg(short, long, default_value_t = 1)]
    index: usize,

    /// Send a local file to the device
    #[arg(short, long, value_name = "SRC")]
    send_file: Option<PathBuf>,

    /// Device-side name for --send-file, and the default script for --run-script
    #[arg(short, long, value_name = "NAME")]
    file_name: Option<String>,

    /// Fetch a device file into a local file
    #[arg(short, long, num_args = 2, value_names = ["SRC", "DEST"])]
    get_file: Option<Vec<String>>,

    /// Run a script; without NAME runs --file-name or the file just sent
    #[arg(short, long, value_name = "NAME", num_args = 0..=1, default_missing_value = "")]
    run_script: Option<String>,

    /// Drive an IO pin: PIN high|low
    #[arg(long, num_args = 2, value_names = ["PIN", "LEVEL"])]
    set_io: Option<Vec<String>>,

    /// Poll the I2C bus and print pending data
    #[arg(long)]
    poll_i2c: bool,

    /// Reboot the device into its UF2 bootloader
    #[arg(long)]
    reset_bootloader: bool,

    /// YAML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// More output (-v info, -vv debug, -vvv trace); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn needs_device(&self) -> bool {
        self.send_file.is_some()
            || self.get_file.is_some()
            || self.run_script.is_some()
            || self.set_io.is_some()
            || self.poll_i2c
            || self.reset_bootloader
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Host(#[from] HostError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            CliError::Host(HostError::DeviceNotFound(_)) => 2,
            CliError::Host(HostError::Timeout { .. }) => 3,
            CliError::Host(HostError::Protocol(_) | HostError::CorruptStream { .. }) => 4,
            CliError::Host(HostError::TransferAborted { .. }) => 5,
            _ => 1,
        }
    }
}

/// Ctrl-C handling: cancel a running transfer, otherwise exit.
#[derive(Debug, Clone, Default)]
struct Interrupt {
    cancel: CancelToken,
    in_transfer: Arc<AtomicBool>,
}

impl Interrupt {
    fn install(&self) {
        let interrupt = self.clone();
        let result = ctrlc::set_handler(move || {
            if !interrupt.interrupt() {
                std::process::exit(130);
            }
        });
        if let Err(e) = result {
            warn!("Could not install Ctrl-C handler: {}", e);
        }
    }

    /// Returns true when a transfer was running and has been told to stop.
    fn interrupt(&self) -> bool {
        if self.in_transfer.load(Ordering::SeqCst) {
            warn!("Interrupted, cancelling transfer");
            self.cancel.cancel();
            true
        } else {
            false
        }
    }

    /// Run `transfer` with Ctrl-C routed to its cancel token.
    fn transfer<R>(&self, transfer: impl FnOnce(CancelToken) -> R) -> R {
        self.in_transfer.store(true, Ordering::SeqCst);
        let result = transfer(self.cancel.clone());
        self.in_transfer.store(false, Ordering::SeqCst);
        result
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn parse_level(level: &str) -> Result<bool, HostError> {
    match level.to_ascii_lowercase().as_str() {
        "high" | "on" | "1" => Ok(true),
        "low" | "off" | "0" => Ok(false),
        other => Err(HostError::InvalidArgument(format!(
            "IO level must be high or low, got '{}'",
            other
        ))),
    }
}

fn parse_pin(pin: &str) -> Result<u8, HostError> {
    pin.parse()
        .map_err(|_| HostError::InvalidArgument(format!("'{}' is not a pin number", pin)))
}

fn print_devices(devices: &[DeviceDescriptor], json: bool) -> Result<(), CliError> {
    if json {
        println!("{}", serde_json::to_string_pretty(devices)?);
        return Ok(());
    }
    if devices.is_empty() {
        println!("No FreeWili devices found");
    }
    for device in devices {
        println!("{}. {}", device.index, device);
    }
    Ok(())
}

fn run(args: Args) -> Result<(), CliError> {
    let config = match &args.config {
        Some(path) => HostConfig::from_yaml_file(path)?,
        None => HostConfig::default(),
    };
    let discovery = Discovery::new(
        SerialPortEnumerator::new(config.serial.baud_rate),
        config.discovery.clone(),
    );

    if args.list {
        let devices = discovery.find_all()?;
        print_devices(&devices, args.json)?;
    }
    if !args.needs_device() {
        return Ok(());
    }

    let device = discovery.select(args.index)?;
    info!("Using {}", device);

    let interrupt = Interrupt::default();
    interrupt.install();

    let mut session = discovery.open(&device, config.session.retry_policy())?;
    let mut context = match &args.file_name {
        Some(name) => ScriptContext::new().with_file_name(name.clone()),
        None => ScriptContext::new(),
    };

    if let Some(src) = &args.send_file {
        let data = std::fs::read(src)?;
        let target = match &args.file_name {
            Some(name) => name.clone(),
            None => format!("/scripts/{}", basename(&src.to_string_lossy())),
        };
        let report = interrupt.transfer(|cancel| {
            FileTransfer::new(&config.transfer)
                .with_cancel(cancel)
                .with_progress(|done, total| debug!("{}/{} bytes", done, total))
                .send(&mut session, &data, &target)
        })?;
        context.record_sent(basename(&target));
        println!(
            "Sent {} ({} bytes, {} chunks, {} retries)",
            report.name, report.total_length, report.chunks, report.chunk_retries
        );
    }

    if let Some([src, dest]) = args.get_file.as_deref() {
        let (data, report) = interrupt.transfer(|cancel| {
            FileTransfer::new(&config.transfer)
                .with_cancel(cancel)
                .with_progress(|done, total| debug!("{}/{} bytes", done, total))
                .get(&mut session, src)
        })?;
        std::fs::write(dest, &data)?;
        println!("Saved {} to {} ({} bytes)", report.name, dest, report.total_length);
    }

    if let Some(name) = &args.run_script {
        let output = session.run_script(Some(name.as_str()), &context)?;
        println!("{}", output);
    }

    if let Some([pin, level]) = args.set_io.as_deref() {
        let pin = parse_pin(pin)?;
        let high = parse_level(level)?;
        session.set_io(pin, high)?;
        println!("IO {} set {}", pin, if high { "high" } else { "low" });
    }

    if args.poll_i2c {
        let data = session.poll_i2c()?;
        if data.is_empty() {
            println!("No I2C data pending");
        } else {
            println!("{}", hex::encode(&data));
        }
    }

    if args.reset_bootloader {
        drop(session);
        reset_to_uf2_bootloader(device.transport_identifier())?;
        println!("{} reset into the UF2 bootloader", device.transport_identifier());
    }

    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);
    freewili_metrics::describe_metrics();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
