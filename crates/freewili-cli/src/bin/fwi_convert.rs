//! `fwi-convert`: turn a PNG or JPEG into the FreeWili `.fwi` image format.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use freewili_host::fwi::convert_image;
use tracing_subscriber::EnvFilter;

/// Convert an image to the FreeWili display format
#[derive(Parser, Debug)]
#[command(name = "fwi-convert", version, about, long_about = None)]
struct Args {
    /// Source image (PNG or JPEG)
    #[arg(short, long)]
    input: PathBuf,

    /// Destination file; defaults to the input with a .fwi extension
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let output = args
        .output
        .unwrap_or_else(|| args.input.with_extension("fwi"));

    match convert_image(&args.input, &output) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
