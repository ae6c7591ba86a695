use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc;
use std::thread;

use clap::Parser;
use tracing::{debug, error, info, Level};
use tracing_subscriber::EnvFilter;

use libreprinter::config::SessionConfig;
use libreprinter::error::CaptureError;
use libreprinter::{read_interface, CaptureNotification};

#[derive(Parser, Debug)]
#[command(name = "libreprinter-capture")]
#[command(version)]
#[command(about = "Captures print jobs from the libreprinter parallel/serial interface")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "/etc/libreprinter/config.toml")]
    config: PathBuf,

    /// Serial device of the interface, overriding the configuration file
    #[arg(short, long)]
    serial_port: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

enum Exit {
    Interrupted,
    SessionEnded(Result<(), CaptureError>),
}

fn setup_tracing(args: &Args) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    setup_tracing(&args);
    info!("libreprinter capture (v{})", env!("CARGO_PKG_VERSION"));

    let mut config = match SessionConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(serial_port) = args.serial_port {
        config.serial_port = serial_port;
    }
    debug!("Session configuration: {config:?}");

    let (tx_exit, rx_exit) = mpsc::channel();
    let tx_request_exit = tx_exit.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = tx_request_exit.send(Exit::Interrupted);
    }) {
        error!("Unable to install the Ctrl-C handler: {e}");
        return ExitCode::FAILURE;
    }

    // The capture loop blocks on the serial port: it runs on its own thread
    // so that Ctrl-C can end the process at any time.
    let _capture_thread = thread::spawn(move || {
        let callback = |notification: &CaptureNotification| match notification {
            CaptureNotification::FirmwareVersion(version) => {
                info!("Interface firmware version {version}");
            }
            CaptureNotification::JobCompleted { job_number, slot } => {
                let date_time = time::OffsetDateTime::now_utc();
                let format = time::macros::format_description!(
                    version = 2,
                    "[year]-[month]-[day]T[hour]:[minute]:[second]"
                );
                let formatted_date_time = date_time.format(&format).unwrap_or_default();
                println!("{},{},{}", formatted_date_time, job_number, slot.offset());
            }
            CaptureNotification::ConnectionClosed => {
                info!("Interface disconnected");
            }
        };
        let result = read_interface(&config, Some(callback));
        let _ = tx_exit.send(Exit::SessionEnded(result));
    });

    match rx_exit.recv() {
        Ok(Exit::Interrupted) => {
            info!("Interrupted, exiting");
            ExitCode::SUCCESS
        }
        Ok(Exit::SessionEnded(Ok(()))) => ExitCode::SUCCESS,
        Ok(Exit::SessionEnded(Err(e))) => {
            error!("{e}");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("Capture thread vanished: {e}");
            ExitCode::FAILURE
        }
    }
}
