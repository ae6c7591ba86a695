use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use libreprinter::converter_sync::{ConverterSync, JOB_SLOTS, SHARED_MEM_PATH};

/// Dumps the shared status memory used to hand jobs over to converters.
#[derive(Parser, Debug)]
#[command(name = "shm-status")]
#[command(version)]
struct Args {
    /// Path of the shared memory segment
    #[arg(short, long, default_value = SHARED_MEM_PATH)]
    path: PathBuf,

    /// Also list the job slots holding a value
    #[arg(long)]
    slots: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    eprintln!("libreprinter shm-status (v{})", env!("CARGO_PKG_VERSION"));

    let sync = match ConverterSync::initialize_at(&args.path) {
        Ok(sync) => sync,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let snapshot = sync.snapshot();
    println!(
        "200 (LED control): {:>3}  {}",
        snapshot.arbitration,
        snapshot.describe_arbitration()
    );
    println!(
        "201 (converters):  {:>3}  {}",
        snapshot.converter_state,
        snapshot.describe_converter_state()
    );
    println!(
        "202 (data):        {:>3}  {}",
        snapshot.data_ready,
        snapshot.describe_data_ready()
    );

    if args.slots {
        for offset in 0..usize::from(JOB_SLOTS) {
            match sync.read_slot(offset) {
                Ok(0) => (),
                Ok(value) => println!("slot {offset:>3}: job {}", value.unsigned_abs()),
                Err(e) => {
                    eprintln!("{e}");
                    return ExitCode::FAILURE;
                }
            }
        }
    }
    ExitCode::SUCCESS
}
