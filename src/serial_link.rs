//! Acquisition of the serial link to the interface.
//!
//! The interface firmware polls for a reserved byte and soft-resets when it
//! sees one, so every session starts from a freshly booted firmware: open,
//! send the reset byte, close, give the firmware time to reboot, reopen, and
//! drop whatever it printed while booting.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort};
use tracing::{error, info, warn};

use crate::error::{CaptureError, Result};

pub const RESET_BYTE: u8 = 0xFF;
/// Blocking timeout of every read on the link. The idle detection of the
/// capture loop counts in multiples of this.
pub const READ_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkTiming {
    /// Time given to the firmware to reboot after a reset.
    pub settle: Duration,
    /// Pause between two acquisition attempts.
    pub retry_pause: Duration,
    pub attempts: u32,
}

impl Default for LinkTiming {
    fn default() -> LinkTiming {
        LinkTiming {
            settle: Duration::from_secs(2),
            retry_pause: Duration::from_secs(1),
            attempts: 5,
        }
    }
}

/// Open the serial device without resetting the interface.
pub fn open(path: &Path, baud_rate: u32) -> Result<Box<dyn SerialPort>> {
    if !path.exists() {
        return Err(CaptureError::DeviceNotFound {
            path: path.to_path_buf(),
        });
    }
    let port = serialport::new(path.to_string_lossy(), baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(READ_TIMEOUT)
        .open()?;
    Ok(port)
}

fn open_and_reset(path: &Path, baud_rate: u32, settle: Duration) -> Result<Box<dyn SerialPort>> {
    {
        let mut port = open(path, baud_rate)?;
        port.write_all(&[RESET_BYTE])?;
        port.flush()?;
        // Dropping the port closes it.
    }
    std::thread::sleep(settle);

    let port = open(path, baud_rate)?;
    port.clear(ClearBuffer::Input)?;
    Ok(port)
}

/// Acquire a freshly reset link, retrying the whole open/reset cycle: USB
/// adapters may take a moment to (re)appear.
pub fn connect(path: &Path, baud_rate: u32, timing: &LinkTiming) -> Result<Box<dyn SerialPort>> {
    let port = retry(timing, path, || open_and_reset(path, baud_rate, timing.settle))?;
    info!("Serial link to {path:?} ready ({baud_rate} baud)");
    Ok(port)
}

/// Run `attempt` up to `timing.attempts` times, pausing in between, and
/// return the last error if none succeeds.
fn retry<T>(timing: &LinkTiming, path: &Path, mut attempt: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match attempt() {
            Ok(value) => return Ok(value),
            Err(e) => {
                error!("Attempt {attempts}/{} to open {path:?} failed: {e}", timing.attempts);
                if attempts >= timing.attempts {
                    warn!("Giving up on {path:?}");
                    return Err(e);
                }
            }
        }
        std::thread::sleep(timing.retry_pause);
    }
}
