extern crate libc;
extern crate serialport;

pub mod capture;
pub mod config;
pub mod control_codes;
pub mod converter_sync;
pub mod error;
mod ffi;
pub mod job;
pub mod protocol;
pub mod serial_link;

use tracing::{error, info};

use capture::CaptureSession;
use config::SessionConfig;
use converter_sync::{ConverterSync, JobSlot};
use error::{CaptureError, Result};
use protocol::FirmwareVersion;
use serial_link::LinkTiming;

pub use error::ShmError;

pub enum CaptureNotification {
    /// The interface announced its firmware version during the handshake.
    FirmwareVersion(FirmwareVersion),
    /// A job's page has ended, and its files are complete. The job has been
    /// handed to the converters unless it was passed through to a printer.
    JobCompleted {
        job_number: u32,
        slot: JobSlot,
    },
    /// The serial link went away; the session is over.
    ConnectionClosed,
}

/// Run a capture session on the interface described by `config`, until the
/// serial link is lost.
///
/// Acquisition failures (device missing, handshake rejected or timed out,
/// shared memory unusable, output directories not writable) are returned
/// as errors. Losing the link once capture has started is the normal end of
/// a session: `ConnectionClosed` is sent and `Ok(())` returned. The port and
/// the shared memory mapping are closed in both cases.
// TODO: make LinkTiming configurable once a USB adapter needing longer
// settle times shows up.
pub fn read_interface(
    config: &SessionConfig,
    callback: Option<impl Fn(&CaptureNotification)>,
) -> Result<()> {
    let send_notification = |notification: &CaptureNotification| {
        if let Some(callback) = &callback {
            callback(notification);
        }
    };

    let mut port = serial_link::connect(
        &config.serial_port,
        config.interface_baud_rate,
        &LinkTiming::default(),
    )?;
    if let Some(version) = protocol::configure_interface(&mut port, config)? {
        send_notification(&CaptureNotification::FirmwareVersion(version));
    }

    let converter_sync = ConverterSync::initialize()?;
    job::init_directories(&config.output_path)?;
    let first_job_number = job::next_job_number(&config.output_path)?;

    let mut session = CaptureSession::new(config, port, converter_sync, first_job_number);
    let result = session.run(|job| {
        send_notification(&CaptureNotification::JobCompleted {
            job_number: job.job_number,
            slot: job.slot,
        })
    });
    // Closes the port and unmaps the shared memory.
    drop(session);

    match result {
        Err(CaptureError::LinkLost { source }) => {
            info!("Connection to the interface closed: {source}");
            send_notification(&CaptureNotification::ConnectionClosed);
            Ok(())
        }
        Err(e) => {
            error!("Capture stopped: {e}");
            Err(e)
        }
        Ok(never) => match never {},
    }
}
