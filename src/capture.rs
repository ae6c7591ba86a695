//! The capture loop: bounded reads from the interface, control code
//! interpretation, persistence, and idle-timeout job segmentation.
//!
//! Job boundaries are a heuristic: a job ends once the interface has been
//! silent for `end_page_timeout` reads of one second each, after having sent
//! at least one byte. Printers that never pause between pages end up in a
//! single job.

use std::convert::Infallible;
use std::io::{ErrorKind, Read};

use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::control_codes::{interpret_chunk, probe_emulation, ControlCodeState};
use crate::converter_sync::{JobNotifier, JobSlot};
use crate::error::{CaptureError, Result};
use crate::job::{materialize_job_files, JobSink};

/// Largest chunk requested from the port in one read.
pub const CHUNK_SIZE: usize = 8000;

/// Reads chunks from the port, turning `end_page_timeout` consecutive empty
/// reads into "no data".
pub struct ChunkReader<R> {
    port: R,
    end_page_timeout: u32,
    buffer: Vec<u8>,
}

impl<R: Read> ChunkReader<R> {
    pub fn new(port: R, end_page_timeout: u32) -> ChunkReader<R> {
        ChunkReader {
            port,
            end_page_timeout: end_page_timeout.max(1),
            buffer: vec![0; CHUNK_SIZE],
        }
    }

    /// Next non-empty chunk, or None once the port stayed silent for the
    /// whole timeout. Any error other than a read timeout means the link is
    /// gone.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let mut empty_reads = 0;
        while empty_reads < self.end_page_timeout {
            match self.port.read(&mut self.buffer) {
                Ok(0) => empty_reads += 1,
                Ok(n) => return Ok(Some(self.buffer[..n].to_vec())),
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    empty_reads += 1
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => (),
                Err(e) => return Err(CaptureError::LinkLost { source: e }),
            }
        }
        Ok(None)
    }

    pub fn get_ref(&self) -> &R {
        &self.port
    }

    pub fn into_inner(self) -> R {
        self.port
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompletedJob {
    pub job_number: u32,
    pub slot: JobSlot,
}

/// State of a capture run over one serial link.
///
/// The control code state belongs to the capture session: it is reset for
/// every job in job-delimited modes, and lives as long as the run in
/// streaming modes (where a single job never ends).
pub struct CaptureSession<'a, R, N> {
    config: &'a SessionConfig,
    reader: ChunkReader<R>,
    notifier: N,
    state: ControlCodeState,
    job_number: u32,
    slot: JobSlot,
}

impl<'a, R: Read, N: JobNotifier> CaptureSession<'a, R, N> {
    pub fn new(
        config: &'a SessionConfig,
        port: R,
        notifier: N,
        first_job_number: u32,
    ) -> CaptureSession<'a, R, N> {
        CaptureSession {
            config,
            reader: ChunkReader::new(port, config.end_page_timeout),
            notifier,
            state: ControlCodeState::new(),
            job_number: first_job_number,
            slot: JobSlot::default(),
        }
    }

    pub fn job_number(&self) -> u32 {
        self.job_number
    }

    pub fn slot(&self) -> JobSlot {
        self.slot
    }

    pub fn control_codes(&self) -> &ControlCodeState {
        &self.state
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Release the port and the notifier (closing them if they are owned).
    pub fn into_parts(self) -> (R, N) {
        (self.reader.into_inner(), self.notifier)
    }

    /// Capture the current job until its page ends, and return its number.
    /// In streaming modes this only returns with an error.
    pub fn capture_job(&mut self) -> Result<u32> {
        let streaming = self.config.is_streaming();
        self.state.reset();
        let mut sink = JobSink::create(self.config, self.job_number)?;
        let mut received_bytes = false;

        loop {
            let Some(mut chunk) = self.reader.next_chunk()? else {
                if received_bytes && !streaming {
                    info!("End of page timeout, job {} complete", self.job_number);
                    sink.close()?;
                    return Ok(self.job_number);
                }
                if received_bytes {
                    // Streams stay open: make what we have visible and wait
                    // for more.
                    sink.flush()?;
                    received_bytes = false;
                }
                debug!("Waiting data...");
                continue;
            };

            if !received_bytes {
                probe_emulation(&chunk);
            }
            received_bytes = true;
            debug!("Received {} bytes", chunk.len());

            if self.config.interprets_control_codes() {
                interpret_chunk(&mut self.state, &mut chunk);
            }
            sink.write_chunk(&chunk)?;

            if self.config.syncs_every_chunk() {
                sink.flush()?;
                self.notifier.notify_job_ready(self.slot, self.job_number)?;
            }
        }
    }

    /// Post-job actions for a job whose page has ended, then move on to the
    /// next job number and slot.
    pub fn finish_job(&mut self, job_number: u32) -> Result<CompletedJob> {
        materialize_job_files(self.config, job_number)?;
        let completed = CompletedJob {
            job_number,
            slot: self.slot,
        };
        // Pass-through jobs are printed by the real printer, there is nothing
        // to convert.
        if self.config.usb_passthrough.is_none() {
            self.notifier.notify_job_ready(self.slot, job_number)?;
        }
        self.slot = self.slot.next();
        self.job_number = job_number
            .checked_add(1)
            .ok_or(CaptureError::JobNumberExhausted { last: job_number })?;
        Ok(completed)
    }

    /// Capture jobs until the link fails.
    pub fn run(&mut self, mut on_job_completed: impl FnMut(&CompletedJob)) -> Result<Infallible> {
        info!("Capture started at job {}", self.job_number);
        loop {
            let job_number = self.capture_job()?;
            let completed = self.finish_job(job_number)?;
            on_job_completed(&completed);
        }
    }
}
