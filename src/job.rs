//! Per-job storage: raw capture files, optional pass-through device, optional
//! plain-text mirror, and the files materialised once a job is complete.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::{LineEnding, SessionConfig};
use crate::error::{CaptureError, Result};

/// Output categories. Each one is a directory under the output path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputKind {
    Raw,
    Pcl,
    TextStream,
    TextJobs,
}

pub const OUTPUT_KINDS: [OutputKind; 4] = [
    OutputKind::Raw,
    OutputKind::Pcl,
    OutputKind::TextStream,
    OutputKind::TextJobs,
];

/// Extensions that count when looking for previous jobs.
const JOB_EXTENSIONS: [&str; 3] = ["raw", "pcl", "txt"];

impl OutputKind {
    pub fn directory(&self) -> &'static str {
        match self {
            OutputKind::Raw => "raw",
            OutputKind::Pcl => "pcl",
            OutputKind::TextStream => "txt_stream",
            OutputKind::TextJobs => "txt_jobs",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputKind::Raw => "raw",
            OutputKind::Pcl => "pcl",
            OutputKind::TextStream | OutputKind::TextJobs => "txt",
        }
    }

    pub fn path(&self, output_path: &Path, job_number: u32) -> PathBuf {
        output_path
            .join(self.directory())
            .join(format!("{job_number}.{}", self.extension()))
    }
}

/// Create the output directories (no-op for the ones that already exist).
pub fn init_directories(output_path: &Path) -> Result<()> {
    for kind in OUTPUT_KINDS {
        std::fs::create_dir_all(output_path.join(kind.directory()))?;
    }
    Ok(())
}

/// Number of the next job: one more than the highest numbered non-empty
/// capture file found in the output directories, or 1.
pub fn next_job_number(output_path: &Path) -> Result<u32> {
    let mut highest = 0;
    for kind in OUTPUT_KINDS {
        let entries = match std::fs::read_dir(output_path.join(kind.directory())) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let path = entry?.path();
            let Some(number) = job_number_of(&path) else {
                continue;
            };
            let metadata = std::fs::metadata(&path)?;
            if metadata.is_file() && metadata.len() > 0 {
                highest = highest.max(number);
            }
        }
    }
    highest
        .checked_add(1)
        .ok_or(CaptureError::JobNumberExhausted { last: highest })
}

fn job_number_of(path: &Path) -> Option<u32> {
    let extension = path.extension()?.to_str()?;
    if !JOB_EXTENSIONS.contains(&extension) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// Rewrite line endings to `target`: LF becomes CRLF for Windows, CRLF
/// becomes LF for Unix. Other bytes are left alone.
pub fn convert_line_ending(data: &[u8], target: LineEnding) -> Vec<u8> {
    let (from, to): (&[u8], &[u8]) = match target {
        LineEnding::Windows => (b"\n", b"\r\n"),
        LineEnding::Unix => (b"\r\n", b"\n"),
    };
    let mut out = Vec::with_capacity(data.len() + data.len() / 16);
    let mut rest = data;
    while !rest.is_empty() {
        if rest.starts_with(from) {
            out.extend_from_slice(to);
            rest = &rest[from.len()..];
        } else {
            out.push(rest[0]);
            rest = &rest[1..];
        }
    }
    out
}

pub fn convert_file_line_ending(
    source: &Path,
    destination: &Path,
    target: LineEnding,
) -> Result<()> {
    let data = std::fs::read(source)?;
    std::fs::write(destination, convert_line_ending(&data, target))?;
    Ok(())
}

/// Writable handles of the job being captured. Dropping the sink closes them.
pub struct JobSink {
    job_number: u32,
    raw: File,
    passthrough: Option<File>,
    plain_stream: Option<(File, LineEnding)>,
}

impl JobSink {
    pub fn create(config: &SessionConfig, job_number: u32) -> Result<JobSink> {
        let raw_path = OutputKind::Raw.path(&config.output_path, job_number);
        let raw = File::create(&raw_path)?;
        debug!("Capturing job {job_number} into {raw_path:?}");

        let passthrough = match &config.usb_passthrough {
            Some(device) => Some(OpenOptions::new().write(true).open(device)?),
            None => None,
        };

        let plain_stream = if config.writes_plain_stream() {
            let path = OutputKind::TextStream.path(&config.output_path, job_number);
            Some((File::create(path)?, config.line_ending))
        } else {
            None
        };

        Ok(JobSink {
            job_number,
            raw,
            passthrough,
            plain_stream,
        })
    }

    pub fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.raw.write_all(chunk)?;
        if let Some(device) = &mut self.passthrough {
            device.write_all(chunk)?;
        }
        if let Some((stream, line_ending)) = &mut self.plain_stream {
            stream.write_all(&convert_line_ending(chunk, *line_ending))?;
        }
        Ok(())
    }

    /// Push buffered data to the files so converters can read it, keeping
    /// them open.
    pub fn flush(&mut self) -> Result<()> {
        self.raw.flush()?;
        self.raw.sync_data()?;
        if let Some(device) = &mut self.passthrough {
            device.flush()?;
        }
        if let Some((stream, _)) = &mut self.plain_stream {
            stream.flush()?;
        }
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        info!("Job {} closed", self.job_number);
        Ok(())
    }
}

/// Files derived from a complete raw capture: a PCL copy for the HP
/// converters, and a line-ending converted copy for plain-text jobs.
pub fn materialize_job_files(config: &SessionConfig, job_number: u32) -> Result<()> {
    let raw_path = OutputKind::Raw.path(&config.output_path, job_number);
    if config.copies_pcl() {
        let pcl_path = OutputKind::Pcl.path(&config.output_path, job_number);
        std::fs::copy(&raw_path, &pcl_path)?;
        debug!("Copied {raw_path:?} to {pcl_path:?}");
    }
    if config.writes_text_jobs() {
        let text_path = OutputKind::TextJobs.path(&config.output_path, job_number);
        convert_file_line_ending(&raw_path, &text_path, config.line_ending)?;
        debug!("Converted {raw_path:?} to {text_path:?}");
    }
    Ok(())
}
