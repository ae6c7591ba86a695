//! Error taxonomy shared by every stage of a capture session.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while acquiring the interface or capturing from it.
///
/// Acquisition errors (`DeviceNotFound`, `HandshakeTimeout`,
/// `ConfigurationRejected`, `ShmLayout`) abort session startup. `LinkLost`
/// is the only way a running capture session ends.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("serial device {path:?} does not exist")]
    DeviceNotFound { path: PathBuf },

    #[error("serial I/O failure: {source}")]
    Serial {
        #[from]
        source: serialport::Error,
    },

    #[error("I/O failure: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("interface did not acknowledge its configuration within {seconds}s")]
    HandshakeTimeout { seconds: u64 },

    #[error("configuration rejected: {reason}")]
    ConfigurationRejected { reason: String },

    #[error("unable to load configuration from {path:?}: {reason}")]
    Config { path: PathBuf, reason: String },

    /// Job files are named after a `u32` counter that has no next value.
    #[error("job number {last} is the highest possible, no further job can be numbered")]
    JobNumberExhausted { last: u32 },

    #[error("shared status memory unavailable: {source}")]
    ShmLayout {
        #[from]
        source: ShmError,
    },

    /// Hard failure on the serial handle during capture (e.g. the USB
    /// adapter was unplugged). Not retried: somebody has to replug it.
    #[error("link to the interface lost: {source}")]
    LinkLost { source: std::io::Error },
}

/// Errors local to the shared status memory.
#[derive(Error, Debug)]
pub enum ShmError {
    #[error("cannot create or map {path:?}: {source}")]
    Layout {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("logical offset {offset} is outside the {words} word status table")]
    OffsetOutOfRange { offset: usize, words: usize },
}

pub type Result<T> = std::result::Result<T, CaptureError>;
