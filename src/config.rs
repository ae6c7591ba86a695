//! Session configuration: the immutable record consumed by a capture session,
//! and its resolution from a TOML config file.
//!
//! Every key is optional. Missing or unusable values are replaced by the
//! documented default (with a warning), so a config file containing nothing
//! but empty tables is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{CaptureError, Result};

pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyAMA0";
/// Link speed between the host and the interface itself (not the speed of
/// the emulated serial printer port).
pub const DEFAULT_INTERFACE_BAUD_RATE: u32 = 115_200;
pub const DEFAULT_END_PAGE_TIMEOUT: u32 = 4;
/// Below this many idle seconds the interface doesn't get a chance to flush
/// its own buffer, and jobs get cut in half.
pub const MIN_END_PAGE_TIMEOUT: u32 = 1;
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SERIAL_PRINTER_BAUD_RATE: u32 = 19_200;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Emulation {
    Epson,
    Hp,
    Text,
    Hpgl,
    Postscript,
    Seiko,
    Auto,
}

impl Emulation {
    fn resolve(value: Option<&str>) -> Emulation {
        match value {
            Some("epson" | "escp2") => Emulation::Epson,
            Some("hp" | "pcl") => Emulation::Hp,
            Some("text") => Emulation::Text,
            Some("hpgl") => Emulation::Hpgl,
            Some("postscript") => Emulation::Postscript,
            Some("seiko") => Emulation::Seiko,
            Some("auto") | None => Emulation::Auto,
            Some(other) => {
                warn!("Unknown emulation {other:?}, falling back to auto");
                Emulation::Auto
            }
        }
    }
}

/// The `endlesstext` output mode: whether a plain-text mirror is produced,
/// and whether output is cut into jobs or captured as one continuous stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndlessText {
    No,
    PlainStream,
    StripEscp2Stream,
    PlainJobs,
    StripEscp2Jobs,
}

impl EndlessText {
    fn resolve(value: Option<&str>) -> EndlessText {
        match value {
            Some("plain-stream") => EndlessText::PlainStream,
            Some("strip-escp2-stream") => EndlessText::StripEscp2Stream,
            Some("plain-jobs") => EndlessText::PlainJobs,
            Some("strip-escp2-jobs") => EndlessText::StripEscp2Jobs,
            Some("no") | None => EndlessText::No,
            Some(other) => {
                warn!("Unknown endlesstext mode {other:?}, disabling endless text");
                EndlessText::No
            }
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, EndlessText::PlainStream | EndlessText::StripEscp2Stream)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineEnding {
    Unix,
    Windows,
}

impl LineEnding {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            LineEnding::Unix => b"\n",
            LineEnding::Windows => b"\r\n",
        }
    }
}

/// `serial_printer.enabled`: whether the interface listens on its serial
/// printer port, its parallel port, or (unsupported) both.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SerialPrinterMode {
    Disabled,
    Exclusive,
    Auto,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DtrLogic {
    /// Printer is ready when DSR is asserted (space, high level).
    High,
    /// Printer is ready when DSR is deasserted (mark, low level), e.g. CP2102.
    Low,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowControl {
    None,
    Hardware,
    Software,
    Both,
}

impl FlowControl {
    /// Code understood by the firmware, None when no line must be sent.
    pub fn wire_code(&self) -> Option<u8> {
        match self {
            FlowControl::None => None,
            FlowControl::Hardware => Some(1),
            FlowControl::Software => Some(2),
            FlowControl::Both => Some(3),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerialPrinterConfig {
    pub mode: SerialPrinterMode,
    pub dtr_logic: DtrLogic,
    pub baud_rate: u32,
    pub flow_control: FlowControl,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    pub serial_port: PathBuf,
    pub interface_baud_rate: u32,
    pub emulation: Emulation,
    pub endlesstext: EndlessText,
    /// Consecutive empty 1s reads before the end of a page is assumed.
    pub end_page_timeout: u32,
    pub handshake_timeout: Duration,
    pub line_ending: LineEnding,
    pub usb_passthrough: Option<PathBuf>,
    pub output_path: PathBuf,
    /// Inter-character delay of the parallel port, sent as-is to the firmware.
    pub delay_printer: u32,
    pub serial_printer: SerialPrinterConfig,
}

impl SessionConfig {
    pub fn load(path: &Path) -> Result<SessionConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| CaptureError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        SessionConfig::from_toml(&content).map_err(|e| match e {
            CaptureError::Config { reason, .. } => CaptureError::Config {
                path: path.to_path_buf(),
                reason,
            },
            e => e,
        })
    }

    pub fn from_toml(content: &str) -> Result<SessionConfig> {
        let raw: RawConfig = toml::from_str(content).map_err(|e| CaptureError::Config {
            path: PathBuf::new(),
            reason: e.to_string(),
        })?;
        let config = raw.resolve();
        debug!("Resolved session configuration: {config:?}");
        Ok(config)
    }

    /// Only the Epson emulation tracks escape sequences in the byte stream.
    pub fn interprets_control_codes(&self) -> bool {
        self.emulation == Emulation::Epson
    }

    /// Streaming sessions never end on idle: a single capture session (and
    /// a single set of sinks) spans the whole run.
    pub fn is_streaming(&self) -> bool {
        self.interprets_control_codes() && self.endlesstext.is_stream()
    }

    pub fn writes_plain_stream(&self) -> bool {
        self.is_streaming() && self.endlesstext == EndlessText::PlainStream
    }

    /// The external ESC/P2 stripper reads the growing raw file, and needs a
    /// notification after every chunk.
    pub fn syncs_every_chunk(&self) -> bool {
        self.is_streaming() && self.endlesstext == EndlessText::StripEscp2Stream
    }

    pub fn writes_text_jobs(&self) -> bool {
        matches!(self.emulation, Emulation::Epson | Emulation::Text)
            && self.endlesstext == EndlessText::PlainJobs
    }

    pub fn copies_pcl(&self) -> bool {
        self.emulation == Emulation::Hp
    }
}

impl Default for SessionConfig {
    fn default() -> SessionConfig {
        RawConfig::default().resolve()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    misc: RawMisc,
    parallel_printer: RawParallelPrinter,
    serial_printer: RawSerialPrinter,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawMisc {
    serial_port: Option<String>,
    interface_baudrate: Option<i64>,
    emulation: Option<String>,
    endlesstext: Option<String>,
    end_page_timeout: Option<i64>,
    handshake_timeout: Option<i64>,
    line_ending: Option<String>,
    usb_passthrough: Option<String>,
    output_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawParallelPrinter {
    delayprinter: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSerialPrinter {
    enabled: Option<String>,
    dtr_logic: Option<String>,
    baudrate: Option<i64>,
    flow_control: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn positive_u32(name: &str, value: Option<i64>, minimum: u32, default: u32) -> u32 {
    match value {
        None => default,
        Some(n) => match u32::try_from(n) {
            Ok(n) if n >= minimum => n,
            _ => {
                warn!("{name} = {n} is not allowed (minimum {minimum}), using {default}");
                default
            }
        },
    }
}

impl RawConfig {
    fn resolve(self) -> SessionConfig {
        let misc = self.misc;

        let usb_passthrough = match non_empty(&misc.usb_passthrough) {
            None | Some("no") => None,
            Some(path) => Some(PathBuf::from(path)),
        };

        let output_path = match non_empty(&misc.output_path) {
            Some(path) => PathBuf::from(path),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        };

        let line_ending = match non_empty(&misc.line_ending) {
            Some("windows") => LineEnding::Windows,
            _ => LineEnding::Unix,
        };

        SessionConfig {
            serial_port: PathBuf::from(non_empty(&misc.serial_port).unwrap_or(DEFAULT_SERIAL_PORT)),
            interface_baud_rate: positive_u32(
                "interface_baudrate",
                misc.interface_baudrate,
                1,
                DEFAULT_INTERFACE_BAUD_RATE,
            ),
            emulation: Emulation::resolve(non_empty(&misc.emulation)),
            endlesstext: EndlessText::resolve(non_empty(&misc.endlesstext)),
            end_page_timeout: positive_u32(
                "end_page_timeout",
                misc.end_page_timeout,
                MIN_END_PAGE_TIMEOUT,
                DEFAULT_END_PAGE_TIMEOUT,
            ),
            handshake_timeout: Duration::from_secs(u64::from(positive_u32(
                "handshake_timeout",
                misc.handshake_timeout,
                1,
                DEFAULT_HANDSHAKE_TIMEOUT_SECS as u32,
            ))),
            line_ending,
            usb_passthrough,
            output_path,
            delay_printer: positive_u32("delayprinter", self.parallel_printer.delayprinter, 0, 0),
            serial_printer: self.serial_printer.resolve(),
        }
    }
}

impl RawSerialPrinter {
    fn resolve(self) -> SerialPrinterConfig {
        let mode = match non_empty(&self.enabled) {
            Some("yes") => SerialPrinterMode::Exclusive,
            Some("auto") => SerialPrinterMode::Auto,
            Some("no") | None => SerialPrinterMode::Disabled,
            Some(other) => {
                warn!("Unknown serial_printer.enabled value {other:?}, disabling serial printer");
                SerialPrinterMode::Disabled
            }
        };
        let dtr_logic = match non_empty(&self.dtr_logic) {
            Some("low") => DtrLogic::Low,
            _ => DtrLogic::High,
        };
        let baud_rate = positive_u32(
            "serial_printer.baudrate",
            self.baudrate,
            1,
            DEFAULT_SERIAL_PRINTER_BAUD_RATE,
        );
        if baud_rate > DEFAULT_SERIAL_PRINTER_BAUD_RATE {
            warn!(
                "Serial printer baudrate {baud_rate} is above {DEFAULT_SERIAL_PRINTER_BAUD_RATE}: \
                 the host computer may not keep up"
            );
        }
        let flow_control = match non_empty(&self.flow_control) {
            Some("hardware") => FlowControl::Hardware,
            Some("software") => FlowControl::Software,
            Some("both") => FlowControl::Both,
            _ => FlowControl::None,
        };
        SerialPrinterConfig {
            mode,
            dtr_logic,
            baud_rate,
            flow_control,
        }
    }
}
