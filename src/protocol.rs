use std::io::{Read, Write};
use std::str::FromStr;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{DtrLogic, SerialPrinterMode, SessionConfig};
use crate::error::{CaptureError, Result};

/// Terminates the settings sent to the interface, and its acknowledgment.
pub const END_CONFIG: &str = "end_config";
const VERSION_BANNER: &str = "Online version ";
/// Pause after a read reporting end of file, so a closed port doesn't spin
/// until the handshake deadline.
const EOF_RETRY_PAUSE: Duration = Duration::from_millis(10);
/// Last firmware release known to work with this host. Older firmwares get a
/// warning, they are not rejected.
pub const LAST_KNOWN_FIRMWARE_VERSION: FirmwareVersion = FirmwareVersion {
    major: 1,
    minor: 2,
    patch: 0,
};

/// One `key=value` line of the configuration handshake.
#[derive(Clone, Debug, PartialEq)]
pub enum InterfaceSetting {
    DtrLogic(DtrLogic),
    SerialEnabled,
    BaudRate(u32),
    FlowControl(u8),
    DelayPrinter(u32),
}

impl InterfaceSetting {
    pub fn to_wire(&self) -> String {
        match self {
            InterfaceSetting::DtrLogic(logic) => format!(
                "dtr_logic={}\n",
                match logic {
                    DtrLogic::High => 1,
                    DtrLogic::Low => 0,
                }
            ),
            InterfaceSetting::SerialEnabled => "serial_enabled=1\n".to_string(),
            InterfaceSetting::BaudRate(baud_rate) => format!("baudrate={baud_rate}\n"),
            InterfaceSetting::FlowControl(code) => format!("flow_control={code}\n"),
            InterfaceSetting::DelayPrinter(delay) => format!("delayprinter={delay}\n"),
        }
    }
}

/// Settings of the session, in the order the firmware expects them.
pub fn interface_settings(config: &SessionConfig) -> Result<Vec<InterfaceSetting>> {
    let serial = &config.serial_printer;
    let mut settings = Vec::new();
    match serial.mode {
        SerialPrinterMode::Auto => {
            // The firmware would have to listen on both ports at once, which
            // it can't.
            return Err(CaptureError::ConfigurationRejected {
                reason: "automatic serial/parallel selection is not implemented".to_string(),
            });
        }
        SerialPrinterMode::Exclusive => {
            settings.push(InterfaceSetting::DtrLogic(serial.dtr_logic));
            settings.push(InterfaceSetting::SerialEnabled);
            settings.push(InterfaceSetting::BaudRate(serial.baud_rate));
            if let Some(code) = serial.flow_control.wire_code() {
                settings.push(InterfaceSetting::FlowControl(code));
            }
        }
        SerialPrinterMode::Disabled => {
            settings.push(InterfaceSetting::DelayPrinter(config.delay_printer));
        }
    }
    Ok(settings)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct FirmwareVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl std::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for FirmwareVersion {
    type Err = ParseError;

    /// Accepts `major.minor[.patch]`, ignoring any pre-release or build
    /// suffix on the last component.
    fn from_str(version: &str) -> std::result::Result<FirmwareVersion, ParseError> {
        let error = || ParseError {
            received_message: version.to_string(),
            reason: "unable to parse firmware version".to_string(),
        };
        let mut parts = version.trim().split('.');
        let mut next = |required: bool| -> std::result::Result<u32, ParseError> {
            match parts.next() {
                Some(part) => {
                    let digits: &str = part
                        .split(|c: char| !c.is_ascii_digit())
                        .next()
                        .unwrap_or_default();
                    u32::from_str(digits).map_err(|_| error())
                }
                None if required => Err(error()),
                None => Ok(0),
            }
        };
        Ok(FirmwareVersion {
            major: next(true)?,
            minor: next(true)?,
            patch: next(false)?,
        })
    }
}

/// A line sent by the interface while it processes its configuration.
#[derive(Debug, PartialEq)]
pub enum Response {
    Acknowledged,
    Version(FirmwareVersion),
    /// Anything else: the firmware chats about what it's doing.
    Diagnostic(String),
}

#[derive(Debug)]
pub struct ParseError {
    pub received_message: String,
    pub reason: String,
}

impl PartialEq for ParseError {
    fn eq(&self, other: &Self) -> bool {
        self.received_message == other.received_message
    }
}

impl Eq for ParseError {}

/// Parse one response line (without its line terminator).
pub fn parse_response(line: &str) -> std::result::Result<Response, ParseError> {
    match line {
        line if line.starts_with(END_CONFIG) => Ok(Response::Acknowledged),
        line if line.starts_with(VERSION_BANNER) => {
            let version = &line[VERSION_BANNER.len()..];
            match FirmwareVersion::from_str(version) {
                Ok(version) => Ok(Response::Version(version)),
                Err(err) => Err(ParseError {
                    received_message: line.to_string(),
                    ..err
                }),
            }
        }
        line => Ok(Response::Diagnostic(line.to_string())),
    }
}

/// Reads lines one byte at a time: whatever follows the acknowledgment is
/// already print data, and must stay in the port for the capture loop.
struct LineReader {
    line: Vec<u8>,
}

impl LineReader {
    fn new() -> LineReader {
        LineReader { line: Vec::new() }
    }

    fn read_line<R: Read + ?Sized>(
        &mut self,
        reader: &mut R,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<String> {
        let mut byte = [0u8; 1];
        loop {
            if Instant::now() >= deadline {
                return Err(CaptureError::HandshakeTimeout {
                    seconds: timeout.as_secs(),
                });
            }
            match reader.read(&mut byte) {
                Ok(0) => std::thread::sleep(EOF_RETRY_PAUSE),
                Ok(_) if byte[0] == b'\n' => {
                    let line = String::from_utf8_lossy(&self.line)
                        .trim_end_matches('\r')
                        .to_string();
                    self.line.clear();
                    return Ok(line);
                }
                Ok(_) => self.line.push(byte[0]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Send the session settings and wait until the interface acknowledges
/// them. Returns the firmware version if the interface announced one.
pub fn configure_interface<P: Read + Write + ?Sized>(
    port: &mut P,
    config: &SessionConfig,
) -> Result<Option<FirmwareVersion>> {
    let settings = interface_settings(config)?;
    debug!("Sending configuration to the interface: {settings:?}");
    for setting in &settings {
        port.write_all(setting.to_wire().as_bytes())?;
    }
    port.write_all(format!("{END_CONFIG}\n").as_bytes())?;
    port.flush()?;
    info!("Configuration sent to the interface");

    let timeout = config.handshake_timeout;
    let deadline = Instant::now() + timeout;
    let mut reader = LineReader::new();
    let mut firmware_version = None;
    loop {
        let line = reader.read_line(port, deadline, timeout)?;
        debug!("interface: {line}");
        match parse_response(&line) {
            Ok(Response::Acknowledged) => {
                info!("Configuration acknowledged by the interface");
                return Ok(firmware_version);
            }
            Ok(Response::Version(version)) => {
                if version < LAST_KNOWN_FIRMWARE_VERSION {
                    warn!(
                        "Interface firmware {version} is older than {LAST_KNOWN_FIRMWARE_VERSION}, \
                         please consider updating it"
                    );
                } else {
                    info!("Interface firmware {version}");
                }
                firmware_version = Some(version);
            }
            Ok(Response::Diagnostic(_)) => (),
            Err(e) => warn!("Unexpected response from the interface: {e:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FlowControl, SerialPrinterConfig};
    use std::collections::VecDeque;

    /// In-memory stand-in for the serial port: records what is written, and
    /// replays scripted input, timing out once it runs dry.
    struct FakePort {
        written: Vec<u8>,
        input: VecDeque<u8>,
    }

    impl FakePort {
        fn new(input: &[u8]) -> FakePort {
            FakePort {
                written: Vec::new(),
                input: input.iter().copied().collect(),
            }
        }
    }

    impl Read for FakePort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.input.is_empty() {
                return Err(std::io::ErrorKind::TimedOut.into());
            }
            let n = buf.len().min(self.input.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.input.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl Write for FakePort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn config_with(mode: SerialPrinterMode, flow_control: FlowControl) -> SessionConfig {
        SessionConfig {
            delay_printer: 3,
            handshake_timeout: Duration::from_millis(100),
            serial_printer: SerialPrinterConfig {
                mode,
                dtr_logic: DtrLogic::High,
                baud_rate: 19_200,
                flow_control,
            },
            ..SessionConfig::default()
        }
    }

    #[test]
    fn test_interface_settings() {
        struct TestCase<'a> {
            name: &'a str,
            input: SessionConfig,
            expected_result: Vec<&'a str>,
        }
        let tests = [
            TestCase {
                name: "SerialDisabled",
                input: config_with(SerialPrinterMode::Disabled, FlowControl::Hardware),
                expected_result: vec!["delayprinter=3\n"],
            },
            TestCase {
                name: "SerialEnabled",
                input: config_with(SerialPrinterMode::Exclusive, FlowControl::None),
                expected_result: vec!["dtr_logic=1\n", "serial_enabled=1\n", "baudrate=19200\n"],
            },
            TestCase {
                name: "SerialEnabledSoftwareFlowControl",
                input: config_with(SerialPrinterMode::Exclusive, FlowControl::Software),
                expected_result: vec![
                    "dtr_logic=1\n",
                    "serial_enabled=1\n",
                    "baudrate=19200\n",
                    "flow_control=2\n",
                ],
            },
        ];
        for test in tests {
            let wire: Vec<String> = interface_settings(&test.input)
                .unwrap()
                .iter()
                .map(InterfaceSetting::to_wire)
                .collect();
            assert_eq!(wire, test.expected_result, "{}", test.name);
        }
        assert_eq!(InterfaceSetting::DtrLogic(DtrLogic::Low).to_wire(), "dtr_logic=0\n");
        assert_eq!(InterfaceSetting::FlowControl(3).to_wire(), "flow_control=3\n");
    }

    #[test]
    fn test_auto_serial_mode_rejected() {
        let config = config_with(SerialPrinterMode::Auto, FlowControl::None);
        assert!(matches!(
            interface_settings(&config),
            Err(CaptureError::ConfigurationRejected { .. })
        ));

        let mut port = FakePort::new(b"end_config\n");
        assert!(configure_interface(&mut port, &config).is_err());
        assert!(port.written.is_empty(), "nothing may be sent for a rejected config");
    }

    #[test]
    fn test_parse_response() {
        struct TestCase<'a> {
            name: &'a str,
            input: &'a str,
            expected_result: std::result::Result<Response, ParseError>,
        }
        let version = |major, minor, patch| FirmwareVersion { major, minor, patch };
        let tests = [
            TestCase {
                name: "Ack",
                input: "end_config",
                expected_result: Ok(Response::Acknowledged),
            },
            TestCase {
                name: "AckWithTrailer",
                input: "end_config ok",
                expected_result: Ok(Response::Acknowledged),
            },
            TestCase {
                name: "Version",
                input: "Online version 1.3.2",
                expected_result: Ok(Response::Version(version(1, 3, 2))),
            },
            TestCase {
                name: "VersionNoPatch",
                input: "Online version 0.9",
                expected_result: Ok(Response::Version(version(0, 9, 0))),
            },
            TestCase {
                name: "VersionSuffix",
                input: "Online version 1.2.1-dev",
                expected_result: Ok(Response::Version(version(1, 2, 1))),
            },
            TestCase {
                name: "VersionGarbage",
                input: "Online version unknown",
                expected_result: Err(ParseError {
                    received_message: "Online version unknown".to_string(),
                    reason: String::new(),
                }),
            },
            TestCase {
                name: "Diagnostic",
                input: "baudrate set",
                expected_result: Ok(Response::Diagnostic("baudrate set".to_string())),
            },
            TestCase {
                name: "Empty",
                input: "",
                expected_result: Ok(Response::Diagnostic(String::new())),
            },
        ];
        for test in tests {
            assert_eq!(parse_response(test.input), test.expected_result, "{}", test.name);
        }
    }

    #[test]
    fn test_version_ordering() {
        let older: FirmwareVersion = "1.1.9".parse().unwrap();
        let newer: FirmwareVersion = "1.10.0".parse().unwrap();
        assert!(older < LAST_KNOWN_FIRMWARE_VERSION);
        assert!(newer > LAST_KNOWN_FIRMWARE_VERSION);
        assert_eq!(newer.to_string(), "1.10.0");
    }

    #[test]
    fn test_configure_interface() {
        let config = config_with(SerialPrinterMode::Disabled, FlowControl::None);
        let mut port = FakePort::new(
            b"booting\r\nOnline version 1.1.0\r\ndelayprinter=3\r\nend_config\r\n\x1B@print data",
        );
        let version = configure_interface(&mut port, &config).unwrap();

        assert_eq!(port.written, b"delayprinter=3\nend_config\n");
        assert_eq!(
            version,
            Some(FirmwareVersion {
                major: 1,
                minor: 1,
                patch: 0
            })
        );
        // Data following the acknowledgment is left for the capture loop.
        let rest: Vec<u8> = port.input.iter().copied().collect();
        assert_eq!(rest, b"\x1B@print data");
    }

    #[test]
    fn test_configure_interface_without_banner() {
        let config = config_with(SerialPrinterMode::Exclusive, FlowControl::Hardware);
        let mut port = FakePort::new(b"end_config\n");
        assert_eq!(configure_interface(&mut port, &config).unwrap(), None);
        assert_eq!(
            port.written,
            b"dtr_logic=1\nserial_enabled=1\nbaudrate=19200\nflow_control=1\nend_config\n"
        );
    }

    #[test]
    fn test_configure_interface_timeout() {
        let config = config_with(SerialPrinterMode::Disabled, FlowControl::None);
        // Chatty, but never acknowledges.
        let mut port = FakePort::new(b"hello\nend_conf");
        assert!(matches!(
            configure_interface(&mut port, &config),
            Err(CaptureError::HandshakeTimeout { .. })
        ));
    }

    #[test]
    fn test_configure_interface_at_eof() {
        struct ClosedPort {
            reads: usize,
        }
        impl Read for ClosedPort {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                self.reads += 1;
                Ok(0)
            }
        }
        impl Write for ClosedPort {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let config = config_with(SerialPrinterMode::Disabled, FlowControl::None);
        let mut port = ClosedPort { reads: 0 };
        assert!(matches!(
            configure_interface(&mut port, &config),
            Err(CaptureError::HandshakeTimeout { .. })
        ));
        // 100ms deadline, 10ms between reads.
        assert!(port.reads <= 20, "{} reads", port.reads);
    }
}
