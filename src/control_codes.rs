//! Minimal ESC/P2 control code tracking.
//!
//! This is not a printer language interpreter: only the handful of escape
//! sequences that change how the following bytes must be stored are tracked
//! (MSB control, and whether literal control bytes are printed as data).

use tracing::debug;

pub const ESC: u8 = 0x1B;

/// Epson "initialise printer" followed by another command.
const EPSON_INIT_PROBE: &[u8] = b"\x1B@\x1B";
/// HP "reset" followed by a PCL page setup command.
const HP_INIT_PROBE: &[u8] = b"\x1BE\x1B&l";

/// MSB control (ESC # / ESC = / ESC >). Deprecated in the Epson manuals, but
/// some vintage drivers still emit it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MsbSetting {
    #[default]
    None,
    /// Bit 7 of every incoming byte is forced to 0.
    ClearBit7,
    /// Bit 7 of every incoming byte is forced to 1.
    SetBit7,
}

impl MsbSetting {
    pub fn apply(&self, byte: u8) -> u8 {
        match self {
            MsbSetting::None => byte,
            MsbSetting::ClearBit7 => byte & 0x7F,
            MsbSetting::SetBit7 => byte | 0x80,
        }
    }
}

/// Multi-byte sequence awaiting its next byte. Only one can be pending at a
/// time, which is why this is a single enum and not three flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Pending {
    #[default]
    Nothing,
    /// ESC seen, the next byte selects the command.
    Esc,
    /// ESC I seen, the next byte enables or disables printing of control codes.
    EscInfo,
    /// ESC ! seen, the next byte is the master font selection.
    MasterFont,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ControlCodeState {
    pending: Pending,
    italic: bool,
    print_control_codes: bool,
    msb: MsbSetting,
}

impl ControlCodeState {
    pub fn new() -> ControlCodeState {
        ControlCodeState::default()
    }

    pub fn reset(&mut self) {
        *self = ControlCodeState::default();
    }

    pub fn esc_mode(&self) -> bool {
        self.pending == Pending::Esc
    }

    pub fn esc_info_mode(&self) -> bool {
        self.pending == Pending::EscInfo
    }

    pub fn master_font_mode(&self) -> bool {
        self.pending == Pending::MasterFont
    }

    pub fn italic(&self) -> bool {
        self.italic
    }

    pub fn print_control_codes(&self) -> bool {
        self.print_control_codes
    }

    pub fn msb_setting(&self) -> MsbSetting {
        self.msb
    }

    /// Apply MSB control to a byte, then update the state from the adjusted
    /// byte. Returns the byte as it must be stored.
    pub fn process_byte(&mut self, byte: u8) -> u8 {
        let byte = self.msb.apply(byte);

        if byte == ESC && !self.print_control_codes {
            self.pending = Pending::Esc;
            return byte;
        }

        match self.pending {
            Pending::Nothing => (),
            Pending::Esc => {
                self.pending = Pending::Nothing;
                match byte {
                    b'#' => self.msb = MsbSetting::None,
                    b'=' => self.msb = MsbSetting::ClearBit7,
                    b'>' => self.msb = MsbSetting::SetBit7,
                    b'I' => self.pending = Pending::EscInfo,
                    b'4' => self.italic = true,
                    b'5' => self.italic = false,
                    b'!' => self.pending = Pending::MasterFont,
                    _ => (),
                }
            }
            Pending::EscInfo => {
                // The printer ignores ESC I while italic is selected, and so
                // do we.
                if !self.italic {
                    self.print_control_codes = byte == 1;
                }
                self.pending = Pending::Nothing;
            }
            Pending::MasterFont => {
                self.italic = byte & (1 << 6) != 0;
                self.pending = Pending::Nothing;
            }
        }
        byte
    }
}

/// Run every byte of `chunk` through the interpreter, rewriting it in place.
pub fn interpret_chunk(state: &mut ControlCodeState, chunk: &mut [u8]) {
    for byte in chunk.iter_mut() {
        *byte = state.process_byte(*byte);
    }
}

/// Emulation hinted by printer initialisation sequences in the first chunk of
/// a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbedEmulation {
    Epson,
    Hp,
}

/// Look for a well known initialisation sequence. Only used for diagnostics:
/// the configured emulation is never changed mid-session.
pub fn probe_emulation(chunk: &[u8]) -> Option<ProbedEmulation> {
    let contains = |needle: &[u8]| chunk.windows(needle.len()).any(|w| w == needle);
    let probed = if contains(EPSON_INIT_PROBE) {
        Some(ProbedEmulation::Epson)
    } else if contains(HP_INIT_PROBE) {
        Some(ProbedEmulation::Hp)
    } else {
        None
    };
    if let Some(probed) = probed {
        debug!("Probe: stream looks like {probed:?} data");
    }
    probed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interpreted(state: &mut ControlCodeState, input: &[u8]) -> Vec<u8> {
        let mut chunk = input.to_vec();
        interpret_chunk(state, &mut chunk);
        chunk
    }

    #[test]
    fn test_msb_transform_properties() {
        for b in 0..=255u8 {
            assert_eq!(MsbSetting::None.apply(b), b);
            assert_eq!(
                MsbSetting::SetBit7.apply(MsbSetting::ClearBit7.apply(b)),
                b | 0x80
            );
            let cleared = MsbSetting::ClearBit7.apply(b);
            assert_eq!(MsbSetting::ClearBit7.apply(cleared), cleared);
            assert_eq!(MsbSetting::SetBit7.apply(b), b | 0x80);
        }
    }

    #[test]
    fn test_escape_selectors() {
        struct TestCase<'a> {
            name: &'a str,
            input: &'a [u8],
            expected_msb: MsbSetting,
            expected_italic: bool,
        }
        let tests = [
            TestCase {
                name: "ClearBit7",
                input: b"\x1B=",
                expected_msb: MsbSetting::ClearBit7,
                expected_italic: false,
            },
            TestCase {
                name: "SetBit7",
                input: b"\x1B>",
                expected_msb: MsbSetting::SetBit7,
                expected_italic: false,
            },
            TestCase {
                name: "CancelMsb",
                input: b"\x1B>\x1B#",
                expected_msb: MsbSetting::None,
                expected_italic: false,
            },
            TestCase {
                name: "Italic",
                input: b"\x1B4",
                expected_msb: MsbSetting::None,
                expected_italic: true,
            },
            TestCase {
                name: "CancelItalic",
                input: b"\x1B4abc\x1B5",
                expected_msb: MsbSetting::None,
                expected_italic: false,
            },
            TestCase {
                name: "MasterFontItalic",
                input: b"\x1B!\x40",
                expected_msb: MsbSetting::None,
                expected_italic: true,
            },
            TestCase {
                name: "MasterFontUpright",
                input: b"\x1B4\x1B!\xBF",
                expected_msb: MsbSetting::None,
                expected_italic: false,
            },
            TestCase {
                name: "UnknownSelector",
                input: b"\x1B@",
                expected_msb: MsbSetting::None,
                expected_italic: false,
            },
        ];
        for test in tests {
            let mut state = ControlCodeState::new();
            interpreted(&mut state, test.input);
            assert_eq!(state.msb_setting(), test.expected_msb, "{}", test.name);
            assert_eq!(state.italic(), test.expected_italic, "{}", test.name);
            assert!(!state.esc_mode(), "{}: ESC must be consumed", test.name);
        }
    }

    #[test]
    fn test_msb_applies_before_classification() {
        let mut state = ControlCodeState::new();
        // With bit 7 cleared, 0x9B is stored as ESC and 0xA3 as '#', which
        // cancels MSB control for the final byte.
        let out = interpreted(&mut state, b"\x1B=\xC1\x9B\xA3\xC2");
        assert_eq!(out, b"\x1B=A\x1B#\xC2");
        assert_eq!(state.msb_setting(), MsbSetting::None);

        // With bit 7 set, a literal ESC is stored as 0x9B and isn't one.
        let mut state = ControlCodeState::new();
        let out = interpreted(&mut state, b"\x1B>A\x1B=B");
        assert_eq!(out, b"\x1B>\xC1\x9B\xBD\xC2");
        assert_eq!(state.msb_setting(), MsbSetting::SetBit7);
    }

    #[test]
    fn test_print_control_codes() {
        let mut state = ControlCodeState::new();
        interpreted(&mut state, b"\x1BI\x01");
        assert!(state.print_control_codes());

        // While control codes are printed, ESC is data and doesn't start a
        // sequence.
        interpreted(&mut state, b"\x1B=");
        assert!(!state.esc_mode());
        assert_eq!(state.msb_setting(), MsbSetting::None);

        let mut state = ControlCodeState::new();
        interpreted(&mut state, b"\x1BI\x01\x1BI\x00");
        // Sticky: the second ESC is printed, so "I\x00" is just text.
        assert!(state.print_control_codes());
    }

    #[test]
    fn test_esc_info_ignored_while_italic() {
        let mut state = ControlCodeState::new();
        interpreted(&mut state, b"\x1B4\x1BI\x01");
        assert!(!state.print_control_codes());
        assert!(!state.esc_info_mode(), "ESC I argument must still be consumed");
    }

    #[test]
    fn test_pending_modes_are_exclusive() {
        let sequences: [&[u8]; 4] = [
            b"\x1BI\x1B",
            b"\x1B!\x1B!",
            b"\x1B\x1B\x1BI",
            b"\x1B>\x1B!\x9B",
        ];
        for sequence in sequences {
            let mut state = ControlCodeState::new();
            for byte in sequence {
                state.process_byte(*byte);
                let active = [state.esc_mode(), state.esc_info_mode(), state.master_font_mode()]
                    .iter()
                    .filter(|mode| **mode)
                    .count();
                assert!(active <= 1, "{sequence:?} reached {state:?}");
            }
        }
    }

    #[test]
    fn test_exclusive_over_all_byte_pairs() {
        for first in 0..=255u8 {
            for second in 0..=255u8 {
                let mut state = ControlCodeState::new();
                for byte in [ESC, first, second, ESC, b'I', first] {
                    state.process_byte(byte);
                    let active = [state.esc_mode(), state.esc_info_mode(), state.master_font_mode()]
                        .iter()
                        .filter(|mode| **mode)
                        .count();
                    assert!(active <= 1);
                }
            }
        }
    }

    #[test]
    fn test_reset() {
        let mut state = ControlCodeState::new();
        interpreted(&mut state, b"\x1B=\x1B4\x1B");
        assert!(state.esc_mode());
        state.reset();
        assert_eq!(state, ControlCodeState::default());
    }

    #[test]
    fn test_probe_emulation() {
        assert_eq!(probe_emulation(b"\x1B@\x1BP hello"), Some(ProbedEmulation::Epson));
        assert_eq!(probe_emulation(b"junk\x1BE\x1B&l0O"), Some(ProbedEmulation::Hp));
        assert_eq!(probe_emulation(b"hello\r\n"), None);
        assert_eq!(probe_emulation(b""), None);
    }
}
