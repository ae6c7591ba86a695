#![no_main]
use libfuzzer_sys::fuzz_target;

use libreprinter::control_codes::{interpret_chunk, ControlCodeState};

fuzz_target!(|data: &[u8]| {
    let mut state = ControlCodeState::new();
    let mut chunk = data.to_vec();
    interpret_chunk(&mut state, &mut chunk);
    assert_eq!(chunk.len(), data.len());

    // Same bytes one at a time: no two sequences ever pending together.
    let mut state = ControlCodeState::new();
    for (byte, interpreted) in data.iter().zip(&chunk) {
        assert_eq!(state.process_byte(*byte), *interpreted);
        let pending = [state.esc_mode(), state.esc_info_mode(), state.master_font_mode()];
        assert!(pending.iter().filter(|mode| **mode).count() <= 1);
    }
});
