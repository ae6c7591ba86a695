//! Job hand-off to external converters through the legacy shared status memory.
//!
//! The segment is a flat array of 512 native-endian `i32`s (2048 bytes). The
//! legacy converters address it as packed 16 bit "words": logical offset `n`
//! lives at array index `2n + 1`, and index `2n` is unused padding that must
//! stay untouched. This module is the only place that knows about the packing.
//!
//! Logical offsets:
//! - `0..=199`: job slots, `-job_number` once the job's page has ended.
//! - `200`: LED control arbitration between capture and conversion.
//! - `201`: converter running (1) or idle (0).
//! - `202`: data ready for converters.
//!
//! Nothing here is locked: converters are independent processes that poll the
//! flags, and each slot has a single writer by convention.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};

use memmap2::{MmapMut, MmapOptions};
use tracing::debug;

use crate::error::{CaptureError, ShmError};

pub const SHARED_MEM_PATH: &str = "/dev/shm/retroprinter-shared-mem";
pub const SHARED_MEM_WORDS: usize = 512;
pub const SHARED_MEM_SIZE: usize = SHARED_MEM_WORDS * std::mem::size_of::<i32>();

pub const ARBITRATION_OFFSET: usize = 200;
pub const CONVERTER_STATE_OFFSET: usize = 201;
pub const DATA_READY_OFFSET: usize = 202;

/// Number of usable job slots; offsets from here on are control words.
pub const JOB_SLOTS: u8 = 200;

/// Index of a job slot in the status memory, always within `0..200`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct JobSlot(u8);

impl JobSlot {
    pub fn new(slot: u8) -> Option<JobSlot> {
        (slot < JOB_SLOTS).then_some(JobSlot(slot))
    }

    /// 199 wraps around to 0.
    pub fn next(self) -> JobSlot {
        if self.0 + 1 >= JOB_SLOTS {
            JobSlot(0)
        } else {
            JobSlot(self.0 + 1)
        }
    }

    pub fn offset(self) -> usize {
        usize::from(self.0)
    }
}

/// Hook through which the capture loop announces finished pages.
pub trait JobNotifier {
    fn notify_job_ready(&mut self, slot: JobSlot, job_number: u32) -> Result<(), CaptureError>;
}

fn word_index(offset: usize) -> Result<usize, ShmError> {
    let index = offset * 2 + 1;
    if index >= SHARED_MEM_WORDS {
        return Err(ShmError::OffsetOutOfRange {
            offset,
            words: SHARED_MEM_WORDS / 2,
        });
    }
    Ok(index)
}

/// Snapshot of the three control words, for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub arbitration: i32,
    pub converter_state: i32,
    pub data_ready: i32,
}

impl StatusSnapshot {
    pub fn describe_arbitration(&self) -> &'static str {
        match self.arbitration {
            0 => "can't control",
            1 => "conversion program is in control",
            2 => "capture program is in control",
            _ => "unknown",
        }
    }

    pub fn describe_converter_state(&self) -> &'static str {
        match self.converter_state {
            0 => "waiting data: converter finished",
            1 => "processing data: converter running",
            _ => "unknown",
        }
    }

    pub fn describe_data_ready(&self) -> &'static str {
        match self.data_ready {
            0 => "no data to process or data is processed",
            1 => "data to process",
            3 => "end of job forced",
            _ => "unknown",
        }
    }
}

impl std::fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "200 (LED control): {} [{}], 201 (converters): {} [{}], 202 (data): {} [{}]",
            self.arbitration,
            self.describe_arbitration(),
            self.converter_state,
            self.describe_converter_state(),
            self.data_ready,
            self.describe_data_ready()
        )
    }
}

pub struct ConverterSync {
    mmap: MmapMut,
}

impl ConverterSync {
    /// Open (creating it if needed) the segment at its well known path.
    pub fn initialize() -> Result<ConverterSync, ShmError> {
        ConverterSync::initialize_at(Path::new(SHARED_MEM_PATH))
    }

    /// Converters may have created the segment with a smaller size: it is
    /// always resized to exactly `SHARED_MEM_SIZE`, keeping existing content.
    pub fn initialize_at(path: &Path) -> Result<ConverterSync, ShmError> {
        let layout_error = |source| ShmError::Layout {
            path: path.to_path_buf(),
            source,
        };
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(layout_error)?;
        file.set_len(SHARED_MEM_SIZE as u64).map_err(layout_error)?;

        // The file may be shrunk by another process while mapped, at which
        // point accesses fault; converters never do that.
        let mmap = unsafe { MmapOptions::new().len(SHARED_MEM_SIZE).map_mut(&file) }
            .map_err(layout_error)?;

        let sync = ConverterSync { mmap };
        debug!("Shared status memory initialised at {path:?}");
        debug!("{}", sync.snapshot());
        Ok(sync)
    }

    // The mapping is page aligned and SHARED_MEM_SIZE long, so every index
    // below SHARED_MEM_WORDS is an aligned i32 inside it.
    fn word(&self, index: usize) -> &AtomicI32 {
        debug_assert!(index < SHARED_MEM_WORDS);
        unsafe { &*(self.mmap.as_ptr().cast::<AtomicI32>().add(index)) }
    }

    fn word_mut(&mut self, index: usize) -> &AtomicI32 {
        debug_assert!(index < SHARED_MEM_WORDS);
        unsafe { &*(self.mmap.as_mut_ptr().cast::<AtomicI32>().add(index)) }
    }

    pub fn read_slot(&self, offset: usize) -> Result<i32, ShmError> {
        Ok(self.word(word_index(offset)?).load(Ordering::SeqCst))
    }

    pub fn write_slot(&mut self, offset: usize, value: i32) -> Result<(), ShmError> {
        self.word_mut(word_index(offset)?).store(value, Ordering::SeqCst);
        Ok(())
    }

    /// Raw array access, ignoring the word packing. Diagnostics only.
    pub fn read_index(&self, index: usize) -> Option<i32> {
        (index < SHARED_MEM_WORDS).then(|| self.word(index).load(Ordering::SeqCst))
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        // The control offsets are constants well within range.
        let read = |offset| self.word(offset * 2 + 1).load(Ordering::SeqCst);
        StatusSnapshot {
            arbitration: read(ARBITRATION_OFFSET),
            converter_state: read(CONVERTER_STATE_OFFSET),
            data_ready: read(DATA_READY_OFFSET),
        }
    }

    /// Flag the page of `job_number` as ended in `slot`, then raise the data
    /// ready flag, then the arbitration flag. Converters check arbitration
    /// last before re-reading the ready flag, so the order matters. Some
    /// converters never process a page unless arbitration is raised.
    pub fn notify_job_ready(&mut self, slot: JobSlot, job_number: u32) -> Result<(), ShmError> {
        debug!("Sync job slot {}, job number {job_number}", slot.offset());
        let sentinel = i32::try_from(job_number).map_or(i32::MIN + 1, |n| -n);
        self.write_slot(slot.offset(), sentinel)?;
        self.write_slot(DATA_READY_OFFSET, 1)?;
        self.write_slot(ARBITRATION_OFFSET, 1)?;
        debug!("{}", self.snapshot());
        Ok(())
    }
}

impl JobNotifier for ConverterSync {
    fn notify_job_ready(&mut self, slot: JobSlot, job_number: u32) -> Result<(), CaptureError> {
        ConverterSync::notify_job_ready(self, slot, job_number).map_err(CaptureError::from)
    }
}
