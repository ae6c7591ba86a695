extern crate libc;

use std::path::PathBuf;

use tracing::error;

use crate::converter_sync::{ConverterSync, JobSlot, SHARED_MEM_PATH};

/// FFI wrapper for ConverterSync, for converters written in C.
pub struct LpConverterSync {
    sync: ConverterSync,
}

impl LpConverterSync {
    /// Opens the shared status memory at the specified path (or at the
    /// standard location if path is NULL), creating it if needed.
    /// Returns NULL on failure. Non-rust callers must call
    /// lp_converter_sync_free to release the returned handle.
    #[export_name = "lp_converter_sync_open"]
    pub extern "C" fn open(path_raw: *const libc::c_char) -> *mut LpConverterSync {
        let path = if path_raw.is_null() {
            PathBuf::from(SHARED_MEM_PATH)
        } else {
            let path_cstr = unsafe { std::ffi::CStr::from_ptr(path_raw) };
            PathBuf::from(String::from_utf8_lossy(path_cstr.to_bytes()).to_string())
        };
        match ConverterSync::initialize_at(&path) {
            Ok(sync) => Box::into_raw(Box::new(LpConverterSync { sync })),
            Err(e) => {
                error!("{e}");
                std::ptr::null_mut()
            }
        }
    }

    /// Reads the value at a logical offset. Returns false if the offset is
    /// out of range, in which case value is left untouched.
    #[export_name = "lp_converter_sync_read_slot"]
    pub extern "C" fn read_slot(&self, offset: usize, value: &mut i32) -> bool {
        match self.sync.read_slot(offset) {
            Ok(read) => {
                *value = read;
                true
            }
            Err(_) => false,
        }
    }

    /// Writes the value at a logical offset. Returns false if the offset is
    /// out of range.
    #[export_name = "lp_converter_sync_write_slot"]
    pub extern "C" fn write_slot(&mut self, offset: usize, value: i32) -> bool {
        self.sync.write_slot(offset, value).is_ok()
    }

    /// Announces that the page of job_number ended, in the specified slot
    /// (0-199). Returns false for invalid slots.
    #[export_name = "lp_converter_sync_notify_job_ready"]
    pub extern "C" fn notify_job_ready(&mut self, slot: u8, job_number: u32) -> bool {
        let Some(slot) = JobSlot::new(slot) else {
            return false;
        };
        self.sync.notify_job_ready(slot, job_number).is_ok()
    }

    #[export_name = "lp_converter_sync_free"]
    pub extern "C" fn free(&mut self) {
        unsafe {
            drop(Box::from_raw(self));
        }
    }
}
