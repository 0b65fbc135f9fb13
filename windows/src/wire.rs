//! Raw control blocks understood by `NtSystemDebugControl`.
//!
//! Layouts follow the NDK / phnt definitions. Only the fields the kernel looks
//! at are ever set; everything else stays zeroed.

use std::ptr;

use capture::{KernelRequest, TriageRequest};
use windows_sys::Win32::Foundation::HANDLE;

/// `SYSDBG_TRIAGE_DUMP`
#[repr(C)]
#[derive(Debug)]
pub struct SysDbgTriageDump {
    pub flags: u32,
    pub bug_check_code: u32,
    pub bug_check_param: [usize; 4],
    pub process_handles: u32,
    pub thread_handles: u32,
    pub handles: *mut HANDLE,
}

/// `SYSDBG_LIVEDUMP_CONTROL`
#[repr(C)]
#[derive(Debug)]
pub struct SysDbgLiveDumpControl {
    pub version: u32,
    pub bug_check_code: u32,
    pub bug_check_param: [usize; 4],
    pub dump_file_handle: HANDLE,
    pub cancel_event_handle: HANDLE,
    /// `SYSDBG_LIVEDUMP_CONTROL_FLAGS`
    pub flags: u32,
    /// `SYSDBG_LIVEDUMP_CONTROL_ADDPAGES`
    pub add_pages_control: u32,
}

/// Handle array referenced by a triage control block.
///
/// The control block points into `handles`, so it must not outlive this.
pub struct TriageBlock {
    handles: Vec<HANDLE>,
}

impl TriageBlock {
    pub fn new(request: &TriageRequest) -> Self {
        Self {
            handles: request
                .thread_handles
                .iter()
                .map(|h| h.0 as HANDLE)
                .collect(),
        }
    }

    pub fn control(&mut self) -> SysDbgTriageDump {
        SysDbgTriageDump {
            flags: 0,
            bug_check_code: 0,
            bug_check_param: [0; 4],
            process_handles: 0,
            thread_handles: self.handles.len() as u32,
            handles: self.handles.as_mut_ptr(),
        }
    }
}

impl From<&KernelRequest> for SysDbgLiveDumpControl {
    fn from(request: &KernelRequest) -> Self {
        SysDbgLiveDumpControl {
            version: 0,
            bug_check_code: 0,
            bug_check_param: [0; 4],
            dump_file_handle: request.dump_file.0 as HANDLE,
            cancel_event_handle: ptr::null_mut(),
            flags: request.flags.bits(),
            add_pages_control: request.pages.bits(),
        }
    }
}
