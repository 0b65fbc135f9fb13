//! Capture modes and the options that drive them.

use std::fmt;

use crate::error::{CaptureError, Result};

/// Number of threads included in a triage dump unless asked otherwise.
pub const DEFAULT_THREAD_LIMIT: u32 = 4;

/// Largest number of threads a triage dump accepts.
pub const MAX_THREAD_LIMIT: u32 = 16;

/// Which snapshot the privileged interface is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureMode {
    /// Bounded capture of a few threads of one process, returned in a buffer.
    Triage,
    /// Full live kernel dump, written by the kernel straight to the file.
    Kernel,
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureMode::Triage => f.write_str("triage"),
            CaptureMode::Kernel => f.write_str("kernel"),
        }
    }
}

/// Options of a triage capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriageOptions {
    /// Process whose threads are captured. Must be non-zero.
    pub pid: u32,
    /// Upper bound on the number of threads, in `1..=16`.
    pub thread_limit: u32,
}

impl TriageOptions {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            thread_limit: DEFAULT_THREAD_LIMIT,
        }
    }

    pub fn with_thread_limit(mut self, thread_limit: u32) -> Self {
        self.thread_limit = thread_limit;
        self
    }
}

/// Options of a live kernel capture. All flags default to off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KernelOptions {
    pub compress_pages: bool,
    pub use_dump_stack: bool,
    pub include_hypervisor_pages: bool,
    /// Also dump user space memory (Windows 11 22H2 and later).
    pub include_user_memory: bool,
}

/// Fully parsed options of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOptions {
    Triage(TriageOptions),
    Kernel(KernelOptions),
}

impl CaptureOptions {
    pub fn mode(&self) -> CaptureMode {
        match self {
            CaptureOptions::Triage(_) => CaptureMode::Triage,
            CaptureOptions::Kernel(_) => CaptureMode::Kernel,
        }
    }

    /// Reject options the privileged interface cannot honour.
    ///
    /// Runs before any privilege, handle or file is touched.
    pub fn validate(&self) -> Result<()> {
        match self {
            CaptureOptions::Triage(triage) => {
                if triage.pid == 0 {
                    return Err(CaptureError::Validation(
                        "a non-zero PID is required for triage dumps".into(),
                    ));
                }
                if !(1..=MAX_THREAD_LIMIT).contains(&triage.thread_limit) {
                    return Err(CaptureError::Validation(format!(
                        "number of threads must be between 1 and {MAX_THREAD_LIMIT}, got {}",
                        triage.thread_limit
                    )));
                }
                Ok(())
            }
            CaptureOptions::Kernel(_) => Ok(()),
        }
    }
}
