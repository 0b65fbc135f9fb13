//! Error types for dump capture.

use std::{fmt, io, path::PathBuf};

use thiserror::Error;

/// Status code returned by the privileged debug control interface.
///
/// Negative values are failures, everything else (including informational
/// and warning codes) counts as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NtStatus(pub i32);

impl NtStatus {
    pub const SUCCESS: NtStatus = NtStatus(0);
    pub const UNSUCCESSFUL: NtStatus = NtStatus(0xC000_0001_u32 as i32);
    pub const ACCESS_DENIED: NtStatus = NtStatus(0xC000_0022_u32 as i32);

    pub fn is_success(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0 as u32)
    }
}

/// Why the privileged capture call did not produce a usable dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The interface returned a failure status.
    Status(NtStatus),
    /// The interface reported success but returned no data.
    EmptyResult,
    /// The interface claimed to produce more bytes than the output buffer holds.
    Oversized { returned: u32, capacity: usize },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Status(status) => write!(f, "NtSystemDebugControl failed: {status}"),
            FailureReason::EmptyResult => {
                write!(f, "triage data buffer is empty, try a different process")
            }
            FailureReason::Oversized { returned, capacity } => write!(
                f,
                "returned length {returned} exceeds the {capacity} byte buffer"
            ),
        }
    }
}

/// Errors that can occur while capturing a dump.
#[derive(Error, Debug)]
pub enum CaptureError {
    /// Options rejected before any resource was touched
    #[error("invalid options: {0}")]
    Validation(String),

    /// The privileged capture interface could not be resolved
    #[error("failed to resolve {name}: {source}")]
    ControlUnavailable {
        name: &'static str,
        #[source]
        source: io::Error,
    },

    /// Enabling or disabling a token privilege failed
    #[error("failed to {action} {privilege}: {source}")]
    Privilege {
        privilege: &'static str,
        action: &'static str,
        #[source]
        source: io::Error,
    },

    /// The target process could not be opened
    #[error("failed to open PID {pid}: {source}")]
    TargetUnavailable {
        pid: u32,
        #[source]
        source: io::Error,
    },

    /// The system thread snapshot could not be taken or walked
    #[error("failed to get thread list: {0}")]
    ThreadEnumeration(#[source] io::Error),

    /// No thread of the target survived selection
    #[error("no suitable threads found in PID {pid}")]
    NoSuitableThreads { pid: u32 },

    /// The destination file could not be created
    #[error("failed to create '{}': {source}", path.display())]
    FileCreate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Writing or flushing the destination file failed
    #[error("failed to write '{}': {source}", path.display())]
    FileWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Fewer bytes reached the destination file than were requested
    #[error("short write: {written} of {expected} bytes written")]
    ShortWrite { expected: usize, written: usize },

    /// The privileged call did not produce a usable dump
    #[error("capture failed: {0}")]
    CaptureFailed(FailureReason),
}

/// Result type alias for capture operations.
pub type Result<T> = std::result::Result<T, CaptureError>;
