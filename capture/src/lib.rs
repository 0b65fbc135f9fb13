//! Live dump capture through the privileged debug control interface.
//!
//! A run enables the debug privilege, creates the destination file and then
//! either
//!
//! - picks a handful of threads of one process and asks for a **triage dump**,
//!   which comes back in a buffer and is written to the file, or
//! - hands the file to the kernel and asks for a **live kernel dump**, which
//!   the kernel writes itself.
//!
//! The privilege is released on every path and a failed run never leaves a
//! partial dump behind.
//!
//! Every operating system touch-point is a trait ([`PrivilegeManager`],
//! [`ThreadSource`], [`DebugControl`], [`DumpStorage`]) so the sequencing can
//! be driven by any backend. The Windows one lives in its own crate.
//!
//! ```no_run
//! # fn demo<P, T, C>(privileges: P, threads: T, control: C) -> capture::Result<()>
//! # where P: capture::PrivilegeManager, T: capture::ThreadSource, C: capture::DebugControl {
//! use capture::{CaptureOptions, CaptureOrchestrator, FileStorage, TriageOptions};
//! use std::path::Path;
//!
//! let mut orchestrator = CaptureOrchestrator::new(privileges, threads, control, FileStorage);
//! let options = CaptureOptions::Triage(TriageOptions::new(1234));
//! let report = orchestrator.run(Path::new(r"C:\dumps\triage.dmp"), &options)?;
//! println!("{} bytes written", report.bytes_written.unwrap_or(0));
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod invoker;
pub mod options;
pub mod orchestrator;
pub mod privilege;
pub mod request;
pub mod selector;
pub mod writer;

pub use error::{CaptureError, FailureReason, NtStatus, Result};
pub use invoker::{CaptureInvoker, CaptureResult, ControlReturn, DebugControl, TRIAGE_BUFFER_SIZE};
pub use options::{CaptureMode, CaptureOptions, KernelOptions, TriageOptions};
pub use orchestrator::{CaptureOrchestrator, CaptureReport};
pub use privilege::{DEBUG_PRIVILEGE, PrivilegeManager};
pub use request::{CaptureRequest, DebugCommand, KernelRequest, TriageRequest};
pub use selector::{TargetSelector, ThreadEntry, ThreadHandle, ThreadSelection, ThreadSource};
pub use writer::{DumpStorage, DumpWriter, FileStorage};

/// Raw value of an OS handle as it appears inside a control block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleValue(pub usize);
