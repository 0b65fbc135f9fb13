//! Windows backend for live dump capture.
//!
//! Implements the `capture` traits on top of the Win32 and native APIs:
//!
//! - [`TokenPrivilege`] - enables `SeDebugPrivilege` on the process token
//! - [`ToolhelpThreads`] - Tool Help thread snapshots and thread descriptions
//! - [`SystemDebugControl`] - `ntdll!NtSystemDebugControl`, resolved at runtime
//!
//! ```ignore
//! use capture::{CaptureOptions, CaptureOrchestrator, FileStorage, KernelOptions};
//! use std::path::Path;
//! use windows::{SystemDebugControl, TokenPrivilege, ToolhelpThreads};
//!
//! let control = SystemDebugControl::resolve()?;
//! let mut orchestrator = CaptureOrchestrator::new(
//!     TokenPrivilege::debug(),
//!     ToolhelpThreads,
//!     control,
//!     FileStorage,
//! );
//! let options = CaptureOptions::Kernel(KernelOptions::default());
//! orchestrator.run(Path::new(r"C:\dumps\live.dmp"), &options)?;
//! # Ok::<(), capture::CaptureError>(())
//! ```

#![cfg(target_os = "windows")]

mod control;
mod privilege;
mod threads;
mod util;
mod wire;

pub use control::SystemDebugControl;
pub use privilege::TokenPrivilege;
pub use threads::{ThreadSnapshot, ToolhelpThread, ToolhelpThreads};
