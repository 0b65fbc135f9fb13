//! Requests handed to the privileged debug control interface.
//!
//! These are the typed form of the control blocks. Only the backend that
//! talks to the OS turns them into the raw wire layout.

use bitflags::bitflags;

use crate::{
    HandleValue,
    options::{CaptureMode, KernelOptions},
    selector::{ThreadHandle, ThreadSelection},
};

/// Debug control opcodes used by this tool.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugCommand {
    /// `SysDbgGetTriageDump`
    TriageDump = 29,
    /// `SysDbgGetLiveKernelDump`
    LiveKernelDump = 37,
}

bitflags! {
    /// Behaviour flags of a live kernel dump.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LiveDumpFlags: u32 {
        const USE_DUMP_STORAGE_STACK = 1 << 0;
        const COMPRESS_MEMORY_PAGES = 1 << 1;
        const INCLUDE_USER_SPACE_MEMORY = 1 << 2;
    }
}

bitflags! {
    /// Extra page classes added to a live kernel dump.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AddPagesFlags: u32 {
        const HYPERVISOR_PAGES = 1 << 0;
    }
}

impl From<&KernelOptions> for LiveDumpFlags {
    fn from(options: &KernelOptions) -> Self {
        let mut flags = LiveDumpFlags::empty();
        flags.set(LiveDumpFlags::USE_DUMP_STORAGE_STACK, options.use_dump_stack);
        flags.set(LiveDumpFlags::COMPRESS_MEMORY_PAGES, options.compress_pages);
        flags.set(
            LiveDumpFlags::INCLUDE_USER_SPACE_MEMORY,
            options.include_user_memory,
        );
        flags
    }
}

impl From<&KernelOptions> for AddPagesFlags {
    fn from(options: &KernelOptions) -> Self {
        let mut pages = AddPagesFlags::empty();
        pages.set(
            AddPagesFlags::HYPERVISOR_PAGES,
            options.include_hypervisor_pages,
        );
        pages
    }
}

/// Triage control block: the threads to capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriageRequest {
    pub thread_handles: Vec<HandleValue>,
}

/// Live kernel dump control block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelRequest {
    /// Handle the kernel writes the dump to.
    pub dump_file: HandleValue,
    pub flags: LiveDumpFlags,
    pub pages: AddPagesFlags,
}

/// A request for one privileged capture call. Built fresh for every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureRequest {
    Triage(TriageRequest),
    Kernel(KernelRequest),
}

impl CaptureRequest {
    pub fn command(&self) -> DebugCommand {
        match self {
            CaptureRequest::Triage(_) => DebugCommand::TriageDump,
            CaptureRequest::Kernel(_) => DebugCommand::LiveKernelDump,
        }
    }

    pub fn mode(&self) -> CaptureMode {
        match self {
            CaptureRequest::Triage(_) => CaptureMode::Triage,
            CaptureRequest::Kernel(_) => CaptureMode::Kernel,
        }
    }
}

/// Build the triage request for `selection`.
///
/// The selection must not be empty; the selector never returns one.
pub fn build_triage<P, T: ThreadHandle>(selection: &ThreadSelection<P, T>) -> CaptureRequest {
    debug_assert!(!selection.is_empty(), "triage request without threads");
    CaptureRequest::Triage(TriageRequest {
        thread_handles: selection.raw_handles(),
    })
}

/// Build the live kernel dump request writing to `destination`.
pub fn build_kernel(options: &KernelOptions, destination: HandleValue) -> CaptureRequest {
    CaptureRequest::Kernel(KernelRequest {
        dump_file: destination,
        flags: options.into(),
        pages: options.into(),
    })
}
