//! Threads of the running system, through the [Tool Help Library].
//!
//! [Tool Help Library]: https://learn.microsoft.com/en-us/windows/win32/api/_toolhelp/

use std::{
    io, mem,
    os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle},
    ptr,
};

use capture::{HandleValue, ThreadEntry, ThreadHandle, ThreadSource};
use log::debug;
use windows_sys::Win32::{
    Foundation::{ERROR_NO_MORE_FILES, INVALID_HANDLE_VALUE, LocalFree},
    System::{
        Diagnostics::ToolHelp::{
            CreateToolhelp32Snapshot, TH32CS_SNAPTHREAD, THREADENTRY32, Thread32First,
            Thread32Next,
        },
        Threading::{
            GetThreadDescription, GetThreadId, OpenProcess, OpenThread, PROCESS_ALL_ACCESS,
            THREAD_ALL_ACCESS,
        },
    },
};
use windows_sys::core::PWSTR;

use crate::util::osstring_from_wide;

/// [`ThreadSource`] backed by Tool Help snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolhelpThreads;

/// An open thread, closed on drop.
#[derive(Debug)]
pub struct ToolhelpThread {
    handle: OwnedHandle,
}

impl ToolhelpThread {
    /// Thread id as reported by the handle itself.
    pub fn id(&self) -> u32 {
        // SAFETY: `handle` is a valid thread handle
        unsafe { GetThreadId(self.handle.as_raw_handle()) }
    }
}

impl ThreadHandle for ToolhelpThread {
    fn raw(&self) -> HandleValue {
        HandleValue(self.handle.as_raw_handle() as usize)
    }

    fn thread_id(&self) -> u32 {
        self.id()
    }
}

impl ThreadSource for ToolhelpThreads {
    type Process = OwnedHandle;
    type Thread = ToolhelpThread;

    fn open_process(&self, pid: u32) -> io::Result<OwnedHandle> {
        // SAFETY: Trivially safe
        let handle = unsafe { OpenProcess(PROCESS_ALL_ACCESS, 0, pid) };
        if handle.is_null() {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `handle` was just opened and is owned by nobody else
        Ok(unsafe { OwnedHandle::from_raw_handle(handle) })
    }

    fn thread_entries(&self) -> io::Result<Vec<ThreadEntry>> {
        ThreadSnapshot::new()?.threads().collect()
    }

    fn open_thread(&self, thread_id: u32) -> io::Result<ToolhelpThread> {
        // SAFETY: Trivially safe
        let handle = unsafe { OpenThread(THREAD_ALL_ACCESS, 0, thread_id) };
        if handle.is_null() || handle == INVALID_HANDLE_VALUE {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `handle` was just opened and is owned by nobody else
        let thread = ToolhelpThread {
            handle: unsafe { OwnedHandle::from_raw_handle(handle) },
        };
        debug!("Opened thread {thread_id} ({})", thread.id());
        Ok(thread)
    }

    fn thread_name(&self, thread: &ToolhelpThread) -> io::Result<String> {
        let mut description: PWSTR = ptr::null_mut();
        // SAFETY: `thread` is a valid handle and `description` a valid out pointer
        let hr = unsafe { GetThreadDescription(thread.handle.as_raw_handle(), &mut description) };
        if hr < 0 {
            return Err(hresult_error(hr));
        }

        // SAFETY: On success `description` is a null-terminated string
        let name = unsafe { osstring_from_wide(description) };
        // SAFETY: The description was allocated by the system with LocalAlloc
        unsafe { LocalFree(description.cast()) };

        Ok(name.to_string_lossy().into_owned())
    }
}

const FACILITY_WIN32: u32 = 7;

/// Convert a failed HRESULT into an I/O error.
///
/// `FACILITY_WIN32` results wrap a Win32 error code in their low word; any
/// other facility is reported as the raw HRESULT.
fn hresult_error(hr: i32) -> io::Error {
    let code = hr as u32;
    if (code >> 16) & 0x1fff == FACILITY_WIN32 {
        io::Error::from_raw_os_error((code & 0xffff) as i32)
    } else {
        io::Error::other(format!("HRESULT {code:#010x}"))
    }
}

/// A snapshot of every thread in the system.
///
/// This uses the [`CreateToolhelp32Snapshot`] Windows API function.
///
/// [`CreateToolhelp32Snapshot`]: https://learn.microsoft.com/en-us/windows/win32/api/tlhelp32/nf-tlhelp32-createtoolhelp32snapshot
pub struct ThreadSnapshot {
    handle: OwnedHandle,
}

impl ThreadSnapshot {
    pub fn new() -> io::Result<ThreadSnapshot> {
        // SAFETY: Trivially safe
        let snap = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPTHREAD, 0) };
        if snap == INVALID_HANDLE_VALUE {
            return Err(io::Error::last_os_error());
        }
        Ok(ThreadSnapshot {
            // SAFETY: `snap` was just created and is owned by nobody else
            handle: unsafe { OwnedHandle::from_raw_handle(snap) },
        })
    }

    /// Iterate over the threads in snapshot order.
    pub fn threads(&self) -> ThreadSnapshotEntries<'_> {
        ThreadSnapshotEntries {
            snapshot: self,
            iter_started: false,
            temp_entry: THREADENTRY32 {
                dwSize: mem::size_of::<THREADENTRY32>() as u32,
                ..Default::default()
            },
        }
    }
}

/// Thread iterator for [ThreadSnapshot]
pub struct ThreadSnapshotEntries<'a> {
    snapshot: &'a ThreadSnapshot,
    iter_started: bool,
    temp_entry: THREADENTRY32,
}

impl ThreadSnapshotEntries<'_> {
    /// Whether the system filled in the owner of the current entry.
    fn has_owner(&self) -> bool {
        let needed = mem::offset_of!(THREADENTRY32, th32OwnerProcessID) + mem::size_of::<u32>();
        self.temp_entry.dwSize as usize >= needed
    }

    fn advance(&mut self) -> Option<io::Result<()>> {
        let snapshot = self.snapshot.handle.as_raw_handle();
        if self.iter_started {
            // SAFETY: The snapshot is valid for 'a, and entry points to a valid `THREADENTRY32`
            if unsafe { Thread32Next(snapshot, &mut self.temp_entry) } == 0 {
                let last_error = io::Error::last_os_error();
                return if last_error.raw_os_error() == Some(ERROR_NO_MORE_FILES as i32) {
                    None
                } else {
                    Some(Err(last_error))
                };
            }
        } else {
            // SAFETY: The snapshot is valid for 'a, and entry points to a valid `THREADENTRY32`
            if unsafe { Thread32First(snapshot, &mut self.temp_entry) } == 0 {
                return Some(Err(io::Error::last_os_error()));
            }
            self.iter_started = true;
        }
        Some(Ok(()))
    }
}

impl Iterator for ThreadSnapshotEntries<'_> {
    type Item = io::Result<ThreadEntry>;

    fn next(&mut self) -> Option<io::Result<ThreadEntry>> {
        loop {
            if let Err(e) = self.advance()? {
                return Some(Err(e));
            }
            if self.has_owner() {
                return Some(Ok(ThreadEntry {
                    thread_id: self.temp_entry.th32ThreadID,
                    owner_pid: self.temp_entry.th32OwnerProcessID,
                }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn win32_hresults_unwrap_to_os_errors() {
        // HRESULT_FROM_WIN32(ERROR_ACCESS_DENIED)
        let err = hresult_error(0x8007_0005_u32 as i32);
        assert_eq!(err.raw_os_error(), Some(5));

        // E_NOTIMPL is not a Win32 code
        let err = hresult_error(0x8000_4001_u32 as i32);
        assert_eq!(err.raw_os_error(), None);
        assert!(err.to_string().contains("0x80004001"));
    }

    #[test]
    fn snapshot_contains_current_thread() {
        let pid = std::process::id();
        let entries = ToolhelpThreads.thread_entries().unwrap();
        assert!(entries.iter().any(|e| e.owner_pid == pid));
    }

    #[test]
    fn current_process_threads_can_be_opened() {
        let pid = std::process::id();
        let threads = ToolhelpThreads;
        let _process = threads.open_process(pid).unwrap();
        let entry = threads
            .thread_entries()
            .unwrap()
            .into_iter()
            .find(|e| e.owner_pid == pid)
            .unwrap();
        let thread = threads.open_thread(entry.thread_id).unwrap();
        assert_eq!(thread.id(), entry.thread_id);
        assert!(threads.thread_name(&thread).is_ok());
    }
}
