//! `ntdll!NtSystemDebugControl`, resolved at runtime.

use std::{ffi::c_void, io, mem, ptr};

use capture::{CaptureError, CaptureRequest, ControlReturn, DebugControl, NtStatus};
use log::debug;
use windows_sys::Win32::{
    Foundation::{FreeLibrary, HMODULE, NTSTATUS},
    System::LibraryLoader::{GetProcAddress, LoadLibraryW},
};

use crate::{
    util::to_wide_null,
    wire::{SysDbgLiveDumpControl, TriageBlock},
};

const MODULE_NAME: &str = "ntdll.dll";
const PROC_NAME: &str = "NtSystemDebugControl";

type NtSystemDebugControlFn = unsafe extern "system" fn(
    command: u32,
    input_buffer: *mut c_void,
    input_buffer_length: u32,
    output_buffer: *mut c_void,
    output_buffer_length: u32,
    return_length: *mut u32,
) -> NTSTATUS;

/// A loaded module, freed on drop.
struct Module {
    handle: HMODULE,
}

impl Module {
    fn load(name: &str) -> io::Result<Module> {
        let wide = to_wide_null(name);
        // SAFETY: `wide` is null-terminated
        let handle = unsafe { LoadLibraryW(wide.as_ptr()) };
        if handle.is_null() {
            return Err(io::Error::last_os_error());
        }
        Ok(Module { handle })
    }
}

impl Drop for Module {
    fn drop(&mut self) {
        // SAFETY: This is a valid module handle
        unsafe {
            FreeLibrary(self.handle);
        }
    }
}

/// The privileged debug control interface of the running kernel.
///
/// Holds a reference on `ntdll.dll` for as long as the function pointer is
/// in use.
pub struct SystemDebugControl {
    function: NtSystemDebugControlFn,
    _module: Module,
}

impl SystemDebugControl {
    /// Resolve `NtSystemDebugControl` from `ntdll.dll`.
    pub fn resolve() -> capture::Result<Self> {
        let unavailable = |source| CaptureError::ControlUnavailable {
            name: PROC_NAME,
            source,
        };

        let module = Module::load(MODULE_NAME).map_err(unavailable)?;
        let name = format!("{PROC_NAME}\0");
        // SAFETY: `module` is loaded and `name` is null-terminated
        let Some(address) = (unsafe { GetProcAddress(module.handle, name.as_ptr()) }) else {
            return Err(unavailable(io::Error::last_os_error()));
        };
        debug!("Resolved {PROC_NAME} at {:p}", address as *const c_void);

        Ok(SystemDebugControl {
            // SAFETY: The export has this signature on every supported Windows version
            function: unsafe {
                mem::transmute::<unsafe extern "system" fn() -> isize, NtSystemDebugControlFn>(address)
            },
            _module: module,
        })
    }

    fn call<T>(&self, command: u32, input: &mut T, output: &mut [u8]) -> ControlReturn {
        let mut returned_length = 0u32;
        let output_ptr = if output.is_empty() {
            ptr::null_mut()
        } else {
            output.as_mut_ptr().cast()
        };

        // SAFETY: `input` is a live control block of the layout `command` expects,
        // and `output` is valid for its whole length
        let status = unsafe {
            (self.function)(
                command,
                (input as *mut T).cast(),
                mem::size_of::<T>() as u32,
                output_ptr,
                output.len() as u32,
                &mut returned_length,
            )
        };

        ControlReturn {
            status: NtStatus(status),
            returned_length,
        }
    }
}

impl DebugControl for SystemDebugControl {
    fn control(&self, request: &CaptureRequest, output: &mut [u8]) -> ControlReturn {
        let command = request.command() as u32;
        let ret = match request {
            CaptureRequest::Triage(triage) => {
                let mut block = TriageBlock::new(triage);
                let mut control = block.control();
                self.call(command, &mut control, output)
            }
            CaptureRequest::Kernel(kernel) => {
                let mut control = SysDbgLiveDumpControl::from(kernel);
                self.call(command, &mut control, &mut [])
            }
        };
        debug!(
            "NtSystemDebugControl({command}) returned {} with length {}",
            ret.status, ret.returned_length
        );
        ret
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_from_ntdll() {
        assert!(SystemDebugControl::resolve().is_ok());
    }
}
