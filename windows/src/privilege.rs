//! Token privileges of the current process.

use std::{
    io,
    os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle},
    ptr,
};

use capture::{CaptureError, DEBUG_PRIVILEGE, PrivilegeManager, Result};
use log::debug;
use windows_sys::Win32::{
    Foundation::{ERROR_NOT_ALL_ASSIGNED, HANDLE, LUID},
    Security::{
        AdjustTokenPrivileges, LUID_AND_ATTRIBUTES, LookupPrivilegeValueW, SE_PRIVILEGE_ENABLED,
        TOKEN_ADJUST_PRIVILEGES, TOKEN_PRIVILEGES,
    },
    System::Threading::{GetCurrentProcess, OpenProcessToken},
};

use crate::util::to_wide_null;

/// A named privilege on the token of the current process.
///
/// `acquire` enables it, `release` disables it again. Disabling an already
/// disabled privilege is a no-op for the token, so `release` can be repeated.
pub struct TokenPrivilege {
    name: &'static str,
    luid: Option<LUID>,
}

impl TokenPrivilege {
    pub fn new(name: &'static str) -> Self {
        Self { name, luid: None }
    }

    /// `SeDebugPrivilege`, which the debug control interface requires.
    pub fn debug() -> Self {
        Self::new(DEBUG_PRIVILEGE)
    }

    fn luid(&mut self) -> io::Result<LUID> {
        if let Some(luid) = self.luid {
            return Ok(luid);
        }

        let name = to_wide_null(self.name);
        let mut luid = LUID {
            LowPart: 0,
            HighPart: 0,
        };
        // SAFETY: `name` is null-terminated and `luid` is a valid out pointer
        if unsafe { LookupPrivilegeValueW(ptr::null(), name.as_ptr(), &mut luid) } == 0 {
            return Err(io::Error::last_os_error());
        }
        self.luid = Some(luid);
        Ok(luid)
    }

    fn adjust(&mut self, attributes: u32) -> io::Result<()> {
        let luid = self.luid()?;
        let token = open_process_token()?;

        let privileges = TOKEN_PRIVILEGES {
            PrivilegeCount: 1,
            Privileges: [LUID_AND_ATTRIBUTES {
                Luid: luid,
                Attributes: attributes,
            }],
        };

        // SAFETY: `token` is open with TOKEN_ADJUST_PRIVILEGES and `privileges`
        // holds exactly one entry
        let ok = unsafe {
            AdjustTokenPrivileges(
                token.as_raw_handle(),
                0,
                &privileges,
                0,
                ptr::null_mut(),
                ptr::null_mut(),
            )
        };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }

        // success with ERROR_NOT_ALL_ASSIGNED means the token does not hold the privilege
        let last_error = io::Error::last_os_error();
        if last_error.raw_os_error() == Some(ERROR_NOT_ALL_ASSIGNED as i32) {
            return Err(last_error);
        }
        Ok(())
    }
}

impl PrivilegeManager for TokenPrivilege {
    fn acquire(&mut self) -> Result<()> {
        self.adjust(SE_PRIVILEGE_ENABLED)
            .map_err(|source| CaptureError::Privilege {
                privilege: self.name,
                action: "enable",
                source,
            })?;
        debug!("Enabled {}", self.name);
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.adjust(0).map_err(|source| CaptureError::Privilege {
            privilege: self.name,
            action: "disable",
            source,
        })?;
        debug!("Disabled {}", self.name);
        Ok(())
    }
}

fn open_process_token() -> io::Result<OwnedHandle> {
    let mut token: HANDLE = ptr::null_mut();
    // SAFETY: The pseudo handle of the current process is always valid
    if unsafe { OpenProcessToken(GetCurrentProcess(), TOKEN_ADJUST_PRIVILEGES, &mut token) } == 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `token` was just opened and is owned by nobody else
    Ok(unsafe { OwnedHandle::from_raw_handle(token) })
}
