//! Elevation of the calling process for the duration of a capture.

use crate::error::Result;

/// Privilege the privileged debug control interface insists on.
pub const DEBUG_PRIVILEGE: &str = "SeDebugPrivilege";

/// Enables and disables a named privilege on the current process token.
///
/// `release` must be safe to call when `acquire` never ran or failed partway,
/// and calling it twice must be harmless.
pub trait PrivilegeManager {
    /// Look up the privilege and enable it on the process token.
    fn acquire(&mut self) -> Result<()>;

    /// Disable the privilege again.
    fn release(&mut self) -> Result<()>;
}

impl<P: PrivilegeManager + ?Sized> PrivilegeManager for &mut P {
    fn acquire(&mut self) -> Result<()> {
        (**self).acquire()
    }

    fn release(&mut self) -> Result<()> {
        (**self).release()
    }
}
