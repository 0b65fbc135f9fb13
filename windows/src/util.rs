use std::{
    ffi::{OsStr, OsString},
    os::windows::ffi::{OsStrExt, OsStringExt},
};

/// Retrieve the length of `s`, a null-terminated UTF-16 string.
///
/// # Safety
///
/// `s` must be null-terminated.
pub unsafe fn wcslen(s: *const u16) -> usize {
    let mut len = 0;
    // SAFETY: `s` is null-terminated, so every offset up to the terminator is readable
    while unsafe { std::ptr::read_unaligned(s.add(len)) } != 0 {
        len += 1;
    }
    len
}

/// Convert `s` into an `OsString`.
///
/// # Safety
///
/// `s` must be null-terminated, initialized, and aligned.
pub unsafe fn osstring_from_wide(s: *const u16) -> OsString {
    // SAFETY: `s` is null-terminated
    let len = unsafe { wcslen(s) };
    // SAFETY: `s` holds `len` initialized characters
    let slice = unsafe { std::slice::from_raw_parts(s, len) };
    OsString::from_wide(slice)
}

/// Convert `s` into a null-terminated wide string.
pub fn to_wide_null(s: impl AsRef<OsStr>) -> Vec<u16> {
    s.as_ref()
        .encode_wide()
        .chain(std::iter::once(0u16))
        .collect()
}
