#![allow(unused)]

use anyhow::{Context, Result, bail};
use std::ffi::{CStr, CString};

// pthread caps thread names at 16 bytes, terminator included.
const NAME_CAP: usize = 16;

// `std::thread` offers no way to rename a thread that is already running, and
// the main lane lives on whatever thread called initialize, so the rename
// goes through the platform interface.
#[cfg(target_os = "linux")]
pub(crate) fn set_current_thread_name(name: &str) {
    let mut bytes = name.as_bytes().to_vec();
    bytes.truncate(NAME_CAP - 1);

    // An interior NUL cannot be expressed in a pthread name; keep the old one.
    let Ok(c_name) = CString::new(bytes) else {
        return;
    };

    unsafe {
        libc::pthread_setname_np(libc::pthread_self(), c_name.as_ptr());
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn set_current_thread_name(_name: &str) {}

/// Reads back the current thread's pthread name.
#[cfg(target_os = "linux")]
pub(crate) fn get_current_thread_name() -> Result<String> {
    let mut buf = [0u8; NAME_CAP];

    let rc = unsafe {
        libc::pthread_getname_np(libc::pthread_self(), buf.as_mut_ptr().cast(), buf.len())
    };
    if rc != 0 {
        bail!("pthread_getname_np returned {rc}");
    }

    let name = CStr::from_bytes_until_nul(&buf).context("thread name is not null terminated")?;
    Ok(name.to_str().context("thread name is not valid utf-8")?.to_owned())
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn get_current_thread_name() -> Result<String> {
    bail!("thread names are only readable on linux")
}
