// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Per-thread diagnostic text for the last failed boundary call.

use std::cell::RefCell;
use std::ffi::{c_char, CString};

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

pub(crate) fn set(message: &str) {
    let text = CString::new(message.replace('\0', " ")).unwrap_or_default();
    LAST_ERROR.with_borrow_mut(|e| *e = Some(text));
}

pub(crate) fn clear() {
    LAST_ERROR.with_borrow_mut(|e| *e = None);
}

/// Text describing the last failure of a `tpm_error_t` call on this thread,
/// or null if the last such call succeeded.
///
/// The string is owned by the library and stays valid until the next
/// `tpm_error_t` call on the same thread.
#[no_mangle]
pub extern "C" fn tpm_last_error() -> *const c_char {
    LAST_ERROR.with_borrow(|e| e.as_ref().map_or(std::ptr::null(), |s| s.as_ptr()))
}

#[no_mangle]
pub extern "C" fn tpm_clear_last_error() {
    clear();
}
