// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! C ABI for tpm-transport
//!
//! Exposes TPM sessions and their responses to C callers as tagged
//! [`TpmObject`] handles. Every handle that a call populates must be passed
//! to [`tpm_context_close`] exactly once; there is no reference counting and
//! no background reclamation. See `include/tpm_transport.h`.
//!
//! ```c
//! tpm_object_t ctx = {0}, rsp = {0};
//! if (tpm_context_init(&ctx) != TPM_ERROR_SUCCESS) { puts(tpm_last_error()); }
//! if (tpm_context_message(&ctx, cmd, cmd_len, &rsp) == TPM_ERROR_SUCCESS) {
//!     use(tpm_message_get_data(&rsp), tpm_message_get_length(&rsp));
//!     tpm_context_close(&rsp);
//! }
//! tpm_context_close(&ctx);
//! ```

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;
use tpm_transport::{TpmSession, TransportError};
use tracing::warn;

mod last_error;
mod object;

pub use last_error::{tpm_clear_last_error, tpm_last_error};
pub use object::*;

pub const TPM_ERROR_SUCCESS: i32 = 0;
pub const TPM_ERROR_INVALID_OBJECT: i32 = -1;
pub const TPM_ERROR_OPERATION_FAILED: i32 = -2;

/// `tpm_error_t`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum TpmError {
    Success = TPM_ERROR_SUCCESS,
    InvalidObject = TPM_ERROR_INVALID_OBJECT,
    OperationFailed = TPM_ERROR_OPERATION_FAILED,
}

#[derive(Debug, Error)]
pub enum BoundaryError {
    #[error("invalid object: {0}")]
    InvalidObject(&'static str),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("response of {0} bytes does not fit a message object")]
    MessageTooLarge(usize),
    #[error("TPM returned an empty response")]
    EmptyMessage,
    #[error("panic in {0}")]
    Panicked(String),
}

impl BoundaryError {
    pub fn code(&self) -> TpmError {
        match self {
            Self::InvalidObject(_) => TpmError::InvalidObject,
            Self::Transport(_)
            | Self::MessageTooLarge(_)
            | Self::EmptyMessage
            | Self::Panicked(_) => TpmError::OperationFailed,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run one C entry point. Panics must not unwind into the caller, so they
/// are reported as `TPM_ERROR_OPERATION_FAILED`.
fn boundary_call(name: &str, f: impl FnOnce() -> Result<(), BoundaryError>) -> TpmError {
    last_error::clear();
    let result = panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(BoundaryError::Panicked(format!(
            "{name}: {}",
            panic_message(&*payload)
        )))
    });
    match result {
        Ok(()) => TpmError::Success,
        Err(err) => {
            warn!("{name} failed: {err}");
            last_error::set(&err.to_string());
            err.code()
        }
    }
}

/// Open a TPM session and attach it to `object` as a context handle.
///
/// `object` must be uninitialized (zeroed), or tagged `TPM_OBJECT_CONTEXT`
/// with a null session. If the channel cannot be opened, `object` is left as
/// it was and `TPM_ERROR_OPERATION_FAILED` is returned.
///
/// # Safety
///
/// `object` must be null or point to a writable `tpm_object_t`.
#[no_mangle]
pub unsafe extern "C" fn tpm_context_init(object: *mut TpmObject) -> TpmError {
    boundary_call("tpm_context_init", || {
        let object = unsafe { object.as_mut() }
            .ok_or(BoundaryError::InvalidObject("null context object"))?;
        if !object.is_vacant_for(ObjectKind::Context) {
            return Err(BoundaryError::InvalidObject("context object already populated"));
        }
        let session = TpmSession::open()?;
        *object = TpmObject::context(session);
        Ok(())
    })
}

/// Send `msg` through the session behind `context` and store the response in
/// `*response` as a message handle.
///
/// `response` must be uninitialized, or tagged `TPM_OBJECT_MESSAGE` with null
/// data. On any failure `*response` is not written and must not be read or
/// closed.
///
/// # Safety
///
/// `context` and `response` must be null or point to distinct valid
/// `tpm_object_t`s, `context` not released. `msg` must be readable for
/// `msg_length` bytes unless `msg_length` is zero. The session must not be
/// used from another thread during the call.
#[no_mangle]
pub unsafe extern "C" fn tpm_context_message(
    context: *const TpmObject,
    msg: *const u8,
    msg_length: u32,
    response: *mut TpmObject,
) -> TpmError {
    boundary_call("tpm_context_message", || {
        if std::ptr::eq(context, response) {
            return Err(BoundaryError::InvalidObject(
                "context and response are the same object",
            ));
        }
        let context = unsafe { context.as_ref() }
            .ok_or(BoundaryError::InvalidObject("null context object"))?;
        let mut session = context
            .session_ptr()
            .ok_or(BoundaryError::InvalidObject("not a context object"))?;
        let response = unsafe { response.as_mut() }
            .ok_or(BoundaryError::InvalidObject("null response object"))?;
        if !response.is_vacant_for(ObjectKind::Message) {
            return Err(BoundaryError::InvalidObject("response object already populated"));
        }
        let request = match (msg.is_null(), msg_length) {
            (_, 0) => &[][..],
            (true, _) => return Err(BoundaryError::InvalidObject("null message buffer")),
            (false, len) => unsafe { std::slice::from_raw_parts(msg, len as usize) },
        };

        // An empty response is refused by TpmObject::message before
        // *response is written
        let data = unsafe { session.as_mut() }.exchange(request)?;
        *response = TpmObject::message(data)?;
        Ok(())
    })
}

/// Pointer to the bytes of a message handle, or null if `object` is not a
/// populated message. Valid until the handle is closed.
///
/// # Safety
///
/// `object` must be null or point to a valid `tpm_object_t`.
#[no_mangle]
pub unsafe extern "C" fn tpm_message_get_data(object: *const TpmObject) -> *const u8 {
    unsafe { object.as_ref() }
        .and_then(|o| unsafe { o.message_bytes() })
        .map_or(std::ptr::null(), |bytes| bytes.as_ptr())
}

/// Length in bytes of a message handle, or 0 if `object` is not a populated
/// message.
///
/// # Safety
///
/// `object` must be null or point to a valid `tpm_object_t`.
#[no_mangle]
pub unsafe extern "C" fn tpm_message_get_length(object: *const TpmObject) -> u32 {
    unsafe { object.as_ref() }
        .and_then(|o| unsafe { o.message_bytes() })
        .map_or(0, |bytes| bytes.len() as u32)
}

/// Release the resource behind a handle: free a message buffer, or close
/// and free a session. The handle is reset to uninitialized.
///
/// Returns `TPM_ERROR_INVALID_OBJECT` for null, uninitialized or unknown
/// handles, leaving them untouched.
///
/// # Safety
///
/// `object` must be null or point to a writable `tpm_object_t`. Closing a
/// handle after any copy of it was closed is undefined behaviour.
#[no_mangle]
pub unsafe extern "C" fn tpm_context_close(object: *mut TpmObject) -> TpmError {
    boundary_call("tpm_context_close", || {
        let object =
            unsafe { object.as_mut() }.ok_or(BoundaryError::InvalidObject("null object"))?;
        unsafe { object.release() }?;
        Ok(())
    })
}
