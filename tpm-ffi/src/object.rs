// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Tagged handles shared with C callers.
//!
//! A [`TpmObject`] is plain old data owned by the caller. It only refers to
//! a heap resource owned by this library: a boxed [`FfiSession`] for
//! `TPM_OBJECT_CONTEXT`, or a boxed byte slice for `TPM_OBJECT_MESSAGE`.
//! The resource lives until the handle is passed to `tpm_context_close`.

use std::ffi::c_void;
use std::ptr::{self, NonNull};

use tpm_transport::{TpmSession, Transport};

use crate::BoundaryError;

pub const TPM_OBJECT_NONE: i32 = 0;
pub const TPM_OBJECT_CONTEXT: i32 = 1;
pub const TPM_OBJECT_MESSAGE: i32 = 2;

/// Session type held behind a context handle.
pub type FfiSession = TpmSession<Box<dyn Transport>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ObjectKind {
    Context = TPM_OBJECT_CONTEXT,
    Message = TPM_OBJECT_MESSAGE,
}

impl TryFrom<i32> for ObjectKind {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            TPM_OBJECT_CONTEXT => Ok(Self::Context),
            TPM_OBJECT_MESSAGE => Ok(Self::Message),
            other => Err(other),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TpmContextRef {
    pub session: *mut c_void,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TpmMessageRef {
    pub data: *mut u8,
    pub length: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union TpmObjectPayload {
    pub context: TpmContextRef,
    pub message: TpmMessageRef,
}

/// `tpm_object_t`
///
/// `kind` is kept as a raw integer because C code writes it; it is decoded
/// with [`ObjectKind::try_from`] before the payload is touched.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct TpmObject {
    pub kind: i32,
    pub payload: TpmObjectPayload,
}

impl std::fmt::Debug for TpmObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("TpmObject");
        s.field("kind", &self.kind);
        // SAFETY: the tag selects the populated union field
        match self.kind() {
            Some(ObjectKind::Context) => s.field("context", unsafe { &self.payload.context }),
            Some(ObjectKind::Message) => s.field("message", unsafe { &self.payload.message }),
            None => &mut s,
        };
        s.finish()
    }
}

impl Default for TpmObject {
    fn default() -> Self {
        Self::empty()
    }
}

impl TpmObject {
    /// An uninitialized handle, identical to a zeroed C struct.
    pub const fn empty() -> Self {
        Self {
            kind: TPM_OBJECT_NONE,
            payload: TpmObjectPayload {
                message: TpmMessageRef {
                    data: ptr::null_mut(),
                    length: 0,
                },
            },
        }
    }

    /// Wrap a session in a new context handle. The session is owned by the
    /// handle until it is released.
    pub fn context<T: Transport + 'static>(session: TpmSession<T>) -> Self {
        let session: Box<FfiSession> = Box::new(session.into_boxed());
        Self {
            kind: TPM_OBJECT_CONTEXT,
            payload: TpmObjectPayload {
                context: TpmContextRef {
                    session: Box::into_raw(session).cast(),
                },
            },
        }
    }

    /// Move a response buffer into a new message handle. Empty buffers are
    /// refused; a message handle always carries at least one byte.
    pub fn message(data: Vec<u8>) -> Result<Self, BoundaryError> {
        if data.is_empty() {
            return Err(BoundaryError::EmptyMessage);
        }
        let length =
            u32::try_from(data.len()).map_err(|_| BoundaryError::MessageTooLarge(data.len()))?;
        let data = Box::into_raw(data.into_boxed_slice());
        Ok(Self {
            kind: TPM_OBJECT_MESSAGE,
            payload: TpmObjectPayload {
                message: TpmMessageRef {
                    data: data.cast(),
                    length,
                },
            },
        })
    }

    pub fn kind(&self) -> Option<ObjectKind> {
        ObjectKind::try_from(self.kind).ok()
    }

    /// Whether the handle may be populated as `kind`: either uninitialized,
    /// or already tagged `kind` with nothing attached.
    pub fn is_vacant_for(&self, kind: ObjectKind) -> bool {
        if self.kind == TPM_OBJECT_NONE {
            return true;
        }
        if self.kind() != Some(kind) {
            return false;
        }
        // SAFETY: the tag selects the populated union field
        match kind {
            ObjectKind::Context => unsafe { self.payload.context.session.is_null() },
            ObjectKind::Message => unsafe { self.payload.message.data.is_null() },
        }
    }

    /// The session behind a populated context handle.
    pub fn session_ptr(&self) -> Option<NonNull<FfiSession>> {
        if self.kind() != Some(ObjectKind::Context) {
            return None;
        }
        // SAFETY: the tag selects the populated union field
        NonNull::new(unsafe { self.payload.context.session }.cast())
    }

    /// The bytes behind a populated message handle.
    ///
    /// # Safety
    ///
    /// A `Message` handle must have been produced by [`TpmObject::message`]
    /// and not released, with `data` and `length` unmodified.
    pub unsafe fn message_bytes(&self) -> Option<&[u8]> {
        if self.kind() != Some(ObjectKind::Message) {
            return None;
        }
        let message = unsafe { self.payload.message };
        if message.data.is_null() {
            return None;
        }
        Some(unsafe { std::slice::from_raw_parts(message.data, message.length as usize) })
    }

    /// Free the resource behind the handle and reset it to uninitialized.
    ///
    /// # Safety
    ///
    /// The handle must have been populated by this library and not released
    /// through any copy of it.
    pub unsafe fn release(&mut self) -> Result<ObjectKind, BoundaryError> {
        let kind = self
            .kind()
            .ok_or(BoundaryError::InvalidObject("unrecognized object kind"))?;
        match kind {
            ObjectKind::Context => {
                let session = self
                    .session_ptr()
                    .ok_or(BoundaryError::InvalidObject("context object has no session"))?;
                // Dropping the session closes its channel
                drop(unsafe { Box::from_raw(session.as_ptr()) });
            }
            ObjectKind::Message => {
                let message = unsafe { self.payload.message };
                if message.data.is_null() {
                    return Err(BoundaryError::InvalidObject("message object has no data"));
                }
                let bytes = ptr::slice_from_raw_parts_mut(message.data, message.length as usize);
                drop(unsafe { Box::from_raw(bytes) });
            }
        }
        *self = Self::empty();
        Ok(kind)
    }
}
