// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! TPM Base Services backend.
//!
//! TBS reports `TBS_E_INSUFFICIENT_BUFFER` when the result buffer is too
//! small, so this backend uses the growable-buffer framing.

use std::ffi::c_void;

use tracing::info;

use crate::framing::{GrowableBuffer, Submit, SubmitOutcome};
use crate::{Result, TransportConfig, TransportError};

pub type PlatformTransport = GrowableBuffer<TbsContext>;

// ============================================================================
// tbs.h
// ============================================================================

type TbsResult = u32;
type TbsHContext = *mut c_void;

const TBS_SUCCESS: TbsResult = 0;
const TBS_E_INSUFFICIENT_BUFFER: TbsResult = 0x8028_4005;
const TBS_CONTEXT_VERSION_TWO: u32 = 2;
const TBS_COMMAND_LOCALITY_ZERO: u32 = 0;
const TBS_COMMAND_PRIORITY_NORMAL: u32 = 200;

// TBS_CONTEXT_PARAMS2 bitfield: requestRaw, includeTpm12, includeTpm20
const TBS_INCLUDE_TPM20: u32 = 1 << 2;

#[repr(C)]
struct TbsContextParams2 {
    version: u32,
    flags: u32,
}

#[link(name = "tbs")]
extern "system" {
    fn Tbsi_Context_Create(
        params: *const TbsContextParams2,
        context: *mut TbsHContext,
    ) -> TbsResult;
    fn Tbsip_Context_Close(context: TbsHContext) -> TbsResult;
    fn Tbsip_Submit_Command(
        context: TbsHContext,
        locality: u32,
        priority: u32,
        command: *const u8,
        command_len: u32,
        result: *mut u8,
        result_len: *mut u32,
    ) -> TbsResult;
}

/// Owned TBS context handle, closed on drop.
#[derive(Debug)]
pub struct TbsContext {
    handle: TbsHContext,
}

impl TbsContext {
    pub fn create() -> Result<Self> {
        let params = TbsContextParams2 {
            version: TBS_CONTEXT_VERSION_TWO,
            flags: TBS_INCLUDE_TPM20,
        };
        let mut handle: TbsHContext = std::ptr::null_mut();
        let ret = unsafe { Tbsi_Context_Create(&params, &mut handle) };
        if ret != TBS_SUCCESS {
            return Err(TransportError::ChannelUnavailable(format!(
                "Tbsi_Context_Create: 0x{ret:08x}"
            )));
        }
        Ok(Self { handle })
    }
}

impl Submit for TbsContext {
    fn submit(&mut self, request: &[u8], response: &mut [u8]) -> SubmitOutcome {
        // GrowableBuffer rejects commands longer than u32::MAX
        let mut result_len = u32::try_from(response.len()).unwrap_or(u32::MAX);
        let ret = unsafe {
            Tbsip_Submit_Command(
                self.handle,
                TBS_COMMAND_LOCALITY_ZERO,
                TBS_COMMAND_PRIORITY_NORMAL,
                request.as_ptr(),
                request.len() as u32,
                response.as_mut_ptr(),
                &mut result_len,
            )
        };
        match ret {
            TBS_SUCCESS => SubmitOutcome::Complete(result_len as usize),
            TBS_E_INSUFFICIENT_BUFFER => SubmitOutcome::BufferTooSmall {
                required: result_len as usize,
            },
            status => SubmitOutcome::Failed(status),
        }
    }
}

impl Drop for TbsContext {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            unsafe { Tbsip_Context_Close(self.handle) };
            self.handle = std::ptr::null_mut();
        }
    }
}

pub(crate) fn open_channel(config: &TransportConfig) -> Result<PlatformTransport> {
    let context = TbsContext::create()?;
    info!("opened TBS context");
    Ok(GrowableBuffer::with_limits(
        context,
        config.initial_response_capacity,
        config.max_response_size,
    ))
}
