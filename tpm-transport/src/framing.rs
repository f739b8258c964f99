// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Response framing strategies
//!
//! The TPM does not announce response sizes up front, so each platform
//! channel needs its own way of finding where a response ends:
//!
//! - [`FixedHeader`] reads the 6-byte response prefix (tag + size) from a
//!   byte stream and then reads exactly the remaining body.
//! - [`GrowableBuffer`] hands a buffer to a submission primitive that reports
//!   when the buffer is too small, growing and resubmitting until it fits.

use std::io::{ErrorKind, Read, Write};

use tracing::debug;

use crate::config::{DEFAULT_INITIAL_RESPONSE_CAPACITY, DEFAULT_MAX_RESPONSE_SIZE};
use crate::{Result, TransportError};

/// Tag (2) + size (4). The response code is read as part of the body.
pub const RESPONSE_HEADER_SIZE: usize = 6;

/// One blocking request/response exchange with a TPM.
pub trait Transport {
    fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        (**self).exchange(request)
    }
}

/// Extract the total response length from a response header.
pub fn response_size(header: &[u8; RESPONSE_HEADER_SIZE]) -> usize {
    u32::from_be_bytes([header[2], header[3], header[4], header[5]]) as usize
}

/// Fixed-header framing over a byte stream such as a TPM character device.
#[derive(Debug)]
pub struct FixedHeader<D> {
    device: D,
    max_response_size: usize,
}

impl<D: Read + Write> FixedHeader<D> {
    pub fn new(device: D) -> Self {
        Self::with_limit(device, DEFAULT_MAX_RESPONSE_SIZE)
    }

    pub fn with_limit(device: D, max_response_size: usize) -> Self {
        Self {
            device,
            max_response_size,
        }
    }

    pub fn get_ref(&self) -> &D {
        &self.device
    }

    pub fn into_inner(self) -> D {
        self.device
    }

    fn write_command(&mut self, request: &[u8]) -> Result<()> {
        // The device consumes one command per write call
        let written = loop {
            match self.device.write(request) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransportError::Write(e)),
            }
        };
        if written != request.len() {
            return Err(TransportError::PartialWrite {
                written,
                expected: request.len(),
            });
        }
        self.device.flush().map_err(TransportError::Write)
    }

    fn read_full(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.device.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(TransportError::ShortRead {
                        expected: buf.len(),
                        actual: filled,
                    })
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransportError::Read(e)),
            }
        }
        Ok(())
    }
}

impl<D: Read + Write> Transport for FixedHeader<D> {
    fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        self.write_command(request)?;

        let mut header = [0u8; RESPONSE_HEADER_SIZE];
        self.read_full(&mut header)?;

        let total = response_size(&header);
        if total < RESPONSE_HEADER_SIZE {
            return Err(TransportError::InvalidResponseSize(total));
        }
        if total > self.max_response_size {
            return Err(TransportError::ResponseTooLarge {
                size: total,
                limit: self.max_response_size,
            });
        }

        let mut response = vec![0u8; total];
        response[..RESPONSE_HEADER_SIZE].copy_from_slice(&header);
        self.read_full(&mut response[RESPONSE_HEADER_SIZE..])?;

        debug!(
            "TPM exchange: {} byte command, {} byte response",
            request.len(),
            total
        );
        Ok(response)
    }
}

/// Result of a single call to a [`Submit`] primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The response was written; holds its length.
    Complete(usize),
    /// The buffer could not hold the response. `required` is the size the
    /// platform asked for, or 0 when it did not say.
    BufferTooSmall { required: usize },
    /// Any other platform status.
    Failed(u32),
}

/// A platform primitive that submits a command and fills a caller buffer.
pub trait Submit {
    fn submit(&mut self, request: &[u8], response: &mut [u8]) -> SubmitOutcome;
}

/// Growable-buffer framing over a [`Submit`] primitive.
#[derive(Debug)]
pub struct GrowableBuffer<S> {
    submitter: S,
    initial_capacity: usize,
    max_response_size: usize,
}

impl<S: Submit> GrowableBuffer<S> {
    pub fn new(submitter: S) -> Self {
        Self::with_limits(
            submitter,
            DEFAULT_INITIAL_RESPONSE_CAPACITY,
            DEFAULT_MAX_RESPONSE_SIZE,
        )
    }

    pub fn with_limits(submitter: S, initial_capacity: usize, max_response_size: usize) -> Self {
        let max_response_size = max_response_size.max(RESPONSE_HEADER_SIZE);
        Self {
            submitter,
            initial_capacity: initial_capacity.clamp(1, max_response_size),
            max_response_size,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.submitter
    }

    pub fn into_inner(self) -> S {
        self.submitter
    }
}

impl<S: Submit> Transport for GrowableBuffer<S> {
    fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        if u32::try_from(request.len()).is_err() {
            return Err(TransportError::RequestTooLarge(request.len()));
        }

        let mut response = vec![0u8; self.initial_capacity];
        loop {
            match self.submitter.submit(request, &mut response) {
                SubmitOutcome::Complete(len) => {
                    if len == 0 || len > response.len() {
                        return Err(TransportError::InvalidResponseSize(len));
                    }
                    response.truncate(len);
                    debug!(
                        "TPM exchange: {} byte command, {} byte response",
                        request.len(),
                        len
                    );
                    return Ok(response);
                }
                SubmitOutcome::BufferTooSmall { required } => {
                    let capacity = response.len();
                    let next = if required > capacity {
                        required
                    } else {
                        capacity.saturating_mul(2)
                    };
                    // Growth must make progress and stay bounded
                    if next <= capacity || next > self.max_response_size {
                        return Err(TransportError::ResponseTooLarge {
                            size: next,
                            limit: self.max_response_size,
                        });
                    }
                    debug!("growing TPM response buffer from {capacity} to {next} bytes");
                    response.resize(next, 0);
                }
                SubmitOutcome::Failed(status) => {
                    return Err(TransportError::ExchangeFailed(status));
                }
            }
        }
    }
}
