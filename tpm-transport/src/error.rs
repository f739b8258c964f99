// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unable to open TPM channel: {0}")]
    ChannelUnavailable(String),
    #[error("TPM session is closed")]
    Closed,
    #[error("partial write of TPM command: {written} of {expected} bytes accepted")]
    PartialWrite { written: usize, expected: usize },
    #[error("short read of TPM response: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },
    #[error("failed to write TPM command: {0}")]
    Write(#[source] std::io::Error),
    #[error("failed to read TPM response: {0}")]
    Read(#[source] std::io::Error),
    #[error("invalid TPM response size: {0}")]
    InvalidResponseSize(usize),
    #[error("TPM response too large: {size} bytes exceeds limit of {limit}")]
    ResponseTooLarge { size: usize, limit: usize },
    #[error("TPM command too large: {0} bytes")]
    RequestTooLarge(usize),
    #[error("TPM exchange failed with status 0x{0:08x}")]
    ExchangeFailed(u32),
    #[error("invalid transport config: {0}")]
    Config(String),
}

impl TransportError {
    /// Whether the channel may be out of step with the TPM after this error.
    ///
    /// A session that hits one of these must be closed, not reused.
    pub fn is_desync(&self) -> bool {
        matches!(
            self,
            Self::PartialWrite { .. }
                | Self::ShortRead { .. }
                | Self::Write(_)
                | Self::Read(_)
                | Self::InvalidResponseSize(_)
                | Self::ResponseTooLarge { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
