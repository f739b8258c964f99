// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

use crate::framing::Transport;
use crate::{Result, TransportConfig, TransportError};

/// No TPM channel exists on this target; never constructed.
#[derive(Debug)]
pub enum PlatformTransport {}

impl Transport for PlatformTransport {
    fn exchange(&mut self, _request: &[u8]) -> Result<Vec<u8>> {
        match *self {}
    }
}

pub(crate) fn open_channel(_config: &TransportConfig) -> Result<PlatformTransport> {
    Err(TransportError::ChannelUnavailable(
        "not supported on this platform".to_string(),
    ))
}
