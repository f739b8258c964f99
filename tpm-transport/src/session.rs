// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! TPM transport session

use tracing::{debug, warn};

use crate::framing::Transport;
use crate::platform::{self, PlatformTransport};
use crate::{Result, TransportConfig, TransportError};

/// Sole owner of one TPM channel.
///
/// The channel is closed exactly once: by [`close`](Self::close), on drop, or
/// after an exchange leaves it out of step with the TPM. A session is moved,
/// never cloned; [`take`](Self::take) relocates the channel out of a session
/// that is only borrowed.
#[derive(Debug)]
pub struct TpmSession<T: Transport = PlatformTransport> {
    channel: Option<T>,
}

impl TpmSession<PlatformTransport> {
    /// Open the platform TPM channel using [`TransportConfig::from_env`].
    pub fn open() -> Result<Self> {
        Self::open_with(&TransportConfig::from_env())
    }

    pub fn open_with(config: &TransportConfig) -> Result<Self> {
        config.validate()?;
        let channel = platform::open_channel(config)?;
        Ok(Self::from_transport(channel))
    }
}

impl<T: Transport> TpmSession<T> {
    pub fn from_transport(transport: T) -> Self {
        Self {
            channel: Some(transport),
        }
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    /// Send one command and block until its full response has arrived.
    pub fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let channel = self.channel.as_mut().ok_or(TransportError::Closed)?;
        debug!("TPM command: {} bytes", request.len());
        match channel.exchange(request) {
            Ok(response) => Ok(response),
            Err(err) => {
                if err.is_desync() {
                    warn!("closing TPM channel after failed exchange: {err}");
                    self.close();
                }
                Err(err)
            }
        }
    }

    /// Close the channel. Closing a closed session does nothing.
    pub fn close(&mut self) {
        if let Some(channel) = self.channel.take() {
            drop(channel);
            debug!("TPM channel closed");
        }
    }

    /// Move the channel into a new session, leaving this one closed.
    pub fn take(&mut self) -> Self {
        Self {
            channel: self.channel.take(),
        }
    }

    pub fn into_boxed<'a>(mut self) -> TpmSession<Box<dyn Transport + 'a>>
    where
        T: 'a,
    {
        TpmSession {
            channel: self
                .channel
                .take()
                .map(|c| Box::new(c) as Box<dyn Transport + 'a>),
        }
    }
}

impl<T: Transport> Drop for TpmSession<T> {
    fn drop(&mut self) {
        self.close();
    }
}
