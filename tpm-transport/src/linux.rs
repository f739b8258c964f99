// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Character-device backend (`/dev/tpmrm0`).

use std::fs::{File, OpenOptions};

use tracing::info;

use crate::framing::FixedHeader;
use crate::{Result, TransportConfig, TransportError};

pub type PlatformTransport = FixedHeader<File>;

pub(crate) fn open_channel(config: &TransportConfig) -> Result<PlatformTransport> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&config.device)
        .map_err(|e| {
            TransportError::ChannelUnavailable(format!("{}: {e}", config.device.display()))
        })?;
    info!("opened TPM device {}", config.device.display());
    Ok(FixedHeader::with_limit(file, config.max_response_size))
}
