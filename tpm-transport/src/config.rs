// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Transport configuration.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use fs_err as fs;
use serde::{Deserialize, Serialize};

use crate::{Result, TransportError};

/// In-kernel TPM resource manager node
pub const DEFAULT_DEVICE: &str = "/dev/tpmrm0";
/// Environment override for [`TransportConfig::device`]
pub const DEVICE_ENV: &str = "TPM_TRANSPORT_DEVICE";
/// First response buffer size tried by the growable-buffer framing
pub const DEFAULT_INITIAL_RESPONSE_CAPACITY: usize = 64;
/// Upper bound on any response this transport will allocate
pub const DEFAULT_MAX_RESPONSE_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Device node used by the fixed-header backend. Ignored on Windows.
    pub device: PathBuf,
    pub initial_response_capacity: usize,
    pub max_response_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from(DEFAULT_DEVICE),
            initial_response_capacity: DEFAULT_INITIAL_RESPONSE_CAPACITY,
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
        }
    }
}

impl TransportConfig {
    /// Defaults with the `TPM_TRANSPORT_DEVICE` override applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| TransportError::Config(e.to_string()))?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            TransportError::Config(format!("{}: {e}", path.as_ref().display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_env_overrides(self) -> Self {
        self.with_device_override(std::env::var_os(DEVICE_ENV))
    }

    /// An empty value counts as unset.
    fn with_device_override(mut self, device: Option<OsString>) -> Self {
        if let Some(device) = device.filter(|v| !v.is_empty()) {
            self.device = PathBuf::from(device);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.initial_response_capacity == 0 {
            return Err(TransportError::Config(
                "initial_response_capacity must be non-zero".to_string(),
            ));
        }
        if self.initial_response_capacity > self.max_response_size {
            return Err(TransportError::Config(format!(
                "initial_response_capacity {} exceeds max_response_size {}",
                self.initial_response_capacity, self.max_response_size
            )));
        }
        Ok(())
    }
}
