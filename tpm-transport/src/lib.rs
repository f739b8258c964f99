// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Minimal TPM 2.0 transport
//!
//! Sends raw TPM command bytes to the platform resource manager and returns
//! the raw response bytes. Commands and responses are opaque; only the size
//! field of the response header is interpreted, to find where it ends.
//!
//! ## Platforms
//!
//! - **Unix**: the in-kernel resource manager `/dev/tpmrm0`, using
//!   fixed-header framing.
//! - **Windows**: TPM Base Services (TPM 2.0, locality 0, normal priority),
//!   using growable-buffer framing.
//!
//! ## Example
//!
//! ```no_run
//! use tpm_transport::TpmSession;
//!
//! let mut session = TpmSession::open()?;
//! // TPM2_GetRandom(8)
//! let command = [0x80, 0x01, 0, 0, 0, 0x0c, 0, 0, 0x01, 0x7b, 0, 0x08];
//! let response = session.exchange(&command)?;
//! # Ok::<(), tpm_transport::TransportError>(())
//! ```

mod config;
mod error;
mod framing;
mod session;

#[cfg(unix)]
mod linux;
#[cfg(unix)]
use linux as platform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as platform;
#[cfg(windows)]
pub use windows::TbsContext;

#[cfg(not(any(unix, windows)))]
mod dummy;
#[cfg(not(any(unix, windows)))]
use dummy as platform;

pub use config::*;
pub use error::{Result, TransportError};
pub use framing::{
    response_size, FixedHeader, GrowableBuffer, Submit, SubmitOutcome, Transport,
    RESPONSE_HEADER_SIZE,
};
pub use platform::PlatformTransport;
pub use session::TpmSession;
