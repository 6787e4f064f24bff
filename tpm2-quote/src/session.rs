// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! TPM 2.0 authorization session descriptors
//!
//! Sessions are established elsewhere; this module only sizes and places the
//! `TPMS_AUTH_COMMAND` that rides along with a command.

use crate::constants::*;
use crate::error::{Error, Result};
use crate::marshal::*;

/// Largest nonce or HMAC a session may carry: one SHA-512 digest
pub const MAX_SESSION_VALUE_SIZE: usize = 64;

/// Authorization for one command handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub handle: u32,
    pub nonce: Vec<u8>,
    pub attributes: TpmaSa,
    /// HMAC for HMAC/policy sessions, or the password for `TPM_RS_PW`
    pub hmac: Vec<u8>,
}

impl AuthSession {
    /// Password session with an empty auth value
    pub fn password() -> Self {
        Self::password_with(&[])
    }

    /// Password session carrying `auth` in the clear
    pub fn password_with(auth: &[u8]) -> Self {
        Self {
            handle: tpm_rh::PW,
            nonce: Vec::new(),
            attributes: TpmaSa::new(),
            hmac: auth.to_vec(),
        }
    }

    /// Previously started policy session, kept open after the command
    pub fn policy(session_handle: u32) -> Self {
        Self {
            handle: session_handle,
            nonce: Vec::new(),
            attributes: TpmaSa::new().with_continue_session(),
            hmac: Vec::new(),
        }
    }

    /// Size of the marshalled `TPMS_AUTH_COMMAND`
    pub fn encoded_len(&self) -> usize {
        4 + 2 + self.nonce.len() + 1 + 2 + self.hmac.len()
    }

    /// Check that the nonce and HMAC fit their `TPM2B` fields
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [("nonce", &self.nonce), ("hmac", &self.hmac)] {
            if value.len() > MAX_SESSION_VALUE_SIZE {
                return Err(Error::InvalidArgument(format!(
                    "session {field} is {} bytes, at most {MAX_SESSION_VALUE_SIZE} allowed",
                    value.len()
                )));
            }
        }
        Ok(())
    }
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::password()
    }
}

impl Marshal for AuthSession {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_u32(self.handle);
        buf.put_tpm2b(&self.nonce);
        buf.put_u8(self.attributes.0);
        buf.put_tpm2b(&self.hmac);
    }
}
