// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Error type shared by every stage of the quote pipeline.

use thiserror::Error;

use crate::constants::TpmRc;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Caller supplied data outside of the command contract
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("transport error: {context}")]
    Transport {
        context: String,
        #[source]
        source: std::io::Error,
    },
    /// The TPM rejected the command; the raw response code is preserved
    #[error("TPM command failed: {}", describe_rc(*code))]
    TpmCommand { code: u32 },
    #[error("malformed structure: {0}")]
    MalformedStructure(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("invalid attestation: {0}")]
    InvalidAttestation(String),
    #[error("unexpected attestation type: 0x{found:04x}")]
    UnexpectedAttestationType { found: u16 },
    #[error("PCR digest length mismatch: expected {expected} bytes, got {actual}")]
    DigestLengthMismatch { expected: usize, actual: usize },
    #[error("signature verification failed: {0}")]
    SignatureVerificationFailed(String),
    #[error("unsupported algorithm: 0x{0:04x}")]
    UnsupportedAlgorithm(u16),
}

impl Error {
    /// Build a closure wrapping an I/O error with transport context, for use with `map_err`
    pub(crate) fn transport(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> Self {
        let context = context.into();
        move |source| Error::Transport { context, source }
    }

    /// Raw TPM response code, if this error came from the device
    pub fn tpm_response_code(&self) -> Option<u32> {
        match self {
            Error::TpmCommand { code } => Some(*code),
            _ => None,
        }
    }
}

fn describe_rc(code: u32) -> String {
    match TpmRc::from_u32(code) {
        Some(rc) => format!("0x{code:08x} ({rc:?})"),
        None => format!("0x{code:08x}"),
    }
}
