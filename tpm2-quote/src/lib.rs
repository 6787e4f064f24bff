// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Minimal TPM 2.0 quote client
//!
//! Builds `TPM2_Quote` commands, carries them to a TPM over a pluggable
//! [`Transport`], decodes the signed `TPMS_ATTEST` and `TPMT_SIGNATURE` from
//! the response, validates them, and renders them as ordered JSON.
//!
//! ## Transports
//!
//! - **Character device**: `/dev/tpmrm0` or `/dev/tpm0`
//! - **Simulator**: the Microsoft/IBM reference simulator over TCP
//!
//! ## Supported Commands
//!
//! - Attestation: `Quote`
//! - Keys: `ReadPublic`
//! - Random: `GetRandom`
//! - Lifecycle: `Startup`
//!
//! ## Example
//!
//! ```no_run
//! use tpm2_quote::{QuoteRequest, TpmContext, TpmlPcrSelection};
//!
//! let mut ctx = TpmContext::open(None)?; // Auto-detect TPM transport
//! let pcrs: TpmlPcrSelection = "sha256:0,1,2,3".parse()?;
//! let quote = ctx.quote_with_signer(QuoteRequest::new(0x810100AA, pcrs, b"Ian12345".to_vec()))?;
//! println!("{}", serde_json::Value::Object(tpm2_quote::to_interchange(&quote.attest)));
//! # Ok::<(), tpm2_quote::Error>(())
//! ```

mod commands;
mod constants;
mod device;
mod error;
mod interchange;
mod marshal;
mod mssim;
mod quote;
mod response;
mod session;
mod tcti;
mod types;
mod verify;

pub use commands::*;
pub use constants::*;
pub use error::{Error, Result};
pub use interchange::{quote_to_interchange, signature_to_interchange, to_interchange};
pub use quote::{QuoteEvidence, QuoteOperation, QuoteRequest, QuoteState, VerifiedQuote};
pub use response::{decode_quote_response, parse_quote_response, validate_quote};
pub use tcti::Tcti;
pub use types::*;
pub use verify::{check_signer, hash_data, verify_quote_signature, verify_signature, PublicKey};

// Re-export transports and framing for advanced usage
pub use device::{TpmCommand, TpmDevice, TpmResponse, Transport, TPM_HEADER_SIZE};
pub use marshal::{CommandBuffer, Marshal, ResponseBuffer, Unmarshal};
pub use mssim::MsSimTransport;
pub use session::AuthSession;
