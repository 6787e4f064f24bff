// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Quote orchestration
//!
//! A [`QuoteOperation`] walks one `TPM2_Quote` round trip through explicit
//! states:
//!
//! ```text
//! Idle -> CommandBuilt -> Sent -> ResponseReceived -> Parsed -> Validated
//!   \________\______________\___________\________________\____-> Failed
//! ```
//!
//! Each call to [`QuoteOperation::step`] performs exactly one transition.
//! Failures are terminal and nothing is retried.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::commands::build_quote_with_scheme;
use crate::device::Transport;
use crate::error::{Error, Result};
use crate::marshal::{Marshal, Unmarshal};
use crate::response::{decode_quote_response, validate_quote};
use crate::session::AuthSession;
use crate::types::*;
use crate::verify::{check_signer, verify_quote_signature, PublicKey};

/// What to quote and how to authorize it
#[derive(Debug, Clone)]
pub struct QuoteRequest {
    pub signing_handle: u32,
    pub pcr_selection: TpmlPcrSelection,
    pub qualifying_data: Vec<u8>,
    pub session: AuthSession,
    pub scheme: TpmtSigScheme,
}

impl QuoteRequest {
    /// Quote with an empty password and the key's own signing scheme
    pub fn new(
        signing_handle: u32,
        pcr_selection: TpmlPcrSelection,
        qualifying_data: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            signing_handle,
            pcr_selection,
            qualifying_data: qualifying_data.into(),
            session: AuthSession::password(),
            scheme: TpmtSigScheme::null(),
        }
    }

    pub fn with_session(mut self, session: AuthSession) -> Self {
        self.session = session;
        self
    }

    pub fn with_scheme(mut self, scheme: TpmtSigScheme) -> Self {
        self.scheme = scheme;
        self
    }
}

/// A validated quote
#[derive(Debug, Clone)]
pub struct VerifiedQuote {
    pub attest: TpmsAttest,
    pub signature: TpmtSignature,
    /// Whether the signature was checked against a verifying key
    pub signature_verified: bool,
}

impl VerifiedQuote {
    pub fn quote_info(&self) -> Option<&TpmsQuoteInfo> {
        self.attest.quote_info()
    }

    /// Portable form for handing the quote to a remote verifier
    pub fn evidence(&self) -> QuoteEvidence {
        QuoteEvidence {
            message: self.attest.to_bytes(),
            signature: self.signature.to_bytes(),
        }
    }
}

/// Serialized quote: the signed `TPMS_ATTEST` and its `TPMT_SIGNATURE`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteEvidence {
    /// TPMS_ATTEST message
    #[serde(with = "hex")]
    pub message: Vec<u8>,

    /// Quote signature
    #[serde(with = "hex")]
    pub signature: Vec<u8>,
}

impl QuoteEvidence {
    /// Decode both halves, validate the quote and check its signature
    pub fn verify(&self, key: &PublicKey) -> Result<(TpmsAttest, TpmtSignature)> {
        let attest = TpmsAttest::from_bytes(&self.message)?;
        let signature = TpmtSignature::from_bytes(&self.signature)?;
        validate_quote(&attest)?;
        verify_quote_signature(&attest, &signature, key)?;
        Ok((attest, signature))
    }
}

/// Where a [`QuoteOperation`] currently stands
#[derive(Debug)]
pub enum QuoteState {
    Idle,
    CommandBuilt(Vec<u8>),
    Sent,
    ResponseReceived(Vec<u8>),
    Parsed {
        attest: TpmsAttest,
        signature: TpmtSignature,
    },
    Validated(VerifiedQuote),
    Failed(Error),
}

impl QuoteState {
    pub fn name(&self) -> &'static str {
        match self {
            QuoteState::Idle => "Idle",
            QuoteState::CommandBuilt(_) => "CommandBuilt",
            QuoteState::Sent => "Sent",
            QuoteState::ResponseReceived(_) => "ResponseReceived",
            QuoteState::Parsed { .. } => "Parsed",
            QuoteState::Validated(_) => "Validated",
            QuoteState::Failed(_) => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QuoteState::Validated(_) | QuoteState::Failed(_))
    }
}

/// One quote round trip over a transport
pub struct QuoteOperation<T: Transport> {
    transport: T,
    request: QuoteRequest,
    verifying_key: Option<PublicKey>,
    signer: Option<TpmtPublic>,
    state: QuoteState,
}

impl<T: Transport> QuoteOperation<T> {
    pub fn new(transport: T, request: QuoteRequest) -> Self {
        Self {
            transport,
            request,
            verifying_key: None,
            signer: None,
            state: QuoteState::Idle,
        }
    }

    /// Verify the quote signature with `key` during validation
    pub fn with_verifying_key(mut self, key: PublicKey) -> Self {
        self.verifying_key = Some(key);
        self
    }

    /// Expect the quote to be signed by `public`: checks the signer name and
    /// verifies the signature with it
    pub fn with_signer(mut self, public: TpmtPublic) -> Result<Self> {
        self.verifying_key = Some(PublicKey::from_tpm_public(&public)?);
        self.signer = Some(public);
        Ok(self)
    }

    pub fn state(&self) -> &QuoteState {
        &self.state
    }

    /// Perform one transition; terminal states stay put
    pub fn step(&mut self) -> &QuoteState {
        if self.state.is_terminal() {
            return &self.state;
        }
        let from = self.state.name();
        let state = std::mem::replace(&mut self.state, QuoteState::Idle);
        self.state = match self.advance(state) {
            Ok(next) => next,
            Err(e) => QuoteState::Failed(e),
        };
        debug!("quote: {from} -> {}", self.state.name());
        &self.state
    }

    fn advance(&mut self, state: QuoteState) -> Result<QuoteState> {
        match state {
            QuoteState::Idle => {
                let req = &self.request;
                let command = build_quote_with_scheme(
                    req.signing_handle,
                    &req.pcr_selection,
                    &req.qualifying_data,
                    &req.session,
                    &req.scheme,
                )?;
                Ok(QuoteState::CommandBuilt(command))
            }
            QuoteState::CommandBuilt(command) => {
                self.transport.send_command(&command)?;
                Ok(QuoteState::Sent)
            }
            QuoteState::Sent => Ok(QuoteState::ResponseReceived(
                self.transport.receive_response()?,
            )),
            QuoteState::ResponseReceived(response) => {
                let (attest, signature) = decode_quote_response(&response)?;
                Ok(QuoteState::Parsed { attest, signature })
            }
            QuoteState::Parsed { attest, signature } => {
                self.validate(&attest, &signature)?;
                Ok(QuoteState::Validated(VerifiedQuote {
                    attest,
                    signature,
                    signature_verified: self.verifying_key.is_some(),
                }))
            }
            terminal => Ok(terminal),
        }
    }

    fn validate(&self, attest: &TpmsAttest, signature: &TpmtSignature) -> Result<()> {
        validate_quote(attest)?;
        if attest.extra_data.buffer != self.request.qualifying_data {
            return Err(Error::InvalidAttestation(format!(
                "quote echoes extra data {}, requested {}",
                hex::encode(&attest.extra_data.buffer),
                hex::encode(&self.request.qualifying_data)
            )));
        }
        if let Some(public) = &self.signer {
            check_signer(attest, public)?;
        }
        if let Some(key) = &self.verifying_key {
            verify_quote_signature(attest, signature, key)?;
        }
        Ok(())
    }

    /// Drive the operation to a terminal state
    pub fn run(mut self) -> Result<VerifiedQuote> {
        while !self.step().is_terminal() {}
        match self.state {
            QuoteState::Validated(quote) => Ok(quote),
            QuoteState::Failed(e) => Err(e),
            other => Err(Error::InvalidArgument(format!(
                "quote operation stopped in state {}",
                other.name()
            ))),
        }
    }
}
