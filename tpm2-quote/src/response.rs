// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! `TPM2_Quote` response decoding and structural validation

use tracing::debug;

use crate::constants::*;
use crate::device::TpmResponse;
use crate::error::{Error, Result};
use crate::marshal::*;
use crate::types::*;

/// Split a raw quote response into the attestation and its signature
///
/// Every structural problem inside the response, including a parameter area
/// cut short or an attestation that does not fill its TPM2B exactly, is
/// `MalformedResponse`. Content is not judged here.
pub fn decode_quote_response(response: &[u8]) -> Result<(TpmsAttest, TpmtSignature)> {
    let response = TpmResponse::parse(response)?;
    let params = response.parameters(0)?;
    let mut buf = ResponseBuffer::new(params);

    let attest_size = buf
        .get_u16()
        .map_err(|_| Error::MalformedResponse("missing TPM2B_ATTEST size".into()))?
        as usize;
    if attest_size > buf.remaining() {
        return Err(Error::MalformedResponse(format!(
            "TPM2B_ATTEST declares {attest_size} bytes but only {} remain",
            buf.remaining()
        )));
    }
    let attest_bytes = buf.get_slice(attest_size)?;
    let attest =
        TpmsAttest::from_bytes(attest_bytes).map_err(|e| in_parameters("TPMS_ATTEST", e))?;

    let signature =
        TpmtSignature::unmarshal(&mut buf).map_err(|e| in_parameters("TPMT_SIGNATURE", e))?;
    if buf.remaining() != 0 {
        return Err(Error::MalformedResponse(format!(
            "{} unexpected bytes after quote signature",
            buf.remaining()
        )));
    }

    debug!(
        "decoded quote response: {attest_size} byte attestation, {} signature",
        signature.sig_alg().name()
    );
    Ok((attest, signature))
}

fn in_parameters(what: &str, err: Error) -> Error {
    match err {
        Error::MalformedStructure(msg) => {
            Error::MalformedResponse(format!("bad {what} in quote parameters: {msg}"))
        }
        other => other,
    }
}

/// Check that `attest` is a well-formed quote and return its quote body
///
/// The PCR digest length is checked against the first selected bank's hash.
/// A TPM computes that digest with the signing scheme's hash instead, so a
/// quote over SHA-1 banks signed with a SHA-256 key fails here with
/// `DigestLengthMismatch`.
pub fn validate_quote(attest: &TpmsAttest) -> Result<&TpmsQuoteInfo> {
    if attest.magic != TPM_GENERATED_VALUE {
        return Err(Error::InvalidAttestation(format!(
            "bad magic 0x{:08x}, not generated by a TPM",
            attest.magic
        )));
    }
    let info = match (attest.attest_type(), attest.quote_info()) {
        (Some(TpmStAttest::Quote), Some(info)) => info,
        _ => {
            return Err(Error::UnexpectedAttestationType {
                found: attest.attest_type,
            })
        }
    };
    let first = info.pcr_select.pcr_selections.first().ok_or_else(|| {
        Error::InvalidAttestation("quote covers no PCR banks".into())
    })?;
    let expected = first.hash.digest_size();
    let actual = info.pcr_digest.buffer.len();
    if expected != actual {
        return Err(Error::DigestLengthMismatch { expected, actual });
    }
    Ok(info)
}

/// Decode and validate a quote response in one go
pub fn parse_quote_response(response: &[u8]) -> Result<(TpmsAttest, TpmtSignature)> {
    let (attest, signature) = decode_quote_response(response)?;
    validate_quote(&attest)?;
    Ok((attest, signature))
}
