// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Quote signature verification
//!
//! Checks a `TPMT_SIGNATURE` against the canonical encoding of the
//! `TPMS_ATTEST` it covers, using the attestation key's public area.

use p256::ecdsa::signature::hazmat::PrehashVerifier;
use rsa::{BigUint, Pkcs1v15Sign, Pss, RsaPublicKey};
use sha2::{Digest, Sha256, Sha384, Sha512};
use tracing::{debug, warn};

use crate::constants::*;
use crate::error::{Error, Result};
use crate::marshal::Marshal;
use crate::types::*;

/// Hash `data` with one of the SHA-2 algorithms
pub fn hash_data(alg: TpmAlgId, data: &[u8]) -> Result<Vec<u8>> {
    match alg {
        TpmAlgId::Sha256 => Ok(Sha256::digest(data).to_vec()),
        TpmAlgId::Sha384 => Ok(Sha384::digest(data).to_vec()),
        TpmAlgId::Sha512 => Ok(Sha512::digest(data).to_vec()),
        other => Err(Error::UnsupportedAlgorithm(other.to_u16())),
    }
}

/// Key that signed a quote
#[derive(Debug, Clone)]
pub enum PublicKey {
    Rsa(RsaPublicKey),
    EccP256(p256::ecdsa::VerifyingKey),
    EccP384(p384::ecdsa::VerifyingKey),
}

/// Left-pad a big-endian integer to `len` bytes
fn pad_to(bytes: &[u8], len: usize) -> Result<Vec<u8>> {
    let trimmed = match bytes.iter().position(|&b| b != 0) {
        Some(i) => &bytes[i..],
        None => &[],
    };
    if trimmed.len() > len {
        return Err(Error::InvalidArgument(format!(
            "integer of {} bytes does not fit in {len}",
            trimmed.len()
        )));
    }
    let mut out = vec![0u8; len - trimmed.len()];
    out.extend_from_slice(trimmed);
    Ok(out)
}

fn sec1_point(x: &[u8], y: &[u8], field_len: usize) -> Result<Vec<u8>> {
    let mut point = Vec::with_capacity(1 + 2 * field_len);
    point.push(0x04);
    point.extend_from_slice(&pad_to(x, field_len)?);
    point.extend_from_slice(&pad_to(y, field_len)?);
    Ok(point)
}

impl PublicKey {
    /// Build a verification key from a TPM public area
    pub fn from_tpm_public(public: &TpmtPublic) -> Result<Self> {
        if !public
            .object_attributes
            .contains(TpmaObject::SIGN_ENCRYPT)
        {
            return Err(Error::InvalidArgument(
                "key is not a signing key".into(),
            ));
        }
        match (&public.parameters, &public.unique) {
            (TpmtPublicParms::Rsa(parms), TpmtPublicUnique::Rsa(n)) => {
                let exponent = match parms.exponent {
                    0 => 65537,
                    e => e,
                };
                let key = RsaPublicKey::new(BigUint::from_bytes_be(n), BigUint::from(exponent))
                    .map_err(|e| Error::InvalidArgument(format!("invalid RSA public key: {e}")))?;
                debug!("loaded RSA-{} attestation key", parms.key_bits);
                Ok(PublicKey::Rsa(key))
            }
            (TpmtPublicParms::Ecc(parms), TpmtPublicUnique::Ecc(x, y)) => match parms.curve_id {
                TpmEccCurve::NistP256 => {
                    let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(&sec1_point(x, y, 32)?)
                        .map_err(|e| {
                            Error::InvalidArgument(format!("invalid P-256 public key: {e}"))
                        })?;
                    Ok(PublicKey::EccP256(key))
                }
                TpmEccCurve::NistP384 => {
                    let key = p384::ecdsa::VerifyingKey::from_sec1_bytes(&sec1_point(x, y, 48)?)
                        .map_err(|e| {
                            Error::InvalidArgument(format!("invalid P-384 public key: {e}"))
                        })?;
                    Ok(PublicKey::EccP384(key))
                }
                other => Err(Error::UnsupportedAlgorithm(other.to_u16())),
            },
            _ => Err(Error::MalformedStructure(
                "public parameters do not match unique field".into(),
            )),
        }
    }
}

fn pkcs1v15_padding(hash: TpmAlgId) -> Result<Pkcs1v15Sign> {
    match hash {
        TpmAlgId::Sha256 => Ok(Pkcs1v15Sign::new::<Sha256>()),
        TpmAlgId::Sha384 => Ok(Pkcs1v15Sign::new::<Sha384>()),
        TpmAlgId::Sha512 => Ok(Pkcs1v15Sign::new::<Sha512>()),
        other => Err(Error::UnsupportedAlgorithm(other.to_u16())),
    }
}

fn pss_padding(hash: TpmAlgId) -> Result<Pss> {
    match hash {
        TpmAlgId::Sha256 => Ok(Pss::new::<Sha256>()),
        TpmAlgId::Sha384 => Ok(Pss::new::<Sha384>()),
        TpmAlgId::Sha512 => Ok(Pss::new::<Sha512>()),
        other => Err(Error::UnsupportedAlgorithm(other.to_u16())),
    }
}

fn ecdsa_bytes(sig: &TpmsSignatureEcc, field_len: usize) -> Result<Vec<u8>> {
    let mut bytes = pad_to(&sig.signature_r, field_len)
        .map_err(|e| Error::SignatureVerificationFailed(e.to_string()))?;
    bytes.extend_from_slice(
        &pad_to(&sig.signature_s, field_len)
            .map_err(|e| Error::SignatureVerificationFailed(e.to_string()))?,
    );
    Ok(bytes)
}

fn failed(what: &str, e: impl std::fmt::Display) -> Error {
    warn!("{what} signature verification failed: {e}");
    Error::SignatureVerificationFailed(format!("{what}: {e}"))
}

/// Verify `signature` over `message` with `key`
pub fn verify_signature(message: &[u8], signature: &TpmtSignature, key: &PublicKey) -> Result<()> {
    let hash = signature.hash_alg().ok_or_else(|| {
        Error::SignatureVerificationFailed("quote carries no signature".into())
    })?;
    let digest = hash_data(hash, message)?;
    debug!(
        "verifying {} signature over {} bytes, {} digest {}",
        signature.sig_alg().name(),
        message.len(),
        hash.name(),
        hex::encode(&digest)
    );

    match (signature, key) {
        (TpmtSignature::RsaSsa(sig), PublicKey::Rsa(key)) => key
            .verify(pkcs1v15_padding(hash)?, &digest, &sig.sig)
            .map_err(|e| failed("RSASSA", e)),
        (TpmtSignature::RsaPss(sig), PublicKey::Rsa(key)) => key
            .verify(pss_padding(hash)?, &digest, &sig.sig)
            .map_err(|e| failed("RSAPSS", e)),
        (TpmtSignature::EcDsa(sig), PublicKey::EccP256(key)) => {
            let sig = p256::ecdsa::Signature::from_slice(&ecdsa_bytes(sig, 32)?)
                .map_err(|e| failed("ECDSA", e))?;
            key.verify_prehash(&digest, &sig)
                .map_err(|e| failed("ECDSA", e))
        }
        (TpmtSignature::EcDsa(sig), PublicKey::EccP384(key)) => {
            let sig = p384::ecdsa::Signature::from_slice(&ecdsa_bytes(sig, 48)?)
                .map_err(|e| failed("ECDSA", e))?;
            key.verify_prehash(&digest, &sig)
                .map_err(|e| failed("ECDSA", e))
        }
        (sig, _) => Err(Error::SignatureVerificationFailed(format!(
            "{} signature does not match the key type",
            sig.sig_alg().name()
        ))),
    }?;

    debug!("quote signature verified");
    Ok(())
}

/// Verify a quote signature over the canonical encoding of `attest`
pub fn verify_quote_signature(
    attest: &TpmsAttest,
    signature: &TpmtSignature,
    key: &PublicKey,
) -> Result<()> {
    verify_signature(&attest.to_bytes(), signature, key)
}

/// Check the quote names `public` as its signer
pub fn check_signer(attest: &TpmsAttest, public: &TpmtPublic) -> Result<()> {
    let expected = public.name()?;
    if attest.qualified_signer.name != expected {
        return Err(Error::InvalidAttestation(format!(
            "quote signed by {}, expected {}",
            hex::encode(&attest.qualified_signer.name),
            hex::encode(&expected)
        )));
    }
    Ok(())
}
