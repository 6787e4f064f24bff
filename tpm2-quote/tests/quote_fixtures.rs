// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Quote responses captured from signing keys, replayed through the full
//! decode, validate, verify and render pipeline.

use std::collections::VecDeque;

use tpm2_quote::*;

const ECC_PUBLIC: &[u8] = include_bytes!("fixtures/ak_ecc_public.bin");
const ECC_RESPONSE: &[u8] = include_bytes!("fixtures/quote_response_ecc.bin");
const RSA_PUBLIC: &[u8] = include_bytes!("fixtures/ak_rsa_public.bin");
const RSA_RESPONSE: &[u8] = include_bytes!("fixtures/quote_response_rsa.bin");

/// Offset of `TPMS_ATTEST` inside a quote response: header, paramSize, TPM2B size
const ATTEST_OFFSET: usize = 16;
const ATTEST_SIZE: usize = 121;
const SIGNATURE_OFFSET: usize = ATTEST_OFFSET + ATTEST_SIZE;

const PCR_DIGEST: &str = "c454ba99ff4e5cc4c9ec867fcbf322969bca194bbb32b0d4239ca789d353f957";

fn ecc_key() -> (TpmtPublic, PublicKey) {
    let public = TpmtPublic::from_bytes(ECC_PUBLIC).unwrap();
    let key = PublicKey::from_tpm_public(&public).unwrap();
    (public, key)
}

fn rsa_key() -> (TpmtPublic, PublicKey) {
    let public = TpmtPublic::from_bytes(RSA_PUBLIC).unwrap();
    let key = PublicKey::from_tpm_public(&public).unwrap();
    (public, key)
}

fn verify_response(response: &[u8], key: &PublicKey) -> Result<()> {
    let (attest, signature) = parse_quote_response(response)?;
    verify_quote_signature(&attest, &signature, key)
}

#[test]
fn public_areas_decode() {
    let (ecc, key) = ecc_key();
    assert_eq!(ecc.type_alg, TpmAlgId::Ecc);
    assert!(ecc.object_attributes.contains(TpmaObject::RESTRICTED));
    assert!(matches!(key, PublicKey::EccP256(_)));
    assert_eq!(ecc.to_bytes(), ECC_PUBLIC);

    let (rsa, key) = rsa_key();
    assert_eq!(rsa.type_alg, TpmAlgId::Rsa);
    assert!(matches!(
        rsa.parameters,
        TpmtPublicParms::Rsa(TpmsRsaParms {
            key_bits: 2048,
            exponent: 0,
            ..
        })
    ));
    assert!(matches!(key, PublicKey::Rsa(_)));
    assert_eq!(rsa.to_bytes(), RSA_PUBLIC);
}

#[test]
fn ecc_quote_decodes() {
    let (attest, signature) = parse_quote_response(ECC_RESPONSE).unwrap();
    assert_eq!(attest.magic, TPM_GENERATED_VALUE);
    assert_eq!(attest.attest_type(), Some(TpmStAttest::Quote));
    assert_eq!(attest.extra_data.buffer, b"Ian12345");
    assert_eq!(attest.clock_info.clock, 0x01A2B3C4);
    assert_eq!(attest.clock_info.reset_count, 3);
    assert_eq!(attest.clock_info.restart_count, 1);
    assert!(attest.clock_info.safe);
    assert_eq!(attest.firmware_version, 0x0002000300160000);

    let info = attest.quote_info().unwrap();
    assert_eq!(info.pcr_select.to_string(), "sha256:0,1,2,3");
    assert_eq!(hex::encode(&info.pcr_digest.buffer), PCR_DIGEST);

    assert_eq!(signature.sig_alg(), TpmAlgId::EcDsa);
    assert_eq!(signature.hash_alg(), Some(TpmAlgId::Sha256));

    // Re-encoding reproduces the signed bytes exactly
    assert_eq!(
        attest.to_bytes(),
        &ECC_RESPONSE[ATTEST_OFFSET..SIGNATURE_OFFSET]
    );
}

#[test]
fn signer_names_match() {
    let (attest, _) = parse_quote_response(ECC_RESPONSE).unwrap();
    let (public, _) = ecc_key();
    check_signer(&attest, &public).unwrap();

    let (rsa_public, _) = rsa_key();
    assert!(matches!(
        check_signer(&attest, &rsa_public),
        Err(Error::InvalidAttestation(_))
    ));
}

#[test]
fn signatures_verify() {
    let (_, ecc) = ecc_key();
    let (_, rsa) = rsa_key();
    verify_response(ECC_RESPONSE, &ecc).unwrap();
    verify_response(RSA_RESPONSE, &rsa).unwrap();

    // Right signature, wrong key
    assert!(matches!(
        verify_response(ECC_RESPONSE, &rsa),
        Err(Error::SignatureVerificationFailed(_))
    ));
    assert!(matches!(
        verify_response(RSA_RESPONSE, &ecc),
        Err(Error::SignatureVerificationFailed(_))
    ));
}

#[test]
fn flipped_ecdsa_signature_bytes_fail() {
    let (_, key) = ecc_key();
    // alg (2) + hash (2) + r size (2), r (32), s size (2), s (32)
    let r = SIGNATURE_OFFSET + 6..SIGNATURE_OFFSET + 38;
    let s = SIGNATURE_OFFSET + 40..SIGNATURE_OFFSET + 72;
    for i in r.chain(s) {
        let mut response = ECC_RESPONSE.to_vec();
        response[i] ^= 0x01;
        let err = verify_response(&response, &key).unwrap_err();
        assert!(
            matches!(err, Error::SignatureVerificationFailed(_)),
            "byte {i}: {err}"
        );
    }
}

#[test]
fn flipped_rsa_signature_bytes_fail() {
    let (_, key) = rsa_key();
    // alg (2) + hash (2) + size (2), then 256 signature bytes
    for i in SIGNATURE_OFFSET + 6..SIGNATURE_OFFSET + 6 + 256 {
        let mut response = RSA_RESPONSE.to_vec();
        response[i] ^= 0x80;
        let err = verify_response(&response, &key).unwrap_err();
        assert!(
            matches!(err, Error::SignatureVerificationFailed(_)),
            "byte {i}: {err}"
        );
    }
}

#[test]
fn tampered_extra_data_fails_verification() {
    let (_, key) = ecc_key();
    let mut response = ECC_RESPONSE.to_vec();
    let pos = response
        .windows(8)
        .position(|w| w == b"Ian12345")
        .unwrap();
    response[pos] = b'J';
    assert!(matches!(
        verify_response(&response, &key),
        Err(Error::SignatureVerificationFailed(_))
    ));
}

#[test]
fn corrupted_magic_is_invalid_attestation() {
    let mut response = ECC_RESPONSE.to_vec();
    response[ATTEST_OFFSET] ^= 0xff;
    assert!(matches!(
        parse_quote_response(&response),
        Err(Error::InvalidAttestation(_))
    ));
}

#[test]
fn truncated_response_is_malformed() {
    for len in [0, 9, 10, 16, 100, SIGNATURE_OFFSET, ECC_RESPONSE.len() - 1] {
        assert!(
            matches!(
                parse_quote_response(&ECC_RESPONSE[..len]),
                Err(Error::MalformedResponse(_))
            ),
            "len {len}"
        );
    }
}

#[test]
fn interchange_rendering() {
    let (attest, signature) = parse_quote_response(ECC_RESPONSE).unwrap();
    let map = quote_to_interchange(&attest, &signature);
    assert_eq!(map["magic"], "0xff544347");
    assert_eq!(map["type"], "attest_quote");
    assert_eq!(map["extraData"], "49616e3132333435");
    assert_eq!(map["attested"]["quote"]["pcrDigest"], PCR_DIGEST);
    assert_eq!(map["signature"]["sigAlg"], "ecdsa");

    let signer = map["qualifiedSigner"].as_str().unwrap();
    assert_eq!(hex::decode(signer).unwrap(), attest.qualified_signer.name);
}

/// Transport replaying canned responses in order
struct Replay {
    responses: VecDeque<Vec<u8>>,
    commands: Vec<Vec<u8>>,
}

impl Transport for Replay {
    fn send_command(&mut self, command: &[u8]) -> Result<()> {
        self.commands.push(command.to_vec());
        Ok(())
    }

    fn receive_response(&mut self) -> Result<Vec<u8>> {
        self.responses
            .pop_front()
            .ok_or_else(|| Error::MalformedResponse("no response queued".into()))
    }
}

fn read_public_response(public: &[u8]) -> Vec<u8> {
    let name = TpmtPublic::from_bytes(public).unwrap().name().unwrap();
    let mut buf = CommandBuffer::new();
    buf.put_u16(0x8001);
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_tpm2b(public);
    buf.put_tpm2b(&name);
    buf.put_tpm2b(&name);
    let len = buf.len() as u32;
    buf.update_u32(2, len);
    buf.into_vec()
}

#[test]
fn end_to_end_with_signer() {
    for (public, response) in [(ECC_PUBLIC, ECC_RESPONSE), (RSA_PUBLIC, RSA_RESPONSE)] {
        let mut ctx = TpmContext::new(Replay {
            responses: [read_public_response(public), response.to_vec()].into(),
            commands: Vec::new(),
        });
        let pcrs: TpmlPcrSelection = "sha256:0,1,2,3".parse().unwrap();
        let quote = ctx
            .quote_with_signer(QuoteRequest::new(0x810100AA, pcrs, b"Ian12345".to_vec()))
            .unwrap();
        assert!(quote.signature_verified);

        let evidence = quote.evidence();
        assert_eq!(
            evidence.message,
            &response[ATTEST_OFFSET..SIGNATURE_OFFSET]
        );
        let key = PublicKey::from_tpm_public(&TpmtPublic::from_bytes(public).unwrap()).unwrap();
        evidence.verify(&key).unwrap();

        let commands = &ctx.transport().commands;
        assert_eq!(commands.len(), 2);
        // ReadPublic, then Quote
        assert_eq!(&commands[0][6..10], &[0x00, 0x00, 0x01, 0x73]);
        assert_eq!(&commands[1][6..10], &[0x00, 0x00, 0x01, 0x58]);
    }
}

#[test]
fn end_to_end_rejects_other_nonce() {
    let (_, key) = ecc_key();
    let mut ctx = TpmContext::new(Replay {
        responses: [ECC_RESPONSE.to_vec()].into(),
        commands: Vec::new(),
    });
    let pcrs: TpmlPcrSelection = "sha256:0,1,2,3".parse().unwrap();
    let err = ctx
        .quote_verified(QuoteRequest::new(0x810100AA, pcrs, b"Ian54321".to_vec()), &key)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidAttestation(_)), "{err}");
}
