// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! TPM 2.0 command implementations
//!
//! The `build_*` functions are pure: they produce complete command byte
//! strings or an error, and never touch a transport. [`TpmContext`] pairs them
//! with their response parsers over any [`Transport`].

use tracing::{debug, info};

use super::constants::*;
use super::device::*;
use super::error::{Error, Result};
use super::marshal::*;
use super::quote::{QuoteOperation, QuoteRequest, VerifiedQuote};
use super::session::*;
use super::tcti::Tcti;
use super::types::*;
use super::verify::PublicKey;

/// Largest request the context issues per `TPM2_GetRandom`
const GET_RANDOM_CHUNK: u16 = 48;

/// Build a `TPM2_Quote` command using the key's default signing scheme
pub fn build_quote(
    signing_handle: u32,
    pcr_selection: &TpmlPcrSelection,
    qualifying_data: &[u8],
    session: &AuthSession,
) -> Result<Vec<u8>> {
    build_quote_with_scheme(
        signing_handle,
        pcr_selection,
        qualifying_data,
        session,
        &TpmtSigScheme::null(),
    )
}

/// Build a `TPM2_Quote` command with an explicit signing scheme
pub fn build_quote_with_scheme(
    signing_handle: u32,
    pcr_selection: &TpmlPcrSelection,
    qualifying_data: &[u8],
    session: &AuthSession,
    scheme: &TpmtSigScheme,
) -> Result<Vec<u8>> {
    if qualifying_data.len() > MAX_QUALIFYING_DATA_SIZE {
        return Err(Error::InvalidArgument(format!(
            "qualifying data is {} bytes, at most {MAX_QUALIFYING_DATA_SIZE} allowed",
            qualifying_data.len()
        )));
    }
    pcr_selection.validate()?;
    session.validate()?;

    let mut cmd = TpmCommand::with_sessions(TpmCc::Quote);
    // signHandle
    cmd.add_handle(signing_handle);
    // Authorization area
    cmd.add_auth_area(&[session]);
    // qualifyingData
    cmd.add_tpm2b(qualifying_data);
    // inScheme
    cmd.add(scheme);
    // PCRselect
    cmd.add(pcr_selection);

    let bytes = cmd.finalize();
    debug!(
        "built TPM2_Quote for handle 0x{signing_handle:08x}: {} bytes, PCRs {pcr_selection}",
        bytes.len()
    );
    Ok(bytes)
}

/// Build `TPM2_Startup`
pub fn build_startup(startup_type: TpmSu) -> Vec<u8> {
    let mut cmd = TpmCommand::new(TpmCc::Startup);
    cmd.add_u16(startup_type as u16);
    cmd.finalize()
}

/// Build `TPM2_GetRandom` for `bytes_requested` bytes
pub fn build_get_random(bytes_requested: u16) -> Vec<u8> {
    let mut cmd = TpmCommand::new(TpmCc::GetRandom);
    cmd.add_u16(bytes_requested);
    cmd.finalize()
}

/// Build `TPM2_ReadPublic` for a loaded or persistent object
pub fn build_read_public(handle: u32) -> Vec<u8> {
    let mut cmd = TpmCommand::new(TpmCc::ReadPublic);
    cmd.add_handle(handle);
    cmd.finalize()
}

/// Parse a `TPM2_Startup` response; an already started TPM counts as success
pub fn parse_startup_response(response: &[u8]) -> Result<()> {
    match TpmResponse::parse(response) {
        Ok(_) => Ok(()),
        Err(Error::TpmCommand { code }) if code == TpmRc::Initialize as u32 => {
            debug!("TPM already started");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Parse a `TPM2_GetRandom` response into the returned bytes
pub fn parse_get_random_response(response: &[u8]) -> Result<Vec<u8>> {
    let response = TpmResponse::parse(response)?;
    let mut buf = ResponseBuffer::new(response.parameters(0)?);
    let bytes = buf.get_tpm2b()?;
    buf.expect_end("TPM2B_DIGEST")?;
    Ok(bytes)
}

/// Parse a `TPM2_ReadPublic` response into the object's public area
pub fn parse_read_public_response(response: &[u8]) -> Result<TpmtPublic> {
    let response = TpmResponse::parse(response)?;
    let mut buf = ResponseBuffer::new(response.parameters(0)?);
    let out_public = Tpm2bPublic::unmarshal(&mut buf)?;
    // name and qualifiedName follow
    let name = Tpm2bName::unmarshal(&mut buf)?;
    let _qualified_name = Tpm2bName::unmarshal(&mut buf)?;
    buf.expect_end("TPM2_ReadPublic response")?;

    let computed = out_public.public_area.name()?;
    if computed != name.name {
        return Err(Error::MalformedResponse(format!(
            "TPM reported object name {}, public area hashes to {}",
            hex::encode(&name.name),
            hex::encode(&computed)
        )));
    }
    Ok(out_public.public_area)
}

/// TPM context over any transport
pub struct TpmContext<T: Transport> {
    transport: T,
}

impl TpmContext<Box<dyn Transport>> {
    /// Open the transport named by `tcti`, or auto-detect one
    pub fn open(tcti: Option<&Tcti>) -> Result<Self> {
        let tcti = match tcti {
            Some(tcti) => tcti.clone(),
            None => Tcti::detect(),
        };
        Ok(Self::new(tcti.open()?))
    }
}

impl<T: Transport> TpmContext<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// `TPM2_Startup`; a TPM that is already running is left alone
    pub fn startup(&mut self, startup_type: TpmSu) -> Result<()> {
        let response = self.transport.transmit(&build_startup(startup_type))?;
        parse_startup_response(&response)?;
        info!("TPM started ({startup_type:?})");
        Ok(())
    }

    /// Generate random bytes
    pub fn get_random(&mut self, num_bytes: usize) -> Result<Vec<u8>> {
        let mut result = Vec::with_capacity(num_bytes);

        // TPM may return fewer bytes than requested, so loop
        while result.len() < num_bytes {
            let remaining = num_bytes - result.len();
            let request_size = remaining.min(GET_RANDOM_CHUNK as usize) as u16;

            let response = self.transport.transmit(&build_get_random(request_size))?;
            let random_bytes = parse_get_random_response(&response)?;
            if random_bytes.is_empty() {
                return Err(Error::MalformedResponse(
                    "TPM2_GetRandom returned no bytes".into(),
                ));
            }
            result.extend_from_slice(&random_bytes);
        }

        result.truncate(num_bytes);
        debug!("got {num_bytes} random bytes from TPM");
        Ok(result)
    }

    /// Read public area of a key
    pub fn read_public(&mut self, handle: u32) -> Result<TpmtPublic> {
        let response = self.transport.transmit(&build_read_public(handle))?;
        parse_read_public_response(&response)
    }

    /// Quote without signature verification
    pub fn quote(&mut self, request: QuoteRequest) -> Result<VerifiedQuote> {
        QuoteOperation::new(&mut self.transport, request).run()
    }

    /// Quote and verify the signature with `key`
    pub fn quote_verified(
        &mut self,
        request: QuoteRequest,
        key: &PublicKey,
    ) -> Result<VerifiedQuote> {
        QuoteOperation::new(&mut self.transport, request)
            .with_verifying_key(key.clone())
            .run()
    }

    /// Read the signing key's public area, then quote and check the quote
    /// against it
    pub fn quote_with_signer(&mut self, request: QuoteRequest) -> Result<VerifiedQuote> {
        let public = self.read_public(request.signing_handle)?;
        QuoteOperation::new(&mut self.transport, request)
            .with_signer(public)?
            .run()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quote::tests::{signed_response, MockTransport};

    fn declared_size(cmd: &[u8]) -> usize {
        u32::from_be_bytes([cmd[2], cmd[3], cmd[4], cmd[5]]) as usize
    }

    #[test]
    fn test_quote_layout() {
        let sel = TpmlPcrSelection::single(TpmAlgId::Sha256, &[0, 1, 2, 3]).unwrap();
        let cmd = build_quote(0x810100AA, &sel, b"Ian12345", &AuthSession::password()).unwrap();

        let expected: Vec<u8> = [
            &[0x80, 0x02][..],                  // TPM_ST_SESSIONS
            &[0x00, 0x00, 0x00, 0x31],          // size
            &[0x00, 0x00, 0x01, 0x58],          // TPM_CC_Quote
            &[0x81, 0x01, 0x00, 0xAA],          // signHandle
            &[0x00, 0x00, 0x00, 0x09],          // authorizationSize
            &[0x40, 0x00, 0x00, 0x09],          // TPM_RS_PW
            &[0x00, 0x00, 0x00, 0x00, 0x00],    // nonce, attributes, hmac
            &[0x00, 0x08],                      // qualifyingData size
            b"Ian12345",
            &[0x00, 0x10],                      // TPM_ALG_NULL scheme
            &[0x00, 0x00, 0x00, 0x01],          // one bank
            &[0x00, 0x0b, 0x03, 0x0f, 0x00, 0x00], // sha256, PCRs 0-3
        ]
        .concat();
        assert_eq!(cmd, expected);
        assert_eq!(declared_size(&cmd), cmd.len());
    }

    #[test]
    fn test_size_matches_for_many_banks() {
        let banks = [
            TpmAlgId::Sha1,
            TpmAlgId::Sha256,
            TpmAlgId::Sha384,
            TpmAlgId::Sha512,
        ];
        for count in 1..=8 {
            let selections = (0..count)
                .map(|i| TpmsPcrSelection::new(banks[i % banks.len()], &[i as u32, 23]).unwrap())
                .collect();
            let sel = TpmlPcrSelection::new(selections);
            let cmd = build_quote(0x81000001, &sel, &[0xee; 32], &AuthSession::password()).unwrap();
            assert_eq!(declared_size(&cmd), cmd.len(), "{count} banks");
        }
    }

    #[test]
    fn test_quote_rejects_bad_arguments() {
        let sel = TpmlPcrSelection::single(TpmAlgId::Sha256, &[0]).unwrap();
        assert!(build_quote(1, &sel, &[0; 64], &AuthSession::password()).is_ok());
        assert!(matches!(
            build_quote(1, &sel, &[0; 65], &AuthSession::password()),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            build_quote(1, &TpmlPcrSelection::default(), b"", &AuthSession::password()),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_quote_rejects_oversized_session() {
        let sel = TpmlPcrSelection::single(TpmAlgId::Sha256, &[0]).unwrap();
        let session = AuthSession::password_with(&vec![0; 70000]);
        assert!(matches!(
            build_quote(1, &sel, b"x", &session),
            Err(Error::InvalidArgument(_))
        ));

        let mut session = AuthSession::policy(0x03000000);
        session.nonce = vec![0; 65];
        assert!(matches!(
            build_quote(1, &sel, b"x", &session),
            Err(Error::InvalidArgument(_))
        ));

        let cmd = build_quote(1, &sel, b"x", &AuthSession::password_with(&[0xaa; 64])).unwrap();
        assert_eq!(declared_size(&cmd), cmd.len());
    }

    #[test]
    fn test_quote_with_scheme() {
        let sel = TpmlPcrSelection::single(TpmAlgId::Sha256, &[0]).unwrap();
        let cmd = build_quote_with_scheme(
            1,
            &sel,
            b"",
            &AuthSession::password(),
            &TpmtScheme::ecdsa(TpmAlgId::Sha256),
        )
        .unwrap();
        // scheme follows the empty qualifying data
        assert_eq!(&cmd[27..33], &[0x00, 0x00, 0x00, 0x18, 0x00, 0x0b]);
        assert_eq!(declared_size(&cmd), cmd.len());
    }

    #[test]
    fn test_small_builders() {
        assert_eq!(
            build_startup(TpmSu::Clear),
            vec![0x80, 0x01, 0, 0, 0, 12, 0, 0, 0x01, 0x44, 0, 0]
        );
        assert_eq!(
            build_get_random(16),
            vec![0x80, 0x01, 0, 0, 0, 12, 0, 0, 0x01, 0x7b, 0, 16]
        );
        assert_eq!(
            build_read_public(0x81010001),
            vec![0x80, 0x01, 0, 0, 0, 14, 0, 0, 0x01, 0x73, 0x81, 0x01, 0x00, 0x01]
        );
    }

    #[test]
    fn test_startup_already_initialized() {
        let initialized = [0x80, 0x01, 0, 0, 0, 10, 0, 0, 0x01, 0x00];
        parse_startup_response(&initialized).unwrap();
        let failure = [0x80, 0x01, 0, 0, 0, 10, 0, 0, 0x01, 0x01];
        assert!(parse_startup_response(&failure).is_err());
    }

    fn random_response(bytes: &[u8]) -> Vec<u8> {
        let mut cmd = CommandBuffer::new();
        cmd.put_u16(TpmSt::NoSessions.to_u16());
        cmd.put_u32(0);
        cmd.put_u32(0);
        cmd.put_tpm2b(bytes);
        let len = cmd.len() as u32;
        cmd.update_u32(2, len);
        cmd.into_vec()
    }

    #[test]
    fn test_get_random_chunks() {
        let mut ctx = TpmContext::new(MockTransport::with_responses(vec![
            random_response(&[1; 48]),
            random_response(&[2; 20]),
            random_response(&[3; 2]),
        ]));
        let bytes = ctx.get_random(70).unwrap();
        assert_eq!(bytes.len(), 70);
        assert_eq!(&bytes[..48], &[1; 48]);
        assert_eq!(&bytes[48..68], &[2; 20]);

        let sent = &ctx.transport().sent;
        assert_eq!(sent.len(), 3);
        assert_eq!(&sent[0][10..], &[0, 48]);
        assert_eq!(&sent[1][10..], &[0, 22]);
        assert_eq!(&sent[2][10..], &[0, 2]);
    }

    #[test]
    fn test_get_random_empty_reply() {
        let mut ctx = TpmContext::new(MockTransport::with_responses(vec![random_response(&[])]));
        assert!(matches!(
            ctx.get_random(8),
            Err(Error::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_context_quote() {
        let key = p256::ecdsa::SigningKey::from_slice(&[0x17; 32]).unwrap();
        let mut ctx = TpmContext::new(MockTransport::with_responses(vec![signed_response(
            &key, b"abc",
        )]));
        let request = QuoteRequest::new(
            0x810100AA,
            TpmlPcrSelection::single(TpmAlgId::Sha256, &[0, 1, 2, 3]).unwrap(),
            b"abc".to_vec(),
        );
        let quote = ctx.quote(request).unwrap();
        assert!(!quote.signature_verified);
        assert_eq!(ctx.transport().sent[0][6..10], [0x00, 0x00, 0x01, 0x58]);
    }
}
