// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: BUSL-1.1

//! TPM 2.0 data types

use std::fmt;
use std::str::FromStr;

use crate::constants::*;
use crate::error::{Error, Result};
use crate::marshal::*;

fn get_hash_alg(buf: &mut ResponseBuffer) -> Result<TpmAlgId> {
    let raw = buf.get_u16()?;
    match TpmAlgId::from_u16(raw) {
        Some(alg) if alg.is_hash() => Ok(alg),
        _ => Err(Error::MalformedStructure(format!(
            "expected hash algorithm, got 0x{raw:04x}"
        ))),
    }
}

fn get_alg(buf: &mut ResponseBuffer) -> Result<TpmAlgId> {
    let raw = buf.get_u16()?;
    TpmAlgId::from_u16(raw)
        .ok_or_else(|| Error::MalformedStructure(format!("unknown algorithm: 0x{raw:04x}")))
}

/// TPM2B_DIGEST - Variable length digest
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tpm2bDigest {
    pub buffer: Vec<u8>,
}

impl Tpm2bDigest {
    pub fn new(data: Vec<u8>) -> Self {
        Self { buffer: data }
    }

    pub fn empty() -> Self {
        Self { buffer: Vec::new() }
    }
}

impl Marshal for Tpm2bDigest {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_tpm2b(&self.buffer);
    }
}

impl Unmarshal for Tpm2bDigest {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        Ok(Self {
            buffer: buf.get_tpm2b()?,
        })
    }
}

/// TPM2B_DATA - Variable length data
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tpm2bData {
    pub buffer: Vec<u8>,
}

impl Tpm2bData {
    pub fn new(data: Vec<u8>) -> Self {
        Self { buffer: data }
    }

    pub fn empty() -> Self {
        Self { buffer: Vec::new() }
    }
}

impl Marshal for Tpm2bData {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_tpm2b(&self.buffer);
    }
}

impl Unmarshal for Tpm2bData {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        Ok(Self {
            buffer: buf.get_tpm2b()?,
        })
    }
}

/// TPM2B_NAME - Object name (hash algorithm id followed by digest)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tpm2bName {
    pub name: Vec<u8>,
}

impl Marshal for Tpm2bName {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_tpm2b(&self.name);
    }
}

impl Unmarshal for Tpm2bName {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        Ok(Self {
            name: buf.get_tpm2b()?,
        })
    }
}

/// TPMS_PCR_SELECTION - PCR selection for a single hash algorithm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmsPcrSelection {
    pub hash: TpmAlgId,
    pub pcr_select: Vec<u8>, // Bitmap of selected PCRs
}

impl TpmsPcrSelection {
    /// Build a selection with the standard 3-byte bitmap
    pub fn new(hash: TpmAlgId, pcrs: &[u32]) -> Result<Self> {
        if !hash.is_hash() {
            return Err(Error::InvalidArgument(format!(
                "{} is not a PCR bank hash algorithm",
                hash.name()
            )));
        }
        let mut pcr_select = vec![0u8; PCR_SELECT_SIZE];
        for &pcr in pcrs {
            if pcr > MAX_PCR_INDEX {
                return Err(Error::InvalidArgument(format!(
                    "PCR index {pcr} out of range 0-{MAX_PCR_INDEX}"
                )));
            }
            pcr_select[(pcr / 8) as usize] |= 1 << (pcr % 8);
        }
        Ok(Self { hash, pcr_select })
    }

    pub fn sha256(pcrs: &[u32]) -> Result<Self> {
        Self::new(TpmAlgId::Sha256, pcrs)
    }

    /// Selected PCR indices in ascending order
    pub fn pcrs(&self) -> Vec<u32> {
        let mut indices = Vec::new();
        for (byte_idx, &byte) in self.pcr_select.iter().enumerate() {
            for bit in 0..8 {
                if byte & (1 << bit) != 0 {
                    indices.push((byte_idx * 8 + bit) as u32);
                }
            }
        }
        indices
    }
}

impl Marshal for TpmsPcrSelection {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_u16(self.hash.to_u16());
        buf.put_u8(self.pcr_select.len() as u8);
        buf.put_bytes(&self.pcr_select);
    }
}

impl Unmarshal for TpmsPcrSelection {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        let hash = get_hash_alg(buf)?;
        let size = buf.get_u8()? as usize;
        if size > PCR_SELECT_MAX {
            return Err(Error::MalformedStructure(format!(
                "PCR bitmap of {size} bytes exceeds {PCR_SELECT_MAX}"
            )));
        }
        let pcr_select = buf.get_bytes(size)?;
        Ok(Self { hash, pcr_select })
    }
}

impl fmt::Display for TpmsPcrSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pcrs: Vec<String> = self.pcrs().iter().map(|p| p.to_string()).collect();
        write!(f, "{}:{}", self.hash.name(), pcrs.join(","))
    }
}

impl FromStr for TpmsPcrSelection {
    type Err = Error;

    /// Parse `sha256:0,1,2,3`
    fn from_str(s: &str) -> Result<Self> {
        let (bank, list) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidArgument(format!("missing ':' in PCR selection {s:?}")))?;
        let hash = TpmAlgId::hash_from_name(bank.trim())
            .ok_or_else(|| Error::InvalidArgument(format!("unknown PCR bank {bank:?}")))?;
        let pcrs = list
            .split(',')
            .filter(|p| !p.trim().is_empty())
            .map(|p| {
                p.trim()
                    .parse::<u32>()
                    .map_err(|_| Error::InvalidArgument(format!("invalid PCR index {p:?}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(hash, &pcrs)
    }
}

/// TPML_PCR_SELECTION - List of PCR selections
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TpmlPcrSelection {
    pub pcr_selections: Vec<TpmsPcrSelection>,
}

impl TpmlPcrSelection {
    pub fn new(selections: Vec<TpmsPcrSelection>) -> Self {
        Self {
            pcr_selections: selections,
        }
    }

    pub fn single(hash: TpmAlgId, pcrs: &[u32]) -> Result<Self> {
        Ok(Self {
            pcr_selections: vec![TpmsPcrSelection::new(hash, pcrs)?],
        })
    }

    pub fn is_empty(&self) -> bool {
        self.pcr_selections.is_empty()
    }

    /// Check the selection is usable as a command parameter
    pub fn validate(&self) -> Result<()> {
        if self.pcr_selections.is_empty() {
            return Err(Error::InvalidArgument(
                "PCR selection must contain at least one bank".into(),
            ));
        }
        if self.pcr_selections.len() > MAX_PCR_BANKS {
            return Err(Error::InvalidArgument(format!(
                "PCR selection has {} banks, at most {MAX_PCR_BANKS} allowed",
                self.pcr_selections.len()
            )));
        }
        for sel in &self.pcr_selections {
            if !sel.hash.is_hash() {
                return Err(Error::InvalidArgument(format!(
                    "{} is not a PCR bank hash algorithm",
                    sel.hash.name()
                )));
            }
            if sel.pcr_select.is_empty() || sel.pcr_select.len() > PCR_SELECT_MAX {
                return Err(Error::InvalidArgument(format!(
                    "PCR bitmap for {} must be 1-{PCR_SELECT_MAX} bytes, got {}",
                    sel.hash.name(),
                    sel.pcr_select.len()
                )));
            }
        }
        Ok(())
    }
}

impl Marshal for TpmlPcrSelection {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_u32(self.pcr_selections.len() as u32);
        for sel in &self.pcr_selections {
            sel.marshal(buf);
        }
    }
}

impl Unmarshal for TpmlPcrSelection {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        let count = buf.get_u32()? as usize;
        if count > MAX_PCR_BANKS {
            return Err(Error::MalformedStructure(format!(
                "PCR selection count {count} exceeds {MAX_PCR_BANKS}"
            )));
        }
        let mut pcr_selections = Vec::with_capacity(count);
        for _ in 0..count {
            pcr_selections.push(TpmsPcrSelection::unmarshal(buf)?);
        }
        Ok(Self { pcr_selections })
    }
}

impl fmt::Display for TpmlPcrSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, sel) in self.pcr_selections.iter().enumerate() {
            if i > 0 {
                f.write_str("+")?;
            }
            write!(f, "{sel}")?;
        }
        Ok(())
    }
}

impl FromStr for TpmlPcrSelection {
    type Err = Error;

    /// Parse `sha256:0,1,2,3` or several banks joined with `+`
    fn from_str(s: &str) -> Result<Self> {
        let selections = s
            .split('+')
            .map(str::parse)
            .collect::<Result<Vec<TpmsPcrSelection>>>()?;
        let list = Self::new(selections);
        list.validate()?;
        Ok(list)
    }
}

/// TPMT_SYM_DEF - Symmetric algorithm definition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TpmtSymDef {
    pub algorithm: TpmAlgId,
    pub key_bits: u16,
    pub mode: TpmAlgId,
}

impl TpmtSymDef {
    pub fn null() -> Self {
        Self {
            algorithm: TpmAlgId::Null,
            key_bits: 0,
            mode: TpmAlgId::Null,
        }
    }
}

impl Marshal for TpmtSymDef {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_u16(self.algorithm.to_u16());
        if self.algorithm != TpmAlgId::Null {
            buf.put_u16(self.key_bits);
            buf.put_u16(self.mode.to_u16());
        }
    }
}

impl Unmarshal for TpmtSymDef {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        let algorithm = get_alg(buf)?;
        if algorithm == TpmAlgId::Null {
            Ok(Self::null())
        } else {
            let key_bits = buf.get_u16()?;
            let mode = get_alg(buf)?;
            Ok(Self {
                algorithm,
                key_bits,
                mode,
            })
        }
    }
}

/// TPMT_SYM_DEF_OBJECT - Symmetric definition for objects
pub type TpmtSymDefObject = TpmtSymDef;

/// Scheme selector followed by an optional hash algorithm
///
/// Covers every scheme whose details are a single `TPMS_SCHEME_HASH`, which is
/// all this crate emits or reads (signing, RSA, ECC and KDF schemes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TpmtScheme {
    pub scheme: TpmAlgId,
    pub hash_alg: Option<TpmAlgId>,
}

impl TpmtScheme {
    pub fn null() -> Self {
        Self {
            scheme: TpmAlgId::Null,
            hash_alg: None,
        }
    }

    pub fn rsassa(hash: TpmAlgId) -> Self {
        Self {
            scheme: TpmAlgId::RsaSsa,
            hash_alg: Some(hash),
        }
    }

    pub fn ecdsa(hash: TpmAlgId) -> Self {
        Self {
            scheme: TpmAlgId::EcDsa,
            hash_alg: Some(hash),
        }
    }
}

impl Marshal for TpmtScheme {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_u16(self.scheme.to_u16());
        if let Some(hash) = self.hash_alg {
            buf.put_u16(hash.to_u16());
        }
    }
}

impl Unmarshal for TpmtScheme {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        let scheme = get_alg(buf)?;
        let hash_alg = match scheme {
            TpmAlgId::Null | TpmAlgId::RsaEs => None,
            _ => Some(get_hash_alg(buf)?),
        };
        Ok(Self { scheme, hash_alg })
    }
}

/// TPMT_SIG_SCHEME - Signature scheme (for Quote)
pub type TpmtSigScheme = TpmtScheme;
/// TPMT_RSA_SCHEME
pub type TpmtRsaScheme = TpmtScheme;
/// TPMT_ECC_SCHEME
pub type TpmtEccScheme = TpmtScheme;
/// TPMT_KDF_SCHEME
pub type TpmtKdfScheme = TpmtScheme;

/// TPMS_CLOCK_INFO
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TpmsClockInfo {
    pub clock: u64,
    pub reset_count: u32,
    pub restart_count: u32,
    pub safe: bool,
}

impl Marshal for TpmsClockInfo {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_u64(self.clock);
        buf.put_u32(self.reset_count);
        buf.put_u32(self.restart_count);
        buf.put_u8(self.safe as u8);
    }
}

impl Unmarshal for TpmsClockInfo {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        let clock = buf.get_u64()?;
        let reset_count = buf.get_u32()?;
        let restart_count = buf.get_u32()?;
        let safe = match buf.get_u8()? {
            0 => false,
            1 => true,
            v => {
                return Err(Error::MalformedStructure(format!(
                    "invalid TPMI_YES_NO value {v}"
                )))
            }
        };
        Ok(Self {
            clock,
            reset_count,
            restart_count,
            safe,
        })
    }
}

/// TPMS_QUOTE_INFO
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TpmsQuoteInfo {
    pub pcr_select: TpmlPcrSelection,
    pub pcr_digest: Tpm2bDigest,
}

impl Marshal for TpmsQuoteInfo {
    fn marshal(&self, buf: &mut CommandBuffer) {
        self.pcr_select.marshal(buf);
        self.pcr_digest.marshal(buf);
    }
}

impl Unmarshal for TpmsQuoteInfo {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        Ok(Self {
            pcr_select: TpmlPcrSelection::unmarshal(buf)?,
            pcr_digest: Tpm2bDigest::unmarshal(buf)?,
        })
    }
}

/// TPMU_ATTEST - Attested body, selected by the attestation type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TpmuAttest {
    Quote(TpmsQuoteInfo),
    /// Body of any other attestation type, kept verbatim
    Other(Vec<u8>),
}

/// TPMS_ATTEST - Attestation structure (returned by Quote)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmsAttest {
    pub magic: u32,
    /// Raw TPMI_ST_ATTEST tag, see [`TpmStAttest`]
    pub attest_type: u16,
    pub qualified_signer: Tpm2bName,
    pub extra_data: Tpm2bData,
    pub clock_info: TpmsClockInfo,
    pub firmware_version: u64,
    pub attested: TpmuAttest,
}

impl TpmsAttest {
    pub fn attest_type(&self) -> Option<TpmStAttest> {
        TpmStAttest::from_u16(self.attest_type)
    }

    pub fn quote_info(&self) -> Option<&TpmsQuoteInfo> {
        match &self.attested {
            TpmuAttest::Quote(info) => Some(info),
            TpmuAttest::Other(_) => None,
        }
    }
}

impl Marshal for TpmsAttest {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_u32(self.magic);
        buf.put_u16(self.attest_type);
        self.qualified_signer.marshal(buf);
        self.extra_data.marshal(buf);
        self.clock_info.marshal(buf);
        buf.put_u64(self.firmware_version);
        match &self.attested {
            TpmuAttest::Quote(info) => info.marshal(buf),
            TpmuAttest::Other(raw) => buf.put_bytes(raw),
        }
    }
}

impl Unmarshal for TpmsAttest {
    /// Magic and type are carried through as-is; rejecting them is the
    /// validator's job. A non-quote body swallows the rest of the buffer, so
    /// callers decode from a buffer bounded by the TPM2B_ATTEST size.
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        let magic = buf.get_u32()?;
        let attest_type = buf.get_u16()?;
        let qualified_signer = Tpm2bName::unmarshal(buf)?;
        let extra_data = Tpm2bData::unmarshal(buf)?;
        let clock_info = TpmsClockInfo::unmarshal(buf)?;
        let firmware_version = buf.get_u64()?;
        let attested = if attest_type == TpmStAttest::Quote.to_u16() {
            TpmuAttest::Quote(TpmsQuoteInfo::unmarshal(buf)?)
        } else {
            TpmuAttest::Other(buf.get_remaining())
        };
        Ok(Self {
            magic,
            attest_type,
            qualified_signer,
            extra_data,
            clock_info,
            firmware_version,
            attested,
        })
    }
}

/// TPMT_HA - Hash value with algorithm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmtHa {
    pub hash_alg: TpmAlgId,
    pub digest: Vec<u8>,
}

impl Marshal for TpmtHa {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_u16(self.hash_alg.to_u16());
        buf.put_bytes(&self.digest);
    }
}

impl Unmarshal for TpmtHa {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        let hash_alg = get_hash_alg(buf)?;
        let digest = buf.get_bytes(hash_alg.digest_size())?;
        Ok(Self { hash_alg, digest })
    }
}

/// TPMS_SIGNATURE_RSA
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmsSignatureRsa {
    pub hash: TpmAlgId,
    pub sig: Vec<u8>,
}

impl Marshal for TpmsSignatureRsa {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_u16(self.hash.to_u16());
        buf.put_tpm2b(&self.sig);
    }
}

impl Unmarshal for TpmsSignatureRsa {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        Ok(Self {
            hash: get_hash_alg(buf)?,
            sig: buf.get_tpm2b()?,
        })
    }
}

/// TPMS_SIGNATURE_ECC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmsSignatureEcc {
    pub hash: TpmAlgId,
    pub signature_r: Vec<u8>,
    pub signature_s: Vec<u8>,
}

impl Marshal for TpmsSignatureEcc {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_u16(self.hash.to_u16());
        buf.put_tpm2b(&self.signature_r);
        buf.put_tpm2b(&self.signature_s);
    }
}

impl Unmarshal for TpmsSignatureEcc {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        Ok(Self {
            hash: get_hash_alg(buf)?,
            signature_r: buf.get_tpm2b()?,
            signature_s: buf.get_tpm2b()?,
        })
    }
}

/// TPMT_SIGNATURE - Signature structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TpmtSignature {
    RsaSsa(TpmsSignatureRsa),
    RsaPss(TpmsSignatureRsa),
    EcDsa(TpmsSignatureEcc),
    Hmac(TpmtHa),
    Null,
}

impl TpmtSignature {
    pub fn sig_alg(&self) -> TpmAlgId {
        match self {
            TpmtSignature::RsaSsa(_) => TpmAlgId::RsaSsa,
            TpmtSignature::RsaPss(_) => TpmAlgId::RsaPss,
            TpmtSignature::EcDsa(_) => TpmAlgId::EcDsa,
            TpmtSignature::Hmac(_) => TpmAlgId::Hmac,
            TpmtSignature::Null => TpmAlgId::Null,
        }
    }

    pub fn hash_alg(&self) -> Option<TpmAlgId> {
        match self {
            TpmtSignature::RsaSsa(s) | TpmtSignature::RsaPss(s) => Some(s.hash),
            TpmtSignature::EcDsa(s) => Some(s.hash),
            TpmtSignature::Hmac(ha) => Some(ha.hash_alg),
            TpmtSignature::Null => None,
        }
    }
}

impl Marshal for TpmtSignature {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_u16(self.sig_alg().to_u16());
        match self {
            TpmtSignature::RsaSsa(s) | TpmtSignature::RsaPss(s) => s.marshal(buf),
            TpmtSignature::EcDsa(s) => s.marshal(buf),
            TpmtSignature::Hmac(ha) => ha.marshal(buf),
            TpmtSignature::Null => {}
        }
    }
}

impl Unmarshal for TpmtSignature {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        let raw = buf.get_u16()?;
        match TpmAlgId::from_u16(raw) {
            Some(TpmAlgId::RsaSsa) => Ok(TpmtSignature::RsaSsa(TpmsSignatureRsa::unmarshal(buf)?)),
            Some(TpmAlgId::RsaPss) => Ok(TpmtSignature::RsaPss(TpmsSignatureRsa::unmarshal(buf)?)),
            Some(TpmAlgId::EcDsa) => Ok(TpmtSignature::EcDsa(TpmsSignatureEcc::unmarshal(buf)?)),
            Some(TpmAlgId::Hmac) => Ok(TpmtSignature::Hmac(TpmtHa::unmarshal(buf)?)),
            Some(TpmAlgId::Null) => Ok(TpmtSignature::Null),
            _ => Err(Error::MalformedStructure(format!(
                "unsupported signature algorithm: 0x{raw:04x}"
            ))),
        }
    }
}

/// TPMS_RSA_PARMS - RSA key parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmsRsaParms {
    pub symmetric: TpmtSymDefObject,
    pub scheme: TpmtRsaScheme,
    pub key_bits: u16,
    /// Zero means the default exponent 65537
    pub exponent: u32,
}

impl Marshal for TpmsRsaParms {
    fn marshal(&self, buf: &mut CommandBuffer) {
        self.symmetric.marshal(buf);
        self.scheme.marshal(buf);
        buf.put_u16(self.key_bits);
        buf.put_u32(self.exponent);
    }
}

impl Unmarshal for TpmsRsaParms {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        Ok(Self {
            symmetric: TpmtSymDef::unmarshal(buf)?,
            scheme: TpmtScheme::unmarshal(buf)?,
            key_bits: buf.get_u16()?,
            exponent: buf.get_u32()?,
        })
    }
}

/// TPMS_ECC_PARMS - ECC key parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmsEccParms {
    pub symmetric: TpmtSymDefObject,
    pub scheme: TpmtEccScheme,
    pub curve_id: TpmEccCurve,
    pub kdf: TpmtKdfScheme,
}

impl Marshal for TpmsEccParms {
    fn marshal(&self, buf: &mut CommandBuffer) {
        self.symmetric.marshal(buf);
        self.scheme.marshal(buf);
        buf.put_u16(self.curve_id.to_u16());
        self.kdf.marshal(buf);
    }
}

impl Unmarshal for TpmsEccParms {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        let symmetric = TpmtSymDef::unmarshal(buf)?;
        let scheme = TpmtScheme::unmarshal(buf)?;
        let curve_raw = buf.get_u16()?;
        let curve_id = TpmEccCurve::from_u16(curve_raw)
            .ok_or_else(|| Error::MalformedStructure(format!("unknown curve: 0x{curve_raw:04x}")))?;
        let kdf = TpmtScheme::unmarshal(buf)?;
        Ok(Self {
            symmetric,
            scheme,
            curve_id,
            kdf,
        })
    }
}

/// TPMU_PUBLIC_PARMS - Public parameters union
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TpmtPublicParms {
    Rsa(TpmsRsaParms),
    Ecc(TpmsEccParms),
}

impl Marshal for TpmtPublicParms {
    fn marshal(&self, buf: &mut CommandBuffer) {
        match self {
            TpmtPublicParms::Rsa(p) => p.marshal(buf),
            TpmtPublicParms::Ecc(p) => p.marshal(buf),
        }
    }
}

/// TPMU_PUBLIC_ID - Unique identifier union
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TpmtPublicUnique {
    Rsa(Vec<u8>),          // TPM2B_PUBLIC_KEY_RSA
    Ecc(Vec<u8>, Vec<u8>), // TPMS_ECC_POINT (x, y)
}

impl Marshal for TpmtPublicUnique {
    fn marshal(&self, buf: &mut CommandBuffer) {
        match self {
            TpmtPublicUnique::Rsa(n) => buf.put_tpm2b(n),
            TpmtPublicUnique::Ecc(x, y) => {
                buf.put_tpm2b(x);
                buf.put_tpm2b(y);
            }
        }
    }
}

/// TPMT_PUBLIC - Public area of an asymmetric key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmtPublic {
    pub type_alg: TpmAlgId,
    pub name_alg: TpmAlgId,
    pub object_attributes: TpmaObject,
    pub auth_policy: Tpm2bDigest,
    pub parameters: TpmtPublicParms,
    pub unique: TpmtPublicUnique,
}

impl TpmtPublic {
    /// Object name: `nameAlg || H_nameAlg(TPMT_PUBLIC)`
    pub fn name(&self) -> Result<Vec<u8>> {
        let digest = crate::verify::hash_data(self.name_alg, &self.to_bytes())?;
        let mut name = Vec::with_capacity(2 + digest.len());
        name.extend_from_slice(&self.name_alg.to_u16().to_be_bytes());
        name.extend_from_slice(&digest);
        Ok(name)
    }
}

impl Marshal for TpmtPublic {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_u16(self.type_alg.to_u16());
        buf.put_u16(self.name_alg.to_u16());
        buf.put_u32(self.object_attributes.0);
        self.auth_policy.marshal(buf);
        self.parameters.marshal(buf);
        self.unique.marshal(buf);
    }
}

impl Unmarshal for TpmtPublic {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        let type_alg = get_alg(buf)?;
        let name_alg = get_hash_alg(buf)?;
        let object_attributes = TpmaObject(buf.get_u32()?);
        let auth_policy = Tpm2bDigest::unmarshal(buf)?;
        let (parameters, unique) = match type_alg {
            TpmAlgId::Rsa => {
                let parms = TpmsRsaParms::unmarshal(buf)?;
                let n = buf.get_tpm2b()?;
                (TpmtPublicParms::Rsa(parms), TpmtPublicUnique::Rsa(n))
            }
            TpmAlgId::Ecc => {
                let parms = TpmsEccParms::unmarshal(buf)?;
                let x = buf.get_tpm2b()?;
                let y = buf.get_tpm2b()?;
                (TpmtPublicParms::Ecc(parms), TpmtPublicUnique::Ecc(x, y))
            }
            other => return Err(Error::UnsupportedAlgorithm(other.to_u16())),
        };
        Ok(Self {
            type_alg,
            name_alg,
            object_attributes,
            auth_policy,
            parameters,
            unique,
        })
    }
}

/// TPM2B_PUBLIC - Public area with size prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tpm2bPublic {
    pub public_area: TpmtPublic,
}

impl Marshal for Tpm2bPublic {
    fn marshal(&self, buf: &mut CommandBuffer) {
        buf.put_tpm2b(&self.public_area.to_bytes());
    }
}

impl Unmarshal for Tpm2bPublic {
    fn unmarshal(buf: &mut ResponseBuffer) -> Result<Self> {
        let size = buf.get_u16()? as usize;
        if size == 0 {
            return Err(Error::MalformedStructure("empty public area".into()));
        }
        let data = buf.get_slice(size)?;
        Ok(Self {
            public_area: TpmtPublic::from_bytes(data)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_attest() -> TpmsAttest {
        TpmsAttest {
            magic: TPM_GENERATED_VALUE,
            attest_type: TpmStAttest::Quote.to_u16(),
            qualified_signer: Tpm2bName {
                name: [&[0x00, 0x0b][..], &[0xab; 32][..]].concat(),
            },
            extra_data: Tpm2bData::new(b"Ian12345".to_vec()),
            clock_info: TpmsClockInfo {
                clock: 0x01A2B3C4,
                reset_count: 3,
                restart_count: 1,
                safe: true,
            },
            firmware_version: 0x0002000300160000,
            attested: TpmuAttest::Quote(TpmsQuoteInfo {
                pcr_select: TpmlPcrSelection::single(TpmAlgId::Sha256, &[0, 1, 2, 3]).unwrap(),
                pcr_digest: Tpm2bDigest::new(vec![0x5a; 32]),
            }),
        }
    }

    #[test]
    fn test_pcr_selection() {
        let sel = TpmsPcrSelection::sha256(&[0, 1, 2, 7]).unwrap();
        assert_eq!(sel.hash, TpmAlgId::Sha256);
        // PCR 0, 1, 2, 7 = bits 0, 1, 2, 7 = 0b10000111 = 0x87
        assert_eq!(sel.pcr_select, vec![0x87, 0x00, 0x00]);
        assert_eq!(sel.pcrs(), vec![0, 1, 2, 7]);

        let sel = TpmsPcrSelection::sha256(&[23]).unwrap();
        assert_eq!(sel.pcr_select, vec![0x00, 0x00, 0x80]);
    }

    #[test]
    fn test_pcr_selection_out_of_range() {
        let err = TpmsPcrSelection::sha256(&[24]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)), "{err}");
        let err = TpmsPcrSelection::new(TpmAlgId::Rsa, &[0]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)), "{err}");
    }

    #[test]
    fn test_pcr_selection_parse() {
        let list: TpmlPcrSelection = "sha256:0,1,2,3".parse().unwrap();
        assert_eq!(list.pcr_selections.len(), 1);
        assert_eq!(list.pcr_selections[0].pcr_select, vec![0x0f, 0x00, 0x00]);
        assert_eq!(list.to_string(), "sha256:0,1,2,3");

        let list: TpmlPcrSelection = "sha1:7+sha384:16,0".parse().unwrap();
        assert_eq!(list.pcr_selections[0].hash, TpmAlgId::Sha1);
        assert_eq!(list.pcr_selections[1].pcrs(), vec![0, 16]);
        assert_eq!(list.to_string(), "sha1:7+sha384:0,16");

        assert!("sha256".parse::<TpmlPcrSelection>().is_err());
        assert!("md5:0".parse::<TpmlPcrSelection>().is_err());
        assert!("sha256:x".parse::<TpmlPcrSelection>().is_err());
        assert!("sha256:99".parse::<TpmlPcrSelection>().is_err());
    }

    #[test]
    fn test_pcr_selection_list_encoding() {
        let list = TpmlPcrSelection::single(TpmAlgId::Sha256, &[0, 1, 2, 3]).unwrap();
        assert_eq!(
            list.to_bytes(),
            vec![0, 0, 0, 1, 0x00, 0x0b, 0x03, 0x0f, 0x00, 0x00]
        );
        assert_eq!(TpmlPcrSelection::from_bytes(&list.to_bytes()).unwrap(), list);
    }

    #[test]
    fn test_pcr_selection_rejects_huge_count() {
        let data = [0xff, 0xff, 0xff, 0xff];
        let err = TpmlPcrSelection::from_bytes(&data).unwrap_err();
        assert!(matches!(err, Error::MalformedStructure(_)), "{err}");
    }

    #[test]
    fn test_attest_roundtrip() {
        let attest = sample_attest();
        let bytes = attest.to_bytes();
        let (decoded, consumed) = TpmsAttest::decode_prefix(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, attest);
    }

    #[test]
    fn test_attest_roundtrip_variants() {
        let mut attest = sample_attest();
        attest.extra_data = Tpm2bData::empty();
        attest.clock_info.safe = false;
        attest.attested = TpmuAttest::Quote(TpmsQuoteInfo {
            pcr_select: "sha1:0+sha256:1,2+sha384:23".parse().unwrap(),
            pcr_digest: Tpm2bDigest::new(vec![7; 20]),
        });
        assert_eq!(TpmsAttest::from_bytes(&attest.to_bytes()).unwrap(), attest);

        // Bodies of other attestation types are kept verbatim
        attest.attest_type = TpmStAttest::Certify.to_u16();
        attest.attested = TpmuAttest::Other(vec![0, 2, 1, 2, 0, 0]);
        assert_eq!(TpmsAttest::from_bytes(&attest.to_bytes()).unwrap(), attest);
    }

    #[test]
    fn test_attest_does_not_judge_magic() {
        let mut attest = sample_attest();
        attest.magic = 0xdeadbeef;
        let decoded = TpmsAttest::from_bytes(&attest.to_bytes()).unwrap();
        assert_eq!(decoded.magic, 0xdeadbeef);
    }

    #[test]
    fn test_attest_truncated() {
        let bytes = sample_attest().to_bytes();
        for len in [0, 5, 20, bytes.len() - 1] {
            let err = TpmsAttest::from_bytes(&bytes[..len]).unwrap_err();
            assert!(matches!(err, Error::MalformedStructure(_)), "len {len}: {err}");
        }
    }

    #[test]
    fn test_signature_decoding() {
        let sig = TpmtSignature::EcDsa(TpmsSignatureEcc {
            hash: TpmAlgId::Sha256,
            signature_r: vec![1; 32],
            signature_s: vec![2; 32],
        });
        let bytes = sig.to_bytes();
        assert_eq!(&bytes[..4], &[0x00, 0x18, 0x00, 0x0b]);
        assert_eq!(TpmtSignature::from_bytes(&bytes).unwrap(), sig);

        let sig = TpmtSignature::Hmac(TpmtHa {
            hash_alg: TpmAlgId::Sha384,
            digest: vec![9; 48],
        });
        assert_eq!(TpmtSignature::from_bytes(&sig.to_bytes()).unwrap(), sig);
        assert_eq!(TpmtSignature::from_bytes(&[0x00, 0x10]).unwrap(), TpmtSignature::Null);

        let err = TpmtSignature::from_bytes(&[0x00, 0x01]).unwrap_err();
        assert!(matches!(err, Error::MalformedStructure(_)), "{err}");
    }

    #[test]
    fn test_scheme_encoding() {
        assert_eq!(TpmtSigScheme::null().to_bytes(), vec![0x00, 0x10]);
        assert_eq!(
            TpmtSigScheme::rsassa(TpmAlgId::Sha256).to_bytes(),
            vec![0x00, 0x14, 0x00, 0x0b]
        );
        let scheme = TpmtScheme::from_bytes(&[0x00, 0x18, 0x00, 0x0c]).unwrap();
        assert_eq!(scheme, TpmtScheme::ecdsa(TpmAlgId::Sha384));
    }
}
