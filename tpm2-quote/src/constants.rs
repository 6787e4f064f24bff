// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: BUSL-1.1

//! TPM 2.0 constants and command codes

/// `TPM_GENERATED_VALUE`, the magic that opens every TPM-produced `TPMS_ATTEST`
pub const TPM_GENERATED_VALUE: u32 = 0xff544347;

/// Largest qualifying data accepted by `TPM2_Quote`
pub const MAX_QUALIFYING_DATA_SIZE: usize = 64;

/// Bitmap size used when building PCR selections (PCRs 0-23)
pub const PCR_SELECT_SIZE: usize = 3;

/// Largest bitmap accepted when decoding PCR selections
pub const PCR_SELECT_MAX: usize = 4;

/// Highest PCR index that fits in a `PCR_SELECT_SIZE` bitmap
pub const MAX_PCR_INDEX: u32 = (PCR_SELECT_SIZE as u32) * 8 - 1;

/// Upper bound on the number of banks in a `TPML_PCR_SELECTION`
pub const MAX_PCR_BANKS: usize = 16;

/// TPM 2.0 Command Codes (TPM_CC)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TpmCc {
    Startup = 0x00000144,
    Quote = 0x00000158,
    ReadPublic = 0x00000173,
    GetRandom = 0x0000017B,
}

impl TpmCc {
    pub fn to_u32(self) -> u32 {
        self as u32
    }
}

/// TPM 2.0 Response Codes (TPM_RC)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TpmRc {
    Success = 0x00000000,
    // Format 0 errors
    Initialize = 0x00000100,
    Failure = 0x00000101,
    Sequence = 0x00000103,
    Disabled = 0x00000120,
    CommandCode = 0x00000143,
    // Format 1 errors (parameter errors)
    Value = 0x00000184,
    Handle = 0x0000008B,
    Scheme = 0x00000992,
    Size = 0x00000995,
    // Auth errors
    AuthFail = 0x0000098E,
    PolicyFail = 0x0000099D,
    // Warnings
    Retry = 0x00000922,
    Locality = 0x00000907,
}

impl TpmRc {
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            0x00000000 => Some(TpmRc::Success),
            0x00000100 => Some(TpmRc::Initialize),
            0x00000101 => Some(TpmRc::Failure),
            0x00000103 => Some(TpmRc::Sequence),
            0x00000120 => Some(TpmRc::Disabled),
            0x00000143 => Some(TpmRc::CommandCode),
            0x00000184 => Some(TpmRc::Value),
            0x0000008B => Some(TpmRc::Handle),
            0x00000992 => Some(TpmRc::Scheme),
            0x00000995 => Some(TpmRc::Size),
            0x0000098E => Some(TpmRc::AuthFail),
            0x0000099D => Some(TpmRc::PolicyFail),
            0x00000922 => Some(TpmRc::Retry),
            0x00000907 => Some(TpmRc::Locality),
            _ => None,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, TpmRc::Success)
    }
}

/// TPM 2.0 Algorithm IDs (TPM_ALG_ID)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum TpmAlgId {
    Null = 0x0010,
    Sha1 = 0x0004,
    Sha256 = 0x000B,
    Sha384 = 0x000C,
    Sha512 = 0x000D,
    Rsa = 0x0001,
    Hmac = 0x0005,
    Ecc = 0x0023,
    Aes = 0x0006,
    Cfb = 0x0043,
    RsaSsa = 0x0014,
    RsaEs = 0x0015,
    RsaPss = 0x0016,
    Oaep = 0x0017,
    EcDsa = 0x0018,
    Ecdh = 0x0019,
    EcSchnorr = 0x001C,
    KeyedHash = 0x0008,
    SymCipher = 0x0025,
}

impl TpmAlgId {
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0x0010 => Some(TpmAlgId::Null),
            0x0004 => Some(TpmAlgId::Sha1),
            0x000B => Some(TpmAlgId::Sha256),
            0x000C => Some(TpmAlgId::Sha384),
            0x000D => Some(TpmAlgId::Sha512),
            0x0001 => Some(TpmAlgId::Rsa),
            0x0005 => Some(TpmAlgId::Hmac),
            0x0023 => Some(TpmAlgId::Ecc),
            0x0006 => Some(TpmAlgId::Aes),
            0x0043 => Some(TpmAlgId::Cfb),
            0x0014 => Some(TpmAlgId::RsaSsa),
            0x0015 => Some(TpmAlgId::RsaEs),
            0x0016 => Some(TpmAlgId::RsaPss),
            0x0017 => Some(TpmAlgId::Oaep),
            0x0018 => Some(TpmAlgId::EcDsa),
            0x0019 => Some(TpmAlgId::Ecdh),
            0x001C => Some(TpmAlgId::EcSchnorr),
            0x0008 => Some(TpmAlgId::KeyedHash),
            0x0025 => Some(TpmAlgId::SymCipher),
            _ => None,
        }
    }

    pub fn digest_size(self) -> usize {
        match self {
            TpmAlgId::Sha1 => 20,
            TpmAlgId::Sha256 => 32,
            TpmAlgId::Sha384 => 48,
            TpmAlgId::Sha512 => 64,
            _ => 0,
        }
    }

    pub fn is_hash(self) -> bool {
        self.digest_size() != 0
    }

    /// Lowercase name as used in PCR selection strings and JSON output
    pub fn name(self) -> &'static str {
        match self {
            TpmAlgId::Null => "null",
            TpmAlgId::Sha1 => "sha1",
            TpmAlgId::Sha256 => "sha256",
            TpmAlgId::Sha384 => "sha384",
            TpmAlgId::Sha512 => "sha512",
            TpmAlgId::Rsa => "rsa",
            TpmAlgId::Hmac => "hmac",
            TpmAlgId::Ecc => "ecc",
            TpmAlgId::Aes => "aes",
            TpmAlgId::Cfb => "cfb",
            TpmAlgId::RsaSsa => "rsassa",
            TpmAlgId::RsaEs => "rsaes",
            TpmAlgId::RsaPss => "rsapss",
            TpmAlgId::Oaep => "oaep",
            TpmAlgId::EcDsa => "ecdsa",
            TpmAlgId::Ecdh => "ecdh",
            TpmAlgId::EcSchnorr => "ecschnorr",
            TpmAlgId::KeyedHash => "keyedhash",
            TpmAlgId::SymCipher => "symcipher",
        }
    }

    /// Look up a hash algorithm by its name (`sha1`, `sha256`, ...)
    pub fn hash_from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sha1" => Some(TpmAlgId::Sha1),
            "sha256" => Some(TpmAlgId::Sha256),
            "sha384" => Some(TpmAlgId::Sha384),
            "sha512" => Some(TpmAlgId::Sha512),
            _ => None,
        }
    }
}

/// TPM 2.0 Permanent Handles
pub mod tpm_rh {
    pub const NULL: u32 = 0x40000007;
    pub const PW: u32 = 0x40000009; // Password authorization
}

/// TPM 2.0 Startup Types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum TpmSu {
    Clear = 0x0000,
    State = 0x0001,
}

/// TPM 2.0 Object Attributes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TpmaObject(pub u32);

impl TpmaObject {
    pub const FIXED_TPM: u32 = 1 << 1;
    pub const FIXED_PARENT: u32 = 1 << 4;
    pub const SENSITIVE_DATA_ORIGIN: u32 = 1 << 5;
    pub const USER_WITH_AUTH: u32 = 1 << 6;
    pub const RESTRICTED: u32 = 1 << 16;
    pub const DECRYPT: u32 = 1 << 17;
    pub const SIGN_ENCRYPT: u32 = 1 << 18;

    pub fn contains(self, flag: u32) -> bool {
        self.0 & flag == flag
    }
}

/// TPM 2.0 Session Attributes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TpmaSa(pub u8);

impl TpmaSa {
    pub const CONTINUE_SESSION: u8 = 1 << 0;
    pub const AUDIT_EXCLUSIVE: u8 = 1 << 1;
    pub const AUDIT_RESET: u8 = 1 << 2;
    pub const DECRYPT: u8 = 1 << 5;
    pub const ENCRYPT: u8 = 1 << 6;
    pub const AUDIT: u8 = 1 << 7;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn with_continue_session(mut self) -> Self {
        self.0 |= Self::CONTINUE_SESSION;
        self
    }
}

/// TPM command/response header tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum TpmSt {
    NoSessions = 0x8001,
    Sessions = 0x8002,
    RspCommand = 0x00C4,
}

impl TpmSt {
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0x8001 => Some(TpmSt::NoSessions),
            0x8002 => Some(TpmSt::Sessions),
            0x00C4 => Some(TpmSt::RspCommand),
            _ => None,
        }
    }
}

/// Attestation structure tags (TPM_ST_ATTEST_*)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum TpmStAttest {
    Nv = 0x8014,
    CommandAudit = 0x8015,
    SessionAudit = 0x8016,
    Certify = 0x8017,
    Quote = 0x8018,
    Time = 0x8019,
    Creation = 0x801A,
}

impl TpmStAttest {
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0x8014 => Some(TpmStAttest::Nv),
            0x8015 => Some(TpmStAttest::CommandAudit),
            0x8016 => Some(TpmStAttest::SessionAudit),
            0x8017 => Some(TpmStAttest::Certify),
            0x8018 => Some(TpmStAttest::Quote),
            0x8019 => Some(TpmStAttest::Time),
            0x801A => Some(TpmStAttest::Creation),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TpmStAttest::Nv => "attest_nv",
            TpmStAttest::CommandAudit => "attest_command_audit",
            TpmStAttest::SessionAudit => "attest_session_audit",
            TpmStAttest::Certify => "attest_certify",
            TpmStAttest::Quote => "attest_quote",
            TpmStAttest::Time => "attest_time",
            TpmStAttest::Creation => "attest_creation",
        }
    }
}

/// ECC Curve IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum TpmEccCurve {
    None = 0x0000,
    NistP256 = 0x0003,
    NistP384 = 0x0004,
    NistP521 = 0x0005,
}

impl TpmEccCurve {
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0x0000 => Some(TpmEccCurve::None),
            0x0003 => Some(TpmEccCurve::NistP256),
            0x0004 => Some(TpmEccCurve::NistP384),
            0x0005 => Some(TpmEccCurve::NistP521),
            _ => None,
        }
    }
}
