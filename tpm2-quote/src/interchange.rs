// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Ordered JSON rendering of decoded quotes
//!
//! Key names and order follow what tpm2-tools prints for a decoded
//! `TPMS_ATTEST`, so the output can be diffed against `tpm2_print`.
//! Byte buffers are lowercase hex.

use serde_json::{json, Map, Value};

use crate::constants::*;
use crate::types::*;

fn pcr_selection_value(selection: &TpmlPcrSelection) -> Value {
    selection
        .pcr_selections
        .iter()
        .map(|sel| {
            json!({
                "hash": sel.hash.name(),
                "pcrSelect": sel.pcrs(),
            })
        })
        .collect()
}

fn attested_value(attest: &TpmsAttest) -> Value {
    match &attest.attested {
        TpmuAttest::Quote(info) => json!({
            "quote": {
                "pcrSelect": pcr_selection_value(&info.pcr_select),
                "pcrDigest": hex::encode(&info.pcr_digest.buffer),
            }
        }),
        TpmuAttest::Other(raw) => json!({ "raw": hex::encode(raw) }),
    }
}

fn type_name(attest_type: u16) -> String {
    match TpmStAttest::from_u16(attest_type) {
        Some(t) => t.name().to_string(),
        None => format!("0x{attest_type:04x}"),
    }
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Render an attestation structure
pub fn to_interchange(attest: &TpmsAttest) -> Map<String, Value> {
    into_map(json!({
        "magic": format!("0x{:08x}", attest.magic),
        "type": type_name(attest.attest_type),
        "qualifiedSigner": hex::encode(&attest.qualified_signer.name),
        "extraData": hex::encode(&attest.extra_data.buffer),
        "clockInfo": {
            "clock": attest.clock_info.clock,
            "resetCount": attest.clock_info.reset_count,
            "restartCount": attest.clock_info.restart_count,
            "safe": attest.clock_info.safe,
        },
        "firmwareVersion": attest.firmware_version,
        "attested": attested_value(attest),
    }))
}

/// Render a signature
pub fn signature_to_interchange(signature: &TpmtSignature) -> Map<String, Value> {
    let body = match signature {
        TpmtSignature::RsaSsa(s) | TpmtSignature::RsaPss(s) => json!({
            "hash": s.hash.name(),
            "sig": hex::encode(&s.sig),
        }),
        TpmtSignature::EcDsa(s) => json!({
            "hash": s.hash.name(),
            "signatureR": hex::encode(&s.signature_r),
            "signatureS": hex::encode(&s.signature_s),
        }),
        TpmtSignature::Hmac(ha) => json!({
            "hashAlg": ha.hash_alg.name(),
            "digest": hex::encode(&ha.digest),
        }),
        TpmtSignature::Null => Value::Null,
    };
    into_map(json!({
        "sigAlg": signature.sig_alg().name(),
        "signature": body,
    }))
}

/// Render a quote and its signature as one document
pub fn quote_to_interchange(attest: &TpmsAttest, signature: &TpmtSignature) -> Map<String, Value> {
    let mut map = to_interchange(attest);
    map.insert(
        "signature".into(),
        Value::Object(signature_to_interchange(signature)),
    );
    map
}
