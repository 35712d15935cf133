// Copyright (c) 2026 The Palisade Contributors
// SPDX-License-Identifier: Apache-2.0

//! Bearer token extraction and HS256 verification.
//!
//! Signing keys and their issuers live in KV tables so that key
//! rotation replicates with the service state.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

use crate::context::RpcContext;

const BLOCK_SIZE: usize = 64;

/// A verified token, bound to the request for the endpoint to consume.
#[derive(Debug, Clone)]
pub struct Jwt {
    pub key_issuer: String,
    pub header: serde_json::Value,
    pub payload: serde_json::Value,
}

/// A syntactically valid token whose signature has not been checked.
#[derive(Debug, Clone)]
pub struct ParsedToken {
    pub header: serde_json::Value,
    pub payload: serde_json::Value,
    pub kid: String,
    signed_material: String,
    signature: Vec<u8>,
}

/// Pull a bearer token out of the `Authorization` header and split it
/// into its JOSE segments. Returns the human-readable reason on
/// failure; callers prefix it with the method name in the 401 body.
pub fn extract_token(ctx: &RpcContext) -> Result<ParsedToken, String> {
    let Some(auth) = ctx.request_header("authorization") else {
        return Err("Missing Authorization header".to_string());
    };
    let Some(token) = auth.strip_prefix("Bearer ") else {
        return Err("Authorization header is not a Bearer token".to_string());
    };

    let mut segments = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err("Malformed JWT".to_string());
    };

    let header = decode_json_segment(header_b64).ok_or_else(|| "Malformed JWT".to_string())?;
    let payload = decode_json_segment(payload_b64).ok_or_else(|| "Malformed JWT".to_string())?;
    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| "Malformed JWT".to_string())?;

    match header.get("alg").and_then(|v| v.as_str()) {
        Some("HS256") => {}
        Some(_) => return Err("Unsupported JWT signing algorithm".to_string()),
        None => return Err("Malformed JWT".to_string()),
    }
    let Some(kid) = header.get("kid").and_then(|v| v.as_str()) else {
        return Err("Missing kid in JWT header".to_string());
    };

    Ok(ParsedToken {
        kid: kid.to_string(),
        signed_material: format!("{header_b64}.{payload_b64}"),
        signature,
        header,
        payload,
    })
}

/// HS256: HMAC-SHA256 over `header.payload`, compared in constant
/// time.
pub fn validate_token_signature(token: &ParsedToken, secret: &[u8]) -> bool {
    let expected = hmac_sha256(secret, token.signed_material.as_bytes());
    constant_time_eq(&expected, &token.signature)
}

fn decode_json_segment(segment: &str) -> Option<serde_json::Value> {
    let raw = URL_SAFE_NO_PAD.decode(segment).ok()?;
    serde_json::from_slice(&raw).ok()
}

fn hmac_sha256(secret: &[u8], message: &[u8]) -> [u8; 32] {
    let mut key_block = [0u8; BLOCK_SIZE];
    if secret.len() > BLOCK_SIZE {
        let digest = Sha256::digest(secret);
        key_block[..digest.len()].copy_from_slice(&digest);
    } else {
        key_block[..secret.len()].copy_from_slice(secret);
    }

    let mut o_key_pad = [0u8; BLOCK_SIZE];
    let mut i_key_pad = [0u8; BLOCK_SIZE];
    for i in 0..BLOCK_SIZE {
        o_key_pad[i] = key_block[i] ^ 0x5c;
        i_key_pad[i] = key_block[i] ^ 0x36;
    }

    let mut inner = Sha256::new();
    inner.update(i_key_pad);
    inner.update(message);
    let inner_hash = inner.finalize();

    let mut outer = Sha256::new();
    outer.update(o_key_pad);
    outer.update(inner_hash);
    outer.finalize().into()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (&x, &y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
pub(crate) fn mint_token(secret: &[u8], kid: &str, payload: &serde_json::Value) -> String {
    let header = serde_json::json!({ "alg": "HS256", "kid": kid });
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap());
    let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload).unwrap());
    let material = format!("{header_b64}.{payload_b64}");
    let signature = URL_SAFE_NO_PAD.encode(hmac_sha256(secret, material.as_bytes()));
    format!("{material}.{signature}")
}
