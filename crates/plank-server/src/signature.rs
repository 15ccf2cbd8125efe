//! Request authentication primitives shared by the provider handlers and the
//! outbound notifier.
//!
//! A provider with no configured secret is never verified: its webhook route
//! is open. That keeps local setups friction-free and is a deliberate
//! trade-off; set a secret for any server reachable from the internet.

use std::collections::HashMap;

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Everything a verifier may look at. The body is the exact bytes received,
/// before any parsing.
#[derive(Debug, Clone, Copy)]
pub struct WebhookRequest<'a> {
    pub body: &'a [u8],
    pub headers: &'a HeaderMap,
    pub query: &'a HashMap<String, String>,
}

impl<'a> WebhookRequest<'a> {
    pub fn new(
        body: &'a [u8],
        headers: &'a HeaderMap,
        query: &'a HashMap<String, String>,
    ) -> Self {
        Self {
            body,
            headers,
            query,
        }
    }

    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Hex-encoded HMAC-SHA256 of `body` keyed by `secret`.
pub fn hmac_sha256_hex(secret: &str, body: &[u8]) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("infallible: HMAC accepts keys of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Check a hex signature against the HMAC of `body`, in constant time.
///
/// Hex case is ignored; anything that is not a 64-character hex string fails.
pub fn verify_hmac_sha256_hex(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let computed = hmac_sha256_hex(secret, body);
    let provided = signature_hex.trim().to_ascii_lowercase();
    constant_time_eq(computed.as_bytes(), provided.as_bytes())
}

/// Constant-time byte comparison. Unequal lengths compare unequal.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get("authorization")?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") {
        Some(token.trim())
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
