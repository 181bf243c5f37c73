//! HMAC-SHA256 webhook signatures (`sha256=<hex>` header format).

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use crate::error::{Result, SyncError};

type HmacSha256 = Hmac<Sha256>;

const PREFIX: &str = "sha256=";

/// Verifies `header` against the HMAC of `payload` in constant time.
pub fn verify(secret: &SecretString, payload: &[u8], header: Option<&str>) -> Result<()> {
    let header = header
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| SyncError::InvalidSignature("missing signature header".to_string()))?;
    let hex_digest = header
        .strip_prefix(PREFIX)
        .ok_or_else(|| SyncError::InvalidSignature("expected a sha256= signature".to_string()))?;
    let expected = hex::decode(hex_digest)
        .map_err(|_| SyncError::InvalidSignature("signature is not hex".to_string()))?;

    let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
        .map_err(|e| SyncError::InvalidSignature(e.to_string()))?;
    mac.update(payload);
    mac.verify_slice(&expected)
        .map_err(|_| SyncError::InvalidSignature("signature mismatch".to_string()))
}

/// Computes the header value for `payload`. Used by senders and tests.
pub fn sign(secret: &SecretString, payload: &[u8]) -> String {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(secret.expose_secret().as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    format!("{}{}", PREFIX, hex::encode(mac.finalize().into_bytes()))
}
