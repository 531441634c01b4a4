//! Request Signing Module
//!
//! Computes the HMAC-SHA-256 signatures the streaming service expects on
//! both the HTTP upgrade handshake and the in-band authentication message.

use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs requests with the shared API secret.
///
/// The secret arrives base64-encoded and is decoded exactly once at
/// construction; a malformed secret is rejected here, before any network
/// activity.
pub struct Signer {
    key: Vec<u8>,
}

impl Signer {
    /// Decode the base64 shared secret into the raw HMAC key.
    pub fn new(secret_b64: &str) -> Result<Self, base64::DecodeError> {
        let key = general_purpose::STANDARD.decode(secret_b64)?;
        Ok(Self { key })
    }

    /// Sign the canonical message `timestamp + method + path` and return
    /// the base64-encoded digest.
    ///
    /// Pure: identical inputs always produce identical output.
    pub fn sign(&self, timestamp: &str, method: &str, path: &str) -> String {
        let message = format!("{}{}{}", timestamp, method, path);
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC can take key of any size");
        mac.update(message.as_bytes());
        general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Build the signed headers for the HTTP-upgrade handshake variant.
    pub fn handshake_headers(
        &self,
        api_key: &str,
        passphrase: &str,
        timestamp: &str,
        path: &str,
    ) -> Vec<(&'static str, String)> {
        vec![
            ("FX-ACCESS-SIGN", self.sign(timestamp, "GET", path)),
            ("FX-ACCESS-TIMESTAMP", timestamp.to_string()),
            ("FX-ACCESS-KEY", api_key.to_string()),
            ("FX-ACCESS-PASSPHRASE", passphrase.to_string()),
            ("Content-Type", "application/json".to_string()),
        ]
    }
}
