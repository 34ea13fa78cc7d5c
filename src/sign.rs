//! Webhook signature handshake.
//!
//! The platform signs every webhook call with
//! `signature = SHA1(sort(token, timestamp, nonce))`. Embedders verify the
//! GET echostr handshake and POST authenticity with [`verify`].

use sha1::{Digest, Sha1};

/// Compute the webhook signature for the configured token.
pub fn sign(token: &str, timestamp: &str, nonce: &str) -> String {
    let mut parts = [token, timestamp, nonce];
    parts.sort();

    let combined = parts.join("");
    let hash = Sha1::digest(combined.as_bytes());
    hex::encode(hash)
}

/// Check a signature sent by the platform.
pub fn verify(token: &str, timestamp: &str, nonce: &str, signature: &str) -> bool {
    sign(token, timestamp, nonce) == signature
}
