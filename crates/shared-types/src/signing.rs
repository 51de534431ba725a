//! # Command Signing
//!
//! HMAC-SHA256 over the dispatch fields of a command, shared by the cloud
//! (signs at creation, re-verifies at result time) and the edge (verifies
//! before execution). The signing key is derived from the device's shared
//! secret, so a leaked signature never exposes the secret itself:
//!
//! ```text
//! key       = HMAC-SHA256(device_secret, "command-signing-v1")
//! signature = HMAC-SHA256(key, id ‖ dispatch_nonce ‖ expires_at(rfc3339)
//!                              ‖ SHA-256(canonical payload bytes))
//! ```

use crate::ids::CommandId;
use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Domain-separation label for the derived signing key.
pub const SIGNING_CONTEXT: &[u8] = b"command-signing-v1";

/// Derive the per-device signing key from its shared secret.
#[must_use]
pub fn derive_signing_key(device_secret: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(device_secret)
        .expect("HMAC accepts any key length");
    mac.update(SIGNING_CONTEXT);
    mac.finalize().into_bytes().into()
}

/// Sign the dispatch fields. Returns 64 lowercase hex chars.
#[must_use]
pub fn sign_command(
    signing_key: &[u8; 32],
    id: CommandId,
    dispatch_nonce: Uuid,
    expires_at: DateTime<Utc>,
    payload: &serde_json::Value,
) -> String {
    let mut mac = HmacSha256::new_from_slice(signing_key)
        .expect("HMAC accepts any key length");
    mac.update(id.to_string().as_bytes());
    mac.update(dispatch_nonce.as_bytes());
    mac.update(
        expires_at
            .to_rfc3339_opts(SecondsFormat::Micros, true)
            .as_bytes(),
    );
    mac.update(&Sha256::digest(payload.to_string().as_bytes()));
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time verification of a presented signature.
#[must_use]
pub fn verify_command_signature(
    signing_key: &[u8; 32],
    id: CommandId,
    dispatch_nonce: Uuid,
    expires_at: DateTime<Utc>,
    payload: &serde_json::Value,
    presented: &str,
) -> bool {
    let expected = sign_command(signing_key, id, dispatch_nonce, expires_at, payload);
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}
