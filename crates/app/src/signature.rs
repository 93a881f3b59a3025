use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

pub const HMAC_PREFIX: &str = "sha256=";

/// Borrowed view of the authentication material for one webhook delivery.
///
/// `body` must be the exact bytes received on the wire; signing a
/// re-serialized form produces a MAC that never matches.
pub struct WebhookEnvelope<'a> {
    pub message_id: &'a str,
    pub timestamp: &'a str,
    pub signature: &'a str,
    pub body: &'a [u8],
}

/// Verifies the delivery signature against the shared webhook secret.
///
/// The signing input is `message_id || timestamp || body` with no delimiters.
/// Comparison is constant-time over the full signature; values of differing
/// length are rejected before any byte is compared.
pub fn verify(secret: &[u8], envelope: &WebhookEnvelope<'_>) -> bool {
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret) else {
        return false;
    };
    mac.update(envelope.message_id.as_bytes());
    mac.update(envelope.timestamp.as_bytes());
    mac.update(envelope.body);

    let expected = format!("{HMAC_PREFIX}{}", hex::encode(mac.finalize().into_bytes()));
    let expected = expected.as_bytes();
    let provided = envelope.signature.as_bytes();
    if expected.len() != provided.len() {
        return false;
    }
    expected.ct_eq(provided).into()
}
