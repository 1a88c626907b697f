use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Lowercase hex HMAC-SHA256 of `payload` keyed with `secret`.
pub fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Recompute the HMAC of `payload` and compare it against `signature` in
/// constant time.
pub fn verify_hmac_sha256_hex(
    secret: &str,
    payload: &[u8],
    signature: &str,
) -> Result<bool, anyhow::Error> {
    let expected = hmac_sha256_hex(secret, payload)?;
    Ok(secure_compare(&expected, signature))
}

/// Constant-time string equality. Length mismatch returns early; the length of
/// a hex digest or a shared token is not secret.
pub fn secure_compare(expected: &str, received: &str) -> bool {
    let expected_bytes = expected.as_bytes();
    let received_bytes = received.as_bytes();

    if expected_bytes.len() != received_bytes.len() {
        return false;
    }

    expected_bytes.ct_eq(received_bytes).into()
}
