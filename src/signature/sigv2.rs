//! Legacy Signature Version 2 presigned URLs
//!
//! ```text
//! StringToSign = METHOD + "\n\n\n" + EXPIRES + "\n" + PATH
//! Signature    = hex(HMAC-SHA256(secret, StringToSign))
//! ```
//!
//! `EXPIRES` is an absolute Unix timestamp, `PATH` the request path as sent.

use super::sigv4::hmac_sha256;

pub const PARAM_ACCESS_KEY: &str = "AWSAccessKeyId";
pub const PARAM_EXPIRES: &str = "Expires";
pub const PARAM_SIGNATURE: &str = "Signature";

pub fn string_to_sign_v2(method: &str, expires: i64, path: &str) -> String {
    format!("{}\n\n\n{}\n{}", method, expires, path)
}

/// Hex-encoded V2 signature. Pure, always 64 characters.
pub fn calculate_signature_v2(secret_access_key: &str, method: &str, expires: i64, path: &str) -> String {
    let sts = string_to_sign_v2(method, expires, path);
    hex::encode(hmac_sha256(secret_access_key.as_bytes(), sts.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_to_sign_layout() {
        assert_eq!(
            string_to_sign_v2("GET", 1700000000, "/bucket/key"),
            "GET\n\n\n1700000000\n/bucket/key"
        );
    }

    #[test]
    fn test_signature_is_deterministic() {
        let a = calculate_signature_v2("secret", "GET", 1700000000, "/bucket/key");
        let b = calculate_signature_v2("secret", "GET", 1700000000, "/bucket/key");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, calculate_signature_v2("secret", "PUT", 1700000000, "/bucket/key"));
        assert_ne!(a, calculate_signature_v2("secret", "GET", 1700000001, "/bucket/key"));
    }
}
