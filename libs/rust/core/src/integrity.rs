//! HMAC-SHA256 body signing carried in the `HashSHA256` header.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn mac(key: &[u8]) -> HmacSha256 {
    // HMAC pads or hashes the key to block size, so any length is accepted.
    HmacSha256::new_from_slice(key).expect("HMAC takes variable keys")
}

/// Hex-encoded HMAC-SHA256 of `body` under `key`.
pub fn sign(body: &[u8], key: &[u8]) -> String {
    let mut m = mac(key);
    m.update(body);
    hex::encode(m.finalize().into_bytes())
}

/// Constant-time check of a hex digest. Malformed hex never verifies.
pub fn verify(body: &[u8], key: &[u8], supplied: &str) -> bool {
    let Ok(code) = hex::decode(supplied.trim()) else { return false };
    let mut m = mac(key);
    m.update(body);
    m.verify_slice(&code).is_ok()
}

/// Signer bound to the deployment's shared key.
#[derive(Clone)]
pub struct IntegritySigner {
    key: Vec<u8>,
}

impl IntegritySigner {
    /// `None` for an empty key: signing is disabled for the deployment.
    pub fn new(key: impl AsRef<[u8]>) -> Option<Self> {
        let key = key.as_ref();
        if key.is_empty() { None } else { Some(Self { key: key.to_vec() }) }
    }

    pub fn sign(&self, body: &[u8]) -> String { sign(body, &self.key) }

    pub fn verify(&self, body: &[u8], supplied: &str) -> bool { verify(body, &self.key, supplied) }
}

impl std::fmt::Debug for IntegritySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegritySigner").field("key", &"<redacted>").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify() {
        let body = br#"[{"id":"cpu","type":"gauge","value":0.5}]"#;
        let digest = sign(body, b"secret");
        assert_eq!(digest.len(), 64);
        assert!(verify(body, b"secret", &digest));
        assert!(!verify(body, b"other", &digest));
    }

    #[test]
    fn any_flipped_byte_fails() {
        let body = b"metrics batch payload".to_vec();
        let digest = sign(&body, b"k");
        for i in 0..body.len() {
            let mut tampered = body.clone();
            tampered[i] ^= 0x01;
            assert!(!verify(&tampered, b"k", &digest), "byte {i} flip verified");
        }
    }

    #[test]
    fn malformed_digest_rejected() {
        assert!(!verify(b"x", b"k", "zz-not-hex"));
        assert!(!verify(b"x", b"k", ""));
    }

    #[test]
    fn empty_key_disables_signer() {
        assert!(IntegritySigner::new("").is_none());
        let s = IntegritySigner::new("k").unwrap();
        assert!(s.verify(b"body", &s.sign(b"body")));
        assert!(format!("{s:?}").contains("redacted"));
    }
}
