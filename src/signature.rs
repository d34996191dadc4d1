//! HMAC-SHA256 request signatures.
//!
//! A signed request carries `hex(HMAC-SHA256(secret_key, content))`. The
//! validator resolves the secret through the registry and compares the
//! decoded signature in constant time.
//!
//! The legacy element form signs a set of strings: the elements are sorted
//! lexicographically (byte order) and concatenated without a separator
//! before hashing. Signer and verifier must sort the same way.

use crate::error::{AuthError, Result};
use crate::registry::AkskRegistry;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

fn mac_bytes(secret: &str, content: &[u8]) -> Vec<u8> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(content);
    mac.finalize().into_bytes().to_vec()
}

fn joined_sorted(elements: &[&str]) -> String {
    let mut sorted = elements.to_vec();
    sorted.sort_unstable();
    sorted.concat()
}

/// Lowercase hex signature over `content`.
pub fn sign(secret: &str, content: &str) -> String {
    hex::encode(mac_bytes(secret, content.as_bytes()))
}

/// Lowercase hex signature over the sorted concatenation of `elements`.
pub fn sign_elements(secret: &str, elements: &[&str]) -> String {
    sign(secret, &joined_sorted(elements))
}

/// Check `signature_hex` against `content` with a known secret.
pub fn verify_with_secret(secret: &str, signature_hex: &str, content: &str) -> Result<()> {
    let provided = hex::decode(signature_hex.trim()).map_err(|_| AuthError::SignatureInvalid)?;
    let expected = mac_bytes(secret, content.as_bytes());
    if provided.ct_eq(expected.as_slice()).unwrap_u8() == 1 {
        Ok(())
    } else {
        Err(AuthError::SignatureInvalid)
    }
}

/// Legacy element-set verification with a known secret.
pub fn validate_elements(secret: &str, signature_hex: &str, elements: &[&str]) -> Result<()> {
    verify_with_secret(secret, signature_hex, &joined_sorted(elements))
}

pub struct SignatureValidator {
    registry: Arc<AkskRegistry>,
}

impl SignatureValidator {
    pub fn new(registry: Arc<AkskRegistry>) -> Self {
        Self { registry }
    }

    /// Verify a request signed with the secret behind `access_key`.
    ///
    /// `NotFound` and `Expired` from the registry pass through unchanged.
    pub fn validate(&self, access_key: &str, signature_hex: &str, content: &str) -> Result<()> {
        let secret = self.registry.lookup_secret(access_key)?;
        verify_with_secret(&secret, signature_hex, content).inspect_err(|_| {
            debug!(access_key, "request signature mismatch");
        })
    }

    pub async fn validate_async(
        &self,
        access_key: &str,
        signature_hex: &str,
        content: &str,
    ) -> Result<()> {
        self.validate(access_key, signature_hex, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::clock::ManualClock;
    use crate::store::MemoryCredentialStore;
    use std::time::Duration;

    fn validator() -> (ManualClock, Arc<AkskRegistry>, SignatureValidator) {
        let clock = ManualClock::new(1_700_000_000);
        let registry = Arc::new(AkskRegistry::new(
            Arc::new(MemoryCredentialStore::new()),
            Arc::new(MemoryCache::new(Arc::new(clock.clone()))),
            Arc::new(clock.clone()),
        ));
        (clock, registry.clone(), SignatureValidator::new(registry))
    }

    #[test]
    fn rfc4231_case_2_vector() {
        assert_eq!(
            sign("Jefe", "what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn valid_signature_passes_for_many_contents() {
        let (_clock, registry, validator) = validator();
        let rec = registry.generate(1, Duration::from_secs(300), "").unwrap();

        let long = "x".repeat(4096);
        for content in ["", "a", "{\"event\":\"login\"}", "多字节内容", long.as_str()] {
            let sig = sign(&rec.secret_key, content);
            validator
                .validate(&rec.access_key, &sig, content)
                .unwrap_or_else(|e| panic!("content {content:?}: {e}"));
        }
    }

    #[test]
    fn any_flipped_byte_is_rejected() {
        let (_clock, registry, validator) = validator();
        let rec = registry.generate(1, Duration::ZERO, "").unwrap();
        let content = "payload";
        let sig = hex::decode(sign(&rec.secret_key, content)).unwrap();

        for i in 0..sig.len() {
            let mut bad = sig.clone();
            bad[i] ^= 0x01;
            assert!(matches!(
                validator.validate(&rec.access_key, &hex::encode(&bad), content),
                Err(AuthError::SignatureInvalid)
            ));
        }
    }

    #[test]
    fn bad_hex_and_truncation_are_signature_invalid() {
        let (_clock, registry, validator) = validator();
        let rec = registry.generate(1, Duration::ZERO, "").unwrap();
        let sig = sign(&rec.secret_key, "c");

        for bad in ["zz", "abc", "", &sig[..62]] {
            assert!(matches!(
                validator.validate(&rec.access_key, bad, "c"),
                Err(AuthError::SignatureInvalid)
            ));
        }
        // uppercase hex is still hex
        validator
            .validate(&rec.access_key, &sig.to_uppercase(), "c")
            .unwrap();
    }

    #[test]
    fn registry_errors_pass_through() {
        let (clock, registry, validator) = validator();
        assert!(matches!(
            validator.validate("missing", "00", "c"),
            Err(AuthError::NotFound)
        ));

        let rec = registry.generate(1, Duration::from_secs(5), "").unwrap();
        clock.advance(5);
        let sig = sign(&rec.secret_key, "c");
        assert!(matches!(
            validator.validate(&rec.access_key, &sig, "c"),
            Err(AuthError::Expired)
        ));
    }

    #[test]
    fn element_order_does_not_change_signature() {
        assert_eq!(sign_elements("k", &["b", "a"]), sign_elements("k", &["a", "b"]));
        assert_eq!(sign_elements("k", &["b", "a"]), sign("k", "ab"));

        let sig = sign_elements("k", &["ts=1", "body", "ak"]);
        validate_elements("k", &sig, &["ak", "ts=1", "body"]).unwrap();
        assert!(matches!(
            validate_elements("k", &sig, &["ak", "ts=2", "body"]),
            Err(AuthError::SignatureInvalid)
        ));
    }
}
