//! Payload codec: authenticated encryption of the outbound proxy credential
//!
//! The key is derived from the shared secret via PBKDF2-HMAC-SHA256 with a
//! fixed salt (a deterministic key derivation, not password storage) and the
//! ciphertext is URL-safe base64 of `nonce || AES-256-GCM ciphertext`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use pbkdf2::pbkdf2_hmac_array;
use rand::RngCore;
use sha2::Sha256;
use tracing::warn;

use crate::error::{LessorError, Result};
use crate::models::{ProxyRecord, WireProxy};

const KEY_SALT: &[u8] = b"lessor_static_salt_value";
const PBKDF2_ROUNDS: u32 = 100_000;
const NONCE_LEN: usize = 12;

/// Symmetric codec for the credential field
pub struct PayloadCodec {
    cipher: Option<Aes256Gcm>,
}

impl PayloadCodec {
    /// Derive the cipher key from the shared secret. An empty secret yields a
    /// disabled codec whose `encrypt` always fails, which the session turns
    /// into the plaintext fallback.
    pub fn new(secret: &str) -> Self {
        if secret.is_empty() {
            return Self { cipher: None };
        }

        let key = pbkdf2_hmac_array::<Sha256, 32>(secret.as_bytes(), KEY_SALT, PBKDF2_ROUNDS);
        let cipher = Aes256Gcm::new_from_slice(&key).ok();

        Self { cipher }
    }

    pub fn is_enabled(&self) -> bool {
        self.cipher.is_some()
    }

    /// Encrypt a credential for the wire
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| LessorError::Encryption("no encryption key configured".to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| LessorError::Encryption("cipher failure".to_string()))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);

        Ok(URL_SAFE.encode(payload))
    }

    /// Decrypt a credential produced by [`encrypt`](Self::encrypt)
    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| LessorError::Encryption("no encryption key configured".to_string()))?;

        let payload = URL_SAFE
            .decode(encoded)
            .map_err(|e| LessorError::Encryption(format!("invalid base64: {e}")))?;

        if payload.len() < NONCE_LEN {
            return Err(LessorError::Encryption("payload too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| LessorError::Encryption("authentication failure".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|e| LessorError::Encryption(format!("invalid utf-8: {e}")))
    }
}

/// Seal a record for dispatch. On any encryption failure the original
/// plaintext record is sent unchanged and the failure is logged: leases keep
/// flowing even when the codec is broken.
pub fn seal_record(codec: &PayloadCodec, record: ProxyRecord) -> WireProxy {
    match codec.encrypt(&record.credential) {
        Ok(ciphertext) => WireProxy::encrypted(record, ciphertext),
        Err(e) => {
            warn!(proxy_id = record.id, error = %e, "Credential encryption failed, sending plaintext");
            WireProxy::plaintext(record)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64) -> ProxyRecord {
        ProxyRecord {
            id,
            credential: "198.51.100.7:8080:user:pass".to_string(),
            source_id: 1,
            priority: 50,
            blocked: false,
            provider_id: None,
            provider_name: None,
            updated_at: None,
            usage_interval: 30,
        }
    }

    #[test]
    fn test_round_trip() {
        let codec = PayloadCodec::new("shared-secret");
        let ciphertext = codec.encrypt("198.51.100.7:8080:user:pass").unwrap();

        assert_ne!(ciphertext, "198.51.100.7:8080:user:pass");
        assert_eq!(
            codec.decrypt(&ciphertext).unwrap(),
            "198.51.100.7:8080:user:pass"
        );
    }

    #[test]
    fn test_ciphertext_is_url_safe_base64() {
        let codec = PayloadCodec::new("shared-secret");
        let ciphertext = codec.encrypt("h:p").unwrap();

        assert!(URL_SAFE.decode(&ciphertext).is_ok());
    }

    #[test]
    fn test_nonce_varies_between_calls() {
        let codec = PayloadCodec::new("shared-secret");
        let a = codec.encrypt("h:p").unwrap();
        let b = codec.encrypt("h:p").unwrap();

        assert_ne!(a, b);
        assert_eq!(codec.decrypt(&a).unwrap(), codec.decrypt(&b).unwrap());
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let codec = PayloadCodec::new("shared-secret");
        let other = PayloadCodec::new("different-secret");
        let ciphertext = codec.encrypt("h:p").unwrap();

        assert!(other.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn test_tampered_payload_fails() {
        let codec = PayloadCodec::new("shared-secret");
        let ciphertext = codec.encrypt("h:p").unwrap();

        let mut bytes = URL_SAFE.decode(&ciphertext).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = URL_SAFE.encode(bytes);

        assert!(codec.decrypt(&tampered).is_err());
    }

    #[test]
    fn test_disabled_codec() {
        let codec = PayloadCodec::new("");

        assert!(!codec.is_enabled());
        assert!(codec.encrypt("h:p").is_err());
    }

    #[test]
    fn test_seal_record_sets_flag() {
        let codec = PayloadCodec::new("shared-secret");
        let wire = seal_record(&codec, record(7));

        assert!(wire.encrypted);
        assert_ne!(wire.record.credential, record(7).credential);

        let decrypted = codec.decrypt(&wire.record.credential).unwrap();
        assert_eq!(decrypted, record(7).credential);
    }

    #[test]
    fn test_seal_record_plaintext_fallback() {
        let codec = PayloadCodec::new("");
        let wire = seal_record(&codec, record(7));

        assert!(!wire.encrypted);
        assert_eq!(wire.record.credential, record(7).credential);
    }
}
