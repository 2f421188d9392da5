//! Provider secret envelope
//!
//! Stored provider configs are either a plaintext JSON object or the envelope
//! `{ "encrypted": true, "data": "<ivHex>:<cipherHex>" }`, AES-256-CBC with a key
//! derived from the operator secret via scrypt.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::error::{BrokerError, Result};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const KDF_SALT: &[u8] = b"salt";
const KDF_LOG_N: u8 = 14;
const KDF_R: u32 = 8;
const KDF_P: u32 = 1;
const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

/// Symmetric cipher for provider config secrets
#[derive(Clone)]
pub struct ConfigCipher {
    key: [u8; KEY_LEN],
}

impl std::fmt::Debug for ConfigCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigCipher").finish_non_exhaustive()
    }
}

impl ConfigCipher {
    /// Derive the key with scrypt (N=16384, r=8, p=1)
    pub fn from_secret(secret: &str) -> Result<Self> {
        let params = scrypt::Params::new(KDF_LOG_N, KDF_R, KDF_P, KEY_LEN)
            .map_err(|e| BrokerError::Internal(format!("invalid scrypt params: {}", e)))?;

        let mut key = [0u8; KEY_LEN];
        scrypt::scrypt(secret.as_bytes(), KDF_SALT, &params, &mut key)
            .map_err(|e| BrokerError::Internal(format!("key derivation failed: {}", e)))?;

        Ok(Self { key })
    }

    /// Encrypt to the `<ivHex>:<cipherHex>` form
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let encryptor = Aes256CbcEnc::new_from_slices(&self.key, &iv)
            .map_err(|e| BrokerError::Internal(format!("cipher init failed: {}", e)))?;
        let ciphertext = encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        Ok(format!("{}:{}", hex::encode(iv), hex::encode(ciphertext)))
    }

    /// Decrypt the `<ivHex>:<cipherHex>` form
    pub fn decrypt(&self, data: &str) -> Result<Vec<u8>> {
        let (iv_hex, cipher_hex) = data
            .split_once(':')
            .ok_or_else(|| BrokerError::Decryption("expected <iv>:<ciphertext>".into()))?;

        let iv = hex::decode(iv_hex.trim())
            .map_err(|e| BrokerError::Decryption(format!("invalid iv: {}", e)))?;
        if iv.len() != IV_LEN {
            return Err(BrokerError::Decryption(format!(
                "iv must be {} bytes, got {}",
                IV_LEN,
                iv.len()
            )));
        }

        let ciphertext = hex::decode(cipher_hex.trim())
            .map_err(|e| BrokerError::Decryption(format!("invalid ciphertext: {}", e)))?;

        let decryptor = Aes256CbcDec::new_from_slices(&self.key, &iv)
            .map_err(|e| BrokerError::Decryption(e.to_string()))?;

        decryptor
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| BrokerError::Decryption("bad padding or wrong key".into()))
    }

    /// Decrypt an envelope; plaintext objects pass through unchanged
    pub fn open(&self, stored: &Value) -> Result<Map<String, Value>> {
        let object = stored
            .as_object()
            .ok_or_else(|| BrokerError::Decryption("config is not a JSON object".into()))?;

        if !is_envelope(object) {
            return Ok(object.clone());
        }

        let data = object
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| BrokerError::Decryption("envelope has no data".into()))?;

        let plaintext = self.decrypt(data)?;
        match serde_json::from_slice::<Value>(&plaintext) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(BrokerError::Decryption(
                "decrypted config is not a JSON object".into(),
            )),
            Err(e) => Err(BrokerError::Decryption(format!(
                "decrypted config is not JSON: {}",
                e
            ))),
        }
    }
}

fn is_envelope(object: &Map<String, Value>) -> bool {
    object.get("encrypted").and_then(Value::as_bool) == Some(true)
}

/// Plain config for a stored value, or an empty map when it cannot be opened
pub fn decrypt_config(cipher: &ConfigCipher, stored: &Value) -> Map<String, Value> {
    match cipher.open(stored) {
        Ok(map) => map,
        Err(e) => {
            warn!(error = %e, "Failed to decrypt provider config, using empty config");
            Map::new()
        }
    }
}

/// Wrap a plain config object in the encrypted envelope
pub fn encrypt_config(cipher: &ConfigCipher, config: &Map<String, Value>) -> Result<Value> {
    let plaintext = serde_json::to_vec(config)?;
    let data = cipher.encrypt(&plaintext)?;
    Ok(json!({ "encrypted": true, "data": data }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    fn cipher() -> &'static ConfigCipher {
        static CIPHER: OnceLock<ConfigCipher> = OnceLock::new();
        CIPHER.get_or_init(|| ConfigCipher::from_secret("unit-test-secret").unwrap())
    }

    #[test]
    fn test_key_derivation_is_deterministic() {
        let other = ConfigCipher::from_secret("unit-test-secret").unwrap();
        assert_eq!(other.key, cipher().key);

        let different = ConfigCipher::from_secret("another-secret").unwrap();
        assert_ne!(different.key, cipher().key);
    }

    #[test]
    fn test_envelope_opens_to_original_object() {
        let plain = json!({ "username": "acct", "password": "s3cret", "zone": "isp" });
        let envelope = encrypt_config(cipher(), plain.as_object().unwrap()).unwrap();

        assert_eq!(envelope["encrypted"], json!(true));
        let data = envelope["data"].as_str().unwrap();
        let (iv, body) = data.split_once(':').unwrap();
        assert_eq!(iv.len(), 32);
        assert!(!body.contains("s3cret"));

        let opened = decrypt_config(cipher(), &envelope);
        assert_eq!(Value::Object(opened), plain);
    }

    #[test]
    fn test_fresh_iv_per_encryption() {
        let a = cipher().encrypt(b"{}").unwrap();
        let b = cipher().encrypt(b"{}").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_plaintext_config_passes_through() {
        let plain = json!({ "apiKey": "k", "encrypted": false });
        let opened = decrypt_config(cipher(), &plain);
        assert_eq!(Value::Object(opened), plain);
    }

    #[test]
    fn test_bad_envelopes_yield_empty_config() {
        let cases = [
            json!({ "encrypted": true }),
            json!({ "encrypted": true, "data": "nocolon" }),
            json!({ "encrypted": true, "data": "zz:00" }),
            json!({ "encrypted": true, "data": "00112233:0011" }),
            json!("not an object"),
        ];

        for case in cases {
            assert!(decrypt_config(cipher(), &case).is_empty(), "case {}", case);
        }
    }

    #[test]
    fn test_wrong_key_fails_to_open() {
        let plain = json!({ "apiKey": "k" });
        let envelope = encrypt_config(cipher(), plain.as_object().unwrap()).unwrap();

        let wrong = ConfigCipher::from_secret("wrong-secret").unwrap();
        let err = wrong.open(&envelope);
        // a wrong key nearly always breaks the padding; if it happens to unpad, the JSON parse fails
        assert!(matches!(err, Err(BrokerError::Decryption(_))));
    }
}
