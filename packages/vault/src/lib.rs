//! Credential key proxy.
//!
//! Plaintext secrets live only in process memory. Capability adapters never
//! receive a secret as a string: they hold an opaque [`CredentialHandle`]
//! and the proxy injects the value into outbound request headers at the
//! boundary. At rest, credentials are sealed with AES-256-GCM under a key
//! derived from the master key; tampering with any byte of the envelope
//! (salt, nonce, ciphertext or tag) fails decryption cleanly.

pub mod redact;

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use thiserror::Error;

pub use redact::{redact_headers, redact_text, SENSITIVE_HEADER_DENYLIST};

/// Minimum master key length. Shorter keys do not carry enough entropy
/// for the derived AES-256 key.
pub const MIN_MASTER_KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("master key must be at least {MIN_MASTER_KEY_LEN} characters")]
    MasterKeyTooShort,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed: ciphertext rejected")]
    DecryptionFailed,
    #[error("invalid envelope format")]
    InvalidEnvelope,
    #[error("no credential for adapter '{0}'")]
    CredentialMissing(String),
}

/// Opaque reference an adapter holds instead of a secret.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CredentialHandle {
    adapter_id: String,
}

impl CredentialHandle {
    pub fn adapter_id(&self) -> &str {
        &self.adapter_id
    }
}

/// Sealed credential as stored durably.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SealedCredential {
    /// Key-derivation salt (base64)
    pub salt: String,
    /// GCM nonce (base64, 12 bytes)
    pub nonce: String,
    /// Ciphertext including the GCM tag (base64)
    pub ciphertext: String,
}

/// Derive the AES-256 key from the master key and a salt.
fn derive_key(master_key: &str, salt: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(master_key.as_bytes());
    hasher.update(salt);
    hasher.finalize().into()
}

/// Seal a plaintext under the master key.
pub fn seal(master_key: &str, plaintext: &str) -> Result<SealedCredential, VaultError> {
    if master_key.len() < MIN_MASTER_KEY_LEN {
        return Err(VaultError::MasterKeyTooShort);
    }
    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut salt);
    let key_bytes = derive_key(master_key, &salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| VaultError::EncryptionFailed)?;
    Ok(SealedCredential {
        salt: BASE64.encode(salt),
        nonce: BASE64.encode(nonce),
        ciphertext: BASE64.encode(ciphertext),
    })
}

/// Open a sealed credential. Any altered byte fails the GCM tag check.
pub fn open(master_key: &str, sealed: &SealedCredential) -> Result<String, VaultError> {
    if master_key.len() < MIN_MASTER_KEY_LEN {
        return Err(VaultError::MasterKeyTooShort);
    }
    let salt = BASE64
        .decode(&sealed.salt)
        .map_err(|_| VaultError::InvalidEnvelope)?;
    let nonce_bytes = BASE64
        .decode(&sealed.nonce)
        .map_err(|_| VaultError::InvalidEnvelope)?;
    let ciphertext = BASE64
        .decode(&sealed.ciphertext)
        .map_err(|_| VaultError::InvalidEnvelope)?;
    if nonce_bytes.len() != 12 {
        return Err(VaultError::InvalidEnvelope);
    }
    let key_bytes = derive_key(master_key, &salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
        .map_err(|_| VaultError::DecryptionFailed)?;
    String::from_utf8(plaintext).map_err(|_| VaultError::DecryptionFailed)
}

/// The in-process key proxy.
pub struct CredentialVault {
    master_key: String,
    /// adapter id → plaintext, held only here
    secrets: RwLock<HashMap<String, String>>,
}

impl CredentialVault {
    pub fn new(master_key: impl Into<String>) -> Result<Self, VaultError> {
        let master_key = master_key.into();
        if master_key.len() < MIN_MASTER_KEY_LEN {
            return Err(VaultError::MasterKeyTooShort);
        }
        Ok(Self {
            master_key,
            secrets: RwLock::new(HashMap::new()),
        })
    }

    /// Store a plaintext credential for an adapter and hand back the opaque
    /// handle the adapter keeps.
    pub fn store(&self, adapter_id: impl Into<String>, secret: impl Into<String>) -> CredentialHandle {
        let adapter_id = adapter_id.into();
        self.secrets
            .write()
            .insert(adapter_id.clone(), secret.into());
        CredentialHandle { adapter_id }
    }

    /// Load a previously sealed credential from durable storage.
    pub fn store_sealed(
        &self,
        adapter_id: impl Into<String>,
        sealed: &SealedCredential,
    ) -> Result<CredentialHandle, VaultError> {
        let plaintext = open(&self.master_key, sealed)?;
        Ok(self.store(adapter_id, plaintext))
    }

    /// Seal the credential behind a handle for durable storage.
    pub fn seal_for_storage(&self, handle: &CredentialHandle) -> Result<SealedCredential, VaultError> {
        let secrets = self.secrets.read();
        let plaintext = secrets
            .get(&handle.adapter_id)
            .ok_or_else(|| VaultError::CredentialMissing(handle.adapter_id.clone()))?;
        seal(&self.master_key, plaintext)
    }

    pub fn has_credential(&self, adapter_id: &str) -> bool {
        self.secrets.read().contains_key(adapter_id)
    }

    /// Inject the secret behind `handle` into an outbound header map. The
    /// secret crosses the boundary here and nowhere else.
    pub fn inject_header(
        &self,
        handle: &CredentialHandle,
        headers: &mut HashMap<String, String>,
        header_name: &str,
        prefix: Option<&str>,
    ) -> Result<(), VaultError> {
        let secrets = self.secrets.read();
        let secret = secrets
            .get(&handle.adapter_id)
            .ok_or_else(|| VaultError::CredentialMissing(handle.adapter_id.clone()))?;
        let value = match prefix {
            Some(p) => format!("{p}{secret}"),
            None => secret.clone(),
        };
        headers.insert(header_name.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn seal_open_round_trip() {
        let sealed = seal(KEY, "sk-live-secret-token").unwrap();
        assert_eq!(open(KEY, &sealed).unwrap(), "sk-live-secret-token");
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let sealed = seal(KEY, "payload").unwrap();

        // Flip one byte in each envelope component in turn.
        for field in ["ciphertext", "nonce", "salt"] {
            let mut tampered = sealed.clone();
            let target = match field {
                "ciphertext" => &mut tampered.ciphertext,
                "nonce" => &mut tampered.nonce,
                _ => &mut tampered.salt,
            };
            let mut bytes = BASE64.decode(target.as_str()).unwrap();
            bytes[0] ^= 0x01;
            *target = BASE64.encode(bytes);
            assert!(open(KEY, &tampered).is_err(), "tampered {field} accepted");
        }
    }

    #[test]
    fn short_master_key_is_refused() {
        assert!(matches!(
            seal("too-short", "x"),
            Err(VaultError::MasterKeyTooShort)
        ));
        assert!(CredentialVault::new("short").is_err());
    }

    #[test]
    fn wrong_key_fails_cleanly() {
        let sealed = seal(KEY, "payload").unwrap();
        let other = "ffffffffffffffffffffffffffffffff";
        assert!(matches!(
            open(other, &sealed),
            Err(VaultError::DecryptionFailed)
        ));
    }

    #[test]
    fn vault_injects_without_returning_secret() {
        let vault = CredentialVault::new(KEY).unwrap();
        let handle = vault.store("gmail", "token-123");
        assert_eq!(handle.adapter_id(), "gmail");

        let mut headers = HashMap::new();
        vault
            .inject_header(&handle, &mut headers, "Authorization", Some("Bearer "))
            .unwrap();
        assert_eq!(headers["Authorization"], "Bearer token-123");
    }

    #[test]
    fn missing_credential_is_a_typed_error() {
        let vault = CredentialVault::new(KEY).unwrap();
        let handle = vault.store("slack", "x");
        let orphan = CredentialHandle {
            adapter_id: "telegram".into(),
        };
        let mut headers = HashMap::new();
        assert!(vault
            .inject_header(&handle, &mut headers, "Authorization", None)
            .is_ok());
        assert!(matches!(
            vault.inject_header(&orphan, &mut headers, "Authorization", None),
            Err(VaultError::CredentialMissing(_))
        ));
    }
}
