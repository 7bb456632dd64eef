//! Key management: narrow provider contracts plus an in-process
//! ChaCha20-Poly1305 implementation used for development and tests.

use base64::{engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use dynamis_core::{DynamisError, DynamisResult, EncryptionContext, ProviderError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};
use uuid::Uuid;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const VERSION_LEN: usize = 4;

/// Encrypt/decrypt capability of a key-management service.
pub trait KeyManagementProvider: Send + Sync {
    fn encrypt(
        &self,
        key_id: &str,
        plaintext: &[u8],
        context: &EncryptionContext,
    ) -> Result<Vec<u8>, ProviderError>;

    fn decrypt(
        &self,
        key_id: &str,
        ciphertext: &[u8],
        context: &EncryptionContext,
    ) -> Result<Vec<u8>, ProviderError>;
}

/// Administrative capability of a key-management service.
pub trait KeyAdministration: Send + Sync {
    fn find_key_by_tag(&self, tag_key: &str, tag_value: &str)
        -> Result<Option<String>, ProviderError>;
    fn create_key(
        &self,
        description: &str,
        tags: BTreeMap<String, String>,
    ) -> Result<String, ProviderError>;
    fn describe_key(&self, key_id: &str) -> Result<KeyMetadata, ProviderError>;
    fn enable_key_rotation(&self, key_id: &str) -> Result<(), ProviderError>;
    fn disable_key(&self, key_id: &str) -> Result<(), ProviderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyState {
    Enabled,
    Disabled,
}

/// Status snapshot of a managed key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyMetadata {
    pub key_id: String,
    pub description: String,
    pub key_state: KeyState,
    pub creation_date: DateTime<Utc>,
    pub key_usage: String,
    pub origin: String,
    pub rotation_enabled: bool,
    pub current_version: u32,
    pub tags: BTreeMap<String, String>,
}

/// Find the key tagged `Application=<application>`, creating it if absent.
pub fn resolve_application_key(
    admin: &dyn KeyAdministration,
    application: &str,
    environment: &str,
) -> Result<String, ProviderError> {
    if let Some(key_id) = admin.find_key_by_tag("Application", application)? {
        return Ok(key_id);
    }
    let tags = BTreeMap::from([
        ("Application".to_string(), application.to_string()),
        ("Environment".to_string(), environment.to_string()),
    ]);
    admin.create_key(&format!("{application} Encryption Key"), tags)
}

struct ManagedKey {
    metadata: KeyMetadata,
    versions: Vec<Key>,
}

/// In-process key ring. Ciphertext layout is
/// `version (u32 BE) || nonce (12) || ciphertext+tag`.
pub struct LocalKeyProvider {
    keys: DashMap<String, ManagedKey>,
}

impl Default for LocalKeyProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalKeyProvider {
    pub fn new() -> Self {
        Self {
            keys: DashMap::new(),
        }
    }

    /// Register externally supplied key material (base64, 32 bytes) under `key_id`.
    pub fn import_key(
        &self,
        key_id: &str,
        key_material_b64: &str,
        tags: BTreeMap<String, String>,
    ) -> DynamisResult<()> {
        let bytes = STANDARD
            .decode(key_material_b64.trim())
            .map_err(|e| DynamisError::config(format!("key material is not base64: {e}")))?;
        if bytes.len() != KEY_LEN {
            return Err(DynamisError::config(format!(
                "key material must be {KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let key = Key::clone_from_slice(&bytes);
        if !self.insert_key(key_id.to_string(), "Imported key".to_string(), "EXTERNAL", tags, key) {
            return Err(DynamisError::config(format!("key id already registered: {key_id}")));
        }
        Ok(())
    }

    /// Generate a fresh key version; earlier versions stay available for decryption.
    pub fn rotate_key(&self, key_id: &str) -> Result<u32, ProviderError> {
        let mut entry = self
            .keys
            .get_mut(key_id)
            .ok_or_else(|| ProviderError::kms("rotate_key", format!("key not found: {key_id}")))?;
        entry.versions.push(ChaCha20Poly1305::generate_key(&mut OsRng));
        let version = entry.versions.len() as u32;
        entry.metadata.current_version = version;
        info!(key_id = %key_id, version, "Key rotated");
        Ok(version)
    }

    /// Returns `false`, leaving the existing ring untouched, if `key_id` is taken.
    fn insert_key(
        &self,
        key_id: String,
        description: String,
        origin: &str,
        tags: BTreeMap<String, String>,
        key: Key,
    ) -> bool {
        let Entry::Vacant(slot) = self.keys.entry(key_id.clone()) else {
            return false;
        };
        let metadata = KeyMetadata {
            key_id: key_id.clone(),
            description,
            key_state: KeyState::Enabled,
            creation_date: Utc::now(),
            key_usage: "ENCRYPT_DECRYPT".to_string(),
            origin: origin.to_string(),
            rotation_enabled: false,
            current_version: 1,
            tags,
        };
        info!(key_id = %key_id, origin = %origin, "Key registered");
        slot.insert(ManagedKey {
            metadata,
            versions: vec![key],
        });
        true
    }

    fn usable_key(
        &self,
        operation: &'static str,
        key_id: &str,
    ) -> Result<dashmap::mapref::one::Ref<'_, String, ManagedKey>, ProviderError> {
        let entry = self
            .keys
            .get(key_id)
            .ok_or_else(|| ProviderError::kms(operation, format!("key not found: {key_id}")))?;
        if entry.metadata.key_state == KeyState::Disabled {
            warn!(key_id = %key_id, operation, "Use of disabled key refused");
            return Err(ProviderError::kms(operation, format!("key is disabled: {key_id}")));
        }
        Ok(entry)
    }
}

impl KeyManagementProvider for LocalKeyProvider {
    fn encrypt(
        &self,
        key_id: &str,
        plaintext: &[u8],
        context: &EncryptionContext,
    ) -> Result<Vec<u8>, ProviderError> {
        let entry = self.usable_key("encrypt", key_id)?;
        let version = entry.metadata.current_version;
        let key = &entry.versions[(version - 1) as usize];

        let cipher = ChaCha20Poly1305::new(key);
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let aad = context.to_aad();
        let sealed = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|e| ProviderError::kms("encrypt", e.to_string()))?;

        let mut blob = Vec::with_capacity(VERSION_LEN + NONCE_LEN + sealed.len());
        blob.extend_from_slice(&version.to_be_bytes());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&sealed);
        Ok(blob)
    }

    fn decrypt(
        &self,
        key_id: &str,
        ciphertext: &[u8],
        context: &EncryptionContext,
    ) -> Result<Vec<u8>, ProviderError> {
        let entry = self.usable_key("decrypt", key_id)?;
        if ciphertext.len() < VERSION_LEN + NONCE_LEN {
            return Err(ProviderError::kms("decrypt", "ciphertext blob is truncated"));
        }
        let (version_bytes, rest) = ciphertext.split_at(VERSION_LEN);
        let (nonce_bytes, sealed) = rest.split_at(NONCE_LEN);

        let mut raw = [0u8; VERSION_LEN];
        raw.copy_from_slice(version_bytes);
        let version = u32::from_be_bytes(raw);
        let key = version
            .checked_sub(1)
            .and_then(|idx| entry.versions.get(idx as usize))
            .ok_or_else(|| ProviderError::kms("decrypt", format!("unknown key version {version}")))?;

        let cipher = ChaCha20Poly1305::new(key);
        let aad = context.to_aad();
        cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: sealed,
                    aad: &aad,
                },
            )
            .map_err(|_| {
                ProviderError::kms("decrypt", "ciphertext failed authentication under this key and context")
            })
    }
}

impl KeyAdministration for LocalKeyProvider {
    fn find_key_by_tag(
        &self,
        tag_key: &str,
        tag_value: &str,
    ) -> Result<Option<String>, ProviderError> {
        Ok(self
            .keys
            .iter()
            .find(|e| e.metadata.tags.get(tag_key).map(String::as_str) == Some(tag_value))
            .map(|e| e.key().clone()))
    }

    fn create_key(
        &self,
        description: &str,
        tags: BTreeMap<String, String>,
    ) -> Result<String, ProviderError> {
        let key_id = Uuid::new_v4().to_string();
        let key = ChaCha20Poly1305::generate_key(&mut OsRng);
        if !self.insert_key(key_id.clone(), description.to_string(), "LOCAL", tags, key) {
            return Err(ProviderError::kms("create_key", format!("key id collision: {key_id}")));
        }
        Ok(key_id)
    }

    fn describe_key(&self, key_id: &str) -> Result<KeyMetadata, ProviderError> {
        self.keys
            .get(key_id)
            .map(|e| e.metadata.clone())
            .ok_or_else(|| ProviderError::kms("describe_key", format!("key not found: {key_id}")))
    }

    fn enable_key_rotation(&self, key_id: &str) -> Result<(), ProviderError> {
        let mut entry = self.keys.get_mut(key_id).ok_or_else(|| {
            ProviderError::kms("enable_key_rotation", format!("key not found: {key_id}"))
        })?;
        entry.metadata.rotation_enabled = true;
        info!(key_id = %key_id, "Key rotation enabled");
        Ok(())
    }

    fn disable_key(&self, key_id: &str) -> Result<(), ProviderError> {
        let mut entry = self
            .keys
            .get_mut(key_id)
            .ok_or_else(|| ProviderError::kms("disable_key", format!("key not found: {key_id}")))?;
        entry.metadata.key_state = KeyState::Disabled;
        info!(key_id = %key_id, "Key disabled");
        Ok(())
    }
}
