use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A flat record passed through the field encryptor.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Key/value pairs bound to every ciphertext as additional authenticated data.
/// Ordered so the serialized form is stable across processes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptionContext(BTreeMap<String, String>);

impl EncryptionContext {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Canonical byte form: each key then value in key order, every item
    /// prefixed with its length as a u32 BE, so distinct contexts never
    /// share an encoding.
    pub fn to_aad(&self) -> Vec<u8> {
        let mut aad = Vec::new();
        for (k, v) in &self.0 {
            for item in [k, v] {
                aad.extend_from_slice(&(item.len() as u32).to_be_bytes());
                aad.extend_from_slice(item.as_bytes());
            }
        }
        aad
    }
}

impl From<BTreeMap<String, String>> for EncryptionContext {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}
