//! Field-level encryption of sensitive record attributes.
//!
//! Each data category lists the field names that must be encrypted before
//! storage. Listed values are serialized to JSON, sealed by the key-management
//! provider, and stored back as base64 strings; decryption reverses this, so
//! the original JSON type is restored.

use crate::kms::KeyManagementProvider;
use base64::{engine::general_purpose::STANDARD, Engine};
use dynamis_core::{DynamisResult, EncryptionContext, ProviderError, Record};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Category name → ordered list of sensitive field names.
#[derive(Debug, Clone)]
pub struct SensitiveFieldMap {
    categories: HashMap<String, Vec<String>>,
}

impl Default for SensitiveFieldMap {
    fn default() -> Self {
        Self::standard()
    }
}

impl SensitiveFieldMap {
    pub fn empty() -> Self {
        Self {
            categories: HashMap::new(),
        }
    }

    /// Built-in map for the `user`, `project` and `financial` categories.
    pub fn standard() -> Self {
        Self::empty()
            .with_category("user", ["password", "ssn", "credit_card", "bank_account"])
            .with_category("project", ["client_secret", "api_key", "access_token"])
            .with_category(
                "financial",
                ["amount", "account_number", "routing_number", "tax_id"],
            )
    }

    pub fn with_category<I, S>(mut self, category: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories.insert(
            category.to_string(),
            fields.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Sensitive fields for `category`, or `None` when the category is unlisted.
    pub fn fields_for(&self, category: &str) -> Option<&[String]> {
        self.categories.get(category).map(Vec::as_slice)
    }

    pub fn is_sensitive(&self, category: &str, field: &str) -> bool {
        self.fields_for(category)
            .is_some_and(|fields| fields.iter().any(|f| f == field))
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }
}

/// Encrypts and decrypts the sensitive fields of records through a
/// key-management provider. One provider round trip per field.
pub struct FieldEncryptor {
    provider: Arc<dyn KeyManagementProvider>,
    key_id: String,
    context: EncryptionContext,
    fields: SensitiveFieldMap,
}

impl FieldEncryptor {
    pub fn new(
        provider: Arc<dyn KeyManagementProvider>,
        key_id: impl Into<String>,
        context: EncryptionContext,
    ) -> Self {
        Self {
            provider,
            key_id: key_id.into(),
            context,
            fields: SensitiveFieldMap::standard(),
        }
    }

    pub fn with_fields(mut self, fields: SensitiveFieldMap) -> Self {
        self.fields = fields;
        self
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn fields(&self) -> &SensitiveFieldMap {
        &self.fields
    }

    /// Return a copy of `record` with every sensitive field for `category`
    /// replaced by its ciphertext. Unlisted categories pass through unchanged.
    pub fn encrypt_record(&self, category: &str, record: &Record) -> DynamisResult<Record> {
        let Some(fields) = self.fields.fields_for(category) else {
            return Ok(record.clone());
        };

        let mut out = record.clone();
        for field in fields {
            if let Some(value) = out.get_mut(field) {
                let plaintext = serde_json::to_vec(value)?;
                let blob = self.provider.encrypt(&self.key_id, &plaintext, &self.context)?;
                *value = Value::String(STANDARD.encode(blob));
                debug!(category, field = %field, "Field encrypted");
            }
        }
        Ok(out)
    }

    /// Inverse of [`FieldEncryptor::encrypt_record`].
    pub fn decrypt_record(&self, category: &str, record: &Record) -> DynamisResult<Record> {
        let Some(fields) = self.fields.fields_for(category) else {
            return Ok(record.clone());
        };

        let mut out = record.clone();
        for field in fields {
            if let Some(value) = out.get_mut(field) {
                let blob = match value {
                    Value::String(encoded) => STANDARD.decode(encoded.as_bytes()).map_err(|e| {
                        ProviderError::kms("decrypt", format!("field `{field}` is not base64: {e}"))
                    })?,
                    _ => {
                        return Err(ProviderError::kms(
                            "decrypt",
                            format!("field `{field}` does not hold a ciphertext string"),
                        )
                        .into())
                    }
                };
                let plaintext = self.provider.decrypt(&self.key_id, &blob, &self.context)?;
                *value = serde_json::from_slice(&plaintext)?;
                debug!(category, field = %field, "Field decrypted");
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kms::{KeyAdministration, LocalKeyProvider};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn encryptor() -> FieldEncryptor {
        let provider = Arc::new(LocalKeyProvider::new());
        let key_id = provider.create_key("test", BTreeMap::new()).unwrap();
        FieldEncryptor::new(
            provider,
            key_id,
            EncryptionContext::new().with("application", "dynamis"),
        )
    }

    /// Provider that fails every call.
    struct UnavailableProvider;

    impl KeyManagementProvider for UnavailableProvider {
        fn encrypt(&self, _: &str, _: &[u8], _: &EncryptionContext) -> Result<Vec<u8>, ProviderError> {
            Err(ProviderError::kms("encrypt", "service unavailable"))
        }

        fn decrypt(&self, _: &str, _: &[u8], _: &EncryptionContext) -> Result<Vec<u8>, ProviderError> {
            Err(ProviderError::kms("decrypt", "service unavailable"))
        }
    }

    #[test]
    fn test_standard_map() {
        let map = SensitiveFieldMap::standard();
        assert_eq!(
            map.fields_for("user").unwrap(),
            ["password", "ssn", "credit_card", "bank_account"]
        );
        assert!(map.is_sensitive("financial", "tax_id"));
        assert!(!map.is_sensitive("financial", "currency"));
        assert!(map.fields_for("invoice").is_none());
        assert_eq!(map.categories().count(), 3);
    }

    #[test]
    fn test_encrypt_replaces_only_listed_fields() {
        let enc = encryptor();
        let input = record(json!({
            "email": "alice@example.com",
            "password": "hunter2",
            "ssn": "123-45-6789",
        }));

        let sealed = enc.encrypt_record("user", &input).unwrap();
        assert_eq!(sealed["email"], "alice@example.com");
        for field in ["password", "ssn"] {
            let text = sealed[field].as_str().unwrap();
            assert_ne!(sealed[field], input[field]);
            assert!(!text.contains(input[field].as_str().unwrap()));
        }
        // Absent sensitive fields are not introduced.
        assert!(!sealed.contains_key("credit_card"));
    }

    #[test]
    fn test_round_trip_restores_json_types() {
        let enc = encryptor();
        let input = record(json!({
            "amount": 1250.75,
            "account_number": "000123456789",
            "routing_number": 21000021,
            "tax_id": null,
            "currency": "USD",
        }));

        let sealed = enc.encrypt_record("financial", &input).unwrap();
        assert!(sealed["amount"].is_string());
        assert!(sealed["tax_id"].is_string());
        let opened = enc.decrypt_record("financial", &sealed).unwrap();
        assert_eq!(opened, input);
    }

    #[test]
    fn test_unlisted_category_passes_through() {
        let enc = encryptor();
        let input = record(json!({ "password": "hunter2" }));
        assert_eq!(enc.encrypt_record("unknown_category", &input).unwrap(), input);
        assert_eq!(enc.decrypt_record("unknown_category", &input).unwrap(), input);
    }

    #[test]
    fn test_provider_failure_propagates() {
        let enc = FieldEncryptor::new(Arc::new(UnavailableProvider), "k", EncryptionContext::new());
        let input = record(json!({ "api_key": "sk-live" }));
        let err = enc.encrypt_record("project", &input).unwrap_err();
        assert!(err.is_provider());

        // No sensitive field present means no provider call.
        let plain = record(json!({ "name": "apollo" }));
        assert_eq!(enc.encrypt_record("project", &plain).unwrap(), plain);
    }

    #[test]
    fn test_decrypt_rejects_non_ciphertext() {
        let enc = encryptor();
        let not_base64 = record(json!({ "api_key": "sk live!" }));
        assert!(enc.decrypt_record("project", &not_base64).unwrap_err().is_provider());

        let not_string = record(json!({ "api_key": 42 }));
        assert!(enc.decrypt_record("project", &not_string).unwrap_err().is_provider());
    }

    #[test]
    fn test_custom_field_map() {
        let enc = encryptor().with_fields(
            SensitiveFieldMap::empty().with_category("contact", ["phone"]),
        );
        let input = record(json!({ "phone": "+1-555-0100", "password": "kept" }));
        let sealed = enc.encrypt_record("contact", &input).unwrap();
        assert_ne!(sealed["phone"], input["phone"]);
        assert_eq!(sealed["password"], "kept");
        assert_eq!(enc.encrypt_record("user", &input).unwrap(), input);
    }
}
