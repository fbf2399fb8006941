//! Registry configuration.

use persistkit_crypto::EncryptionSettings;
use persistkit_script::ScriptLimits;
use persistkit_storage::StoreOptions;
use serde::Deserialize;

/// Prefix of the endpoint reported for each registered model.
pub const DEFAULT_API_PREFIX: &str = "/api/dynamic";

#[derive(Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub api_prefix: String,
    pub script_limits: ScriptLimits,
    /// Required by models that set `encrypt`.
    pub encryption: Option<EncryptionSettings>,
    pub store_options: StoreOptions,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            script_limits: ScriptLimits::default(),
            encryption: None,
            store_options: StoreOptions::default(),
        }
    }
}

impl RegistryConfig {
    pub fn with_encryption(mut self, settings: EncryptionSettings) -> Self {
        self.encryption = Some(settings);
        self
    }

    /// `{api_prefix}/{table_name}`, without a doubled slash.
    pub fn endpoint(&self, table_name: &str) -> String {
        format!("{}/{table_name}", self.api_prefix.trim_end_matches('/'))
    }
}

impl std::fmt::Debug for RegistryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryConfig")
            .field("api_prefix", &self.api_prefix)
            .field("script_limits", &self.script_limits)
            .field("encryption", &self.encryption.is_some())
            .field("store_options", &self.store_options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_keys() {
        let config: RegistryConfig =
            serde_json::from_str(r#"{"script_limits": {"timeout_ms": 500}}"#).unwrap();
        assert_eq!(config.api_prefix, DEFAULT_API_PREFIX);
        assert_eq!(config.script_limits.timeout_ms, 500);
        assert!(config.encryption.is_none());
    }

    #[test]
    fn endpoint_joins_prefix_and_table() {
        let mut config = RegistryConfig::default();
        assert_eq!(config.endpoint("products"), "/api/dynamic/products");
        config.api_prefix = "/v2/".into();
        assert_eq!(config.endpoint("products"), "/v2/products");
    }

    #[test]
    fn debug_hides_encryption_settings() {
        let config = RegistryConfig::default().with_encryption(EncryptionSettings::new("s3cret", "salt"));
        assert!(!format!("{config:?}").contains("s3cret"));
    }
}
