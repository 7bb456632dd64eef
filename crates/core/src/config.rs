use serde::Deserialize;
use std::collections::BTreeMap;

/// Root application configuration. Loaded from environment variables
/// with the prefix `DYNAMIS__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_project_name")]
    pub project_name: String,
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    #[serde(default)]
    pub encryption: EncryptionConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub gdpr: GdprConfig,
    #[serde(default)]
    pub waf: WafConfig,
    #[serde(default)]
    pub jwt: JwtConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EncryptionConfig {
    /// Key id used for field encryption. Resolved by application tag when unset.
    #[serde(default)]
    pub key_id: Option<String>,
    /// Base64 encoded 32-byte key for the local provider.
    #[serde(default)]
    pub key_material: Option<String>,
    #[serde(default = "default_encryption_context")]
    pub context: BTreeMap<String, String>,
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    #[serde(default = "default_key_rotation_days")]
    pub key_rotation_period_days: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_log_group")]
    pub log_group_name: String,
    #[serde(default = "default_true")]
    pub include_ip: bool,
    #[serde(default = "default_true")]
    pub include_user_agent: bool,
    #[serde(default = "default_true")]
    pub include_changes: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GdprConfig {
    #[serde(default = "default_retention_days")]
    pub data_retention_days: u32,
    #[serde(default = "default_export_format")]
    pub data_export_format: String,
    #[serde(default = "default_true")]
    pub consent_required: bool,
    #[serde(default = "default_activity_lookback_days")]
    pub activity_lookback_days: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WafConfig {
    /// Requests allowed per window. Enforced by the external firewall.
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,
    #[serde(default)]
    pub blocked_ips: Vec<String>,
    #[serde(default)]
    pub geo_restrictions: GeoRestrictionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeoRestrictionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_allowed_countries")]
    pub allowed_countries: Vec<String>,
    #[serde(default)]
    pub blocked_countries: Vec<String>,
}

/// Bearer-token validation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    /// HMAC secret. Tokens cannot be verified until one is configured.
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_jwt_algorithm")]
    pub algorithm: String,
    #[serde(default = "default_jwt_issuer")]
    pub issuer: String,
    #[serde(default = "default_jwt_audience")]
    pub audience: String,
    #[serde(default = "default_access_token_expire_minutes")]
    pub access_token_expire_minutes: u32,
    /// Clock skew tolerated when checking `exp`.
    #[serde(default = "default_jwt_leeway_secs")]
    pub leeway_secs: u64,
}

// Default functions
fn default_project_name() -> String {
    "Dynamis".to_string()
}
fn default_api_prefix() -> String {
    "/api/v1".to_string()
}
fn default_encryption_context() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("environment".to_string(), "production".to_string()),
        ("application".to_string(), "dynamis".to_string()),
    ])
}
fn default_algorithm() -> String {
    "CHACHA20-POLY1305".to_string()
}
fn default_key_rotation_days() -> u32 {
    90
}
fn default_log_group() -> String {
    "/aws/dynamis".to_string()
}
fn default_true() -> bool {
    true
}
fn default_retention_days() -> u32 {
    365
}
fn default_export_format() -> String {
    "json".to_string()
}
fn default_activity_lookback_days() -> u32 {
    30
}
fn default_rate_limit() -> u32 {
    2000
}
fn default_rate_limit_window_secs() -> u64 {
    300
}
fn default_allowed_countries() -> Vec<String> {
    vec!["US".into(), "CA".into(), "GB".into(), "EU".into()]
}
fn default_jwt_algorithm() -> String {
    "HS256".to_string()
}
fn default_jwt_issuer() -> String {
    "dynamis-ai".to_string()
}
fn default_jwt_audience() -> String {
    "dynamis-clients".to_string()
}
fn default_access_token_expire_minutes() -> u32 {
    30
}
fn default_jwt_leeway_secs() -> u64 {
    60
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            key_id: None,
            key_material: None,
            context: default_encryption_context(),
            algorithm: default_algorithm(),
            key_rotation_period_days: default_key_rotation_days(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_group_name: default_log_group(),
            include_ip: true,
            include_user_agent: true,
            include_changes: true,
        }
    }
}

impl Default for GdprConfig {
    fn default() -> Self {
        Self {
            data_retention_days: default_retention_days(),
            data_export_format: default_export_format(),
            consent_required: true,
            activity_lookback_days: default_activity_lookback_days(),
        }
    }
}

impl Default for GeoRestrictionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_countries: default_allowed_countries(),
            blocked_countries: Vec::new(),
        }
    }
}

impl Default for WafConfig {
    fn default() -> Self {
        Self {
            rate_limit: default_rate_limit(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            blocked_ips: Vec::new(),
            geo_restrictions: GeoRestrictionConfig::default(),
        }
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: None,
            algorithm: default_jwt_algorithm(),
            issuer: default_jwt_issuer(),
            audience: default_jwt_audience(),
            access_token_expire_minutes: default_access_token_expire_minutes(),
            leeway_secs: default_jwt_leeway_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            project_name: default_project_name(),
            api_prefix: default_api_prefix(),
            encryption: EncryptionConfig::default(),
            audit: AuditConfig::default(),
            gdpr: GdprConfig::default(),
            waf: WafConfig::default(),
            jwt: JwtConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::from_environment(Self::environment())
    }

    /// `DYNAMIS__SECTION__KEY` variables; list keys are comma separated.
    pub fn environment() -> config::Environment {
        config::Environment::with_prefix("DYNAMIS")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("waf.blocked_ips")
            .with_list_parse_key("waf.geo_restrictions.allowed_countries")
            .with_list_parse_key("waf.geo_restrictions.blocked_countries")
    }

    pub fn from_environment(env: config::Environment) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(env)
            .build()?
            .try_deserialize()
    }
}
