//! API Configuration
//!
//! Loaded from an optional TOML file; secrets may be overridden from the
//! environment.

use std::fs;
use std::path::Path;

use diligence_tenant::PlanTier;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub billing: Option<BillingConfig>,
    pub storage: Option<StorageConfig>,
    pub logging: LoggingConfig,
    pub intake: IntakeConfig,
    pub bootstrap: Vec<BootstrapOrg>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Externally visible origin, used for payment return URLs
    pub public_url: String,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
            public_url: "http://localhost:8080".into(),
            max_upload_bytes: 25 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 secret shared with the identity provider
    pub jwt_secret: String,
    pub cookie_name: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            cookie_name: "dd_session".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PriceIds {
    pub angel: Option<String>,
    pub pro: Option<String>,
    pub enterprise: Option<String>,
}

impl PriceIds {
    pub fn for_tier(&self, tier: PlanTier) -> Option<&str> {
        match tier {
            PlanTier::Free => None,
            PlanTier::Angel => self.angel.as_deref(),
            PlanTier::Pro => self.pro.as_deref(),
            PlanTier::Enterprise => self.enterprise.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base: String,
    pub prices: PriceIds,
    /// Defaults derive from `server.public_url`
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
    pub portal_return_url: Option<String>,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            webhook_secret: String::new(),
            api_base: diligence_billing::stripe::DEFAULT_API_BASE.into(),
            prices: PriceIds::default(),
            success_url: None,
            cancel_url: None,
            portal_return_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub base_url: String,
    pub service_key: String,
    pub bucket: String,
    pub signed_url_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            service_key: String::new(),
            bucket: "documents".into(),
            signed_url_ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` wins when set
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".into(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    /// Sustained submissions per client per minute
    pub per_minute: u32,
    pub burst: u32,
    /// Reverse proxies in front of the server whose `X-Forwarded-For` entries are trusted
    pub trusted_proxies: usize,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            per_minute: 6,
            burst: 5,
            trusted_proxies: 0,
        }
    }
}

/// Organization seeded at start-up
#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapOrg {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub plan: PlanTier,
    pub owner_id: Uuid,
    pub owner_email: String,
}

impl ApiConfig {
    /// Read `path` if given, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })?;
                Self::from_toml(&content)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Overlay values from the environment lookup `var`
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(secret) = var("DILIGENCE_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Some(bind) = var("DILIGENCE_BIND") {
            self.server.bind = bind;
        }
        if let Some(key) = var("DILIGENCE_STRIPE_SECRET_KEY") {
            self.billing.get_or_insert_with(BillingConfig::default).secret_key = key;
        }
        if let Some(secret) = var("DILIGENCE_STRIPE_WEBHOOK_SECRET") {
            self.billing.get_or_insert_with(BillingConfig::default).webhook_secret = secret;
        }
        if let Some(key) = var("DILIGENCE_STORAGE_SERVICE_KEY") {
            self.storage.get_or_insert_with(StorageConfig::default).service_key = key;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.jwt_secret.len() < 32 {
            return Err(ConfigError::Invalid("auth.jwt_secret must be at least 32 bytes".into()));
        }
        if let Some(storage) = &self.storage {
            if storage.base_url.is_empty() {
                return Err(ConfigError::Invalid("storage.base_url is required when storage is configured".into()));
            }
        }
        Ok(())
    }

    pub fn success_url(&self) -> String {
        self.billing
            .as_ref()
            .and_then(|b| b.success_url.clone())
            .unwrap_or_else(|| format!("{}/billing?checkout=success", self.public_base()))
    }

    pub fn cancel_url(&self) -> String {
        self.billing
            .as_ref()
            .and_then(|b| b.cancel_url.clone())
            .unwrap_or_else(|| format!("{}/billing?checkout=cancelled", self.public_base()))
    }

    pub fn portal_return_url(&self) -> String {
        self.billing
            .as_ref()
            .and_then(|b| b.portal_return_url.clone())
            .unwrap_or_else(|| format!("{}/billing", self.public_base()))
    }

    fn public_base(&self) -> &str {
        self.server.public_url.trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
[server]
bind = "127.0.0.1:9000"
public_url = "https://app.diligence.test/"

[auth]
jwt_secret = "0123456789abcdef0123456789abcdef"

[billing]
secret_key = "sk_test"
webhook_secret = "whsec_test"

[billing.prices]
pro = "price_pro"

[[bootstrap]]
name = "Acme Ventures"
slug = "acme"
plan = "angel"
owner_id = "7c1f7d6e-0d1a-4f57-9a39-5bf1c2a3d4e5"
owner_email = "gp@acme.vc"
"#;

    #[test]
    fn test_defaults() {
        let config = ApiConfig::default();
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert_eq!(config.auth.cookie_name, "dd_session");
        assert!(config.billing.is_none());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_sample() {
        let config = ApiConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:9000");
        let billing = config.billing.as_ref().unwrap();
        assert_eq!(billing.prices.for_tier(PlanTier::Pro), Some("price_pro"));
        assert_eq!(billing.prices.for_tier(PlanTier::Angel), None);
        assert_eq!(billing.api_base, "https://api.stripe.com/v1");
        assert_eq!(config.bootstrap[0].plan, PlanTier::Angel);
        assert_eq!(config.success_url(), "https://app.diligence.test/billing?checkout=success");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("DILIGENCE_JWT_SECRET", "ffffffffffffffffffffffffffffffff"),
            ("DILIGENCE_STRIPE_WEBHOOK_SECRET", "whsec_env"),
        ]
        .into_iter()
        .collect();

        let mut config = ApiConfig::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.auth.jwt_secret.len(), 32);
        assert_eq!(config.billing.unwrap().webhook_secret, "whsec_env");
        assert!(config.storage.is_none());
    }
}
