//! Main settings module.

use serde::{Deserialize, Serialize};

use crate::service_role::validate_service_role;
use crate::ConfigError;

/// Main application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub supabase: SupabaseConfig,
    pub wa: WaConfig,
    pub features: FeatureFlags,
    pub pricing: PricingConfig,
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: env_or("SERVER_HOST", "0.0.0.0"),
            port: env_parse("SERVER_PORT", 4000),
        }
    }
}

/// Supabase row store and object storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupabaseConfig {
    pub url: String,
    #[serde(skip_serializing)]
    pub service_role: String,
    pub receipts_bucket: String,
}

/// External WhatsApp client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaConfig {
    /// Root directory for per-line auth stores.
    pub data_path: String,
    /// Optional browser executable handed to the client backend.
    pub browser_path: Option<String>,
}

impl Default for WaConfig {
    fn default() -> Self {
        Self {
            data_path: env_or("WWEBJS_DATA_PATH", "./.wwebjs_auth"),
            browser_path: std::env::var("PUPPETEER_EXECUTABLE_PATH").ok(),
        }
    }
}

/// Feature flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Treat sub-1000 Mercado Pago amounts as OCR-truncated thousands.
    pub mp_force_x1000: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            mp_force_x1000: env_bool("MP_FORCE_X1000", true),
        }
    }
}

/// Values served by `GET /pricing`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    pub unit_usd: f64,
    pub min_credits: u32,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            unit_usd: env_parse("PRICING_UNIT_USD", 0.05),
            min_credits: env_parse("PRICING_MIN_CREDITS", 100),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: env_or("LOG_LEVEL", "info"),
            log_json: env_bool("LOG_JSON", false),
        }
    }
}

impl Settings {
    /// Load settings from the environment and validate the service-role
    /// key against the project URL. Any error here is fatal at startup.
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = std::env::var("SUPABASE_URL")
            .map_err(|_| ConfigError::MissingVar("SUPABASE_URL"))?;
        let service_role = std::env::var("SUPABASE_SERVICE_ROLE")
            .map_err(|_| ConfigError::MissingVar("SUPABASE_SERVICE_ROLE"))?;

        validate_service_role(&url, &service_role)?;

        Ok(Self {
            server: ServerConfig::default(),
            supabase: SupabaseConfig {
                url: url.trim_end_matches('/').to_string(),
                service_role,
                receipts_bucket: env_or("RECEIPTS_BUCKET", "receipts"),
            },
            wa: WaConfig::default(),
            features: FeatureFlags::default(),
            pricing: PricingConfig::default(),
            observability: ObservabilityConfig::default(),
        })
    }
}

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

fn env_bool(var: &str, default: bool) -> bool {
    match std::env::var(var) {
        Ok(v) => !matches!(v.trim().to_lowercase().as_str(), "0" | "false" | "no" | "off"),
        Err(_) => default,
    }
}

fn env_parse<T: std::str::FromStr + Copy>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_bool_accepts_common_spellings() {
        std::env::set_var("COBRO_TEST_FLAG", "false");
        assert!(!env_bool("COBRO_TEST_FLAG", true));
        std::env::set_var("COBRO_TEST_FLAG", "1");
        assert!(env_bool("COBRO_TEST_FLAG", false));
        std::env::remove_var("COBRO_TEST_FLAG");
        assert!(env_bool("COBRO_TEST_FLAG", true));
    }

    #[test]
    fn defaults_are_sane() {
        let server = ServerConfig::default();
        assert_eq!(server.port, 4000);
        let flags = FeatureFlags::default();
        assert!(flags.mp_force_x1000);
    }
}
