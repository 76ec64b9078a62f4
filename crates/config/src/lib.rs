//! Environment-driven configuration for Cobro.
//!
//! Settings are read once at startup. Only the Supabase pair is required;
//! everything else carries a default. The service-role key is validated
//! against the project URL before the process is allowed to start.

mod service_role;
mod settings;

pub use service_role::{validate_service_role, ServiceRoleClaims};
pub use settings::{
    FeatureFlags, ObservabilityConfig, PricingConfig, ServerConfig, Settings, SupabaseConfig,
    WaConfig,
};

use thiserror::Error;

/// Configuration errors. All variants are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {var}: {reason}")]
    InvalidVar { var: &'static str, reason: String },

    #[error("service role key rejected: {0}")]
    ServiceRole(String),
}
