use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub relying_party: RelyingPartyConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelyingPartyConfig {
    #[serde(default = "default_rp_id")]
    pub rp_id: String,
    #[serde(default = "default_rp_name")]
    pub rp_name: String,
    #[serde(default = "default_rp_origin")]
    pub rp_origin: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Require the authenticator to assert user verification (biometric/PIN)
    /// during registration and authentication.
    #[serde(default = "default_user_verification_required")]
    pub user_verification_required: bool,
    /// Collapse all authentication failures into a generic error so account
    /// enumeration through differentiated messages is not possible.
    #[serde(default)]
    pub paranoid: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecoveryConfig {
    /// Validity window for emergency recovery tokens, in minutes.
    #[serde(default = "default_recovery_window")]
    pub window_minutes: u64,
    /// Establish a session immediately after a successful emergency
    /// passkey registration.
    #[serde(default = "default_sign_in_after_recovery")]
    pub sign_in_after_recovery: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

// Default values
fn default_rp_id() -> String {
    "localhost".to_string()
}

fn default_rp_name() -> String {
    "Passgate".to_string()
}

fn default_rp_origin() -> String {
    "http://localhost:3000".to_string()
}

fn default_user_verification_required() -> bool {
    true
}

fn default_recovery_window() -> u64 {
    60 // one hour
}

fn default_sign_in_after_recovery() -> bool {
    true
}

fn default_db_path() -> String {
    "data/passgate.db".to_string()
}

impl Default for RelyingPartyConfig {
    fn default() -> Self {
        Self {
            rp_id: default_rp_id(),
            rp_name: default_rp_name(),
            rp_origin: default_rp_origin(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            user_verification_required: default_user_verification_required(),
            paranoid: false,
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            window_minutes: default_recovery_window(),
            sign_in_after_recovery: default_sign_in_after_recovery(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relying_party: RelyingPartyConfig::default(),
            auth: AuthConfig::default(),
            recovery: RecoveryConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_env_overrides();
        config.ensure_relying_party_defaults();
        tracing::info!(
            "Relying party config: rp_id={}, rp_origin={}, rp_name={}",
            config.relying_party.rp_id,
            config.relying_party.rp_origin,
            config.relying_party.rp_name
        );
        Ok(config)
    }

    /// Load configuration from config.toml if present
    fn load_from_file() -> anyhow::Result<Self> {
        let config_paths = ["config.toml", "data/config.toml"];

        for path in config_paths {
            if Path::new(path).exists() {
                let content = fs::read_to_string(path)?;
                let config: Config = toml::from_str(&content)?;
                tracing::info!("Loaded configuration from {}", path);
                return Ok(config);
            }
        }

        tracing::info!("No configuration file found, using defaults");
        Ok(Config::default())
    }

    /// Apply environment variable overrides
    /// Format: PG_CONF_<SECTION>_<KEY>
    fn apply_env_overrides(&mut self) {
        // Relying party overrides
        if let Ok(val) = env::var("PG_CONF_RP_ID") {
            if !val.trim().is_empty() {
                self.relying_party.rp_id = val;
            }
        }
        if let Ok(val) = env::var("PG_CONF_RP_NAME") {
            if !val.trim().is_empty() {
                self.relying_party.rp_name = val;
            }
        }
        if let Ok(val) = env::var("PG_CONF_RP_ORIGIN") {
            if !val.trim().is_empty() {
                self.relying_party.rp_origin = val;
            }
        }

        // Auth policy overrides
        if let Ok(val) = env::var("PG_CONF_AUTH_USER_VERIFICATION") {
            if let Ok(v) = val.parse() {
                self.auth.user_verification_required = v;
            }
        }
        if let Ok(val) = env::var("PG_CONF_AUTH_PARANOID") {
            if let Ok(v) = val.parse() {
                self.auth.paranoid = v;
            }
        }

        // Recovery overrides
        if let Ok(val) = env::var("PG_CONF_RECOVERY_WINDOW_MINUTES") {
            if let Ok(minutes) = val.parse() {
                self.recovery.window_minutes = minutes;
            }
        }
        if let Ok(val) = env::var("PG_CONF_RECOVERY_SIGN_IN_AFTER") {
            if let Ok(v) = val.parse() {
                self.recovery.sign_in_after_recovery = v;
            }
        }

        // Database overrides
        if let Ok(val) = env::var("PG_CONF_DATABASE_PATH") {
            self.database.path = val;
        }
    }

    fn ensure_relying_party_defaults(&mut self) {
        if self.relying_party.rp_id.trim().is_empty() {
            self.relying_party.rp_id = default_rp_id();
        }
        if self.relying_party.rp_name.trim().is_empty() {
            self.relying_party.rp_name = default_rp_name();
        }
        if self.relying_party.rp_origin.trim().is_empty() {
            self.relying_party.rp_origin = default_rp_origin();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert!(config.auth.user_verification_required);
        assert!(!config.auth.paranoid);
        assert_eq!(config.recovery.window_minutes, 60);
        assert!(config.recovery.sign_in_after_recovery);
        assert_eq!(config.relying_party.rp_id, "localhost");
    }

    #[test]
    fn partial_toml_keeps_defaults_for_missing_sections() {
        let config: Config = toml::from_str(
            r#"
            [relying_party]
            rp_id = "example.com"
            rp_origin = "https://example.com"

            [auth]
            paranoid = true
            "#,
        )
        .unwrap();

        assert_eq!(config.relying_party.rp_id, "example.com");
        assert!(config.auth.paranoid);
        assert!(config.auth.user_verification_required);
        assert_eq!(config.recovery.window_minutes, 60);
    }
}
