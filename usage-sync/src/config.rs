use std::{fmt, fs};

use anyhow::{bail, Context};
use partner_client::Credentials;
use serde::Deserialize;

use crate::{fetch::partner::DEFAULT_VALUE_SCALE, sync::RecoveryPolicy};

const DEFAULT_CONFIG_PATH: &str = "usage-sync.toml";
const DEFAULT_DATA_DIR: &str = "db";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// One CSV file per device.
    #[default]
    Csv,
    /// One SQLite database per device.
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct PartnerConfig {
    /// JSON snapshot the partner API calls are served from.
    pub snapshot_path: String,
    #[serde(default)]
    pub partner_email: String,
    /// Prefer `PARTNER_PASSWORD` over putting this in the file.
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_value_scale")]
    pub value_scale: f64,
}

impl PartnerConfig {
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.partner_email.clone(), self.password.clone())
    }
}

impl fmt::Debug for PartnerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartnerConfig")
            .field("snapshot_path", &self.snapshot_path)
            .field("partner_email", &self.partner_email)
            .field("password", &"<redacted>")
            .field("value_scale", &self.value_scale)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub clients: Vec<String>,
    #[serde(default)]
    pub recovery_policy: RecoveryPolicy,
    #[serde(default)]
    pub store: StoreConfig,
    pub partner: PartnerConfig,
    pub schedule: Option<ScheduleConfig>,
    pub metrics: Option<MetricsConfig>,
}

fn default_data_dir() -> String {
    DEFAULT_DATA_DIR.to_string()
}

fn default_value_scale() -> f64 {
    DEFAULT_VALUE_SCALE
}

impl AppConfig {
    /// Read `$USAGE_SYNC_CONFIG` (default `usage-sync.toml`), then apply
    /// `PARTNER_EMAIL`, `PARTNER_PASSWORD` and `USAGE_SYNC_DATA_DIR`.
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path =
            env::var("USAGE_SYNC_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file '{path}'"))?;
        let mut cfg = Self::from_toml_str(&contents)?;
        cfg.apply_env_overrides(|key| env::var(key).ok());
        Ok(cfg)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        Ok(cfg)
    }

    pub fn apply_env_overrides<F>(&mut self, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(email) = get("PARTNER_EMAIL") {
            self.partner.partner_email = email;
        }
        if let Some(password) = get("PARTNER_PASSWORD") {
            self.partner.password = password;
        }
        if let Some(dir) = get("USAGE_SYNC_DATA_DIR") {
            self.store.data_dir = dir;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.partner.snapshot_path.trim().is_empty() {
            bail!("partner.snapshot_path must be set");
        }
        if self.partner.partner_email.trim().is_empty() {
            bail!("partner.partner_email must be set (or PARTNER_EMAIL)");
        }
        if self.partner.password.is_empty() {
            bail!("partner.password must be set (or PARTNER_PASSWORD)");
        }
        if !self.partner.value_scale.is_finite() || self.partner.value_scale <= 0.0 {
            bail!("partner.value_scale must be a positive number");
        }
        if self.store.data_dir.trim().is_empty() {
            bail!("store.data_dir must not be empty");
        }
        if self.clients.iter().any(|c| c.trim().is_empty()) {
            bail!("clients must not contain empty identifiers");
        }
        if let Some(schedule) = &self.schedule {
            if schedule.interval_secs == 0 {
                bail!("schedule.interval_secs must be >= 1");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [partner]
        snapshot_path = "partner-snapshot.json"
        partner_email = "ops@example.com"
    "#;

    #[test]
    fn defaults_apply_to_minimal_config() {
        let cfg = AppConfig::from_toml_str(MINIMAL).expect("parse");

        assert!(cfg.clients.is_empty());
        assert_eq!(cfg.recovery_policy, RecoveryPolicy::Rebuild);
        assert_eq!(cfg.store.kind, StoreKind::Csv);
        assert_eq!(cfg.store.data_dir, "db");
        assert_eq!(cfg.partner.value_scale, DEFAULT_VALUE_SCALE);
        assert!(cfg.schedule.is_none());
        assert!(cfg.metrics.is_none());
    }

    #[test]
    fn password_is_required_and_env_can_supply_it() {
        let mut cfg = AppConfig::from_toml_str(MINIMAL).expect("parse");
        assert!(cfg.validate().is_err());

        cfg.apply_env_overrides(|key| match key {
            "PARTNER_PASSWORD" => Some("from-env".to_string()),
            "USAGE_SYNC_DATA_DIR" => Some("/var/lib/usage".to_string()),
            _ => None,
        });
        cfg.validate().expect("valid after env overrides");
        assert_eq!(cfg.partner.credentials().password, "from-env");
        assert_eq!(cfg.partner.partner_email, "ops@example.com");
        assert_eq!(cfg.store.data_dir, "/var/lib/usage");
    }

    #[test]
    fn full_config_parses_policies_and_store_kind() {
        let cfg = AppConfig::from_toml_str(
            r#"
            clients = ["soto", "bodega"]
            recovery_policy = "keep_stale"

            [store]
            kind = "sqlite"
            data_dir = "cache"

            [partner]
            snapshot_path = "snap.json"
            partner_email = "ops@example.com"
            password = "pw"
            value_scale = 1.0

            [schedule]
            interval_secs = 0
            "#,
        )
        .expect("parse");

        assert_eq!(cfg.recovery_policy, RecoveryPolicy::KeepStale);
        assert_eq!(cfg.store.kind, StoreKind::Sqlite);
        assert_eq!(cfg.clients, vec!["soto", "bodega"]);
        assert!(cfg.validate().is_err(), "zero interval must be rejected");
    }

    #[test]
    fn debug_output_hides_password() {
        let mut cfg = AppConfig::from_toml_str(MINIMAL).expect("parse");
        cfg.partner.password = "hunter2".to_string();
        assert!(!format!("{cfg:?}").contains("hunter2"));
    }

    #[test]
    fn unknown_policy_is_rejected() {
        let res = AppConfig::from_toml_str(&format!("recovery_policy = \"delete\"\n{MINIMAL}"));
        assert!(res.is_err());
    }
}
