//! OpsPulse configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{OpsPulseError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpsPulseConfig {
    /// SQLite database path.
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// IANA timezone every run-date/due-time computation uses.
    /// Threaded explicitly into the materializer, evaluator, and bucket
    /// math — the engine never reads the ambient system timezone.
    #[serde(default = "default_timezone")]
    pub business_timezone: String,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

fn default_db_path() -> String { "~/.opspulse/opspulse.db".into() }
fn default_timezone() -> String { "Asia/Ho_Chi_Minh".into() }

impl Default for OpsPulseConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            business_timezone: default_timezone(),
            sweep: SweepConfig::default(),
            escalation: EscalationConfig::default(),
            retention: RetentionConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl OpsPulseConfig {
    /// Load config from the default path (~/.opspulse/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| OpsPulseError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| OpsPulseError::Config(format!("Failed to parse config: {e}")))?;
        // Fail fast on a bad timezone name instead of at the first sweep.
        config.timezone()?;
        Ok(config)
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".opspulse")
            .join("config.toml")
    }

    /// Parse the configured business timezone.
    pub fn timezone(&self) -> Result<chrono_tz::Tz> {
        self.business_timezone.parse().map_err(|_| {
            OpsPulseError::Config(format!(
                "Unknown business timezone '{}'",
                self.business_timezone
            ))
        })
    }
}

/// Periodic trigger cadences, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Fast SLA sweep (evaluator + escalation).
    #[serde(default = "default_sla_sweep_secs")]
    pub sla_sweep_secs: u64,
    /// Coarse redundant SLA sweep, in case the fast sweep's process dies.
    #[serde(default = "default_redundant_sweep_secs")]
    pub redundant_sweep_secs: u64,
    /// Daily materialization + rollover check.
    #[serde(default = "default_materialize_secs")]
    pub materialize_secs: u64,
    /// Weekly materialization check.
    #[serde(default = "default_weekly_secs")]
    pub weekly_secs: u64,
    /// Monthly materialization check.
    #[serde(default = "default_monthly_secs")]
    pub monthly_secs: u64,
    /// Task aggregate-status rollup.
    #[serde(default = "default_rollup_secs")]
    pub rollup_secs: u64,
    /// Audit/reservation/lock retention cleanup.
    #[serde(default = "default_cleanup_secs")]
    pub cleanup_secs: u64,
}

fn default_sla_sweep_secs() -> u64 { 60 }
fn default_redundant_sweep_secs() -> u64 { 600 }
fn default_materialize_secs() -> u64 { 300 }
fn default_weekly_secs() -> u64 { 1800 }
fn default_monthly_secs() -> u64 { 3600 }
fn default_rollup_secs() -> u64 { 300 }
fn default_cleanup_secs() -> u64 { 86_400 }

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            sla_sweep_secs: default_sla_sweep_secs(),
            redundant_sweep_secs: default_redundant_sweep_secs(),
            materialize_secs: default_materialize_secs(),
            weekly_secs: default_weekly_secs(),
            monthly_secs: default_monthly_secs(),
            rollup_secs: default_rollup_secs(),
            cleanup_secs: default_cleanup_secs(),
        }
    }
}

/// Overdue escalation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Minutes after the immediate alert before repeats start.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_minutes: i64,
    /// Minutes between repeat reminders.
    #[serde(default = "default_repeat_interval")]
    pub repeat_interval_minutes: i64,
    /// Suppression window for one-shot completed/delayed notices.
    #[serde(default = "default_oneshot_window")]
    pub oneshot_window_minutes: i64,
    /// Cluster sweep-lock lease, in seconds. A crashed holder's lease is
    /// taken over after this elapses.
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: i64,
}

fn default_initial_delay() -> i64 { 15 }
fn default_repeat_interval() -> i64 { 15 }
fn default_oneshot_window() -> i64 { 10 }
fn default_lock_ttl() -> i64 { 120 }

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            initial_delay_minutes: default_initial_delay(),
            repeat_interval_minutes: default_repeat_interval(),
            oneshot_window_minutes: default_oneshot_window(),
            lock_ttl_secs: default_lock_ttl(),
        }
    }
}

/// Retention windows for the cleanup trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Days of audit history to keep.
    #[serde(default = "default_audit_days")]
    pub audit_days: i64,
    /// Hours an alert reservation survives after creation. Must outlive
    /// the longest escalation campaign of one cycle.
    #[serde(default = "default_reservation_hours")]
    pub reservation_hours: i64,
}

fn default_audit_days() -> i64 { 90 }
fn default_reservation_hours() -> i64 { 48 }

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            audit_days: default_audit_days(),
            reservation_hours: default_reservation_hours(),
        }
    }
}

/// Outbound notification sink.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotifyConfig {
    /// Webhook URL alerts are POSTed to. Empty = log-only sink.
    #[serde(default)]
    pub webhook_url: String,
    /// Extra headers for the webhook call.
    #[serde(default)]
    pub webhook_headers: Vec<(String, String)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = OpsPulseConfig::default();
        assert_eq!(cfg.escalation.initial_delay_minutes, 15);
        assert_eq!(cfg.escalation.repeat_interval_minutes, 15);
        assert_eq!(cfg.sweep.sla_sweep_secs, 60);
        assert!(cfg.timezone().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let cfg: OpsPulseConfig = toml::from_str(
            r#"
            business_timezone = "Europe/Berlin"

            [escalation]
            initial_delay_minutes = 30
            "#,
        )
        .unwrap();
        assert_eq!(cfg.business_timezone, "Europe/Berlin");
        assert_eq!(cfg.escalation.initial_delay_minutes, 30);
        // untouched sections fall back to defaults
        assert_eq!(cfg.escalation.repeat_interval_minutes, 15);
        assert_eq!(cfg.retention.audit_days, 90);
    }

    #[test]
    fn test_bad_timezone_rejected() {
        let cfg = OpsPulseConfig {
            business_timezone: "Mars/Olympus_Mons".into(),
            ..Default::default()
        };
        assert!(cfg.timezone().is_err());
    }
}
