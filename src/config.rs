//! Ledger configuration, loadable from YAML

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::types::{LedgerError, LedgerResult};

/// Where the "no negative balance" rule is enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundsCheck {
    /// The executor compares the locked source balance with the amount
    /// before writing anything
    Executor,
    /// Left to the store's check constraint on the balance column
    StoreConstraint,
}

/// What to do with a transfer whose source and destination are the same
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelfTransferPolicy {
    /// Record it: one row lock, two entries, net-zero balance change
    Allow,
    /// Fail with a validation error
    Reject,
}

/// Bounded retry of a unit of work that hit a store conflict
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 5,
            max_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_level: String,
    pub use_json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            use_json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub retry: RetryConfig,
    /// Longest a unit of work waits for one row lock
    pub lock_timeout_ms: u64,
    pub funds_check: FundsCheck,
    pub self_transfer: SelfTransferPolicy,
    pub logging: LoggingConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            lock_timeout_ms: 2_000,
            funds_check: FundsCheck::Executor,
            self_transfer: SelfTransferPolicy::Allow,
            logging: LoggingConfig::default(),
        }
    }
}

impl LedgerConfig {
    pub fn from_yaml_str(yaml: &str) -> LedgerResult<Self> {
        let config: LedgerConfig = serde_yaml::from_str(yaml)
            .map_err(|e| LedgerError::Validation(format!("Invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            LedgerError::Validation(format!("Cannot read config {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.retry.max_attempts == 0 {
            return Err(LedgerError::Validation(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(LedgerError::Validation(
                "retry.base_delay_ms cannot exceed retry.max_delay_ms".to_string(),
            ));
        }
        if self.lock_timeout_ms == 0 {
            return Err(LedgerError::Validation(
                "lock_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = LedgerConfig::from_yaml_str(
            r#"
retry:
  max_attempts: 3
funds_check: store_constraint
self_transfer: reject
"#,
        )
        .unwrap();

        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.max_delay_ms, 200);
        assert_eq!(config.funds_check, FundsCheck::StoreConstraint);
        assert_eq!(config.self_transfer, SelfTransferPolicy::Reject);
        assert_eq!(config.lock_timeout(), Duration::from_secs(2));
        assert_eq!(config.logging.log_level, "info");
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let err = LedgerConfig::from_yaml_str("retry:\n  max_attempts: 0\n").unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("bank-ledger-{}.yaml", std::process::id()));
        fs::write(&path, "lock_timeout_ms: 750\nlogging:\n  use_json: true\n").unwrap();

        let config = LedgerConfig::load(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(config.lock_timeout(), Duration::from_millis(750));
        assert!(config.logging.use_json);
        assert!(LedgerConfig::load(&path).is_err());
    }

    #[test]
    fn test_rejects_unknown_enum_value() {
        assert!(LedgerConfig::from_yaml_str("funds_check: nowhere\n").is_err());
    }
}
