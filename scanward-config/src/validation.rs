use scanward_core::checks::CheckRegistry;
use thiserror::Error;

use crate::models::AppConfig;

/// Settings the orchestrator cannot run with.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigGuardRailError {
    #[error("orchestrator.workers.parallelism must be at least 1")]
    NoWorkers,
    #[error("deadline {field} must be at least 1 second")]
    ZeroDeadline { field: String },
    #[error("default deadline {default_secs}s exceeds the maximum of {max_secs}s")]
    DefaultAboveMax { default_secs: u64, max_secs: u64 },
    #[error("orchestrator.lease.grace_secs must be at least 1")]
    ZeroLeaseGrace,
    #[error("orchestrator.status.max_cas_attempts must be at least 1")]
    ZeroCasAttempts,
    #[error("orchestrator.timeouts.max_attempts must be at least 1")]
    ZeroMaxAttempts,
    #[error("database.max_connections must be at least 1")]
    ZeroConnections,
    #[error("orchestrator.recovery.{field} must be at least 1")]
    ZeroRecovery { field: String },
    #[error("checks: {0}")]
    InvalidCheck(String),
}

impl AppConfig {
    /// Reject settings that would stall or misclassify scans.
    pub fn validate(&self) -> Result<(), ConfigGuardRailError> {
        let orchestrator = &self.orchestrator;

        if orchestrator.workers.parallelism == 0 {
            return Err(ConfigGuardRailError::NoWorkers);
        }

        let deadlines = &orchestrator.deadlines;
        if deadlines.default_secs == 0 {
            return Err(ConfigGuardRailError::ZeroDeadline {
                field: "default_secs".into(),
            });
        }
        if deadlines.max_secs == 0 {
            return Err(ConfigGuardRailError::ZeroDeadline {
                field: "max_secs".into(),
            });
        }
        if let Some((check, _)) = deadlines.per_check.iter().find(|(_, secs)| **secs == 0) {
            return Err(ConfigGuardRailError::ZeroDeadline {
                field: format!("per_check.{check}"),
            });
        }
        if deadlines.default_secs > deadlines.max_secs {
            return Err(ConfigGuardRailError::DefaultAboveMax {
                default_secs: deadlines.default_secs,
                max_secs: deadlines.max_secs,
            });
        }

        if orchestrator.lease.grace_secs == 0 {
            return Err(ConfigGuardRailError::ZeroLeaseGrace);
        }
        if orchestrator.status.max_cas_attempts == 0 {
            return Err(ConfigGuardRailError::ZeroCasAttempts);
        }
        if orchestrator.timeouts.max_attempts == 0 {
            return Err(ConfigGuardRailError::ZeroMaxAttempts);
        }
        if self.database.max_connections == 0 {
            return Err(ConfigGuardRailError::ZeroConnections);
        }
        if orchestrator.recovery.stale_after_ms == 0 {
            return Err(ConfigGuardRailError::ZeroRecovery {
                field: "stale_after_ms".into(),
            });
        }
        if orchestrator.recovery.batch_size == 0 {
            return Err(ConfigGuardRailError::ZeroRecovery {
                field: "batch_size".into(),
            });
        }

        CheckRegistry::with_builtins(&self.checks)
            .map_err(|err| ConfigGuardRailError::InvalidCheck(err.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass() {
        assert_eq!(AppConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_each_guard_rail() {
        let mut config = AppConfig::default();
        config.orchestrator.workers.parallelism = 0;
        assert_eq!(config.validate(), Err(ConfigGuardRailError::NoWorkers));

        let mut config = AppConfig::default();
        config.orchestrator.deadlines.per_check.insert("ping".into(), 0);
        assert_eq!(
            config.validate(),
            Err(ConfigGuardRailError::ZeroDeadline {
                field: "per_check.ping".into()
            })
        );

        let mut config = AppConfig::default();
        config.orchestrator.deadlines.default_secs = 7_200;
        assert_eq!(
            config.validate(),
            Err(ConfigGuardRailError::DefaultAboveMax {
                default_secs: 7_200,
                max_secs: 3_600
            })
        );

        let mut config = AppConfig::default();
        config.orchestrator.lease.grace_secs = 0;
        assert_eq!(config.validate(), Err(ConfigGuardRailError::ZeroLeaseGrace));

        let mut config = AppConfig::default();
        config.orchestrator.status.max_cas_attempts = 0;
        assert_eq!(config.validate(), Err(ConfigGuardRailError::ZeroCasAttempts));

        let mut config = AppConfig::default();
        config.orchestrator.timeouts.max_attempts = 0;
        assert_eq!(config.validate(), Err(ConfigGuardRailError::ZeroMaxAttempts));

        let mut config = AppConfig::default();
        config.orchestrator.recovery.stale_after_ms = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigGuardRailError::ZeroRecovery {
                field: "stale_after_ms".into()
            })
        );
    }

    #[test]
    fn rejects_unparseable_findings_pattern() {
        let mut config = AppConfig::default();
        config.checks.ssl.findings = Some(scanward_core::checks::FindingsRule {
            pattern: Some("verify (error".into()),
            tiers: Vec::new(),
            otherwise: Default::default(),
            indicators: Vec::new(),
        });
        let err = config.validate().unwrap_err();
        assert!(
            matches!(&err, ConfigGuardRailError::InvalidCheck(message) if message.contains("ssl")),
            "{err}"
        );
    }
}
