use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use scanward_model::{CheckConfig, CheckType, ResolvedTarget, ResultStatus, Severity};
use serde_json::json;

use super::{
    Check, CheckOutcome, CommandCheck, CommandSpec,
    config::DnsCheckConfig,
};
use crate::error::CheckError;

/// Record enumeration followed by a zone transfer attempt.
///
/// A failed record lookup ends the check; a failed transfer attempt only
/// means the zone is not exposed.
#[derive(Clone, Debug)]
pub struct DnsCheck {
    records: CommandCheck,
    zone_transfer: CommandSpec,
    refused: Regex,
    severity: Severity,
}

impl DnsCheck {
    pub fn new(config: DnsCheckConfig) -> Result<Self, CheckError> {
        let refused =
            Regex::new(&config.zone_transfer.refused).map_err(|source| CheckError::InvalidPattern {
                check: CheckType::DNS.into(),
                source,
            })?;
        Ok(Self {
            records: CommandCheck::new(CheckType::DNS, config.records)?,
            zone_transfer: config.zone_transfer.command,
            refused,
            severity: config.zone_transfer.severity,
        })
    }

    fn transfer_allowed(&self, stdout: &str, success: bool) -> bool {
        success && !stdout.trim().is_empty() && !self.refused.is_match(stdout)
    }
}

#[async_trait]
impl Check for DnsCheck {
    async fn run(
        &self,
        target: &ResolvedTarget,
        config: &CheckConfig,
        timeout: Duration,
    ) -> Result<CheckOutcome, CheckError> {
        let records = self.records.run(target, config, timeout).await?;
        if records.status == ResultStatus::Failed {
            return Ok(records);
        }

        let (vulnerable, transfer) = match self.zone_transfer.execute(target, config).await {
            Ok((output, success)) => (
                self.transfer_allowed(&output.stdout, success),
                serde_json::to_value(&output).unwrap_or_default(),
            ),
            Err(err) => {
                tracing::warn!(target: "scan::checks", host = %target.host, "zone transfer attempt failed: {err}");
                (false, json!({ "error": err.to_string() }))
            }
        };

        let (findings, severity) = if vulnerable {
            (
                records.findings.saturating_add(1),
                records.severity.max(self.severity),
            )
        } else {
            (records.findings, records.severity)
        };

        Ok(CheckOutcome::success(
            json!({
                "records": records.data,
                "zone_transfer": {
                    "vulnerable": vulnerable,
                    "attempt": transfer,
                },
            }),
            findings,
            severity,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check() -> DnsCheck {
        DnsCheck::new(DnsCheckConfig::default()).unwrap()
    }

    #[test]
    fn refused_transfers_are_not_findings() {
        let dns = check();
        assert!(!dns.transfer_allowed("; Transfer failed.\n", true));
        assert!(!dns.transfer_allowed(";; communications error to 1.2.3.4#53\n", true));
        assert!(!dns.transfer_allowed("", true));
        assert!(!dns.transfer_allowed("example.com. 3600 IN SOA ns1 admin 1 2 3 4 5\n", false));
    }

    #[test]
    fn answered_transfer_is_a_finding() {
        let dns = check();
        let zone = "example.com.\t3600\tIN\tSOA\tns1.example.com. admin.example.com. 1 7200 3600 1209600 3600\n\
                    www.example.com.\t3600\tIN\tA\t192.0.2.10\n";
        assert!(dns.transfer_allowed(zone, true));
    }

    #[test]
    fn invalid_refusal_pattern_is_rejected() {
        let mut config = DnsCheckConfig::default();
        config.zone_transfer.refused = "(".into();
        assert!(matches!(
            DnsCheck::new(config),
            Err(CheckError::InvalidPattern { .. })
        ));
    }
}
