use std::{collections::BTreeMap, fmt, sync::Arc};

use scanward_model::CheckType;

use super::{Check, CommandCheck, DnsCheck, HttpHeadersCheck, config::BuiltinChecksConfig};
use crate::error::CheckError;

/// Fixed mapping from check name to check function.
///
/// Built once at startup and shared behind an `Arc`; there is no way to
/// mutate it afterwards.
#[derive(Clone, Default)]
pub struct CheckRegistry {
    checks: BTreeMap<CheckType, Arc<dyn Check>>,
}

impl fmt::Debug for CheckRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckRegistry")
            .field("checks", &self.checks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CheckRegistry {
    pub fn builder() -> CheckRegistryBuilder {
        CheckRegistryBuilder::default()
    }

    /// Registry with the six built-in checks configured from `config`.
    ///
    /// Findings patterns are compiled here; an invalid one fails the build.
    pub fn with_builtins(config: &BuiltinChecksConfig) -> Result<Self, CheckError> {
        let mut builder = Self::builder();
        for (name, spec) in config.command_specs() {
            builder = builder.register(name, CommandCheck::new(name, spec.clone())?);
        }
        Ok(builder
            .register(CheckType::DNS, DnsCheck::new(config.dns.clone())?)
            .register(CheckType::HEADERS, HttpHeadersCheck::new(config.headers.clone()))
            .build())
    }

    pub fn get(&self, check: &CheckType) -> Option<Arc<dyn Check>> {
        self.checks.get(check).cloned()
    }

    pub fn contains(&self, check: &CheckType) -> bool {
        self.checks.contains_key(check)
    }

    pub fn names(&self) -> impl Iterator<Item = &CheckType> {
        self.checks.keys()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

#[derive(Default)]
pub struct CheckRegistryBuilder {
    checks: BTreeMap<CheckType, Arc<dyn Check>>,
}

impl fmt::Debug for CheckRegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckRegistryBuilder")
            .field("checks", &self.checks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CheckRegistryBuilder {
    /// Bind `name` to `check`. A later registration under the same name wins.
    ///
    /// Names that are not valid check identifiers are skipped with a warning.
    pub fn register(mut self, name: &str, check: impl Check + 'static) -> Self {
        match CheckType::new(name) {
            Ok(check_type) => {
                self.checks.insert(check_type, Arc::new(check));
            }
            Err(err) => {
                tracing::warn!(target: "scan::checks", "skipping check registration: {err}");
            }
        }
        self
    }

    pub fn build(self) -> CheckRegistry {
        CheckRegistry {
            checks: self.checks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::CheckOutcome;
    use async_trait::async_trait;
    use scanward_model::{CheckConfig, ResolvedTarget, Severity};
    use std::time::Duration;

    #[derive(Debug)]
    struct Noop;

    #[async_trait]
    impl Check for Noop {
        async fn run(
            &self,
            _target: &ResolvedTarget,
            _config: &CheckConfig,
            _timeout: Duration,
        ) -> Result<CheckOutcome, CheckError> {
            Ok(CheckOutcome::success(serde_json::Value::Null, 0, Severity::Info))
        }
    }

    #[test]
    fn builtins_cover_the_standard_checks() {
        let registry = CheckRegistry::with_builtins(&BuiltinChecksConfig::default()).unwrap();
        let names: Vec<&str> = registry.names().map(CheckType::as_str).collect();
        assert_eq!(
            names,
            vec!["bruteforce", "dns", "headers", "ping", "portscan", "ssl"]
        );
    }

    #[test]
    fn invalid_findings_pattern_fails_the_build() {
        let mut config = BuiltinChecksConfig::default();
        config.bruteforce.findings = Some(crate::checks::FindingsRule {
            pattern: Some("[".into()),
            tiers: Vec::new(),
            otherwise: Severity::Info,
            indicators: Vec::new(),
        });
        let err = CheckRegistry::with_builtins(&config).unwrap_err();
        assert!(matches!(err, CheckError::InvalidPattern { ref check, .. } if check == "bruteforce"));
    }

    #[test]
    fn builder_skips_invalid_names() {
        let registry = CheckRegistry::builder()
            .register("ok", Noop)
            .register("not ok", Noop)
            .build();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&CheckType::new("ok").unwrap()));
    }
}
