//! Check functions and the immutable registry that binds names to them.
//!
//! Every check is an opaque unit of work with a fixed contract:
//! `(target, config, timeout) -> CheckOutcome`. Probing internals stay thin
//! wrappers over external tooling.

pub mod command;
pub mod config;
pub mod dns;
pub mod headers;
pub mod registry;

use std::{fmt, time::Duration};

use async_trait::async_trait;
use scanward_model::{CheckConfig, ResolvedTarget, ResultStatus, Severity};
use serde_json::Value;

use crate::error::CheckError;

pub use command::{
    Classification, CommandCheck, CommandSpec, ExitPolicy, FindingsMatcher, FindingsRule, Indicator,
    SeverityTier,
};
pub use config::BuiltinChecksConfig;
pub use dns::DnsCheck;
pub use headers::HttpHeadersCheck;
pub use registry::{CheckRegistry, CheckRegistryBuilder};

/// What a check hands back when it runs to completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub status: ResultStatus,
    pub data: Value,
    pub findings: u32,
    pub severity: Severity,
}

impl CheckOutcome {
    pub fn success(data: Value, findings: u32, severity: Severity) -> Self {
        Self {
            status: ResultStatus::Success,
            data,
            findings,
            severity,
        }
    }

    pub fn failed(data: Value) -> Self {
        Self {
            status: ResultStatus::Failed,
            data,
            findings: 0,
            severity: Severity::Info,
        }
    }
}

/// A registered check function.
///
/// `timeout` is the task deadline; the executor enforces it independently,
/// implementations may use it to size their own tool timeouts.
#[async_trait]
pub trait Check: Send + Sync + fmt::Debug {
    async fn run(
        &self,
        target: &ResolvedTarget,
        config: &CheckConfig,
        timeout: Duration,
    ) -> Result<CheckOutcome, CheckError>;
}
