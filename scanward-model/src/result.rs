use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    ids::{ResultId, ScanJobId},
    status::{CheckType, ResultStatus, Severity},
};

/// Check output as a tagged union keyed by check type.
///
/// The orchestration core stores and returns it untouched; only report
/// generation looks inside via [`CheckPayload::decode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", content = "data", rename_all = "snake_case")]
pub enum CheckPayload {
    Ping(Value),
    #[serde(rename = "portscan")]
    PortScan(Value),
    Headers(Value),
    Ssl(Value),
    Dns(Value),
    Bruteforce(Value),
    Custom { check: CheckType, data: Value },
    /// The check could not produce data.
    Error(ExecutionFailure),
}

impl CheckPayload {
    /// Wrap raw check data under the variant that matches `check`.
    pub fn for_check(check: &CheckType, data: Value) -> Self {
        match check.as_str() {
            CheckType::PING => CheckPayload::Ping(data),
            CheckType::PORTSCAN => CheckPayload::PortScan(data),
            CheckType::HEADERS => CheckPayload::Headers(data),
            CheckType::SSL => CheckPayload::Ssl(data),
            CheckType::DNS => CheckPayload::Dns(data),
            CheckType::BRUTEFORCE => CheckPayload::Bruteforce(data),
            _ => CheckPayload::Custom {
                check: check.clone(),
                data,
            },
        }
    }

    pub fn failure(failure: ExecutionFailure) -> Self {
        CheckPayload::Error(failure)
    }

    /// Raw data of a non-error payload.
    pub fn data(&self) -> Option<&Value> {
        match self {
            CheckPayload::Ping(data)
            | CheckPayload::PortScan(data)
            | CheckPayload::Headers(data)
            | CheckPayload::Ssl(data)
            | CheckPayload::Dns(data)
            | CheckPayload::Bruteforce(data)
            | CheckPayload::Custom { data, .. } => Some(data),
            CheckPayload::Error(_) => None,
        }
    }

    /// Decode the payload data into a typed structure.
    pub fn decode<T: DeserializeOwned>(&self) -> Option<serde_json::Result<T>> {
        self.data().map(|data| serde_json::from_value(data.clone()))
    }

    pub fn as_failure(&self) -> Option<&ExecutionFailure> {
        match self {
            CheckPayload::Error(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Why a check execution produced an `error` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub message: String,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub panicked: bool,
}

impl ExecutionFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: false,
            panicked: false,
        }
    }

    pub fn timeout(after_secs: u64) -> Self {
        Self {
            message: format!("check exceeded its {after_secs}s deadline"),
            timed_out: true,
            panicked: false,
        }
    }

    pub fn panic(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: false,
            panicked: true,
        }
    }
}

/// Output captured from an external tool run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub program: String,
    pub args: Vec<String>,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Security header audit for an HTTP target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderAudit {
    pub url: String,
    pub status_code: u16,
    pub present: BTreeMap<String, String>,
    pub missing: Vec<String>,
}

/// One effective result per (job, check type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub id: ResultId,
    pub job_id: ScanJobId,
    pub check_type: CheckType,
    pub status: ResultStatus,
    pub payload: CheckPayload,
    pub findings: u32,
    pub severity: Severity,
    /// Arrival order within the store.
    pub sequence: i64,
    /// Stored for audit after the job was cancelled; never affects status.
    #[serde(default)]
    pub after_cancel: bool,
    pub recorded_at: DateTime<Utc>,
}

/// Result fields supplied by a worker before the store assigns identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultDraft {
    pub job_id: ScanJobId,
    pub check_type: CheckType,
    pub status: ResultStatus,
    pub payload: CheckPayload,
    pub findings: u32,
    pub severity: Severity,
}

impl ResultDraft {
    pub fn into_result(self, sequence: i64, after_cancel: bool) -> ScanResult {
        ScanResult {
            id: ResultId::new(),
            job_id: self.job_id,
            check_type: self.check_type,
            status: self.status,
            payload: self.payload,
            findings: self.findings,
            severity: self.severity,
            sequence,
            after_cancel,
            recorded_at: Utc::now(),
        }
    }
}
