use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use scanward_model::{
    CheckConfig, CommandOutput, ResolvedTarget, ResultStatus, Severity,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::{io::AsyncWriteExt, process::Command};

use super::{Check, CheckOutcome, config::DEFAULT_WORDLIST};
use crate::error::CheckError;

/// Captured stdout/stderr are truncated to this many bytes.
const MAX_CAPTURE_BYTES: usize = 64 * 1024;

/// How a non-zero exit status is classified.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExitPolicy {
    /// The tool failed; record a `failed` result.
    Failed,
    /// A non-zero exit is itself a finding (unreachable host, broken TLS).
    Finding { severity: Severity },
    /// Classify the output as if the tool had succeeded.
    Ignore,
}

/// Severity assigned once the finding count reaches `min_count`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeverityTier {
    pub min_count: u32,
    pub severity: Severity,
}

impl SeverityTier {
    pub fn new(min_count: u32, severity: Severity) -> Self {
        Self {
            min_count,
            severity,
        }
    }
}

/// Output marker that counts as one finding when it matches.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Indicator {
    /// Regular expression searched in stdout.
    pub pattern: String,
    pub severity: Severity,
    /// Recorded under `issues` in the result data.
    pub label: String,
}

impl Indicator {
    pub fn new(pattern: &str, severity: Severity, label: &str) -> Self {
        Self {
            pattern: pattern.into(),
            severity,
            label: label.into(),
        }
    }
}

/// Derives findings and severity from tool output.
///
/// Patterns are regular expressions, compiled once by [`FindingsRule::compile`]
/// when the check is registered.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FindingsRule {
    /// Counted across stdout. When absent, non-empty lines are counted unless
    /// `indicators` are set.
    #[serde(default)]
    pub pattern: Option<String>,
    /// Checked in order; the first tier whose `min_count` is reached wins.
    #[serde(default)]
    pub tiers: Vec<SeverityTier>,
    #[serde(default)]
    pub otherwise: Severity,
    /// Each matching indicator adds one finding. The first match in list
    /// order overrides the tier severity.
    #[serde(default)]
    pub indicators: Vec<Indicator>,
}

impl FindingsRule {
    pub fn compile(&self) -> Result<FindingsMatcher, regex::Error> {
        let pattern = match self.pattern.as_deref() {
            Some(pattern) if !pattern.is_empty() => Some(Regex::new(pattern)?),
            _ => None,
        };
        let indicators = self
            .indicators
            .iter()
            .map(|indicator| {
                Ok(CompiledIndicator {
                    regex: Regex::new(&indicator.pattern)?,
                    severity: indicator.severity,
                    label: indicator.label.clone(),
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(FindingsMatcher {
            pattern,
            tiers: self.tiers.clone(),
            otherwise: self.otherwise,
            indicators,
        })
    }
}

#[derive(Clone, Debug)]
struct CompiledIndicator {
    regex: Regex,
    severity: Severity,
    label: String,
}

/// Findings derived from one run's output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    pub findings: u32,
    pub severity: Severity,
    /// Labels of the indicators that matched.
    pub issues: Vec<String>,
}

/// A compiled [`FindingsRule`].
#[derive(Clone, Debug)]
pub struct FindingsMatcher {
    pattern: Option<Regex>,
    tiers: Vec<SeverityTier>,
    otherwise: Severity,
    indicators: Vec<CompiledIndicator>,
}

impl FindingsMatcher {
    pub fn classify(&self, stdout: &str) -> Classification {
        let counted = match &self.pattern {
            Some(pattern) => pattern.find_iter(stdout).count(),
            None if self.indicators.is_empty() => stdout
                .lines()
                .filter(|line| !line.trim().is_empty())
                .count(),
            None => 0,
        };
        let mut findings = u32::try_from(counted).unwrap_or(u32::MAX);
        let tiered = self
            .tiers
            .iter()
            .find(|tier| findings >= tier.min_count)
            .map(|tier| tier.severity)
            .unwrap_or(self.otherwise);

        let mut issues = Vec::new();
        let mut indicated = None;
        for indicator in &self.indicators {
            if indicator.regex.is_match(stdout) {
                findings = findings.saturating_add(1);
                issues.push(indicator.label.clone());
                indicated.get_or_insert(indicator.severity);
            }
        }

        Classification {
            findings,
            severity: indicated.unwrap_or(tiered),
            issues,
        }
    }
}

/// External program invocation.
///
/// Arguments may reference `{host}`, `{url}`, `{wordlist}` and
/// `{option:<key>}` (a string from the check's options).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Bytes written to the child's stdin before it is closed.
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default = "default_exit_policy")]
    pub on_nonzero_exit: ExitPolicy,
    #[serde(default)]
    pub findings: Option<FindingsRule>,
}

fn default_exit_policy() -> ExitPolicy {
    ExitPolicy::Failed
}

impl CommandSpec {
    pub fn render_args(&self, target: &ResolvedTarget, config: &CheckConfig) -> Vec<String> {
        let wordlist = config.wordlist.as_deref().unwrap_or(DEFAULT_WORDLIST);
        self.args
            .iter()
            .map(|arg| render_arg(arg, target, wordlist, config))
            .collect()
    }

    /// Spawn the program and capture its output. The boolean is the exit
    /// status' success.
    ///
    /// The child is killed when the future is dropped, which is how executor
    /// timeouts reach the process.
    pub async fn execute(
        &self,
        target: &ResolvedTarget,
        config: &CheckConfig,
    ) -> Result<(CommandOutput, bool), CheckError> {
        let args = self.render_args(target, config);
        tracing::debug!(
            target: "scan::checks",
            program = %self.program,
            ?args,
            "spawning check tool"
        );

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| CheckError::Tool {
                program: self.program.clone(),
                message: format!("failed to spawn: {err}"),
            })?;

        if let Some(input) = self.stdin.as_deref()
            && let Some(mut stdin) = child.stdin.take()
        {
            if let Err(err) = stdin.write_all(input.as_bytes()).await
                && err.kind() != std::io::ErrorKind::BrokenPipe
            {
                return Err(err.into());
            }
            drop(stdin);
        }

        let output = child.wait_with_output().await?;
        let captured = CommandOutput {
            program: self.program.clone(),
            args,
            exit_code: output.status.code(),
            stdout: truncate_lossy(&output.stdout),
            stderr: truncate_lossy(&output.stderr),
        };
        Ok((captured, output.status.success()))
    }
}

fn render_arg(
    arg: &str,
    target: &ResolvedTarget,
    wordlist: &str,
    config: &CheckConfig,
) -> String {
    let rendered = arg
        .replace("{host}", &target.host)
        .replace("{url}", &target.url)
        .replace("{wordlist}", wordlist);

    let mut out = String::with_capacity(rendered.len());
    let mut rest = rendered.as_str();
    while let Some(start) = rest.find("{option:") {
        let after = &rest[start + "{option:".len()..];
        let Some(end) = after.find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        out.push_str(config.option_str(&after[..end]).unwrap_or_default());
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

fn truncate_lossy(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= MAX_CAPTURE_BYTES {
        return text.into_owned();
    }
    let mut end = MAX_CAPTURE_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// Runs an external tool and classifies its output.
#[derive(Clone, Debug)]
pub struct CommandCheck {
    name: String,
    spec: CommandSpec,
    matcher: Option<FindingsMatcher>,
}

impl CommandCheck {
    pub fn new(name: impl Into<String>, spec: CommandSpec) -> Result<Self, CheckError> {
        let name = name.into();
        let matcher = spec
            .findings
            .as_ref()
            .map(FindingsRule::compile)
            .transpose()
            .map_err(|source| CheckError::InvalidPattern {
                check: name.clone(),
                source,
            })?;
        Ok(Self {
            name,
            spec,
            matcher,
        })
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn classify(&self, output: CommandOutput, success: bool) -> CheckOutcome {
        let Classification {
            findings,
            severity,
            issues,
        } = self
            .matcher
            .as_ref()
            .map(|matcher| matcher.classify(&output.stdout))
            .unwrap_or(Classification {
                findings: 0,
                severity: Severity::Info,
                issues: Vec::new(),
            });

        let outcome = |status, findings, severity, output: CommandOutput| {
            let mut data = serde_json::to_value(&output).unwrap_or_default();
            if !issues.is_empty()
                && let Some(fields) = data.as_object_mut()
            {
                fields.insert("issues".into(), serde_json::Value::from(issues.clone()));
            }
            CheckOutcome {
                status,
                data,
                findings,
                severity,
            }
        };

        if success {
            return outcome(ResultStatus::Success, findings, severity, output);
        }

        match &self.spec.on_nonzero_exit {
            ExitPolicy::Failed => outcome(ResultStatus::Failed, 0, Severity::Info, output),
            ExitPolicy::Finding { severity: exit_severity } => outcome(
                ResultStatus::Success,
                findings.max(1),
                severity.max(*exit_severity),
                output,
            ),
            ExitPolicy::Ignore => outcome(ResultStatus::Success, findings, severity, output),
        }
    }
}

#[async_trait]
impl Check for CommandCheck {
    async fn run(
        &self,
        target: &ResolvedTarget,
        config: &CheckConfig,
        _timeout: Duration,
    ) -> Result<CheckOutcome, CheckError> {
        tracing::debug!(target: "scan::checks", check = %self.name, "running command check");
        let (output, success) = self.spec.execute(target, config).await?;
        Ok(self.classify(output, success))
    }
}
