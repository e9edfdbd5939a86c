use scanward_model::{CheckType, Severity};
use serde::{Deserialize, Serialize};

use super::command::{CommandSpec, ExitPolicy, FindingsRule, Indicator, SeverityTier};

/// Tool invocations and classification rules for the built-in checks.
///
/// Every field has a default that matches the stock tool set (`ping`,
/// `nmap`, `openssl`, `dig`, `gobuster`), so deployments only override the
/// pieces they need.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BuiltinChecksConfig {
    pub ping: CommandSpec,
    pub portscan: CommandSpec,
    pub ssl: CommandSpec,
    pub dns: DnsCheckConfig,
    pub bruteforce: CommandSpec,
    pub headers: HeadersCheckConfig,
}

impl BuiltinChecksConfig {
    /// Checks that are a single tool invocation.
    pub fn command_specs(&self) -> [(&'static str, &CommandSpec); 4] {
        [
            (CheckType::PING, &self.ping),
            (CheckType::PORTSCAN, &self.portscan),
            (CheckType::SSL, &self.ssl),
            (CheckType::BRUTEFORCE, &self.bruteforce),
        ]
    }
}

fn args(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|arg| (*arg).to_string()).collect()
}

impl Default for BuiltinChecksConfig {
    fn default() -> Self {
        Self {
            ping: CommandSpec {
                program: "ping".into(),
                args: args(&["-c", "4", "{host}"]),
                stdin: None,
                on_nonzero_exit: ExitPolicy::Finding {
                    severity: Severity::High,
                },
                findings: None,
            },
            portscan: CommandSpec {
                program: "nmap".into(),
                args: args(&["-p-", "--open", "-T4", "-oG", "-", "{host}"]),
                stdin: None,
                on_nonzero_exit: ExitPolicy::Failed,
                findings: Some(FindingsRule {
                    pattern: Some(r"\d+/open/".into()),
                    tiers: vec![
                        SeverityTier::new(21, Severity::High),
                        SeverityTier::new(11, Severity::Medium),
                        SeverityTier::new(1, Severity::Low),
                    ],
                    otherwise: Severity::Info,
                    indicators: Vec::new(),
                }),
            },
            ssl: CommandSpec {
                program: "openssl".into(),
                args: args(&[
                    "s_client",
                    "-connect",
                    "{host}:443",
                    "-servername",
                    "{host}",
                    "-showcerts",
                ]),
                stdin: Some("Q\n".into()),
                on_nonzero_exit: ExitPolicy::Finding {
                    severity: Severity::High,
                },
                findings: Some(FindingsRule {
                    pattern: None,
                    tiers: Vec::new(),
                    otherwise: Severity::Info,
                    indicators: vec![
                        Indicator::new(
                            r"(?i)self[- ]signed",
                            Severity::Medium,
                            "self-signed certificate",
                        ),
                        Indicator::new(
                            r"(?i)verify error",
                            Severity::High,
                            "certificate verification error",
                        ),
                    ],
                }),
            },
            dns: DnsCheckConfig::default(),
            bruteforce: CommandSpec {
                program: "gobuster".into(),
                args: args(&[
                    "dir",
                    "-u",
                    "{url}",
                    "-w",
                    "{wordlist}",
                    "-t",
                    "10",
                    "-q",
                    "--no-error",
                ]),
                stdin: None,
                on_nonzero_exit: ExitPolicy::Failed,
                findings: Some(FindingsRule {
                    pattern: Some(r"\(Status: \d{3}\)".into()),
                    tiers: vec![
                        SeverityTier::new(21, Severity::Medium),
                        SeverityTier::new(11, Severity::Low),
                    ],
                    otherwise: Severity::Info,
                    indicators: Vec::new(),
                }),
            },
            headers: HeadersCheckConfig::default(),
        }
    }
}

/// Record lookup plus a zone transfer attempt against the target itself.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsCheckConfig {
    pub records: CommandSpec,
    pub zone_transfer: ZoneTransferConfig,
}

impl Default for DnsCheckConfig {
    fn default() -> Self {
        Self {
            records: CommandSpec {
                program: "dig".into(),
                args: args(&["+noall", "+answer", "{host}", "ANY"]),
                stdin: None,
                on_nonzero_exit: ExitPolicy::Failed,
                findings: Some(FindingsRule {
                    pattern: None,
                    tiers: Vec::new(),
                    otherwise: Severity::Info,
                    indicators: Vec::new(),
                }),
            },
            zone_transfer: ZoneTransferConfig::default(),
        }
    }
}

/// An AXFR that exits cleanly without a refusal marker in its output counts
/// as an open zone transfer.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneTransferConfig {
    pub command: CommandSpec,
    /// Regular expression marking a refused or failed transfer.
    pub refused: String,
    pub severity: Severity,
}

impl Default for ZoneTransferConfig {
    fn default() -> Self {
        Self {
            command: CommandSpec {
                program: "dig".into(),
                args: args(&["axfr", "@{host}", "{host}"]),
                stdin: None,
                on_nonzero_exit: ExitPolicy::Ignore,
                findings: None,
            },
            refused: r"(?i)transfer failed|communications error|connection refused|no servers could be reached".into(),
            severity: Severity::High,
        }
    }
}

/// Settings for the HTTP security header audit.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadersCheckConfig {
    pub user_agent: String,
    /// Accept invalid TLS certificates; certificate problems are the ssl check's concern.
    pub accept_invalid_certs: bool,
    pub max_redirects: usize,
}

impl Default for HeadersCheckConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("scanward/", env!("CARGO_PKG_VERSION")).into(),
            accept_invalid_certs: true,
            max_redirects: 5,
        }
    }
}

/// Wordlist used by the bruteforce check when the job does not supply one.
pub const DEFAULT_WORDLIST: &str = "/usr/share/wordlists/dirb/common.txt";

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(spec: &CommandSpec, stdout: &str) -> (u32, Severity) {
        let rule = spec.findings.as_ref().unwrap().compile().unwrap();
        let found = rule.classify(stdout);
        (found.findings, found.severity)
    }

    #[test]
    fn stock_ssl_rule_grades_certificate_problems() {
        let checks = BuiltinChecksConfig::default();
        assert_eq!(
            classify(
                &checks.ssl,
                "depth=0 CN = localhost\nverify error:num=18:self-signed certificate\n"
            ),
            (2, Severity::Medium)
        );
        assert_eq!(
            classify(&checks.ssl, "verify error:num=10:certificate has expired\n"),
            (1, Severity::High)
        );
        assert_eq!(
            classify(&checks.ssl, "Verify return code: 0 (ok)\n"),
            (0, Severity::Info)
        );
    }

    #[test]
    fn stock_counting_rules() {
        let checks = BuiltinChecksConfig::default();
        let grepable = "Host: 192.0.2.1 ()\tPorts: 22/open/tcp//ssh///, 443/open/tcp//https///\n";
        assert_eq!(classify(&checks.portscan, grepable), (2, Severity::Low));

        let gobuster = "/admin                (Status: 301) [Size: 0]\n".repeat(12);
        assert_eq!(classify(&checks.bruteforce, &gobuster), (12, Severity::Low));
        assert_eq!(classify(&checks.bruteforce, "(Status: pending)"), (0, Severity::Info));
    }
}
