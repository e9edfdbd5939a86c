use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, redirect::Policy};
use scanward_model::{CheckConfig, HeaderAudit, ResolvedTarget, Severity};

use super::{Check, CheckOutcome, config::HeadersCheckConfig};
use crate::error::CheckError;

/// Response headers every audited site is expected to send.
pub const SECURITY_HEADERS: [&str; 7] = [
    "strict-transport-security",
    "content-security-policy",
    "x-frame-options",
    "x-content-type-options",
    "x-xss-protection",
    "referrer-policy",
    "permissions-policy",
];

/// Severity by number of missing security headers.
pub fn severity_for_missing(missing: usize) -> Severity {
    match missing {
        n if n >= 5 => Severity::High,
        n if n >= 3 => Severity::Medium,
        n if n > 0 => Severity::Low,
        _ => Severity::Info,
    }
}

/// Audits HTTP response headers of the target URL.
#[derive(Clone, Debug)]
pub struct HttpHeadersCheck {
    config: HeadersCheckConfig,
}

impl HttpHeadersCheck {
    pub fn new(config: HeadersCheckConfig) -> Self {
        Self { config }
    }

    fn client(&self, timeout: Duration) -> Result<Client, CheckError> {
        Ok(Client::builder()
            .user_agent(self.config.user_agent.clone())
            .danger_accept_invalid_certs(self.config.accept_invalid_certs)
            .redirect(Policy::limited(self.config.max_redirects))
            .timeout(timeout)
            .build()?)
    }
}

/// Split a response's headers into present security headers and missing ones.
pub fn audit_headers(url: &str, status_code: u16, headers: &reqwest::header::HeaderMap) -> HeaderAudit {
    let mut present = BTreeMap::new();
    let mut missing = Vec::new();
    for name in SECURITY_HEADERS {
        match headers.get(name) {
            Some(value) => {
                present.insert(
                    name.to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                );
            }
            None => missing.push(name.to_string()),
        }
    }
    HeaderAudit {
        url: url.to_string(),
        status_code,
        present,
        missing,
    }
}

#[async_trait]
impl Check for HttpHeadersCheck {
    async fn run(
        &self,
        target: &ResolvedTarget,
        _config: &CheckConfig,
        timeout: Duration,
    ) -> Result<CheckOutcome, CheckError> {
        let response = self.client(timeout)?.get(&target.url).send().await?;
        let final_url = response.url().to_string();
        let audit = audit_headers(&final_url, response.status().as_u16(), response.headers());

        let findings = u32::try_from(audit.missing.len()).unwrap_or(u32::MAX);
        let severity = severity_for_missing(audit.missing.len());
        tracing::debug!(
            target: "scan::checks",
            url = %final_url,
            missing = findings,
            "header audit complete"
        );

        Ok(CheckOutcome::success(
            serde_json::to_value(&audit).unwrap_or_default(),
            findings,
            severity,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    #[test]
    fn severity_thresholds() {
        assert_eq!(severity_for_missing(7), Severity::High);
        assert_eq!(severity_for_missing(5), Severity::High);
        assert_eq!(severity_for_missing(4), Severity::Medium);
        assert_eq!(severity_for_missing(3), Severity::Medium);
        assert_eq!(severity_for_missing(1), Severity::Low);
        assert_eq!(severity_for_missing(0), Severity::Info);
    }

    #[test]
    fn audit_splits_present_and_missing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Strict-Transport-Security",
            HeaderValue::from_static("max-age=63072000"),
        );
        headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));

        let audit = audit_headers("https://example.com/", 200, &headers);
        assert_eq!(audit.present.len(), 2);
        assert_eq!(
            audit.present.get("x-frame-options").map(String::as_str),
            Some("DENY")
        );
        assert_eq!(audit.missing.len(), 5);
        assert!(audit.missing.contains(&"content-security-policy".to_string()));
    }
}
