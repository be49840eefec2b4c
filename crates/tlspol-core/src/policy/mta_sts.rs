//! MTA-STS evaluator (RFC 8461)
//!
//! Discovery is two-step: the `_mta-sts.<domain>` TXT record advertises
//! that a policy exists, the policy itself is published over HTTPS at
//! `https://mta-sts.<domain>/.well-known/mta-sts.txt`. Only `mode: enforce`
//! policies turn into a directive. The TLSRPT record (RFC 8460) is picked
//! up alongside so reports can reach the domain owner.

use crate::dns::DnsClient;
use crate::policy::{Evaluation, Verdict, REQUEST_TIMEOUT};
use anyhow::Result;
use hickory_proto::rr::RecordType;
use tracing::debug;

/// Policy application mode from the policy file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StsMode {
    Enforce,
    Testing,
    None,
    /// No (or no recognizable) mode line
    Absent,
}

/// Parsed `mta-sts.txt` policy file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StsPolicy {
    pub mode: StsMode,
    /// MX patterns in file order, deduplicated, `*.` collapsed to `.tail`
    pub mxs: Vec<String>,
    /// Seconds the policy may be cached, clamped to u32
    pub max_age: u32,
}

impl StsPolicy {
    /// Parse the line-oriented `key: value` policy body
    ///
    /// CRLF line endings are tolerated and unknown lines are ignored.
    pub fn parse(body: &str) -> Self {
        let mut mode = StsMode::Absent;
        let mut mxs: Vec<String> = Vec::new();
        let mut max_age: u32 = 0;

        for line in body.lines() {
            let line = line.trim_end_matches('\r');
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();

            match key.trim() {
                "mode" => {
                    mode = match value {
                        "enforce" => StsMode::Enforce,
                        "testing" => StsMode::Testing,
                        "none" => StsMode::None,
                        _ => StsMode::Absent,
                    };
                }
                "max_age" => {
                    if let Ok(age) = value.parse::<u64>() {
                        max_age = age.min(u32::MAX as u64) as u32;
                    }
                }
                "mx" => {
                    // `*.example.com` becomes the parent-match form
                    // `.example.com` the MTA understands
                    let mx = if value.starts_with("*.") {
                        &value[1..]
                    } else {
                        value
                    };
                    if !mx.is_empty() && !mxs.iter().any(|m| m == mx) {
                        mxs.push(mx.to_string());
                    }
                }
                _ => {}
            }
        }

        Self { mode, mxs, max_age }
    }

    /// The socketmap directive, only available in enforce mode
    pub fn directive(&self) -> Option<String> {
        if self.mode != StsMode::Enforce {
            return None;
        }
        Some(format!(
            "secure match={} servername=hostname",
            self.mxs.join(":")
        ))
    }
}

/// What the MTA-STS side contributes to a query
#[derive(Debug, Clone)]
pub struct StsOutcome {
    pub evaluation: Evaluation,
    /// First `v=TLSRPTv1` TXT record of the domain, if any
    pub report: Option<String>,
}

impl StsOutcome {
    fn bare(evaluation: Evaluation) -> Self {
        Self {
            evaluation,
            report: None,
        }
    }
}

/// Evaluates MTA-STS policies for recipient domains
#[derive(Debug, Clone)]
pub struct MtaStsEvaluator {
    dns: DnsClient,
    http: reqwest::Client,
}

impl MtaStsEvaluator {
    pub fn new(dns: DnsClient) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { dns, http })
    }

    /// Evaluate a validated, case-folded domain
    pub async fn evaluate(&self, domain: &str) -> StsOutcome {
        let sts_txt = match self
            .dns
            .query(&format!("_mta-sts.{domain}"), RecordType::TXT)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                debug!("MTA-STS TXT lookup for {:?} failed: {}", domain, e);
                return StsOutcome::bare(Evaluation::temp());
            }
        };

        let advertised = sts_txt
            .txt_strings()
            .iter()
            .any(|txt| txt.starts_with("v=STSv1"));
        if !advertised {
            return StsOutcome::bare(Evaluation::none(0));
        }

        let report = self.lookup_tlsrpt(domain).await;

        let body = match self.fetch_policy(domain).await {
            Ok(body) => body,
            Err(e) => {
                debug!("MTA-STS policy fetch for {:?} failed: {}", domain, e);
                return StsOutcome {
                    evaluation: Evaluation::temp(),
                    report,
                };
            }
        };

        let policy = StsPolicy::parse(&body);
        let evaluation = match policy.directive() {
            Some(directive) => Evaluation::new(Verdict::MtaSts { directive }, policy.max_age),
            None => Evaluation::none(policy.max_age),
        };

        StsOutcome { evaluation, report }
    }

    /// `_smtp._tls.<domain>` TXT; failures only cost the report fragment
    async fn lookup_tlsrpt(&self, domain: &str) -> Option<String> {
        let response = self
            .dns
            .query(&format!("_smtp._tls.{domain}"), RecordType::TXT)
            .await
            .ok()?;
        response
            .txt_strings()
            .into_iter()
            .find(|txt| txt.starts_with("v=TLSRPTv1"))
    }

    /// HTTPS GET of the well-known policy file; anything but 200 fails
    async fn fetch_policy(&self, domain: &str) -> Result<String> {
        let url = format!("https://mta-sts.{domain}/.well-known/mta-sts.txt");
        let response = self.http.get(&url).send().await?;
        if response.status() != reqwest::StatusCode::OK {
            anyhow::bail!("unexpected HTTP status {}", response.status());
        }
        Ok(response.text().await?)
    }
}
