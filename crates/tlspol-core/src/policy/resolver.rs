//! Policy resolver
//!
//! Races the DANE and MTA-STS evaluators for one domain, waits for both,
//! and merges the pair under the precedence rule. Each side is clamped to
//! the request deadline; an expired side counts as a temporary failure.

use crate::dns::DnsClient;
use crate::policy::dane::DaneEvaluator;
use crate::policy::mta_sts::{MtaStsEvaluator, StsOutcome};
use crate::policy::{merge, Evaluation, Verdict, REQUEST_TIMEOUT};
use anyhow::Result;
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// Both evaluator results for one domain, with per-side wall time
#[derive(Debug, Clone)]
pub struct DomainProbe {
    pub dane: Evaluation,
    pub dane_time: Duration,
    pub mta_sts: Evaluation,
    pub report: Option<String>,
    pub mta_sts_time: Duration,
}

/// The merged answer the front end serves and the cache stores
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub verdict: Verdict,
    /// TLSRPT fragment, carried only for MTA-STS verdicts
    pub report: Option<String>,
    pub ttl: u32,
}

impl DomainProbe {
    /// Collapse the probe into the final answer
    pub fn into_resolution(self) -> Resolution {
        let merged = merge(self.dane, self.mta_sts);
        let report = match merged.verdict {
            Verdict::MtaSts { .. } => self.report,
            _ => None,
        };
        Resolution {
            verdict: merged.verdict,
            report,
            ttl: merged.ttl,
        }
    }
}

/// Runs the two evaluators in parallel per query
pub struct PolicyResolver {
    dane: DaneEvaluator,
    mta_sts: MtaStsEvaluator,
}

impl PolicyResolver {
    pub fn new(dns: DnsClient) -> Result<Self> {
        Ok(Self {
            dane: DaneEvaluator::new(dns.clone()),
            mta_sts: MtaStsEvaluator::new(dns)?,
        })
    }

    /// Run both evaluators concurrently and report each side
    pub async fn probe(&self, domain: &str) -> DomainProbe {
        let started = Instant::now();

        let (dane, mta_sts) = tokio::join!(
            async {
                let evaluation = match timeout(REQUEST_TIMEOUT, self.dane.evaluate(domain)).await {
                    Ok(evaluation) => evaluation,
                    Err(_) => Evaluation::temp(),
                };
                (evaluation, started.elapsed())
            },
            async {
                let outcome = match timeout(REQUEST_TIMEOUT, self.mta_sts.evaluate(domain)).await {
                    Ok(outcome) => outcome,
                    Err(_) => StsOutcome {
                        evaluation: Evaluation::temp(),
                        report: None,
                    },
                };
                (outcome, started.elapsed())
            },
        );

        let (dane, dane_time) = dane;
        let (sts_outcome, mta_sts_time) = mta_sts;

        DomainProbe {
            dane,
            dane_time,
            mta_sts: sts_outcome.evaluation,
            report: sts_outcome.report,
            mta_sts_time,
        }
    }

    /// Resolve a domain to its merged policy
    pub async fn resolve(&self, domain: &str) -> Resolution {
        self.probe(domain).await.into_resolution()
    }
}
