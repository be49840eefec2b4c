//! DANE evaluator (RFC 7672)
//!
//! A domain gets the `dane-only` directive when *every* advertised MX host
//! carries DNSSEC-validated TLSA records on `_25._tcp.<mx>`. One uncovered
//! MX is enough to withhold the verdict: an attacker picking the weakest
//! exchange must not be able to downgrade the session.

use crate::dns::{DnsClient, DnsError};
use crate::policy::{Evaluation, Verdict};
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::RecordType;
use tracing::debug;

/// Evaluates DANE coverage for recipient domains
#[derive(Debug, Clone)]
pub struct DaneEvaluator {
    dns: DnsClient,
}

/// Outcome of one `_25._tcp.<mx>` TLSA lookup
struct TlsaProbe {
    covered: bool,
    ttl: u32,
}

impl DaneEvaluator {
    pub fn new(dns: DnsClient) -> Self {
        Self { dns }
    }

    /// Evaluate a validated, case-folded domain
    pub async fn evaluate(&self, domain: &str) -> Evaluation {
        let mx = match self.dns.query(domain, RecordType::MX).await {
            Ok(response) => response,
            Err(e) => {
                debug!("MX lookup for {:?} failed: {}", domain, e);
                return Evaluation::temp();
            }
        };

        // Positive DANE statements require authenticated MX data; anything
        // less reads as "no signed delegation", not as an outage.
        if !mx.authenticated || mx.rcode == ResponseCode::NXDomain {
            return Evaluation::none(0);
        }

        let hosts = mx.mx_exchanges();
        if hosts.is_empty() {
            return Evaluation::none(0);
        }

        let mut lookups = Vec::with_capacity(hosts.len());
        for host in hosts {
            let dns = self.dns.clone();
            lookups.push(tokio::spawn(
                async move { probe_tlsa(&dns, &host).await },
            ));
        }

        let mut ttls = vec![mx.min_ttl];
        let mut all_covered = true;
        for lookup in lookups {
            match lookup.await {
                Ok(Ok(probe)) => {
                    ttls.push(probe.ttl);
                    all_covered &= probe.covered;
                }
                Ok(Err(e)) => {
                    // partial coverage is indistinguishable from an outage
                    debug!("TLSA lookup for {:?} failed: {}", domain, e);
                    return Evaluation::temp();
                }
                Err(e) => {
                    debug!("TLSA lookup task for {:?} failed: {}", domain, e);
                    return Evaluation::temp();
                }
            }
        }

        let ttl = ttls.into_iter().min().unwrap_or(0);
        if all_covered {
            Evaluation::new(Verdict::Dane, ttl)
        } else {
            Evaluation::none(ttl)
        }
    }
}

async fn probe_tlsa(dns: &DnsClient, mx: &str) -> Result<TlsaProbe, DnsError> {
    let name = format!("_25._tcp.{mx}");
    let response = dns.query(&name, RecordType::TLSA).await?;

    // an empty NOERROR answer is an unsigned hole, not an outage
    if response.is_empty() {
        return Ok(TlsaProbe {
            covered: false,
            ttl: 0,
        });
    }

    if response.authenticated && response.has_tlsa() {
        Ok(TlsaProbe {
            covered: true,
            ttl: response.min_ttl,
        })
    } else {
        Ok(TlsaProbe {
            covered: false,
            ttl: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{self, StubAnswer, StubZone};
    use hickory_proto::rr::rdata::tlsa::{CertUsage, Matching, Selector, TLSA};
    use hickory_proto::rr::rdata::MX;
    use hickory_proto::rr::{Name, RData, Record};

    fn mx_record(domain: &str, pref: u16, target: &str, ttl: u32) -> Record {
        Record::from_rdata(
            Name::from_ascii(domain).unwrap(),
            ttl,
            RData::MX(MX::new(pref, Name::from_ascii(target).unwrap())),
        )
    }

    fn tlsa_record(name: &str, ttl: u32) -> Record {
        Record::from_rdata(
            Name::from_ascii(name).unwrap(),
            ttl,
            RData::TLSA(TLSA::new(
                CertUsage::DomainIssued,
                Selector::Spki,
                Matching::Sha256,
                vec![0xab; 32],
            )),
        )
    }

    async fn evaluate(zone: StubZone, domain: &str) -> Evaluation {
        let addr = testutil::spawn_stub_dns(zone).await;
        DaneEvaluator::new(DnsClient::new(addr)).evaluate(domain).await
    }

    #[tokio::test]
    async fn test_all_mx_covered_yields_dane() {
        let mut zone = StubZone::default();
        zone.insert(
            "dane.example.",
            RecordType::MX,
            StubAnswer::answers(
                true,
                vec![
                    mx_record("dane.example.", 10, "mx1.dane.example.", 3600),
                    mx_record("dane.example.", 20, "mx2.dane.example.", 3600),
                ],
            ),
        );
        zone.insert(
            "_25._tcp.mx1.dane.example.",
            RecordType::TLSA,
            StubAnswer::answers(true, vec![tlsa_record("_25._tcp.mx1.dane.example.", 300)]),
        );
        zone.insert(
            "_25._tcp.mx2.dane.example.",
            RecordType::TLSA,
            StubAnswer::answers(true, vec![tlsa_record("_25._tcp.mx2.dane.example.", 900)]),
        );

        let evaluation = evaluate(zone, "dane.example").await;
        assert_eq!(evaluation.verdict, Verdict::Dane);
        assert_eq!(evaluation.ttl, 300);
    }

    #[tokio::test]
    async fn test_unauthenticated_mx_never_yields_dane() {
        let mut zone = StubZone::default();
        zone.insert(
            "plain.example.",
            RecordType::MX,
            StubAnswer::answers(false, vec![mx_record("plain.example.", 10, "mx.plain.example.", 3600)]),
        );
        zone.insert(
            "_25._tcp.mx.plain.example.",
            RecordType::TLSA,
            StubAnswer::answers(true, vec![tlsa_record("_25._tcp.mx.plain.example.", 300)]),
        );

        let evaluation = evaluate(zone, "plain.example").await;
        assert_eq!(evaluation.verdict, Verdict::None);
    }

    #[tokio::test]
    async fn test_one_uncovered_mx_withholds_dane() {
        let mut zone = StubZone::default();
        zone.insert(
            "half.example.",
            RecordType::MX,
            StubAnswer::answers(
                true,
                vec![
                    mx_record("half.example.", 10, "mx1.half.example.", 3600),
                    mx_record("half.example.", 20, "mx2.half.example.", 3600),
                ],
            ),
        );
        zone.insert(
            "_25._tcp.mx1.half.example.",
            RecordType::TLSA,
            StubAnswer::answers(true, vec![tlsa_record("_25._tcp.mx1.half.example.", 300)]),
        );
        // mx2 has no TLSA entry: the stub answers authenticated empty NOERROR

        let evaluation = evaluate(zone, "half.example").await;
        assert_eq!(evaluation.verdict, Verdict::None);
    }

    #[tokio::test]
    async fn test_unauthenticated_tlsa_does_not_cover() {
        let mut zone = StubZone::default();
        zone.insert(
            "weak.example.",
            RecordType::MX,
            StubAnswer::answers(true, vec![mx_record("weak.example.", 10, "mx.weak.example.", 600)]),
        );
        zone.insert(
            "_25._tcp.mx.weak.example.",
            RecordType::TLSA,
            StubAnswer::answers(false, vec![tlsa_record("_25._tcp.mx.weak.example.", 300)]),
        );

        let evaluation = evaluate(zone, "weak.example").await;
        assert_eq!(evaluation.verdict, Verdict::None);
    }

    #[tokio::test]
    async fn test_mx_servfail_is_temporary() {
        let mut zone = StubZone::default();
        zone.insert(
            "temp.example.",
            RecordType::MX,
            StubAnswer::rcode(ResponseCode::ServFail),
        );

        let evaluation = evaluate(zone, "temp.example").await;
        assert_eq!(evaluation.verdict, Verdict::Temp);
    }

    #[tokio::test]
    async fn test_tlsa_servfail_is_temporary() {
        let mut zone = StubZone::default();
        zone.insert(
            "flaky.example.",
            RecordType::MX,
            StubAnswer::answers(true, vec![mx_record("flaky.example.", 10, "mx.flaky.example.", 600)]),
        );
        zone.insert(
            "_25._tcp.mx.flaky.example.",
            RecordType::TLSA,
            StubAnswer::rcode(ResponseCode::ServFail),
        );

        let evaluation = evaluate(zone, "flaky.example").await;
        assert_eq!(evaluation.verdict, Verdict::Temp);
    }

    #[tokio::test]
    async fn test_no_mx_published() {
        let mut zone = StubZone::default();
        zone.insert(
            "nomx.example.",
            RecordType::MX,
            StubAnswer::rcode(ResponseCode::NXDomain),
        );

        let evaluation = evaluate(zone, "nomx.example").await;
        assert_eq!(evaluation.verdict, Verdict::None);
        assert_eq!(evaluation.ttl, 0);
    }
}
