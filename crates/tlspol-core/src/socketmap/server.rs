//! Socketmap server
//!
//! Accepts stream connections from the MTA, reads netstring-framed
//! requests until EOF and answers each frame in order. Pipelining works
//! because frames are processed sequentially off the scanner.

use crate::cache::{CacheEntry, CacheLookup, PolicyCache};
use crate::domain;
use crate::netstring::{marshal, NetstringScanner};
use crate::policy::resolver::{DomainProbe, PolicyResolver};
use crate::socketmap::SocketmapCommand;
use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, UnixListener};
use tracing::{debug, error, info, warn};

/// Everything a connection handler needs, shared across connections
pub struct ServerContext {
    pub resolver: Arc<PolicyResolver>,
    /// `None` bypasses the cache entirely
    pub cache: Option<PolicyCache>,
    /// Default TLSRPT behavior for plain `QUERY`
    pub tlsrpt: bool,
    /// Reported in JSON replies
    pub version: String,
}

/// Socketmap front-end server
pub struct PolicyServer {
    address: String,
    context: Arc<ServerContext>,
}

impl PolicyServer {
    pub fn new(address: String, context: Arc<ServerContext>) -> Self {
        Self { address, context }
    }

    /// Bind and serve forever
    pub async fn run(&self) -> Result<()> {
        if let Some(path) = self.address.strip_prefix("unix:") {
            // a previous run may have left the socket file behind
            let _ = std::fs::remove_file(path);
            let listener = UnixListener::bind(path)?;
            info!("socketmap server listening on unix:{}", path);
            Self::serve_unix(listener, self.context.clone()).await
        } else {
            let listener = TcpListener::bind(&self.address).await?;
            info!("socketmap server listening on {}", self.address);
            Self::serve_tcp(listener, self.context.clone()).await
        }
    }

    async fn serve_tcp(listener: TcpListener, context: Arc<ServerContext>) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let context = context.clone();
                    tokio::spawn(async move {
                        debug!("socketmap connection from {}", peer);
                        if let Err(e) = handle_connection(stream, context).await {
                            error!("socketmap connection error from {}: {}", peer, e);
                        }
                    });
                }
                Err(e) => error!("socketmap accept error: {}", e),
            }
        }
    }

    async fn serve_unix(listener: UnixListener, context: Arc<ServerContext>) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let context = context.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, context).await {
                            error!("socketmap connection error: {}", e);
                        }
                    });
                }
                Err(e) => error!("socketmap accept error: {}", e),
            }
        }
    }
}

/// Render the reply frame for a directive string as the cache stores it
fn render_reply(result: &str, report: &str, with_tlsrpt: bool) -> Vec<u8> {
    match result {
        "" => marshal(b"NOTFOUND "),
        "TEMP" => marshal(b"TEMP "),
        directive => {
            let mut payload = format!("OK {directive}");
            if with_tlsrpt && !report.is_empty() {
                payload.push(' ');
                payload.push_str(report);
            }
            marshal(payload.as_bytes())
        }
    }
}

#[derive(Serialize)]
struct DanePolicy {
    policy: String,
    ttl: u32,
    time: String,
}

#[derive(Serialize)]
struct MtaStsPolicy {
    policy: String,
    ttl: u32,
    report: String,
    time: String,
}

#[derive(Serialize)]
struct JsonReply {
    version: String,
    domain: String,
    dane: DanePolicy,
    #[serde(rename = "mta-sts")]
    mta_sts: MtaStsPolicy,
}

impl JsonReply {
    fn from_probe(version: &str, domain: &str, probe: &DomainProbe) -> Self {
        Self {
            version: version.to_string(),
            domain: domain.to_string(),
            dane: DanePolicy {
                policy: probe.dane.verdict.directive().to_string(),
                ttl: probe.dane.ttl,
                time: format!("{}ms", probe.dane_time.as_millis()),
            },
            mta_sts: MtaStsPolicy {
                policy: probe.mta_sts.verdict.directive().to_string(),
                ttl: probe.mta_sts.ttl,
                report: probe.report.clone().unwrap_or_default(),
                time: format!("{}ms", probe.mta_sts_time.as_millis()),
            },
        }
    }
}

async fn handle_connection<S>(stream: S, context: Arc<ServerContext>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut scanner = NetstringScanner::new(reader);

    loop {
        let frame = match scanner.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!("malformed request frame: {}", e);
                let _ = writer.write_all(&marshal(b"PERM ")).await;
                return Ok(());
            }
        };

        let request = String::from_utf8_lossy(&frame);
        match SocketmapCommand::parse(&request) {
            SocketmapCommand::Unknown { command } => {
                warn!("unknown command: {:?}", command);
                writer.write_all(&marshal(b"PERM ")).await?;
                return Ok(());
            }
            SocketmapCommand::Empty => {
                writer.write_all(&marshal(b"NOTFOUND ")).await?;
            }
            SocketmapCommand::Json { domain } => {
                let probe = context.resolver.probe(&domain).await;
                let reply = JsonReply::from_probe(&context.version, &domain, &probe);
                match serde_json::to_vec(&reply) {
                    Ok(mut body) => {
                        body.push(b'\n');
                        writer.write_all(&body).await?;
                    }
                    Err(e) => {
                        // no partial reply; drop the connection instead
                        error!("could not encode JSON reply: {}", e);
                        return Ok(());
                    }
                }
            }
            SocketmapCommand::Query { domain } => {
                let reply = answer_query(&context, &domain, context.tlsrpt).await;
                writer.write_all(&reply).await?;
            }
            SocketmapCommand::QueryWithTlsRpt { domain } => {
                let reply = answer_query(&context, &domain, true).await;
                writer.write_all(&reply).await?;
            }
        }
        writer.flush().await?;
    }
}

/// Answer one QUERY frame: validate, try the cache, resolve, store
async fn answer_query(context: &ServerContext, domain: &str, with_tlsrpt: bool) -> Vec<u8> {
    match domain::validate(domain) {
        Err(domain::RejectedDomain::IpLiteral) => {
            debug!("skipping policy for non-domain: {:?}", domain);
            return marshal(b"NOTFOUND ");
        }
        Err(domain::RejectedDomain::ParentForm) => {
            debug!("skipping policy for parent domain: {:?}", domain);
            return marshal(b"NOTFOUND ");
        }
        Err(domain::RejectedDomain::InvalidName) => {
            debug!("skipping policy for invalid domain name: {:?}", domain);
            return marshal(b"NOTFOUND ");
        }
        Ok(()) => {}
    }

    if let Some(cache) = &context.cache {
        match cache.lookup(domain).await {
            Ok(CacheLookup::Hit { entry, remaining }) => {
                log_verdict(domain, &entry.result, &format!("from cache, {remaining}s remaining"));
                return render_reply(&entry.result, &entry.report, with_tlsrpt);
            }
            Ok(CacheLookup::Miss) => {}
            Err(e) => {
                // cache trouble must not take queries down with it
                warn!("cache lookup for {:?} failed: {}", domain, e);
            }
        }
    }

    let resolution = context.resolver.resolve(domain).await;
    log_verdict(
        domain,
        resolution.verdict.directive(),
        &format!("cached for {}s", resolution.ttl),
    );

    let reply = render_reply(
        resolution.verdict.directive(),
        resolution.report.as_deref().unwrap_or_default(),
        with_tlsrpt,
    );

    if let Some(cache) = &context.cache {
        let cache = cache.clone();
        let entry = CacheEntry::from_resolution(domain, &resolution);
        tokio::spawn(async move {
            if let Err(e) = cache.store_entry(&entry).await {
                warn!("could not cache policy for {:?}: {}", entry.domain, e);
            }
        });
    }

    reply
}

fn log_verdict(domain: &str, result: &str, detail: &str) {
    match result {
        "" => info!("No policy found for {:?} ({})", domain, detail),
        "TEMP" => warn!(
            "Evaluating policy for {:?} failed temporarily ({})",
            domain, detail
        ),
        directive => info!("Evaluated policy for {:?}: {} ({})", domain, directive, detail),
    }
}
