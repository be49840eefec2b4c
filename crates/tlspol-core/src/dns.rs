//! DNS client for the trusted validating resolver
//!
//! Queries are sent on the wire with EDNS0 (4096-byte payload, DO=1) so the
//! upstream resolver validates DNSSEC and reports the outcome in the AD
//! header flag. The engine never validates signatures itself; a missing AD
//! bit simply demotes the answer to unauthenticated.

use hickory_proto::error::ProtoError;
use hickory_proto::op::{Edns, Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{Name, RData, RecordType};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing::debug;

/// Per-exchange deadline, shared with the request-scoped timeout
pub const DNS_TIMEOUT: Duration = Duration::from_secs(5);

const EDNS_PAYLOAD_SIZE: u16 = 4096;

/// DNS lookup failure
///
/// Everything except `Status` is a transport-level failure. `Status` is a
/// *DNS error*: the upstream answered, but with an rcode other than NOERROR
/// or NXDOMAIN (NXDOMAIN is a regular empty answer, not an error).
#[derive(Error, Debug)]
pub enum DnsError {
    #[error("query timed out")]
    Timeout,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error("response id mismatch")]
    IdMismatch,

    #[error("upstream returned {0:?}")]
    Status(ResponseCode),
}

/// A parsed answer from the validating resolver
#[derive(Debug)]
pub struct DnsResponse {
    /// Response code; NOERROR or NXDOMAIN
    pub rcode: ResponseCode,
    /// AD flag: the resolver vouches for DNSSEC validation of this answer
    pub authenticated: bool,
    /// Answer records of the queried type
    records: Vec<hickory_proto::rr::Record>,
    /// Minimum TTL over the answer records, 0 when empty
    pub min_ttl: u32,
}

impl DnsResponse {
    fn from_message(message: Message, qtype: RecordType) -> Self {
        let records: Vec<_> = message
            .answers()
            .iter()
            .filter(|r| r.record_type() == qtype)
            .cloned()
            .collect();
        let min_ttl = records.iter().map(|r| r.ttl()).min().unwrap_or(0);

        Self {
            rcode: message.response_code(),
            authenticated: message.authentic_data(),
            records,
            min_ttl,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// MX exchange hostnames, in answer order
    pub fn mx_exchanges(&self) -> Vec<String> {
        self.records
            .iter()
            .filter_map(|r| match r.data() {
                Some(RData::MX(mx)) => Some(mx.exchange().to_ascii()),
                _ => None,
            })
            .collect()
    }

    /// TXT record values, character strings concatenated per record
    pub fn txt_strings(&self) -> Vec<String> {
        self.records
            .iter()
            .filter_map(|r| match r.data() {
                Some(RData::TXT(txt)) => Some(
                    txt.txt_data()
                        .iter()
                        .map(|part| String::from_utf8_lossy(part).into_owned())
                        .collect::<String>(),
                ),
                _ => None,
            })
            .collect()
    }

    /// Whether any TLSA record is present
    pub fn has_tlsa(&self) -> bool {
        self.records
            .iter()
            .any(|r| matches!(r.data(), Some(RData::TLSA(_))))
    }
}

/// Minimal stub-resolver client bound to one upstream address
#[derive(Debug, Clone)]
pub struct DnsClient {
    server: SocketAddr,
    timeout: Duration,
}

impl DnsClient {
    pub fn new(server: SocketAddr) -> Self {
        Self {
            server,
            timeout: DNS_TIMEOUT,
        }
    }

    #[cfg(test)]
    pub fn with_timeout(server: SocketAddr, timeout: Duration) -> Self {
        Self { server, timeout }
    }

    /// Look up `name` with the given record type
    ///
    /// Runs over UDP and retries over TCP when the answer comes back
    /// truncated. The whole exchange is bounded by [`DNS_TIMEOUT`].
    pub async fn query(&self, name: &str, qtype: RecordType) -> Result<DnsResponse, DnsError> {
        let fqdn = if name.ends_with('.') {
            name.to_string()
        } else {
            format!("{name}.")
        };
        let name = Name::from_ascii(&fqdn)?;

        let request = build_query(&name, qtype);
        let wire = request.to_vec()?;

        let message = tokio::time::timeout(self.timeout, self.exchange(&wire, request.id()))
            .await
            .map_err(|_| DnsError::Timeout)??;

        let rcode = message.response_code();
        if rcode != ResponseCode::NoError && rcode != ResponseCode::NXDomain {
            return Err(DnsError::Status(rcode));
        }

        debug!(
            "DNS {} {:?}: rcode={:?} ad={} answers={}",
            fqdn,
            qtype,
            rcode,
            message.authentic_data(),
            message.answer_count()
        );

        Ok(DnsResponse::from_message(message, qtype))
    }

    async fn exchange(&self, wire: &[u8], id: u16) -> Result<Message, DnsError> {
        let message = self.exchange_udp(wire, id).await?;
        if message.truncated() {
            debug!("truncated UDP answer from {}, retrying over TCP", self.server);
            return self.exchange_tcp(wire, id).await;
        }
        Ok(message)
    }

    async fn exchange_udp(&self, wire: &[u8], id: u16) -> Result<Message, DnsError> {
        let bind = if self.server.is_ipv4() {
            SocketAddr::from((std::net::Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((std::net::Ipv6Addr::UNSPECIFIED, 0))
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(self.server).await?;
        socket.send(wire).await?;

        let mut buf = vec![0u8; EDNS_PAYLOAD_SIZE as usize];
        loop {
            let n = socket.recv(&mut buf).await?;
            let message = Message::from_vec(&buf[..n])?;
            // a stray datagram with a foreign id is not our answer
            if message.id() == id {
                return Ok(message);
            }
        }
    }

    async fn exchange_tcp(&self, wire: &[u8], id: u16) -> Result<Message, DnsError> {
        let mut stream = TcpStream::connect(self.server).await?;
        stream.write_all(&(wire.len() as u16).to_be_bytes()).await?;
        stream.write_all(wire).await?;
        stream.flush().await?;

        let mut len_buf = [0u8; 2];
        stream.read_exact(&mut len_buf).await?;
        let len = u16::from_be_bytes(len_buf) as usize;

        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).await?;

        let message = Message::from_vec(&buf)?;
        if message.id() != id {
            return Err(DnsError::IdMismatch);
        }
        Ok(message)
    }
}

fn build_query(name: &Name, qtype: RecordType) -> Message {
    let mut message = Message::new();
    message
        .set_id(rand::random())
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(Query::query(name.clone(), qtype));

    let edns = message.extensions_mut().get_or_insert_with(Edns::new);
    edns.set_max_payload(EDNS_PAYLOAD_SIZE);
    edns.set_version(0);
    edns.set_dnssec_ok(true);

    message
}
