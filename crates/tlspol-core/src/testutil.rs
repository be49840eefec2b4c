//! Scripted DNS stub for tests
//!
//! Binds a UDP socket on the loopback and answers queries from a fixed
//! (name, type) table, including the AD flag, so evaluator behavior can be
//! exercised without a real validating resolver.

use hickory_proto::op::{Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::{Record, RecordType};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

pub(crate) struct StubAnswer {
    pub rcode: ResponseCode,
    pub ad: bool,
    pub records: Vec<Record>,
}

impl StubAnswer {
    pub fn answers(ad: bool, records: Vec<Record>) -> Self {
        Self {
            rcode: ResponseCode::NoError,
            ad,
            records,
        }
    }

    pub fn rcode(rcode: ResponseCode) -> Self {
        Self {
            rcode,
            ad: false,
            records: Vec::new(),
        }
    }
}

/// Answer table; unknown names get an authenticated empty NOERROR
#[derive(Default)]
pub(crate) struct StubZone {
    entries: HashMap<(String, RecordType), StubAnswer>,
}

impl StubZone {
    pub fn insert(&mut self, name: &str, qtype: RecordType, answer: StubAnswer) {
        self.entries.insert((name.to_lowercase(), qtype), answer);
    }
}

/// Spawn the stub and return the address to point a [`DnsClient`] at
///
/// [`DnsClient`]: crate::dns::DnsClient
pub(crate) async fn spawn_stub_dns(zone: StubZone) -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();

    tokio::spawn(async move {
        let mut buf = vec![0u8; 4096];
        loop {
            let Ok((n, peer)) = socket.recv_from(&mut buf).await else {
                break;
            };
            let Ok(request) = Message::from_vec(&buf[..n]) else {
                continue;
            };
            let Some(query) = request.queries().first().cloned() else {
                continue;
            };

            let key = (query.name().to_ascii().to_lowercase(), query.query_type());

            let mut response = Message::new();
            response
                .set_id(request.id())
                .set_message_type(MessageType::Response)
                .set_op_code(OpCode::Query)
                .set_recursion_desired(request.recursion_desired())
                .set_recursion_available(true)
                .add_query(query);

            match zone.entries.get(&key) {
                Some(answer) => {
                    response.set_response_code(answer.rcode);
                    response.set_authentic_data(answer.ad);
                    response.add_answers(answer.records.iter().cloned());
                }
                None => {
                    response.set_response_code(ResponseCode::NoError);
                    response.set_authentic_data(true);
                }
            }

            let Ok(wire) = response.to_vec() else {
                continue;
            };
            let _ = socket.send_to(&wire, peer).await;
        }
    });

    addr
}
