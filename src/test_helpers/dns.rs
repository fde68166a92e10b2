// Copyright Istio Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use hickory_proto::op::{Header, Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use hickory_proto::serialize::binary::BinDecodable;
use hickory_proto::xfer::Protocol;
use hickory_server::authority::MessageRequest;
use hickory_server::server::Request;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tracing::debug;

const TTL: u32 = 5;

/// A short-hand helper for constructing a [Name]. The case of each label is kept.
pub fn n<S: AsRef<str>>(name: S) -> Name {
    Name::from_ascii(name).unwrap()
}

/// Creates an A record for the name and IP.
pub fn a(name: Name, addr: Ipv4Addr) -> Record {
    Record::from_rdata(name, TTL, RData::A(A(addr)))
}

/// Creates an AAAA record for the name and IP.
pub fn aaaa(name: Name, addr: Ipv6Addr) -> Record {
    Record::from_rdata(name, TTL, RData::AAAA(AAAA(addr)))
}

/// Constructs a recursive query [Message] for the name, as a stub resolver would send it.
pub fn a_message(name: Name, rr_type: RecordType) -> Message {
    let mut query = Query::query(name, rr_type);
    query.set_query_class(DNSClass::IN);

    let mut msg = Message::new();
    msg.set_id(123)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(query);
    msg
}

/// Converts the given [Message] into a server-side [Request] with dummy values for
/// the client IP and protocol.
pub fn server_request(msg: &Message, client_addr: SocketAddr, protocol: Protocol) -> Request {
    // Serialize the message.
    let wire_bytes = msg.to_vec().unwrap();

    // Deserialize into a server-side request.
    let msg_request = MessageRequest::from_bytes(&wire_bytes).unwrap();

    Request::new(msg_request, client_addr, protocol)
}

/// Creates a A-record [Request] for the given name.
pub fn a_request(name: Name, client_addr: SocketAddr, protocol: Protocol) -> Request {
    server_request(&a_message(name, RecordType::A), client_addr, protocol)
}

/// Helper for parsing a [SocketAddr] string.
pub fn socket_addr<S: AsRef<str>>(socket_addr: S) -> SocketAddr {
    socket_addr.as_ref().parse().unwrap()
}

/// Helper for parsing a [IpAddr] string.
pub fn ip<S: AsRef<str>>(addr: S) -> IpAddr {
    addr.as_ref().parse().unwrap()
}

/// Sends `query` from a fresh socket and waits up to five seconds for the reply.
pub async fn send_query(addr: SocketAddr, query: &Message) -> anyhow::Result<Message> {
    let bind: SocketAddr = if addr.is_ipv4() {
        "127.0.0.1:0".parse()?
    } else {
        "[::1]:0".parse()?
    };
    let socket = UdpSocket::bind(bind).await?;
    socket.send_to(&query.to_vec()?, addr).await?;

    let mut buf = vec![0u8; 4096];
    let (len, _) = tokio::time::timeout(Duration::from_secs(5), socket.recv_from(&mut buf)).await??;
    Ok(Message::from_vec(&buf[..len])?)
}

/// A fake name server on a loopback UDP port. Stops when dropped.
pub struct TestDnsServer {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<Message>>>,
    _shutdown: oneshot::Sender<()>,
}

impl TestDnsServer {
    pub fn address(&self) -> SocketAddr {
        self.addr
    }

    /// Every query the server has received so far, in order.
    pub fn received(&self) -> Vec<Message> {
        self.received.lock().unwrap().clone()
    }
}

/// Runs a fake name server answering from `responses`.
///
/// Known names get the addresses matching the queried type, possibly none. Unknown names get
/// NXDOMAIN.
pub async fn run_dns(responses: HashMap<Name, Vec<IpAddr>>) -> anyhow::Result<TestDnsServer> {
    spawn_server(move |query| Some(answer(&responses, query))).await
}

/// Runs a fake name server that reads queries but never answers.
pub async fn run_unresponsive_dns() -> anyhow::Result<TestDnsServer> {
    spawn_server(|_| None).await
}

async fn spawn_server<F>(respond: F) -> anyhow::Result<TestDnsServer>
where
    F: Fn(&Message) -> Option<Message> + Send + 'static,
{
    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    let addr = socket.local_addr()?;
    let received = Arc::new(Mutex::new(Vec::new()));
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

    let log = received.clone();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 4096];
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                res = socket.recv_from(&mut buf) => {
                    let Ok((len, peer)) = res else { continue };
                    let Ok(query) = Message::from_vec(&buf[..len]) else { continue };
                    log.lock().unwrap().push(query.clone());
                    let Some(reply) = respond(&query) else { continue };
                    if let Ok(bytes) = reply.to_vec() {
                        let _ = socket.send_to(&bytes, peer).await;
                    }
                }
            }
        }
    });

    debug!(%addr, "started test dns server");
    Ok(TestDnsServer {
        addr,
        received,
        _shutdown: shutdown_tx,
    })
}

fn answer(responses: &HashMap<Name, Vec<IpAddr>>, query: &Message) -> Message {
    let mut reply = Message::new();
    let mut header = Header::response_from_request(query.header());
    header.set_recursion_available(true);
    reply.set_header(header);

    let Some(question) = query.queries().first() else {
        reply.set_response_code(ResponseCode::FormErr);
        return reply;
    };
    reply.add_query(question.clone());

    let Some(ips) = responses.get(question.name()) else {
        // Not found.
        reply.set_response_code(ResponseCode::NXDomain);
        return reply;
    };

    let rtype = question.query_type();
    for ip in ips {
        match ip {
            IpAddr::V4(ip) => {
                if rtype == RecordType::A {
                    reply.add_answer(a(question.name().clone(), *ip));
                }
            }
            IpAddr::V6(ip) => {
                if rtype == RecordType::AAAA {
                    reply.add_answer(aaaa(question.name().clone(), *ip));
                }
            }
        }
    }
    reply
}
