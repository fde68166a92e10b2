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

use crate::dns::Router;
use hickory_proto::op::{Edns, Header, Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::Record;
use hickory_server::authority::{MessageResponse, MessageResponseBuilder};
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use std::sync::Arc;
use tracing::{error, warn};

/// A hickory [RequestHandler] that hands every standard query to the [Router].
pub struct Handler {
    router: Arc<Router>,
}

impl Handler {
    pub fn new(router: Arc<Router>) -> Self {
        Self { router }
    }

    async fn route<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> ResponseInfo {
        let reply = self.router.handle(&query_message(request)).await;
        send_reply(request, response_handle, reply).await
    }
}

#[async_trait::async_trait]
impl RequestHandler for Handler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> ResponseInfo {
        match request.message_type() {
            MessageType::Query => match request.op_code() {
                OpCode::Query => self.route(request, response_handle).await,
                _ => {
                    warn!("unimplemented op_code: {:?}", request.op_code());
                    send_error(request, response_handle, ResponseCode::NotImp).await
                }
            },
            MessageType::Response => {
                warn!("got a response as a request from id: {}", request.id());
                send_error(request, response_handle, ResponseCode::FormErr).await
            }
        }
    }
}

/// Rebuilds the client's query as a [Message], keeping the case of the question and any EDNS.
fn query_message(request: &Request) -> Message {
    let mut msg = Message::new();
    msg.set_header(*request.header());
    msg.add_queries(request.queries().iter().map(|q| q.original().clone()));
    msg.add_additionals(request.additionals().iter().cloned());
    if let Some(edns) = request.edns() {
        msg.set_edns(edns.clone());
    }
    msg
}

/// Sends the [Router]'s reply, sized for the client's EDNS buffer if it sent one.
async fn send_reply<R: ResponseHandler>(
    request: &Request,
    response_handle: R,
    reply: Message,
) -> ResponseInfo {
    let mut builder = MessageResponseBuilder::from_message_request(request);
    if let Some(edns) = response_edns(request) {
        builder.edns(edns);
    }

    let response = builder.build(
        *reply.header(),
        reply.answers().iter(),
        reply.name_servers().iter(),
        None.iter(),
        reply.additionals().iter(),
    );
    send_response(response, response_handle).await
}

/// Sends an error response back to the client.
async fn send_error<R: ResponseHandler>(
    request: &Request,
    response_handle: R,
    code: ResponseCode,
) -> ResponseInfo {
    let response =
        MessageResponseBuilder::from_message_request(request).error_msg(request.header(), code);

    send_response(response, response_handle).await
}

/// Sends the response to the [ResponseHandler] and handles any errors.
async fn send_response<'a, R: ResponseHandler>(
    response: MessageResponse<
        '_,
        'a,
        impl Iterator<Item = &'a Record> + Send + 'a,
        impl Iterator<Item = &'a Record> + Send + 'a,
        impl Iterator<Item = &'a Record> + Send + 'a,
        impl Iterator<Item = &'a Record> + Send + 'a,
    >,
    mut response_handle: R,
) -> ResponseInfo {
    let result = response_handle.send_response(response).await;

    match result {
        Err(e) => {
            error!("request error: {}", e);
            let mut header = Header::new();
            header.set_response_code(ResponseCode::ServFail);
            header.into()
        }
        Ok(info) => info,
    }
}

/// Creates an appropriate response [Edns], if one was available in the request.
fn response_edns(request: &Request) -> Option<Edns> {
    let req_edns = request.edns()?;
    let mut resp_edns: Edns = Edns::new();
    resp_edns.set_max_payload(req_edns.max_payload().max(512));
    resp_edns.set_version(req_edns.version());
    resp_edns.set_dnssec_ok(req_edns.flags().dnssec_ok);
    Some(resp_edns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{Error, Forwarder, Metrics, Resolver};
    use crate::test_helpers::dns::{a, a_request, n, server_request, socket_addr};
    use crate::test_helpers::helpers::initialize_telemetry;
    use hickory_proto::op::Query;
    use hickory_proto::rr::{Name, RecordType};
    use hickory_proto::serialize::binary::BinEncoder;
    use hickory_proto::xfer::Protocol;
    use prometheus_client::registry::Registry;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tokio::sync::mpsc::Sender;

    #[tokio::test]
    async fn record_found() {
        initialize_telemetry();

        let (h, _) = handler(None);
        let req = a_request(n("Web.docker."), socket_addr("1.1.1.1:80"), Protocol::Udp);
        let resp = exchange(&h, &req).await;

        // Check basic response header info.
        assert_eq!(req.id(), resp.id());
        assert_eq!(MessageType::Response, resp.message_type());
        assert_eq!(OpCode::Query, resp.op_code());
        assert_eq!(ResponseCode::NoError, resp.response_code());

        // Check flags.
        assert!(!resp.authoritative());
        assert!(resp.recursion_available());
        assert!(resp.recursion_desired());
        assert!(!resp.truncated());

        assert_eq!(resp.queries()[0].name().to_utf8(), "Web.docker.");
        let answers = resp.answers();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].name().to_utf8(), "Web.docker.");
        assert_eq!(
            *answers[0].data(),
            *a(n("web."), Ipv4Addr::new(127, 0, 0, 1)).data()
        );
    }

    #[tokio::test]
    async fn not_found() {
        initialize_telemetry();

        let (h, _) = handler(None);
        let req = a_request(n("missing.docker."), socket_addr("1.1.1.1:80"), Protocol::Udp);
        let resp = exchange(&h, &req).await;
        assert_eq!(ResponseCode::NXDomain, resp.response_code());
        assert!(resp.answers().is_empty());
    }

    #[tokio::test]
    async fn malformed_name() {
        initialize_telemetry();

        let (h, metrics) = handler(None);
        let req = a_request(n("docker."), socket_addr("1.1.1.1:80"), Protocol::Udp);
        let resp = exchange(&h, &req).await;
        assert_eq!(ResponseCode::FormErr, resp.response_code());
        assert_eq!(metrics.snapshot().errors, 1);
    }

    #[tokio::test]
    async fn forwards_original_question() {
        initialize_telemetry();

        let forwarder = Arc::new(RecordingForwarder::default());
        let (h, _) = handler(Some(forwarder.clone()));
        let req = a_request(n("Example.COM."), socket_addr("1.1.1.1:80"), Protocol::Udp);
        let resp = exchange(&h, &req).await;
        assert_eq!(ResponseCode::Refused, resp.response_code());

        let received = forwarder.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].id(), req.id());
        assert_eq!(received[0].queries()[0].name().to_utf8(), "Example.COM.");
        assert!(received[0].recursion_desired());
    }

    #[tokio::test]
    async fn unsupported_op_code() {
        initialize_telemetry();

        let (h, metrics) = handler(None);
        let mut msg = Message::new();
        msg.set_id(5)
            .set_op_code(OpCode::Notify)
            .add_query(Query::query(n("web.docker."), RecordType::SOA));
        let req = server_request(&msg, socket_addr("1.1.1.1:80"), Protocol::Udp);
        let resp = exchange(&h, &req).await;
        assert_eq!(ResponseCode::NotImp, resp.response_code());
        assert_eq!(metrics.snapshot().queries, 0);
    }

    fn handler(forwarder: Option<Arc<RecordingForwarder>>) -> (Handler, Arc<Metrics>) {
        let mut registry = Registry::default();
        let metrics = Arc::new(Metrics::new(&mut registry));
        let router = Router::new(
            ".docker",
            Arc::new(FakeResolver()),
            forwarder.map(|f| f as Arc<dyn Forwarder>),
            metrics.clone(),
        )
        .unwrap();
        (Handler::new(Arc::new(router)), metrics)
    }

    async fn exchange(h: &Handler, req: &Request) -> Message {
        let (sender, mut receiver) = mpsc::channel(1);
        let _ = h
            .handle_request(req, FakeResponseHandler::new(512, sender))
            .await;
        receiver.recv().await.unwrap()
    }

    struct FakeResolver();

    #[async_trait::async_trait]
    impl Resolver for FakeResolver {
        async fn resolve(
            &self,
            hostname: &Name,
            _record_type: RecordType,
        ) -> Result<Vec<Record>, Error> {
            if hostname.to_utf8() != "web" {
                return Err(Error::ResponseCode(ResponseCode::NXDomain));
            }
            Ok(vec![a(n("web."), Ipv4Addr::new(127, 0, 0, 1))])
        }
    }

    #[derive(Default)]
    struct RecordingForwarder {
        received: Mutex<Vec<Message>>,
    }

    #[async_trait::async_trait]
    impl Forwarder for RecordingForwarder {
        async fn forward(&self, query: &Message) -> Result<Message, Error> {
            self.received.lock().unwrap().push(query.clone());
            let mut reply = Message::new();
            reply.set_response_code(ResponseCode::Refused);
            Ok(reply)
        }
    }

    #[derive(Clone)]
    pub struct FakeResponseHandler {
        max_size: u16,
        sender: Sender<Message>,
    }

    impl FakeResponseHandler {
        pub fn new(max_size: u16, sender: Sender<Message>) -> Self {
            Self { max_size, sender }
        }
    }

    #[async_trait::async_trait]
    impl ResponseHandler for FakeResponseHandler {
        async fn send_response<'a>(
            &mut self,
            response: MessageResponse<
                '_,
                'a,
                impl Iterator<Item = &'a Record> + Send + 'a,
                impl Iterator<Item = &'a Record> + Send + 'a,
                impl Iterator<Item = &'a Record> + Send + 'a,
                impl Iterator<Item = &'a Record> + Send + 'a,
            >,
        ) -> std::io::Result<ResponseInfo> {
            // Create the encoder.
            let mut buf = Vec::with_capacity(self.max_size as usize);
            let mut encoder = BinEncoder::new(&mut buf);
            encoder.set_max_size(self.max_size);

            // Serialize the response.
            let response_info = response.destructive_emit(&mut encoder)?;

            // Deserialize back into the response message.
            let msg = Message::from_vec(&buf)?;

            // Send the message to the consumer.
            self.sender.send(msg).await.unwrap();

            Ok(response_info)
        }
    }
}
