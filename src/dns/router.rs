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

use std::sync::Arc;
use std::time::Instant;

use hickory_proto::op::{Header, Message, Query, ResponseCode};
use hickory_proto::rr::Name;
use tracing::{debug, warn};

use crate::config::Config;
use crate::dns::metrics::{
    DnsError, DnsRequest, Metrics, Snapshot, Upstream, UpstreamDuration, UpstreamFailure,
    UpstreamRequest,
};
use crate::dns::name_util::{Stripped, as_domain, strip_domain};
use crate::dns::{Error, Forwarder, NameServiceResolver, Resolver, UpstreamForwarder};
use crate::metrics::{DeferRecorder, IncrementRecorder, Recorder};

/// Decides where each query goes and builds the reply.
///
/// Names under the strip domain are looked up in the name service with the domain removed.
/// Everything else goes to the fallback resolver if there is one, or gets NXDOMAIN.
pub struct Router {
    domain: Name,
    resolver: Arc<dyn Resolver>,
    fallback: Option<Arc<dyn Forwarder>>,
    metrics: Arc<Metrics>,
}

impl Router {
    pub fn new(
        strip_suffix: &str,
        resolver: Arc<dyn Resolver>,
        fallback: Option<Arc<dyn Forwarder>>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, Error> {
        Ok(Self {
            domain: as_domain(strip_suffix)?,
            resolver,
            fallback,
            metrics,
        })
    }

    /// Creates a router talking to the upstreams named in `cfg`.
    pub fn from_config(cfg: &Config, metrics: Arc<Metrics>) -> Result<Self, Error> {
        let resolver = Arc::new(NameServiceResolver::new(cfg.docker_dns, cfg.timeout));
        let fallback = cfg.enable_upstream.then(|| {
            Arc::new(UpstreamForwarder::new(cfg.upstream_dns, cfg.timeout)) as Arc<dyn Forwarder>
        });
        Self::new(&cfg.strip_suffix, resolver, fallback, metrics)
    }

    /// The lowercase, fully qualified domain that is stripped from names.
    pub fn domain(&self) -> &Name {
        &self.domain
    }

    /// Current totals of handled and failed queries.
    pub fn snapshot(&self) -> Snapshot {
        self.metrics.snapshot()
    }

    /// Produces the reply for `query`. Never fails: problems are reported through the response
    /// code of the reply.
    ///
    /// Only the first question is considered.
    pub async fn handle(&self, query: &Message) -> Message {
        self.metrics.increment(&DnsRequest);

        let mut reply = reply_to(query);
        let Some(question) = query.queries().first() else {
            warn!(id = query.id(), "query has no question");
            return self.malformed(reply);
        };

        match strip_domain(question.name(), &self.domain) {
            Stripped::Empty => {
                warn!(name = %question.name(), "no hostname left after removing {}", self.domain);
                self.malformed(reply)
            }
            Stripped::Host(host) => {
                self.resolve(question, &host, &mut reply).await;
                reply
            }
            Stripped::NoMatch => match &self.fallback {
                Some(fallback) => {
                    self.forward(fallback.as_ref(), query, &mut reply).await;
                    reply
                }
                None => {
                    debug!(
                        name = %question.name(),
                        "outside {} and fallback is disabled",
                        self.domain
                    );
                    reply.set_response_code(ResponseCode::NXDomain);
                    reply
                }
            },
        }
    }

    fn malformed(&self, mut reply: Message) -> Message {
        self.metrics.increment(&DnsError);
        reply.set_response_code(ResponseCode::FormErr);
        reply
    }

    async fn resolve(&self, question: &Query, host: &Name, reply: &mut Message) {
        let record_type = question.query_type();
        debug!(name = %question.name(), %host, %record_type, "resolving with name service");

        self.metrics.increment(&UpstreamRequest(Upstream::Namespace));
        let start = Instant::now();
        let _duration = self.metrics.defer_record(|metrics| {
            metrics.record(&UpstreamDuration(Upstream::Namespace), start.elapsed());
        });

        match self.resolver.resolve(host, record_type).await {
            Ok(records) => {
                // Answer for the name the client asked about, exactly as it was written.
                let owner = question.name().clone();
                reply.add_answers(records.into_iter().map(|mut record| {
                    record.set_name(owner.clone());
                    record
                }));
            }
            Err(e) => {
                if e.is_transport() {
                    self.metrics.increment(&UpstreamFailure(Upstream::Namespace));
                    self.metrics.increment(&DnsError);
                }
                debug!(%host, %record_type, "not resolved: {e}");
                reply.set_response_code(ResponseCode::NXDomain);
            }
        }
    }

    async fn forward(&self, fallback: &dyn Forwarder, query: &Message, reply: &mut Message) {
        self.metrics.increment(&UpstreamRequest(Upstream::Fallback));
        let start = Instant::now();
        let _duration = self.metrics.defer_record(|metrics| {
            metrics.record(&UpstreamDuration(Upstream::Fallback), start.elapsed());
        });

        match fallback.forward(query).await {
            Ok(mut upstream) => {
                reply.set_response_code(upstream.response_code());
                reply.add_answers(upstream.take_answers());
                reply.add_name_servers(upstream.take_name_servers());
                reply.add_additionals(upstream.take_additionals());
            }
            Err(e) => {
                self.metrics.increment(&UpstreamFailure(Upstream::Fallback));
                self.metrics.increment(&DnsError);
                debug!("fallback failed: {e}");
                reply.set_response_code(ResponseCode::ServFail);
            }
        }
    }
}

/// Starts a non-authoritative reply with the id, flags and first question of `query`.
fn reply_to(query: &Message) -> Message {
    let mut header = Header::response_from_request(query.header());
    header.set_authoritative(false);
    header.set_recursion_available(true);

    let mut reply = Message::new();
    reply.set_header(header);
    if let Some(question) = query.queries().first() {
        reply.add_query(question.clone());
    }
    reply
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::dns::{a, a_message, aaaa, n, socket_addr};
    use crate::test_helpers::helpers::initialize_telemetry;
    use hickory_proto::op::{MessageType, OpCode};
    use hickory_proto::rr::{Record, RecordType};
    use prometheus_client::registry::Registry;
    use std::collections::HashMap;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn resolves_stripped_name_with_original_case() {
        initialize_telemetry();
        let t = TestRouter::new(".docker", Some(FakeForwarder::answering(upstream_reply())));

        let query = a_message(n("Web.docker."), RecordType::A);
        let reply = t.router.handle(&query).await;

        assert_eq!(reply.id(), query.id());
        assert_eq!(reply.message_type(), MessageType::Response);
        assert_eq!(reply.op_code(), OpCode::Query);
        assert_eq!(reply.response_code(), ResponseCode::NoError);
        assert!(!reply.authoritative());
        assert!(reply.recursion_available());
        assert!(reply.recursion_desired());
        assert_eq!(reply.queries(), query.queries());

        let answers = reply.answers();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].name().to_utf8(), "Web.docker.");
        assert_eq!(answers[0].record_type(), RecordType::A);
        assert_eq!(
            answers[0].data().ip_addr(),
            Some(Ipv4Addr::new(172, 18, 0, 2).into())
        );

        assert_eq!(t.resolver.calls(), vec![("web".to_string(), RecordType::A)]);
        assert!(t.forwarder.as_ref().unwrap().calls().is_empty());
        assert_eq!(
            t.router.snapshot(),
            Snapshot {
                queries: 1,
                errors: 0
            }
        );
    }

    #[tokio::test]
    async fn every_answer_is_renamed() {
        initialize_telemetry();
        let t = TestRouter::new("docker", None);

        let reply = t
            .router
            .handle(&a_message(n("API.Docker."), RecordType::A))
            .await;
        assert_eq!(reply.response_code(), ResponseCode::NoError);
        let names: Vec<String> = reply.answers().iter().map(|r| r.name().to_utf8()).collect();
        assert_eq!(names, vec!["API.Docker.", "API.Docker."]);
        assert_eq!(t.resolver.calls(), vec![("api".to_string(), RecordType::A)]);
    }

    #[tokio::test]
    async fn record_type_reaches_name_service() {
        initialize_telemetry();
        let t = TestRouter::new(".docker", None);

        let reply = t
            .router
            .handle(&a_message(n("web.docker."), RecordType::AAAA))
            .await;
        assert_eq!(reply.response_code(), ResponseCode::NoError);
        assert_eq!(reply.answers().len(), 1);
        assert_eq!(reply.answers()[0].record_type(), RecordType::AAAA);
        assert_eq!(
            t.resolver.calls(),
            vec![("web".to_string(), RecordType::AAAA)]
        );
    }

    #[tokio::test]
    async fn missing_container_is_nxdomain_without_fallback() {
        initialize_telemetry();
        let t = TestRouter::new(".docker", Some(FakeForwarder::answering(upstream_reply())));

        let reply = t
            .router
            .handle(&a_message(n("missing.docker."), RecordType::A))
            .await;
        assert_eq!(reply.response_code(), ResponseCode::NXDomain);
        assert!(reply.answers().is_empty());

        // Names in the domain are never relayed.
        assert!(t.forwarder.as_ref().unwrap().calls().is_empty());
        assert_eq!(t.router.snapshot().errors, 0);
    }

    #[tokio::test]
    async fn no_records_is_nxdomain() {
        initialize_telemetry();
        let t = TestRouter::new(".docker", None);

        let reply = t
            .router
            .handle(&a_message(n("web.docker."), RecordType::MX))
            .await;
        assert_eq!(reply.response_code(), ResponseCode::NXDomain);
        assert!(reply.answers().is_empty());
        assert_eq!(t.router.snapshot().errors, 0);
    }

    #[tokio::test]
    async fn unreachable_name_service_counts_error() {
        initialize_telemetry();
        let t = TestRouter::with_resolver(".docker", FakeResolver::unreachable(), None);

        let reply = t
            .router
            .handle(&a_message(n("web.docker."), RecordType::A))
            .await;
        assert_eq!(reply.response_code(), ResponseCode::NXDomain);
        assert_eq!(
            t.router.snapshot(),
            Snapshot {
                queries: 1,
                errors: 1
            }
        );
    }

    #[tokio::test]
    async fn outside_domain_without_fallback_is_nxdomain() {
        initialize_telemetry();
        let t = TestRouter::new(".docker", None);

        let reply = t
            .router
            .handle(&a_message(n("example.com."), RecordType::A))
            .await;
        assert_eq!(reply.response_code(), ResponseCode::NXDomain);
        assert!(reply.answers().is_empty());
        assert!(t.resolver.calls().is_empty());
        assert_eq!(t.router.snapshot().errors, 0);
    }

    #[tokio::test]
    async fn label_boundary_is_respected() {
        initialize_telemetry();
        let t = TestRouter::new(".docker", None);

        let reply = t
            .router
            .handle(&a_message(n("web.mydocker."), RecordType::A))
            .await;
        assert_eq!(reply.response_code(), ResponseCode::NXDomain);
        assert!(t.resolver.calls().is_empty());
    }

    #[tokio::test]
    async fn outside_domain_is_relayed_verbatim() {
        initialize_telemetry();
        let t = TestRouter::new(".docker", Some(FakeForwarder::answering(upstream_reply())));

        let query = a_message(n("Example.com."), RecordType::A);
        let reply = t.router.handle(&query).await;

        let forwarder = t.forwarder.as_ref().unwrap();
        assert_eq!(forwarder.calls(), vec![query.to_vec().unwrap()]);
        assert!(t.resolver.calls().is_empty());

        // The upstream reply is copied into ours.
        assert_eq!(reply.id(), query.id());
        assert_eq!(reply.response_code(), ResponseCode::NoError);
        assert_eq!(reply.answers(), upstream_reply().answers());
        assert_eq!(reply.name_servers(), upstream_reply().name_servers());
        assert_eq!(reply.additionals(), upstream_reply().additionals());
        assert_eq!(t.router.snapshot().errors, 0);
    }

    #[tokio::test]
    async fn fallback_response_code_is_kept() {
        initialize_telemetry();
        let mut refused = Message::new();
        refused.set_response_code(ResponseCode::Refused);
        let t = TestRouter::new(".docker", Some(FakeForwarder::answering(refused)));

        let reply = t
            .router
            .handle(&a_message(n("example.com."), RecordType::A))
            .await;
        assert_eq!(reply.response_code(), ResponseCode::Refused);
        assert!(reply.answers().is_empty());
        assert_eq!(t.router.snapshot().errors, 0);
    }

    #[tokio::test]
    async fn unreachable_fallback_is_servfail() {
        initialize_telemetry();
        let t = TestRouter::new(".docker", Some(FakeForwarder::unreachable()));

        let reply = t
            .router
            .handle(&a_message(n("example.com."), RecordType::A))
            .await;
        assert_eq!(reply.response_code(), ResponseCode::ServFail);
        assert!(reply.answers().is_empty());
        assert_eq!(
            t.router.snapshot(),
            Snapshot {
                queries: 1,
                errors: 1
            }
        );
    }

    #[tokio::test]
    async fn suffix_alone_is_malformed() {
        initialize_telemetry();
        let t = TestRouter::new(".docker", Some(FakeForwarder::answering(upstream_reply())));

        let reply = t
            .router
            .handle(&a_message(n("docker."), RecordType::A))
            .await;
        assert_eq!(reply.response_code(), ResponseCode::FormErr);
        assert!(reply.answers().is_empty());
        assert!(t.resolver.calls().is_empty());
        assert!(t.forwarder.as_ref().unwrap().calls().is_empty());
        assert_eq!(
            t.router.snapshot(),
            Snapshot {
                queries: 1,
                errors: 1
            }
        );
    }

    #[tokio::test]
    async fn no_question_is_malformed() {
        initialize_telemetry();
        let t = TestRouter::new(".docker", Some(FakeForwarder::answering(upstream_reply())));

        let mut query = Message::new();
        query.set_id(99).set_recursion_desired(true);
        let reply = t.router.handle(&query).await;

        assert_eq!(reply.id(), 99);
        assert_eq!(reply.message_type(), MessageType::Response);
        assert_eq!(reply.response_code(), ResponseCode::FormErr);
        assert!(reply.queries().is_empty());
        assert!(t.resolver.calls().is_empty());
        assert!(t.forwarder.as_ref().unwrap().calls().is_empty());
        assert_eq!(
            t.router.snapshot(),
            Snapshot {
                queries: 1,
                errors: 1
            }
        );
    }

    #[tokio::test]
    async fn only_first_question_is_routed() {
        initialize_telemetry();
        let t = TestRouter::new(".docker", Some(FakeForwarder::answering(upstream_reply())));

        let mut query = a_message(n("Web.docker."), RecordType::A);
        query.add_query(Query::query(n("example.com."), RecordType::A));
        let reply = t.router.handle(&query).await;

        assert_eq!(reply.response_code(), ResponseCode::NoError);
        assert_eq!(reply.queries(), &query.queries()[..1]);
        let names: Vec<String> = reply.answers().iter().map(|r| r.name().to_utf8()).collect();
        assert_eq!(names, vec!["Web.docker."]);

        assert_eq!(t.resolver.calls(), vec![("web".to_string(), RecordType::A)]);
        assert!(t.forwarder.as_ref().unwrap().calls().is_empty());
        assert_eq!(t.router.snapshot().queries, 1);
    }

    #[tokio::test]
    async fn repeated_queries_get_the_same_reply() {
        initialize_telemetry();
        let t = TestRouter::new(".docker", None);

        let query = a_message(n("web.docker."), RecordType::A);
        let first = t.router.handle(&query).await;
        let second = t.router.handle(&query).await;
        assert_eq!(first.to_vec().unwrap(), second.to_vec().unwrap());
        assert_eq!(t.resolver.calls().len(), 2);
        assert_eq!(
            t.router.snapshot(),
            Snapshot {
                queries: 2,
                errors: 0
            }
        );
    }

    #[test]
    fn invalid_suffix_is_rejected() {
        let mut registry = Registry::default();
        let metrics = Arc::new(Metrics::new(&mut registry));
        let res = Router::new("..", Arc::new(FakeResolver::containers()), None, metrics);
        assert!(matches!(res, Err(Error::InvalidSuffix(_))));
    }

    #[test]
    fn from_config_builds_fallback_only_when_enabled() {
        let mut registry = Registry::default();
        let metrics = Arc::new(Metrics::new(&mut registry));

        let cfg = Config::default();
        let router = Router::from_config(&cfg, metrics.clone()).unwrap();
        assert!(router.fallback.is_none());
        assert_eq!(router.domain().to_utf8(), "docker.");

        let cfg = Config {
            enable_upstream: true,
            strip_suffix: "svc.internal.".to_string(),
            ..Default::default()
        };
        let router = Router::from_config(&cfg, metrics).unwrap();
        assert!(router.fallback.is_some());
        assert_eq!(router.domain().to_utf8(), "svc.internal.");
    }

    fn upstream_reply() -> Message {
        let mut msg = Message::new();
        msg.add_answer(a(n("example.com."), Ipv4Addr::new(93, 184, 215, 14)));
        msg.add_name_server(a(n("ns.example.com."), Ipv4Addr::new(199, 43, 135, 53)));
        msg.add_additional(aaaa(n("ns.example.com."), Ipv6Addr::LOCALHOST));
        msg
    }

    struct TestRouter {
        router: Router,
        resolver: Arc<FakeResolver>,
        forwarder: Option<Arc<FakeForwarder>>,
    }

    impl TestRouter {
        fn new(suffix: &str, forwarder: Option<FakeForwarder>) -> Self {
            Self::with_resolver(suffix, FakeResolver::containers(), forwarder)
        }

        fn with_resolver(
            suffix: &str,
            resolver: FakeResolver,
            forwarder: Option<FakeForwarder>,
        ) -> Self {
            let mut registry = Registry::default();
            let metrics = Arc::new(Metrics::new(&mut registry));
            let resolver = Arc::new(resolver);
            let forwarder = forwarder.map(Arc::new);
            let router = Router::new(
                suffix,
                resolver.clone(),
                forwarder.clone().map(|f| f as Arc<dyn Forwarder>),
                metrics,
            )
            .unwrap();
            Self {
                router,
                resolver,
                forwarder,
            }
        }
    }

    struct FakeResolver {
        records: HashMap<String, Vec<Record>>,
        unreachable: bool,
        calls: Mutex<Vec<(String, RecordType)>>,
    }

    impl FakeResolver {
        fn containers() -> Self {
            // The name service owns its records under the bare hostname.
            let records = HashMap::from([
                (
                    "web".to_string(),
                    vec![
                        a(n("web."), Ipv4Addr::new(172, 18, 0, 2)),
                        aaaa(n("web."), "fd00::2".parse().unwrap()),
                    ],
                ),
                (
                    "api".to_string(),
                    vec![
                        a(n("api."), Ipv4Addr::new(172, 18, 0, 3)),
                        a(n("api."), Ipv4Addr::new(172, 18, 0, 4)),
                    ],
                ),
            ]);
            Self {
                records,
                unreachable: false,
                calls: Default::default(),
            }
        }

        fn unreachable() -> Self {
            Self {
                records: HashMap::new(),
                unreachable: true,
                calls: Default::default(),
            }
        }

        fn calls(&self) -> Vec<(String, RecordType)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Resolver for FakeResolver {
        async fn resolve(
            &self,
            hostname: &Name,
            record_type: RecordType,
        ) -> Result<Vec<Record>, Error> {
            let hostname = hostname.to_utf8();
            self.calls
                .lock()
                .unwrap()
                .push((hostname.clone(), record_type));
            if self.unreachable {
                return Err(Error::Timeout(
                    socket_addr("127.0.0.11:53"),
                    Duration::from_secs(2),
                ));
            }
            let Some(records) = self.records.get(&hostname) else {
                return Err(Error::ResponseCode(ResponseCode::NXDomain));
            };
            let records: Vec<Record> = records
                .iter()
                .filter(|r| r.record_type() == record_type)
                .cloned()
                .collect();
            if records.is_empty() {
                return Err(Error::NoRecords);
            }
            Ok(records)
        }
    }

    struct FakeForwarder {
        reply: Option<Message>,
        calls: Mutex<Vec<Vec<u8>>>,
    }

    impl FakeForwarder {
        fn answering(reply: Message) -> Self {
            Self {
                reply: Some(reply),
                calls: Default::default(),
            }
        }

        fn unreachable() -> Self {
            Self {
                reply: None,
                calls: Default::default(),
            }
        }

        fn calls(&self) -> Vec<Vec<u8>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Forwarder for FakeForwarder {
        async fn forward(&self, query: &Message) -> Result<Message, Error> {
            self.calls.lock().unwrap().push(query.to_vec().unwrap());
            self.reply.clone().ok_or(Error::Timeout(
                socket_addr("8.8.8.8:53"),
                Duration::from_secs(2),
            ))
        }
    }
}
