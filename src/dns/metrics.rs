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

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::{Registry, Unit};
use std::time::Duration;

use crate::metrics::{DeferRecorder, Recorder};

pub struct Metrics {
    pub requests: Counter,
    pub errors: Counter,
    pub upstream_requests: Family<UpstreamLabels, Counter>,
    pub upstream_failures: Family<UpstreamLabels, Counter>,
    pub upstream_duration: Family<UpstreamLabels, Histogram>,
}

impl Metrics {
    pub fn new(registry: &mut Registry) -> Self {
        let requests = Counter::default();
        registry.register(
            "requests",
            "Total number of DNS queries handled",
            requests.clone(),
        );

        let errors = Counter::default();
        registry.register(
            "errors",
            "Total number of DNS queries that failed: malformed queries and unreachable upstreams",
            errors.clone(),
        );

        let upstream_requests = Family::default();
        registry.register(
            "upstream_requests",
            "Total number of DNS requests sent upstream",
            upstream_requests.clone(),
        );

        let upstream_failures = Family::default();
        registry.register(
            "upstream_failures",
            "Total number of DNS requests that could not reach upstream",
            upstream_failures.clone(),
        );

        let upstream_duration = Family::<UpstreamLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(vec![0.001f64, 0.005, 0.01, 0.1, 1.0, 5.0].into_iter())
        });
        registry.register_with_unit(
            "upstream_request_duration",
            "Total time in seconds taken to get a DNS response from upstream",
            Unit::Seconds,
            upstream_duration.clone(),
        );

        Self {
            requests,
            errors,
            upstream_requests,
            upstream_failures,
            upstream_duration,
        }
    }

    /// Current totals of handled and failed queries.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            queries: self.requests.get(),
            errors: self.errors.get(),
        }
    }
}

impl DeferRecorder for Metrics {}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub queries: u64,
    pub errors: u64,
}

/// Which upstream a query was sent to.
#[derive(Clone, Copy, Hash, Debug, PartialEq, Eq, EncodeLabelValue)]
pub enum Upstream {
    /// The container runtime's embedded name service.
    Namespace,
    /// The general purpose resolver used for everything else.
    Fallback,
}

#[derive(Clone, Hash, Debug, PartialEq, Eq, EncodeLabelSet)]
pub struct UpstreamLabels {
    upstream: Upstream,
}

impl From<Upstream> for UpstreamLabels {
    fn from(upstream: Upstream) -> Self {
        Self { upstream }
    }
}

pub struct DnsRequest;

impl Recorder<DnsRequest, u64> for Metrics {
    fn record(&self, _: &DnsRequest, count: u64) {
        self.requests.inc_by(count);
    }
}

pub struct DnsError;

impl Recorder<DnsError, u64> for Metrics {
    fn record(&self, _: &DnsError, count: u64) {
        self.errors.inc_by(count);
    }
}

pub struct UpstreamRequest(pub Upstream);

impl Recorder<UpstreamRequest, u64> for Metrics {
    fn record(&self, reason: &UpstreamRequest, count: u64) {
        self.upstream_requests
            .get_or_create(&reason.0.into())
            .inc_by(count);
    }
}

pub struct UpstreamFailure(pub Upstream);

impl Recorder<UpstreamFailure, u64> for Metrics {
    fn record(&self, reason: &UpstreamFailure, count: u64) {
        self.upstream_failures
            .get_or_create(&reason.0.into())
            .inc_by(count);
    }
}

pub struct UpstreamDuration(pub Upstream);

impl Recorder<UpstreamDuration, Duration> for Metrics {
    fn record(&self, reason: &UpstreamDuration, duration: Duration) {
        self.upstream_duration
            .get_or_create(&reason.0.into())
            .observe(duration.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::IncrementRecorder;
    use prometheus_client::encoding::text::encode;

    #[test]
    fn snapshot_tracks_counters() {
        let mut registry = Registry::default();
        let metrics = Metrics::new(&mut registry);
        assert_eq!(metrics.snapshot(), Snapshot::default());

        metrics.increment(&DnsRequest);
        metrics.increment(&DnsRequest);
        metrics.increment(&DnsError);
        assert_eq!(
            metrics.snapshot(),
            Snapshot {
                queries: 2,
                errors: 1
            }
        );
    }

    #[test]
    fn upstream_metrics_are_labelled() {
        let mut registry = Registry::default();
        let metrics = Metrics::new(crate::metrics::sub_registry(&mut registry));
        metrics.increment(&UpstreamRequest(Upstream::Namespace));
        metrics.increment(&UpstreamFailure(Upstream::Fallback));
        metrics.record(
            &UpstreamDuration(Upstream::Namespace),
            Duration::from_millis(3),
        );

        let mut out = String::new();
        encode(&mut out, &registry).unwrap();
        assert!(
            out.contains(r#"dns_proxy_upstream_requests_total{upstream="Namespace"} 1"#),
            "{out}"
        );
        assert!(
            out.contains(r#"dns_proxy_upstream_failures_total{upstream="Fallback"} 1"#),
            "{out}"
        );
        assert!(
            out.contains(r#"dns_proxy_upstream_request_duration_seconds_count{upstream="Namespace"} 1"#),
            "{out}"
        );
        assert!(out.contains("dns_proxy_requests_total 0"), "{out}");
    }
}
