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
use std::time::Duration;

use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::dns;

pub const REPORT_INTERVAL: Duration = Duration::from_secs(30);

/// Periodically logs the query counters, plus the full registry at debug level.
pub struct Reporter {
    metrics: Arc<dns::Metrics>,
    registry: Registry,
    interval: Duration,
}

impl Reporter {
    pub fn new(metrics: Arc<dns::Metrics>, registry: Registry) -> Self {
        Self {
            metrics,
            registry,
            interval: REPORT_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Renders the registry in the Prometheus text format.
    pub fn render(&self) -> Result<String, std::fmt::Error> {
        let mut buf = String::new();
        encode(&mut buf, &self.registry)?;
        Ok(buf)
    }

    pub fn report(&self) {
        let snapshot = self.metrics.snapshot();
        info!(
            queries = snapshot.queries,
            errors = snapshot.errors,
            "total queries: {}, errors: {}",
            snapshot.queries,
            snapshot.errors
        );
        match self.render() {
            Ok(text) => debug!("metrics:\n{text}"),
            Err(e) => warn!("failed to encode metrics: {e}"),
        }
    }

    /// Reports every interval, forever. The first report is one interval after the start.
    pub async fn run(&self) {
        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.report();
        }
    }
}
