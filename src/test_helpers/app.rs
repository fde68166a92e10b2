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

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use hickory_proto::op::Message;
use hickory_proto::rr::{Name, RecordType};

use crate::dns::Snapshot;
use crate::*;

use super::dns::{a_message, send_query};
use super::helpers::*;

#[derive(Clone)]
pub struct TestApp {
    pub udp_address: SocketAddr,
    metrics: Arc<dns::Metrics>,
}

/// Builds the app from `cfg`, runs `f` against it, then shuts it down and waits for termination.
pub async fn with_app<F, Fut, FO>(cfg: config::Config, f: F) -> FO
where
    F: FnOnce(TestApp) -> Fut,
    Fut: Future<Output = FO>,
{
    initialize_telemetry();
    let app = app::build(Arc::new(cfg)).await.unwrap();
    let shutdown = app.shutdown.trigger();

    let ta = TestApp {
        udp_address: app.udp_address,
        metrics: app.metrics(),
    };
    let run_and_shutdown = async {
        let out = f(ta).await;
        shutdown.shutdown_now().await;
        out
    };
    let (app, out) = tokio::join!(app.wait_termination(), run_and_shutdown);
    app.expect("app exits without error");
    out
}

impl TestApp {
    /// Sends `msg` to the proxy and returns its reply.
    pub async fn send(&self, msg: &Message) -> Message {
        send_query(self.udp_address, msg).await.expect("proxy replies")
    }

    /// Sends a standard recursive query for `name` to the proxy.
    pub async fn query(&self, name: Name, rr_type: RecordType) -> Message {
        self.send(&a_message(name, rr_type)).await
    }

    pub fn snapshot(&self) -> Snapshot {
        self.metrics.snapshot()
    }
}
