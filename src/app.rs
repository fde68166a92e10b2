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

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use prometheus_client::registry::Registry;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{Instrument, info, warn};

use crate::config::Config;
use crate::{dns, metrics, signal, stats};

/// How long in-flight queries get to finish once shutdown starts.
pub const TERMINATION_GRACE_PERIOD: Duration = Duration::from_secs(5);

pub async fn build(config: Arc<Config>) -> anyhow::Result<Bound> {
    let mut registry = Registry::default();
    let metrics = Arc::new(dns::Metrics::new(metrics::sub_registry(&mut registry)));

    let shutdown = signal::Shutdown::new();

    let router = dns::Router::from_config(&config, metrics.clone()).context("dns router")?;
    let server = dns::Server::new(config.listen_socket_addr(), Arc::new(router))
        .await
        .context("dns server starts")?;
    let udp_address = server.udp_address();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server_task = tokio::spawn(
        server
            .run(async move {
                let _ = stop_rx.await;
            })
            .in_current_span(),
    );

    let reporter = Arc::new(stats::Reporter::new(metrics.clone(), registry));
    let reporter_task = config.enable_metrics.then(|| {
        let reporter = reporter.clone();
        tokio::spawn(async move { reporter.run().await }.in_current_span())
    });

    Ok(Bound {
        udp_address,
        shutdown,
        metrics,
        reporter,
        reporter_task,
        stop_tx,
        server_task,
    })
}

pub struct Bound {
    pub udp_address: SocketAddr,

    pub shutdown: signal::Shutdown,
    metrics: Arc<dns::Metrics>,
    reporter: Arc<stats::Reporter>,
    reporter_task: Option<JoinHandle<()>>,
    stop_tx: oneshot::Sender<()>,
    server_task: JoinHandle<()>,
}

impl Bound {
    pub fn metrics(&self) -> Arc<dns::Metrics> {
        self.metrics.clone()
    }

    pub async fn wait_termination(self) -> anyhow::Result<()> {
        // Wait for a signal to shutdown from an explicit trigger or signal
        self.shutdown.wait().await;

        // The server may already be gone, in which case there is nothing to stop.
        let _ = self.stop_tx.send(());

        // Let in-flight queries finish. If they take too long, terminate anyways.
        match time::timeout(TERMINATION_GRACE_PERIOD, self.server_task).await {
            Ok(res) => {
                res.context("dns server task")?;
                info!("Shutdown completed gracefully");
            }
            Err(_) => warn!(
                "Graceful shutdown did not complete in {:?}, terminating now",
                TERMINATION_GRACE_PERIOD
            ),
        }

        if let Some(task) = self.reporter_task {
            task.abort();
            self.reporter.report();
        }
        Ok(())
    }
}
