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
use std::time::Duration;

use hickory_client::client::Client;
use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::runtime::TokioRuntimeProvider;
use hickory_proto::udp::UdpClientStream;
use hickory_proto::xfer::{DnsHandle, DnsRequest, DnsRequestOptions, DnsResponse, FirstAnswer};

pub use forwarder::{Forwarder, UpstreamForwarder};
pub use metrics::{Metrics, Snapshot};
pub use resolver::{NameServiceResolver, Resolver};
pub use router::Router;
pub use server::Server;

pub mod forwarder;
pub mod handler;
pub mod metrics;
pub mod name_util;
pub mod resolver;
pub mod router;
pub mod server;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid strip suffix {0:?}")]
    InvalidSuffix(String),
    #[error("failed to bind {0}: {1}")]
    Bind(SocketAddr, #[source] std::io::Error),
    #[error("exchange with {0} failed: {1}")]
    Transport(
        SocketAddr,
        #[source] Box<dyn std::error::Error + Send + Sync>,
    ),
    #[error("exchange with {0} timed out after {1:?}")]
    Timeout(SocketAddr, Duration),
    #[error("upstream responded {0}")]
    ResponseCode(ResponseCode),
    #[error("no records found")]
    NoRecords,
}

impl Error {
    /// True if the upstream could not be reached at all, as opposed to answering negatively.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(..) | Error::Timeout(..))
    }
}

/// Performs a single UDP exchange with `addr`, bounded by `timeout`.
///
/// Every call uses its own ephemeral socket; nothing is shared between exchanges.
async fn exchange(
    addr: SocketAddr,
    timeout: Duration,
    request: Message,
) -> Result<DnsResponse, Error> {
    let stream =
        UdpClientStream::<TokioRuntimeProvider>::builder(addr, TokioRuntimeProvider::new()).build();
    let (client, bg) = Client::connect(stream)
        .await
        .map_err(|e| Error::Transport(addr, Box::new(e)))?;
    // Run the client exchange in the background.
    let bg = tokio::spawn(bg);

    let request = DnsRequest::new(request, DnsRequestOptions::default());
    let result = tokio::time::timeout(timeout, client.send(request).first_answer()).await;
    drop(client);
    bg.abort();

    match result {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) => Err(Error::Transport(addr, Box::new(e))),
        Err(_) => Err(Error::Timeout(addr, timeout)),
    }
}
