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

use hickory_proto::op::Message;
use tracing::error;

use crate::dns::{Error, exchange};

/// Relays queries for names outside the strip domain.
#[async_trait::async_trait]
pub trait Forwarder: Sync + Send {
    /// Sends the questions, flags and records of `query` and returns the upstream reply,
    /// whatever its response code. The transaction id on the wire may differ.
    async fn forward(&self, query: &Message) -> Result<Message, Error>;
}

/// A [Forwarder] that relays to a single recursive resolver over UDP.
pub struct UpstreamForwarder {
    addr: SocketAddr,
    timeout: Duration,
}

impl UpstreamForwarder {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self { addr, timeout }
    }
}

#[async_trait::async_trait]
impl Forwarder for UpstreamForwarder {
    async fn forward(&self, query: &Message) -> Result<Message, Error> {
        exchange(self.addr, self.timeout, query.clone())
            .await
            .map(|response| response.into_message())
            .inspect_err(|e| error!("fallback exchange failed: {e}"))
    }
}
