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

use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, Name, Record, RecordType};
use tracing::{debug, error};

use crate::dns::{Error, exchange};

/// Looks up names that live inside the strip domain.
#[async_trait::async_trait]
pub trait Resolver: Sync + Send {
    /// Resolves `hostname` (already stripped of the domain) for `record_type`.
    ///
    /// Returns the answer records as received. An empty answer or a negative response code is
    /// an error, so callers only ever see a non-empty set of records.
    async fn resolve(&self, hostname: &Name, record_type: RecordType)
    -> Result<Vec<Record>, Error>;
}

/// A [Resolver] backed by the embedded name service of the container runtime.
pub struct NameServiceResolver {
    addr: SocketAddr,
    timeout: Duration,
}

impl NameServiceResolver {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self { addr, timeout }
    }

    fn query(hostname: &Name, record_type: RecordType) -> Message {
        let mut name = hostname.clone();
        name.set_fqdn(true);
        let mut query = Query::query(name, record_type);
        query.set_query_class(DNSClass::IN);

        let mut msg = Message::new();
        msg.set_message_type(MessageType::Query)
            .set_op_code(OpCode::Query)
            .set_recursion_desired(true)
            .add_query(query);
        msg
    }
}

#[async_trait::async_trait]
impl Resolver for NameServiceResolver {
    async fn resolve(
        &self,
        hostname: &Name,
        record_type: RecordType,
    ) -> Result<Vec<Record>, Error> {
        let response = exchange(self.addr, self.timeout, Self::query(hostname, record_type))
            .await
            .inspect_err(|e| error!(%hostname, %record_type, "name service lookup failed: {e}"))?;

        match response.response_code() {
            ResponseCode::NoError => {}
            code => {
                debug!(%hostname, %record_type, "name service responded {code}");
                return Err(Error::ResponseCode(code));
            }
        }
        if response.answers().is_empty() {
            debug!(%hostname, %record_type, "name service has no records");
            return Err(Error::NoRecords);
        }
        Ok(response.answers().to_vec())
    }
}
