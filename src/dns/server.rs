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

use hickory_proto::ProtoErrorKind;
use hickory_server::ServerFuture;
use tokio::net::UdpSocket;
use tracing::{info, warn};

use crate::dns::Error;
use crate::dns::Router;
use crate::dns::handler::Handler;

/// A UDP DNS server answering every query through a [Router].
pub struct Server {
    udp_addr: SocketAddr,
    server: ServerFuture<Handler>,
}

impl Server {
    /// Binds `addr` and registers the socket. Port 0 picks an ephemeral port, see
    /// [Server::udp_address].
    pub async fn new(addr: SocketAddr, router: Arc<Router>) -> Result<Self, Error> {
        let udp_socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| Error::Bind(addr, e))?;
        let udp_addr = udp_socket.local_addr().map_err(|e| Error::Bind(addr, e))?;

        let mut server = ServerFuture::new(Handler::new(router));
        server.register_socket(udp_socket);
        info!(
            address=%udp_addr,
            component="dns",
            "starting DNS proxy",
        );

        Ok(Self { udp_addr, server })
    }

    /// Returns the address to which this DNS server is bound for UDP.
    pub fn udp_address(&self) -> SocketAddr {
        self.udp_addr
    }

    /// Serves queries until `stop` completes, then lets in-flight queries finish.
    pub async fn run(mut self, stop: impl Future<Output = ()>) {
        tokio::select! {
            res = self.server.block_until_done() => {
                if let Err(e) = res {
                    match e.kind() {
                        ProtoErrorKind::NoError => (),
                        _ => warn!("DNS server shutdown error: {e}"),
                    }
                }
            }
            () = stop => {
                info!("shutting down the DNS server");
                if let Err(e) = self.server.shutdown_gracefully().await {
                    warn!("DNS server shutdown error: {e}");
                }
            }
        }
        info!("dns server stopped");
    }
}
