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

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::config;

pub mod app;
pub mod dns;
pub mod helpers;

/// A config listening on an ephemeral loopback port, with upstreams at the given addresses.
pub fn test_config(docker_dns: SocketAddr, upstream_dns: Option<SocketAddr>) -> config::Config {
    config::Config {
        listen_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
        listen_port: 0,
        docker_dns,
        upstream_dns: upstream_dns.unwrap_or(config::Config::default().upstream_dns),
        enable_upstream: upstream_dns.is_some(),
        timeout: Duration::from_secs(1),
        ..Default::default()
    }
}
