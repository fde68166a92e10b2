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

use std::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::dns::name_util;

const LISTEN_ADDR: &str = "LISTEN_ADDR";
const LISTEN_PORT: &str = "LISTEN_PORT";
const DOCKER_DNS: &str = "DOCKER_DNS";
const UPSTREAM_DNS: &str = "UPSTREAM_DNS";
const ENABLE_UPSTREAM: &str = "ENABLE_UPSTREAM";
const TIMEOUT_SECONDS: &str = "TIMEOUT_SECONDS";
const LOG_LEVEL: &str = "LOG_LEVEL";
const ENABLE_METRICS: &str = "ENABLE_METRICS";
const STRIP_SUFFIX: &str = "STRIP_SUFFIX";

const DEFAULT_LISTEN_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
const DEFAULT_LISTEN_PORT: u16 = 5353;
const DEFAULT_DOCKER_DNS: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 11)), 53);
const DEFAULT_UPSTREAM_DNS: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), 53);
const DEFAULT_TIMEOUT_SECONDS: u64 = 2;
const DEFAULT_STRIP_SUFFIX: &str = ".docker";

#[derive(serde::Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Address the UDP listener binds to.
    pub listen_addr: IpAddr,
    pub listen_port: u16,

    /// The container runtime's embedded name service. Only reachable from inside the
    /// network namespace the proxy runs in.
    pub docker_dns: SocketAddr,
    /// Recursive resolver used for names outside of the strip suffix.
    pub upstream_dns: SocketAddr,
    /// If false, names outside of the strip suffix get NXDOMAIN without any upstream query.
    pub enable_upstream: bool,

    /// Bound on every upstream exchange. There are no retries.
    pub timeout: Duration,

    pub log_level: LogLevel,
    pub enable_metrics: bool,

    /// Domain suffix marking a name as served by `docker_dns`. Leading and trailing dots are
    /// insignificant.
    pub strip_suffix: String,
}

impl Config {
    pub fn listen_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_addr, self.listen_port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen_addr: DEFAULT_LISTEN_ADDR,
            listen_port: DEFAULT_LISTEN_PORT,
            docker_dns: DEFAULT_DOCKER_DNS,
            upstream_dns: DEFAULT_UPSTREAM_DNS,
            enable_upstream: false,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            log_level: LogLevel::Info,
            enable_metrics: false,
            strip_suffix: DEFAULT_STRIP_SUFFIX.to_string(),
        }
    }
}

#[derive(serde::Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// The `EnvFilter` directive for this level.
    pub fn directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            _ => Err(Error::LogLevel(s.to_string())),
        }
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.directive())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid env var {0}={1}")]
    EnvVar(String, String),
    #[error("unknown log level {0:?}")]
    LogLevel(String),
}

/// GoBool wraps a bool to accept the spellings golang's strconv.ParseBool does.
struct GoBool(bool);

impl FromStr for GoBool {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(GoBool(true)),
            "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(GoBool(false)),
            _ => Err(()),
        }
    }
}

/// Whole seconds. Zero is rejected, since it would fail every upstream exchange.
struct Seconds(Duration);

impl FromStr for Seconds {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<u64>() {
            Ok(0) | Err(_) => Err(()),
            Ok(secs) => Ok(Seconds(Duration::from_secs(secs))),
        }
    }
}

/// A strip suffix that is known to form a valid domain.
struct Suffix(String);

impl FromStr for Suffix {
    type Err = crate::dns::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        name_util::as_domain(s).map(|_| Suffix(s.to_string()))
    }
}

/// Reads settings through `lookup`; empty values count as unset.
struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn parse<T: FromStr>(&self, env: &str) -> Result<Option<T>, Error> {
        match (self.0)(env).filter(|v| !v.is_empty()) {
            Some(val) => val
                .parse()
                .map(Some)
                .map_err(|_| Error::EnvVar(env.to_string(), val)),
            None => Ok(None),
        }
    }

    /// Like `parse`, but an invalid value is reported (naming `default`) and treated as unset.
    fn parse_or_warn<T: FromStr, D: Debug>(&self, env: &str, default: D) -> Option<T> {
        self.parse(env).unwrap_or_else(|e| {
            warn!("{e}, using default: {default:?}");
            None
        })
    }
}

/// Loads the configuration from the process environment.
pub fn parse_config() -> Config {
    construct_config(|env| std::env::var(env).ok())
}

/// Builds a configuration from the settings returned by `lookup`.
///
/// Never fails: every setting has a default, which also replaces values that do not parse.
pub fn construct_config<F>(lookup: F) -> Config
where
    F: Fn(&str) -> Option<String>,
{
    let env = Env(lookup);
    let default = Config::default();

    Config {
        listen_addr: env
            .parse_or_warn(LISTEN_ADDR, default.listen_addr)
            .unwrap_or(default.listen_addr),
        listen_port: env
            .parse_or_warn(LISTEN_PORT, default.listen_port)
            .unwrap_or(default.listen_port),
        docker_dns: env
            .parse_or_warn(DOCKER_DNS, default.docker_dns)
            .unwrap_or(default.docker_dns),
        upstream_dns: env
            .parse_or_warn(UPSTREAM_DNS, default.upstream_dns)
            .unwrap_or(default.upstream_dns),
        enable_upstream: env
            .parse_or_warn(ENABLE_UPSTREAM, default.enable_upstream)
            .map(|b: GoBool| b.0)
            .unwrap_or(default.enable_upstream),
        timeout: env
            .parse_or_warn(TIMEOUT_SECONDS, DEFAULT_TIMEOUT_SECONDS)
            .map(|s: Seconds| s.0)
            .unwrap_or(default.timeout),
        log_level: env
            .parse_or_warn(LOG_LEVEL, default.log_level)
            .unwrap_or(default.log_level),
        enable_metrics: env
            .parse_or_warn(ENABLE_METRICS, default.enable_metrics)
            .map(|b: GoBool| b.0)
            .unwrap_or(default.enable_metrics),
        strip_suffix: env
            .parse_or_warn(STRIP_SUFFIX, DEFAULT_STRIP_SUFFIX)
            .map(|s: Suffix| s.0)
            .unwrap_or(default.strip_suffix),
    }
}
