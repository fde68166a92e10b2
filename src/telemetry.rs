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

use std::env;
use std::fmt::Debug;

use once_cell::sync::OnceCell;

use thiserror::Error;
use tracing::{Event, Subscriber, field, info, warn};

use tracing_subscriber::fmt::format::Writer;

use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, format};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{Layer, Registry, filter, filter::EnvFilter, prelude::*, reload};

use crate::config::LogLevel;

static LOG_HANDLE: OnceCell<LogHandle> = OnceCell::new();

// Hickory logs every request it serves; those are only wanted when asked for explicitly.
const QUIET_DIRECTIVES: &str = "hickory_server::server::server_future=off";

/// Installs the global subscriber. `RUST_LOG` is honored if set, otherwise everything at info
/// and above is logged until `apply_level` narrows it.
pub fn setup_logging() {
    tracing_subscriber::registry().with(fmt_layer()).init();
}

fn json_fmt() -> BoxLayer {
    let format = tracing_subscriber::fmt::format().json().flatten_event(true);
    let format = tracing_subscriber::fmt::layer()
        .event_format(format)
        .fmt_fields(format::JsonFields::default());
    Box::new(format)
}

fn plain_fmt() -> BoxLayer {
    let format = tracing_subscriber::fmt::layer()
        .event_format(ProxyFormat())
        .fmt_fields(ProxyFormat());
    Box::new(format)
}

fn fmt_layer() -> BoxLayer {
    let format = if env::var("LOG_FORMAT").unwrap_or_default() == "json" {
        json_fmt()
    } else {
        plain_fmt()
    };
    let (layer, reload) = reload::Layer::new(format.with_filter(default_env_filter()));
    LOG_HANDLE
        .set(reload)
        .map_or_else(|_| warn!("setup log handler failed"), |_| {});
    Box::new(layer)
}

fn level_filter(level: &str) -> EnvFilter {
    EnvFilter::builder()
        .with_regex(false)
        .parse(format!("{QUIET_DIRECTIVES},{level}"))
        .unwrap_or_else(|_| EnvFilter::new(QUIET_DIRECTIVES))
}

fn default_env_filter() -> EnvFilter {
    level_filter(&env::var(EnvFilter::DEFAULT_ENV).unwrap_or("info".to_string()))
}

// a handle to get and set the log level
type BoxLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;
type FilteredLayer = filter::Filtered<BoxLayer, EnvFilter, Registry>;
type LogHandle = reload::Handle<FilteredLayer, Registry>;

/// apply_level narrows logging to the configured level. An explicit `RUST_LOG` takes precedence
/// and is left untouched.
pub fn apply_level(level: LogLevel) -> Result<(), Error> {
    if env::var(EnvFilter::DEFAULT_ENV).is_ok() {
        return Ok(());
    }
    let Some(handle) = LOG_HANDLE.get() else {
        return Err(Error::Uninitialized);
    };
    let new_filter = level_filter(level.directive());
    info!("new log filter is {new_filter}");
    Ok(handle.modify(|layer| {
        *layer.filter_mut() = new_filter;
    })?)
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("reload failure: {0}")]
    Reload(#[from] reload::Error),
    #[error("logging is not initialized")]
    Uninitialized,
}

/// Tab separated: time, level, target, message, then `k=v` fields.
struct ProxyFormat();

struct Visitor<'writer> {
    res: std::fmt::Result,
    is_empty: bool,
    writer: Writer<'writer>,
}

impl Visitor<'_> {
    fn write_padded(&mut self, value: &impl Debug) -> std::fmt::Result {
        let padding = if self.is_empty {
            self.is_empty = false;
            ""
        } else {
            " "
        };
        write!(self.writer, "{padding}{value:?}")
    }
}

impl field::Visit for Visitor<'_> {
    fn record_str(&mut self, field: &field::Field, value: &str) {
        if self.res.is_err() {
            return;
        }
        self.record_debug(field, &value)
    }

    fn record_debug(&mut self, field: &field::Field, val: &dyn Debug) {
        self.res = match field.name() {
            "message" => write!(self.writer, "{val:?}\t"),
            _ => self.write_padded(&format_args!("{}={:?}", field.name(), val)),
        }
    }
}

impl<'writer> FormatFields<'writer> for ProxyFormat {
    fn format_fields<R: tracing_subscriber::field::RecordFields>(
        &self,
        writer: Writer<'writer>,
        fields: R,
    ) -> std::fmt::Result {
        let mut visitor = Visitor {
            writer,
            res: Ok(()),
            is_empty: true,
        };
        fields.record(&mut visitor);
        visitor.res
    }
}

impl<S, N> FormatEvent<S, N> for ProxyFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        use tracing_log::NormalizeEvent;
        use tracing_subscriber::fmt::time::FormatTime;
        use tracing_subscriber::fmt::time::SystemTime;
        let normalized_meta = event.normalized_metadata();
        SystemTime.format_time(&mut writer)?;
        let meta = normalized_meta.as_ref().unwrap_or_else(|| event.metadata());
        write!(
            writer,
            "\t{}\t",
            meta.level().to_string().to_ascii_lowercase()
        )?;

        let target = meta.target();
        let target = target.strip_prefix("docker_dns_proxy::").unwrap_or(target);
        write!(writer, "{target}")?;

        if event.fields().any(|_| true) {
            write!(writer, "\t")?;
        }
        ctx.format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}
