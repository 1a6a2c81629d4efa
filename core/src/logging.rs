// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

use std::io::IsTerminal;
use std::io::stderr;

use anyhow::Context;
use anyhow::Result;
use tracing::Level;
use tracing_glog::Glog;
use tracing_glog::GlogFields;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Registry;
use tracing_subscriber::layer::SubscriberExt;

/// Installs a glog-formatted stderr subscriber.
///
/// `RUST_LOG` wins when set; otherwise every counterbench crate logs at `level`.
pub fn init_logging(level: Level) -> Result<()> {
    let fmt = tracing_subscriber::fmt::Layer::default()
        .with_ansi(stderr().is_terminal())
        .with_writer(std::io::stderr)
        .event_format(Glog::default().with_timer(tracing_glog::LocalTime::default()))
        .fmt_fields(GlogFields::default());

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let level = level.as_str().to_ascii_lowercase();
            let directives = [
                "counterbench",
                "counterbench_api",
                "counterbench_core",
                "counterbench_memory",
                "counterbench_postgres",
                "counterbench_dynamodb",
                "counterbench_cli_lib",
            ]
            .map(|target| format!("{target}={level}"))
            .join(",");
            EnvFilter::try_new(&directives)
                .with_context(|| format!("Invalid log level: {level}"))?
        }
    };

    let subscriber = Registry::default().with(filter).with(fmt);
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global subscriber")?;

    Ok(())
}
