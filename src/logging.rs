use std::io;
use std::path::Path;
use tracing_appender::rolling;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const DEFAULT_STDOUT_FILTER: &str = "info,web_request=info,db_query=warn,sqlx=off";
const DEFAULT_FILE_FILTER: &str = "debug,sqlx=info";

pub fn configure_logging(log_dir: Option<&Path>) {
    // RUST_LOG wins over the built-in stdout filter
    let stdout_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_STDOUT_FILTER));

    let stdout_log = fmt::layer()
        .with_writer(io::stdout)
        .with_target(true)
        .with_filter(stdout_filter);

    let file_log = log_dir.map(|dir| {
        let file_appender = rolling::daily(dir, "feedrelay.log");
        fmt::layer()
            .with_writer(file_appender)
            .with_ansi(false)
            .with_filter(EnvFilter::new(DEFAULT_FILE_FILTER))
    });

    tracing_subscriber::Registry::default()
        .with(stdout_log)
        .with(file_log)
        .init();
}
