use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{writer::BoxMakeWriter, Layer},
    layer::SubscriberExt,
    EnvFilter, Registry,
};

use crate::config::Config;

/// Install the global subscriber: JSON lines into `log_dir/log_file` plus
/// plain text on stdout. Keep the returned guards alive or buffered events
/// are lost on exit.
pub fn init_logging(config: &Config) -> Result<Vec<WorkerGuard>, String> {
    let file_appender = tracing_appender::rolling::never(Path::new(&config.log_dir), &config.log_file);
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let file_layer = Layer::new()
        .json()
        .with_writer(BoxMakeWriter::new(move || file_writer.clone()));
    let stdout_layer = Layer::new().with_writer(BoxMakeWriter::new(move || stdout_writer.clone()));

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = Registry::default()
        .with(filter)
        .with(file_layer)
        .with(stdout_layer);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| format!("Unable to set global subscriber: {err}"))?;

    Ok(vec![file_guard, stdout_guard])
}
