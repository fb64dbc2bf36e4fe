use tracing::Subscriber;
use tracing::subscriber::{SetGlobalDefaultError, set_global_default};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt};

#[derive(Debug, thiserror::Error)]
pub enum TracerError {
    #[error("could not install global subscriber: {0}")]
    Subscriber(#[from] SetGlobalDefaultError),
    #[error("could not bridge log records into tracing: {0}")]
    LogBridge(#[from] log::SetLoggerError),
}

/// Builds the subscriber used by every binary: an env filter over either pretty or json stdout
/// output. An unparsable `log_level` falls back to `info`.
pub fn subscriber(log_level: Option<&str>, json: bool) -> impl Subscriber + Send + Sync + 'static {
    let env_filter = EnvFilter::try_new(log_level.unwrap_or("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = (!json).then(|| tracing_subscriber::fmt::layer().pretty());
    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_level(true)
            .with_current_span(true)
            .with_thread_names(true)
    });

    Registry::default()
        .with(env_filter)
        .with(json_layer)
        .with(stdout_layer)
}

pub fn init_tracing(
    service_name: &'static str,
    log_level: Option<&str>,
    json: bool,
) -> Result<(), TracerError> {
    tracing_log::LogTracer::init()?;
    set_global_default(subscriber(log_level, json))?;
    tracing::info!(service = service_name, "Tracing initialised");
    Ok(())
}
