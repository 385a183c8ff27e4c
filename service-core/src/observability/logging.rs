use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `log_level` when set. Calling this more than once is
/// harmless; later calls leave the first subscriber in place.
pub fn init_tracing(service_name: &str, log_level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_file(true)
                    .with_line_number(true)
                    .json()
                    .flatten_event(true),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init()
    };

    match result {
        Ok(()) => tracing::debug!(service = service_name, "Tracing initialized"),
        Err(e) => tracing::debug!(
            service = service_name,
            error = %e,
            "Tracing subscriber already installed"
        ),
    }
}
