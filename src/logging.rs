use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::SubscriberBuilder;

/// Install the global subscriber. `RUST_LOG` wins; everything else gets a
/// sensible info-level default.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = SubscriberBuilder::default().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).ok(); // Ignore err when re-entered in tests
}
