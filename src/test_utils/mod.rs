//! Helpers shared by unit tests
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::watch::WatchContext;
use crate::BackoffPolicy;
use crate::ConfWatchConfig;
use crate::ConfigFileChangeEvent;
use crate::ConfigService;

static LOGGER_INIT: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub(crate) fn enable_logger() {
    Lazy::force(&LOGGER_INIT);
}

/// Defaults with delays short enough for tests
pub(crate) fn fast_config() -> ConfWatchConfig {
    let mut config = ConfWatchConfig::default();
    config.retry = BackoffPolicy {
        base_delay_ms: 10,
        max_delay_ms: 40,
    };
    config.watch.wildcard_rescan_interval_in_ms = 50;
    config
}

pub(crate) fn watch_context(service: Arc<dyn ConfigService>) -> WatchContext {
    WatchContext {
        service,
        config: Arc::new(fast_config()),
        decryptor: None,
    }
}

/// Next event, failing the test after one second
pub(crate) async fn next_event(rx: &mut mpsc::Receiver<ConfigFileChangeEvent>) -> ConfigFileChangeEvent {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for change event")
        .expect("event channel closed")
}

/// Assert no event arrives within `window`
pub(crate) async fn assert_quiet(
    rx: &mut mpsc::Receiver<ConfigFileChangeEvent>,
    window: Duration,
) {
    if let Ok(Some(event)) = timeout(window, rx.recv()).await {
        panic!("unexpected change event: {event:?}");
    }
}
