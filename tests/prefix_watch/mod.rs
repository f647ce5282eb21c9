use std::sync::Arc;
use std::time::Duration;

use confwatch::ConfigClient;
use confwatch::Error;
use confwatch::MemoryConfigService;
use confwatch::WatchError;
use serde_json::json;
use serde_json::Value;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::common::enable_logger;
use crate::common::test_config;
use crate::common::FakePolaris;
use crate::common::GROUP;
use crate::common::NAMESPACE;

const PREFIX: &str = "/default";

fn keys(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

#[tokio::test]
async fn wildcard_group_tracks_new_files() {
    enable_logger();
    let store = Arc::new(MemoryConfigService::with_idle_timeout(Duration::from_millis(300)));
    store.publish(NAMESPACE, GROUP, "a.json", r#"{"name":"a"}"#);
    store.publish(NAMESPACE, GROUP, "b.json", r#"{"name":"b"}"#);
    let server = FakePolaris::start(store.clone()).await;
    let client = ConfigClient::builder(test_config(vec![server.endpoint.clone()]))
        .build()
        .await
        .unwrap();
    let coordinator = client.coordinator();
    let watched = keys(&["/default/svc/*.json"]);
    let cancel = CancellationToken::new();

    let first = coordinator.watch_prefix(PREFIX, &watched, 0, &cancel).await.unwrap();
    let values = coordinator.get_values(PREFIX, &watched).await.unwrap();
    let parsed: Value = serde_json::from_str(&values["/svc/*.json"]).unwrap();
    assert_eq!(parsed, json!([{"name": "a"}, {"name": "b"}]));

    store.publish(NAMESPACE, GROUP, "c.json", r#"{"name":"c"}"#);

    let second = timeout(Duration::from_secs(5), coordinator.watch_prefix(PREFIX, &watched, first, &cancel))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second, first + 1);

    let values = coordinator.get_values(PREFIX, &watched).await.unwrap();
    let parsed: Value = serde_json::from_str(&values["/svc/*.json"]).unwrap();
    assert_eq!(parsed, json!([{"name": "a"}, {"name": "b"}, {"name": "c"}]));

    let members: Vec<String> = coordinator
        .watched_files()
        .await
        .into_iter()
        .map(|id| id.file_name)
        .collect();
    assert_eq!(members, vec!["a.json", "b.json", "c.json"]);
}

#[tokio::test]
async fn concrete_keys_wake_on_content_change() {
    let store = Arc::new(MemoryConfigService::with_idle_timeout(Duration::from_millis(300)));
    store.publish(NAMESPACE, GROUP, "app.properties", "port=80");
    let server = FakePolaris::start(store.clone()).await;
    let client = ConfigClient::builder(test_config(vec![server.endpoint.clone()]))
        .build()
        .await
        .unwrap();
    let coordinator = client.coordinator();
    let watched = keys(&["/default/svc/app.properties"]);
    let cancel = CancellationToken::new();

    let first = coordinator.watch_prefix(PREFIX, &watched, 0, &cancel).await.unwrap();

    store.publish(NAMESPACE, GROUP, "app.properties", "port=81");

    let second = timeout(Duration::from_secs(5), coordinator.watch_prefix(PREFIX, &watched, first, &cancel))
        .await
        .unwrap()
        .unwrap();
    assert!(second > first);
    assert_eq!(
        coordinator.get_values(PREFIX, &watched).await.unwrap()["/svc/app.properties"],
        "port=81"
    );
}

#[tokio::test]
async fn cancelled_wait_returns_promptly_and_stops_polling() {
    let store = Arc::new(MemoryConfigService::with_idle_timeout(Duration::from_millis(50)));
    let server = FakePolaris::start(store.clone()).await;
    let client = ConfigClient::builder(test_config(vec![server.endpoint.clone()]))
        .build()
        .await
        .unwrap();
    let coordinator = Arc::new(client.coordinator());
    let watched = keys(&["/default/svc/a.json"]);
    let cancel = CancellationToken::new();

    let first = coordinator.watch_prefix(PREFIX, &watched, 0, &cancel).await.unwrap();
    let waiter = {
        let coordinator = coordinator.clone();
        let watched = watched.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { coordinator.watch_prefix(PREFIX, &watched, first, &cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    cancel.cancel();

    let result = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    assert!(matches!(result, Err(Error::Watch(WatchError::Cancelled))));

    // Grace period for an in-flight long-poll to be dropped
    tokio::time::sleep(Duration::from_millis(200)).await;
    let polls = store.poll_calls();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(store.poll_calls(), polls, "watcher kept polling after cancellation");
}
