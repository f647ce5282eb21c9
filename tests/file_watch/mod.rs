use std::sync::Arc;
use std::time::Duration;

use confwatch::ChangeType;
use confwatch::ConfigClient;
use confwatch::ConfigFileChangeEvent;
use confwatch::MemoryConfigService;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::common::enable_logger;
use crate::common::eventually;
use crate::common::test_config;
use crate::common::FakePolaris;
use crate::common::GROUP;
use crate::common::NAMESPACE;

async fn next_event(rx: &mut mpsc::Receiver<ConfigFileChangeEvent>) -> ConfigFileChangeEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for change event")
        .expect("event channel closed")
}

fn names(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

#[tokio::test]
async fn files_created_then_updated_over_http() {
    enable_logger();
    let store = Arc::new(MemoryConfigService::with_idle_timeout(Duration::from_millis(300)));
    let server = FakePolaris::start(store.clone()).await;
    let client = ConfigClient::builder(test_config(vec![server.endpoint.clone()]))
        .build()
        .await
        .unwrap();

    let watcher = client
        .watch_config_files(NAMESPACE, GROUP, &names(&["cfg-0.json", "cfg-1.json"]))
        .await
        .unwrap();
    let mut rx = watcher.add_change_channel();

    store.publish(NAMESPACE, GROUP, "cfg-0.json", r#"{"x":1}"#);
    let added = next_event(&mut rx).await;
    assert_eq!(added.file.file_name, "cfg-0.json");
    assert_eq!(added.change_type, ChangeType::Added);
    assert_eq!(added.old_value, "");
    assert_eq!(added.new_value, r#"{"x":1}"#);

    store.publish(NAMESPACE, GROUP, "cfg-0.json", r#"{"x":2}"#);
    let modified = next_event(&mut rx).await;
    assert_eq!(modified.change_type, ChangeType::Modified);
    assert_eq!(modified.old_value, r#"{"x":1}"#);
    assert_eq!(modified.new_value, r#"{"x":2}"#);

    store.delete(NAMESPACE, GROUP, "cfg-0.json");
    let deleted = next_event(&mut rx).await;
    assert_eq!(deleted.change_type, ChangeType::Deleted);
    assert_eq!(deleted.old_value, r#"{"x":2}"#);
    assert_eq!(deleted.new_value, "");

    client.shutdown();
    timeout(Duration::from_secs(5), watcher.finished()).await.unwrap();
}

#[tokio::test]
async fn idle_long_polls_should_keep_the_watcher_alive() {
    let store = Arc::new(MemoryConfigService::with_idle_timeout(Duration::from_millis(50)));
    let server = FakePolaris::start(store.clone()).await;
    let client = ConfigClient::builder(test_config(vec![server.endpoint.clone()]))
        .build()
        .await
        .unwrap();
    let watcher = client.watch_config_files(NAMESPACE, GROUP, &names(&["a.json"])).await.unwrap();
    let mut rx = watcher.add_change_channel();

    // Several idle rounds pass without events
    eventually(Duration::from_secs(5), || store.poll_calls() >= 3).await;
    assert!(rx.try_recv().is_err());
    assert!(!watcher.is_finished());

    store.publish(NAMESPACE, GROUP, "a.json", "late");
    assert_eq!(next_event(&mut rx).await.new_value, "late");
}

#[tokio::test]
async fn requests_should_spread_across_endpoints() {
    let store = Arc::new(MemoryConfigService::with_idle_timeout(Duration::from_millis(20)));
    let first = FakePolaris::start(store.clone()).await;
    let second = FakePolaris::start(store.clone()).await;
    let client = ConfigClient::builder(test_config(vec![first.endpoint.clone(), second.endpoint.clone()]))
        .build()
        .await
        .unwrap();

    for _ in 0..10 {
        client.list_config_files(NAMESPACE, GROUP).await.unwrap();
    }

    assert_eq!(first.requests(), 5);
    assert_eq!(second.requests(), 5);
}

#[tokio::test]
async fn unreachable_endpoint_should_not_break_reads() {
    let store = Arc::new(MemoryConfigService::new());
    store.publish(NAMESPACE, GROUP, "a.json", "A");
    let server = FakePolaris::start(store.clone()).await;

    let dead = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_endpoint = format!("http://{}", dead.local_addr().unwrap());
    drop(dead);

    let client = ConfigClient::builder(test_config(vec![dead_endpoint, server.endpoint.clone()]))
        .build()
        .await
        .unwrap();

    let mut ok = 0;
    for _ in 0..10 {
        if let Ok(Some(content)) = client.get_config_content(NAMESPACE, GROUP, "a.json").await {
            assert_eq!(content, "A");
            ok += 1;
        }
    }

    // Equal weights alternate, every read routed to the live endpoint succeeds
    assert_eq!(ok, 5);
}
