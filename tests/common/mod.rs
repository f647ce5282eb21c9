use std::convert::Infallible;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use confwatch::ConfWatchConfig;
use confwatch::ConfigFileId;
use confwatch::ConfigService;
use confwatch::MemoryConfigService;
use confwatch::WatchResponse;
use confwatch::WatchedVersion;
use serde::Deserialize;
use serde_json::json;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use warp::reply::Json;
use warp::Filter;

pub const NAMESPACE: &str = "default";
pub const GROUP: &str = "svc";

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn enable_logger() {
    once_cell::sync::Lazy::force(&LOGGER_INIT);
}

/// Client configuration with short retry and rescan delays
pub fn test_config(addresses: Vec<String>) -> ConfWatchConfig {
    let mut config = ConfWatchConfig::default();
    config.server.addresses = addresses;
    config.retry.base_delay_ms = 10;
    config.retry.max_delay_ms = 50;
    config.watch.wildcard_rescan_interval_in_ms = 50;
    config
}

#[derive(Deserialize)]
struct FileQuery {
    namespace: String,
    group: String,
    #[serde(rename = "fileName")]
    file_name: String,
}

#[derive(Deserialize)]
struct ListRequest {
    config_file_group: GroupBody,
}

#[derive(Deserialize)]
struct GroupBody {
    namespace: String,
    name: String,
}

#[derive(Deserialize)]
struct WatchRequest {
    watch_files: Vec<WatchFileBody>,
}

#[derive(Deserialize)]
struct WatchFileBody {
    namespace: String,
    group: String,
    file_name: String,
    version: u64,
}

/// Minimal Polaris config API served from a [`MemoryConfigService`]
pub struct FakePolaris {
    pub endpoint: String,
    requests: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

impl FakePolaris {
    pub async fn start(store: Arc<MemoryConfigService>) -> Self {
        let requests = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let counted = {
            let requests = requests.clone();
            warp::any()
                .map(move || {
                    requests.fetch_add(1, Ordering::SeqCst);
                })
                .untuple_one()
        };
        let with_store = warp::any().map(move || store.clone());

        let get_file = warp::get()
            .and(warp::path!("config" / "v1" / "GetConfigFile"))
            .and(warp::query::<FileQuery>())
            .and(with_store.clone())
            .and_then(get_config_file);
        let list_files = warp::post()
            .and(warp::path!("config" / "v1" / "GetConfigFileMetadataList"))
            .and(warp::body::json::<ListRequest>())
            .and(with_store.clone())
            .and_then(list_config_files);
        let watch_files = warp::post()
            .and(warp::path!("config" / "v1" / "WatchConfigFile"))
            .and(warp::body::json::<WatchRequest>())
            .and(with_store)
            .and_then(watch_config_files);
        let routes = counted.and(get_file.or(list_files).or(watch_files));

        let (addr, server) = {
            let shutdown = shutdown.clone();
            warp::serve(routes).bind_with_graceful_shutdown(([127, 0, 0, 1], 0), async move {
                shutdown.cancelled().await;
            })
        };
        tokio::spawn(server);

        Self {
            endpoint: format!("http://{addr}"),
            requests,
            shutdown,
        }
    }

    /// Requests received on any route
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Drop for FakePolaris {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn failure(e: impl ToString) -> Value {
    json!({"code": 500000, "info": e.to_string()})
}

async fn get_config_file(
    query: FileQuery,
    store: Arc<MemoryConfigService>,
) -> Result<Json, Infallible> {
    let id = ConfigFileId::new(query.namespace, query.group, query.file_name);
    debug!(file = %id, "fake polaris fetch");
    let payload = match store.fetch_file(&id).await {
        Ok(Some(file)) => json!({
            "code": 200000,
            "info": "execute success",
            "configFile": {
                "namespace": file.id.namespace,
                "group": file.id.group,
                "fileName": file.id.file_name,
                "content": file.content,
                "version": file.version.to_string(),
                "md5": file.md5,
                "encrypted": file.encrypted,
                "tags": file.tags.iter().map(|t| json!({"key": t.key, "value": t.value})).collect::<Vec<_>>(),
            }
        }),
        Ok(None) => json!({"code": 400202, "info": "not found resource"}),
        Err(e) => failure(e),
    };
    Ok(warp::reply::json(&payload))
}

async fn list_config_files(
    request: ListRequest,
    store: Arc<MemoryConfigService>,
) -> Result<Json, Infallible> {
    let group = request.config_file_group;
    debug!(namespace = %group.namespace, group = %group.name, "fake polaris list");
    let payload = match store.list_files(&group.namespace, &group.name).await {
        Ok(files) => json!({
            "code": 200000,
            "config_file_infos": files
                .iter()
                .map(|f| json!({"fileName": f.file_name, "version": f.version.to_string()}))
                .collect::<Vec<_>>(),
        }),
        Err(e) => failure(e),
    };
    Ok(warp::reply::json(&payload))
}

async fn watch_config_files(
    request: WatchRequest,
    store: Arc<MemoryConfigService>,
) -> Result<Json, Infallible> {
    let watched: Vec<WatchedVersion> = request
        .watch_files
        .into_iter()
        .map(|f| WatchedVersion {
            id: ConfigFileId::new(f.namespace, f.group, f.file_name),
            version: f.version,
        })
        .collect();
    let payload = match store.long_poll_watch(&watched).await {
        Ok(WatchResponse::Changed { id, version }) => json!({
            "code": 200000,
            "configFile": {
                "namespace": id.namespace,
                "group": id.group,
                "fileName": id.file_name,
                "version": version.to_string(),
            }
        }),
        Ok(WatchResponse::NoChange) => json!({"code": 200001, "info": "data no change"}),
        Ok(WatchResponse::Unrecognized { code, info }) => json!({"code": code, "info": info}),
        Err(e) => failure(e),
    };
    Ok(warp::reply::json(&payload))
}

/// Poll `condition` until it holds, failing after `limit`
pub async fn eventually<F>(
    limit: Duration,
    mut condition: F,
) where
    F: FnMut() -> bool,
{
    tokio::time::timeout(limit, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
