//! Polaris-compatible HTTP/JSON adapter
//!
//! Responses carry a service status in the body (`code`, `info`) and may
//! come with a non-2xx HTTP status, so the body is always decoded and the
//! HTTP status is not inspected.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::ConfigFile;
use super::ConfigFileId;
use super::ConfigFileInfo;
use super::ConfigFileTag;
use super::ConfigService;
use super::WatchResponse;
use super::WatchedVersion;
use super::TAG_KEY_USE_ENCRYPTED;
use crate::LoadBalancer;
use crate::Result;
use crate::ServerConfig;
use crate::ServiceError;

pub const CODE_EXECUTE_SUCCESS: u32 = 200000;
pub const CODE_DATA_NO_CHANGE: u32 = 200001;
pub const CODE_NOT_FOUND_RESOURCE: u32 = 400202;

pub(crate) const TOKEN_HEADER: &str = "X-Polaris-Token";

const GET_CONFIG_FILE_PATH: &str = "/config/v1/GetConfigFile";
const LIST_CONFIG_FILES_PATH: &str = "/config/v1/GetConfigFileMetadataList";
const WATCH_CONFIG_FILE_PATH: &str = "/config/v1/WatchConfigFile";

/// [`ConfigService`] over the Polaris config HTTP API.
///
/// Every request picks its endpoint through the balancer and reports
/// transport success or failure back to it.
pub struct HttpConfigService {
    http: reqwest::Client,
    balancer: Arc<dyn LoadBalancer>,
    access_token: Option<String>,
    request_timeout: Duration,
    long_poll_deadline: Duration,
}

impl HttpConfigService {
    pub fn new(
        config: &ServerConfig,
        balancer: Arc<dyn LoadBalancer>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|source| ServiceError::Transport {
                endpoint: "<client>".into(),
                source,
            })?;

        Ok(Self {
            http,
            balancer,
            access_token: config.access_token.clone().filter(|t| !t.is_empty()),
            request_timeout: config.request_timeout(),
            long_poll_deadline: config.long_poll_deadline(),
        })
    }

    /// Send one request to the next endpoint and return the response body
    async fn execute<F>(
        &self,
        operation: &'static str,
        timeout: Duration,
        build: F,
    ) -> Result<String>
    where
        F: FnOnce(&reqwest::Client, &str) -> reqwest::RequestBuilder,
    {
        let node = self.balancer.select()?;

        let mut request = build(&self.http, &node.endpoint).timeout(timeout);
        if let Some(token) = &self.access_token {
            request = request.header(TOKEN_HEADER, token);
        }

        let body = match request.send().await {
            Ok(response) => response.text().await,
            Err(e) => Err(e),
        };

        match body {
            Ok(body) => {
                self.balancer.acknowledge(&node, true);
                trace!(endpoint = %node.endpoint, operation, "request completed");
                Ok(body)
            }
            Err(source) => {
                self.balancer.acknowledge(&node, false);
                warn!(endpoint = %node.endpoint, operation, "request failed: {}", source);
                Err(ServiceError::Transport {
                    endpoint: node.endpoint,
                    source,
                }
                .into())
            }
        }
    }
}

#[async_trait]
impl ConfigService for HttpConfigService {
    async fn fetch_file(
        &self,
        id: &ConfigFileId,
    ) -> Result<Option<ConfigFile>> {
        let body = self
            .execute("GetConfigFile", self.request_timeout, |http, endpoint| {
                http.get(format!("{endpoint}{GET_CONFIG_FILE_PATH}")).query(&[
                    ("namespace", id.namespace.as_str()),
                    ("group", id.group.as_str()),
                    ("fileName", id.file_name.as_str()),
                ])
            })
            .await?;

        decode_fetch(id, &body)
    }

    async fn list_files(
        &self,
        namespace: &str,
        group: &str,
    ) -> Result<Vec<ConfigFileInfo>> {
        let request = ListRequest {
            config_file_group: WireGroup {
                namespace,
                name: group,
            },
        };
        let body = self
            .execute("GetConfigFileMetadataList", self.request_timeout, |http, endpoint| {
                http.post(format!("{endpoint}{LIST_CONFIG_FILES_PATH}")).json(&request)
            })
            .await?;

        decode_list(&body)
    }

    async fn long_poll_watch(
        &self,
        files: &[WatchedVersion],
    ) -> Result<WatchResponse> {
        let request = WatchRequest {
            watch_files: files
                .iter()
                .map(|f| WireWatchFile {
                    namespace: &f.id.namespace,
                    group: &f.id.group,
                    file_name: &f.id.file_name,
                    version: f.version,
                })
                .collect(),
        };
        let body = self
            .execute("WatchConfigFile", self.long_poll_deadline, |http, endpoint| {
                http.post(format!("{endpoint}{WATCH_CONFIG_FILE_PATH}")).json(&request)
            })
            .await?;

        decode_watch(&body)
    }
}

#[derive(Serialize)]
struct ListRequest<'a> {
    config_file_group: WireGroup<'a>,
}

#[derive(Serialize)]
struct WireGroup<'a> {
    namespace: &'a str,
    name: &'a str,
}

#[derive(Serialize)]
struct WatchRequest<'a> {
    watch_files: Vec<WireWatchFile<'a>>,
}

#[derive(Serialize)]
struct WireWatchFile<'a> {
    namespace: &'a str,
    group: &'a str,
    file_name: &'a str,
    version: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireResponse {
    code: u32,
    info: String,
    #[serde(rename = "configFile")]
    config_file: Option<WireConfigFile>,
    config_file_infos: Vec<WireConfigFile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireConfigFile {
    namespace: String,
    group: String,
    #[serde(rename = "fileName", alias = "file_name")]
    file_name: String,
    content: String,
    tags: Vec<WireTag>,
    /// Decimal string on the wire, numbers are accepted too
    version: Option<Value>,
    md5: String,
    encrypted: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireTag {
    key: String,
    value: String,
}

impl WireConfigFile {
    fn version(&self) -> u64 {
        match &self.version {
            None | Some(Value::Null) => 0,
            Some(Value::Number(n)) => n.as_u64().unwrap_or_else(|| {
                warn!(file = %self.file_name, version = %n, "invalid file version, using 0");
                0
            }),
            Some(Value::String(s)) if s.is_empty() => 0,
            Some(Value::String(s)) => s.parse().unwrap_or_else(|_| {
                warn!(file = %self.file_name, version = %s, "invalid file version, using 0");
                0
            }),
            Some(other) => {
                warn!(file = %self.file_name, version = %other, "invalid file version, using 0");
                0
            }
        }
    }

    fn into_config_file(
        self,
        id: &ConfigFileId,
    ) -> ConfigFile {
        let version = self.version();
        let tags: Vec<ConfigFileTag> = self
            .tags
            .into_iter()
            .map(|t| ConfigFileTag {
                key: t.key,
                value: t.value,
            })
            .collect();
        let tagged_encrypted = tags
            .iter()
            .any(|t| t.key == TAG_KEY_USE_ENCRYPTED && t.value.eq_ignore_ascii_case("true"));

        ConfigFile {
            id: id.clone(),
            content: self.content,
            version,
            md5: self.md5,
            encrypted: self.encrypted || tagged_encrypted,
            tags,
        }
    }
}

fn parse_response(
    operation: &'static str,
    body: &str,
) -> Result<WireResponse> {
    serde_json::from_str(body).map_err(|source| ServiceError::Decode { operation, source }.into())
}

fn status_error(
    operation: &'static str,
    response: WireResponse,
) -> crate::Error {
    ServiceError::Status {
        operation,
        code: response.code,
        info: response.info,
    }
    .into()
}

pub(crate) fn decode_fetch(
    id: &ConfigFileId,
    body: &str,
) -> Result<Option<ConfigFile>> {
    let mut response = parse_response("GetConfigFile", body)?;

    match response.code {
        CODE_EXECUTE_SUCCESS => match response.config_file.take() {
            Some(file) => Ok(Some(file.into_config_file(id))),
            None => Err(status_error("GetConfigFile", response)),
        },
        CODE_NOT_FOUND_RESOURCE => {
            debug!(file = %id, "config file not found");
            Ok(None)
        }
        _ => Err(status_error("GetConfigFile", response)),
    }
}

pub(crate) fn decode_list(body: &str) -> Result<Vec<ConfigFileInfo>> {
    let response = parse_response("GetConfigFileMetadataList", body)?;

    match response.code {
        CODE_EXECUTE_SUCCESS => Ok(response
            .config_file_infos
            .iter()
            .map(|f| ConfigFileInfo {
                file_name: f.file_name.clone(),
                version: f.version(),
            })
            .collect()),
        // An unknown group has no files
        CODE_NOT_FOUND_RESOURCE => Ok(Vec::new()),
        _ => Err(status_error("GetConfigFileMetadataList", response)),
    }
}

pub(crate) fn decode_watch(body: &str) -> Result<WatchResponse> {
    let mut response = parse_response("WatchConfigFile", body)?;

    match response.code {
        CODE_DATA_NO_CHANGE => Ok(WatchResponse::NoChange),
        CODE_EXECUTE_SUCCESS => match response.config_file.take() {
            Some(file) => {
                let version = file.version();
                Ok(WatchResponse::Changed {
                    id: ConfigFileId::new(file.namespace, file.group, file.file_name),
                    version,
                })
            }
            None => Err(status_error("WatchConfigFile", response)),
        },
        code => Ok(WatchResponse::Unrecognized {
            code,
            info: response.info,
        }),
    }
}
