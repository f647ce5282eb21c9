use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::ConfigClientBuilder;
use super::ConfigFile;
use super::ConfigFileId;
use super::ConfigFileInfo;
use super::ConfigService;
use super::ContentDecryptor;
use crate::watch::WatchContext;
use crate::ConfWatchConfig;
use crate::ConfigFilesWatcher;
use crate::Result;
use crate::WatchCoordinator;
use crate::WatchError;

/// Handle to a remote config service.
///
/// Every watcher and coordinator created here derives its cancellation
/// from this handle; [`shutdown`](ConfigClient::shutdown) stops them all,
/// and so does dropping the handle.
pub struct ConfigClient {
    ctx: WatchContext,
    shutdown: CancellationToken,
}

impl ConfigClient {
    /// Builder for an HTTP client over `config.server.addresses`
    pub fn builder(config: ConfWatchConfig) -> ConfigClientBuilder {
        ConfigClientBuilder::new(config)
    }

    /// Client over an existing service implementation
    pub fn with_service(
        service: Arc<dyn ConfigService>,
        config: ConfWatchConfig,
    ) -> Self {
        Self {
            ctx: WatchContext {
                service,
                config: Arc::new(config),
                decryptor: None,
            },
            shutdown: CancellationToken::new(),
        }
    }

    pub(crate) fn set_decryptor(
        &mut self,
        decryptor: Option<Arc<dyn ContentDecryptor>>,
    ) {
        self.ctx.decryptor = decryptor;
    }

    /// Same client with encrypted files going through `decryptor`
    pub fn with_decryptor(
        mut self,
        decryptor: impl ContentDecryptor + 'static,
    ) -> Self {
        self.ctx.decryptor = Some(Arc::new(decryptor));
        self
    }

    pub fn config(&self) -> &ConfWatchConfig {
        &self.ctx.config
    }

    pub fn service(&self) -> Arc<dyn ConfigService> {
        self.ctx.service.clone()
    }

    /// Released state of a file, `None` if absent
    pub async fn get_config_file(
        &self,
        namespace: &str,
        group: &str,
        file_name: &str,
    ) -> Result<Option<ConfigFile>> {
        if file_name.is_empty() {
            return Err(WatchError::EmptyFileName.into());
        }
        self.ctx.service.fetch_file(&ConfigFileId::new(namespace, group, file_name)).await
    }

    /// Decrypted content of a file, `None` if absent
    pub async fn get_config_content(
        &self,
        namespace: &str,
        group: &str,
        file_name: &str,
    ) -> Result<Option<String>> {
        let file = self.get_config_file(namespace, group, file_name).await?;
        Ok(file.map(|f| f.decoded_content(self.ctx.decryptor())))
    }

    pub async fn list_config_files(
        &self,
        namespace: &str,
        group: &str,
    ) -> Result<Vec<ConfigFileInfo>> {
        self.ctx.service.list_files(namespace, group).await
    }

    /// Watch `file_names` of one group with a single long-poll loop
    pub async fn watch_config_files(
        &self,
        namespace: &str,
        group: &str,
        file_names: &[String],
    ) -> Result<ConfigFilesWatcher> {
        if self.shutdown.is_cancelled() {
            return Err(WatchError::ShuttingDown.into());
        }
        ConfigFilesWatcher::start(&self.ctx, namespace, group, file_names, Vec::new(), &self.shutdown).await
    }

    /// New key-value coordinator sharing this client's service
    pub fn coordinator(&self) -> WatchCoordinator {
        WatchCoordinator::new(self.ctx.clone(), &self.shutdown)
    }

    /// Stop every watcher and coordinator created from this client
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!("shutting down config client");
        }
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for ConfigClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
