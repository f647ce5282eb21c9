use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::ConfigClient;
use super::ContentDecryptor;
use super::HttpConfigService;
use crate::resolve_nodes;
use crate::BalancerError;
use crate::ConfWatchConfig;
use crate::LoadBalancer;
use crate::Result;
use crate::WeightedRoundRobin;

pub struct ConfigClientBuilder {
    config: ConfWatchConfig,
    decryptor: Option<Arc<dyn ContentDecryptor>>,
    balancer: Option<Arc<dyn LoadBalancer>>,
}

impl ConfigClientBuilder {
    /// Create a new builder over `config`
    pub fn new(config: ConfWatchConfig) -> Self {
        Self {
            config,
            decryptor: None,
            balancer: None,
        }
    }

    /// Replace the service endpoints (`http://host:port`)
    pub fn addresses(
        mut self,
        addresses: Vec<String>,
    ) -> Self {
        self.config.server.addresses = addresses;
        self
    }

    /// Set the static `X-Polaris-Token` header value
    pub fn access_token(
        mut self,
        token: impl Into<String>,
    ) -> Self {
        self.config.server.access_token = Some(token.into());
        self
    }

    /// Set request timeout (default: 3s)
    pub fn request_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.server.request_timeout_in_ms = timeout.as_millis() as u64;
        self
    }

    /// Decrypt encrypted files with `decryptor`.
    ///
    /// Without one, encrypted files are delivered as stored.
    pub fn decryptor(
        mut self,
        decryptor: impl ContentDecryptor + 'static,
    ) -> Self {
        self.decryptor = Some(Arc::new(decryptor));
        self
    }

    /// Route requests through `balancer` instead of resolving
    /// `server.addresses` into a [`WeightedRoundRobin`]
    pub fn balancer(
        mut self,
        balancer: Arc<dyn LoadBalancer>,
    ) -> Self {
        self.balancer = Some(balancer);
        self
    }

    /// Validate the configuration, resolve endpoints and build the client
    pub async fn build(self) -> Result<ConfigClient> {
        let config = self.config.validate()?;

        let balancer = match self.balancer {
            Some(balancer) => balancer,
            None => {
                let weight = i64::from(config.server.node_weight);
                let nodes = resolve_nodes(&config.server.addresses, weight).await?;
                if nodes.is_empty() {
                    return Err(BalancerError::EmptyNodeSet.into());
                }
                info!(endpoints = nodes.len(), "resolved config service endpoints");
                Arc::new(WeightedRoundRobin::with_nodes(nodes)?)
            }
        };

        let service = HttpConfigService::new(&config.server, balancer)?;
        let mut client = ConfigClient::with_service(Arc::new(service), config);
        client.set_decryptor(self.decryptor);
        Ok(client)
    }
}
