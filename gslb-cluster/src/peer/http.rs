use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use gslb_core::config::{ClusterConfig, PeerConfig};
use gslb_core::models::HostUpdate;

use super::PeerTransport;
use crate::error::{Error, Result};

/// reqwest-backed peer client authenticating with this cluster's api key
pub struct HttpPeerTransport {
    http_client: Client,
    api_key: String,
    peers: Vec<PeerConfig>,
}

impl HttpPeerTransport {
    pub fn new(api_key: String, peers: Vec<PeerConfig>, request_timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("gslb/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http_client,
            api_key,
            peers,
        })
    }

    pub fn from_config(config: &ClusterConfig) -> Result<Self> {
        Self::new(
            config.api_key.clone(),
            config
                .peers
                .iter()
                .filter(|peer| peer.cluster_identifier != config.identifier)
                .cloned()
                .collect(),
            config.peer_request_timeout(),
        )
    }

    fn endpoint(peer: &PeerConfig, path: &str) -> String {
        format!("{}/{path}", peer.url.trim_end_matches('/'))
    }

    async fn post(&self, peer: &PeerConfig, request: reqwest::RequestBuilder) -> Result<()> {
        request
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| Error::peer(&peer.cluster_identifier, e.to_string()))?
            .error_for_status()
            .map_err(|e| Error::peer(&peer.cluster_identifier, e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl PeerTransport for HttpPeerTransport {
    fn peers(&self) -> Vec<PeerConfig> {
        self.peers.clone()
    }

    async fn post_heartbeat(&self, peer: &PeerConfig) -> Result<()> {
        let request = self.http_client.post(Self::endpoint(peer, "Heartbeat"));
        self.post(peer, request).await
    }

    async fn post_host(&self, peer: &PeerConfig, update: &HostUpdate) -> Result<()> {
        let request = self
            .http_client
            .post(Self::endpoint(peer, "Host"))
            .json(update);
        self.post(peer, request).await
    }
}
