//! Transport to peer nodes
//!
//! Replication only needs two calls: push a batch of records and pull a full
//! snapshot. `HttpPeerClient` maps them onto the peer HTTP endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;

use registrar_api::{
    PushEventsRequest, PushEventsResponse, RegistrySnapshot, ReplicationRecord, RestResult,
};
use registrar_common::error::NODE_NOT_READY;
use registrar_common::{RegistrarError, RegistrarResult};

/// Peer push endpoint
pub const PEER_EVENTS_PATH: &str = "/peer/events";

/// Peer snapshot endpoint
pub const PEER_SNAPSHOT_PATH: &str = "/peer/snapshot";

#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Deliver records authored by `origin`; a single event is a batch of one
    async fn push_events(
        &self,
        peer: &str,
        origin: &str,
        records: &[ReplicationRecord],
    ) -> RegistrarResult<PushEventsResponse>;

    /// Fetch the full registry state of `peer`
    async fn pull_snapshot(&self, peer: &str) -> RegistrarResult<RegistrySnapshot>;
}

/// reqwest based peer transport
pub struct HttpPeerClient {
    client: Client,
}

impl HttpPeerClient {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> RegistrarResult<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| RegistrarError::Config(format!("cannot build peer client: {}", e)))?;
        Ok(Self { client })
    }

    /// `host:port` or a full URL, without trailing slash
    fn url(peer: &str, path: &str) -> String {
        let base = peer.trim_end_matches('/');
        if base.starts_with("http://") || base.starts_with("https://") {
            format!("{}{}", base, path)
        } else {
            format!("http://{}{}", base, path)
        }
    }

    async fn decode<T: DeserializeOwned>(
        peer: &str,
        response: reqwest::Response,
    ) -> RegistrarResult<T> {
        let status = response.status();
        let body: RestResult<T> = response
            .json()
            .await
            .map_err(|e| RegistrarError::peer_unreachable(peer, format!("bad response: {}", e)))?;
        if body.code == NODE_NOT_READY.code {
            return Err(RegistrarError::NotReady(body.message.unwrap_or_default()));
        }
        if !status.is_success() || !body.is_success() {
            return Err(RegistrarError::peer_unreachable(
                peer,
                format!(
                    "status {} code {}: {}",
                    status,
                    body.code,
                    body.message.unwrap_or_default()
                ),
            ));
        }
        body.data
            .ok_or_else(|| RegistrarError::peer_unreachable(peer, "empty response body"))
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn push_events(
        &self,
        peer: &str,
        origin: &str,
        records: &[ReplicationRecord],
    ) -> RegistrarResult<PushEventsResponse> {
        let request = PushEventsRequest {
            origin: origin.to_string(),
            records: records.to_vec(),
        };
        debug!(peer, count = records.len(), "Pushing replication batch");
        let response = self
            .client
            .post(Self::url(peer, PEER_EVENTS_PATH))
            .json(&request)
            .send()
            .await
            .map_err(|e| RegistrarError::peer_unreachable(peer, e))?;
        Self::decode(peer, response).await
    }

    async fn pull_snapshot(&self, peer: &str) -> RegistrarResult<RegistrySnapshot> {
        let response = self
            .client
            .get(Self::url(peer, PEER_SNAPSHOT_PATH))
            .send()
            .await
            .map_err(|e| RegistrarError::peer_unreachable(peer, e))?;
        Self::decode(peer, response).await
    }
}
