//! Range server client
//!
//! Commands the master sends to storage nodes. The HTTP implementation posts
//! JSON to `http://{node_address}/range/...`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::error::{MasterError, Result};
use crate::metadata::{Peer, PeerId, RangeEpoch, RangeId, RangeMeta};

/// Operations the master issues against range servers
#[async_trait]
pub trait RangeServerClient: Send + Sync {
    /// Create `range` on the node at `addr`
    async fn create_range(&self, addr: &str, range: &RangeMeta) -> Result<()>;

    /// Drop the local replica `peer_id` of `range_id`
    async fn delete_range(&self, addr: &str, range_id: RangeId, peer_id: PeerId) -> Result<()>;

    /// Ask the leader at `addr` to change the membership of `range_id`
    async fn change_peer(
        &self,
        addr: &str,
        range_id: RangeId,
        epoch: RangeEpoch,
        remove: Option<Peer>,
        add: Option<Peer>,
    ) -> Result<()>;

    /// Ask the leader at `addr` to hand leadership to `to`
    async fn transfer_leader(&self, addr: &str, range_id: RangeId, to: Peer) -> Result<()>;

    /// Release connections; later calls fail with `Closed`
    fn close(&self);
}

#[derive(Serialize)]
struct CreateRangeRequest<'a> {
    range: &'a RangeMeta,
}

#[derive(Serialize)]
struct DeleteRangeRequest {
    range_id: RangeId,
    peer_id: PeerId,
}

#[derive(Serialize)]
struct ChangePeerRequest {
    range_id: RangeId,
    epoch: RangeEpoch,
    remove: Option<Peer>,
    add: Option<Peer>,
}

#[derive(Serialize)]
struct TransferLeaderRequest {
    range_id: RangeId,
    to: Peer,
}

#[derive(Deserialize)]
struct ApiResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

/// `RangeServerClient` over HTTP/JSON
pub struct HttpRangeServerClient {
    http_client: reqwest::Client,
    closed: AtomicBool,
}

impl HttpRangeServerClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MasterError::Rpc(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http_client,
            closed: AtomicBool::new(false),
        })
    }

    async fn post<T: Serialize + Sync>(&self, addr: &str, path: &str, body: &T) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MasterError::Closed);
        }
        let url = format!("http://{}/range/{}", addr, path);
        let resp: ApiResponse = self
            .http_client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| MasterError::Rpc(format!("{}: {}", url, e)))?
            .json()
            .await
            .map_err(|e| MasterError::Rpc(format!("{}: {}", url, e)))?;

        if resp.success {
            debug!("{} ok", url);
            Ok(())
        } else {
            Err(MasterError::Rpc(format!(
                "{}: {}",
                url,
                resp.error.unwrap_or_default()
            )))
        }
    }
}

#[async_trait]
impl RangeServerClient for HttpRangeServerClient {
    async fn create_range(&self, addr: &str, range: &RangeMeta) -> Result<()> {
        self.post(addr, "create", &CreateRangeRequest { range }).await
    }

    async fn delete_range(&self, addr: &str, range_id: RangeId, peer_id: PeerId) -> Result<()> {
        self.post(addr, "delete", &DeleteRangeRequest { range_id, peer_id })
            .await
    }

    async fn change_peer(
        &self,
        addr: &str,
        range_id: RangeId,
        epoch: RangeEpoch,
        remove: Option<Peer>,
        add: Option<Peer>,
    ) -> Result<()> {
        let req = ChangePeerRequest {
            range_id,
            epoch,
            remove,
            add,
        };
        self.post(addr, "change_peer", &req).await
    }

    async fn transfer_leader(&self, addr: &str, range_id: RangeId, to: Peer) -> Result<()> {
        self.post(addr, "transfer_leader", &TransferLeaderRequest { range_id, to })
            .await
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
