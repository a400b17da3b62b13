use std::sync::Arc;

use tokio::sync::Mutex;

use super::client::{RotatingClient, SetIpParams};
use super::rotation::RequestCounters;
use crate::error::Result;
use crate::models::{RequestSpec, Response};

/// Cloneable handle that serializes logical requests over one
/// [`RotatingClient`].
///
/// Each `fetch` holds the lock for its whole retry loop, so counter updates
/// and rotations from concurrent tasks never interleave.
#[derive(Clone)]
pub struct SharedClient {
    inner: Arc<Mutex<RotatingClient>>,
}

impl SharedClient {
    pub fn new(client: RotatingClient) -> Self {
        Self {
            inner: Arc::new(Mutex::new(client)),
        }
    }

    pub async fn fetch(&self, spec: RequestSpec) -> Result<Response> {
        self.inner.lock().await.fetch(spec).await
    }

    pub async fn set_ip(&self, params: Option<SetIpParams>) -> Result<()> {
        self.inner.lock().await.set_ip(params).await?;
        Ok(())
    }

    pub async fn session_id(&self) -> Option<u64> {
        self.inner.lock().await.session_id()
    }

    pub async fn counters(&self) -> RequestCounters {
        self.inner.lock().await.counters()
    }

    pub async fn rotations(&self) -> u64 {
        self.inner.lock().await.rotations()
    }
}

impl From<RotatingClient> for SharedClient {
    fn from(client: RotatingClient) -> Self {
        Self::new(client)
    }
}
