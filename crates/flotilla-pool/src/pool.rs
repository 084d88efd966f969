//! Copy-on-write client pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use flotilla_core::Instance;
use flotilla_qbit::{QbitClient, QbitClientConfig};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::crypto::Crypter;
use crate::error::{PoolError, PoolResult};
use crate::handle::ClientHandle;

type HandleMap = HashMap<i64, Arc<ClientHandle>>;

/// Source of instance records, implemented by the instance store.
#[async_trait]
pub trait InstanceDirectory: Send + Sync {
    /// Fetch one instance by id.
    async fn instance(&self, id: i64) -> anyhow::Result<Option<Instance>>;
}

/// Shared pool mapping instance ids to live upstream sessions.
///
/// Reads load the current map snapshot without locking; every mutation
/// clones the map under an exclusive lock and publishes the clone with one
/// pointer swap, so readers never observe a torn map.
pub struct ClientPool {
    handles: ArcSwap<HandleMap>,
    write_lock: Mutex<()>,
    directory: Arc<dyn InstanceDirectory>,
    crypter: Crypter,
    request_timeout: Duration,
}

impl ClientPool {
    /// Build an empty pool over an instance directory.
    #[must_use]
    pub fn new(
        directory: Arc<dyn InstanceDirectory>,
        crypter: Crypter,
        request_timeout: Duration,
    ) -> Self {
        Self {
            handles: ArcSwap::from_pointee(HandleMap::new()),
            write_lock: Mutex::new(()),
            directory,
            crypter,
            request_timeout,
        }
    }

    /// Get the session for an instance, constructing it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InstanceNotFound`] for unknown ids,
    /// [`PoolError::InstanceDisabled`] when the operator disabled the
    /// instance, [`PoolError::Degraded`] when the session degraded, and
    /// upstream/credential failures from lazy construction.
    pub async fn get_client(&self, id: i64) -> PoolResult<Arc<ClientHandle>> {
        if let Some(handle) = self.handles.load().get(&id) {
            if handle.is_degraded() {
                return Err(PoolError::Degraded { id });
            }
            return Ok(Arc::clone(handle));
        }

        let _guard = self.write_lock.lock().await;
        // Another caller may have built the handle while we waited.
        if let Some(handle) = self.handles.load().get(&id) {
            if handle.is_degraded() {
                return Err(PoolError::Degraded { id });
            }
            return Ok(Arc::clone(handle));
        }

        let handle = Arc::new(self.construct(id).await?);
        let mut next: HandleMap = self.handles.load().as_ref().clone();
        next.insert(id, Arc::clone(&handle));
        self.handles.store(Arc::new(next));
        info!(instance_id = id, "constructed upstream session");
        Ok(handle)
    }

    async fn construct(&self, id: i64) -> PoolResult<ClientHandle> {
        let instance = self
            .directory
            .instance(id)
            .await
            .map_err(PoolError::Directory)?
            .ok_or(PoolError::InstanceNotFound { id })?;
        if !instance.enabled {
            return Err(PoolError::InstanceDisabled { id });
        }

        let password = self.crypter.decrypt(&instance.encrypted_password)?;
        let basic_auth = match (&instance.basic_username, &instance.encrypted_basic_password) {
            (Some(user), Some(encrypted)) => {
                Some((user.clone(), self.crypter.decrypt(encrypted)?))
            }
            _ => None,
        };

        let mut config =
            QbitClientConfig::new(instance.base_url, instance.username, password);
        config.basic_auth = basic_auth;
        config.tls_skip_verify = instance.tls_skip_verify;
        config.timeout = self.request_timeout;

        let client = QbitClient::connect(config).await?;
        Ok(ClientHandle::new(id, client))
    }

    /// Drop the session so the next get reconstructs it. Used after
    /// credential or URL edits.
    pub async fn invalidate(&self, id: i64) {
        let _guard = self.write_lock.lock().await;
        let mut next: HandleMap = self.handles.load().as_ref().clone();
        if next.remove(&id).is_some() {
            self.handles.store(Arc::new(next));
            debug!(instance_id = id, "invalidated upstream session");
        }
    }

    /// Remove the session permanently (instance deletion).
    pub async fn remove(&self, id: i64) {
        self.invalidate(id).await;
    }

    /// Ids with a live session, for diagnostics.
    #[must_use]
    pub fn live_instances(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.handles.load().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// The process-wide credential crypter.
    #[must_use]
    pub const fn crypter(&self) -> &Crypter {
        &self.crypter
    }
}
