//! Distributed lock handle: a scoped resource with a guaranteed best-effort
//! release obligation on drop, plus an explicit async release.

use tracing::warn;

use crate::error::Result;
use crate::state::{StateClient, UnlockStatus};

/// A lock acquired (or not) via `StateClient::try_lock`.
///
/// `success = false` means the lock was not acquired and carries no release
/// obligation. A handle that *was* acquired releases itself on drop via a
/// best-effort spawned task if `release()` was never called explicitly;
/// double release is not an error to the caller.
pub struct LockHandle {
    client: StateClient,
    store: String,
    resource_id: String,
    owner: String,
    success: bool,
    released: bool,
}

impl LockHandle {
    pub(crate) fn new(
        client: StateClient,
        store: String,
        resource_id: String,
        owner: String,
        success: bool,
    ) -> Self {
        Self {
            client,
            store,
            resource_id,
            owner,
            success,
            released: false,
        }
    }

    /// Whether the lock was actually acquired.
    #[must_use]
    pub fn success(&self) -> bool {
        self.success
    }

    #[must_use]
    pub fn store(&self) -> &str {
        &self.store
    }

    #[must_use]
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Explicitly releases the lock. Safe to call even if the lock was not
    /// acquired (a no-op) or was already released (observed by the sidecar
    /// as `lock_does_not_exist`, not surfaced as an error here).
    pub async fn release(mut self) -> Result<UnlockStatus> {
        self.released = true;
        if !self.success {
            return Ok(UnlockStatus::LockDoesNotExist);
        }
        self.client.unlock(&self.store, &self.resource_id, &self.owner).await
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if self.released || !self.success {
            return;
        }
        self.released = true;

        let client = self.client.clone();
        let store = self.store.clone();
        let resource_id = self.resource_id.clone();
        let owner = self.owner.clone();

        tokio::spawn(async move {
            if let Err(err) = client.unlock(&store, &resource_id, &owner).await {
                warn!(error = %err, store, resource_id, "best-effort lock release on drop failed");
            }
        });
    }
}
