//! Narrow state-manager interface for an actor runtime to call into. The
//! actor runtime itself (HTTP binding, turn-based concurrency, reentrancy)
//! is out of scope; this is only the subset of the state subsystem such a
//! runtime needs.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::state::StateClient;

/// A single key/value pair to write via `set_bulk`.
#[derive(Debug, Clone)]
pub struct ActorStateEntry {
    pub key: String,
    pub value: Vec<u8>,
}

/// The kind of change an actor runtime has recorded for a piece of actor
/// state since it was last saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChangeKind {
    Add,
    Update,
    Remove,
}

/// One recorded change to an actor's state, as an actor runtime's
/// change-tracker would hand to `set_bulk`/`remove` before a save.
#[derive(Debug, Clone)]
pub struct StateChange {
    pub key: String,
    pub value_json: String,
    pub kind: StateChangeKind,
}

/// The state operations an actor runtime needs from the state subsystem.
#[async_trait]
pub trait ActorStateClient: Send + Sync {
    async fn contains(&self, actor_type: &str, actor_id: &str, key: &str) -> Result<bool>;
    async fn get(&self, actor_type: &str, actor_id: &str, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, actor_type: &str, actor_id: &str, key: &str, value: Vec<u8>) -> Result<()>;
    async fn remove(&self, actor_type: &str, actor_id: &str, key: &str) -> Result<()>;
    async fn set_bulk(&self, actor_type: &str, actor_id: &str, entries: Vec<ActorStateEntry>) -> Result<()>;
}

fn scoped_key(actor_type: &str, actor_id: &str, key: &str) -> String {
    format!("{actor_type}||{actor_id}||{key}")
}

#[async_trait]
impl ActorStateClient for StateClient {
    async fn contains(&self, actor_type: &str, actor_id: &str, key: &str) -> Result<bool> {
        let result = StateClient::get(
            self,
            "actorstore",
            &scoped_key(actor_type, actor_id, key),
            HashMap::new(),
            crate::state::Consistency::Unspecified,
        )
        .await?;
        Ok(!result.etag.is_empty())
    }

    async fn get(&self, actor_type: &str, actor_id: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let result = StateClient::get(
            self,
            "actorstore",
            &scoped_key(actor_type, actor_id, key),
            HashMap::new(),
            crate::state::Consistency::Unspecified,
        )
        .await?;
        Ok((!result.etag.is_empty()).then_some(result.data))
    }

    async fn set(&self, actor_type: &str, actor_id: &str, key: &str, value: Vec<u8>) -> Result<()> {
        StateClient::save(
            self,
            "actorstore",
            &scoped_key(actor_type, actor_id, key),
            value,
            None,
            None,
            HashMap::new(),
        )
        .await
    }

    async fn remove(&self, actor_type: &str, actor_id: &str, key: &str) -> Result<()> {
        StateClient::delete(
            self,
            "actorstore",
            &scoped_key(actor_type, actor_id, key),
            None,
            None,
            HashMap::new(),
        )
        .await
    }

    async fn set_bulk(&self, actor_type: &str, actor_id: &str, entries: Vec<ActorStateEntry>) -> Result<()> {
        let items = entries
            .into_iter()
            .map(|entry| crate::state::StateItem {
                key: scoped_key(actor_type, actor_id, &entry.key),
                value: entry.value,
                etag: None,
                metadata: HashMap::new(),
                options: None,
            })
            .collect();
        StateClient::save_bulk(self, "actorstore", items).await
    }
}
