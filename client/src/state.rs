//! Key/value state: get/save/delete/bulk/transaction/query with ETag and
//! consistency/concurrency options.

use std::collections::HashMap;

use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::pb;

/// Read consistency requested for a state operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Consistency {
    #[default]
    Unspecified,
    Eventual,
    Strong,
}

impl Consistency {
    fn into_wire(self) -> pb::StateOptionsConsistency {
        match self {
            Self::Unspecified => pb::StateOptionsConsistency::Unspecified,
            Self::Eventual => pb::StateOptionsConsistency::Eventual,
            Self::Strong => pb::StateOptionsConsistency::Strong,
        }
    }
}

/// Write concurrency mode requested for a state operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Concurrency {
    #[default]
    Unspecified,
    FirstWrite,
    LastWrite,
}

impl Concurrency {
    fn into_wire(self) -> pb::StateOptionsConcurrency {
        match self {
            Self::Unspecified => pb::StateOptionsConcurrency::Unspecified,
            Self::FirstWrite => pb::StateOptionsConcurrency::FirstWrite,
            Self::LastWrite => pb::StateOptionsConcurrency::LastWrite,
        }
    }
}

/// Retry pattern for a store-driven retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPattern {
    Linear,
    Exponential,
}

/// A store-side retry policy attached to a write.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub threshold: i32,
    pub interval_ms: i64,
    pub pattern: RetryPattern,
}

/// Consistency/concurrency/retry bundle for a state operation.
#[derive(Debug, Clone, Default)]
pub struct StateOptions {
    pub consistency: Consistency,
    pub concurrency: Concurrency,
    pub retry_policy: Option<RetryPolicy>,
}

impl StateOptions {
    fn into_wire(self) -> pb::StateOptions {
        pb::StateOptions {
            consistency: self.consistency.into_wire() as i32,
            concurrency: self.concurrency.into_wire() as i32,
            retry_policy: self.retry_policy.map(|rp| pb::StateRetryPolicy {
                threshold: rp.threshold,
                interval_ms: rp.interval_ms,
                pattern: match rp.pattern {
                    RetryPattern::Linear => pb::state_retry_policy::RetryPattern::Linear,
                    RetryPattern::Exponential => pb::state_retry_policy::RetryPattern::Exponential,
                } as i32,
            }),
        }
    }
}

/// A single item to persist via `save_bulk`.
#[derive(Debug, Clone)]
pub struct StateItem {
    pub key: String,
    pub value: Vec<u8>,
    pub etag: Option<String>,
    pub metadata: HashMap<String, String>,
    pub options: Option<StateOptions>,
}

impl StateItem {
    fn into_wire(self) -> pb::StateItem {
        pb::StateItem {
            key: self.key,
            value: self.value,
            etag: self.etag.unwrap_or_default(),
            metadata: self.metadata,
            options: self.options.map(StateOptions::into_wire),
        }
    }
}

/// The outcome of a single `get`.
#[derive(Debug, Clone, Default)]
pub struct StateResult {
    pub data: Vec<u8>,
    pub etag: String,
    pub metadata: HashMap<String, String>,
}

/// A single item in a `get_bulk` response, in the order requested.
#[derive(Debug, Clone)]
pub struct BulkStateItem {
    pub key: String,
    pub data: Vec<u8>,
    pub etag: String,
    pub error: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// One operation in an atomic `transaction`.
#[derive(Debug, Clone)]
pub enum TransactionOp {
    Upsert {
        key: String,
        value: Vec<u8>,
        etag: Option<String>,
        metadata: HashMap<String, String>,
    },
    Delete {
        key: String,
        etag: Option<String>,
        metadata: HashMap<String, String>,
    },
}

impl TransactionOp {
    fn into_wire(self) -> pb::TransactionalStateOperation {
        match self {
            Self::Upsert {
                key,
                value,
                etag,
                metadata,
            } => pb::TransactionalStateOperation {
                operation_type: "upsert".to_owned(),
                request: Some(pb::StateItem {
                    key,
                    value,
                    etag: etag.unwrap_or_default(),
                    metadata,
                    options: None,
                }),
            },
            Self::Delete { key, etag, metadata } => pb::TransactionalStateOperation {
                operation_type: "delete".to_owned(),
                request: Some(pb::StateItem {
                    key,
                    value: Vec::new(),
                    etag: etag.unwrap_or_default(),
                    metadata,
                    options: None,
                }),
            },
        }
    }
}

/// A single item from a `query` response.
#[derive(Debug, Clone)]
pub struct QueryStateItem {
    pub key: String,
    pub data: Vec<u8>,
    pub etag: String,
    pub error: Option<String>,
}

/// The outcome of a `query`: results, a continuation token, and metadata.
#[derive(Debug, Clone, Default)]
pub struct QueryStateResult {
    pub results: Vec<QueryStateItem>,
    pub token: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// The sidecar's verdict on an `unlock` attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockStatus {
    Success,
    LockDoesNotExist,
    LockBelongsToOthers,
    InternalError,
}

impl From<pb::UnlockResponseAlpha1Status> for UnlockStatus {
    fn from(status: pb::UnlockResponseAlpha1Status) -> Self {
        match status {
            pb::UnlockResponseAlpha1Status::UnlockSuccess => Self::Success,
            pb::UnlockResponseAlpha1Status::UnlockLockDoesNotExist => Self::LockDoesNotExist,
            pb::UnlockResponseAlpha1Status::UnlockLockBelongsToOthers => Self::LockBelongsToOthers,
            pb::UnlockResponseAlpha1Status::UnlockInternalError => Self::InternalError,
        }
    }
}

/// Typed facade over the state and distributed-lock RPCs.
#[derive(Clone)]
pub struct StateClient {
    pub(crate) inner: pb::runtime_client::RuntimeClient<tonic::transport::Channel>,
    pub(crate) envelope: Envelope,
}

impl StateClient {
    pub(crate) fn new(
        inner: pb::runtime_client::RuntimeClient<tonic::transport::Channel>,
        envelope: Envelope,
    ) -> Self {
        Self { inner, envelope }
    }

    /// Reads a single key. A missing key is not an error: it returns empty
    /// data and an empty etag.
    pub async fn get(
        &self,
        store: &str,
        key: &str,
        metadata: HashMap<String, String>,
        consistency: Consistency,
    ) -> Result<StateResult> {
        let request = self.envelope.apply(tonic::Request::new(pb::GetStateRequest {
            store_name: store.to_owned(),
            key: key.to_owned(),
            metadata,
            consistency: consistency.into_wire() as i32,
        }))?;

        let response = self
            .inner
            .clone()
            .get_state(request)
            .await
            .map_err(|e| Error::State(Box::new(e.into())))?
            .into_inner();

        Ok(StateResult {
            data: response.data,
            etag: response.etag,
            metadata: response.metadata,
        })
    }

    /// Reads many keys in one round trip, preserving the requested order.
    pub async fn get_bulk(
        &self,
        store: &str,
        keys: Vec<String>,
        parallelism: i32,
        metadata: HashMap<String, String>,
    ) -> Result<Vec<BulkStateItem>> {
        let request = self.envelope.apply(tonic::Request::new(pb::GetBulkStateRequest {
            store_name: store.to_owned(),
            keys,
            parallelism,
            metadata,
        }))?;

        let response = self
            .inner
            .clone()
            .get_bulk_state(request)
            .await
            .map_err(|e| Error::State(Box::new(e.into())))?
            .into_inner();

        Ok(response
            .items
            .into_iter()
            .map(|item| BulkStateItem {
                key: item.key,
                data: item.data,
                etag: item.etag,
                error: (!item.error.is_empty()).then_some(item.error),
                metadata: item.metadata,
            })
            .collect())
    }

    /// Saves a single value. An absent etag performs no optimistic check; an
    /// empty-string etag expects no prior value.
    pub async fn save(
        &self,
        store: &str,
        key: &str,
        value: Vec<u8>,
        etag: Option<String>,
        options: Option<StateOptions>,
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        self.save_bulk(
            store,
            vec![StateItem {
                key: key.to_owned(),
                value,
                etag,
                metadata,
                options,
            }],
        )
        .await
    }

    /// Saves many items atomically per the store's own write semantics.
    pub async fn save_bulk(&self, store: &str, items: Vec<StateItem>) -> Result<()> {
        let request = self.envelope.apply(tonic::Request::new(pb::SaveStateRequest {
            store_name: store.to_owned(),
            states: items.into_iter().map(StateItem::into_wire).collect(),
        }))?;

        self.inner
            .clone()
            .save_state(request)
            .await
            .map_err(|e| Error::State(Box::new(e.into())))?;
        Ok(())
    }

    /// Deletes a single key.
    pub async fn delete(
        &self,
        store: &str,
        key: &str,
        etag: Option<String>,
        options: Option<StateOptions>,
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        let request = self.envelope.apply(tonic::Request::new(pb::DeleteStateRequest {
            store_name: store.to_owned(),
            key: key.to_owned(),
            etag: etag.unwrap_or_default(),
            options: options.map(StateOptions::into_wire),
            metadata,
        }))?;

        self.inner
            .clone()
            .delete_state(request)
            .await
            .map_err(|e| Error::State(Box::new(e.into())))?;
        Ok(())
    }

    /// Applies a set of upsert/delete operations atomically.
    pub async fn transaction(
        &self,
        store: &str,
        ops: Vec<TransactionOp>,
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        let request = self
            .envelope
            .apply(tonic::Request::new(pb::ExecuteStateTransactionRequest {
                store_name: store.to_owned(),
                operations: ops.into_iter().map(TransactionOp::into_wire).collect(),
                metadata,
            }))?;

        self.inner
            .clone()
            .execute_state_transaction(request)
            .await
            .map_err(|e| Error::State(Box::new(e.into())))?;
        Ok(())
    }

    /// Runs a store-specific query, returning a page of results and an
    /// optional continuation token (empty means no more pages).
    pub async fn query(
        &self,
        store: &str,
        query_json: &str,
        metadata: HashMap<String, String>,
    ) -> Result<QueryStateResult> {
        let request = self.envelope.apply(tonic::Request::new(pb::QueryStateRequest {
            store_name: store.to_owned(),
            query: query_json.to_owned(),
            metadata,
        }))?;

        let response = self
            .inner
            .clone()
            .query_state_alpha1(request)
            .await
            .map_err(Error::from)?
            .into_inner();

        Ok(QueryStateResult {
            results: response
                .results
                .into_iter()
                .map(|item| QueryStateItem {
                    key: item.key,
                    data: item.data,
                    etag: item.etag,
                    error: (!item.error.is_empty()).then_some(item.error),
                })
                .collect(),
            token: (!response.token.is_empty()).then_some(response.token),
            metadata: response.metadata,
        })
    }

    /// Attempts to acquire a distributed lock. Validates inputs locally
    /// before issuing any RPC.
    pub async fn try_lock(
        &self,
        store: &str,
        resource_id: &str,
        owner: &str,
        expiry_seconds: i32,
    ) -> Result<crate::lock::LockHandle> {
        validate_lock_args(store, resource_id, owner, expiry_seconds)?;

        let request = self.envelope.apply(tonic::Request::new(pb::TryLockRequestAlpha1 {
            store_name: store.to_owned(),
            resource_id: resource_id.to_owned(),
            lock_owner: owner.to_owned(),
            expiry_in_seconds: expiry_seconds,
        }))?;

        let response = self
            .inner
            .clone()
            .try_lock_alpha1(request)
            .await
            .map_err(Error::from)?
            .into_inner();

        Ok(crate::lock::LockHandle::new(
            self.clone(),
            store.to_owned(),
            resource_id.to_owned(),
            owner.to_owned(),
            response.success,
        ))
    }

    /// Releases a previously acquired lock.
    pub async fn unlock(&self, store: &str, resource_id: &str, owner: &str) -> Result<UnlockStatus> {
        let request = self.envelope.apply(tonic::Request::new(pb::UnlockRequestAlpha1 {
            store_name: store.to_owned(),
            resource_id: resource_id.to_owned(),
            lock_owner: owner.to_owned(),
        }))?;

        let response = self
            .inner
            .clone()
            .unlock_alpha1(request)
            .await
            .map_err(|e| Error::Lock(e.to_string()))?
            .into_inner();

        Ok(pb::UnlockResponseAlpha1Status::try_from(response.status)
            .unwrap_or(pb::UnlockResponseAlpha1Status::UnlockInternalError)
            .into())
    }
}

pub(crate) fn validate_lock_args(
    store: &str,
    resource_id: &str,
    owner: &str,
    expiry_seconds: i32,
) -> Result<()> {
    if store.trim().is_empty() {
        return Err(Error::argument_invalid("store name must not be empty"));
    }
    if resource_id.trim().is_empty() {
        return Err(Error::argument_invalid("resource id must not be empty"));
    }
    if owner.trim().is_empty() {
        return Err(Error::argument_invalid("lock owner must not be empty"));
    }
    if expiry_seconds <= 0 {
        return Err(Error::argument_invalid("expiry_seconds must be positive"));
    }
    Ok(())
}
