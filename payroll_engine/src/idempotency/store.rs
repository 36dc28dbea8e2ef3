//! Idempotency record storage.
//!
//! The coordinator relies on the store for its only concurrency
//! guarantee: [`IdempotencyStore::insert`] must be atomic and unique on
//! the composite key, and [`IdempotencyStore::reacquire`] must be a
//! compare-and-set against the record the caller observed.  A
//! database-backed implementation gets this from a unique constraint and
//! a conditional `UPDATE ... WHERE status = $observed AND updated_at =
//! $observed`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::error::StoreError;

/// Composite key of an idempotency record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyScope {
    pub tenant_id: String,
    pub endpoint: String,
    pub key: String,
}

impl IdempotencyScope {
    pub fn new(tenant_id: impl Into<String>, endpoint: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            endpoint: endpoint.into(),
            key: key.into(),
        }
    }
}

impl std::fmt::Display for IdempotencyScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}#{}", self.tenant_id, self.endpoint, self.key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    InProgress,
    Completed,
    Failed,
}

/// One de-duplicated request.  Records are updated in place and never
/// deleted here; retention is handled elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub scope: IdempotencyScope,
    pub request_hash: String,
    pub status: IdempotencyStatus,
    pub response_code: Option<u16>,
    /// Serialised JSON body of the completed response, replayed verbatim.
    pub response_body: Option<String>,
    pub error_body: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub created_by: String,
}

impl IdempotencyRecord {
    /// A fresh in-progress record.
    pub fn in_progress(
        scope: IdempotencyScope,
        request_hash: impl Into<String>,
        actor: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            scope,
            request_hash: request_hash.into(),
            status: IdempotencyStatus::InProgress,
            response_code: None,
            response_body: None,
            error_body: None,
            updated_at: now,
            created_by: actor.into(),
        }
    }
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync + 'static {
    /// Insert a new record.  Returns `Err(StoreError::Duplicate)` when a
    /// record with the same scope exists; only one of several concurrent
    /// inserts may succeed.
    async fn insert(&self, record: IdempotencyRecord) -> Result<(), StoreError>;

    async fn get(&self, scope: &IdempotencyScope) -> Result<Option<IdempotencyRecord>, StoreError>;

    /// Reset a failed or abandoned record to in-progress, clearing any
    /// stored response.  Returns `Ok(false)` without writing if the
    /// stored record no longer has the observed status and timestamp.
    async fn reacquire(
        &self,
        observed: &IdempotencyRecord,
        request_hash: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn complete(
        &self,
        scope: &IdempotencyScope,
        response_code: u16,
        response_body: String,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn fail(
        &self,
        scope: &IdempotencyScope,
        response_code: u16,
        error_body: String,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Process-local store.  The mutex makes insert-if-absent atomic within
/// one process, which is enough for tests and single-node deployments.
#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    records: Mutex<HashMap<IdempotencyScope, IdempotencyRecord>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn insert(&self, record: IdempotencyRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        match records.entry(record.scope.clone()) {
            std::collections::hash_map::Entry::Occupied(_) => Err(StoreError::Duplicate(record.scope.to_string())),
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn get(&self, scope: &IdempotencyScope) -> Result<Option<IdempotencyRecord>, StoreError> {
        Ok(self.records.lock().await.get(scope).cloned())
    }

    async fn reacquire(
        &self,
        observed: &IdempotencyRecord,
        request_hash: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut records = self.records.lock().await;
        let Some(record) = records.get_mut(&observed.scope) else {
            return Err(StoreError::NotFound(observed.scope.to_string()));
        };
        if record.status != observed.status || record.updated_at != observed.updated_at {
            return Ok(false);
        }
        record.status = IdempotencyStatus::InProgress;
        record.request_hash = request_hash.to_string();
        record.response_code = None;
        record.response_body = None;
        record.error_body = None;
        record.created_by = actor.to_string();
        record.updated_at = now;
        Ok(true)
    }

    async fn complete(
        &self,
        scope: &IdempotencyScope,
        response_code: u16,
        response_body: String,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(scope)
            .ok_or_else(|| StoreError::NotFound(scope.to_string()))?;
        record.status = IdempotencyStatus::Completed;
        record.response_code = Some(response_code);
        record.response_body = Some(response_body);
        record.error_body = None;
        record.updated_at = now;
        Ok(())
    }

    async fn fail(
        &self,
        scope: &IdempotencyScope,
        response_code: u16,
        error_body: String,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(scope)
            .ok_or_else(|| StoreError::NotFound(scope.to_string()))?;
        record.status = IdempotencyStatus::Failed;
        record.response_code = Some(response_code);
        record.error_body = Some(error_body);
        record.updated_at = now;
        Ok(())
    }
}
