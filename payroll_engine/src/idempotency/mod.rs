//! Idempotent mutations.
//!
//! A mutating request that carries an `Idempotency-Key` is executed at
//! most once per `(tenant, endpoint, key)`.  The coordinator decides
//! what to do with each arrival:
//!
//! ```text
//!           insert succeeds               insert rejected (key exists)
//!  start ───────────────────▶ Acquired    ──▶ compare stored request hash
//!    │                                        ├─ differs                       ─▶ Conflict
//!    └─ no key ─▶ None                        ├─ completed                     ─▶ Replay
//!                                             ├─ in progress, younger than TTL ─▶ Busy
//!                                             └─ failed, or in progress & stale ─▶ reclaim ─▶ Acquired
//! ```
//!
//! A caller holding `Acquired` must finish with exactly one of
//! [`IdempotencyCoordinator::finalize_success`] or
//! [`IdempotencyCoordinator::finalize_failure`].  A caller that crashes
//! instead leaves an in-progress record that becomes reclaimable once
//! the stale window has passed.
//!
//! No in-process locking is involved.  Exactly-once acquisition comes
//! from the store's atomic insert and conditional reclaim.

mod request;
mod store;

pub use request::{hash_payload, read_idempotency_key, IDEMPOTENCY_KEY_HEADER, MAX_KEY_CHARS};
pub use store::{IdempotencyRecord, IdempotencyScope, IdempotencyStatus, IdempotencyStore, InMemoryIdempotencyStore};

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::error::StoreError;

/// Default age after which an in-progress record may be reclaimed.
pub const DEFAULT_STALE_WINDOW_SECS: i64 = 5 * 60;

/// What the caller should do with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// No key supplied; proceed without de-duplication.
    None,
    /// This request owns the key and must finalise it.
    Acquired(IdempotencyScope),
    /// An identical request is still being processed.
    Busy,
    /// The key was used with a different payload.
    Conflict,
    /// The original request completed; return its response verbatim.
    Replay { status: u16, body: String },
}

pub struct IdempotencyCoordinator {
    store: Arc<dyn IdempotencyStore>,
    stale_window: Duration,
}

impl IdempotencyCoordinator {
    pub fn new(store: Arc<dyn IdempotencyStore>) -> Self {
        Self {
            store,
            stale_window: Duration::seconds(DEFAULT_STALE_WINDOW_SECS),
        }
    }

    pub fn with_stale_window(mut self, stale_window: Duration) -> Self {
        self.stale_window = stale_window;
        self
    }

    /// Decide how to handle a request arriving now.
    pub async fn resolve(
        &self,
        tenant_id: &str,
        actor: &str,
        endpoint: &str,
        key: Option<&str>,
        request_hash: &str,
    ) -> Result<Resolution, StoreError> {
        self.resolve_at(tenant_id, actor, endpoint, key, request_hash, Utc::now())
            .await
    }

    /// [`Self::resolve`] with an explicit clock reading.
    pub async fn resolve_at(
        &self,
        tenant_id: &str,
        actor: &str,
        endpoint: &str,
        key: Option<&str>,
        request_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Resolution, StoreError> {
        let Some(key) = key else {
            return Ok(Resolution::None);
        };
        let scope = IdempotencyScope::new(tenant_id, endpoint, key);

        let fresh = IdempotencyRecord::in_progress(scope.clone(), request_hash, actor, now);
        match self.store.insert(fresh).await {
            Ok(()) => {
                tracing::debug!(%scope, "idempotency key acquired");
                return Ok(Resolution::Acquired(scope));
            }
            Err(StoreError::Duplicate(_)) => {}
            Err(err) => return Err(err),
        }

        let existing = self
            .store
            .get(&scope)
            .await?
            .ok_or_else(|| StoreError::Backend(format!("idempotency record vanished: {scope}")))?;

        if existing.request_hash != request_hash {
            tracing::info!(%scope, "idempotency key reused with a different payload");
            return Ok(Resolution::Conflict);
        }

        if existing.status == IdempotencyStatus::Completed {
            if let (Some(status), Some(body)) = (existing.response_code, existing.response_body.clone()) {
                tracing::debug!(%scope, status, "replaying stored response");
                return Ok(Resolution::Replay { status, body });
            }
        }

        let age = now - existing.updated_at;
        if existing.status == IdempotencyStatus::InProgress && age < self.stale_window {
            return Ok(Resolution::Busy);
        }

        if existing.status == IdempotencyStatus::InProgress {
            tracing::warn!(%scope, age_secs = age.num_seconds(), "reclaiming stale idempotency record");
        }
        if self.store.reacquire(&existing, request_hash, actor, now).await? {
            Ok(Resolution::Acquired(scope))
        } else {
            // Another request reclaimed it first.
            Ok(Resolution::Busy)
        }
    }

    /// Record the response to replay for future retries.
    pub async fn finalize_success(
        &self,
        scope: &IdempotencyScope,
        status: u16,
        body: String,
    ) -> Result<(), StoreError> {
        self.store.complete(scope, status, body, Utc::now()).await
    }

    /// Mark the attempt failed so that a retry can re-acquire the key.
    pub async fn finalize_failure(
        &self,
        scope: &IdempotencyScope,
        status: u16,
        error_body: String,
    ) -> Result<(), StoreError> {
        self.store.fail(scope, status, error_body, Utc::now()).await
    }
}
