//! Two-phase reservation protocol for fixed-cost operations.
//!
//! A reservation is a held, not-yet-final claim against a workspace
//! balance. It transitions `held → committed` or `held → released` exactly
//! once; a second transition attempt is a typed error, never a silent
//! success. The [`ReservationGuard`] guarantees the release path runs on
//! every exit — including panics and hard cancellation — by arming a
//! best-effort release on drop.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::credits::TurnAttribution;
use crate::error::Error;

/// Lifecycle state of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Held,
    Committed,
    Released,
}

/// A held, committed, or released claim against a workspace balance.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub id: Uuid,
    pub workspace: String,
    pub principal: String,
    pub amount_micro: i64,
    pub status: ReservationStatus,
    pub attribution: TurnAttribution,
    /// Commit artifact metadata or release reason, set by the terminal
    /// transition.
    pub outcome: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Parameters for placing a hold.
#[derive(Debug, Clone)]
pub struct ReserveRequest {
    pub workspace: String,
    pub principal: String,
    pub amount_micro: i64,
    pub attribution: TurnAttribution,
}

/// Trait for reservation persistence backends.
///
/// The backend must make reserve/commit/release atomic at its storage
/// layer — concurrent turns on one workspace may race these operations.
/// Uses `Pin<Box<dyn Future>>` for dyn-compatibility.
pub trait ReservationBackend: Send + Sync {
    /// Place a hold. The only expected failure is
    /// [`Error::InsufficientCredits`]; it is terminal for the operation.
    fn reserve(
        &self,
        request: ReserveRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Reservation, Error>> + Send + '_>>;

    /// Convert a held reservation into a permanent debit, attaching
    /// metadata that ties the charge to the produced artifact.
    fn commit(
        &self,
        id: Uuid,
        metadata: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>>;

    /// Refund a held reservation.
    fn release(
        &self,
        id: Uuid,
        reason: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>>;
}

/// Thin protocol wrapper over a [`ReservationBackend`].
///
/// Hands out [`ReservationGuard`]s so that a hold can never be leaked by
/// an early return or a cancelled future.
#[derive(Clone)]
pub struct ReservationManager {
    backend: Arc<dyn ReservationBackend>,
}

impl ReservationManager {
    pub fn new(backend: Arc<dyn ReservationBackend>) -> Self {
        Self { backend }
    }

    /// Place a hold, returning a guard that releases it on drop.
    pub async fn reserve(&self, request: ReserveRequest) -> Result<ReservationGuard, Error> {
        let reservation = self.backend.reserve(request).await?;
        tracing::debug!(
            reservation = %reservation.id,
            workspace = %reservation.workspace,
            amount = reservation.amount_micro,
            "reservation held"
        );
        Ok(ReservationGuard {
            backend: Arc::clone(&self.backend),
            id: reservation.id,
            armed: true,
        })
    }

    /// Commit a reservation by id. Used by recovery paths that no longer
    /// hold the guard; normal flows commit through the guard.
    pub async fn commit(&self, id: Uuid, metadata: serde_json::Value) -> Result<(), Error> {
        let result = self.backend.commit(id, metadata).await;
        if let Err(Error::ReservationAlreadyCommitted(_)) = &result {
            tracing::error!(reservation = %id, "commit on already-committed reservation");
        }
        result
    }

    /// Release a reservation by id. See [`ReservationManager::commit`].
    pub async fn release(&self, id: Uuid, reason: serde_json::Value) -> Result<(), Error> {
        let result = self.backend.release(id, reason).await;
        if let Err(Error::ReservationAlreadyCommitted(_)) = &result {
            tracing::error!(
                reservation = %id,
                "release on already-committed reservation: dual-success state"
            );
        }
        result
    }
}

/// Owns a held reservation until it is committed or released.
///
/// `commit` and `release` consume the guard. Dropping an armed guard —
/// early return, panic, or a future dropped by hard cancellation — spawns
/// a best-effort release so the hold cannot leak. Outside a Tokio runtime
/// the drop path can only log the leak.
pub struct ReservationGuard {
    backend: Arc<dyn ReservationBackend>,
    id: Uuid,
    armed: bool,
}

impl ReservationGuard {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Commit the hold with artifact metadata.
    ///
    /// The guard disarms as soon as commit is attempted: on failure the
    /// caller owns the cleanup decision explicitly (the release-on-failure
    /// path of the metered operation), and an automatic drop-release would
    /// race it.
    pub async fn commit(mut self, metadata: serde_json::Value) -> Result<(), Error> {
        self.armed = false;
        let result = self.backend.commit(self.id, metadata).await;
        if let Err(Error::ReservationAlreadyCommitted(_)) = &result {
            tracing::error!(reservation = %self.id, "commit on already-committed reservation");
        }
        result
    }

    /// Release the hold with a reason.
    pub async fn release(mut self, reason: serde_json::Value) -> Result<(), Error> {
        self.armed = false;
        let result = self.backend.release(self.id, reason).await;
        if let Err(Error::ReservationAlreadyCommitted(_)) = &result {
            tracing::error!(
                reservation = %self.id,
                "release on already-committed reservation: dual-success state"
            );
        }
        result
    }
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let backend = Arc::clone(&self.backend);
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(reservation = %id, "guard dropped while armed, releasing");
                handle.spawn(async move {
                    let reason = serde_json::json!({
                        "reason": "reservation guard dropped before commit or release"
                    });
                    if let Err(e) = backend.release(id, reason).await {
                        tracing::error!(reservation = %id, error = %e, "drop-release failed");
                    }
                });
            }
            Err(_) => {
                tracing::error!(reservation = %id, "guard dropped outside runtime, hold leaked");
            }
        }
    }
}
