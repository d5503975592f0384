//! In-memory credit backend implementing both the ledger and the
//! reservation protocol over a single lock, so reserve/commit/release are
//! atomic with respect to balance reads. Suitable for tests and
//! single-process use; production deployments wire a persistent backend
//! with the same atomicity at its storage layer.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

use chrono::Utc;
use uuid::Uuid;

use crate::credits::budget;
use crate::credits::reservation::{
    Reservation, ReservationBackend, ReservationStatus, ReserveRequest,
};
use crate::credits::{AdmissionDenial, CheckRequest, CreditCheck, CreditLedger, DebitRequest};
use crate::error::Error;

#[derive(Debug, Clone)]
struct WorkspaceAccount {
    balance_micro: i64,
    /// `None` = no feature restriction.
    features: Option<BTreeSet<String>>,
    /// `None` = any model with known pricing.
    models: Option<BTreeSet<String>>,
}

#[derive(Default)]
struct State {
    accounts: HashMap<String, WorkspaceAccount>,
    reservations: HashMap<Uuid, Reservation>,
}

/// Thread-safe in-memory ledger + reservation backend.
#[derive(Default)]
pub struct InMemoryCredits {
    state: RwLock<State>,
}

impl InMemoryCredits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a workspace allocation with the given balance and no
    /// feature/model restrictions.
    pub fn with_workspace(self, workspace: impl Into<String>, balance_micro: i64) -> Self {
        {
            let mut state = self.state.write().expect("state lock poisoned");
            state.accounts.insert(
                workspace.into(),
                WorkspaceAccount {
                    balance_micro,
                    features: None,
                    models: None,
                },
            );
        }
        self
    }

    /// Restrict a workspace to the named features.
    pub fn with_allowed_features<I, S>(self, workspace: &str, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut state = self.state.write().expect("state lock poisoned");
            if let Some(account) = state.accounts.get_mut(workspace) {
                account.features = Some(features.into_iter().map(Into::into).collect());
            }
        }
        self
    }

    /// Restrict a workspace to the named models.
    pub fn with_allowed_models<I, S>(self, workspace: &str, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut state = self.state.write().expect("state lock poisoned");
            if let Some(account) = state.accounts.get_mut(workspace) {
                account.models = Some(models.into_iter().map(Into::into).collect());
            }
        }
        self
    }

    /// Current balance for a workspace. Test helper.
    pub fn balance_micro(&self, workspace: &str) -> Option<i64> {
        self.state
            .read()
            .ok()
            .and_then(|s| s.accounts.get(workspace).map(|a| a.balance_micro))
    }

    /// Look up a reservation by id. Test helper.
    pub fn reservation(&self, id: Uuid) -> Option<Reservation> {
        self.state.read().ok().and_then(|s| s.reservations.get(&id).cloned())
    }

    /// All reservations ever placed, in no particular order. Test helper.
    pub fn reservations(&self) -> Vec<Reservation> {
        self.state
            .read()
            .map(|s| s.reservations.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl CreditLedger for InMemoryCredits {
    fn check(
        &self,
        request: CheckRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CreditCheck, Error>> + Send + '_>> {
        Box::pin(async move {
            let state = match self.state.read() {
                Ok(state) => state,
                Err(_) => {
                    // Fail closed: an unreadable allocation is no allocation.
                    return Ok(CreditCheck::denied(AdmissionDenial::NoAllocation));
                }
            };

            let Some(account) = state.accounts.get(&request.workspace) else {
                return Ok(CreditCheck::denied(AdmissionDenial::NoAllocation));
            };

            if let Some(features) = &account.features {
                if !features.contains(&request.feature) {
                    return Ok(CreditCheck::denied(AdmissionDenial::FeatureNotAllowed));
                }
            }

            let model_allowed = match &account.models {
                Some(models) => models.contains(&request.model),
                None => true,
            };
            if !model_allowed || budget::unit_pricing(&request.model).is_none() {
                return Ok(CreditCheck::denied(AdmissionDenial::ModelNotAllowed));
            }

            match budget::affordable_output_units(&request.model, account.balance_micro) {
                Some(max_output_units) => {
                    Ok(CreditCheck::allowed(account.balance_micro, max_output_units))
                }
                None => Ok(CreditCheck::denied(AdmissionDenial::CreditsExhausted)),
            }
        })
    }

    fn debit(
        &self,
        request: DebitRequest,
    ) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>> {
        Box::pin(async move {
            let cost = budget::usage_cost_micro(&request.attribution.model, &request.usage)
                .ok_or_else(|| {
                    Error::Ledger(format!(
                        "no pricing for model {}",
                        request.attribution.model
                    ))
                })?;

            let mut state = self
                .state
                .write()
                .map_err(|e| Error::Ledger(format!("lock poisoned: {e}")))?;
            let account = state
                .accounts
                .get_mut(&request.workspace)
                .ok_or_else(|| Error::Ledger(format!("no account: {}", request.workspace)))?;

            // Debit is post-hoc accounting; the balance may dip negative
            // here and subsequent admission checks will deny.
            account.balance_micro -= cost;
            tracing::debug!(
                workspace = %request.workspace,
                turn = %request.attribution.turn_id,
                cost_micro = cost,
                balance_micro = account.balance_micro,
                "debited turn usage"
            );
            Ok(())
        })
    }
}

impl ReservationBackend for InMemoryCredits {
    fn reserve(
        &self,
        request: ReserveRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Reservation, Error>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self
                .state
                .write()
                .map_err(|e| Error::Ledger(format!("lock poisoned: {e}")))?;

            let account = state
                .accounts
                .get_mut(&request.workspace)
                .ok_or_else(|| Error::Ledger(format!("no account: {}", request.workspace)))?;

            if account.balance_micro < request.amount_micro {
                return Err(Error::InsufficientCredits {
                    required: request.amount_micro,
                    available: account.balance_micro,
                });
            }
            account.balance_micro -= request.amount_micro;

            let reservation = Reservation {
                id: Uuid::new_v4(),
                workspace: request.workspace,
                principal: request.principal,
                amount_micro: request.amount_micro,
                status: ReservationStatus::Held,
                attribution: request.attribution,
                outcome: None,
                created_at: Utc::now(),
            };
            state.reservations.insert(reservation.id, reservation.clone());
            Ok(reservation)
        })
    }

    fn commit(
        &self,
        id: Uuid,
        metadata: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self
                .state
                .write()
                .map_err(|e| Error::Ledger(format!("lock poisoned: {e}")))?;
            let reservation = state
                .reservations
                .get_mut(&id)
                .ok_or(Error::ReservationNotFound(id))?;

            match reservation.status {
                ReservationStatus::Committed => Err(Error::ReservationAlreadyCommitted(id)),
                ReservationStatus::Released => Err(Error::ReservationAlreadyReleased(id)),
                ReservationStatus::Held => {
                    // The hold already moved the money; commit makes it final.
                    reservation.status = ReservationStatus::Committed;
                    reservation.outcome = Some(metadata);
                    Ok(())
                }
            }
        })
    }

    fn release(
        &self,
        id: Uuid,
        reason: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self
                .state
                .write()
                .map_err(|e| Error::Ledger(format!("lock poisoned: {e}")))?;

            let reservation = state
                .reservations
                .get_mut(&id)
                .ok_or(Error::ReservationNotFound(id))?;

            match reservation.status {
                ReservationStatus::Committed => Err(Error::ReservationAlreadyCommitted(id)),
                ReservationStatus::Released => Err(Error::ReservationAlreadyReleased(id)),
                ReservationStatus::Held => {
                    reservation.status = ReservationStatus::Released;
                    reservation.outcome = Some(reason);
                    let (workspace, amount) =
                        (reservation.workspace.clone(), reservation.amount_micro);
                    if let Some(account) = state.accounts.get_mut(&workspace) {
                        account.balance_micro += amount;
                    }
                    Ok(())
                }
            }
        })
    }
}
