//! Per-item purchase state machine.
//!
//! `PurchaseLifecycle` is a pure aggregate: it decides which transitions a
//! command causes and evolves its state from the resulting events. The engine
//! performs the store, validator and persistence calls around it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use entitle_catalog::ItemKind;
use entitle_core::{
    Aggregate, AggregateRoot, AttemptId, BuildEnvironment, DomainError, ItemId, TransactionId,
};
use entitle_events::Event;
use entitle_infra::ValidationVerdict;

use crate::error::PurchaseError;

/// A purchase request the store has not answered yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPurchase {
    pub item_id: ItemId,
    pub kind: ItemKind,
    pub attempt_id: AttemptId,
    pub created_at: DateTime<Utc>,
}

impl PendingPurchase {
    /// Whether the request is older than `ttl` at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        (now - self.created_at)
            .to_std()
            .is_ok_and(|age| age >= ttl)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PurchaseState {
    Idle,
    Pending(PendingPurchase),
    Validating {
        transaction_id: TransactionId,
        /// `None` when the transaction was not started in this session
        /// (redelivery after a restart).
        attempt_id: Option<AttemptId>,
        started_at: DateTime<Utc>,
    },
}

impl PurchaseState {
    pub fn is_in_flight(&self) -> bool {
        !matches!(self, PurchaseState::Idle)
    }
}

/// How the last purchase flow for an item ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseOutcome {
    Entitled { transaction_id: TransactionId },
    Rejected(PurchaseError),
    Cancelled,
}

/// Point-in-time view of an item's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleSnapshot {
    pub state: PurchaseState,
    pub last_outcome: Option<PurchaseOutcome>,
}

impl LifecycleSnapshot {
    pub fn idle() -> Self {
        Self {
            state: PurchaseState::Idle,
            last_outcome: None,
        }
    }
}

/// Aggregate root: the purchase lifecycle of one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseLifecycle {
    item_id: ItemId,
    state: PurchaseState,
    last_outcome: Option<PurchaseOutcome>,
    version: u64,
}

impl PurchaseLifecycle {
    pub fn new(item_id: ItemId) -> Self {
        Self {
            item_id,
            state: PurchaseState::Idle,
            last_outcome: None,
            version: 0,
        }
    }

    pub fn state(&self) -> &PurchaseState {
        &self.state
    }

    pub fn last_outcome(&self) -> Option<&PurchaseOutcome> {
        self.last_outcome.as_ref()
    }

    pub fn snapshot(&self) -> LifecycleSnapshot {
        LifecycleSnapshot {
            state: self.state.clone(),
            last_outcome: self.last_outcome.clone(),
        }
    }

    /// Attempt that started the flow currently in progress, if any.
    pub fn attempt_id(&self) -> Option<AttemptId> {
        match &self.state {
            PurchaseState::Idle => None,
            PurchaseState::Pending(pending) => Some(pending.attempt_id),
            PurchaseState::Validating { attempt_id, .. } => *attempt_id,
        }
    }
}

impl AggregateRoot for PurchaseLifecycle {
    type Id = ItemId;

    fn id(&self) -> &Self::Id {
        &self.item_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RequestPurchase {
    pub kind: ItemKind,
    pub attempt_id: AttemptId,
    pub requested_at: DateTime<Utc>,
    /// Age after which an unanswered request may be replaced.
    pub stale_after: Duration,
}

/// Roll back a request the store never accepted.
#[derive(Debug, Clone)]
pub struct AbandonRequest {
    pub attempt_id: AttemptId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct BeginValidation {
    pub transaction_id: TransactionId,
    pub started_at: DateTime<Utc>,
}

/// The transaction was acknowledged; the item is entitled.
#[derive(Debug, Clone)]
pub struct Complete {
    pub transaction_id: TransactionId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Cancel {
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Fail {
    pub error: PurchaseError,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum LifecycleCommand {
    RequestPurchase(RequestPurchase),
    AbandonRequest(AbandonRequest),
    BeginValidation(BeginValidation),
    Complete(Complete),
    Cancel(Cancel),
    Fail(Fail),
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseRequested {
    pub item_id: ItemId,
    pub kind: ItemKind,
    pub attempt_id: AttemptId,
    /// Stale attempt this request replaced.
    pub replaced: Option<AttemptId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestAbandoned {
    pub item_id: ItemId,
    pub attempt_id: AttemptId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationStarted {
    pub item_id: ItemId,
    pub transaction_id: TransactionId,
    pub attempt_id: Option<AttemptId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseEntitled {
    pub item_id: ItemId,
    pub transaction_id: TransactionId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseCancelled {
    pub item_id: ItemId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseRejected {
    pub item_id: ItemId,
    pub error: PurchaseError,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    PurchaseRequested(PurchaseRequested),
    RequestAbandoned(RequestAbandoned),
    ValidationStarted(ValidationStarted),
    PurchaseEntitled(PurchaseEntitled),
    PurchaseCancelled(PurchaseCancelled),
    PurchaseRejected(PurchaseRejected),
}

impl Event for LifecycleEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LifecycleEvent::PurchaseRequested(_) => "purchases.lifecycle.requested",
            LifecycleEvent::RequestAbandoned(_) => "purchases.lifecycle.abandoned",
            LifecycleEvent::ValidationStarted(_) => "purchases.lifecycle.validation_started",
            LifecycleEvent::PurchaseEntitled(_) => "purchases.lifecycle.entitled",
            LifecycleEvent::PurchaseCancelled(_) => "purchases.lifecycle.cancelled",
            LifecycleEvent::PurchaseRejected(_) => "purchases.lifecycle.rejected",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LifecycleEvent::PurchaseRequested(e) => e.occurred_at,
            LifecycleEvent::RequestAbandoned(e) => e.occurred_at,
            LifecycleEvent::ValidationStarted(e) => e.occurred_at,
            LifecycleEvent::PurchaseEntitled(e) => e.occurred_at,
            LifecycleEvent::PurchaseCancelled(e) => e.occurred_at,
            LifecycleEvent::PurchaseRejected(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PurchaseLifecycle {
    type Command = LifecycleCommand;
    type Event = LifecycleEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            LifecycleEvent::PurchaseRequested(e) => {
                self.state = PurchaseState::Pending(PendingPurchase {
                    item_id: e.item_id.clone(),
                    kind: e.kind,
                    attempt_id: e.attempt_id,
                    created_at: e.occurred_at,
                });
            }
            LifecycleEvent::RequestAbandoned(_) => {
                self.state = PurchaseState::Idle;
            }
            LifecycleEvent::ValidationStarted(e) => {
                self.state = PurchaseState::Validating {
                    transaction_id: e.transaction_id.clone(),
                    attempt_id: e.attempt_id,
                    started_at: e.occurred_at,
                };
            }
            LifecycleEvent::PurchaseEntitled(e) => {
                self.state = PurchaseState::Idle;
                self.last_outcome = Some(PurchaseOutcome::Entitled {
                    transaction_id: e.transaction_id.clone(),
                });
            }
            LifecycleEvent::PurchaseCancelled(_) => {
                self.state = PurchaseState::Idle;
                self.last_outcome = Some(PurchaseOutcome::Cancelled);
            }
            LifecycleEvent::PurchaseRejected(e) => {
                self.state = PurchaseState::Idle;
                self.last_outcome = Some(PurchaseOutcome::Rejected(e.error.clone()));
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            LifecycleCommand::RequestPurchase(cmd) => self.handle_request(cmd),
            LifecycleCommand::AbandonRequest(cmd) => self.handle_abandon(cmd),
            LifecycleCommand::BeginValidation(cmd) => self.handle_begin_validation(cmd),
            LifecycleCommand::Complete(cmd) => self.handle_complete(cmd),
            LifecycleCommand::Cancel(cmd) => Ok(self.handle_cancel(cmd)),
            LifecycleCommand::Fail(cmd) => Ok(self.handle_fail(cmd)),
        }
    }
}

impl PurchaseLifecycle {
    fn handle_request(&self, cmd: &RequestPurchase) -> Result<Vec<LifecycleEvent>, DomainError> {
        let replaced = match &self.state {
            PurchaseState::Idle => None,
            PurchaseState::Pending(pending)
                if pending.is_stale(cmd.requested_at, cmd.stale_after) =>
            {
                Some(pending.attempt_id)
            }
            PurchaseState::Pending(_) | PurchaseState::Validating { .. } => {
                return Err(DomainError::in_flight(self.item_id.to_string()));
            }
        };

        Ok(vec![LifecycleEvent::PurchaseRequested(PurchaseRequested {
            item_id: self.item_id.clone(),
            kind: cmd.kind,
            attempt_id: cmd.attempt_id,
            replaced,
            occurred_at: cmd.requested_at,
        })])
    }

    fn handle_abandon(&self, cmd: &AbandonRequest) -> Result<Vec<LifecycleEvent>, DomainError> {
        match &self.state {
            PurchaseState::Pending(pending) if pending.attempt_id == cmd.attempt_id => {
                Ok(vec![LifecycleEvent::RequestAbandoned(RequestAbandoned {
                    item_id: self.item_id.clone(),
                    attempt_id: cmd.attempt_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
            // The store already answered (or a newer attempt replaced it).
            _ => Ok(Vec::new()),
        }
    }

    fn handle_begin_validation(
        &self,
        cmd: &BeginValidation,
    ) -> Result<Vec<LifecycleEvent>, DomainError> {
        let attempt_id = match &self.state {
            PurchaseState::Idle => None,
            PurchaseState::Pending(pending) => Some(pending.attempt_id),
            PurchaseState::Validating { transaction_id, .. } => {
                return Err(DomainError::illegal_transition(format!(
                    "{} is already validating transaction {transaction_id}",
                    self.item_id
                )));
            }
        };

        Ok(vec![LifecycleEvent::ValidationStarted(ValidationStarted {
            item_id: self.item_id.clone(),
            transaction_id: cmd.transaction_id.clone(),
            attempt_id,
            occurred_at: cmd.started_at,
        })])
    }

    fn handle_complete(&self, cmd: &Complete) -> Result<Vec<LifecycleEvent>, DomainError> {
        match &self.state {
            PurchaseState::Validating { transaction_id, .. }
                if transaction_id == &cmd.transaction_id =>
            {
                Ok(vec![LifecycleEvent::PurchaseEntitled(PurchaseEntitled {
                    item_id: self.item_id.clone(),
                    transaction_id: cmd.transaction_id.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
            _ => Err(DomainError::illegal_transition(format!(
                "{} is not validating transaction {}",
                self.item_id, cmd.transaction_id
            ))),
        }
    }

    fn handle_cancel(&self, cmd: &Cancel) -> Vec<LifecycleEvent> {
        if !self.state.is_in_flight() {
            return Vec::new();
        }
        vec![LifecycleEvent::PurchaseCancelled(PurchaseCancelled {
            item_id: self.item_id.clone(),
            occurred_at: cmd.occurred_at,
        })]
    }

    fn handle_fail(&self, cmd: &Fail) -> Vec<LifecycleEvent> {
        if !self.state.is_in_flight() {
            return Vec::new();
        }
        vec![LifecycleEvent::PurchaseRejected(PurchaseRejected {
            item_id: self.item_id.clone(),
            error: cmd.error.clone(),
            occurred_at: cmd.occurred_at,
        })]
    }
}

/// What to do with a validation verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Grant,
    /// `InvalidReceiptData` accepted because the build is not production.
    GrantDiagnostic,
    Reject,
}

pub fn decide(verdict: ValidationVerdict, environment: BuildEnvironment) -> Decision {
    match verdict {
        ValidationVerdict::Valid => Decision::Grant,
        ValidationVerdict::InvalidReceiptData if environment.grants_invalid_receipts() => {
            Decision::GrantDiagnostic
        }
        ValidationVerdict::InvalidReceiptData | ValidationVerdict::ServiceError => {
            Decision::Reject
        }
    }
}
