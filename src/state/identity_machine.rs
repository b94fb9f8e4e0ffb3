use std::time::Instant;

use thiserror::Error;
use uuid::Uuid;

use crate::{auth::AuthUser, dao::models::AccountId};

/// Identity phases the device can be in.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IdentityPhase {
    /// No provider session; progress is local-only.
    #[default]
    Unauthenticated,
    /// Provider-issued anonymous account with no credential attached.
    Anonymous { account_id: AccountId },
    /// Account backed by a real credential (OAuth or email/password).
    Linked {
        account_id: AccountId,
        email: Option<String>,
    },
}

impl IdentityPhase {
    /// Phase a provider user maps to.
    pub fn for_user(user: &AuthUser) -> Self {
        if user.is_anonymous {
            IdentityPhase::Anonymous {
                account_id: user.account_id.clone(),
            }
        } else {
            IdentityPhase::Linked {
                account_id: user.account_id.clone(),
                email: user.email.clone(),
            }
        }
    }

    pub fn account_id(&self) -> Option<&AccountId> {
        match self {
            IdentityPhase::Unauthenticated => None,
            IdentityPhase::Anonymous { account_id } | IdentityPhase::Linked { account_id, .. } => {
                Some(account_id)
            }
        }
    }

    /// Short label used by status payloads.
    pub fn label(&self) -> &'static str {
        match self {
            IdentityPhase::Unauthenticated => "unauthenticated",
            IdentityPhase::Anonymous { .. } => "anonymous",
            IdentityPhase::Linked { .. } => "linked",
        }
    }
}

/// Events that can be applied to the identity machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityEvent {
    /// The provider created an anonymous session.
    AnonymousSignedIn(AuthUser),
    /// A credential was attached to the current account; the account id is unchanged.
    CredentialLinked(AuthUser),
    /// Signed into an existing (non-anonymous) account, possibly replacing an anonymous one.
    SignedIn(AuthUser),
    /// The provider session ended.
    SignedOut,
    /// The provider reported a user outside the normal edges; adopt it as-is.
    SessionObserved(Option<AuthUser>),
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid identity transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    pub from: IdentityPhase,
    pub event: IdentityEvent,
}

/// Errors that can occur when planning a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A transition is already pending and must be applied or aborted.
    AlreadyPending,
    InvalidTransition(InvalidTransition),
}

/// Errors that can occur when applying a planned transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    NoPending,
    IdMismatch { expected: PlanId, got: PlanId },
    /// Phase changed since the plan was created.
    PhaseMismatch {
        expected: IdentityPhase,
        actual: IdentityPhase,
    },
    VersionMismatch { expected: usize, actual: usize },
}

/// Errors that can occur when aborting a planned transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortError {
    NoPending,
    IdMismatch { expected: PlanId, got: PlanId },
}

/// Identifier tying an apply or abort to the plan it settles.
pub type PlanId = Uuid;

/// A validated transition that has not been applied yet.
#[derive(Debug, Clone)]
pub struct Plan {
    pub id: PlanId,
    pub from: IdentityPhase,
    pub to: IdentityPhase,
    pub event: IdentityEvent,
    pub version_next: usize,
    pub pending_since: Instant,
}

/// Read-only view of the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub phase: IdentityPhase,
    pub version: usize,
    pub pending: Option<IdentityPhase>,
}

/// Identity state machine with two-step (plan, then apply or abort) transitions.
#[derive(Debug, Default)]
pub struct IdentityStateMachine {
    phase: IdentityPhase,
    version: usize,
    pending: Option<Plan>,
}

impl IdentityStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed phase, ignoring any pending plan.
    pub fn phase(&self) -> IdentityPhase {
        self.phase.clone()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            phase: self.phase.clone(),
            version: self.version,
            pending: self.pending.as_ref().map(|plan| plan.to.clone()),
        }
    }

    /// Validate `event` against the current phase and reserve the transition.
    pub fn plan(&mut self, event: IdentityEvent) -> Result<Plan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        let next = self
            .compute_transition(&event)
            .map_err(PlanError::InvalidTransition)?;

        let plan = Plan {
            id: Uuid::new_v4(),
            from: self.phase.clone(),
            to: next,
            event,
            version_next: self.version + 1,
            pending_since: Instant::now(),
        };
        self.pending = Some(plan.clone());
        Ok(plan)
    }

    /// Apply a planned transition and return the new phase.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<IdentityPhase, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;

        if plan.id != plan_id {
            let expected = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected,
                got: plan_id,
            });
        }

        if self.phase != plan.from {
            return Err(ApplyError::PhaseMismatch {
                expected: plan.from,
                actual: self.phase.clone(),
            });
        }

        if self.version + 1 != plan.version_next {
            return Err(ApplyError::VersionMismatch {
                expected: plan.version_next,
                actual: self.version + 1,
            });
        }

        self.phase = plan.to;
        self.version = plan.version_next;
        Ok(self.phase.clone())
    }

    /// Drop the pending plan without touching the committed phase.
    pub fn abort(&mut self, plan_id: PlanId) -> Result<(), AbortError> {
        let plan = self.pending.as_ref().ok_or(AbortError::NoPending)?;
        if plan.id != plan_id {
            return Err(AbortError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            });
        }
        self.pending = None;
        Ok(())
    }

    fn compute_transition(&self, event: &IdentityEvent) -> Result<IdentityPhase, InvalidTransition> {
        let invalid = || InvalidTransition {
            from: self.phase.clone(),
            event: event.clone(),
        };

        let next = match (&self.phase, event) {
            (_, IdentityEvent::SessionObserved(None)) | (_, IdentityEvent::SignedOut) => {
                IdentityPhase::Unauthenticated
            }
            (_, IdentityEvent::SessionObserved(Some(user))) => IdentityPhase::for_user(user),
            (IdentityPhase::Unauthenticated, IdentityEvent::AnonymousSignedIn(user))
                if user.is_anonymous =>
            {
                IdentityPhase::for_user(user)
            }
            (
                IdentityPhase::Anonymous { account_id } | IdentityPhase::Linked { account_id, .. },
                IdentityEvent::CredentialLinked(user),
            ) if !user.is_anonymous && user.account_id == *account_id => {
                IdentityPhase::for_user(user)
            }
            (
                IdentityPhase::Unauthenticated | IdentityPhase::Anonymous { .. },
                IdentityEvent::SignedIn(user),
            ) if !user.is_anonymous => IdentityPhase::for_user(user),
            _ => return Err(invalid()),
        };

        Ok(next)
    }
}
