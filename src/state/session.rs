use tokio::sync::watch;

use crate::{dao::models::AccountId, state::identity_machine::IdentityPhase};

/// Committed identity as seen by the sync engine.
///
/// An absent `account_id` means "no session yet", which is distinct from an anonymous session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Session {
    pub account_id: Option<AccountId>,
    pub is_anonymous: bool,
    pub email: Option<String>,
}

impl From<&IdentityPhase> for Session {
    fn from(phase: &IdentityPhase) -> Self {
        match phase {
            IdentityPhase::Unauthenticated => Session::default(),
            IdentityPhase::Anonymous { account_id } => Session {
                account_id: Some(account_id.clone()),
                is_anonymous: true,
                email: None,
            },
            IdentityPhase::Linked { account_id, email } => Session {
                account_id: Some(account_id.clone()),
                is_anonymous: false,
                email: email.clone(),
            },
        }
    }
}

/// Holder of the committed [`Session`]; readers always observe the latest committed value.
pub struct SessionContext {
    sender: watch::Sender<Session>,
}

impl SessionContext {
    pub fn new() -> Self {
        let (sender, _rx) = watch::channel(Session::default());
        Self { sender }
    }

    /// Latest committed session.
    pub fn current(&self) -> Session {
        self.sender.borrow().clone()
    }

    pub fn account_id(&self) -> Option<AccountId> {
        self.sender.borrow().account_id.clone()
    }

    /// Watch for session commits.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.sender.subscribe()
    }

    /// Replace the committed session, returning whether it changed.
    pub(crate) fn commit(&self, session: Session) -> bool {
        self.sender.send_if_modified(|current| {
            if *current == session {
                return false;
            }
            *current = session;
            true
        })
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}
