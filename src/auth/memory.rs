//! In-process identity provider used when no external service is wired, and by tests.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use futures::future::BoxFuture;
use tokio::sync::watch;
use uuid::Uuid;

use super::{AuthError, AuthErrorCode, AuthProvider, AuthResult, AuthUser, EmailCredential, OAuthProvider};
use crate::dao::models::AccountId;

/// Operations whose next call can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthOperation {
    SignInAnonymously,
    LinkWithPopup,
    SignInWithPopup,
    LinkWithRedirect,
    SignInWithRedirect,
    RedirectResult,
    LinkWithEmail,
    CreateUserWithEmail,
    SignInWithEmail,
    SignOut,
}

struct EmailAccount {
    password: String,
    account_id: AccountId,
}

#[derive(Default)]
struct ProviderState {
    current: Option<AuthUser>,
    anonymous_disabled: bool,
    popup_failure: Option<AuthErrorCode>,
    google_identity: Option<String>,
    google_accounts: HashMap<String, AccountId>,
    email_accounts: HashMap<String, EmailAccount>,
    emails_by_account: HashMap<AccountId, String>,
    pending_redirect: Option<AuthResult<AuthUser>>,
    injected: HashMap<AuthOperation, AuthError>,
    latency: Option<Duration>,
    calls: Vec<AuthOperation>,
}

/// Identity provider holding users in memory.
///
/// The "Google" account returned by OAuth flows is chosen with
/// [`MemoryAuthProvider::set_google_identity`]; popups can be made to fail with
/// [`MemoryAuthProvider::set_popup_failure`] to exercise the redirect fallback.
#[derive(Clone)]
pub struct MemoryAuthProvider {
    state: Arc<Mutex<ProviderState>>,
    users: Arc<watch::Sender<Option<AuthUser>>>,
}

impl Default for MemoryAuthProvider {
    fn default() -> Self {
        let (users, _) = watch::channel(None);
        Self {
            state: Arc::default(),
            users: Arc::new(users),
        }
    }
}

impl MemoryAuthProvider {
    /// Provider with no users, no accounts and anonymous sign-in enabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Google identity (its email) the next OAuth flow resolves to.
    pub fn set_google_identity(&self, email: impl Into<String>) {
        self.lock().google_identity = Some(email.into());
    }

    /// Register an existing account owning `email` on the Google provider.
    pub fn seed_google_account(&self, email: &str) -> AccountId {
        let mut state = self.lock();
        let account_id = new_account_id();
        state.google_accounts.insert(email.to_owned(), account_id.clone());
        state.emails_by_account.insert(account_id.clone(), email.to_owned());
        account_id
    }

    /// Register an existing email/password account.
    pub fn seed_email_account(&self, email: &str, password: &str) -> AccountId {
        let mut state = self.lock();
        let account_id = new_account_id();
        state.email_accounts.insert(
            email.to_owned(),
            EmailAccount {
                password: password.to_owned(),
                account_id: account_id.clone(),
            },
        );
        state.emails_by_account.insert(account_id.clone(), email.to_owned());
        account_id
    }

    /// Make every popup call fail with `code` until cleared.
    pub fn set_popup_failure(&self, code: Option<AuthErrorCode>) {
        self.lock().popup_failure = code;
    }

    /// Allow or refuse anonymous sign-in.
    pub fn set_anonymous_enabled(&self, enabled: bool) {
        self.lock().anonymous_disabled = !enabled;
    }

    /// Fail the next call of `operation` with `error`.
    pub fn fail_next(&self, operation: AuthOperation, error: AuthError) {
        self.lock().injected.insert(operation, error);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    /// Operations invoked so far, in call order.
    pub fn calls(&self) -> Vec<AuthOperation> {
        self.lock().calls.clone()
    }

    /// Pretend a previous page load already left a signed-in user behind.
    pub fn restore_session(&self, user: AuthUser) {
        self.lock().current = Some(user.clone());
        self.publish(Some(user));
    }

    /// Change the signed-in user behind the engine's back, as another tab or an
    /// expired token would.
    pub fn switch_user(&self, user: Option<AuthUser>) {
        self.lock().current = user.clone();
        self.publish(user);
    }

    fn publish(&self, user: Option<AuthUser>) {
        self.users.send_if_modified(|current| {
            if *current == user {
                return false;
            }
            *current = user;
            true
        });
    }

    fn lock(&self) -> MutexGuard<'_, ProviderState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn call<T, F>(&self, operation: AuthOperation, body: F) -> BoxFuture<'static, AuthResult<T>>
    where
        T: Send + 'static,
        F: FnOnce(&mut ProviderState) -> AuthResult<T> + Send + 'static,
    {
        let provider = self.clone();
        Box::pin(async move {
            let latency = provider.lock().latency;
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }

            let (result, current) = {
                let mut state = provider.lock();
                state.calls.push(operation);
                if let Some(error) = state.injected.remove(&operation) {
                    return Err(error);
                }
                let result = body(&mut state);
                (result, state.current.clone())
            };
            provider.publish(current);
            result
        })
    }
}

impl ProviderState {
    fn current_or_err(&self) -> AuthResult<AuthUser> {
        self.current
            .clone()
            .ok_or_else(|| AuthError::new(AuthErrorCode::NoCurrentUser, "no user is signed in"))
    }

    fn popup_check(&self) -> AuthResult<()> {
        match &self.popup_failure {
            Some(code) => Err(AuthError::new(code.clone(), "the sign-in popup did not complete")),
            None => Ok(()),
        }
    }

    fn google_identity(&self) -> AuthResult<String> {
        self.google_identity.clone().ok_or_else(|| {
            AuthError::new(AuthErrorCode::PopupClosedByUser, "no Google account was chosen")
        })
    }

    fn link_google(&mut self) -> AuthResult<AuthUser> {
        let current = self.current_or_err()?;
        let identity = self.google_identity()?;
        if let Some(owner) = self.google_accounts.get(&identity) {
            if *owner != current.account_id {
                return Err(AuthError::new(
                    AuthErrorCode::CredentialAlreadyInUse,
                    "this credential is already associated with a different user account",
                ));
            }
        }
        self.google_accounts
            .insert(identity.clone(), current.account_id.clone());
        let email = current.email.clone().unwrap_or(identity);
        self.emails_by_account
            .insert(current.account_id.clone(), email.clone());
        let user = AuthUser::linked(current.account_id, Some(email));
        self.current = Some(user.clone());
        Ok(user)
    }

    fn sign_in_google(&mut self) -> AuthResult<AuthUser> {
        let identity = self.google_identity()?;
        let account_id = self
            .google_accounts
            .entry(identity.clone())
            .or_insert_with(new_account_id)
            .clone();
        let email = self
            .emails_by_account
            .entry(account_id.clone())
            .or_insert(identity)
            .clone();
        let user = AuthUser::linked(account_id, Some(email));
        self.current = Some(user.clone());
        Ok(user)
    }

    fn ensure_email_free(&self, email: &str) -> AuthResult<()> {
        if self.email_accounts.contains_key(email) {
            return Err(AuthError::new(
                AuthErrorCode::EmailAlreadyInUse,
                "the email address is already in use by another account",
            ));
        }
        Ok(())
    }
}

impl AuthProvider for MemoryAuthProvider {
    fn current_user(&self) -> Option<AuthUser> {
        self.lock().current.clone()
    }

    fn sign_in_anonymously(&self) -> BoxFuture<'static, AuthResult<AuthUser>> {
        self.call(AuthOperation::SignInAnonymously, |state| {
            if state.anonymous_disabled {
                return Err(AuthError::new(
                    AuthErrorCode::OperationNotAllowed,
                    "anonymous sign-in is disabled",
                ));
            }
            let user = AuthUser::anonymous(new_account_id());
            state.current = Some(user.clone());
            Ok(user)
        })
    }

    fn link_with_popup(&self, _provider: OAuthProvider) -> BoxFuture<'static, AuthResult<AuthUser>> {
        self.call(AuthOperation::LinkWithPopup, |state| {
            state.popup_check()?;
            state.link_google()
        })
    }

    fn sign_in_with_popup(&self, _provider: OAuthProvider) -> BoxFuture<'static, AuthResult<AuthUser>> {
        self.call(AuthOperation::SignInWithPopup, |state| {
            state.popup_check()?;
            state.sign_in_google()
        })
    }

    fn link_with_redirect(&self, _provider: OAuthProvider) -> BoxFuture<'static, AuthResult<()>> {
        self.call(AuthOperation::LinkWithRedirect, |state| {
            let before = state.current_or_err()?;
            let outcome = state.link_google();
            // The user only changes once the redirect outcome is collected.
            state.current = Some(before);
            state.pending_redirect = Some(outcome);
            Ok(())
        })
    }

    fn sign_in_with_redirect(&self, _provider: OAuthProvider) -> BoxFuture<'static, AuthResult<()>> {
        self.call(AuthOperation::SignInWithRedirect, |state| {
            let before = state.current.clone();
            let outcome = state.sign_in_google();
            state.current = before;
            state.pending_redirect = Some(outcome);
            Ok(())
        })
    }

    fn redirect_result(&self) -> BoxFuture<'static, AuthResult<Option<AuthUser>>> {
        self.call(AuthOperation::RedirectResult, |state| {
            let user = state.pending_redirect.take().transpose()?;
            if let Some(user) = &user {
                state.current = Some(user.clone());
            }
            Ok(user)
        })
    }

    fn watch_user(&self) -> watch::Receiver<Option<AuthUser>> {
        self.users.subscribe()
    }

    fn link_with_email(&self, credential: EmailCredential) -> BoxFuture<'static, AuthResult<AuthUser>> {
        self.call(AuthOperation::LinkWithEmail, move |state| {
            let current = state.current_or_err()?;
            state.ensure_email_free(&credential.email)?;
            state.email_accounts.insert(
                credential.email.clone(),
                EmailAccount {
                    password: credential.password,
                    account_id: current.account_id.clone(),
                },
            );
            let email = current.email.clone().unwrap_or(credential.email);
            state
                .emails_by_account
                .insert(current.account_id.clone(), email.clone());
            let user = AuthUser::linked(current.account_id, Some(email));
            state.current = Some(user.clone());
            Ok(user)
        })
    }

    fn create_user_with_email(&self, credential: EmailCredential) -> BoxFuture<'static, AuthResult<AuthUser>> {
        self.call(AuthOperation::CreateUserWithEmail, move |state| {
            state.ensure_email_free(&credential.email)?;
            let account_id = new_account_id();
            state.email_accounts.insert(
                credential.email.clone(),
                EmailAccount {
                    password: credential.password,
                    account_id: account_id.clone(),
                },
            );
            state
                .emails_by_account
                .insert(account_id.clone(), credential.email.clone());
            let user = AuthUser::linked(account_id, Some(credential.email));
            state.current = Some(user.clone());
            Ok(user)
        })
    }

    fn sign_in_with_email(&self, credential: EmailCredential) -> BoxFuture<'static, AuthResult<AuthUser>> {
        self.call(AuthOperation::SignInWithEmail, move |state| {
            let account_id = match state.email_accounts.get(&credential.email) {
                Some(account) if account.password == credential.password => account.account_id.clone(),
                _ => {
                    return Err(AuthError::new(
                        AuthErrorCode::InvalidCredential,
                        "the email or password is incorrect",
                    ));
                }
            };
            let email = state
                .emails_by_account
                .get(&account_id)
                .cloned()
                .unwrap_or(credential.email);
            let user = AuthUser::linked(account_id, Some(email));
            state.current = Some(user.clone());
            Ok(user)
        })
    }

    fn sign_out(&self) -> BoxFuture<'static, AuthResult<()>> {
        self.call(AuthOperation::SignOut, |state| {
            state.current = None;
            Ok(())
        })
    }
}

fn new_account_id() -> AccountId {
    AccountId::new(Uuid::new_v4().simple().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn linking_keeps_the_anonymous_account_id() {
        let provider = MemoryAuthProvider::new();
        provider.set_google_identity("ada@example.com");
        let anon = provider.sign_in_anonymously().await.unwrap();

        let linked = provider.link_with_popup(OAuthProvider::Google).await.unwrap();
        assert_eq!(linked.account_id, anon.account_id);
        assert!(!linked.is_anonymous);
        assert_eq!(linked.email.as_deref(), Some("ada@example.com"));
    }

    #[tokio::test]
    async fn linking_an_owned_identity_reports_credential_in_use() {
        let provider = MemoryAuthProvider::new();
        let existing = provider.seed_google_account("ada@example.com");
        provider.set_google_identity("ada@example.com");
        provider.sign_in_anonymously().await.unwrap();

        let err = provider.link_with_popup(OAuthProvider::Google).await.unwrap_err();
        assert_eq!(err.code, AuthErrorCode::CredentialAlreadyInUse);

        let user = provider.sign_in_with_popup(OAuthProvider::Google).await.unwrap();
        assert_eq!(user.account_id, existing);
    }

    #[tokio::test]
    async fn redirect_outcome_is_consumed_once() {
        let provider = MemoryAuthProvider::new();
        provider.set_google_identity("ada@example.com");
        provider.sign_in_with_redirect(OAuthProvider::Google).await.unwrap();
        assert_eq!(provider.current_user(), None);

        let user = provider.redirect_result().await.unwrap().unwrap();
        assert_eq!(provider.current_user(), Some(user));
        assert!(provider.redirect_result().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn user_changes_are_published_once() {
        let provider = MemoryAuthProvider::new();
        let mut users = provider.watch_user();

        let anon = provider.sign_in_anonymously().await.unwrap();
        assert!(users.has_changed().unwrap());
        assert_eq!(*users.borrow_and_update(), Some(anon.clone()));

        provider.restore_session(anon);
        assert!(!users.has_changed().unwrap());

        provider.switch_user(None);
        assert!(users.has_changed().unwrap());
        assert_eq!(*users.borrow_and_update(), None);
    }

    #[tokio::test]
    async fn injected_failures_fire_once() {
        let provider = MemoryAuthProvider::new();
        provider.fail_next(
            AuthOperation::SignInAnonymously,
            AuthError::new(AuthErrorCode::NetworkRequestFailed, "offline"),
        );
        assert!(provider.sign_in_anonymously().await.is_err());
        assert!(provider.sign_in_anonymously().await.is_ok());
    }

    #[tokio::test]
    async fn email_sign_in_checks_password() {
        let provider = MemoryAuthProvider::new();
        let id = provider.seed_email_account("bo@example.com", "secret");
        let err = provider
            .sign_in_with_email(EmailCredential::new("bo@example.com", "nope").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.code, AuthErrorCode::InvalidCredential);

        let user = provider
            .sign_in_with_email(EmailCredential::new("bo@example.com", "secret").unwrap())
            .await
            .unwrap();
        assert_eq!(user.account_id, id);
    }
}
