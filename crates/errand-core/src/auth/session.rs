use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use reqwest::Response;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{check_response, ApiClient, ApiError, RequestOptions};
use crate::models::{AuthStatus, UserIdentity};

/// Who is using the application right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Startup identity load has not finished
    Loading,
    Authenticated(UserIdentity),
    Anonymous,
}

impl SessionState {
    pub fn user(&self) -> Option<&UserIdentity> {
        match self {
            SessionState::Authenticated(user) => Some(user),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, SessionState::Loading)
    }
}

/// Process-wide session: the current identity, sign-in and sign-out.
///
/// Views hold a clone and either snapshot [`state`](Self::state) or watch
/// [`subscribe`](Self::subscribe). `Anonymous` means protected content must
/// not be shown.
#[derive(Clone)]
pub struct SessionContext {
    api: ApiClient,
    state: Arc<watch::Sender<SessionState>>,
    following: Arc<AtomicBool>,
}

impl SessionContext {
    /// New context in the `Loading` state. Call [`start`](Self::start) to
    /// resolve it.
    pub fn new(api: ApiClient) -> Self {
        let (state, _) = watch::channel(SessionState::Loading);
        Self {
            api,
            state: Arc::new(state),
            following: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run the startup identity load and begin following the credential
    /// store, so that a failed refresh anywhere signs the session out.
    /// Calling it again only repeats the identity load.
    pub async fn start(&self) -> Result<SessionState, ApiError> {
        self.follow_credentials();
        self.load_identity().await
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn user(&self) -> Option<UserIdentity> {
        self.state.borrow().user().cloned()
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Authenticated request through the shared executor.
    pub async fn request(&self, target: &str, options: RequestOptions) -> Result<Response, ApiError> {
        self.api.request(target, options).await
    }

    /// Ask the server who we are and settle on `Authenticated` or
    /// `Anonymous`.
    ///
    /// Having no stored credentials is not an error. Any failure to load the
    /// identity is returned after the state has settled on `Anonymous`; a
    /// transport failure keeps the stored credentials so a later load can
    /// still succeed.
    pub async fn load_identity(&self) -> Result<SessionState, ApiError> {
        self.resolve_identity().await?;
        Ok(self.state())
    }

    /// Sign in with email and password.
    ///
    /// On success the new credentials are stored and the identity reloaded.
    /// A rejected sign-in returns the server's field errors as
    /// [`ApiError::Validation`] and leaves no one signed in.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<UserIdentity, ApiError> {
        let pair = match self.api.accounts().obtain_pair(email, password).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "Sign-in rejected");
                self.state.send_if_modified(|state| {
                    if state.is_loading() {
                        *state = SessionState::Anonymous;
                        true
                    } else {
                        false
                    }
                });
                return Err(e);
            }
        };

        self.api.store().save(pair);
        let user = self
            .resolve_identity()
            .await?
            .ok_or(ApiError::Unauthenticated)?;
        info!(user_id = user.id, "Signed in");
        Ok(user)
    }

    /// Forget the credentials and become `Anonymous`. No network involved.
    pub fn sign_out(&self) {
        self.api.store().clear();
        self.state.send_replace(SessionState::Anonymous);
        info!("Signed out");
    }

    // `Ok(None)`: no stored credentials, nothing was sent.
    async fn resolve_identity(&self) -> Result<Option<UserIdentity>, ApiError> {
        let store = self.api.store();
        if store.load_access().is_none() {
            debug!("No stored credentials; session is anonymous");
            self.state.send_replace(SessionState::Anonymous);
            return Ok(None);
        }

        let epoch = store.epoch();
        let outcome = self.fetch_identity().await;

        if store.epoch() != epoch {
            // Signed out (or refresh failed) while the lookup was running
            if !store.has_credentials() {
                self.state.send_replace(SessionState::Anonymous);
            }
            debug!("Credentials changed during identity load; discarding result");
            return Err(outcome.err().unwrap_or(ApiError::Unauthenticated));
        }

        match outcome {
            Ok(user) => {
                debug!(user_id = user.id, "Identity loaded");
                self.state
                    .send_replace(SessionState::Authenticated(user.clone()));
                Ok(Some(user))
            }
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Identity load failed; keeping stored credentials");
                self.state.send_replace(SessionState::Anonymous);
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "Identity load rejected; clearing credentials");
                store.clear();
                self.state.send_replace(SessionState::Anonymous);
                Err(e)
            }
        }
    }

    async fn fetch_identity(&self) -> Result<UserIdentity, ApiError> {
        let response = self
            .api
            .request(&self.api.endpoints().me_url(), RequestOptions::get())
            .await?;
        let response = check_response(response).await?;
        let status: AuthStatus = response.json().await?;
        status.into_identity().ok_or(ApiError::Unauthenticated)
    }

    // Background task: whenever the store is cleared and stays empty, the
    // session is over. Holds only weak references so it ends with the
    // context.
    fn follow_credentials(&self) {
        if self.following.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut cleared = self.api.store().subscribe();
        let store = Arc::downgrade(self.api.store());
        let state = Arc::downgrade(&self.state);

        tokio::spawn(async move {
            while cleared.changed().await.is_ok() {
                let (Some(store), Some(state)) = (store.upgrade(), state.upgrade()) else {
                    break;
                };
                if store.has_credentials() {
                    continue;
                }
                state.send_if_modified(|current| {
                    if *current == SessionState::Anonymous {
                        false
                    } else {
                        info!("Credentials cleared; session is now anonymous");
                        *current = SessionState::Anonymous;
                        true
                    }
                });
            }
        });
    }
}
