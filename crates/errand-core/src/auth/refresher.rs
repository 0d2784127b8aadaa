//! Coalesced credential refresh.
//!
//! When several requests discover an expired access token at once, only the
//! first one starts an exchange against the refresh endpoint. Everyone else
//! joins the same in-flight exchange (a `Shared` future) and observes the
//! same outcome. The handle is dropped as soon as the exchange settles, so a
//! later, independent expiry starts a fresh one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{CredentialPair, CredentialStore};
use crate::api::ApiError;

/// Upper bound on a single refresh exchange.
/// Matches the HTTP request timeout so joined requests never hang forever.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// New access token, or why there is none.
pub type RefreshOutcome = Result<String, ApiError>;

type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

struct InFlight {
    episode: u64,
    outcome: SharedRefresh,
}

struct Inner {
    client: Client,
    endpoint: String,
    store: Arc<CredentialStore>,
    timeout: Duration,
    in_flight: Mutex<Option<InFlight>>,
    episodes: AtomicU64,
}

/// Exchanges the stored refresh token for a new credential pair.
/// Clone is cheap; clones share the in-flight handle.
#[derive(Clone)]
pub struct Refresher {
    inner: Arc<Inner>,
}

impl Refresher {
    pub fn new(
        client: Client,
        endpoint: impl Into<String>,
        store: Arc<CredentialStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                endpoint: endpoint.into(),
                store,
                timeout,
                in_flight: Mutex::new(None),
                episodes: AtomicU64::new(0),
            }),
        }
    }

    /// Refresh now, or join the refresh already in flight.
    pub async fn refresh(&self) -> RefreshOutcome {
        let outcome = {
            let mut slot = self.inner.in_flight.lock();
            self.join_or_start(&mut slot)
        };
        outcome.await
    }

    /// Obtain an access token to replace `rejected`.
    ///
    /// Like [`refresh`](Self::refresh), except that when nothing is in
    /// flight and the store already holds a different access token (an
    /// exchange settled between the rejected request and now), that token
    /// is returned without another exchange.
    pub async fn renew(&self, rejected: Option<&str>) -> RefreshOutcome {
        let outcome = {
            let mut slot = self.inner.in_flight.lock();
            if slot.is_none() {
                if let Some(current) = self.inner.store.load_access() {
                    if Some(current.as_str()) != rejected {
                        debug!("Access token already replaced; skipping refresh");
                        return Ok(current);
                    }
                }
            }
            self.join_or_start(&mut slot)
        };
        outcome.await
    }

    /// Whether an exchange is currently pending.
    pub fn in_flight(&self) -> bool {
        self.inner.in_flight.lock().is_some()
    }

    /// Number of exchanges started so far.
    pub fn episodes(&self) -> u64 {
        self.inner.episodes.load(Ordering::Relaxed)
    }

    // Check and install happen under the same lock acquisition.
    fn join_or_start(&self, slot: &mut Option<InFlight>) -> SharedRefresh {
        if let Some(in_flight) = slot.as_ref() {
            debug!(episode = in_flight.episode, "Joining in-flight refresh");
            return in_flight.outcome.clone();
        }

        let episode = self.inner.episodes.fetch_add(1, Ordering::Relaxed) + 1;
        let weak = Arc::downgrade(&self.inner);
        let outcome = async move {
            let Some(inner) = weak.upgrade() else {
                return Err(ApiError::Unauthenticated);
            };
            let _settle = SettleGuard {
                inner: Arc::downgrade(&inner),
                episode,
            };
            inner.exchange(episode).await
        }
        .boxed()
        .shared();

        *slot = Some(InFlight {
            episode,
            outcome: outcome.clone(),
        });
        outcome
    }
}

impl Inner {
    // Every store write is conditional on the exchanged refresh token still
    // being the stored one, so a sign-out or a new sign-in that lands while
    // the exchange is in flight is never undone by it.
    async fn exchange(&self, episode: u64) -> RefreshOutcome {
        let Some(refresh) = self.store.load_refresh() else {
            warn!(episode, "No refresh credential stored; signing out");
            self.store.clear_if_refresh(None);
            return Err(ApiError::Unauthenticated);
        };

        info!(episode, "Refreshing access credential");
        let pair = match tokio::time::timeout(self.timeout, self.request_pair(&refresh)).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                if !e.is_session_failure() {
                    warn!(episode, error = %e, "Refresh failed; keeping stored credentials");
                } else if self.store.clear_if_refresh(Some(&refresh)) {
                    warn!(episode, error = %e, "Refresh rejected; signing out");
                } else {
                    info!(episode, error = %e, "Refresh rejected for a replaced session; store untouched");
                }
                return Err(e);
            }
            Err(_) => {
                warn!(episode, timeout = ?self.timeout, "Refresh timed out");
                return Err(ApiError::Timeout(self.timeout));
            }
        };

        let access = pair.access.clone();
        if !self.store.save_if_refresh(pair, &refresh) {
            info!(episode, "Session replaced during refresh; discarding new credentials");
            return Err(ApiError::Unauthenticated);
        }
        debug!(episode, "Access credential refreshed");
        Ok(access)
    }

    async fn request_pair(&self, refresh: &str) -> Result<CredentialPair, ApiError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&RefreshRequest { refresh })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            debug!(%status, "Refresh endpoint rejected the refresh credential");
            return Err(ApiError::SessionExpired);
        }

        let pair: CredentialPair = match response.json().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "Malformed refresh response");
                return Err(ApiError::SessionExpired);
            }
        };
        if !pair.is_complete() {
            warn!("Refresh response is missing a token");
            return Err(ApiError::SessionExpired);
        }
        Ok(pair)
    }
}

/// Clears the in-flight slot when the exchange settles, fails or unwinds.
struct SettleGuard {
    inner: Weak<Inner>,
    episode: u64,
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut slot = inner.in_flight.lock();
            if slot.as_ref().is_some_and(|f| f.episode == self.episode) {
                *slot = None;
            }
        }
    }
}
