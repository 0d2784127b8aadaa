//! Authentication module for managing credentials and the user session.
//!
//! This module provides:
//! - `CredentialStore`: the access/refresh pair, persisted as one unit in a
//!   file, the OS keychain or memory
//! - `Refresher`: coalesced refresh of an expired access token
//! - `SessionContext`: the current identity, sign-in and sign-out
//!
//! Access tokens are short-lived; the refresh token is only ever shown to the
//! refresh endpoint.

pub mod credentials;
pub mod refresher;
pub mod session;

pub use credentials::{
    CredentialPair, CredentialStore, FileBackend, KeyringBackend, MemoryBackend, TokenBackend,
};
pub use refresher::{Refresher, RefreshOutcome, DEFAULT_REFRESH_TIMEOUT};
pub use session::{SessionContext, SessionState};
