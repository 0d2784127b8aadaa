//! Core library for errand, a personal assistant for tasks, appointments
//! and contacts backed by a remote HTTP API.
//!
//! The interesting part is the authenticated request layer: [`ApiClient`]
//! attaches the stored bearer token to every protected request, and when the
//! server rejects it, renews it through a single shared refresh no matter how
//! many requests noticed at once, then replays the request once.
//! [`SessionContext`] exposes who is signed in.
//!
//! ```no_run
//! use std::sync::Arc;
//! use errand_core::{ApiClient, Config, CredentialStore, SessionContext};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let store = Arc::new(CredentialStore::open(config.token_backend()?));
//! let session = SessionContext::new(ApiClient::from_config(&config, store)?);
//!
//! if session.start().await?.is_authenticated() {
//!     let tasks = session.api().tasks().list().await?;
//!     println!("{} tasks", tasks.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError, FieldErrors, RequestBody, RequestOptions};
pub use auth::{CredentialPair, CredentialStore, Refresher, SessionContext, SessionState};
pub use config::{ApiEndpoints, Config, TokenStorage};
