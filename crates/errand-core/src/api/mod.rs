//! REST API client module for the errand backend.
//!
//! This module provides the `ApiClient`, the authenticated request executor
//! every protected call goes through, plus the typed surfaces built on it:
//! account endpoints, the user profile and the task, appointment and
//! contact collections.
//!
//! The API uses JWT bearer tokens obtained from `POST /users/token/` and
//! renewed through `POST /users/token/refresh/`.

pub mod accounts;
pub mod client;
pub mod error;
pub mod resources;

pub use accounts::{AccountsApi, Ack, Registered, Registration};
pub use client::{check_response, ApiClient, RequestBody, RequestOptions};
pub use error::{ApiError, FieldErrors};
pub use resources::{DashboardCounts, Resource};
