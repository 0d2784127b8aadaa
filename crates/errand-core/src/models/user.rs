use serde::{Deserialize, Serialize};

/// The authenticated user, as returned inside `GET /users/me/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct UserIdentity {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub full_name: String,
}

impl UserIdentity {
    /// Name to greet the user with; falls back to the username when no
    /// full name was registered.
    pub fn display_name(&self) -> &str {
        if self.full_name.trim().is_empty() {
            &self.username
        } else {
            &self.full_name
        }
    }
}

/// Envelope of the identity-lookup endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthStatus {
    pub is_authenticated: bool,
    #[serde(default)]
    pub user: Option<UserIdentity>,
}

impl AuthStatus {
    /// The identity, only when the server vouches for it.
    pub fn into_identity(self) -> Option<UserIdentity> {
        if self.is_authenticated {
            self.user
        } else {
            None
        }
    }
}

/// Profile data from `GET /users/profile/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Profile {
    pub full_name: String,
    pub email: String,
}
