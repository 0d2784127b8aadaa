//! Unauthenticated account endpoints: obtaining a credential pair,
//! registration, activation and password reset.

use std::sync::Arc;

use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::error::FieldErrors;
use super::ApiError;
use crate::auth::CredentialPair;
use crate::config::ApiEndpoints;

#[derive(Serialize)]
struct TokenRequest<'a> {
    // The token endpoint authenticates by username; accounts use the email
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct Registration<'a> {
    pub full_name: &'a str,
    pub email: &'a str,
    pub password: &'a str,
    pub password_confirm: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Registered {
    #[serde(default)]
    pub message: String,
    pub user_id: i64,
}

#[derive(Serialize)]
struct EmailRequest<'a> {
    email: &'a str,
}

#[derive(Serialize)]
struct ActivationRequest<'a> {
    uidb64: &'a str,
    token: &'a str,
}

#[derive(Serialize)]
struct PasswordResetConfirm<'a> {
    uidb64: &'a str,
    token: &'a str,
    password: &'a str,
    password_confirm: &'a str,
}

/// Server acknowledgement; most endpoints answer `{"message": "..."}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub message: Option<String>,
}

/// Account endpoints under the users group. These never carry a bearer
/// token and never trigger a credential refresh.
#[derive(Clone)]
pub struct AccountsApi {
    client: Client,
    endpoints: Arc<ApiEndpoints>,
}

impl AccountsApi {
    pub fn new(client: Client, endpoints: Arc<ApiEndpoints>) -> Self {
        Self { client, endpoints }
    }

    /// Exchange email and password for a credential pair.
    pub async fn obtain_pair(&self, email: &str, password: &str) -> Result<CredentialPair, ApiError> {
        let body = TokenRequest {
            username: email,
            password,
        };
        let pair: CredentialPair = self.post(&self.endpoints.token_url(), &body).await?;
        if !pair.is_complete() {
            return Err(ApiError::InvalidResponse(
                "token response is missing a credential".to_string(),
            ));
        }
        debug!("Credential pair obtained");
        Ok(pair)
    }

    pub async fn register(&self, registration: &Registration<'_>) -> Result<Registered, ApiError> {
        if registration.password != registration.password_confirm {
            return Err(mismatch());
        }
        let registered: Registered = self
            .post(&self.endpoints.user_path("register/"), registration)
            .await?;
        info!(user_id = registered.user_id, "Account registered");
        Ok(registered)
    }

    pub async fn activate(&self, uidb64: &str, token: &str) -> Result<Ack, ApiError> {
        self.post_ack(
            &self.endpoints.user_path("activate/"),
            &ActivationRequest { uidb64, token },
        )
        .await
    }

    pub async fn resend_activation(&self, email: &str) -> Result<Ack, ApiError> {
        self.post_ack(
            &self.endpoints.user_path("resend-activation/"),
            &EmailRequest { email },
        )
        .await
    }

    pub async fn request_password_reset(&self, email: &str) -> Result<Ack, ApiError> {
        self.post_ack(
            &self.endpoints.user_path("password-reset-request/"),
            &EmailRequest { email },
        )
        .await
    }

    pub async fn confirm_password_reset(
        &self,
        uidb64: &str,
        token: &str,
        password: &str,
        password_confirm: &str,
    ) -> Result<Ack, ApiError> {
        if password != password_confirm {
            return Err(mismatch());
        }
        self.post_ack(
            &self.endpoints.user_path("password-reset-confirm/"),
            &PasswordResetConfirm {
                uidb64,
                token,
                password,
                password_confirm,
            },
        )
        .await
    }

    async fn post<T, B>(&self, url: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let response = self.client.post(url).json(body).send().await?;
        let response = Self::check_form_response(response).await?;
        Ok(response.json().await?)
    }

    // Like `post`, but 204 and empty bodies are acknowledgements too.
    async fn post_ack<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<Ack, ApiError> {
        let response = self.client.post(url).json(body).send().await?;
        let response = Self::check_form_response(response).await?;
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Ack::default());
        }
        serde_json::from_str(&text).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    /// Non-2xx responses carrying a JSON object are field errors, whatever
    /// the status (the login view answers 401 with `{"detail": ...}`).
    async fn check_form_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let field_errors = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|payload| FieldErrors::from_payload(&payload));
        match field_errors {
            Some(errors) => Err(ApiError::Validation(errors)),
            None => Err(ApiError::from_status(status, &body)),
        }
    }
}

fn mismatch() -> ApiError {
    let mut errors = FieldErrors::new();
    errors.push("password_confirm", "Passwords do not match.");
    ApiError::Validation(errors)
}
