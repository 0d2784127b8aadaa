//! API client for communicating with the errand REST API.
//!
//! `ApiClient::request` is the one way protected data is fetched: it attaches
//! the stored access token, and when the server answers 401 it renews the
//! token through the shared [`Refresher`] and replays the request once.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::accounts::AccountsApi;
use super::resources::Resource;
use super::ApiError;
use crate::auth::{CredentialStore, Refresher, DEFAULT_REFRESH_TIMEOUT};
use crate::config::{ApiEndpoints, Config};
use crate::models::{Appointment, Contact, Profile, Task};

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Body of an outgoing request.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    /// Sent verbatim; the caller owns the content type.
    Text(String),
    /// Serialized on send; `Content-Type: application/json` unless the
    /// caller set a content type.
    Json(serde_json::Value),
}

impl From<serde_json::Value> for RequestBody {
    fn from(value: serde_json::Value) -> Self {
        RequestBody::Json(value)
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        RequestBody::Text(text)
    }
}

impl From<&str> for RequestBody {
    fn from(text: &str) -> Self {
        RequestBody::Text(text.to_string())
    }
}

/// Method, headers and body of a request. Kept by value so the request can
/// be replayed after a credential refresh.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            ..Default::default()
        }
    }

    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn delete() -> Self {
        Self::new(Method::DELETE)
    }

    pub fn post(body: impl Into<RequestBody>) -> Self {
        Self::new(Method::POST).body(body)
    }

    pub fn put(body: impl Into<RequestBody>) -> Self {
        Self::new(Method::PUT).body(body)
    }

    pub fn patch(body: impl Into<RequestBody>) -> Self {
        Self::new(Method::PATCH).body(body)
    }

    /// Request whose body is `value` serialized to JSON.
    pub fn json<T: Serialize + ?Sized>(method: Method, value: &T) -> Result<Self, ApiError> {
        let value = serde_json::to_value(value)
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to serialize body: {}", e)))?;
        Ok(Self::new(method).body(value))
    }

    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// Authenticated request executor.
/// Clone is cheap - every clone shares the connection pool, the credential
/// store and the in-flight refresh.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    store: Arc<CredentialStore>,
    refresher: Refresher,
    endpoints: Arc<ApiEndpoints>,
}

impl ApiClient {
    /// Create a client with default timeouts.
    pub fn new(endpoints: ApiEndpoints, store: Arc<CredentialStore>) -> Result<Self, ApiError> {
        Self::with_timeouts(
            endpoints,
            store,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
            DEFAULT_REFRESH_TIMEOUT,
        )
    }

    pub fn from_config(config: &Config, store: Arc<CredentialStore>) -> Result<Self, ApiError> {
        Self::with_timeouts(
            config.endpoints(),
            store,
            config.request_timeout(),
            config.refresh_timeout(),
        )
    }

    pub fn with_timeouts(
        endpoints: ApiEndpoints,
        store: Arc<CredentialStore>,
        request_timeout: Duration,
        refresh_timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(request_timeout).build()?;
        let refresher = Refresher::new(
            client.clone(),
            endpoints.refresh_url(),
            Arc::clone(&store),
            refresh_timeout,
        );

        Ok(Self {
            client,
            store,
            refresher,
            endpoints: Arc::new(endpoints),
        })
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn refresher(&self) -> &Refresher {
        &self.refresher
    }

    pub fn endpoints(&self) -> &ApiEndpoints {
        &self.endpoints
    }

    /// The underlying HTTP client, for unauthenticated calls.
    pub fn http(&self) -> &Client {
        &self.client
    }

    /// Perform an authenticated request.
    ///
    /// Any status other than 401 is returned untouched. On 401 the access
    /// token is renewed (joining any refresh already in flight) and the
    /// request is replayed exactly once; the replay's response is returned
    /// whatever its status. If no new token can be obtained the refresh
    /// failure is returned instead of a response.
    pub async fn request(&self, target: &str, options: RequestOptions) -> Result<Response, ApiError> {
        let url = Url::parse(target)
            .map_err(|e| ApiError::InvalidRequest(format!("{}: {}", target, e)))?;

        let sent = self.store.load_access();
        let response = self.send(&url, &options, sent.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!(method = %options.method, url = %url, "Access credential rejected; renewing");
        let access = self.refresher.renew(sent.as_deref()).await?;

        let retried = self.send(&url, &options, Some(&access)).await?;
        if retried.status() == StatusCode::UNAUTHORIZED {
            warn!(method = %options.method, url = %url, "Request still unauthorized after refresh");
        }
        Ok(retried)
    }

    async fn send(
        &self,
        url: &Url,
        options: &RequestOptions,
        access: Option<&str>,
    ) -> Result<Response, ApiError> {
        let mut headers = options.headers.clone();
        if let Some(token) = access {
            let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
                ApiError::InvalidRequest("access credential is not a valid header value".to_string())
            })?;
            headers.insert(header::AUTHORIZATION, value);
        }

        let builder = self.client.request(options.method.clone(), url.clone());
        let builder = match &options.body {
            RequestBody::Empty => builder,
            RequestBody::Text(text) => builder.body(text.clone()),
            RequestBody::Json(value) => {
                if !headers.contains_key(header::CONTENT_TYPE) {
                    headers.insert(
                        header::CONTENT_TYPE,
                        HeaderValue::from_static("application/json"),
                    );
                }
                let bytes = serde_json::to_vec(value).map_err(|e| {
                    ApiError::InvalidRequest(format!("Failed to serialize body: {}", e))
                })?;
                builder.body(bytes)
            }
        };

        Ok(builder.headers(headers).send().await?)
    }

    /// Authenticated GET, decoded as JSON; non-2xx becomes an error.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        let response = self.request(url, RequestOptions::get()).await?;
        let response = check_response(response).await?;
        Ok(response.json().await?)
    }

    /// Authenticated request with a JSON body, decoded as JSON.
    pub async fn send_json<T, B>(&self, method: Method, url: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let response = self.request(url, RequestOptions::json(method, body)?).await?;
        let response = check_response(response).await?;
        Ok(response.json().await?)
    }

    // ===== API surfaces =====

    pub fn accounts(&self) -> AccountsApi {
        AccountsApi::new(self.client.clone(), Arc::clone(&self.endpoints))
    }

    pub fn tasks(&self) -> Resource<Task> {
        Resource::new(self.clone(), self.endpoints.tasks.clone())
    }

    pub fn appointments(&self) -> Resource<Appointment> {
        Resource::new(self.clone(), self.endpoints.appointments.clone())
    }

    pub fn contacts(&self) -> Resource<Contact> {
        Resource::new(self.clone(), self.endpoints.contacts.clone())
    }

    /// Fetch the signed-in user's profile
    pub async fn profile(&self) -> Result<Profile, ApiError> {
        self.get_json(&self.endpoints.user_path("profile/")).await
    }
}

/// Check if response is successful, returning an error with body if not.
pub async fn check_response(response: Response) -> Result<Response, ApiError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::from_status(status, &body))
    }
}
