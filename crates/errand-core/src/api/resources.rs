//! Typed CRUD over the protected collections (tasks, appointments,
//! contacts). Every call goes through [`ApiClient::request`], so an expired
//! access token is renewed transparently.

use std::marker::PhantomData;

use reqwest::Method;
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use super::client::{check_response, ApiClient, RequestOptions};
use super::ApiError;

/// One collection endpoint, e.g. `{base}/tasks/`, returning `T` items.
#[derive(Clone)]
pub struct Resource<T> {
    api: ApiClient,
    base: String,
    _item: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Resource<T> {
    pub fn new(api: ApiClient, base: String) -> Self {
        Self {
            api,
            base,
            _item: PhantomData,
        }
    }

    pub fn url(&self) -> &str {
        &self.base
    }

    fn item_url(&self, id: i64) -> String {
        format!("{}{}/", self.base, id)
    }

    pub async fn list(&self) -> Result<Vec<T>, ApiError> {
        let items: Vec<T> = self.api.get_json(&self.base).await?;
        debug!(url = %self.base, count = items.len(), "Fetched collection");
        Ok(items)
    }

    pub async fn get(&self, id: i64) -> Result<T, ApiError> {
        self.api.get_json(&self.item_url(id)).await
    }

    pub async fn create<B: Serialize + ?Sized>(&self, draft: &B) -> Result<T, ApiError> {
        self.api.send_json(Method::POST, &self.base, draft).await
    }

    /// Partial update (`PATCH`); unset fields are left alone by the server.
    pub async fn update<B: Serialize + ?Sized>(&self, id: i64, patch: &B) -> Result<T, ApiError> {
        self.api
            .send_json(Method::PATCH, &self.item_url(id), patch)
            .await
    }

    pub async fn delete(&self, id: i64) -> Result<(), ApiError> {
        let response = self
            .api
            .request(&self.item_url(id), RequestOptions::delete())
            .await?;
        check_response(response).await?;
        debug!(url = %self.base, id, "Deleted item");
        Ok(())
    }
}

/// Item counts shown on the dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DashboardCounts {
    pub tasks: usize,
    pub open_tasks: usize,
    pub appointments: usize,
    pub contacts: usize,
}

impl DashboardCounts {
    /// Fetch all three collections concurrently. If the access token has
    /// expired, the three requests share a single refresh.
    pub async fn fetch(api: &ApiClient) -> Result<Self, ApiError> {
        let tasks = api.tasks();
        let appointments = api.appointments();
        let contacts = api.contacts();
        let (tasks, appointments, contacts) =
            futures::try_join!(tasks.list(), appointments.list(), contacts.list())?;

        Ok(Self {
            tasks: tasks.len(),
            open_tasks: tasks.iter().filter(|t| !t.completed).count(),
            appointments: appointments.len(),
            contacts: contacts.len(),
        })
    }
}
