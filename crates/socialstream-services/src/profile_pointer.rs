//! Profile pointer RPC
//!
//! The identity service owns the "current profile media id" of each user.
//! The media service reads and writes it synchronously; it is a weak
//! reference and may point at a record that no longer exists.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use socialstream_core::AppError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PointerError {
    #[error("User {0} not found")]
    UserNotFound(i32),

    #[error("Identity service returned {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Identity service request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Identity service unavailable: {0}")]
    Unavailable(String),
}

impl From<PointerError> for AppError {
    fn from(err: PointerError) -> Self {
        match err {
            PointerError::UserNotFound(user_id) => {
                AppError::NotFound(format!("User {} not found", user_id))
            }
            other => AppError::upstream("identity service", other.to_string()),
        }
    }
}

pub type PointerResult<T> = Result<T, PointerError>;

#[async_trait]
pub trait ProfilePointerClient: Send + Sync {
    async fn get_profile_media_id(&self, user_id: i32) -> PointerResult<Option<i32>>;

    /// `None` clears the pointer.
    async fn set_profile_media_id(&self, user_id: i32, media_id: Option<i32>)
        -> PointerResult<()>;
}

/// Wire form of the pointer. `0`, negative or missing means "none".
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileMediaBody {
    #[serde(default)]
    media_id: Option<i32>,
}

impl ProfileMediaBody {
    fn pointer(&self) -> Option<i32> {
        self.media_id.filter(|id| *id > 0)
    }
}

/// JSON over HTTP to the identity service.
#[derive(Clone)]
pub struct HttpProfilePointerClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpProfilePointerClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> PointerResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn pointer_url(&self, user_id: i32) -> String {
        format!("{}/internal/users/{}/profile-media", self.base_url, user_id)
    }

    async fn check_status(
        user_id: i32,
        response: reqwest::Response,
    ) -> PointerResult<reqwest::Response> {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(PointerError::UserNotFound(user_id));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PointerError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ProfilePointerClient for HttpProfilePointerClient {
    #[tracing::instrument(skip(self), fields(rpc.service = "identity", rpc.method = "get_profile_media"))]
    async fn get_profile_media_id(&self, user_id: i32) -> PointerResult<Option<i32>> {
        let response = self.client.get(self.pointer_url(user_id)).send().await?;
        let body: ProfileMediaBody = Self::check_status(user_id, response)
            .await?
            .json()
            .await?;
        Ok(body.pointer())
    }

    #[tracing::instrument(skip(self), fields(rpc.service = "identity", rpc.method = "set_profile_media"))]
    async fn set_profile_media_id(
        &self,
        user_id: i32,
        media_id: Option<i32>,
    ) -> PointerResult<()> {
        let body = ProfileMediaBody {
            media_id: Some(media_id.unwrap_or(0)),
        };
        let response = self
            .client
            .put(self.pointer_url(user_id))
            .json(&body)
            .send()
            .await?;
        Self::check_status(user_id, response).await?;
        Ok(())
    }
}

/// In-process pointer table for tests and local wiring. Every user exists.
#[derive(Default)]
pub struct MemoryProfilePointers {
    pointers: Mutex<HashMap<i32, i32>>,
    fail_get: AtomicBool,
    fail_set: AtomicBool,
    set_delay_ms: AtomicU64,
}

impl MemoryProfilePointers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pointer(&self, user_id: i32) -> Option<i32> {
        self.pointers
            .lock()
            .ok()
            .and_then(|pointers| pointers.get(&user_id).copied())
    }

    pub fn set_get_failure(&self, fail: bool) {
        self.fail_get.store(fail, Ordering::SeqCst);
    }

    pub fn set_set_failure(&self, fail: bool) {
        self.fail_set.store(fail, Ordering::SeqCst);
    }

    /// Latency added to every pointer update.
    pub fn set_set_delay(&self, delay: Duration) {
        self.set_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn write(&self, user_id: i32, media_id: Option<i32>) -> PointerResult<()> {
        let mut pointers = self
            .pointers
            .lock()
            .map_err(|_| PointerError::Unavailable("pointer table poisoned".to_string()))?;
        match media_id.filter(|id| *id > 0) {
            Some(id) => pointers.insert(user_id, id),
            None => pointers.remove(&user_id),
        };
        Ok(())
    }
}

#[async_trait]
impl ProfilePointerClient for MemoryProfilePointers {
    async fn get_profile_media_id(&self, user_id: i32) -> PointerResult<Option<i32>> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(PointerError::Unavailable("injected get failure".to_string()));
        }
        Ok(self.pointer(user_id))
    }

    async fn set_profile_media_id(
        &self,
        user_id: i32,
        media_id: Option<i32>,
    ) -> PointerResult<()> {
        let delay_ms = self.set_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        if self.fail_set.load(Ordering::SeqCst) {
            return Err(PointerError::Unavailable("injected set failure".to_string()));
        }
        self.write(user_id, media_id)
    }
}
