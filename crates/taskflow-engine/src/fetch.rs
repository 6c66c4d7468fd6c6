//! Read-only access to backend endpoints for node handlers
//!
//! Handlers that need remote data (survey results, analysis runs) receive a
//! [`Fetcher`] instead of an HTTP client. This keeps handlers testable and
//! lets the host decide how requests are authenticated and routed.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FetchError;

/// HTTP-ish method of a fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FetchMethod {
    Get,
    Post,
}

/// A request issued by a handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub method: FetchMethod,
    /// Path relative to the backend base, e.g. `/api/surveys/42`
    pub path: String,
    #[serde(default)]
    pub body: Option<Value>,
}

impl FetchRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: FetchMethod::Get,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: FetchMethod::Post,
            path: path.into(),
            body: Some(body),
        }
    }
}

/// Async source of backend data
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<Value, FetchError>;
}

/// Fetcher that refuses every request
///
/// Handlers that only depend on node data never notice it.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFetcher;

#[async_trait]
impl Fetcher for NoopFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<Value, FetchError> {
        Err(FetchError::Unavailable(request.path))
    }
}

type FetchFuture = Pin<Box<dyn Future<Output = Result<Value, FetchError>> + Send>>;

/// Closure-backed fetcher
///
/// Used to bridge host-provided transports and to stub responses in tests.
pub struct CallbackFetcher {
    callback: Box<dyn Fn(FetchRequest) -> FetchFuture + Send + Sync>,
}

impl CallbackFetcher {
    pub fn new<F, Fut>(callback: F) -> Self
    where
        F: Fn(FetchRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
    {
        Self {
            callback: Box::new(move |request| Box::pin(callback(request))),
        }
    }
}

#[async_trait]
impl Fetcher for CallbackFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<Value, FetchError> {
        (self.callback)(request).await
    }
}
