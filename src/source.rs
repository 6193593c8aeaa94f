//! Layer sources: the host-supplied capability that turns a locator into bytes.
//!
//! The engine does not care whether a layer lives on disk, in memory or
//! behind an HTTP endpoint. Everything goes through [`LayerSource`].

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Transport-level failure while fetching a layer.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no resource at '{0}'")]
    NotFound(String),

    #[error("locator '{0}' escapes the source root")]
    InvalidLocator(String),

    #[error("I/O error reading '{locator}': {source}")]
    Io {
        locator: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transport error for '{locator}': {message}")]
    Transport { locator: String, message: String },
}

/// Fetches raw feature-collection documents by locator.
#[async_trait]
pub trait LayerSource: Send + Sync {
    async fn fetch(&self, locator: &str) -> Result<Bytes, FetchError>;

    /// Approximate payload size in bytes, used to schedule small layers first.
    async fn size_hint(&self, _locator: &str) -> Option<u64> {
        None
    }
}

/// Reads layers from files under a root directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, locator: &str) -> Result<PathBuf, FetchError> {
        let relative = Path::new(locator);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(FetchError::InvalidLocator(locator.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl LayerSource for DirectorySource {
    async fn fetch(&self, locator: &str) -> Result<Bytes, FetchError> {
        let path = self.resolve(locator)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FetchError::NotFound(locator.to_string()))
            }
            Err(source) => Err(FetchError::Io {
                locator: locator.to_string(),
                source,
            }),
        }
    }

    async fn size_hint(&self, locator: &str) -> Option<u64> {
        let path = self.resolve(locator).ok()?;
        tokio::fs::metadata(path).await.ok().map(|m| m.len())
    }
}

/// Serves layers from memory. Useful for embedding hosts that already hold
/// the documents, and for tests.
#[derive(Debug, Default)]
pub struct MemorySource {
    documents: RwLock<FxHashMap<String, Bytes>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(self, locator: impl Into<String>, body: impl Into<Bytes>) -> Self {
        self.insert(locator, body);
        self
    }

    pub fn insert(&self, locator: impl Into<String>, body: impl Into<Bytes>) {
        self.documents.write().insert(locator.into(), body.into());
    }

    pub fn remove(&self, locator: &str) -> Option<Bytes> {
        self.documents.write().remove(locator)
    }
}

#[async_trait]
impl LayerSource for MemorySource {
    async fn fetch(&self, locator: &str) -> Result<Bytes, FetchError> {
        self.documents
            .read()
            .get(locator)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(locator.to_string()))
    }

    async fn size_hint(&self, locator: &str) -> Option<u64> {
        self.documents
            .read()
            .get(locator)
            .map(|body| body.len() as u64)
    }
}

/// Fetches layers relative to a base URL.
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    base_url: String,
}

#[cfg(feature = "http")]
impl HttpSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url_for(&self, locator: &str) -> String {
        format!("{}/{}", self.base_url, locator.trim_start_matches('/'))
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl LayerSource for HttpSource {
    async fn fetch(&self, locator: &str) -> Result<Bytes, FetchError> {
        let transport = |e: reqwest::Error| FetchError::Transport {
            locator: locator.to_string(),
            message: e.to_string(),
        };

        let response = self
            .client
            .get(self.url_for(locator))
            .send()
            .await
            .map_err(transport)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(locator.to_string()));
        }

        response
            .error_for_status()
            .map_err(transport)?
            .bytes()
            .await
            .map_err(transport)
    }

    async fn size_hint(&self, locator: &str) -> Option<u64> {
        let response = self.client.head(self.url_for(locator)).send().await.ok()?;
        response.content_length()
    }
}
