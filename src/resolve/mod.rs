//! Asset reference resolution.
//!
//! Turns an opaque [`AssetReference`] into raw bytes, trying an ordered list
//! of fetch strategies until one succeeds. Which strategies apply depends on
//! how the reference classifies:
//!
//! - local paths are read directly and fail fast (a missing packaged asset is
//!   a packaging bug, not a transient fault)
//! - known generation-provider hosts go straight through the transfer proxy
//!   (direct fetches are known to fail on provider credentials)
//! - unknown external hosts are probed directly first, then fall back to the
//!   proxy (a CORS rejection is indistinguishable from a network error, so any
//!   direct failure falls through)
//!
//! Every successful fetch lands in the [`ContentCache`] before it is returned;
//! a cache hit short-circuits the whole chain.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use reqwest::Url;
use thiserror::Error;

use crate::cache::{Blob, ContentCache};
use crate::resolve::proxy::{ProxyClient, ProxyFetchError, content_type_for_extension};

pub mod proxy;

/// Opaque locator for a 3D asset. Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetReference(String);

impl AssetReference {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Classifies the reference by origin trust level.
    pub fn classify(&self, config: &ResolverConfig) -> RefClass {
        let reference = self.0.trim();
        if reference.starts_with("http://") || reference.starts_with("https://") {
            if proxy::is_provider_host(reference, &config.provider_hosts) {
                RefClass::KnownProviderHost
            } else {
                RefClass::UnknownExternalHost
            }
        } else {
            RefClass::LocalPath
        }
    }
}

impl std::fmt::Display for AssetReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefClass {
    LocalPath,
    KnownProviderHost,
    UnknownExternalHost,
}

/// Resolver configuration, handed in by the embedding layer. The core never
/// reads environment variables itself.
#[derive(Clone, Debug)]
pub struct ResolverConfig {
    /// Host suffixes of the generation provider, e.g. `models.provider.ai`.
    pub provider_hosts: Vec<String>,
    /// Base URL of the transfer-proxy endpoint.
    pub proxy_endpoint: String,
    /// Caller bearer token, forwarded to the proxy for non-provider hosts only.
    pub bearer_token: Option<String>,
    /// Root directory for local (packaged) asset paths on native targets.
    pub asset_root: PathBuf,
}

impl ResolverConfig {
    pub fn new(proxy_endpoint: impl Into<String>) -> Self {
        Self {
            provider_hosts: Vec::new(),
            proxy_endpoint: proxy_endpoint.into(),
            bearer_token: None,
            asset_root: PathBuf::from("assets"),
        }
    }
}

/// One resolution try, kept for diagnostics only.
#[derive(Clone, Debug)]
pub struct LoadAttempt {
    pub strategy: &'static str,
    pub outcome: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("upstream returned status {0}")]
    Status(u16),
    #[error("{0}")]
    Proxy(#[from] ProxyFetchError),
    #[error("local asset missing: {0}")]
    NotFound(String),
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Every fetch strategy was exhausted for a reference.
#[derive(Debug, Error)]
#[error("could not resolve asset {reference} after {} strategies", .attempts.len())]
pub struct UnresolvedAssetError {
    pub reference: String,
    pub attempts: Vec<LoadAttempt>,
}

#[cfg(not(target_arch = "wasm32"))]
pub type BoxFetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Blob, FetchError>> + Send + 'a>>;
#[cfg(target_arch = "wasm32")]
pub type BoxFetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Blob, FetchError>> + 'a>>;

/// A single way of obtaining asset bytes. Strategies share one contract so the
/// resolver can iterate a chain of them; adding a new path (e.g. a signed-URL
/// store) means adding a strategy, not another branch.
#[cfg(not(target_arch = "wasm32"))]
pub trait FetchStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn fetch<'a>(&'a self, reference: &'a AssetReference) -> BoxFetchFuture<'a>;
}

// The web client types are not Send, and the fetch task never leaves the main
// thread there anyway.
#[cfg(target_arch = "wasm32")]
pub trait FetchStrategy {
    fn name(&self) -> &'static str;

    fn fetch<'a>(&'a self, reference: &'a AssetReference) -> BoxFetchFuture<'a>;
}

/// Reads a packaged local asset. No fallback: absence is a packaging bug.
struct LocalFileStrategy {
    asset_root: PathBuf,
}

impl FetchStrategy for LocalFileStrategy {
    fn name(&self) -> &'static str {
        "local-file"
    }

    fn fetch<'a>(&'a self, reference: &'a AssetReference) -> BoxFetchFuture<'a> {
        Box::pin(async move {
            let raw = reference.as_str().trim();
            let raw = raw.strip_prefix("file://").unwrap_or(raw);

            #[cfg(not(target_arch = "wasm32"))]
            {
                let path = PathBuf::from(raw);
                let path = if path.is_absolute() {
                    path
                } else {
                    self.asset_root.join(path)
                };
                // Existence check first so a missing file reports as such
                // instead of as a generic read error.
                if tokio::fs::metadata(&path).await.is_err() {
                    return Err(FetchError::NotFound(path.display().to_string()));
                }
                let data = tokio::fs::read(&path).await?;
                Ok(Blob::new(data, content_type_for_extension(raw)))
            }

            #[cfg(target_arch = "wasm32")]
            {
                // Packaged assets are served next to the page on the web.
                let window = web_sys::window().expect("no window");
                let origin = window
                    .location()
                    .origin()
                    .expect("no origin");
                let base = Url::parse(&format!("{}/{}/", origin, self.asset_root.display()))
                    .map_err(|_| FetchError::NotFound(raw.to_string()))?;
                let url = base
                    .join(raw)
                    .map_err(|_| FetchError::NotFound(raw.to_string()))?;
                let response = reqwest::get(url).await?;
                if !response.status().is_success() {
                    return Err(FetchError::Status(response.status().as_u16()));
                }
                let data = response.bytes().await?.to_vec();
                Ok(Blob::new(data, content_type_for_extension(raw)))
            }
        })
    }
}

/// Probes the host directly, then downloads. Any failure (network, non-2xx or
/// a CORS rejection, which surfaces as a transport error) makes the resolver
/// fall through to the proxy.
struct DirectFetchStrategy {
    http: reqwest::Client,
}

impl FetchStrategy for DirectFetchStrategy {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn fetch<'a>(&'a self, reference: &'a AssetReference) -> BoxFetchFuture<'a> {
        Box::pin(async move {
            let url = Url::parse(reference.as_str())
                .map_err(|_| FetchError::NotFound(reference.to_string()))?;
            let probe = self.http.head(url.clone()).send().await?;
            if !probe.status().is_success() {
                return Err(FetchError::Status(probe.status().as_u16()));
            }
            let response = self.http.get(url).send().await?;
            if !response.status().is_success() {
                return Err(FetchError::Status(response.status().as_u16()));
            }
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(|value| value.to_string())
                .unwrap_or_else(|| content_type_for_extension(reference.as_str()).to_string());
            let data = response.bytes().await?.to_vec();
            Ok(Blob::new(data, content_type))
        })
    }
}

/// Routes the fetch through the trusted transfer proxy.
struct ProxyStrategy {
    client: ProxyClient,
    bearer_token: Option<String>,
}

impl FetchStrategy for ProxyStrategy {
    fn name(&self) -> &'static str {
        "proxy"
    }

    fn fetch<'a>(&'a self, reference: &'a AssetReference) -> BoxFetchFuture<'a> {
        Box::pin(async move {
            let blob = self
                .client
                .fetch(reference.as_str(), self.bearer_token.as_deref())
                .await?;
            Ok(blob)
        })
    }
}

/// Resolves asset references against the cache and the strategy chains.
///
/// Cheap to clone and safe to move into a spawned fetch task; the cache behind
/// the mutex tolerates two concurrent misses for the same reference (both
/// fetch, last insert wins, both blobs are valid).
#[derive(Clone)]
pub struct Resolver {
    config: ResolverConfig,
    cache: Arc<Mutex<ContentCache>>,
    http: reqwest::Client,
}

impl Resolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            config,
            cache: Arc::new(Mutex::new(ContentCache::new())),
            http: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Whether a reference is already cached, without touching access order.
    pub fn is_cached(&self, reference: &AssetReference) -> bool {
        self.cache
            .lock()
            .expect("content cache lock poisoned")
            .contains(reference.as_str())
    }

    /// Drops all cached blobs.
    pub fn clear_cache(&self) {
        self.cache
            .lock()
            .expect("content cache lock poisoned")
            .clear();
    }

    /// Resolves `reference` to its raw bytes.
    ///
    /// Checks the cache, then walks the strategy chain for the reference's
    /// class in order, inserting the first successful blob into the cache.
    pub async fn resolve(&self, reference: &AssetReference) -> Result<Blob, UnresolvedAssetError> {
        let cached = self
            .cache
            .lock()
            .expect("content cache lock poisoned")
            .get(reference.as_str());
        if let Some(blob) = cached {
            log::debug!("cache hit for {}", reference);
            return Ok(blob);
        }

        let class = reference.classify(&self.config);
        let strategies = self.strategies_for(class);
        let blob = self.run_chain(reference, &strategies).await?;
        self.cache
            .lock()
            .expect("content cache lock poisoned")
            .insert(reference.as_str(), blob.clone());
        Ok(blob)
    }

    fn strategies_for(&self, class: RefClass) -> Vec<Box<dyn FetchStrategy>> {
        let proxy = || -> Box<dyn FetchStrategy> {
            Box::new(ProxyStrategy {
                client: ProxyClient::new(
                    self.config.proxy_endpoint.clone(),
                    self.config.provider_hosts.clone(),
                ),
                bearer_token: self.config.bearer_token.clone(),
            })
        };
        match class {
            RefClass::LocalPath => vec![Box::new(LocalFileStrategy {
                asset_root: self.config.asset_root.clone(),
            })],
            RefClass::KnownProviderHost => vec![proxy()],
            RefClass::UnknownExternalHost => vec![
                Box::new(DirectFetchStrategy {
                    http: self.http.clone(),
                }),
                proxy(),
            ],
        }
    }

    async fn run_chain(
        &self,
        reference: &AssetReference,
        strategies: &[Box<dyn FetchStrategy>],
    ) -> Result<Blob, UnresolvedAssetError> {
        let mut attempts = Vec::with_capacity(strategies.len());
        for strategy in strategies {
            match strategy.fetch(reference).await {
                Ok(blob) => {
                    log::debug!(
                        "resolved {} via {} ({} bytes, {})",
                        reference,
                        strategy.name(),
                        blob.len(),
                        blob.content_type
                    );
                    return Ok(blob);
                }
                Err(err) => {
                    log::debug!("strategy {} failed for {}: {}", strategy.name(), reference, err);
                    attempts.push(LoadAttempt {
                        strategy: strategy.name(),
                        outcome: err.to_string(),
                    });
                }
            }
        }
        Err(UnresolvedAssetError {
            reference: reference.to_string(),
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config() -> ResolverConfig {
        ResolverConfig {
            provider_hosts: vec!["models.provider.ai".to_string()],
            proxy_endpoint: "https://app.example.com/proxy".to_string(),
            bearer_token: Some("tok".to_string()),
            asset_root: PathBuf::from("assets"),
        }
    }

    struct CountingStrategy {
        name: &'static str,
        calls: Arc<AtomicUsize>,
        result: Result<Vec<u8>, u16>,
    }

    impl FetchStrategy for CountingStrategy {
        fn name(&self) -> &'static str {
            self.name
        }

        fn fetch<'a>(&'a self, _reference: &'a AssetReference) -> BoxFetchFuture<'a> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                match &self.result {
                    Ok(bytes) => Ok(Blob::new(bytes.clone(), "model/gltf-binary")),
                    Err(status) => Err(FetchError::Status(*status)),
                }
            })
        }
    }

    #[test]
    fn classification_by_origin() {
        let config = config();
        let local = AssetReference::new("meshes/cube.glb");
        let provider = AssetReference::new("https://models.provider.ai/v1/out.glb");
        let external = AssetReference::new("https://some.cdn.net/out.glb");
        assert_eq!(local.classify(&config), RefClass::LocalPath);
        assert_eq!(provider.classify(&config), RefClass::KnownProviderHost);
        assert_eq!(external.classify(&config), RefClass::UnknownExternalHost);
    }

    #[test]
    fn provider_chain_skips_direct_probe() {
        let resolver = Resolver::new(config());
        let chain = resolver.strategies_for(RefClass::KnownProviderHost);
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].name(), "proxy");
    }

    #[test]
    fn external_chain_is_direct_then_proxy() {
        let resolver = Resolver::new(config());
        let chain = resolver.strategies_for(RefClass::UnknownExternalHost);
        let names: Vec<_> = chain.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["direct", "proxy"]);
    }

    #[tokio::test]
    async fn failed_direct_falls_back_to_proxy_exactly_once() {
        let resolver = Resolver::new(config());
        let direct_calls = Arc::new(AtomicUsize::new(0));
        let proxy_calls = Arc::new(AtomicUsize::new(0));
        let chain: Vec<Box<dyn FetchStrategy>> = vec![
            Box::new(CountingStrategy {
                name: "direct",
                calls: direct_calls.clone(),
                result: Err(403),
            }),
            Box::new(CountingStrategy {
                name: "proxy",
                calls: proxy_calls.clone(),
                result: Err(502),
            }),
        ];
        let reference = AssetReference::new("https://some.cdn.net/out.glb");
        let err = resolver.run_chain(&reference, &chain).await.unwrap_err();
        assert_eq!(direct_calls.load(Ordering::SeqCst), 1);
        assert_eq!(proxy_calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.attempts.len(), 2);
        assert_eq!(err.attempts[0].strategy, "direct");
        assert_eq!(err.attempts[1].strategy, "proxy");
    }

    #[tokio::test]
    async fn first_success_stops_the_chain() {
        let resolver = Resolver::new(config());
        let proxy_calls = Arc::new(AtomicUsize::new(0));
        let chain: Vec<Box<dyn FetchStrategy>> = vec![
            Box::new(CountingStrategy {
                name: "direct",
                calls: Arc::new(AtomicUsize::new(0)),
                result: Ok(vec![1, 2, 3]),
            }),
            Box::new(CountingStrategy {
                name: "proxy",
                calls: proxy_calls.clone(),
                result: Ok(vec![9]),
            }),
        ];
        let reference = AssetReference::new("https://some.cdn.net/out.glb");
        let blob = resolver.run_chain(&reference, &chain).await.unwrap();
        assert_eq!(blob.data.as_ref(), &[1, 2, 3]);
        assert_eq!(proxy_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn local_path_resolves_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cube.glb"), b"glTF-bytes").unwrap();
        let mut config = config();
        config.asset_root = dir.path().to_path_buf();
        let resolver = Resolver::new(config);

        let reference = AssetReference::new("cube.glb");
        let blob = resolver.resolve(&reference).await.unwrap();
        assert_eq!(blob.data.as_ref(), b"glTF-bytes");
        assert_eq!(blob.content_type, "model/gltf-binary");
        assert!(resolver.is_cached(&reference));

        // Deleting the backing file proves the second resolve never re-fetches.
        std::fs::remove_file(dir.path().join("cube.glb")).unwrap();
        let blob = resolver.resolve(&reference).await.unwrap();
        assert_eq!(blob.data.as_ref(), b"glTF-bytes");
    }

    #[tokio::test]
    async fn missing_local_path_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config();
        config.asset_root = dir.path().to_path_buf();
        let resolver = Resolver::new(config);

        let reference = AssetReference::new("nope.glb");
        let err = resolver.resolve(&reference).await.unwrap_err();
        assert_eq!(err.attempts.len(), 1);
        assert_eq!(err.attempts[0].strategy, "local-file");
        assert!(!resolver.is_cached(&reference));
    }
}
