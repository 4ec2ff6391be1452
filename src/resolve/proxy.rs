//! Client for the trusted transfer-proxy endpoint.
//!
//! Browsers refuse direct cross-origin reads for most asset hosts and the
//! generation provider requires a credential the client never holds. The proxy
//! performs the fetch server-side and streams the bytes back. This client only
//! builds the request and wraps the response into a [`Blob`]; it never parses
//! 3D content.

use reqwest::Url;
use thiserror::Error;

use crate::cache::Blob;

#[derive(Debug, Error)]
pub enum ProxyFetchError {
    #[error("proxy rejected fetch with status {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("proxy transport failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid proxy endpoint: {0}")]
    Endpoint(String),
}

pub struct ProxyClient {
    endpoint: String,
    provider_hosts: Vec<String>,
    http: reqwest::Client,
}

/// Maps an asset path extension to a content type, used when the proxy
/// response carries no `Content-Type` header.
pub(crate) fn content_type_for_extension(reference: &str) -> &'static str {
    let path = reference
        .split(&['?', '#'][..])
        .next()
        .unwrap_or(reference)
        .to_ascii_lowercase();
    if path.ends_with(".glb") {
        "model/gltf-binary"
    } else if path.ends_with(".gltf") {
        "model/gltf+json"
    } else if path.ends_with(".obj") {
        "model/obj"
    } else if path.ends_with(".fbx") {
        "model/fbx"
    } else if path.ends_with(".stl") {
        "model/stl"
    } else {
        "application/octet-stream"
    }
}

/// Whether `reference` points at one of the configured generation-provider hosts.
pub(crate) fn is_provider_host(reference: &str, provider_hosts: &[String]) -> bool {
    let host = match Url::parse(reference) {
        Ok(url) => match url.host_str() {
            Some(host) => host.to_ascii_lowercase(),
            None => return false,
        },
        Err(_) => return false,
    };
    provider_hosts.iter().any(|candidate| {
        let candidate = candidate.to_ascii_lowercase();
        host == candidate || host.ends_with(&format!(".{candidate}"))
    })
}

impl ProxyClient {
    pub fn new(endpoint: impl Into<String>, provider_hosts: Vec<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            provider_hosts,
            http: reqwest::Client::new(),
        }
    }

    /// Builds the proxy request URL for `reference`.
    ///
    /// The caller's bearer token is appended only for hosts outside the
    /// provider list: the proxy substitutes its own server-held credential for
    /// provider hosts, and the caller token is never valid there and must not
    /// leak.
    pub fn request_url(
        &self,
        reference: &str,
        bearer_token: Option<&str>,
    ) -> Result<Url, ProxyFetchError> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| ProxyFetchError::Endpoint(format!("{}: {e}", self.endpoint)))?;
        url.query_pairs_mut().append_pair("url", reference);
        if !is_provider_host(reference, &self.provider_hosts) {
            if let Some(token) = bearer_token {
                url.query_pairs_mut().append_pair("token", token);
            }
        }
        Ok(url)
    }

    /// Fetches `reference` through the proxy and returns the raw bytes.
    pub async fn fetch(
        &self,
        reference: &str,
        bearer_token: Option<&str>,
    ) -> Result<Blob, ProxyFetchError> {
        let url = self.request_url(reference, bearer_token)?;
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProxyFetchError::Upstream {
                status: status.as_u16(),
                body,
            });
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string())
            .unwrap_or_else(|| content_type_for_extension(reference).to_string());
        let bytes = response.bytes().await?;
        Ok(Blob::new(bytes.to_vec(), content_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ProxyClient {
        ProxyClient::new(
            "https://app.example.com/proxy",
            vec!["models.provider.ai".to_string()],
        )
    }

    #[test]
    fn extension_table_covers_known_formats() {
        assert_eq!(content_type_for_extension("https://h/x.glb"), "model/gltf-binary");
        assert_eq!(content_type_for_extension("https://h/x.GLTF"), "model/gltf+json");
        assert_eq!(content_type_for_extension("https://h/x.obj?sig=abc"), "model/obj");
        assert_eq!(content_type_for_extension("https://h/x.fbx"), "model/fbx");
        assert_eq!(content_type_for_extension("https://h/x.stl#frag"), "model/stl");
        assert_eq!(content_type_for_extension("https://h/x.bin"), "application/octet-stream");
    }

    #[test]
    fn provider_host_matches_subdomains() {
        let hosts = vec!["models.provider.ai".to_string()];
        assert!(is_provider_host("https://models.provider.ai/a.glb", &hosts));
        assert!(is_provider_host("https://cdn.models.provider.ai/a.glb", &hosts));
        assert!(!is_provider_host("https://provider.ai.evil.com/a.glb", &hosts));
        assert!(!is_provider_host("not a url", &hosts));
    }

    #[test]
    fn caller_token_is_withheld_for_provider_hosts() {
        let url = client()
            .request_url("https://models.provider.ai/a.glb", Some("caller-secret"))
            .unwrap();
        assert!(!url.as_str().contains("caller-secret"));
        assert!(url.as_str().contains("url="));
    }

    #[test]
    fn caller_token_is_forwarded_for_other_hosts() {
        let url = client()
            .request_url("https://thirdparty.example.org/a.glb", Some("caller-secret"))
            .unwrap();
        assert!(url.query_pairs().any(|(k, v)| k == "token" && v == "caller-secret"));
    }

    #[test]
    fn missing_token_appends_nothing() {
        let url = client()
            .request_url("https://thirdparty.example.org/a.glb", None)
            .unwrap();
        assert!(url.query_pairs().all(|(k, _)| k != "token"));
    }

    #[test]
    fn reference_is_percent_encoded() {
        let url = client()
            .request_url("https://host/with space/a.glb?x=1&y=2", None)
            .unwrap();
        let (_, value) = url.query_pairs().find(|(k, _)| k == "url").unwrap();
        assert_eq!(value, "https://host/with space/a.glb?x=1&y=2");
        assert!(!url.as_str().contains("with space"));
    }
}
