//! The AUR RPC wire protocol and the [`AurTransport`] capability that lets
//! [`super::Search`] be driven by a fake in tests instead of real HTTP.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{Error, Result};

/// One result entry from an AUR RPC `info` or `search` response.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AurRpcPackage {
    /// Package name.
    #[serde(rename = "Name")]
    pub name: String,
    /// Package base (groups split packages).
    #[serde(rename = "PackageBase")]
    pub package_base: String,
    /// Version string.
    #[serde(rename = "Version")]
    pub version: String,
    /// Runtime dependency expressions.
    #[serde(rename = "Depends", default)]
    pub depends: Vec<String>,
    /// Build-time dependency expressions.
    #[serde(rename = "MakeDepends", default)]
    pub make_depends: Vec<String>,
    /// Test-time dependency expressions.
    #[serde(rename = "CheckDepends", default)]
    pub check_depends: Vec<String>,
    /// Virtual provisions.
    #[serde(rename = "Provides", default)]
    pub provides: Vec<String>,
}

/// The envelope every AUR RPC v5 endpoint responds with.
#[derive(Clone, Debug, Deserialize)]
pub struct AurRpcResponse {
    /// `"success"` or `"error"`.
    #[serde(rename = "type")]
    pub response_type: String,
    /// Number of entries in `results`.
    #[serde(default)]
    pub resultcount: u64,
    /// The matched packages.
    #[serde(default)]
    pub results: Vec<AurRpcPackage>,
    /// Server-supplied error message, present when `response_type == "error"`.
    #[serde(default)]
    pub error: Option<String>,
}

impl AurRpcResponse {
    /// What: Turn a server-reported error response into an [`Error::AurRpc`].
    ///
    /// # Errors
    /// Returns `Err` iff `response_type == "error"`.
    pub fn into_result(self, url: &str) -> Result<Self> {
        if self.response_type == "error" {
            return Err(Error::AurRpc {
                message: self.error.clone().unwrap_or_else(|| "unknown AUR RPC error".to_string()),
                url: url.to_string(),
            });
        }
        Ok(self)
    }
}

/// What: Abstracts AUR RPC v5 HTTP access so [`super::Search`] can be
/// exercised against a scripted fake in tests.
#[async_trait]
pub trait AurTransport: Send + Sync {
    /// What: Bulk `info` lookup for up to a batch's worth of package names.
    async fn info(&self, names: &[String]) -> Result<AurRpcResponse>;

    /// What: Single-name `info` lookup.
    async fn info_one(&self, name: &str) -> Result<AurRpcResponse>;

    /// What: `search?by=provides` lookup for a dependency name.
    async fn search_by_provides(&self, term: &str) -> Result<AurRpcResponse>;
}

/// The real [`AurTransport`], backed by `reqwest`.
#[derive(Debug)]
pub struct ReqwestAurTransport {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestAurTransport {
    /// What: Build a transport pointed at `base_url` with the given
    /// per-request timeout.
    ///
    /// # Errors
    /// Returns [`Error::Network`] if the underlying `reqwest::Client`
    /// cannot be constructed (e.g. TLS backend initialization failure).
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    async fn get(&self, url: String) -> Result<AurRpcResponse> {
        let response = self.client.get(&url).send().await?;
        let body: AurRpcResponse = response.json().await?;
        body.into_result(&url)
    }
}

#[async_trait]
impl AurTransport for ReqwestAurTransport {
    async fn info(&self, names: &[String]) -> Result<AurRpcResponse> {
        let mut url = format!("{}/rpc/v5/info", self.base_url);
        for (i, name) in names.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            url.push(sep);
            url.push_str("arg[]=");
            url.push_str(&urlencode(name));
        }
        self.get(url).await
    }

    async fn info_one(&self, name: &str) -> Result<AurRpcResponse> {
        let url = format!("{}/rpc/v5/info/{}", self.base_url, urlencode(name));
        self.get(url).await
    }

    async fn search_by_provides(&self, term: &str) -> Result<AurRpcResponse> {
        let url = format!(
            "{}/rpc/v5/search/{}?by=provides",
            self.base_url,
            urlencode(term)
        );
        self.get(url).await
    }
}

/// Minimal percent-encoding sufficient for AUR package/dependency names
/// (alphanumeric plus `+-._@`), avoiding a dedicated URL-encoding dependency
/// for this narrow use.
fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'+' | b'@' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
