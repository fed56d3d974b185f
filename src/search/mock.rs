//! A scripted [`AurTransport`] for tests, in the same builder-configured,
//! keyed-response style as this codebase's `MockAurApi`.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::transport::{AurRpcResponse, AurTransport};
use crate::error::{Error, Result};

/// What: A fake [`AurTransport`] whose responses are configured ahead of
/// time, keyed by request shape.
///
/// Details:
/// - `info` responses are keyed by the sorted, comma-joined batch of names
///   requested, the same convention `MockAurApi::with_info_result` uses.
/// - Unconfigured requests return an [`Error::NotFound`] rather than
///   panicking, so a misconfigured test fails with a readable message.
#[derive(Debug, Default)]
pub struct FakeAurTransport {
    info_responses: Mutex<HashMap<String, AurRpcResponse>>,
    info_one_responses: Mutex<HashMap<String, AurRpcResponse>>,
    search_responses: Mutex<HashMap<String, AurRpcResponse>>,
}

impl FakeAurTransport {
    /// What: Create an empty fake transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// What: Configure the response for a bulk `info` request over exactly
    /// `names` (order-independent).
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned (should never happen).
    #[must_use]
    pub fn with_info(mut self, names: &[&str], response: AurRpcResponse) -> Self {
        let key = Self::batch_key(names);
        self.info_responses
            .get_mut()
            .expect("fake transport mutex should not be poisoned")
            .insert(key, response);
        self
    }

    /// What: Configure the response for a single-name `info` request.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned (should never happen).
    #[must_use]
    pub fn with_info_one(mut self, name: &str, response: AurRpcResponse) -> Self {
        self.info_one_responses
            .get_mut()
            .expect("fake transport mutex should not be poisoned")
            .insert(name.to_string(), response);
        self
    }

    /// What: Configure the response for a `search?by=provides` request.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned (should never happen).
    #[must_use]
    pub fn with_search(mut self, term: &str, response: AurRpcResponse) -> Self {
        self.search_responses
            .get_mut()
            .expect("fake transport mutex should not be poisoned")
            .insert(term.to_string(), response);
        self
    }

    fn batch_key(names: &[&str]) -> String {
        let mut sorted: Vec<&str> = names.to_vec();
        sorted.sort_unstable();
        sorted.join(",")
    }
}

#[async_trait]
impl AurTransport for FakeAurTransport {
    async fn info(&self, names: &[String]) -> Result<AurRpcResponse> {
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let key = Self::batch_key(&refs);
        self.info_responses
            .lock()
            .expect("fake transport mutex should not be poisoned")
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no fake info response configured for [{key}]")))
    }

    async fn info_one(&self, name: &str) -> Result<AurRpcResponse> {
        self.info_one_responses
            .lock()
            .expect("fake transport mutex should not be poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| {
                Error::NotFound(format!("no fake info_one response configured for '{name}'"))
            })
    }

    async fn search_by_provides(&self, term: &str) -> Result<AurRpcResponse> {
        self.search_responses
            .lock()
            .expect("fake transport mutex should not be poisoned")
            .get(term)
            .cloned()
            .ok_or_else(|| {
                Error::NotFound(format!("no fake search response configured for '{term}'"))
            })
    }
}

/// What: Build a successful [`AurRpcResponse`] from a list of packages.
#[must_use]
pub fn success(results: Vec<super::transport::AurRpcPackage>) -> AurRpcResponse {
    AurRpcResponse {
        response_type: "success".to_string(),
        resultcount: results.len() as u64,
        results,
        error: None,
    }
}

/// What: Build an empty, successful [`AurRpcResponse`].
#[must_use]
pub fn empty() -> AurRpcResponse {
    success(vec![])
}
