//! Client for the external similarity index.
//!
//! When a work record carries no matchable identifier, the resolver falls
//! back to approximate matching against an index of previously ingested
//! work titles and author names. The index is an external service; this
//! crate provides the [`SimilarityIndex`] trait the core programs against
//! and its HTTP implementation, [`HttpSimilarityIndex`].

use std::future::Future;

use serde::{Deserialize, Serialize};
use url::Url;

use bibgraph_shared::{BibgraphError, Result};

/// Default timeout in seconds for index requests.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// User-Agent string for index requests.
const USER_AGENT: &str = concat!("bibgraph/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Query / hit types
// ---------------------------------------------------------------------------

/// A similarity query over indexed works.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkQuery {
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub volume: String,
    #[serde(default)]
    pub issue: String,
    #[serde(default)]
    pub page_start: String,
    #[serde(default)]
    pub page_end: String,
    #[serde(default)]
    pub year: String,
    /// Server-side score cutoff; 0 disables it.
    #[serde(default)]
    pub threshold: f64,
    /// Maximum candidates to return.
    #[serde(default)]
    pub max_hits: usize,
}

/// One ranked candidate from the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkHit {
    /// Canonical work id the candidate was indexed under.
    pub id: String,
    /// Server-side relevance score.
    pub score: f64,
    /// Stored title of the candidate.
    pub title: String,
    /// Stored author names of the candidate.
    #[serde(default)]
    pub authors: Vec<String>,
}

/// The fields indexed for a work at insertion time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexedWork {
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub year: String,
    #[serde(default)]
    pub volume: String,
    #[serde(default)]
    pub issue: String,
    #[serde(default)]
    pub first_page: String,
    #[serde(default)]
    pub last_page: String,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Approximate-match service over work titles and author names.
///
/// The resolver only consults the index when strong-key matching fails;
/// implementations rank candidates, and the caller applies its own
/// threshold logic to the returned hits.
pub trait SimilarityIndex: Send + Sync {
    /// Query for candidate works.
    fn search_works(&self, query: &WorkQuery) -> impl Future<Output = Result<Vec<WorkHit>>> + Send;

    /// Index a newly inserted work so later records can match it.
    fn index_work(&self, id: &str, work: &IndexedWork) -> impl Future<Output = Result<()>> + Send;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// HTTP client for a similarity index service.
///
/// `POST {base}/works/search` with a [`WorkQuery`] body returns
/// `{"hits": [...]}`; `PUT {base}/works/{id}` indexes a document.
#[derive(Debug, Clone)]
pub struct HttpSimilarityIndex {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpSimilarityIndex {
    /// Build a client for the index at `base_url`.
    pub fn new(base_url: &str, timeout_secs: Option<u64>) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| BibgraphError::Similarity(format!("invalid base url {base_url}: {e}")))?;
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(
                timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            ))
            .build()
            .map_err(|e| BibgraphError::Similarity(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { base_url, client })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| BibgraphError::Similarity(format!("bad endpoint {path}: {e}")))
    }
}

/// Response envelope for search requests.
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<WorkHit>,
}

impl SimilarityIndex for HttpSimilarityIndex {
    async fn search_works(&self, query: &WorkQuery) -> Result<Vec<WorkHit>> {
        let url = self.endpoint("works/search")?;
        let response = self
            .client
            .post(url.clone())
            .json(query)
            .send()
            .await
            .map_err(|e| BibgraphError::Similarity(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BibgraphError::Similarity(format!("{url}: HTTP {status}")));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| BibgraphError::Similarity(format!("{url}: bad response body: {e}")))?;

        tracing::debug!(hits = parsed.hits.len(), title = %query.title, "similarity search");
        Ok(parsed.hits)
    }

    async fn index_work(&self, id: &str, work: &IndexedWork) -> Result<()> {
        let url = self.endpoint(&format!("works/{id}"))?;
        let response = self
            .client
            .put(url.clone())
            .json(work)
            .send()
            .await
            .map_err(|e| BibgraphError::Similarity(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BibgraphError::Similarity(format!("{url}: HTTP {status}")));
        }
        Ok(())
    }
}
