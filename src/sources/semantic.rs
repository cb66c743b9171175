//! Semantic Scholar research source implementation.

use async_trait::async_trait;
use serde::Deserialize;

use crate::models::{FailureReason, Outcome, Query, RawCandidate};
use crate::sources::Source;
use crate::utils::{checked_text, ids, HttpClient, Identity, RateLimiter};

const SEMANTIC_API_BASE: &str = "https://api.semanticscholar.org/graph/v1";

/// Fields requested from the paper search endpoint
const SEARCH_FIELDS: &str = "paperId,title,abstract,year,venue,url,authors,externalIds";

/// The search endpoint returns at most 100 results per page
const MAX_PAGE_SIZE: usize = 100;

/// Semantic Scholar Graph API source
#[derive(Debug, Clone)]
pub struct SemanticScholarSource {
    client: HttpClient,
    limiter: RateLimiter,
    api_key: Option<String>,
    base_url: String,
}

impl SemanticScholarSource {
    /// Create a new Semantic Scholar source.
    ///
    /// Without an API key the shared public pool allows roughly one request
    /// per second.
    pub fn new(client: HttpClient, api_key: Option<String>) -> Self {
        let rate = if api_key.is_some() { 10.0 } else { 1.0 };
        Self {
            client,
            limiter: RateLimiter::per_second(rate),
            api_key,
            base_url: SEMANTIC_API_BASE.to_string(),
        }
    }

    /// Point at a different API endpoint (for testing)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    fn search_url(&self, terms: &str, max_results: usize) -> String {
        format!(
            "{}/paper/search?query={}&limit={}&fields={}",
            self.base_url,
            urlencoding::encode(terms),
            max_results.clamp(1, MAX_PAGE_SIZE),
            SEARCH_FIELDS
        )
    }

    /// Parse a search response body into candidates
    fn parse_response(body: &str) -> Result<Vec<RawCandidate>, FailureReason> {
        let response: S2SearchResponse = serde_json::from_str(body)?;
        Ok(response.data.into_iter().filter_map(Self::parse_paper).collect())
    }

    /// Convert one paper; entries without a paper id are skipped
    fn parse_paper(data: S2Paper) -> Option<RawCandidate> {
        let paper_id = data.paper_id.clone().filter(|id| !id.is_empty())?;
        let external = data.external_ids.unwrap_or_default();

        let doi = external.doi.clone().unwrap_or_default();
        let url = data
            .url
            .clone()
            .or_else(|| external.doi.as_deref().map(ids::doi_url))
            .or_else(|| external.arxiv.as_deref().map(ids::arxiv_abs_url))
            .unwrap_or_default();

        let payload = serde_json::json!({
            "paperId": paper_id,
            "externalIds": {
                "DOI": external.doi,
                "ArXiv": external.arxiv,
            },
        });

        Some(
            RawCandidate::builder("semantic", paper_id, data.title.unwrap_or_default())
                .authors(data.authors.into_iter().filter_map(|a| a.name))
                .abstract_text(data.r#abstract.unwrap_or_default())
                .year(data.year)
                .venue(data.venue.unwrap_or_default())
                .url(url)
                .doi(doi)
                .raw_payload(payload)
                .build(),
        )
    }
}

#[async_trait]
impl Source for SemanticScholarSource {
    fn id(&self) -> &str {
        "semantic"
    }

    fn name(&self) -> &str {
        "Semantic Scholar"
    }

    async fn search(&self, query: &Query, identity: &Identity) -> Outcome<Vec<RawCandidate>> {
        let Some(terms) = query.terms() else {
            return Outcome::FatalFailure(FailureReason::InvalidRequest(
                "empty query".to_string(),
            ));
        };

        self.limiter.acquire().await;

        let url = self.search_url(terms, query.max_results);
        let mut request = self.client.get(&url, identity);
        if let Some(ref key) = self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Outcome::failure(e.into()),
        };

        match checked_text(response)
            .await
            .and_then(|body| Self::parse_response(&body))
        {
            Ok(mut candidates) => {
                candidates.truncate(query.max_results);
                Outcome::Success(candidates)
            }
            Err(reason) => Outcome::failure(reason),
        }
    }
}

#[derive(Debug, Deserialize)]
struct S2SearchResponse {
    #[serde(default)]
    data: Vec<S2Paper>,
}

#[derive(Debug, Deserialize)]
struct S2Paper {
    #[serde(rename = "paperId")]
    paper_id: Option<String>,
    title: Option<String>,
    r#abstract: Option<String>,
    year: Option<i32>,
    venue: Option<String>,
    url: Option<String>,
    #[serde(default)]
    authors: Vec<S2Author>,
    #[serde(rename = "externalIds")]
    external_ids: Option<S2ExternalIds>,
}

#[derive(Debug, Deserialize)]
struct S2Author {
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct S2ExternalIds {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    #[serde(rename = "ArXiv")]
    arxiv: Option<String>,
}
