//! arXiv research source implementation.

use async_trait::async_trait;
use chrono::Datelike;
use feed_rs::parser;

use crate::models::{FailureReason, Outcome, Query, RawCandidate};
use crate::sources::Source;
use crate::utils::{checked_text, ids, HttpClient, Identity, RateLimiter};

/// Base URL for arXiv API
const ARXIV_API_URL: &str = "http://export.arxiv.org/api/query";

/// arXiv asks clients to stay under one request every three seconds
const DEFAULT_REQUESTS_PER_SECOND: f64 = 1.0 / 3.0;

/// arXiv caps a single page at this many entries
const MAX_PAGE_SIZE: usize = 200;

/// arXiv Atom API source
#[derive(Debug, Clone)]
pub struct ArxivSource {
    client: HttpClient,
    limiter: RateLimiter,
    base_url: String,
}

impl ArxivSource {
    /// Create a new arXiv source
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            limiter: RateLimiter::per_second(DEFAULT_REQUESTS_PER_SECOND),
            base_url: ARXIV_API_URL.to_string(),
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

    /// Build the request URL for a search
    fn search_url(&self, terms: &str, max_results: usize) -> String {
        format!(
            "{}?search_query={}&start=0&max_results={}&sortBy=relevance&sortOrder=descending",
            self.base_url,
            urlencoding::encode(&format!("all:{}", terms)),
            max_results.min(MAX_PAGE_SIZE)
        )
    }

    /// Build the request URL for an id lookup
    fn lookup_url(&self, ids: &[String]) -> String {
        let ids: Vec<&str> = ids.iter().map(|id| ids::strip_arxiv_version(id)).collect();
        format!(
            "{}?id_list={}&start=0&max_results={}",
            self.base_url,
            urlencoding::encode(&ids.join(",")),
            ids.len()
        )
    }

    /// One paced request against the Atom API
    async fn fetch(&self, url: &str, identity: &Identity) -> Outcome<Vec<RawCandidate>> {
        self.limiter.acquire().await;
        tracing::debug!("arXiv request: {}", url);

        let response = match self
            .client
            .get(url, identity)
            .header("Accept", "application/atom+xml")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return Outcome::failure(e.into()),
        };

        match checked_text(response).await.and_then(|body| Self::parse_feed(&body)) {
            Ok(candidates) => Outcome::Success(candidates),
            Err(reason) => Outcome::failure(reason),
        }
    }

    /// Parse an Atom feed body into candidates
    fn parse_feed(body: &str) -> Result<Vec<RawCandidate>, FailureReason> {
        let feed = parser::parse(body.as_bytes())
            .map_err(|e| FailureReason::Parse(format!("Failed to parse Atom feed: {}", e)))?;

        Ok(feed.entries.iter().filter_map(Self::parse_entry).collect())
    }

    /// Parse one Atom entry. Entries without an abs id are skipped.
    fn parse_entry(entry: &feed_rs::model::Entry) -> Option<RawCandidate> {
        let paper_id = entry
            .id
            .split("/abs/")
            .nth(1)
            .map(ids::strip_arxiv_version)
            .filter(|id| !id.is_empty())?
            .to_string();

        let title = entry
            .title
            .as_ref()
            .map(|t| collapse_whitespace(&t.content))
            .unwrap_or_default();

        let summary = entry
            .summary
            .as_ref()
            .map(|s| collapse_whitespace(&s.content))
            .unwrap_or_default();

        // arXiv publishes the journal DOI as a related link titled "doi"
        let doi = entry
            .links
            .iter()
            .find(|l| l.title.as_deref() == Some("doi"))
            .and_then(|l| ids::find_doi(&l.href))
            .unwrap_or_default();

        let categories: Vec<&str> = entry.categories.iter().map(|c| c.term.as_str()).collect();

        Some(
            RawCandidate::builder("arxiv", paper_id.clone(), title)
                .authors(entry.authors.iter().map(|a| a.name.clone()))
                .abstract_text(summary)
                .year(entry.published.map(|d| d.year()))
                .venue("arXiv")
                .url(ids::arxiv_abs_url(&paper_id))
                .doi(doi)
                .raw_payload(serde_json::json!({
                    "id": entry.id,
                    "categories": categories,
                    "published": entry.published.map(|d| d.to_rfc3339()),
                }))
                .build(),
        )
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl Source for ArxivSource {
    fn id(&self) -> &str {
        "arxiv"
    }

    fn name(&self) -> &str {
        "arXiv"
    }

    async fn search(&self, query: &Query, identity: &Identity) -> Outcome<Vec<RawCandidate>> {
        let Some(terms) = query.terms() else {
            return Outcome::FatalFailure(FailureReason::InvalidRequest(
                "empty query".to_string(),
            ));
        };

        let url = self.search_url(terms, query.max_results);
        match self.fetch(&url, identity).await {
            Outcome::Success(mut candidates) => {
                candidates.truncate(query.max_results);
                Outcome::Success(candidates)
            }
            failure => failure,
        }
    }

    async fn lookup(&self, external_ids: &[String], identity: &Identity) -> Outcome<Vec<RawCandidate>> {
        if external_ids.is_empty() {
            return Outcome::Success(Vec::new());
        }
        let url = self.lookup_url(external_ids);
        self.fetch(&url, identity).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title>arXiv Query Results</title>
  <id>http://arxiv.org/api/query</id>
  <updated>2024-01-01T00:00:00Z</updated>
  <entry>
    <id>http://arxiv.org/abs/2301.12345v2</id>
    <updated>2023-02-01T00:00:00Z</updated>
    <published>2023-01-28T12:00:00Z</published>
    <title>Graph Neural Networks:
      A Review</title>
    <summary>  We review graph
      neural networks. </summary>
    <author><name>Jane Doe</name></author>
    <author><name>John Smith</name></author>
    <link href="http://arxiv.org/abs/2301.12345v2" rel="alternate" type="text/html"/>
    <link title="doi" href="http://dx.doi.org/10.1000/gnn.2023" rel="related"/>
    <category term="cs.LG" scheme="http://arxiv.org/schemas/atom"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2302.00001v1</id>
    <updated>2023-02-02T00:00:00Z</updated>
    <published>2022-12-30T00:00:00Z</published>
    <title>Message Passing Revisited</title>
    <summary>Short.</summary>
    <author><name>Alan Turing</name></author>
  </entry>
</feed>"#;

    fn source(server: &mockito::Server) -> ArxivSource {
        ArxivSource::new(HttpClient::direct().unwrap())
            .with_base_url(format!("{}/api/query", server.url()))
            .with_rate_limiter(RateLimiter::unlimited())
    }

    #[test]
    fn test_parse_feed() {
        let candidates = ArxivSource::parse_feed(FEED).unwrap();
        assert_eq!(candidates.len(), 2);

        let first = &candidates[0];
        assert_eq!(first.external_id, "2301.12345");
        assert_eq!(first.title, "Graph Neural Networks: A Review");
        assert_eq!(first.authors, vec!["Jane Doe", "John Smith"]);
        assert_eq!(first.r#abstract.as_deref(), Some("We review graph neural networks."));
        assert_eq!(first.year, Some(2023));
        assert_eq!(first.url.as_deref(), Some("https://arxiv.org/abs/2301.12345"));
        assert_eq!(first.doi.as_deref(), Some("10.1000/gnn.2023"));
        assert_eq!(first.raw_payload["categories"][0], "cs.LG");

        assert_eq!(candidates[1].year, Some(2022));
        assert!(candidates[1].doi.is_none());
    }

    #[test]
    fn test_invalid_feed_is_parse_error() {
        let err = ArxivSource::parse_feed("this is not xml").unwrap_err();
        assert!(matches!(err, FailureReason::Parse(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_search_with_mock_http() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/query")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("search_query".into(), "all:graph neural networks".into()),
                mockito::Matcher::UrlEncoded("max_results".into(), "1".into()),
            ]))
            .match_header("user-agent", "agent-under-test")
            .with_status(200)
            .with_header("content-type", "application/atom+xml")
            .with_body(FEED)
            .create_async()
            .await;

        let query = Query::new("graph neural networks").max_results(1);
        let outcome = source(&server)
            .search(&query, &Identity::direct("agent-under-test"))
            .await;

        mock.assert_async().await;
        let candidates = outcome.success().unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].source_id, "arxiv");
    }

    #[tokio::test]
    async fn test_server_errors_are_retryable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/query")
            .match_query(mockito::Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let outcome = source(&server)
            .search(&Query::new("anything"), &Identity::direct("ua"))
            .await;
        assert!(outcome.is_retryable());
    }

    #[tokio::test]
    async fn test_lookup_by_id_list() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/query")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("id_list".into(), "2301.12345,2302.00001".into()),
                mockito::Matcher::UrlEncoded("max_results".into(), "2".into()),
            ]))
            .with_status(200)
            .with_body(FEED)
            .create_async()
            .await;

        let ids = vec!["2301.12345v2".to_string(), "2302.00001".to_string()];
        let outcome = source(&server).lookup(&ids, &Identity::direct("ua")).await;

        mock.assert_async().await;
        let candidates = outcome.success().unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].external_id, "2301.12345");
    }

    #[tokio::test]
    async fn test_lookup_without_ids_sends_nothing() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/query")
            .match_query(mockito::Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let outcome = source(&server).lookup(&[], &Identity::direct("ua")).await;
        assert_eq!(outcome, Outcome::Success(Vec::new()));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_query_is_fatal() {
        let server = mockito::Server::new_async().await;
        let outcome = source(&server)
            .search(&Query::new("   "), &Identity::direct("ua"))
            .await;
        assert!(outcome.is_fatal());
    }
}
