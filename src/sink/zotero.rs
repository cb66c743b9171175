//! Zotero web API sink.
//!
//! Every record is stored as a `journalArticle` tagged `canonical:<id>`.
//! Before writing, the sink looks the tag up; existing items are patched in
//! place and only unknown records are created, so repeated upserts never
//! duplicate items.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};

use super::{Sink, ENRICHMENT_FAILED_TAG};
use crate::config::ZoteroConfig;
use crate::models::{CanonicalRecord, EnrichmentStatus, FailureReason, Outcome};
use crate::utils::{checked_text, retry_after};

const ZOTERO_API_URL: &str = "https://api.zotero.org";

/// Zotero accepts at most 50 items per write request
const WRITE_BATCH_SIZE: usize = 50;

const MISSING_ABSTRACT: &str = "No abstract available";

/// Sink writing to a Zotero user or group library
#[derive(Debug, Clone)]
pub struct ZoteroSink {
    client: Client,
    base_url: String,
    library_path: String,
    api_key: String,
    collection_key: Option<String>,
    auto_tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ExistingItem {
    key: String,
    version: u64,
}

#[derive(Debug, Default, Deserialize)]
struct WriteResponse {
    #[serde(default)]
    success: HashMap<String, String>,
    #[serde(default)]
    unchanged: HashMap<String, String>,
    #[serde(default)]
    failed: HashMap<String, WriteFailure>,
}

#[derive(Debug, Deserialize)]
struct WriteFailure {
    code: u16,
    #[serde(default)]
    message: String,
}

impl ZoteroSink {
    pub fn new(
        client: Client,
        library_type: &str,
        library_id: &str,
        api_key: impl Into<String>,
    ) -> Result<Self, FailureReason> {
        if library_id.trim().is_empty() {
            return Err(FailureReason::InvalidRequest(
                "sink.zotero.library_id is not set".to_string(),
            ));
        }

        let prefix = match library_type {
            "user" => "users",
            "group" => "groups",
            other => {
                return Err(FailureReason::InvalidRequest(format!(
                    "unknown Zotero library type '{}' (expected user or group)",
                    other
                )))
            }
        };

        Ok(Self {
            client,
            base_url: ZOTERO_API_URL.to_string(),
            library_path: format!("{}/{}", prefix, library_id.trim()),
            api_key: api_key.into(),
            collection_key: None,
            auto_tags: Vec::new(),
        })
    }

    pub fn from_config(config: &ZoteroConfig) -> Result<Self, FailureReason> {
        let api_key = config.api_key().ok_or_else(|| {
            FailureReason::InvalidRequest(
                "Zotero API key missing (sink.zotero.api_key or ZOTERO_API_KEY)".to_string(),
            )
        })?;

        let sink = Self::new(Client::new(), &config.library_type, &config.library_id, api_key)?
            .with_auto_tags(config.auto_tags.clone());

        Ok(match &config.collection_key {
            Some(key) => sink.with_collection(key.clone()),
            None => sink,
        })
    }

    /// Point at a different API host (for testing)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_collection(mut self, collection_key: impl Into<String>) -> Self {
        self.collection_key = Some(collection_key.into());
        self
    }

    pub fn with_auto_tags(mut self, tags: Vec<String>) -> Self {
        self.auto_tags = tags;
        self
    }

    fn items_url(&self) -> String {
        format!("{}/{}/items", self.base_url, self.library_path)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Zotero-API-Key", &self.api_key)
            .header("Zotero-API-Version", "3")
    }

    /// Item JSON for a record
    fn item_for(&self, record: &CanonicalRecord) -> Value {
        let mut tags: BTreeSet<String> = self.auto_tags.iter().cloned().collect();
        if let Some(enrichment) = &record.enrichment {
            tags.extend(enrichment.keywords.iter().cloned());
        }
        if matches!(record.enrichment_status, EnrichmentStatus::EnrichmentFailed { .. }) {
            tags.insert(ENRICHMENT_FAILED_TAG.to_string());
        }
        tags.insert(canonical_tag(&record.canonical_id));

        let abstract_note = if record.r#abstract.trim().is_empty() {
            MISSING_ABSTRACT
        } else {
            record.r#abstract.as_str()
        };

        let mut extra = format!("Sources: {}", record.source_ids.join(", "));
        if let Some(enrichment) = &record.enrichment {
            extra.push_str("\n\n");
            extra.push_str(&enrichment.analysis);
        }

        json!({
            "itemType": "journalArticle",
            "title": record.title,
            "creators": record.authors.iter().map(|a| creator(a)).collect::<Vec<_>>(),
            "abstractNote": abstract_note,
            "publicationTitle": record.venue.clone().unwrap_or_default(),
            "date": record.year.map(|y| y.to_string()).unwrap_or_default(),
            "DOI": record.doi.clone().unwrap_or_default(),
            "url": record.url.clone().unwrap_or_default(),
            "extra": extra,
            "tags": tags.into_iter().map(|tag| json!({ "tag": tag })).collect::<Vec<_>>(),
            "collections": self.collection_key.iter().collect::<Vec<_>>(),
        })
    }

    async fn find_existing(&self, canonical_id: &str) -> Result<Option<ExistingItem>, FailureReason> {
        let url = format!(
            "{}?tag={}&format=json&limit=1",
            self.items_url(),
            urlencoding::encode(&canonical_tag(canonical_id))
        );
        let response = self.request(reqwest::Method::GET, &url).send().await?;
        let body = checked_text(response).await?;
        let mut items: Vec<ExistingItem> = serde_json::from_str(&body)?;
        Ok(items.pop())
    }

    async fn update(&self, existing: &ExistingItem, item: &Value) -> Result<(), FailureReason> {
        let url = format!("{}/{}", self.items_url(), existing.key);
        let response = self
            .request(reqwest::Method::PATCH, &url)
            .header("If-Unmodified-Since-Version", existing.version.to_string())
            .json(item)
            .send()
            .await?;

        checked_text(response).await.map(|_| ())
    }

    async fn create(&self, items: &[Value]) -> Result<usize, FailureReason> {
        let response = self
            .request(reqwest::Method::POST, &self.items_url())
            .json(items)
            .send()
            .await?;

        let hint = retry_after(&response);
        let body = checked_text(response).await?;
        let result: WriteResponse = serde_json::from_str(&body)?;

        // A partially failed batch reports the first failure; the created
        // items are found by tag on the next attempt.
        if let Some(failure) = result.failed.values().next() {
            let status = reqwest::StatusCode::from_u16(failure.code)
                .unwrap_or(reqwest::StatusCode::INTERNAL_SERVER_ERROR);
            return Err(FailureReason::from_status(status, hint, &failure.message));
        }

        Ok(result.success.len() + result.unchanged.len())
    }

    async fn upsert_all(&self, records: &[CanonicalRecord]) -> Result<usize, FailureReason> {
        let mut written = 0;
        let mut new_items = Vec::new();

        for record in records {
            let item = self.item_for(record);
            match self.find_existing(&record.canonical_id).await? {
                Some(existing) => {
                    self.update(&existing, &item).await?;
                    written += 1;
                }
                None => new_items.push(item),
            }
        }

        let updated = written;
        for batch in new_items.chunks(WRITE_BATCH_SIZE) {
            written += self.create(batch).await?;
        }

        tracing::info!(
            "Zotero: {} items updated, {} created in {}",
            updated,
            written - updated,
            self.library_path
        );
        Ok(written)
    }
}

fn canonical_tag(canonical_id: &str) -> String {
    format!("canonical:{}", canonical_id)
}

/// "Ada Lovelace" becomes first/last name; single names use the one-field form
fn creator(author: &str) -> Value {
    match author.trim().rsplit_once(' ') {
        Some((first, last)) => json!({
            "creatorType": "author",
            "firstName": first.trim(),
            "lastName": last.trim(),
        }),
        None => json!({
            "creatorType": "author",
            "name": author.trim(),
        }),
    }
}

#[async_trait]
impl Sink for ZoteroSink {
    fn name(&self) -> &str {
        "zotero"
    }

    async fn upsert(&self, records: &[CanonicalRecord]) -> Outcome<usize> {
        self.upsert_all(records).await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Enrichment;
    use mockito::Matcher;

    fn record(id: &str, title: &str) -> CanonicalRecord {
        CanonicalRecord {
            canonical_id: id.into(),
            title: title.into(),
            authors: vec!["Ada Lovelace".into(), "Plato".into()],
            r#abstract: String::new(),
            year: Some(2021),
            venue: Some("NeurIPS".into()),
            url: None,
            doi: Some("10.1000/xyz".into()),
            source_ids: vec!["arxiv".into(), "semantic".into()],
            enrichment_status: EnrichmentStatus::Pending,
            enrichment: None,
        }
    }

    fn sink(server: &mockito::Server) -> ZoteroSink {
        ZoteroSink::new(Client::new(), "user", "42", "secret")
            .unwrap()
            .with_base_url(server.url())
            .with_auto_tags(vec!["scholar-harvest".into()])
    }

    #[test]
    fn test_item_json() {
        let sink = ZoteroSink::new(Client::new(), "group", "7", "k")
            .unwrap()
            .with_collection("COLL1")
            .with_auto_tags(vec!["ai".into()]);

        let mut enriched = record("c1", "Paper");
        enriched.mark_enriched(Enrichment {
            analysis: "Solid work.".into(),
            keywords: vec!["graphs".into()],
        });
        let item = sink.item_for(&enriched);

        assert_eq!(item["itemType"], "journalArticle");
        assert_eq!(item["abstractNote"], MISSING_ABSTRACT);
        assert_eq!(item["date"], "2021");
        assert_eq!(item["creators"][0]["lastName"], "Lovelace");
        assert_eq!(item["creators"][1]["name"], "Plato");
        assert_eq!(item["collections"][0], "COLL1");
        let tags: Vec<&str> = item["tags"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["tag"].as_str().unwrap())
            .collect();
        assert_eq!(tags, vec!["ai", "canonical:c1", "graphs"]);
        assert!(item["extra"].as_str().unwrap().contains("Solid work."));

        let mut failed = record("c2", "Other");
        failed.mark_enrichment_failed("timeout");
        let item = sink.item_for(&failed);
        assert!(item["tags"]
            .as_array()
            .unwrap()
            .iter()
            .any(|t| t["tag"] == ENRICHMENT_FAILED_TAG));
    }

    #[test]
    fn test_rejects_bad_library_settings() {
        assert!(ZoteroSink::new(Client::new(), "user", " ", "k").is_err());
        assert!(ZoteroSink::new(Client::new(), "team", "1", "k").is_err());
    }

    #[tokio::test]
    async fn test_upsert_creates_new_and_patches_existing() {
        let mut server = mockito::Server::new_async().await;

        let lookup_new = server
            .mock("GET", "/users/42/items")
            .match_query(Matcher::UrlEncoded("tag".into(), "canonical:new".into()))
            .match_header("zotero-api-key", "secret")
            .match_header("zotero-api-version", "3")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;
        let lookup_old = server
            .mock("GET", "/users/42/items")
            .match_query(Matcher::UrlEncoded("tag".into(), "canonical:old".into()))
            .with_status(200)
            .with_body(r#"[{"key":"ABCD1234","version":17,"data":{}}]"#)
            .create_async()
            .await;
        let patch = server
            .mock("PATCH", "/users/42/items/ABCD1234")
            .match_header("if-unmodified-since-version", "17")
            .with_status(204)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/users/42/items")
            .match_body(Matcher::Regex(r#""title":"New paper""#.to_string()))
            .with_status(200)
            .with_body(r#"{"successful":{"0":{"key":"NEWKEY01"}},"success":{"0":"NEWKEY01"},"unchanged":{},"failed":{}}"#)
            .create_async()
            .await;

        let outcome = sink(&server)
            .upsert(&[record("new", "New paper"), record("old", "Old paper")])
            .await;

        assert_eq!(outcome, Outcome::Success(2));
        lookup_new.assert_async().await;
        lookup_old.assert_async().await;
        patch.assert_async().await;
        create.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_batch_entry_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _lookup = server
            .mock("GET", "/users/42/items")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;
        let _create = server
            .mock("POST", "/users/42/items")
            .with_status(200)
            .with_body(r#"{"success":{},"unchanged":{},"failed":{"0":{"code":400,"message":"Invalid DOI"}}}"#)
            .create_async()
            .await;

        let outcome = sink(&server).upsert(&[record("x", "Broken")]).await;
        assert!(outcome.is_fatal());
    }

    #[tokio::test]
    async fn test_rate_limited_lookup_is_retryable() {
        let mut server = mockito::Server::new_async().await;
        let _lookup = server
            .mock("GET", "/users/42/items")
            .match_query(Matcher::Any)
            .with_status(429)
            .with_header("retry-after", "4")
            .create_async()
            .await;

        let outcome = sink(&server).upsert(&[record("x", "Any")]).await;
        assert_eq!(
            outcome,
            Outcome::RetryableFailure(FailureReason::RateLimit { retry_after: Some(4) })
        );
    }
}
