//! Abstract back-fill for candidates that arrive with only a snippet.
//!
//! Listing pages such as Google Scholar return a truncated two-line snippet
//! instead of the abstract. Before the search stage is checkpointed the
//! back-fill replaces it: first through one batched arXiv id lookup for
//! results hosted on arXiv, then from the abstract markup of the landing page.
//! Every request goes through the resilience wrapper; a failed lookup leaves
//! the candidate as the source returned it.

use futures_util::stream::{self, StreamExt};
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{Outcome, RawCandidate};
use crate::sources::Source;
use crate::utils::{checked_text, ids, HttpClient, Identity, RateLimiter, Resilience, RetryPolicy};

/// Landing pages fetched at once; the page limiter still paces them
const PAGE_CONCURRENCY: usize = 4;

/// Abstract markup tried in order on a landing page
const ABSTRACT_SELECTORS: &[&str] = &[
    "div.abstract",
    "div#abstract",
    "section.abstract",
    "p.abstract",
    r#"meta[name="description"]"#,
    r#"meta[property="og:description"]"#,
];

/// Whether a candidate's abstract is missing or a truncated snippet
pub fn needs_abstract(candidate: &RawCandidate) -> bool {
    match candidate.r#abstract.as_deref().map(str::trim) {
        None | Some("") => true,
        Some(text) => text.ends_with('…') || text.ends_with("..."),
    }
}

#[derive(Debug, Clone)]
struct LandingPages {
    client: HttpClient,
    limiter: RateLimiter,
}

impl LandingPages {
    async fn fetch_abstract(&self, url: &str, identity: &Identity) -> Outcome<Option<String>> {
        self.limiter.acquire().await;

        let response = match self
            .client
            .get(url, identity)
            .header("Accept", "text/html,application/xhtml+xml")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return Outcome::failure(e.into()),
        };

        match checked_text(response).await {
            Ok(html) => Outcome::Success(extract_abstract(&html)),
            Err(reason) => Outcome::failure(reason),
        }
    }
}

/// Completes snippet-only abstracts from arXiv and landing pages
#[derive(Debug, Clone)]
pub struct AbstractBackfill {
    resilience: Resilience,
    policy: RetryPolicy,
    arxiv: Option<Arc<dyn Source>>,
    pages: Option<LandingPages>,
}

impl AbstractBackfill {
    /// A back-fill with no lookups configured yet
    pub fn new(resilience: Resilience, policy: RetryPolicy) -> Self {
        Self {
            resilience,
            policy,
            arxiv: None,
            pages: None,
        }
    }

    /// Resolve arXiv-hosted results through this source's id lookup.
    ///
    /// Pass the registered arXiv source so both share one rate limiter.
    pub fn with_arxiv(mut self, source: Arc<dyn Source>) -> Self {
        self.arxiv = Some(source);
        self
    }

    /// Read abstracts from landing pages, paced by `limiter`
    pub fn with_landing_pages(mut self, client: HttpClient, limiter: RateLimiter) -> Self {
        self.pages = Some(LandingPages { client, limiter });
        self
    }

    /// Return the candidates with as many snippets replaced as possible
    pub async fn fill(&self, mut candidates: Vec<RawCandidate>) -> Vec<RawCandidate> {
        if !candidates.iter().any(needs_abstract) {
            return candidates;
        }

        if let Some(arxiv) = &self.arxiv {
            self.fill_from_arxiv(arxiv.as_ref(), &mut candidates).await;
        }
        if let Some(pages) = &self.pages {
            self.fill_from_pages(pages, &mut candidates).await;
        }

        candidates
    }

    async fn fill_from_arxiv(&self, arxiv: &dyn Source, candidates: &mut [RawCandidate]) {
        let wanted: Vec<(usize, String)> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.source_id != arxiv.id() && needs_abstract(c))
            .filter_map(|(i, c)| arxiv_id_of(c).map(|id| (i, id)))
            .collect();
        if wanted.is_empty() {
            return;
        }

        let mut ids: Vec<String> = wanted.iter().map(|(_, id)| id.clone()).collect();
        ids.sort();
        ids.dedup();

        let label = format!("backfill:{}", arxiv.id());
        let requested = &ids;
        let outcome = self
            .resilience
            .execute(&label, &self.policy, |identity| async move {
                arxiv.lookup(requested, &identity).await
            })
            .await;

        let found: HashMap<String, RawCandidate> = match outcome.into_result() {
            Ok(records) => records
                .into_iter()
                .map(|r| (r.external_id.clone(), r))
                .collect(),
            Err(reason) => {
                tracing::warn!("{} lookup failed, keeping snippets: {}", arxiv.name(), reason);
                return;
            }
        };

        let mut filled = 0;
        for (index, id) in &wanted {
            let Some(record) = found.get(id) else {
                continue;
            };
            let candidate = &mut candidates[*index];
            let origin = format!("{}:{}", arxiv.id(), id);
            if replace_abstract(candidate, record.r#abstract.as_deref().unwrap_or_default(), &origin) {
                filled += 1;
            }
            if candidate.authors.is_empty() {
                candidate.authors = record.authors.clone();
            }
            if candidate.doi.is_none() {
                candidate.doi = record.doi.clone();
            }
        }

        tracing::info!(
            "Back-filled {} of {} abstracts from {}",
            filled,
            wanted.len(),
            arxiv.name()
        );
    }

    async fn fill_from_pages(&self, pages: &LandingPages, candidates: &mut [RawCandidate]) {
        let wanted: Vec<(usize, String)> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| needs_abstract(c))
            .filter_map(|(i, c)| {
                c.url
                    .as_deref()
                    .filter(|url| is_html_page(url))
                    .map(|url| (i, url.to_string()))
            })
            .collect();
        if wanted.is_empty() {
            return;
        }

        let outcomes: Vec<(usize, Outcome<Option<String>>)> = stream::iter(wanted)
            .map(|(index, url)| async move {
                let label = format!("backfill:page:{}", url);
                let url = url.as_str();
                let outcome = self
                    .resilience
                    .execute(&label, &self.policy, |identity| async move {
                        pages.fetch_abstract(url, &identity).await
                    })
                    .await;
                (index, outcome)
            })
            .buffered(PAGE_CONCURRENCY)
            .collect()
            .await;

        let attempted = outcomes.len();
        let mut filled = 0;
        for (index, outcome) in outcomes {
            if let Outcome::Success(Some(text)) = outcome {
                if replace_abstract(&mut candidates[index], &text, "landing_page") {
                    filled += 1;
                }
            }
        }

        tracing::info!("Back-filled {} of {} abstracts from landing pages", filled, attempted);
    }
}

/// arXiv id from the candidate's URL or the id its source recorded
fn arxiv_id_of(candidate: &RawCandidate) -> Option<String> {
    candidate
        .url
        .as_deref()
        .and_then(ids::arxiv_id_from_url)
        .or_else(|| {
            candidate
                .raw_payload
                .get("arxiv_id")
                .and_then(|v| v.as_str())
                .map(|id| ids::strip_arxiv_version(id).to_string())
        })
}

fn is_html_page(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    (lower.starts_with("http://") || lower.starts_with("https://")) && !lower.ends_with(".pdf")
}

/// Keep the longer abstract; records where the new one came from
fn replace_abstract(candidate: &mut RawCandidate, text: &str, origin: &str) -> bool {
    let text = text.trim();
    let current = candidate
        .r#abstract
        .as_deref()
        .map_or(0, |a| a.trim().chars().count());
    if text.is_empty() || text.chars().count() <= current {
        return false;
    }

    candidate.r#abstract = Some(text.to_string());
    if candidate.raw_payload.is_null() {
        candidate.raw_payload = serde_json::json!({});
    }
    if let Some(payload) = candidate.raw_payload.as_object_mut() {
        payload.insert("abstract_from".to_string(), origin.into());
    }
    true
}

/// First abstract-looking element of a landing page
fn extract_abstract(html: &str) -> Option<String> {
    let document = Html::parse_document(html);

    ABSTRACT_SELECTORS
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .find_map(|selector| {
            let element = document.select(&selector).next()?;
            let raw = match element.value().attr("content") {
                Some(content) => content.to_string(),
                None => element.text().collect::<String>(),
            };
            let text = strip_label(&raw.split_whitespace().collect::<Vec<_>>().join(" "));
            (!text.is_empty()).then_some(text)
        })
}

/// Drop a leading "Abstract" / "Abstract:" heading
fn strip_label(text: &str) -> String {
    const LABEL: &str = "abstract";
    let text = text.trim();
    match (text.get(..LABEL.len()), text.get(LABEL.len()..)) {
        (Some(head), Some(rest))
            if head.eq_ignore_ascii_case(LABEL)
                && rest.chars().next().map_or(true, |c| !c.is_alphanumeric()) =>
        {
            rest.trim_start_matches([':', '.', '-', ' ']).trim().to_string()
        }
        _ => text.to_string(),
    }
}
