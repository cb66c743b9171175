//! Google Scholar research source implementation.
//!
//! Google Scholar has no public API; this source parses the HTML result page.
//! Google answers automated traffic with CAPTCHA / "unusual traffic" pages,
//! which are reported as rate-limit failures so the resilience wrapper backs
//! off and rotates to another identity. The source is compiled in by default
//! but only queried when listed in `search.sources`.

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;

use crate::models::{FailureReason, Outcome, Query, RawCandidate};
use crate::sources::Source;
use crate::utils::{checked_text, ids, HttpClient, Identity, RateLimiter};

const GOOGLE_SCHOLAR_URL: &str = "https://scholar.google.com";

/// Google serves at most 20 results per page
const MAX_PAGE_SIZE: usize = 20;

/// Markers of a bot-check page instead of results
const CAPTCHA_MARKERS: &[&str] = &[
    "gs_captcha",
    "g-recaptcha",
    "unusual traffic",
    "/sorry/index",
    "not a robot",
];

/// Google Scholar HTML source
#[derive(Debug, Clone)]
pub struct GoogleScholarSource {
    client: HttpClient,
    limiter: RateLimiter,
    base_url: String,
}

impl GoogleScholarSource {
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            limiter: RateLimiter::per_second(0.2),
            base_url: GOOGLE_SCHOLAR_URL.to_string(),
        }
    }

    /// Point at a different host (for testing)
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
            "{}/scholar?hl=en&q={}&start=0&num={}",
            self.base_url,
            urlencoding::encode(terms),
            max_results.clamp(1, MAX_PAGE_SIZE)
        )
    }

    /// Whether the page is a bot check rather than a result list
    fn is_captcha(html: &str) -> bool {
        let lower = html.to_lowercase();
        CAPTCHA_MARKERS.iter().any(|marker| lower.contains(marker))
    }

    /// Parse a result page. Runs synchronously: `Html` must not be held
    /// across an await point.
    fn parse_results(html: &str) -> Result<Vec<RawCandidate>, FailureReason> {
        if Self::is_captcha(html) {
            return Err(FailureReason::RateLimit { retry_after: None });
        }

        let document = Html::parse_document(html);
        let result_selector = Selector::parse("div.gs_r")
            .map_err(|e| FailureReason::Other(format!("selector: {}", e)))?;

        let candidates = document
            .select(&result_selector)
            .filter_map(|elem| Self::parse_result(&elem))
            .collect();

        Ok(candidates)
    }

    /// Parse one result block; blocks without a title are skipped
    fn parse_result(elem: &ElementRef) -> Option<RawCandidate> {
        let title_selector = Selector::parse("h3.gs_rt").ok()?;
        let link_selector = Selector::parse("h3.gs_rt a").ok()?;
        let byline_selector = Selector::parse("div.gs_a").ok()?;
        let snippet_selector = Selector::parse("div.gs_rs").ok()?;

        let title_elem = elem.select(&title_selector).next()?;
        let title = strip_markers(&element_text(&title_elem));
        if title.is_empty() {
            return None;
        }

        let href = elem
            .select(&link_selector)
            .next()
            .and_then(|a| a.value().attr("href"))
            .unwrap_or_default()
            .to_string();

        let byline = elem
            .select(&byline_selector)
            .next()
            .map(|b| element_text(&b))
            .unwrap_or_default();
        let (authors, venue, year) = parse_byline(&byline);

        let snippet = elem
            .select(&snippet_selector)
            .next()
            .map(|s| element_text(&s))
            .unwrap_or_default();

        let arxiv_id = ids::arxiv_id_from_url(&href);
        let url = match &arxiv_id {
            Some(id) => ids::arxiv_abs_url(id),
            None => href.clone(),
        };
        let doi = ids::find_doi(&href).unwrap_or_default();

        let external_id = elem
            .value()
            .attr("data-cid")
            .or_else(|| elem.value().attr("data-did"))
            .map(str::to_string)
            .unwrap_or_else(|| {
                if href.is_empty() {
                    format!("{:x}", md5::compute(&title))
                } else {
                    href.clone()
                }
            });

        Some(
            RawCandidate::builder("google_scholar", external_id, title)
                .authors(authors)
                .abstract_text(snippet)
                .year(year)
                .venue(venue.unwrap_or_default())
                .url(url)
                .doi(doi)
                .raw_payload(serde_json::json!({
                    "href": href,
                    "byline": byline,
                    "arxiv_id": arxiv_id,
                }))
                .build(),
        )
    }
}

fn element_text(elem: &ElementRef) -> String {
    elem.text()
        .collect::<String>()
        .replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Drop leading "[PDF]", "[HTML]", "[CITATION][C]" style markers
fn strip_markers(title: &str) -> String {
    let mut rest = title.trim();
    while rest.starts_with('[') {
        match rest.find(']') {
            Some(end) => rest = rest[end + 1..].trim_start(),
            None => break,
        }
    }
    rest.to_string()
}

fn year_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\b((?:19|20)\d{2})\b").ok())
        .as_ref()
}

/// Split "A Author, B Author - Venue, 2020 - host.org" into its parts.
fn parse_byline(byline: &str) -> (Vec<String>, Option<String>, Option<i32>) {
    let segments: Vec<&str> = byline.split(" - ").map(str::trim).collect();

    let authors = segments
        .first()
        .map(|s| {
            s.split(',')
                .map(|a| a.trim().trim_matches('…').trim().to_string())
                .filter(|a| !a.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let year = year_pattern().and_then(|re| {
        segments
            .iter()
            .skip(1)
            .find_map(|s| re.captures(s))
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    });

    // The middle segment is "Venue, 2020", "Venue" or just "2020"
    let venue = if segments.len() >= 3 {
        segments.get(1).and_then(|&s| {
            let name = s
                .rsplit_once(',')
                .filter(|(_, tail)| tail.trim().chars().all(|c| c.is_ascii_digit()))
                .map(|(head, _)| head)
                .unwrap_or(s)
                .trim()
                .trim_matches('…')
                .trim();
            if name.is_empty() || name.chars().all(|c| c.is_ascii_digit()) {
                None
            } else {
                Some(name.to_string())
            }
        })
    } else {
        None
    };

    (authors, venue, year)
}

#[async_trait]
impl Source for GoogleScholarSource {
    fn id(&self) -> &str {
        "google_scholar"
    }

    fn name(&self) -> &str {
        "Google Scholar"
    }

    async fn search(&self, query: &Query, identity: &Identity) -> Outcome<Vec<RawCandidate>> {
        let Some(terms) = query.terms() else {
            return Outcome::FatalFailure(FailureReason::InvalidRequest(
                "empty query".to_string(),
            ));
        };

        self.limiter.acquire().await;

        let url = self.search_url(terms, query.max_results);
        let response = match self
            .client
            .get(&url, identity)
            .header("Accept", "text/html,application/xhtml+xml")
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return Outcome::failure(e.into()),
        };

        // Bot checks are redirected to /sorry/ pages
        if response.url().path().starts_with("/sorry") {
            tracing::warn!("Google Scholar served a bot check to {}", identity.user_agent);
            return Outcome::RetryableFailure(FailureReason::RateLimit { retry_after: None });
        }

        match checked_text(response)
            .await
            .and_then(|body| Self::parse_results(&body))
        {
            Ok(mut candidates) => {
                candidates.truncate(query.max_results);
                Outcome::Success(candidates)
            }
            Err(reason) => Outcome::failure(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body><div id="gs_res_ccl_mid">
      <div class="gs_r gs_or gs_scl" data-cid="cid-1" data-did="did-1">
        <div class="gs_ri">
          <h3 class="gs_rt"><span class="gs_ctc"><span class="gs_ct1">[PDF]</span></span>
            <a href="https://arxiv.org/abs/1710.10903v3">Graph attention networks</a></h3>
          <div class="gs_a">P Veličković, G Cucurull, A Casanova… - arXiv preprint arXiv …, 2017 - arxiv.org</div>
          <div class="gs_rs">We present graph attention networks (GATs), novel neural network architectures…</div>
        </div>
      </div>
      <div class="gs_r gs_or gs_scl" data-cid="cid-2">
        <div class="gs_ri">
          <h3 class="gs_rt"><a href="https://dl.acm.org/doi/10.1145/3292500.3330919">Heterogeneous graph neural network</a></h3>
          <div class="gs_a">C Zhang, D Song, C Huang - Proceedings of the 25th ACM SIGKDD, 2019 - dl.acm.org</div>
        </div>
      </div>
      <div class="gs_r gs_or gs_scl"><div class="gs_ri"><div class="gs_a">no title here</div></div></div>
    </div></body></html>"#;

    #[test]
    fn test_parse_results() {
        let candidates = GoogleScholarSource::parse_results(PAGE).unwrap();
        assert_eq!(candidates.len(), 2);

        let gat = &candidates[0];
        assert_eq!(gat.external_id, "cid-1");
        assert_eq!(gat.title, "Graph attention networks");
        assert_eq!(gat.authors, vec!["P Veličković", "G Cucurull", "A Casanova"]);
        assert_eq!(gat.year, Some(2017));
        assert_eq!(gat.url.as_deref(), Some("https://arxiv.org/abs/1710.10903"));

        let hgnn = &candidates[1];
        assert_eq!(hgnn.doi.as_deref(), Some("10.1145/3292500.3330919"));
        assert_eq!(hgnn.venue.as_deref(), Some("Proceedings of the 25th ACM SIGKDD"));
        assert!(hgnn.r#abstract.is_none());
    }

    #[test]
    fn test_captcha_page_is_rate_limit() {
        let page = r#"<html><body><div id="gs_captcha_ccl">Please show you're not a robot</div></body></html>"#;
        let err = GoogleScholarSource::parse_results(page).unwrap_err();
        assert_eq!(err, FailureReason::RateLimit { retry_after: None });
        assert!(err.is_retryable());
    }

    #[test]
    fn test_strip_markers_and_byline() {
        assert_eq!(strip_markers("[CITATION][C] Deep learning"), "Deep learning");
        assert_eq!(strip_markers("Plain"), "Plain");

        let (authors, venue, year) = parse_byline("Y LeCun, Y Bengio, G Hinton - nature, 2015 - nature.com");
        assert_eq!(authors, vec!["Y LeCun", "Y Bengio", "G Hinton"]);
        assert_eq!(venue.as_deref(), Some("nature"));
        assert_eq!(year, Some(2015));

        let (_, venue, year) = parse_byline("J Doe - 2020 - example.org");
        assert_eq!(venue, None);
        assert_eq!(year, Some(2020));
    }

    #[test]
    fn test_year_pattern_is_compiled_once() {
        let first = year_pattern().unwrap();
        let second = year_pattern().unwrap();
        assert!(std::ptr::eq(first, second));

        for _ in 0..3 {
            let (_, _, year) = parse_byline("A Author - Venue, 1999 - host.org");
            assert_eq!(year, Some(1999));
        }
    }

    #[tokio::test]
    async fn test_unusual_traffic_page_over_http() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/scholar")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body("<html>Our systems have detected unusual traffic from your computer network.</html>")
            .create_async()
            .await;

        let source = GoogleScholarSource::new(HttpClient::direct().unwrap())
            .with_base_url(server.url())
            .with_rate_limiter(RateLimiter::unlimited());
        let outcome = source
            .search(&Query::new("graph neural networks"), &Identity::direct("ua"))
            .await;

        assert!(outcome.is_retryable());
    }
}
