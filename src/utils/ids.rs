//! Identifier extraction and normalization (arXiv ids, DOIs).

use regex::Regex;
use std::sync::OnceLock;

const ARXIV_ABS_URL: &str = "https://arxiv.org/abs";
const DOI_URL: &str = "https://doi.org";

fn arxiv_url_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"(?i)arxiv\.org/(?:abs|pdf)/(\d{4}\.\d{4,5}|[a-z\-]+(?:\.[a-z]{2})?/\d{7})").ok()
        })
        .as_ref()
}

fn doi_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"(?i)\b(10\.\d{4,9}/[^\s"<>]+)"#).ok())
        .as_ref()
}

/// Strip a trailing version suffix (`2301.12345v2` → `2301.12345`).
pub fn strip_arxiv_version(id: &str) -> &str {
    match id.rfind('v') {
        Some(pos) if pos > 0 && pos + 1 < id.len() && id[pos + 1..].chars().all(|c| c.is_ascii_digit()) => {
            &id[..pos]
        }
        _ => id,
    }
}

/// Find an arXiv id in an abs/pdf URL.
pub fn arxiv_id_from_url(url: &str) -> Option<String> {
    arxiv_url_pattern()?
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| strip_arxiv_version(m.as_str()).to_string())
}

/// Canonical landing page for an arXiv id.
pub fn arxiv_abs_url(id: &str) -> String {
    format!("{}/{}", ARXIV_ABS_URL, strip_arxiv_version(id))
}

/// Find a DOI anywhere in the text, without trailing punctuation.
pub fn find_doi(text: &str) -> Option<String> {
    doi_pattern()?
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ')']).to_string())
}

/// Resolver URL for a DOI.
pub fn doi_url(doi: &str) -> String {
    format!("{}/{}", DOI_URL, doi.trim())
}
