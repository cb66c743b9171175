//! Paper records: raw per-source candidates and merged canonical records.

use serde::{Deserialize, Serialize};

/// One search hit exactly as a single source returned it.
///
/// Produced by one adapter call, possibly completed by the abstract back-fill,
/// and never mutated once the search stage is checkpointed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCandidate {
    /// Source that produced this candidate (e.g. "arxiv")
    pub source_id: String,

    /// Source-specific identifier (arXiv ID, S2 paper ID, result URL, ...)
    pub external_id: String,

    /// Paper title as returned by the source
    pub title: String,

    /// Author names in source order
    pub authors: Vec<String>,

    /// Abstract text
    pub r#abstract: Option<String>,

    /// Publication year
    pub year: Option<i32>,

    /// Journal, conference or archive name
    pub venue: Option<String>,

    /// Landing page URL
    pub url: Option<String>,

    /// Digital Object Identifier
    pub doi: Option<String>,

    /// Source payload fragment kept for audit
    #[serde(default)]
    pub raw_payload: serde_json::Value,
}

impl RawCandidate {
    /// Start building a candidate with its required fields.
    pub fn builder(
        source_id: impl Into<String>,
        external_id: impl Into<String>,
        title: impl Into<String>,
    ) -> RawCandidateBuilder {
        RawCandidateBuilder::new(source_id, external_id, title)
    }
}

/// Builder for [`RawCandidate`]; empty strings are treated as absent.
#[derive(Debug, Clone)]
pub struct RawCandidateBuilder {
    candidate: RawCandidate,
}

impl RawCandidateBuilder {
    pub fn new(
        source_id: impl Into<String>,
        external_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            candidate: RawCandidate {
                source_id: source_id.into(),
                external_id: external_id.into(),
                title: title.into().trim().to_string(),
                authors: Vec::new(),
                r#abstract: None,
                year: None,
                venue: None,
                url: None,
                doi: None,
                raw_payload: serde_json::Value::Null,
            },
        }
    }

    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.candidate.authors = authors
            .into_iter()
            .map(Into::into)
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();
        self
    }

    pub fn abstract_text(mut self, text: impl Into<String>) -> Self {
        self.candidate.r#abstract = non_empty(text.into());
        self
    }

    pub fn year(mut self, year: Option<i32>) -> Self {
        self.candidate.year = year;
        self
    }

    pub fn venue(mut self, venue: impl Into<String>) -> Self {
        self.candidate.venue = non_empty(venue.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.candidate.url = non_empty(url.into());
        self
    }

    pub fn doi(mut self, doi: impl Into<String>) -> Self {
        self.candidate.doi = non_empty(doi.into());
        self
    }

    pub fn raw_payload(mut self, payload: serde_json::Value) -> Self {
        self.candidate.raw_payload = payload;
        self
    }

    pub fn build(self) -> RawCandidate {
        self.candidate
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Enrichment lifecycle of a canonical record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EnrichmentStatus {
    #[default]
    Pending,
    Enriched,
    EnrichmentFailed { reason: String },
}

impl EnrichmentStatus {
    pub fn label(&self) -> &'static str {
        match self {
            EnrichmentStatus::Pending => "Pending",
            EnrichmentStatus::Enriched => "Enriched",
            EnrichmentStatus::EnrichmentFailed { .. } => "EnrichmentFailed",
        }
    }
}

/// Model-generated analysis attached to a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Enrichment {
    /// Free-form analysis (contributions, findings, methodology, applications)
    pub analysis: String,

    /// Short keywords, usable as reference-manager tags
    pub keywords: Vec<String>,
}

/// A deduplicated paper merged from one or more raw candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    /// Stable identifier derived from the normalized title and year
    pub canonical_id: String,

    pub title: String,

    pub authors: Vec<String>,

    /// Longest abstract seen across sources (empty if none)
    pub r#abstract: String,

    /// Lowest year seen across sources
    pub year: Option<i32>,

    pub venue: Option<String>,

    pub url: Option<String>,

    pub doi: Option<String>,

    /// Every source that contributed a candidate, sorted
    pub source_ids: Vec<String>,

    #[serde(default)]
    pub enrichment_status: EnrichmentStatus,

    #[serde(default)]
    pub enrichment: Option<Enrichment>,
}

impl CanonicalRecord {
    pub fn is_enriched(&self) -> bool {
        self.enrichment_status == EnrichmentStatus::Enriched
    }

    /// Attach a successful enrichment.
    pub fn mark_enriched(&mut self, enrichment: Enrichment) {
        self.enrichment = Some(enrichment);
        self.enrichment_status = EnrichmentStatus::Enriched;
    }

    /// Record a terminal enrichment failure; the record itself is kept.
    pub fn mark_enrichment_failed(&mut self, reason: impl Into<String>) {
        self.enrichment = None;
        self.enrichment_status = EnrichmentStatus::EnrichmentFailed {
            reason: reason.into(),
        };
    }
}
