//! Result merging: collapse raw candidates from every source into canonical
//! records.
//!
//! Two candidates describe the same paper when their normalized titles and
//! years are identical, or when the token-set Jaccard similarity of their
//! titles reaches the configured threshold. Matches are transitive: groups are
//! the connected components of the "same paper" relation, which makes the
//! result independent of input order.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::models::{CanonicalRecord, EnrichmentStatus, RawCandidate};

/// Default Jaccard threshold for fuzzy title matches
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.85;

/// Normalize a title for comparison: lowercase, punctuation replaced by
/// spaces, whitespace collapsed.
pub fn normalize_title(title: &str) -> String {
    title
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Exact-match key: normalized title plus year.
pub fn similarity_key(candidate: &RawCandidate) -> String {
    format!(
        "{}|{}",
        normalize_title(&candidate.title),
        candidate.year.map(|y| y.to_string()).unwrap_or_default()
    )
}

/// Token-set Jaccard similarity of two titles, in `[0, 1]`.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_title(a);
    let b = normalize_title(b);
    jaccard(&tokens(&a), &tokens(&b))
}

fn tokens(normalized: &str) -> HashSet<&str> {
    normalized.split_whitespace().collect()
}

fn jaccard(a: &HashSet<&str>, b: &HashSet<&str>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// Merges raw candidates into canonical records.
#[derive(Debug, Clone)]
pub struct Merger {
    threshold: f64,
}

impl Default for Merger {
    fn default() -> Self {
        Self::new(DEFAULT_SIMILARITY_THRESHOLD)
    }
}

impl Merger {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Merge candidates from all sources.
    ///
    /// Every candidate lands in exactly one record. Records come out in the
    /// order of their earliest candidate in the input.
    pub fn merge(&self, candidates: &[RawCandidate]) -> Vec<CanonicalRecord> {
        let groups = self.group(candidates);
        tracing::debug!(
            "Merged {} candidates into {} records",
            candidates.len(),
            groups.len()
        );

        groups
            .into_iter()
            .map(|members| reconcile(members.iter().map(|&i| &candidates[i]).collect()))
            .collect()
    }

    /// Indices of candidates grouped by paper, ordered by first index.
    fn group(&self, candidates: &[RawCandidate]) -> Vec<Vec<usize>> {
        let normalized: Vec<String> = candidates.iter().map(|c| normalize_title(&c.title)).collect();
        let token_sets: Vec<HashSet<&str>> = normalized.iter().map(|n| tokens(n)).collect();
        let mut sets = DisjointSet::new(candidates.len());

        // Identical normalized title and year
        let mut exact: HashMap<(&str, Option<i32>), usize> = HashMap::new();
        for (i, candidate) in candidates.iter().enumerate() {
            if normalized[i].is_empty() {
                continue;
            }
            match exact.get(&(normalized[i].as_str(), candidate.year)) {
                Some(&first) => sets.union(first, i),
                None => {
                    exact.insert((normalized[i].as_str(), candidate.year), i);
                }
            }
        }

        // Fuzzy title match
        for i in 0..candidates.len() {
            for j in (i + 1)..candidates.len() {
                if sets.find(i) == sets.find(j) {
                    continue;
                }
                if jaccard(&token_sets[i], &token_sets[j]) >= self.threshold {
                    sets.union(i, j);
                }
            }
        }

        let mut by_root: HashMap<usize, usize> = HashMap::new();
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for i in 0..candidates.len() {
            let root = sets.find(i);
            match by_root.get(&root) {
                Some(&g) => groups[g].push(i),
                None => {
                    by_root.insert(root, groups.len());
                    groups.push(vec![i]);
                }
            }
        }
        groups
    }
}

/// Merge with the default threshold.
pub fn merge_candidates(candidates: &[RawCandidate]) -> Vec<CanonicalRecord> {
    Merger::default().merge(candidates)
}

/// Deterministic member order, independent of where members sat in the input
fn canonical_order(a: &RawCandidate, b: &RawCandidate) -> Ordering {
    a.source_id
        .cmp(&b.source_id)
        .then_with(|| a.external_id.cmp(&b.external_id))
        .then_with(|| a.title.cmp(&b.title))
        .then_with(|| a.year.cmp(&b.year))
        .then_with(|| a.r#abstract.cmp(&b.r#abstract))
}

/// Build one canonical record from the members of a group.
fn reconcile(mut members: Vec<&RawCandidate>) -> CanonicalRecord {
    members.sort_by(|a, b| canonical_order(a, b));
    let representative = members[0];

    let year = members.iter().filter_map(|c| c.year).min();

    // Longest abstract; ties go to the earliest member in canonical order
    let r#abstract = members
        .iter()
        .filter_map(|c| c.r#abstract.as_deref())
        .fold(None::<&str>, |best, text| match best {
            Some(b) if b.chars().count() >= text.chars().count() => Some(b),
            _ => Some(text),
        })
        .unwrap_or_default()
        .to_string();

    let mut seen_authors = HashSet::new();
    let authors = members
        .iter()
        .flat_map(|c| c.authors.iter())
        .filter(|a| seen_authors.insert(normalize_title(a)))
        .cloned()
        .collect();

    let source_ids: BTreeSet<String> = members.iter().map(|c| c.source_id.clone()).collect();

    CanonicalRecord {
        canonical_id: canonical_id(representative, year),
        title: representative.title.clone(),
        authors,
        r#abstract,
        year,
        venue: first_present(&members, |c| c.venue.as_ref()),
        url: first_present(&members, |c| c.url.as_ref()),
        doi: first_present(&members, |c| c.doi.as_ref()),
        source_ids: source_ids.into_iter().collect(),
        enrichment_status: EnrichmentStatus::Pending,
        enrichment: None,
    }
}

fn first_present<'a>(
    members: &[&'a RawCandidate],
    field: impl Fn(&'a RawCandidate) -> Option<&'a String>,
) -> Option<String> {
    members.iter().find_map(|&c| field(c)).cloned()
}

/// Stable id from the normalized title and year. Untitled records fall back
/// to the representative's source identity so they never collide.
fn canonical_id(representative: &RawCandidate, year: Option<i32>) -> String {
    let title = normalize_title(&representative.title);
    let seed = if title.is_empty() {
        format!(
            "untitled|{}|{}",
            representative.source_id, representative.external_id
        )
    } else {
        format!("{}|{}", title, year.map(|y| y.to_string()).unwrap_or_default())
    };
    format!("{:x}", md5::compute(seed))[..16].to_string()
}

/// Union-find with path compression; union keeps the smaller index as root.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        let mut root = i;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = i;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (low, high) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[high] = low;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(source: &str, id: &str, title: &str, year: Option<i32>) -> RawCandidate {
        RawCandidate::builder(source, id, title).year(year).build()
    }

    fn sorted_by_id(mut records: Vec<CanonicalRecord>) -> Vec<CanonicalRecord> {
        records.sort_by(|a, b| a.canonical_id.cmp(&b.canonical_id));
        records
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(
            normalize_title("  Attention Is   All You Need! "),
            "attention is all you need"
        );
        assert_eq!(normalize_title("Graph-Based RAG: A Survey"), "graph based rag a survey");
        assert_eq!(normalize_title("???"), "");
    }

    #[test]
    fn test_similarity() {
        assert_eq!(title_similarity("Deep Learning", "deep learning."), 1.0);
        assert_eq!(title_similarity("", ""), 0.0);
        let s = title_similarity(
            "Retrieval augmented generation for knowledge intensive NLP tasks",
            "Retrieval augmented generation for knowledge intensive tasks",
        );
        assert!(s >= 0.85 && s < 1.0);
    }

    #[test]
    fn test_exact_key_merges_across_sources() {
        let candidates = vec![
            RawCandidate::builder("semantic", "s2-1", "Attention Is All You Need")
                .year(Some(2017))
                .authors(["Ashish Vaswani", "Noam Shazeer"])
                .abstract_text("Short.")
                .venue("NeurIPS")
                .build(),
            RawCandidate::builder("arxiv", "1706.03762", "Attention is all you need.")
                .year(Some(2017))
                .authors(["ashish vaswani", "Niki Parmar"])
                .abstract_text("The dominant sequence transduction models are based on RNNs.")
                .url("https://arxiv.org/abs/1706.03762")
                .build(),
        ];

        let records = merge_candidates(&candidates);
        assert_eq!(records.len(), 1);

        let record = &records[0];
        assert_eq!(record.source_ids, vec!["arxiv", "semantic"]);
        assert_eq!(record.title, "Attention is all you need.");
        assert_eq!(
            record.r#abstract,
            "The dominant sequence transduction models are based on RNNs."
        );
        assert_eq!(record.authors, vec!["ashish vaswani", "Niki Parmar", "Noam Shazeer"]);
        assert_eq!(record.venue.as_deref(), Some("NeurIPS"));
        assert_eq!(record.url.as_deref(), Some("https://arxiv.org/abs/1706.03762"));
        assert_eq!(record.enrichment_status, EnrichmentStatus::Pending);
    }

    #[test]
    fn test_fuzzy_match_keeps_lowest_year() {
        let candidates = vec![
            candidate(
                "arxiv",
                "a",
                "Retrieval augmented generation for knowledge intensive NLP tasks",
                Some(2021),
            ),
            candidate(
                "semantic",
                "b",
                "Retrieval-Augmented Generation for Knowledge-Intensive NLP Tasks",
                Some(2020),
            ),
        ];

        let records = merge_candidates(&candidates);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].year, Some(2020));
    }

    #[test]
    fn test_distinct_papers_stay_apart() {
        let candidates = vec![
            candidate("arxiv", "a", "Graph neural networks for molecules", Some(2020)),
            candidate("arxiv", "b", "Graph neural networks for traffic", Some(2020)),
            candidate("semantic", "c", "", Some(2020)),
            candidate("semantic", "d", "", Some(2020)),
        ];

        let records = merge_candidates(&candidates);
        assert_eq!(records.len(), 4);

        let ids: HashSet<_> = records.iter().map(|r| r.canonical_id.as_str()).collect();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn test_eight_candidates_two_shared() {
        // Two papers appear in both sources; the rest are unique
        let arxiv = [
            "Scaling laws for neural language models",
            "Chain of thought prompting elicits reasoning",
            "Denoising diffusion probabilistic models",
            "Proximal policy optimization algorithms",
            "Vision transformers at scale",
        ];
        let semantic = [
            "Scaling Laws for Neural Language Models",
            "Chain-of-Thought Prompting Elicits Reasoning",
            "Contrastive learning of visual representations",
        ];

        let mut candidates: Vec<RawCandidate> = arxiv
            .iter()
            .enumerate()
            .map(|(i, t)| candidate("arxiv", &format!("a{i}"), t, Some(2020)))
            .collect();
        candidates.extend(
            semantic
                .iter()
                .enumerate()
                .map(|(i, t)| candidate("semantic", &format!("s{i}"), t, Some(2020))),
        );

        let records = merge_candidates(&candidates);
        assert_eq!(records.len(), 6);

        let multi: Vec<_> = records.iter().filter(|r| r.source_ids.len() == 2).collect();
        assert_eq!(multi.len(), 2);
        assert_eq!(records[0].title, "Scaling laws for neural language models");
    }

    #[test]
    fn test_transitive_matches_form_one_group() {
        // a~b and b~c clear the threshold, a~c alone does not
        let a = "one two three four five six seven eight nine ten";
        let b = "one two three four five six seven eight nine ten eleven";
        let c = "one two three four five six seven eight nine ten eleven twelve";
        assert!(title_similarity(a, b) >= 0.85);
        assert!(title_similarity(b, c) >= 0.85);
        assert!(title_similarity(a, c) < 0.85);

        let forward = vec![
            candidate("x", "1", a, None),
            candidate("y", "2", b, None),
            candidate("z", "3", c, None),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();

        assert_eq!(merge_candidates(&forward).len(), 1);
        assert_eq!(merge_candidates(&reversed).len(), 1);
    }

    #[test]
    fn test_merge_is_order_independent() {
        let candidates = vec![
            RawCandidate::builder("semantic", "s1", "Learning to rank with transformers")
                .year(Some(2022))
                .authors(["B. Author", "A. Author"])
                .abstract_text("bbbb")
                .build(),
            RawCandidate::builder("arxiv", "x1", "Learning to Rank with Transformers")
                .year(Some(2022))
                .authors(["A. Author", "C. Author"])
                .abstract_text("aaaa")
                .build(),
            candidate("arxiv", "x2", "Sparse mixture of experts", Some(2021)),
            candidate("google_scholar", "g1", "Sparse Mixture-of-Experts", Some(2021)),
            candidate("google_scholar", "g2", "An unrelated title entirely", None),
        ];

        let baseline = sorted_by_id(merge_candidates(&candidates));

        let mut reversed = candidates.clone();
        reversed.reverse();
        assert_eq!(sorted_by_id(merge_candidates(&reversed)), baseline);

        for shift in 1..candidates.len() {
            let mut rotated = candidates.clone();
            rotated.rotate_left(shift);
            assert_eq!(sorted_by_id(merge_candidates(&rotated)), baseline);
        }
    }

    #[test]
    fn test_no_two_records_remain_similar() {
        let titles = [
            "Neural machine translation by jointly learning to align",
            "Neural Machine Translation by Jointly Learning to Align and Translate",
            "Sequence to sequence learning with neural networks",
            "Sequence to Sequence Learning with Neural Networks.",
            "Effective approaches to attention based neural machine translation",
            "Adam: a method for stochastic optimization",
            "ADAM A Method for Stochastic Optimization",
        ];
        let candidates: Vec<RawCandidate> = titles
            .iter()
            .enumerate()
            .map(|(i, t)| candidate(if i % 2 == 0 { "arxiv" } else { "semantic" }, &i.to_string(), t, None))
            .collect();

        let merger = Merger::default();
        let records = merger.merge(&candidates);

        for (i, a) in records.iter().enumerate() {
            for b in records.iter().skip(i + 1) {
                assert!(title_similarity(&a.title, &b.title) < merger.threshold());
                assert_ne!(normalize_title(&a.title), normalize_title(&b.title));
            }
        }

        let members: usize = records.iter().map(|r| r.source_ids.len()).sum();
        assert!(members <= candidates.len());
    }

    #[test]
    fn test_empty_input() {
        assert!(merge_candidates(&[]).is_empty());
    }
}
