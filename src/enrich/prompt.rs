//! Enrichment prompt and response parsing.

use crate::models::{CanonicalRecord, Enrichment, FailureReason};

/// Keywords kept from one response
pub const MAX_KEYWORDS: usize = 7;

const KEYWORDS_LABEL: &str = "keywords:";

/// Prompt asking for an analysis of one record, ending in a keyword line.
pub fn analysis_prompt(record: &CanonicalRecord) -> String {
    let abstract_text = if record.r#abstract.trim().is_empty() {
        "No abstract available"
    } else {
        record.r#abstract.trim()
    };

    format!(
        "Analyze this research article and provide a concise breakdown.\n\
         Title: {title}\n\
         Authors: {authors}\n\
         Year: {year}\n\
         Abstract: {abstract_text}\n\
         \n\
         Provide:\n\
         1. Main research contributions\n\
         2. Key findings\n\
         3. Methodology used\n\
         4. Potential applications\n\
         \n\
         Finish with a single line of the form\n\
         Keywords: keyword one, keyword two, ...\n\
         listing 5-7 keywords that best describe the paper.",
        title = record.title,
        authors = if record.authors.is_empty() {
            "Unknown".to_string()
        } else {
            record.authors.join(", ")
        },
        year = record
            .year
            .map(|y| y.to_string())
            .unwrap_or_else(|| "Unknown".to_string()),
    )
}

/// Split a model response into the analysis text and its keywords.
///
/// The last line starting with "Keywords:" (any case, optional markdown
/// emphasis) supplies the keywords; everything else is the analysis. A
/// response with no usable text is a parse failure.
pub fn parse_enrichment(response: &str) -> Result<Enrichment, FailureReason> {
    let lines: Vec<&str> = response.lines().collect();

    let keyword_line = lines.iter().rposition(|line| {
        clean_label(line)
            .to_lowercase()
            .starts_with(KEYWORDS_LABEL)
    });

    let keywords = keyword_line
        .and_then(|idx| {
            clean_label(lines[idx])
                .split_once(':')
                .map(|(_, list)| parse_keywords(list))
        })
        .unwrap_or_default();

    let analysis = lines
        .iter()
        .enumerate()
        .filter(|(idx, _)| Some(*idx) != keyword_line)
        .map(|(_, line)| *line)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();

    if analysis.is_empty() && keywords.is_empty() {
        return Err(FailureReason::Parse(
            "model response contained no analysis".to_string(),
        ));
    }

    Ok(Enrichment { analysis, keywords })
}

/// Strip list markers and emphasis around a "Keywords:" label
fn clean_label(line: &str) -> String {
    line.trim()
        .trim_start_matches(|c: char| c == '-' || c == '*' || c == '#' || c.is_whitespace())
        .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c.is_whitespace())
        .replace("**", "")
}

fn parse_keywords(list: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for raw in list.split([',', ';']) {
        let keyword = raw
            .trim()
            .trim_matches(|c: char| c == '"' || c == '\'' || c == '.' || c == '*')
            .trim()
            .to_lowercase();
        if keyword.is_empty() || keywords.contains(&keyword) {
            continue;
        }
        keywords.push(keyword);
        if keywords.len() == MAX_KEYWORDS {
            break;
        }
    }
    keywords
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EnrichmentStatus;

    fn record() -> CanonicalRecord {
        CanonicalRecord {
            canonical_id: "abc".into(),
            title: "Graph Attention Networks".into(),
            authors: vec!["Petar Velickovic".into(), "Yoshua Bengio".into()],
            r#abstract: String::new(),
            year: Some(2018),
            venue: None,
            url: None,
            doi: None,
            source_ids: vec!["arxiv".into()],
            enrichment_status: EnrichmentStatus::Pending,
            enrichment: None,
        }
    }

    #[test]
    fn test_prompt_mentions_record() {
        let prompt = analysis_prompt(&record());
        assert!(prompt.contains("Title: Graph Attention Networks"));
        assert!(prompt.contains("Petar Velickovic, Yoshua Bengio"));
        assert!(prompt.contains("Year: 2018"));
        assert!(prompt.contains("No abstract available"));
        assert!(prompt.contains("Keywords:"));
    }

    #[test]
    fn test_parse_enrichment() {
        let response = "1. Contributions: attention over neighbours.\n\
                        2. Findings: state of the art on Cora.\n\
                        \n\
                        **Keywords:** Graph Neural Networks, attention, node classification, Attention, GAT.";

        let enrichment = parse_enrichment(response).unwrap();
        assert_eq!(
            enrichment.keywords,
            vec!["graph neural networks", "attention", "node classification", "gat"]
        );
        assert!(enrichment.analysis.starts_with("1. Contributions"));
        assert!(!enrichment.analysis.contains("Keywords"));
    }

    #[test]
    fn test_keywords_are_capped() {
        let response = "Analysis.\nKeywords: a, b, c, d, e, f, g, h, i";
        let enrichment = parse_enrichment(response).unwrap();
        assert_eq!(enrichment.keywords.len(), MAX_KEYWORDS);
    }

    #[test]
    fn test_missing_keywords_line() {
        let enrichment = parse_enrichment("Just an analysis.").unwrap();
        assert_eq!(enrichment.analysis, "Just an analysis.");
        assert!(enrichment.keywords.is_empty());
    }

    #[test]
    fn test_blank_response_is_parse_error() {
        let err = parse_enrichment("  \n \n").unwrap_err();
        assert!(matches!(err, FailureReason::Parse(_)));
    }
}
