//! Query preprocessing
//!
//! Two pure transformations run before any retrieval:
//! - Temporal expansion: a fixed table of relative phrases ("today",
//!   "last week", ...) gets the computed literal date or period spliced in
//!   after the phrase. Plain substring substitution, once per phrase,
//!   first match wins.
//! - Entity filtering: names coming back from best-effort NER are cleaned
//!   and de-duplicated before they steer retrieval.
//!
//! Both are functions of their inputs and the supplied clock only.

use chrono::{DateTime, Datelike, Duration, Utc};
use corpusqa_common::types::ExtractedEntity;

/// Preprocessed query ready for strategy selection and retrieval
#[derive(Debug, Clone)]
pub struct PreprocessedQuery {
    /// Raw query text as received
    pub original: String,

    /// Query with temporal phrases expanded to literal dates
    pub expanded: String,

    /// Filtered entity names, first-seen order
    pub entities: Vec<String>,
}

/// Expand relative temporal phrases in place
///
/// Each phrase in the fixed table is replaced at its first occurrence with
/// `"<phrase> <literal>"`; later occurrences of the same phrase are left
/// alone.
pub fn expand_temporal(text: &str, now: DateTime<Utc>) -> String {
    let mut out = text.to_string();

    // Longer phrases first so "last week" is not clipped by a bare "week"
    // entry ever being added to this table.
    let table: [(&str, String); 8] = [
        ("yesterday", (now - Duration::days(1)).format("%Y-%m-%d").to_string()),
        ("today", now.format("%Y-%m-%d").to_string()),
        ("this week", week_range(now)),
        ("last week", week_range(now - Duration::days(7))),
        ("this month", now.format("%Y-%m").to_string()),
        ("last month", previous_month(now)),
        ("this year", now.format("%Y").to_string()),
        ("last year", format!("{}", now.year() - 1)),
    ];

    for (phrase, literal) in &table {
        if let Some(pos) = find_ascii_case_insensitive(&out, phrase) {
            let end = pos + phrase.len();
            out.insert_str(end, &format!(" {}", literal));
        }
    }

    out
}

/// Monday-to-Sunday range containing `day`, e.g. "2025-05-26 to 2025-06-01"
fn week_range(day: DateTime<Utc>) -> String {
    let weekday = day.weekday().num_days_from_monday() as i64;
    let monday = day - Duration::days(weekday);
    let sunday = monday + Duration::days(6);
    format!(
        "{} to {}",
        monday.format("%Y-%m-%d"),
        sunday.format("%Y-%m-%d")
    )
}

fn previous_month(now: DateTime<Utc>) -> String {
    let (year, month) = if now.month() == 1 {
        (now.year() - 1, 12)
    } else {
        (now.year(), now.month() - 1)
    };
    format!("{:04}-{:02}", year, month)
}

/// Byte offset of the first case-insensitive match of `needle` in `haystack`
fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    let haystack_bytes = haystack.as_bytes();
    let needle_bytes = needle.as_bytes();

    (0..=haystack_bytes.len() - needle_bytes.len()).find(|&start| {
        haystack.is_char_boundary(start)
            && haystack_bytes[start..start + needle_bytes.len()]
                .iter()
                .zip(needle_bytes)
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    })
}

/// Stopwords dropped from extracted entity names: question words and
/// generic nouns that NER services routinely misfire on.
const ENTITY_STOPWORDS: &[&str] = &[
    "what", "who", "whom", "when", "where", "why", "how", "which", "whose",
    "book", "books", "person", "people", "document", "documents", "file",
    "files", "thing", "things", "name", "names", "someone", "anyone",
    "information", "detail", "details", "content", "contents",
];

/// Clean and de-duplicate entity names from NER output
///
/// Rules, in order: strip a trailing possessive `'s` and surrounding
/// punctuation; drop single-character tokens except "I" and "A"; drop
/// stopwords; drop names with no alphabetic character; de-duplicate
/// case-insensitively preserving first-seen order.
pub fn filter_entity_names(raw: &[ExtractedEntity]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();

    for entity in raw {
        let mut name = entity.name.trim().to_string();

        // Trailing possessive
        if name.to_lowercase().ends_with("'s") {
            name.truncate(name.len() - 2);
        }
        let name = name
            .trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
            .to_string();

        if name.is_empty() {
            continue;
        }
        if name.chars().count() == 1 && name != "I" && name != "A" {
            continue;
        }
        if ENTITY_STOPWORDS.contains(&name.to_lowercase().as_str()) {
            continue;
        }
        if !name.chars().any(|c| c.is_alphabetic()) {
            continue;
        }
        if seen.insert(name.to_lowercase()) {
            out.push(name);
        }
    }

    out
}

/// Run both preprocessing passes
pub fn preprocess(query: &str, entities: &[ExtractedEntity], now: DateTime<Utc>) -> PreprocessedQuery {
    PreprocessedQuery {
        original: query.to_string(),
        expanded: expand_temporal(query, now),
        entities: filter_entity_names(entities),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entity(name: &str) -> ExtractedEntity {
        ExtractedEntity {
            name: name.to_string(),
            entity_type: None,
        }
    }

    #[test]
    fn test_yesterday_expansion() {
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap();
        let expanded = expand_temporal("what happened yesterday", now);
        assert!(expanded.contains("yesterday 2025-06-01"), "{}", expanded);
    }

    #[test]
    fn test_today_expansion() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let expanded = expand_temporal("schedule for Today", now);
        assert!(expanded.contains("Today 2025-06-01"), "{}", expanded);
    }

    #[test]
    fn test_expansion_applies_once_per_phrase() {
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap();
        let expanded = expand_temporal("today and today again", now);
        assert_eq!(expanded.matches("2025-06-02").count(), 1);
    }

    #[test]
    fn test_month_and_year_periods() {
        let now = Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap();
        let expanded = expand_temporal("reports from last month and last year", now);
        assert!(expanded.contains("last month 2024-12"), "{}", expanded);
        assert!(expanded.contains("last year 2024"), "{}", expanded);
    }

    #[test]
    fn test_no_temporal_phrase_is_identity() {
        let now = Utc::now();
        assert_eq!(
            expand_temporal("solar panel efficiency", now),
            "solar panel efficiency"
        );
    }

    #[test]
    fn test_entity_filtering_rules() {
        let raw = vec![
            entity("Alice's"),
            entity("alice"),   // case-insensitive duplicate of the cleaned "Alice"
            entity("x"),       // single char
            entity("I"),       // allowed single char
            entity("what"),    // stopword
            entity("42"),      // no alphabetic character
            entity("Acme Corp."),
        ];

        let names = filter_entity_names(&raw);
        assert_eq!(names, vec!["Alice", "I", "Acme Corp"]);
    }

    #[test]
    fn test_preprocess_is_pure() {
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap();
        let a = preprocess("what happened yesterday", &[entity("Alice")], now);
        let b = preprocess("what happened yesterday", &[entity("Alice")], now);
        assert_eq!(a.expanded, b.expanded);
        assert_eq!(a.entities, b.entities);
    }
}
