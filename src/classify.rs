// src/classify.rs
// Lexical query classification (no model call on the hot path)

use crate::types::QueryClass;
use regex::Regex;
use std::sync::LazyLock;

/// Queries longer than this are treated as research questions
const RESEARCH_WORD_COUNT: usize = 25;

static CODE_TOKEN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    // foo::bar, foo(), `code`, snake_case_ident, .rs/.py file names
    Regex::new(r"(::|\w\(\)|`[^`]+`|\b[a-z]+_[a-z_]+\b|\.\b(rs|py|ts|js|go|toml|json|yaml)\b)").ok()
});

// A 4xx/5xx number only counts next to HTTP wording: "returns 503", "HTTP 429", "404 not found"
static STATUS_CODE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)\b(https?|status|code|returns?|returned|responds?|responded|got|response)\b",
        r"\W{0,3}(an?\s+)?(code\W{0,3})?[45]\d\d\b",
        r"|\b[45]\d\d\W{0,3}(errors?|status|response|bad request|unauthorized|forbidden|not found",
        r"|internal|service unavailable|too many requests|gateway)\b",
    ))
    .ok()
});

const RESEARCH_MARKERS: &[&str] = &[
    "compare",
    "comparison",
    "pros and cons",
    "trade-off",
    "tradeoff",
    "in depth",
    "in-depth",
    "research",
    "survey",
    "history of",
    "analyze",
    "analyse",
    "implications",
    "what are the differences",
];

const TECHNICAL_MARKERS: &[&str] = &[
    "error",
    "exception",
    "stack trace",
    "panic",
    "compile",
    "api",
    "function",
    "library",
    "crate",
    "config",
    "deploy",
    "docker",
    "kubernetes",
    "sql",
    "regex",
    "segfault",
    "how do i implement",
    "how to implement",
];

/// Classify a raw query
pub fn classify(query: &str) -> QueryClass {
    let q = query.trim().to_lowercase();

    if q.split_whitespace().count() > RESEARCH_WORD_COUNT
        || RESEARCH_MARKERS.iter().any(|m| q.contains(m))
    {
        return QueryClass::Research;
    }

    let matches = |re: &Option<Regex>| re.as_ref().is_some_and(|re| re.is_match(query));
    let looks_like_code = matches(&CODE_TOKEN) || matches(&STATUS_CODE);
    if looks_like_code || TECHNICAL_MARKERS.iter().any(|m| contains_word(&q, m)) {
        return QueryClass::Technical;
    }

    QueryClass::Simple
}

/// Substring match on word boundaries ("api" must not match "capital")
fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(i, _)| {
        let before = haystack[..i].chars().next_back();
        let after = haystack[i + needle.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_factual_query() {
        assert_eq!(classify("What is the capital of France?"), QueryClass::Simple);
    }

    #[test]
    fn test_code_tokens_are_technical() {
        assert_eq!(
            classify("why does tokio::spawn require Send"),
            QueryClass::Technical
        );
        assert_eq!(classify("`cargo build` fails on arm"), QueryClass::Technical);
        assert_eq!(classify("server returns 503 after deploy"), QueryClass::Technical);
    }

    #[test]
    fn test_status_codes_need_http_context() {
        assert_eq!(classify("HTTP 429 from the search provider"), QueryClass::Technical);
        assert_eq!(classify("Why did the page give 404 not found"), QueryClass::Technical);
        assert_eq!(classify("the proxy returned a 502"), QueryClass::Technical);
        assert_eq!(classify("How many of the 500 people attended?"), QueryClass::Simple);
        assert_eq!(classify("Who won the 400 metre race in 1996?"), QueryClass::Simple);
    }

    #[test]
    fn test_technical_vocabulary() {
        assert_eq!(
            classify("How do I read an API error response?"),
            QueryClass::Technical
        );
    }

    #[test]
    fn test_word_boundaries() {
        // "capital" contains "api" but is not technical
        assert!(!contains_word("the capital city", "api"));
        assert!(contains_word("an api key", "api"));
    }

    #[test]
    fn test_research_markers() {
        assert_eq!(
            classify("Compare Raft and Paxos for geo-replicated storage"),
            QueryClass::Research
        );
    }

    #[test]
    fn test_long_queries_are_research() {
        let query = "word ".repeat(RESEARCH_WORD_COUNT + 1);
        assert_eq!(classify(&query), QueryClass::Research);
    }
}
