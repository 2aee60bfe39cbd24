//! Query normalization and code/natural/hybrid classification.
//!
//! Classification is a deterministic scalar score built from surface
//! signals; it steers fusion weights and retrieval strategy but never
//! changes which modalities run.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Characters that suggest the query is a code fragment.
const CODE_SYMBOLS: &[char] = &[
    '(', ')', '{', '}', '[', ']', '.', ':', ';', '=', '<', '>', '!', '&', '|',
];

static CODE_KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "def", "fn", "func", "function", "class", "struct", "enum", "impl", "interface", "trait",
        "import", "export", "return", "const", "let", "var", "async", "await", "pub", "static",
        "void", "lambda", "self", "public", "private", "try", "catch", "except", "raise", "throw",
        "print", "println",
    ]
    .into_iter()
    .collect()
});

static QUESTION_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "how", "what", "why", "when", "where", "who", "which", "can", "could", "should", "would",
        "does", "do", "is", "are", "will",
    ]
    .into_iter()
    .collect()
});

static COMMON_VERBS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "find", "show", "get", "list", "make", "create", "use", "explain", "work", "works",
        "working", "need", "want", "help", "fix", "handle", "implement", "write", "run", "call",
        "display", "add", "remove", "update", "load", "search",
    ]
    .into_iter()
    .collect()
});

static FILE_EXTENSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b[\w\-]+\.(?:py|pyi|rs|ts|tsx|js|jsx|mjs|cjs|go|java|c|h|cpp|hpp|cs|rb|php|swift|kt|scala|sh|sql|html|css|json|yaml|yml|toml|xml|md|txt)\b",
    )
    .unwrap()
});

static PATH_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\.{1,2}[/\\]|[/\\])?[\w\-.]+[/\\][\w\-.]+").unwrap());

static CAMEL_CASE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[a-z]+[A-Z][a-zA-Z0-9]*\b").unwrap());

static SNAKE_CASE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[a-zA-Z][a-zA-Z0-9]*_[a-zA-Z0-9_]+\b").unwrap());

/// Trim and collapse internal whitespace runs to a single space.
pub fn normalize(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Canonical form used as a cache key: normalized, lowercased, trailing
/// punctuation stripped.
pub fn cache_key(query: &str) -> String {
    normalize(query)
        .to_lowercase()
        .trim_end_matches(['.', ',', '!', '?', ';', ':'])
        .to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Code,
    Natural,
    Hybrid,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Code => "code",
            QueryType::Natural => "natural",
            QueryType::Hybrid => "hybrid",
        }
    }
}

/// Surface signals observed in a query, recorded for telemetry.
#[derive(Debug, Clone, Serialize)]
pub struct Signals {
    pub symbol_density: f32,
    pub code_keyword_count: usize,
    pub has_file_extension: bool,
    pub has_path_pattern: bool,
    pub has_camel_case: bool,
    pub has_snake_case: bool,
    pub word_count: usize,
    pub avg_word_length: f32,
    pub starts_with_question_word: bool,
    pub has_common_verb: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub query_type: QueryType,
    pub confidence: f32,
    /// Raw scalar in [0, 1]; 0 is fully natural language, 1 is fully code.
    pub score: f32,
    pub signals: Signals,
}

/// Classify a (normalized) query.
pub fn classify(query: &str) -> Classification {
    let query = normalize(query);
    let words: Vec<&str> = query.split_whitespace().collect();
    let word_count = words.len();
    let char_count = query.chars().count().max(1);

    let symbol_count = query.chars().filter(|c| CODE_SYMBOLS.contains(c)).count()
        + query.matches("->").count();
    let symbol_density = symbol_count as f32 / char_count as f32;

    let lower_words: Vec<String> = words
        .iter()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric() && c != '_')
                .to_lowercase()
        })
        .collect();

    let code_keyword_count = lower_words
        .iter()
        .filter(|w| CODE_KEYWORDS.contains(w.as_str()))
        .count();

    let signals = Signals {
        symbol_density,
        code_keyword_count,
        has_file_extension: FILE_EXTENSION.is_match(&query),
        has_path_pattern: PATH_PATTERN.is_match(&query),
        has_camel_case: CAMEL_CASE.is_match(&query),
        has_snake_case: SNAKE_CASE.is_match(&query),
        word_count,
        avg_word_length: if word_count == 0 {
            0.0
        } else {
            words.iter().map(|w| w.chars().count()).sum::<usize>() as f32 / word_count as f32
        },
        starts_with_question_word: lower_words
            .first()
            .map(|w| QUESTION_WORDS.contains(w.as_str()))
            .unwrap_or(false),
        has_common_verb: lower_words
            .iter()
            .any(|w| COMMON_VERBS.contains(w.as_str())),
    };

    let mut score: f32 = 0.5;

    score += (signals.symbol_density * 0.4).min(0.2);
    score += (signals.code_keyword_count as f32 * 0.05).min(0.15);
    if signals.has_file_extension {
        score += 0.15;
    }
    if signals.has_path_pattern {
        score += 0.15;
    }
    if signals.has_camel_case || signals.has_snake_case {
        score += 0.10;
    }
    if (1..=3).contains(&word_count) {
        score += 0.10;
    }
    if signals.starts_with_question_word {
        score -= 0.20;
    }
    if word_count >= 5 {
        score -= 0.15;
    }
    let has_code_signal = symbol_count > 0
        || signals.code_keyword_count > 0
        || signals.has_file_extension
        || signals.has_path_pattern
        || signals.has_camel_case
        || signals.has_snake_case;
    if !has_code_signal {
        score -= 0.10;
    }
    if signals.has_common_verb {
        score -= 0.10;
    }

    let score = score.clamp(0.0, 1.0);

    let query_type = if score >= 0.6 {
        QueryType::Code
    } else if score <= 0.3 {
        QueryType::Natural
    } else {
        QueryType::Hybrid
    };

    let confidence = match query_type {
        QueryType::Code => score,
        QueryType::Natural => 1.0 - score,
        QueryType::Hybrid => 1.0 - 2.0 * (score - 0.5).abs(),
    };

    Classification {
        query_type,
        confidence,
        score,
        signals,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize("  foo   bar\t baz \n"), "foo bar baz");
    }

    #[test]
    fn test_cache_key_strips_trailing_punctuation() {
        assert_eq!(cache_key("How does Auth WORK?"), "how does auth work");
        assert_eq!(cache_key("login;"), "login");
    }

    #[test]
    fn test_natural_question() {
        let c = classify("how does authentication work");
        assert_eq!(c.query_type, QueryType::Natural);
        assert!(c.score <= 0.3, "score {}", c.score);
        assert!(c.confidence >= 0.7);
        assert!(c.signals.starts_with_question_word);
    }

    #[test]
    fn test_code_fragment() {
        let c = classify("def authenticate_user(");
        assert_eq!(c.query_type, QueryType::Code);
        assert!(c.score >= 0.6, "score {}", c.score);
        assert!(c.signals.has_snake_case);
        assert_eq!(c.signals.code_keyword_count, 1);
    }

    #[test]
    fn test_hybrid_short_phrase() {
        let c = classify("login page slow");
        assert_eq!(c.query_type, QueryType::Hybrid);
        assert!((c.score - 0.5).abs() < 0.15, "score {}", c.score);
        assert!(c.confidence > 0.5);
    }

    #[test]
    fn test_path_query_leans_code() {
        let c = classify("auth/login.py");
        assert_eq!(c.query_type, QueryType::Code);
        assert!(c.signals.has_path_pattern);
        assert!(c.signals.has_file_extension);
    }

    #[test]
    fn test_deterministic() {
        let a = classify("ReconnectingWebSocket retry");
        let b = classify("ReconnectingWebSocket retry");
        assert_eq!(a.score, b.score);
        assert_eq!(a.query_type, b.query_type);
    }

    #[test]
    fn test_score_clamped() {
        let c = classify("fn impl struct enum pub{}<>=!&|(){}[];;;");
        assert!(c.score <= 1.0);
        let n = classify("how could someone possibly want to explain all of these things");
        assert!(n.score >= 0.0);
    }
}
