//! FTS5 query shaping for node search.
//!
//! # Invariants
//! - Every user term is quoted, so FTS5 operators in user text are literal.
//! - Terms are combined with `AND`.
//! - A term that splits into several tokens is a phrase: its tokens must be
//!   adjacent within one column.

use crate::error::RepoError;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Maximum hits returned by one search call.
pub const SEARCH_RESULT_LIMIT: u32 = 50;

/// Builds an FTS5 match expression from free text.
///
/// Returns `None` for blank input.
pub(crate) fn build_match_expression(text: &str) -> Option<String> {
    let terms = text
        .split_whitespace()
        .filter(|term| term.chars().any(char::is_alphanumeric))
        .map(escape_fts_term)
        .collect::<Vec<_>>();

    if terms.is_empty() {
        return None;
    }

    Some(terms.join(" AND "))
}

fn escape_fts_term(raw: &str) -> String {
    let escaped = raw.replace('"', "\"\"");
    format!("\"{escaped}\"")
}

/// Lowercased word tokens with diacritics folded, as produced by
/// `unicode61 remove_diacritics 2`.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    fold_diacritics(text)
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn fold_diacritics(text: &str) -> String {
    text.nfd().filter(|ch| !is_combining_mark(*ch)).collect()
}

/// Token phrases of a free-text query, one per term kept by
/// [`build_match_expression`].
pub(crate) fn query_phrases(text: &str) -> Vec<Vec<String>> {
    text.split_whitespace()
        .filter(|term| term.chars().any(char::is_alphanumeric))
        .map(tokenize)
        .filter(|phrase| !phrase.is_empty())
        .collect()
}

/// Number of places `phrase` occurs as consecutive `tokens`.
pub(crate) fn phrase_hits(tokens: &[String], phrase: &[String]) -> usize {
    if phrase.is_empty() {
        return 0;
    }
    tokens
        .windows(phrase.len())
        .filter(|window| *window == phrase)
        .count()
}

/// Maps FTS5 syntax failures to a validation error on the query.
pub(crate) fn map_match_error(err: RepoError) -> RepoError {
    match &err {
        RepoError::Generic {
            source: Some(source),
            ..
        } if is_match_syntax_error(&source.to_string()) => {
            RepoError::validation("query", "malformed search expression")
        }
        _ => err,
    }
}

fn is_match_syntax_error(message: &str) -> bool {
    let msg = message.to_lowercase();
    (msg.contains("fts5") && msg.contains("syntax"))
        || msg.contains("malformed match expression")
        || msg.contains("unterminated")
}

#[cfg(test)]
mod tests {
    use super::{build_match_expression, phrase_hits, query_phrases, tokenize};

    #[test]
    fn blank_query_builds_nothing() {
        assert_eq!(build_match_expression("   "), None);
        assert_eq!(build_match_expression(" -- !! "), None);
    }

    #[test]
    fn terms_are_quoted_and_joined() {
        assert_eq!(
            build_match_expression("rust \"graph\" OR"),
            Some("\"rust\" AND \"\"\"graph\"\"\" AND \"OR\"".to_string())
        );
    }

    #[test]
    fn tokenize_lowercases_and_splits_on_punctuation() {
        assert_eq!(tokenize("Graph-DB, rocks!"), vec!["graph", "db", "rocks"]);
    }

    #[test]
    fn tokenize_folds_diacritics() {
        assert_eq!(tokenize("Crème Brûlée"), vec!["creme", "brulee"]);
        assert_eq!(tokenize("nai\u{0308}ve"), vec!["naive"]);
    }

    #[test]
    fn hyphenated_terms_become_phrases() {
        assert_eq!(
            query_phrases("graph-db  rust ??"),
            vec![vec!["graph".to_string(), "db".to_string()], vec!["rust".to_string()]]
        );
    }

    #[test]
    fn phrases_need_adjacent_tokens() {
        let phrase = tokenize("graph db");
        assert_eq!(phrase_hits(&tokenize("graph db and graph db"), &phrase), 2);
        assert_eq!(phrase_hits(&tokenize("graph theory db"), &phrase), 0);
        assert_eq!(phrase_hits(&tokenize("graph"), &phrase), 0);
    }
}
