//! Text-patch engine: applies model-authored search/replace edits.
//!
//! Submodules:
//! - `strategies`: Ordered chain of pure matching strategies
//! - `diff`: Line diff reporting (additions, deletions, unified text)
//! - `errors`: Patch error types
//!
//! The model's idea of a file rarely matches the bytes on disk exactly:
//! indentation drifts, line endings differ, escapes leak into arguments.
//! [`replace`] walks the strategy chain strictest first and applies the
//! first strategy that locates the search text. A strategy that finds more
//! than one location fails the edit unless `replace_all` is set.

pub mod diff;
pub mod errors;
pub mod strategies;

pub use diff::{diff, DiffSummary};
pub use errors::PatchError;
pub use strategies::{MatchStrategy, Splice, StrategyOutcome};

use similar::TextDiff;

/// Minimum similarity for a line to be reported as the closest candidate.
const CLOSEST_MATCH_THRESHOLD: f32 = 0.5;

/// Result of a successful [`replace_with_report`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOutcome {
    pub content: String,
    /// Strategy that located the search text; `None` for whole-content replacement.
    pub strategy: Option<MatchStrategy>,
    pub replacements: usize,
}

/// Replace `search` with `replacement` in `old`.
///
/// An empty `search` replaces the whole content, which covers both file
/// creation and full overwrite.
pub fn replace(
    old: &str,
    search: &str,
    replacement: &str,
    replace_all: bool,
) -> Result<String, PatchError> {
    replace_with_report(old, search, replacement, replace_all).map(|outcome| outcome.content)
}

/// Like [`replace`], but also reports which strategy matched.
pub fn replace_with_report(
    old: &str,
    search: &str,
    replacement: &str,
    replace_all: bool,
) -> Result<PatchOutcome, PatchError> {
    if search.is_empty() {
        return Ok(PatchOutcome {
            content: replacement.to_string(),
            strategy: None,
            replacements: 1,
        });
    }

    for strategy in MatchStrategy::CHAIN {
        match strategy.find(old, search, replacement) {
            StrategyOutcome::NoMatch { reason } => {
                tracing::trace!(strategy = %strategy, reason, "patch strategy did not match");
            }
            StrategyOutcome::Matched(splices) => {
                if splices.len() > 1 && !replace_all {
                    return Err(PatchError::AmbiguousMatch {
                        count: splices.len(),
                        strategy,
                    });
                }
                if strategy != MatchStrategy::Exact {
                    tracing::debug!(
                        strategy = %strategy,
                        count = splices.len(),
                        "patch matched via relaxed strategy"
                    );
                }
                return Ok(PatchOutcome {
                    content: apply_splices(old, &splices),
                    strategy: Some(strategy),
                    replacements: splices.len(),
                });
            }
        }
    }

    Err(PatchError::NotFound {
        hint: closest_line_hint(old, search),
    })
}

/// Splices are non-overlapping and in content order.
fn apply_splices(content: &str, splices: &[Splice]) -> String {
    let mut out = String::with_capacity(content.len());
    let mut cursor = 0;
    for splice in splices {
        out.push_str(&content[cursor..splice.range.start]);
        out.push_str(&splice.text);
        cursor = splice.range.end;
    }
    out.push_str(&content[cursor..]);
    out
}

/// Point the model at the content line most similar to the first
/// non-blank line of its search text.
fn closest_line_hint(content: &str, search: &str) -> String {
    let Some(needle) = search.lines().map(str::trim).find(|l| !l.is_empty()) else {
        return "the search text is blank".to_string();
    };

    let best = content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            let ratio = TextDiff::from_chars(needle, line.trim()).ratio();
            (idx, line, ratio)
        })
        .fold(None::<(usize, &str, f32)>, |best, candidate| match best {
            Some(b) if b.2 >= candidate.2 => Some(b),
            _ => Some(candidate),
        });

    match best {
        Some((idx, line, ratio)) if ratio >= CLOSEST_MATCH_THRESHOLD => format!(
            "closest line is {} ({:.0}% similar): {}",
            idx + 1,
            ratio * 100.0,
            line.trim()
        ),
        _ => "no similar lines in the content; re-read the file before retrying".to_string(),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_search_creates_content() {
        assert_eq!(replace("", "", "hello", false).unwrap(), "hello");
    }

    #[test]
    fn test_empty_search_overwrites_content() {
        assert_eq!(replace("existing", "", "new", false).unwrap(), "new");
    }

    #[test]
    fn test_ambiguous_without_replace_all() {
        let err = replace("foo\nbar\nfoo\n", "foo", "baz", false).unwrap_err();
        assert!(err.is_ambiguous());
        assert!(matches!(
            err,
            PatchError::AmbiguousMatch {
                count: 2,
                strategy: MatchStrategy::Exact
            }
        ));
    }

    #[test]
    fn test_replace_all_rewrites_every_occurrence() {
        assert_eq!(
            replace("foo\nbar\nfoo\n", "foo", "baz", true).unwrap(),
            "baz\nbar\nbaz\n"
        );
    }

    #[test]
    fn test_reapplying_replacement_is_noop() {
        let content = "fn main() {\n    start();\n}\n";
        let once = replace(content, "start();", "run();", false).unwrap();
        let twice = replace(&once, "run();", "run();", false).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_not_found_includes_closest_hint() {
        let err = replace("let alpha = 1;\nlet beta = 2;\n", "let betta = 3;", "x", false)
            .unwrap_err();
        let PatchError::NotFound { hint } = err else {
            panic!("expected NotFound");
        };
        assert!(hint.contains("closest line is 2"), "hint was: {hint}");
    }

    #[test]
    fn test_relaxed_strategy_reported() {
        let content = "fn a() {\n        body();\n}\n";
        let outcome = replace_with_report(content, "body();\n", "other();\n", false).unwrap();
        // Exact finds "body();\n" verbatim, so indentation is untouched.
        assert_eq!(outcome.strategy, Some(MatchStrategy::Exact));
        assert_eq!(outcome.content, "fn a() {\n        other();\n}\n");

        let outcome = replace_with_report(content, "    body();  ", "    done();", false).unwrap();
        assert_eq!(outcome.strategy, Some(MatchStrategy::LineTrimmed));
        assert_eq!(outcome.content, "fn a() {\n        done();\n}\n");
    }

    #[test]
    fn test_strict_strategy_wins_over_fuzzy() {
        // Exact matches once; the fuzzier whitespace strategy would match twice.
        let content = "a  b\na b\n";
        let outcome = replace_with_report(content, "a b", "c", false).unwrap();
        assert_eq!(outcome.strategy, Some(MatchStrategy::Exact));
        assert_eq!(outcome.content, "a  b\nc\n");
    }

    #[test]
    fn test_crlf_file_stays_crlf_after_relaxed_match() {
        let content = "fn a() {\r\n    let x = 1;\r\n    let y = 2;\r\n}\r\n";
        let outcome =
            replace_with_report(content, "let x = 1;\nlet y = 2;", "let x = 10;\nlet y = 20;", false)
                .unwrap();
        assert_eq!(outcome.strategy, Some(MatchStrategy::LineTrimmed));
        assert_eq!(
            outcome.content,
            "fn a() {\r\n    let x = 10;\r\n    let y = 20;\r\n}\r\n"
        );
        assert!(!outcome.content.replace("\r\n", "").contains('\n'));
    }
}
