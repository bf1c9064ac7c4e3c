//! Matching strategies for the patch engine.
//!
//! Each strategy is a pure function `(content, search, replacement) ->
//! StrategyOutcome`. The engine walks [`MatchStrategy::CHAIN`] strictest
//! first and stops at the first strategy that locates anything.

use std::fmt;
use std::ops::Range;

use serde::Serialize;

// ─── Types ──────────────────────────────────────────────────────────────────

/// One located region of the content and the text that replaces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Splice {
    /// Byte range in the original content.
    pub range: Range<usize>,
    /// Replacement text, already adjusted to the file's indentation where
    /// the strategy does that.
    pub text: String,
}

/// Result of running a single strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyOutcome {
    /// Non-empty, non-overlapping splices in content order.
    Matched(Vec<Splice>),
    /// Nothing located; `reason` is kept for trace logging.
    NoMatch { reason: &'static str },
}

/// The ordered chain of matching strategies, strictest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Verbatim substring.
    Exact,
    /// Verbatim after converting the search text to the file's line endings.
    LineEndings,
    /// Whole lines equal after trimming; keeps the file's indentation.
    LineTrimmed,
    /// First and last lines anchor the block; interior differs only in whitespace.
    BlockAnchor,
    /// Any run of whitespace in the search matches any run in the content.
    WhitespaceNormalized,
    /// Search text carried literal `\n`, `\t`, `\"` escapes.
    EscapeNormalized,
    /// Search text wrapped in stray leading or trailing whitespace.
    TrimmedBoundary,
    /// Anchored block where at least half the interior lines match.
    ContextAware,
}

impl MatchStrategy {
    /// Strategies in the order the engine tries them.
    pub const CHAIN: [MatchStrategy; 8] = [
        MatchStrategy::Exact,
        MatchStrategy::LineEndings,
        MatchStrategy::LineTrimmed,
        MatchStrategy::BlockAnchor,
        MatchStrategy::WhitespaceNormalized,
        MatchStrategy::EscapeNormalized,
        MatchStrategy::TrimmedBoundary,
        MatchStrategy::ContextAware,
    ];

    /// Run this strategy.
    pub fn find(self, content: &str, search: &str, replacement: &str) -> StrategyOutcome {
        match self {
            MatchStrategy::Exact => exact(content, search, replacement),
            MatchStrategy::LineEndings => line_endings(content, search, replacement),
            MatchStrategy::LineTrimmed => line_trimmed(content, search, replacement),
            MatchStrategy::BlockAnchor => block_anchor(content, search, replacement),
            MatchStrategy::WhitespaceNormalized => {
                whitespace_normalized(content, search, replacement)
            }
            MatchStrategy::EscapeNormalized => escape_normalized(content, search, replacement),
            MatchStrategy::TrimmedBoundary => trimmed_boundary(content, search, replacement),
            MatchStrategy::ContextAware => context_aware(content, search, replacement),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MatchStrategy::Exact => "exact",
            MatchStrategy::LineEndings => "line-endings",
            MatchStrategy::LineTrimmed => "line-trimmed",
            MatchStrategy::BlockAnchor => "block-anchor",
            MatchStrategy::WhitespaceNormalized => "whitespace-normalized",
            MatchStrategy::EscapeNormalized => "escape-normalized",
            MatchStrategy::TrimmedBoundary => "trimmed-boundary",
            MatchStrategy::ContextAware => "context-aware",
        }
    }
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Strategies ─────────────────────────────────────────────────────────────

pub fn exact(content: &str, search: &str, replacement: &str) -> StrategyOutcome {
    if search.is_empty() {
        return StrategyOutcome::NoMatch {
            reason: "empty search text",
        };
    }
    let splices = content
        .match_indices(search)
        .map(|(start, found)| Splice {
            range: start..start + found.len(),
            text: replacement.to_string(),
        })
        .collect();
    outcome(splices, "no verbatim occurrence")
}

pub fn line_endings(content: &str, search: &str, replacement: &str) -> StrategyOutcome {
    let content_crlf = content.contains("\r\n");
    let search_crlf = search.contains("\r\n");

    let (search, replacement) = if content_crlf && !search_crlf && search.contains('\n') {
        (
            search.replace('\n', "\r\n"),
            replacement.replace("\r\n", "\n").replace('\n', "\r\n"),
        )
    } else if !content_crlf && search_crlf {
        (search.replace("\r\n", "\n"), replacement.replace("\r\n", "\n"))
    } else {
        return StrategyOutcome::NoMatch {
            reason: "line endings already agree",
        };
    };

    match exact(content, &search, &replacement) {
        StrategyOutcome::NoMatch { .. } => StrategyOutcome::NoMatch {
            reason: "no occurrence after line-ending normalization",
        },
        matched => matched,
    }
}

pub fn line_trimmed(content: &str, search: &str, replacement: &str) -> StrategyOutcome {
    if search.trim().is_empty() {
        return StrategyOutcome::NoMatch {
            reason: "search text is blank",
        };
    }
    let splices = match_line_windows(content, search, replacement, |window, wanted| {
        window
            .iter()
            .zip(wanted)
            .all(|(line, want)| line.text.trim() == want.trim())
    });
    outcome(splices, "no block of lines matches after trimming")
}

pub fn block_anchor(content: &str, search: &str, replacement: &str) -> StrategyOutcome {
    if search.lines().count() < 3 {
        return StrategyOutcome::NoMatch {
            reason: "anchoring needs at least three lines",
        };
    }
    let splices = match_line_windows(content, search, replacement, |window, wanted| {
        anchors_match(window, wanted)
            && window[1..window.len() - 1]
                .iter()
                .zip(&wanted[1..wanted.len() - 1])
                .all(|(line, want)| strip_whitespace(line.text) == strip_whitespace(want))
    });
    outcome(splices, "no anchored block with whitespace-only interior differences")
}

pub fn whitespace_normalized(content: &str, search: &str, replacement: &str) -> StrategyOutcome {
    let tokens: Vec<&str> = search.split_whitespace().collect();
    let Some(first) = tokens.first() else {
        return StrategyOutcome::NoMatch {
            reason: "search text is blank",
        };
    };

    let replacement = match_line_endings(content, replacement);
    let mut splices = Vec::new();
    let mut pos = 0;
    while let Some(rel) = content[pos..].find(first) {
        let start = pos + rel;
        match match_tokens(content, start, &tokens) {
            Some(end) => {
                splices.push(Splice {
                    range: start..end,
                    text: replacement.clone(),
                });
                pos = end;
            }
            None => pos = start + first.len(),
        }
    }
    outcome(splices, "no whitespace-insensitive occurrence")
}

pub fn escape_normalized(content: &str, search: &str, replacement: &str) -> StrategyOutcome {
    let unescaped = unescape(search);
    if unescaped == search {
        return StrategyOutcome::NoMatch {
            reason: "search text has no escape sequences",
        };
    }
    match exact(content, &unescaped, &match_line_endings(content, &unescape(replacement))) {
        StrategyOutcome::NoMatch { .. } => StrategyOutcome::NoMatch {
            reason: "no occurrence after unescaping",
        },
        matched => matched,
    }
}

pub fn trimmed_boundary(content: &str, search: &str, replacement: &str) -> StrategyOutcome {
    let trimmed = search.trim();
    if trimmed.is_empty() || trimmed == search {
        return StrategyOutcome::NoMatch {
            reason: "no surrounding whitespace to trim",
        };
    }
    match exact(content, trimmed, &match_line_endings(content, replacement.trim())) {
        StrategyOutcome::NoMatch { .. } => StrategyOutcome::NoMatch {
            reason: "no occurrence of the trimmed search text",
        },
        matched => matched,
    }
}

pub fn context_aware(content: &str, search: &str, replacement: &str) -> StrategyOutcome {
    if search.lines().count() < 3 {
        return StrategyOutcome::NoMatch {
            reason: "context matching needs at least three lines",
        };
    }
    let splices = match_line_windows(content, search, replacement, |window, wanted| {
        if !anchors_match(window, wanted) {
            return false;
        }
        let interior = &window[1..window.len() - 1];
        let matching = interior
            .iter()
            .zip(&wanted[1..wanted.len() - 1])
            .filter(|(line, want)| line.text.trim() == want.trim())
            .count();
        matching * 2 >= interior.len()
    });
    outcome(splices, "no anchored block with enough matching context")
}

// ─── Line helpers ───────────────────────────────────────────────────────────

/// A content line; `end` excludes the newline and any trailing `\r`.
#[derive(Debug, Clone, Copy)]
struct Line<'a> {
    start: usize,
    end: usize,
    text: &'a str,
}

fn split_lines(content: &str) -> Vec<Line<'_>> {
    let mut lines = Vec::new();
    let mut start = 0;
    for segment in content.split_inclusive('\n') {
        let body = segment.strip_suffix('\n').unwrap_or(segment);
        let body = body.strip_suffix('\r').unwrap_or(body);
        lines.push(Line {
            start,
            end: start + body.len(),
            text: body,
        });
        start += segment.len();
    }
    lines
}

/// Slide a window of `search.lines()` over the content and splice every
/// non-overlapping window accepted by `accept`.
fn match_line_windows<F>(content: &str, search: &str, replacement: &str, accept: F) -> Vec<Splice>
where
    F: Fn(&[Line<'_>], &[&str]) -> bool,
{
    let wanted: Vec<&str> = search.lines().collect();
    let lines = split_lines(content);
    if wanted.is_empty() || wanted.len() > lines.len() {
        return Vec::new();
    }

    // Line windows never include the final newline.
    let replacement = if search.ends_with('\n') {
        replacement.strip_suffix('\n').unwrap_or(replacement)
    } else {
        replacement
    };
    let search_indent = leading_whitespace(wanted[0]);

    let mut splices = Vec::new();
    let mut i = 0;
    while i + wanted.len() <= lines.len() {
        let window = &lines[i..i + wanted.len()];
        if accept(window, &wanted) {
            let file_indent = leading_whitespace(window[0].text);
            splices.push(Splice {
                range: window[0].start..window[window.len() - 1].end,
                text: match_line_endings(content, &reindent(replacement, search_indent, file_indent)),
            });
            i += wanted.len();
        } else {
            i += 1;
        }
    }
    splices
}

fn anchors_match(window: &[Line<'_>], wanted: &[&str]) -> bool {
    let last = wanted.len() - 1;
    window[0].text.trim() == wanted[0].trim() && window[last].text.trim() == wanted[last].trim()
}

fn leading_whitespace(line: &str) -> &str {
    &line[..line.len() - line.trim_start().len()]
}

/// Move every replacement line indented with `from` onto `to`.
fn reindent(replacement: &str, from: &str, to: &str) -> String {
    if from == to {
        return replacement.to_string();
    }
    replacement
        .split('\n')
        .map(|line| {
            if line.trim().is_empty() {
                line.to_string()
            } else if let Some(rest) = line.strip_prefix(from) {
                format!("{to}{rest}")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Rewrite `text` to CRLF when `content` uses CRLF, so a splice never
/// mixes line endings.
fn match_line_endings(content: &str, text: &str) -> String {
    if content.contains("\r\n") {
        text.replace("\r\n", "\n").replace('\n', "\r\n")
    } else {
        text.to_string()
    }
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Match `tokens` at `start`, allowing any whitespace run between them.
/// Returns the end offset of the match.
fn match_tokens(content: &str, start: usize, tokens: &[&str]) -> Option<usize> {
    let mut cursor = start;
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 {
            let rest = &content[cursor..];
            let skipped = rest.len() - rest.trim_start().len();
            if skipped == 0 {
                return None;
            }
            cursor += skipped;
        }
        if !content[cursor..].starts_with(token) {
            return None;
        }
        cursor += token.len();
    }
    Some(cursor)
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let decoded = match chars.peek().copied() {
            Some('n') => '\n',
            Some('t') => '\t',
            Some('r') => '\r',
            Some(other @ ('"' | '\'' | '`' | '\\')) => other,
            _ => {
                out.push('\\');
                continue;
            }
        };
        chars.next();
        out.push(decoded);
    }
    out
}

fn outcome(splices: Vec<Splice>, reason: &'static str) -> StrategyOutcome {
    if splices.is_empty() {
        StrategyOutcome::NoMatch { reason }
    } else {
        StrategyOutcome::Matched(splices)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
