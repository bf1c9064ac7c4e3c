//! Line-level diff reporting for applied edits.

use serde::Serialize;
use similar::{ChangeTag, TextDiff};

/// Lines of context around each hunk in the unified diff.
const CONTEXT_RADIUS: usize = 3;

/// Summary of the change an edit produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    pub additions: usize,
    pub deletions: usize,
    /// Unified diff text; empty when the contents are identical.
    pub unified: String,
}

impl DiffSummary {
    pub fn is_empty(&self) -> bool {
        self.additions == 0 && self.deletions == 0
    }
}

/// Compute a line diff between `old` and `new`, labelling both sides with `label`.
pub fn diff(old: &str, new: &str, label: &str) -> DiffSummary {
    let text_diff = TextDiff::from_lines(old, new);

    let mut additions = 0;
    let mut deletions = 0;
    for change in text_diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => additions += 1,
            ChangeTag::Delete => deletions += 1,
            ChangeTag::Equal => {}
        }
    }

    let unified = if additions == 0 && deletions == 0 {
        String::new()
    } else {
        text_diff
            .unified_diff()
            .context_radius(CONTEXT_RADIUS)
            .header(&format!("a/{label}"), &format!("b/{label}"))
            .to_string()
    };

    DiffSummary {
        additions,
        deletions,
        unified,
    }
}
