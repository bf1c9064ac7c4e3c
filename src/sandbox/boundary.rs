//! Sandbox boundary: which paths a tool may touch without asking.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};

use super::errors::PermissionError;
use super::gate::PermissionGate;
use super::types::{NewPermissionRequest, PermissionKind};

/// Identifies the tool call on whose behalf access is checked.
#[derive(Debug, Clone)]
pub struct AccessScope {
    pub session_id: String,
    pub message_id: String,
    pub call_id: String,
}

/// Pick the sandbox boundary: explicit directory, else the session's default
/// working directory, else the process working directory.
pub fn resolve_boundary(explicit: Option<&Path>, session_default: Option<&Path>) -> PathBuf {
    explicit
        .or(session_default)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

/// Whether `target` lies inside `boundary`.
///
/// Both sides are canonicalized first. The prefix test requires a trailing
/// separator so `/home/user` does not contain `/home/user2`.
pub fn is_contained(boundary: &Path, target: &Path) -> bool {
    let boundary = canonicalize_lenient(boundary);
    let target = canonicalize_lenient(target);
    if target == boundary {
        return true;
    }

    let mut prefix = boundary.to_string_lossy().into_owned();
    if !prefix.ends_with(MAIN_SEPARATOR) {
        prefix.push(MAIN_SEPARATOR);
    }
    target.to_string_lossy().starts_with(&prefix)
}

/// Canonicalize a path that may not exist yet.
///
/// Symlinks are resolved for the longest existing ancestor; the remaining
/// components are normalized lexically.
pub fn canonicalize_lenient(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    let normalized = normalize_lexically(&absolute);

    let mut existing = normalized.clone();
    let mut missing: Vec<OsString> = Vec::new();
    loop {
        if let Ok(real) = existing.canonicalize() {
            let mut resolved = real;
            for part in missing.iter().rev() {
                resolved.push(part);
            }
            return resolved;
        }
        match existing.file_name() {
            Some(name) => {
                missing.push(name.to_os_string());
                if !existing.pop() {
                    return normalized;
                }
            }
            None => return normalized,
        }
    }
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolve `path` against the boundary and ask for permission when it falls
/// outside. Blocks the calling tool until the request is answered.
///
/// Returns the canonical absolute path on success.
pub async fn check_access(
    gate: &PermissionGate,
    boundary: &Path,
    path: &str,
    scope: &AccessScope,
    operation: &str,
) -> Result<PathBuf, PermissionError> {
    let candidate = Path::new(path);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        boundary.join(candidate)
    };
    let absolute = canonicalize_lenient(&joined);

    if is_contained(boundary, &absolute) {
        return Ok(absolute);
    }

    let dir = if absolute.is_dir() {
        absolute.clone()
    } else {
        absolute
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| absolute.clone())
    };

    tracing::info!(
        session_id = %scope.session_id,
        call_id = %scope.call_id,
        path = %absolute.display(),
        boundary = %boundary.display(),
        operation,
        "path outside sandbox boundary, asking for permission"
    );

    let ticket = gate.ask(NewPermissionRequest {
        session_id: scope.session_id.clone(),
        message_id: scope.message_id.clone(),
        call_id: scope.call_id.clone(),
        kind: PermissionKind::ExternalDirectory,
        pattern: vec![
            dir.to_string_lossy().into_owned(),
            absolute.to_string_lossy().into_owned(),
        ],
        title: format!("{operation} outside the working directory: {}", absolute.display()),
        metadata: serde_json::json!({
            "operation": operation,
            "filepath": absolute.to_string_lossy(),
            "parentDir": dir.to_string_lossy(),
            "boundary": boundary.to_string_lossy(),
        }),
    });
    ticket.await?;
    Ok(absolute)
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::sandbox::types::PermissionResponse;

    fn scope() -> AccessScope {
        AccessScope {
            session_id: "s1".into(),
            message_id: "m1".into(),
            call_id: "c1".into(),
        }
    }

    #[test]
    fn test_sibling_with_shared_prefix_is_outside() {
        assert!(!is_contained(Path::new("/home/user"), Path::new("/home/user2")));
        assert!(!is_contained(
            Path::new("/home/user"),
            Path::new("/home/user2/file.txt")
        ));
    }

    #[test]
    fn test_boundary_contains_itself_and_children() {
        assert!(is_contained(Path::new("/home/user"), Path::new("/home/user")));
        assert!(is_contained(
            Path::new("/home/user"),
            Path::new("/home/user/projects/a.rs")
        ));
    }

    #[test]
    fn test_parent_traversal_escapes() {
        assert!(!is_contained(
            Path::new("/home/user"),
            Path::new("/home/user/../other/secret")
        ));
        assert!(is_contained(
            Path::new("/home/user"),
            Path::new("/home/user/a/../b")
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_out_of_boundary_is_outside() {
        let root = tempfile::tempdir().unwrap();
        let inside = root.path().join("work");
        let outside = root.path().join("elsewhere");
        std::fs::create_dir_all(&inside).unwrap();
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, inside.join("link")).unwrap();

        assert!(!is_contained(&inside, &inside.join("link/new-file.txt")));
        assert!(is_contained(&inside, &inside.join("not-yet/created.txt")));
    }

    #[test]
    fn test_resolve_boundary_precedence() {
        let explicit = Path::new("/explicit");
        let session = Path::new("/session");
        assert_eq!(resolve_boundary(Some(explicit), Some(session)), explicit);
        assert_eq!(resolve_boundary(None, Some(session)), session);
        assert_eq!(
            resolve_boundary(None, None),
            std::env::current_dir().unwrap()
        );
    }

    #[tokio::test]
    async fn test_check_access_inside_returns_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let gate = PermissionGate::new();
        let resolved = check_access(&gate, dir.path(), "notes/today.md", &scope(), "Write file")
            .await
            .unwrap();
        assert!(resolved.ends_with("notes/today.md"));
        assert!(gate.get_pending("s1").is_empty());
    }

    #[tokio::test]
    async fn test_check_access_outside_waits_for_answer() {
        let work = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let target = other.path().join("data.csv");
        let gate = Arc::new(PermissionGate::new());

        let task = {
            let gate = gate.clone();
            let boundary = work.path().to_path_buf();
            let target = target.to_string_lossy().into_owned();
            tokio::spawn(async move {
                check_access(&gate, &boundary, &target, &scope(), "Read file").await
            })
        };

        let pending = loop {
            let pending = gate.get_pending("s1");
            if !pending.is_empty() {
                break pending;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, PermissionKind::ExternalDirectory);
        assert_eq!(pending[0].pattern.len(), 2);
        assert!(pending[0].pattern[1].ends_with("data.csv"));
        assert!(!task.is_finished());

        gate.respond("s1", &pending[0].id, PermissionResponse::Deny);
        let result = task.await.unwrap();
        assert_eq!(result, Err(PermissionError::Denied));
    }
}
