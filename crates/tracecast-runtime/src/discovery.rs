use std::path::PathBuf;

use tracecast_types::SessionId;

/// Find the transcript file for a session id under the given roots.
///
/// The agent CLI stores transcripts at `<root>/<project-slug>/<session-id>.jsonl`;
/// the project slug is not known at attach time, so each root is searched one
/// directory level deep, plus the root itself.
pub fn find_transcript(roots: &[PathBuf], session_id: &SessionId) -> Option<PathBuf> {
    let filename = format!("{}.jsonl", session_id);

    for root in roots {
        let direct = root.join(&filename);
        if direct.is_file() {
            return Some(direct);
        }

        let Ok(entries) = std::fs::read_dir(root) else {
            continue;
        };
        for entry in entries.flatten() {
            let candidate = entry.path().join(&filename);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn finds_transcript_in_project_subdirectory() {
        let root = TempDir::new().unwrap();
        let project = root.path().join("-home-user-project");
        std::fs::create_dir(&project).unwrap();
        let transcript = project.join("abc-123.jsonl");
        std::fs::write(&transcript, "{}\n").unwrap();

        let found = find_transcript(&[root.path().to_path_buf()], &SessionId::new("abc-123"));
        assert_eq!(found, Some(transcript));
    }

    #[test]
    fn finds_transcript_directly_under_root() {
        let root = TempDir::new().unwrap();
        let transcript = root.path().join("abc.jsonl");
        std::fs::write(&transcript, "{}\n").unwrap();

        let found = find_transcript(&[root.path().to_path_buf()], &SessionId::new("abc"));
        assert_eq!(found, Some(transcript));
    }

    #[test]
    fn missing_session_returns_none() {
        let root = TempDir::new().unwrap();
        assert!(find_transcript(&[root.path().to_path_buf()], &SessionId::new("nope")).is_none());
    }
}
