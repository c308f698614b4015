//! Plan files served from the plans directory.

use std::path::{Component, Path, PathBuf};

use frags_core::FragsError;

const PLAN_EXTENSIONS: &[&str] = &["yaml", "yml"];

/// Resolve `name` inside `plans_dir`. The extension is optional; names that
/// would escape the directory are rejected.
pub fn resolve_plan_path(plans_dir: &Path, name: &str) -> Result<PathBuf, FragsError> {
    let relative = Path::new(name);
    let safe = !name.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !safe {
        return Err(FragsError::PlanParse(format!("Invalid plan name '{}'", name)));
    }

    let has_extension = relative
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| PLAN_EXTENSIONS.contains(&e));
    let candidates: Vec<PathBuf> = if has_extension {
        vec![plans_dir.join(relative)]
    } else {
        PLAN_EXTENSIONS
            .iter()
            .map(|ext| plans_dir.join(format!("{}.{}", name, ext)))
            .collect()
    };

    candidates
        .into_iter()
        .find(|p| p.is_file())
        .ok_or_else(|| FragsError::PlanParse(format!("Plan '{}' not found", name)))
}

/// Plan names (file stems) available in `plans_dir`, sorted.
pub fn list_plans(plans_dir: &Path) -> Result<Vec<String>, FragsError> {
    let entries = std::fs::read_dir(plans_dir).map_err(|e| {
        FragsError::Config(format!("Cannot read plans directory {}: {}", plans_dir.display(), e))
    })?;
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| PLAN_EXTENSIONS.contains(&e))
        })
        .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().to_string()))
        .collect();
    names.sort();
    names.dedup();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_plan_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("summary.yaml"), "x").unwrap();
        std::fs::write(dir.path().join("short.yml"), "x").unwrap();

        assert_eq!(
            resolve_plan_path(dir.path(), "summary").unwrap(),
            dir.path().join("summary.yaml")
        );
        assert_eq!(
            resolve_plan_path(dir.path(), "short").unwrap(),
            dir.path().join("short.yml")
        );
        assert!(resolve_plan_path(dir.path(), "summary.yaml").is_ok());
        assert!(resolve_plan_path(dir.path(), "missing").is_err());
    }

    #[test]
    fn test_traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["../secret", "/etc/passwd", "a/../../b", ""] {
            let err = resolve_plan_path(dir.path(), name).unwrap_err();
            assert!(err.to_string().contains("Invalid plan name"), "{}", name);
        }
    }

    #[test]
    fn test_list_plans() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.yaml"), "x").unwrap();
        std::fs::write(dir.path().join("a.yml"), "x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        assert_eq!(list_plans(dir.path()).unwrap(), vec!["a", "b"]);
    }
}
