//! Configured repository pairs

use std::fmt;

use serde::Serialize;

use super::RepoId;

/// One watched file in a source repository, paired with the target
/// repository and base branch that receive notification pull requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoPair {
    pub source_repo: RepoId,
    pub file_path: String,
    pub target_repo: RepoId,
    pub base_branch: String,
}

impl RepoPair {
    pub fn new(
        source_repo: RepoId,
        file_path: impl Into<String>,
        target_repo: RepoId,
        base_branch: impl Into<String>,
    ) -> Self {
        Self {
            source_repo,
            file_path: file_path.into(),
            target_repo,
            base_branch: base_branch.into(),
        }
    }

    /// Stable identity used to address this pair's watermark
    pub fn key(&self) -> String {
        format!(
            "{}:{}->{}@{}",
            self.source_repo, self.file_path, self.target_repo, self.base_branch
        )
    }
}

impl fmt::Display for RepoPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {} ({})",
            self.source_repo, self.file_path, self.target_repo, self.base_branch
        )
    }
}

/// Flatten a file path into a single branch/file name component
pub fn slug(path: &str) -> String {
    path.replace('/', "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> RepoPair {
        RepoPair::new(
            RepoId::new("upstream", "lib"),
            "docs/api.md",
            RepoId::new("downstream", "fork"),
            "main",
        )
    }

    #[test]
    fn test_key_includes_every_field() {
        assert_eq!(pair().key(), "upstream/lib:docs/api.md->downstream/fork@main");
    }

    #[test]
    fn test_key_differs_by_branch() {
        let mut other = pair();
        other.base_branch = "develop".to_string();
        assert_ne!(pair().key(), other.key());
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("docs/api.md"), "docs-api.md");
        assert_eq!(slug("README.md"), "README.md");
        assert_eq!(slug("a/b/c"), "a-b-c");
    }
}
