//! Thin git facade. Every operation is an opaque `git` invocation;
//! checkpoint-time callers treat failures as best-effort warnings per
//! the error policy, while branch setup failures are fatal.

use crate::error::{ForemanError, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct GitRepo {
    root: PathBuf,
}

impl GitRepo {
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        debug!(?args, "git");
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .await
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound => ForemanError::ToolMissing("git".to_string()),
                _ => ForemanError::IoError(err),
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(ForemanError::Internal(format!(
                "git {} failed: {}",
                args.first().unwrap_or(&""),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    pub async fn current_branch(&self) -> Result<String> {
        self.git(&["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    /// Detached HEAD reports `HEAD` from `--abbrev-ref`.
    pub async fn is_detached_head(&self) -> Result<bool> {
        Ok(self.current_branch().await? == "HEAD")
    }

    pub async fn head_sha(&self) -> Result<String> {
        self.git(&["rev-parse", "HEAD"]).await
    }

    pub async fn create_branch(&self, name: &str) -> Result<()> {
        self.git(&["checkout", "-b", name]).await.map(|_| ())
    }

    pub async fn checkout(&self, name: &str) -> Result<()> {
        self.git(&["checkout", name]).await.map(|_| ())
    }

    pub async fn diff_against(&self, base: &str) -> Result<String> {
        self.git(&["diff", base]).await
    }

    pub async fn changed_files(&self, base: &str) -> Result<Vec<String>> {
        let output = self.git(&["diff", "--name-only", base]).await?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Stage everything and commit. A no-op diff is not an error.
    pub async fn commit_all(&self, message: &str) -> Result<()> {
        self.git(&["add", "-A"]).await?;
        let staged = self.git(&["diff", "--cached", "--name-only"]).await?;
        if staged.is_empty() {
            debug!("nothing to commit");
            return Ok(());
        }
        self.git(&["commit", "-m", message]).await.map(|_| ())
    }

    pub async fn pull_rebase(&self) -> Result<()> {
        self.git(&["pull", "--rebase"]).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::GitRepo;

    async fn scratch_repo() -> (tempfile::TempDir, GitRepo) {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = GitRepo::new(dir.path());
        repo.git(&["init", "-q", "-b", "main"]).await.expect("init");
        repo.git(&["config", "user.email", "test@example.com"])
            .await
            .expect("config");
        repo.git(&["config", "user.name", "Test"])
            .await
            .expect("config");
        std::fs::write(dir.path().join("a.txt"), "one\n").expect("write");
        repo.commit_all("initial").await.expect("commit");
        (dir, repo)
    }

    #[tokio::test]
    async fn branch_lifecycle_and_head_inspection() {
        let (_dir, repo) = scratch_repo().await;
        assert_eq!(repo.current_branch().await.expect("branch"), "main");
        assert!(!repo.is_detached_head().await.expect("detached"));

        repo.create_branch("feature/x").await.expect("create");
        assert_eq!(repo.current_branch().await.expect("branch"), "feature/x");

        let sha = repo.head_sha().await.expect("sha");
        assert_eq!(sha.len(), 40);
    }

    #[tokio::test]
    async fn diff_and_changed_files_track_the_base() {
        let (dir, repo) = scratch_repo().await;
        let base = repo.head_sha().await.expect("sha");

        std::fs::write(dir.path().join("b.txt"), "two\n").expect("write");
        repo.commit_all("add b").await.expect("commit");

        let files = repo.changed_files(&base).await.expect("files");
        assert_eq!(files, vec!["b.txt"]);
        let diff = repo.diff_against(&base).await.expect("diff");
        assert!(diff.contains("+two"));
    }

    #[tokio::test]
    async fn commit_all_with_clean_tree_is_a_no_op() {
        let (_dir, repo) = scratch_repo().await;
        let before = repo.head_sha().await.expect("sha");
        repo.commit_all("empty checkpoint").await.expect("commit");
        assert_eq!(repo.head_sha().await.expect("sha"), before);
    }
}
