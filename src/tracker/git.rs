use std::path::Path;

use git2::build::CheckoutBuilder;
use git2::{IndexAddOption, Repository, ResetType, Signature, StatusOptions};

use crate::errors::WorkspaceError;

/// Result of a version-control side effect, with raw output where the
/// operation produces any.
#[derive(Debug, Clone)]
pub struct VcsOutcome {
    pub success: bool,
    pub output: String,
}

impl VcsOutcome {
    fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    fn rejected(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// The working tree and repository as a single shared mutable resource.
/// Only one cycle's mutation controller touches this at a time; the runner
/// holds exclusive access for the whole validate/apply/commit span.
pub struct GitWorkspace {
    repo: Repository,
}

impl std::fmt::Debug for GitWorkspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitWorkspace")
            .field("repo", &self.repo.path())
            .finish()
    }
}

impl GitWorkspace {
    pub fn open(project_dir: &Path) -> Result<Self, WorkspaceError> {
        let repo = Repository::open(project_dir).map_err(|source| WorkspaceError::Open {
            path: project_dir.to_path_buf(),
            source,
        })?;
        Ok(Self { repo })
    }

    /// Discard all working-tree changes, restoring the last committed state.
    /// Idempotent: invoking it with a clean tree is a no-op.
    pub fn discard_all(&self) -> Result<VcsOutcome, WorkspaceError> {
        let Some(head) = self.head_commit() else {
            // Unborn branch: there is no committed state to restore.
            return Ok(VcsOutcome::ok("no commits yet; nothing to restore"));
        };

        let mut checkout = CheckoutBuilder::new();
        checkout.force().remove_untracked(true);

        self.repo
            .reset(head.as_object(), ResetType::Hard, Some(&mut checkout))
            .map_err(|source| WorkspaceError::Operation {
                operation: "discard_all",
                source,
            })?;

        Ok(VcsOutcome::ok(format!(
            "restored working tree to {}",
            head.id()
        )))
    }

    /// Stage every change in the working tree.
    pub fn add_all(&self) -> Result<VcsOutcome, WorkspaceError> {
        let op = |source| WorkspaceError::Operation {
            operation: "add_all",
            source,
        };
        let mut index = self.repo.index().map_err(op)?;
        index
            .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
            .map_err(op)?;
        index.update_all(["*"].iter(), None).map_err(op)?;
        index.write().map_err(op)?;
        Ok(VcsOutcome::ok("staged all changes"))
    }

    /// Commit the staged index. A no-change commit is reported as a rejected
    /// outcome rather than an error.
    pub fn commit(&self, message: &str) -> Result<VcsOutcome, WorkspaceError> {
        let op = |source| WorkspaceError::Operation {
            operation: "commit",
            source,
        };

        let mut index = self.repo.index().map_err(op)?;
        let tree_id = index.write_tree().map_err(op)?;
        let tree = self.repo.find_tree(tree_id).map_err(op)?;
        let sig = Signature::now("tend", "tend@localhost").map_err(op)?;

        // Handle unborn branch (new repo with no commits yet).
        let commit_id = if let Some(parent) = self.head_commit() {
            if parent.tree_id() == tree_id {
                return Ok(VcsOutcome::rejected("nothing to commit"));
            }
            self.repo
                .commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])
                .map_err(op)?
        } else {
            self.repo
                .commit(Some("HEAD"), &sig, &sig, message, &tree, &[])
                .map_err(op)?
        };

        Ok(VcsOutcome::ok(commit_id.to_string()))
    }

    /// Whether the working tree differs from HEAD (including untracked files).
    pub fn has_changes(&self) -> Result<bool, WorkspaceError> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true);
        let statuses =
            self.repo
                .statuses(Some(&mut opts))
                .map_err(|source| WorkspaceError::Operation {
                    operation: "status",
                    source,
                })?;
        Ok(!statuses.is_empty())
    }

    /// Current HEAD SHA (returns None for unborn branches).
    pub fn head_sha(&self) -> Option<String> {
        self.head_commit().map(|c| c.id().to_string())
    }

    fn head_commit(&self) -> Option<git2::Commit<'_>> {
        self.repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok())
    }
}
