// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Version control backend.
//!
//! Kood does not implement version control itself. It drives git as a black
//! box through the narrow [`Backend`] interface: branch bookkeeping, working
//! tree manipulation (checkout, reset, stash), committing tracked content, and
//! talking to remotes.
//!
//! # Storage Repositories
//!
//! Boards live in __storage repositories__. Each board is one branch, and all
//! of its lists and cards are tracked files on that branch. Every storage
//! repository carries a neutral [`DEFAULT_BRANCH`] holding an empty root
//! commit. New board branches start from it, and it is where the working tree
//! is parked whenever a board branch must stop being checked out.
//!
//! Board content is committed straight onto the board's branch reference.
//! The working tree does not need to have that branch checked out, which
//! keeps everyday edits from ever touching uncommitted work in the storage
//! repository's working tree.
//!
//! # Implementations
//!
//! - [`git::Git2Backend`]: libgit2 for refs and objects, the `git` binary for
//!   anything that touches the working tree or the network.
//! - [`memory::MemoryBackend`]: in-memory stand-in that records its calls.

pub mod git;
pub mod memory;

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::Path,
};

/// Neutral branch every storage repository is guaranteed to have.
pub const DEFAULT_BRANCH: &str = "main";

/// Captured result of a backend command that talks to a remote.
///
/// A non-zero status is routine for these commands, e.g., nothing to pull,
/// so it is reported as data rather than as an error.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GitOutput {
    /// Exit status of the command.
    pub status: i32,

    /// Captured standard output.
    pub stdout: String,

    /// Captured standard error.
    pub stderr: String,
}

impl GitOutput {
    /// Construct new output triple.
    pub fn new(status: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            status,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Check if command exited successfully.
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Handle to a stash entry created by [`Backend::stash_save`].
///
/// Stash entries shift position as other entries come and go, so the handle
/// names the stash commit itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StashId(String);

impl StashId {
    /// Construct new stash handle.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Treat stash handle as string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for StashId {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

/// Modification to the tracked content of a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Create or overwrite a tracked file.
    Write { path: String, contents: String },

    /// Stop tracking a file.
    Remove { path: String },
}

impl Change {
    /// Construct a write of `contents` to `path`.
    pub fn write(path: impl Into<String>, contents: impl Into<String>) -> Self {
        Self::Write {
            path: path.into(),
            contents: contents.into(),
        }
    }

    /// Construct a removal of `path`.
    pub fn remove(path: impl Into<String>) -> Self {
        Self::Remove { path: path.into() }
    }

    /// Tracked path affected by change.
    pub fn path(&self) -> &str {
        match self {
            Self::Write { path, .. } | Self::Remove { path } => path.as_str(),
        }
    }
}

/// Layer of indirection for version control access.
pub trait Backend: Sized {
    /// Open storage repository at `location`, initializing it if absent.
    fn init(location: impl AsRef<Path>) -> Result<Self>;

    /// Location of storage repository.
    fn location(&self) -> &Path;

    /// Check if local branch exists.
    fn has_branch(&self, name: &str) -> Result<bool>;

    /// List local branch names.
    fn branches(&self) -> Result<Vec<String>>;

    /// Create [`DEFAULT_BRANCH`] with an empty root commit.
    fn create_root_commit(&self) -> Result<()>;

    /// Create branch from [`DEFAULT_BRANCH`] unless it already exists.
    ///
    /// Returns `true` if the branch was created.
    fn ensure_branch(&self, name: &str) -> Result<bool>;

    /// Delete local branch.
    ///
    /// Without `force`, refuses to delete a branch not merged into HEAD.
    fn delete_branch(&self, name: &str, force: bool) -> Result<()>;

    /// Name of checked out branch, or commit id if HEAD is detached.
    fn head(&self) -> Result<String>;

    /// Check out branch name or commit id into the working tree.
    fn checkout(&self, target: &str) -> Result<()>;

    /// Discard all uncommitted modifications of tracked files.
    fn reset_hard(&self) -> Result<()>;

    /// Stash uncommitted changes, untracked files included.
    ///
    /// Returns [`None`] if there was nothing to stash.
    fn stash_save(&self) -> Result<Option<StashId>>;

    /// Apply and drop target stash entry.
    fn stash_pop(&self, id: &StashId) -> Result<()>;

    /// Pull `refname` from `remote` into the checked out branch.
    fn pull(&self, remote: &str, refname: &str) -> Result<GitOutput>;

    /// Push `refname` to `remote`.
    fn push(&self, remote: &str, refname: &str) -> Result<GitOutput>;

    /// Abandon a merge left in progress by a failed pull.
    ///
    /// Does nothing if no merge is in progress.
    fn abort_merge(&self) -> Result<()>;

    /// List configured remote names.
    fn list_remotes(&self) -> Result<Vec<String>>;

    /// Check if any remote is known to carry `branch`.
    fn is_published(&self, branch: &str) -> Result<bool>;

    /// Read tracked file from tip of branch.
    ///
    /// Returns [`None`] if the branch or the file does not exist.
    fn read_file(&self, branch: &str, path: &str) -> Result<Option<String>>;

    /// Commit set of changes on top of branch tip as one commit.
    fn commit(&self, branch: &str, changes: &[Change], message: &str) -> Result<()>;
}

/// All possible error types for backend interaction.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),

    /// External git process cannot be spawned.
    #[error(transparent)]
    Syscall(#[from] std::io::Error),

    /// External git process exits with failure.
    #[error("command {command:?} failed: {}", stderr.trim())]
    Command { command: String, stderr: String },

    /// Branch required by operation does not exist.
    #[error("branch {0:?} does not exist")]
    BranchNotFound(String),

    /// Branch deletion refused because branch is not merged.
    #[error("branch {0:?} is not fully merged")]
    Unmerged(String),

    /// Stash entry vanished before it could be restored.
    #[error("stash {0} no longer exists")]
    UnknownStash(StashId),
}

/// Friendly result alias :3
pub type Result<T, E = BackendError> = std::result::Result<T, E>;
