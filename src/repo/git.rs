// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Storage repository access through libgit2 and the git binary.
//!
//! References, objects, and commits are handled through libgit2. Anything
//! that touches the working tree or a remote, i.e., checkout, reset, stash,
//! pull, and push, is handed to the git binary so the user's own git
//! configuration (credentials, hooks, merge settings) applies.
//!
//! Every git process is started with `-C <location>`. The process working
//! directory is never changed, so handles for different locations can be used
//! side by side.

use crate::repo::{Backend, BackendError, Change, GitOutput, Result, StashId, DEFAULT_BRANCH};

use git2::{
    build::{CheckoutBuilder, TreeUpdateBuilder},
    BranchType, ErrorCode, FileMode, Repository, RepositoryInitOptions, RepositoryState, Signature,
};
use std::{
    path::{Path, PathBuf},
    process::Command,
};
use tracing::{debug, info, instrument};

const FALLBACK_NAME: &str = "kood";
const FALLBACK_EMAIL: &str = "kood@localhost";

/// Storage repository backed by libgit2 and the git binary.
pub struct Git2Backend {
    repository: Repository,
    location: PathBuf,
}

impl Git2Backend {
    /// Borrow underlying libgit2 repository.
    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    fn signature(&self) -> Result<Signature<'static>> {
        Ok(self
            .repository
            .signature()
            .or_else(|_| Signature::now(FALLBACK_NAME, FALLBACK_EMAIL))?)
    }

    fn branch_ref(name: &str) -> String {
        format!("refs/heads/{name}")
    }

    fn stash_tip(&self) -> Result<Option<String>> {
        match self.repository.find_reference("refs/stash") {
            Ok(reference) => Ok(reference.target().map(|oid| oid.to_string())),
            Err(err) if err.code() == ErrorCode::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn expand_bin_args(&self, args: &[&str]) -> Vec<String> {
        let mut bin_args = vec!["-C".to_string(), self.location.to_string_lossy().into_owned()];

        // INVARIANT: Stash and merge commits need an identity even when the
        // user never configured one.
        if self.repository.signature().is_err() {
            bin_args.extend([
                "-c".to_string(),
                format!("user.name={FALLBACK_NAME}"),
                "-c".to_string(),
                format!("user.email={FALLBACK_EMAIL}"),
            ]);
        }

        bin_args.extend(args.iter().map(ToString::to_string));
        bin_args
    }

    fn gitcall(&self, args: &[&str]) -> Result<GitOutput> {
        syscall_non_interactive("git", self.expand_bin_args(args))
    }

    fn gitcall_checked(&self, args: &[&str]) -> Result<GitOutput> {
        let bin_args = self.expand_bin_args(args);
        let output = syscall_non_interactive("git", &bin_args)?;
        if !output.success() {
            return Err(BackendError::Command {
                command: format!("git {}", bin_args.join(" ")),
                stderr: output.stderr,
            });
        }

        Ok(output)
    }
}

impl Backend for Git2Backend {
    /// Open storage repository, or initialize a new one at target location.
    ///
    /// New repositories start with [`DEFAULT_BRANCH`] as their unborn HEAD.
    ///
    /// # Errors
    ///
    /// - Return [`BackendError::Git2`] if libgit2 operations fail.
    #[instrument(skip(location), level = "debug")]
    fn init(location: impl AsRef<Path>) -> Result<Self> {
        let location = location.as_ref();
        let repository = match Repository::open(location) {
            Ok(repository) => {
                debug!("open storage repository: {:?}", location.display());
                repository
            }
            Err(err) if err.code() == ErrorCode::NotFound => {
                info!("initialize storage repository: {:?}", location.display());
                let mut opts = RepositoryInitOptions::new();
                opts.initial_head(DEFAULT_BRANCH);
                opts.mkpath(true);
                Repository::init_opts(location, &opts)?
            }
            Err(err) => return Err(err.into()),
        };

        Ok(Self {
            repository,
            location: location.to_path_buf(),
        })
    }

    fn location(&self) -> &Path {
        &self.location
    }

    fn has_branch(&self, name: &str) -> Result<bool> {
        match self.repository.find_branch(name, BranchType::Local) {
            Ok(_) => Ok(true),
            Err(err) if err.code() == ErrorCode::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn branches(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in self.repository.branches(Some(BranchType::Local))? {
            let (branch, _) = entry?;
            if let Some(name) = branch.name()? {
                names.push(name.to_string());
            }
        }

        Ok(names)
    }

    #[instrument(skip(self), level = "debug")]
    fn create_root_commit(&self) -> Result<()> {
        info!("create root commit on {DEFAULT_BRANCH:?}");
        let tree_id = self.repository.treebuilder(None)?.write()?;
        let tree = self.repository.find_tree(tree_id)?;
        let signature = self.signature()?;
        self.repository.commit(
            Some(&Self::branch_ref(DEFAULT_BRANCH)),
            &signature,
            &signature,
            "init",
            &tree,
            &[],
        )?;

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn ensure_branch(&self, name: &str) -> Result<bool> {
        if self.has_branch(name)? {
            return Ok(false);
        }

        let base = match self.repository.find_branch(DEFAULT_BRANCH, BranchType::Local) {
            Ok(branch) => branch.get().peel_to_commit()?,
            Err(err) if err.code() == ErrorCode::NotFound => {
                return Err(BackendError::BranchNotFound(DEFAULT_BRANCH.into()))
            }
            Err(err) => return Err(err.into()),
        };
        self.repository.branch(name, &base, false)?;
        debug!("created branch {name:?}");

        Ok(true)
    }

    #[instrument(skip(self), level = "debug")]
    fn delete_branch(&self, name: &str, force: bool) -> Result<()> {
        let mut branch = match self.repository.find_branch(name, BranchType::Local) {
            Ok(branch) => branch,
            Err(err) if err.code() == ErrorCode::NotFound => {
                return Err(BackendError::BranchNotFound(name.into()))
            }
            Err(err) => return Err(err.into()),
        };

        if !force {
            let tip = branch.get().peel_to_commit()?.id();
            let head = self.repository.head()?.peel_to_commit()?.id();
            if tip != head && !self.repository.graph_descendant_of(head, tip)? {
                return Err(BackendError::Unmerged(name.into()));
            }
        }

        branch.delete()?;
        debug!("deleted branch {name:?}");

        Ok(())
    }

    fn head(&self) -> Result<String> {
        if self.repository.head_detached()? {
            let head = self.repository.head()?;
            return head
                .target()
                .map(|oid| oid.to_string())
                .ok_or_else(|| BackendError::BranchNotFound("HEAD".into()));
        }

        // INVARIANT: Read HEAD symbolically so unborn branches still resolve.
        let head = self.repository.find_reference("HEAD")?;
        let target = head.symbolic_target().unwrap_or(DEFAULT_BRANCH);
        Ok(target.strip_prefix("refs/heads/").unwrap_or(target).to_string())
    }

    #[instrument(skip(self), level = "debug")]
    fn checkout(&self, target: &str) -> Result<()> {
        self.gitcall_checked(&["checkout", "-q", target])?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn reset_hard(&self) -> Result<()> {
        self.gitcall_checked(&["reset", "-q", "--hard"])?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn stash_save(&self) -> Result<Option<StashId>> {
        let before = self.stash_tip()?;
        self.gitcall_checked(&["stash", "push", "-q", "--include-untracked", "-m", "kood guard"])?;
        let after = self.stash_tip()?;

        // INVARIANT: A clean tree produces no new stash entry.
        if after.is_some() && after != before {
            debug!("stashed local changes as {:?}", after);
            Ok(after.map(StashId::new))
        } else {
            Ok(None)
        }
    }

    #[instrument(skip(self), level = "debug")]
    fn stash_pop(&self, id: &StashId) -> Result<()> {
        let listing = self.gitcall_checked(&["stash", "list", "--format=%H"])?;
        let position = listing
            .stdout
            .lines()
            .position(|line| line.trim() == id.as_str())
            .ok_or_else(|| BackendError::UnknownStash(id.clone()))?;
        self.gitcall_checked(&["stash", "pop", "-q", &format!("stash@{{{position}}}")])?;

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn pull(&self, remote: &str, refname: &str) -> Result<GitOutput> {
        self.gitcall(&["pull", "--no-rebase", remote, refname])
    }

    #[instrument(skip(self), level = "debug")]
    fn push(&self, remote: &str, refname: &str) -> Result<GitOutput> {
        self.gitcall(&["push", remote, refname])
    }

    #[instrument(skip(self), level = "debug")]
    fn abort_merge(&self) -> Result<()> {
        if self.repository.state() != RepositoryState::Merge {
            return Ok(());
        }

        info!("abort merge left behind by pull");
        self.gitcall_checked(&["merge", "--abort"])?;
        Ok(())
    }

    fn is_published(&self, branch: &str) -> Result<bool> {
        for entry in self.repository.branches(Some(BranchType::Remote))? {
            let (remote_branch, _) = entry?;
            let published = remote_branch
                .name()?
                .and_then(|name| name.split_once('/'))
                .is_some_and(|(_, name)| name == branch);
            if published {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn list_remotes(&self) -> Result<Vec<String>> {
        Ok(self
            .repository
            .remotes()?
            .iter()
            .flatten()
            .map(str::to_owned)
            .collect())
    }

    fn read_file(&self, branch: &str, path: &str) -> Result<Option<String>> {
        let reference = match self.repository.find_reference(&Self::branch_ref(branch)) {
            Ok(reference) => reference,
            Err(err) if err.code() == ErrorCode::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let tree = reference.peel_to_commit()?.tree()?;
        let entry = match tree.get_path(Path::new(path)) {
            Ok(entry) => entry,
            Err(err) if err.code() == ErrorCode::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let blob = self.repository.find_blob(entry.id())?;

        Ok(Some(String::from_utf8_lossy(blob.content()).into_owned()))
    }

    #[instrument(skip(self, changes), level = "debug")]
    fn commit(&self, branch: &str, changes: &[Change], message: &str) -> Result<()> {
        let refname = Self::branch_ref(branch);
        let parent = match self.repository.find_reference(&refname) {
            Ok(reference) => reference.peel_to_commit()?,
            Err(err) if err.code() == ErrorCode::NotFound => {
                return Err(BackendError::BranchNotFound(branch.into()))
            }
            Err(err) => return Err(err.into()),
        };

        let mut update = TreeUpdateBuilder::new();
        for change in changes {
            match change {
                Change::Write { path, contents } => {
                    let blob = self.repository.blob(contents.as_bytes())?;
                    update.upsert(path.as_str(), blob, FileMode::Blob);
                }
                Change::Remove { path } => {
                    update.remove(path.as_str());
                }
            }
        }

        // INVARIANT: Commit onto the branch reference, not through HEAD.
        let tree_id = update.create_updated(&self.repository, &parent.tree()?)?;
        let tree = self.repository.find_tree(tree_id)?;
        let signature = self.signature()?;
        self.repository.commit(
            Some(&refname),
            &signature,
            &signature,
            message,
            &tree,
            &[&parent],
        )?;
        debug!("committed {} change(s) to {branch:?}: {message}", changes.len());

        // INVARIANT: Keep index and working tree in step when the branch we
        // just moved is the checked out one.
        if !self.repository.is_bare() && self.head()? == branch {
            let mut checkout = CheckoutBuilder::new();
            checkout.force();
            for change in changes {
                checkout.path(change.path());
            }
            self.repository.checkout_head(Some(&mut checkout))?;
        }

        Ok(())
    }
}

fn syscall_non_interactive(
    cmd: &str,
    args: impl IntoIterator<Item = impl AsRef<std::ffi::OsStr>>,
) -> Result<GitOutput> {
    // INVARIANT: Output is classified by message text, so pin the locale.
    let output = Command::new(cmd).args(args).env("LC_ALL", "C").output()?;
    let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
    let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();

    Ok(GitOutput {
        status: output.status.code().unwrap_or(-1),
        stdout,
        stderr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn fresh_repository_heads_default_branch() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let backend = Git2Backend::init(dir.path().join("storage"))?;

        assert_eq!(backend.head()?, DEFAULT_BRANCH);
        assert!(!backend.has_branch(DEFAULT_BRANCH)?);

        backend.create_root_commit()?;
        assert!(backend.has_branch(DEFAULT_BRANCH)?);
        assert_eq!(backend.branches()?, vec![DEFAULT_BRANCH.to_string()]);

        Ok(())
    }

    #[test]
    fn commit_lands_on_branch_without_checkout() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let backend = Git2Backend::init(dir.path())?;
        backend.create_root_commit()?;

        assert!(backend.ensure_branch("foo")?);
        assert!(!backend.ensure_branch("foo")?);
        backend.commit(
            "foo",
            &[
                Change::write("board.toml", "id = \"foo\"\n"),
                Change::write("lists/todo.toml", "id = \"todo\"\n"),
            ],
            "add todo",
        )?;

        assert_eq!(
            backend.read_file("foo", "lists/todo.toml")?.as_deref(),
            Some("id = \"todo\"\n")
        );
        assert_eq!(backend.read_file(DEFAULT_BRANCH, "board.toml")?, None);
        assert_eq!(backend.read_file("bar", "board.toml")?, None);
        assert_eq!(backend.head()?, DEFAULT_BRANCH);

        backend.commit("foo", &[Change::remove("lists/todo.toml")], "drop todo")?;
        assert_eq!(backend.read_file("foo", "lists/todo.toml")?, None);

        Ok(())
    }

    #[test]
    fn unmerged_branch_needs_force() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let backend = Git2Backend::init(dir.path())?;
        backend.create_root_commit()?;
        backend.ensure_branch("foo")?;
        backend.commit("foo", &[Change::write("board.toml", "")], "add board")?;

        assert!(matches!(
            backend.delete_branch("foo", false),
            Err(BackendError::Unmerged(_))
        ));
        backend.delete_branch("foo", true)?;
        assert!(!backend.has_branch("foo")?);
        assert!(matches!(
            backend.delete_branch("foo", true),
            Err(BackendError::BranchNotFound(_))
        ));

        Ok(())
    }
}
