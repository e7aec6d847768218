// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! In-memory storage repository.
//!
//! Models just enough of git to exercise board storage and the sync guards
//! without touching the file system: branches as path-to-content maps, a
//! checked out branch, a dirty flag standing in for uncommitted work, and a
//! stash stack. Checking out another branch while dirty is refused the same
//! way git refuses to clobber local changes.
//!
//! Remote commands are scripted. Queue results with
//! [`MemoryBackend::script_pull`] and [`MemoryBackend::script_push`]; when
//! nothing is queued, known remotes answer "up to date" and unknown ones fail
//! the way git does. [`MemoryBackend::conflict_on_pull`] makes the next pull
//! stop halfway through a merge, which blocks checkouts until it is aborted.

use crate::repo::{Backend, BackendError, Change, GitOutput, Result, StashId, DEFAULT_BRANCH};

use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet, VecDeque},
    path::{Path, PathBuf},
};

type Tree = BTreeMap<String, String>;

#[derive(Debug, Default)]
struct MemoryState {
    branches: BTreeMap<String, Tree>,
    head: String,
    dirty: bool,
    stashes: Vec<StashId>,
    stash_serial: usize,
    remotes: Vec<String>,
    pull_script: VecDeque<GitOutput>,
    push_script: VecDeque<GitOutput>,
    refuse_checkout: Option<String>,
    conflict_next_pull: bool,
    merging: bool,
    published: BTreeSet<String>,
    calls: Vec<String>,
}

/// Storage repository kept entirely in memory.
#[derive(Debug)]
pub struct MemoryBackend {
    location: PathBuf,
    state: RefCell<MemoryState>,
}

impl MemoryBackend {
    /// Mark working tree as carrying uncommitted changes, or clean it.
    pub fn set_dirty(&self, dirty: bool) {
        self.state.borrow_mut().dirty = dirty;
    }

    /// Check if working tree carries uncommitted changes.
    pub fn is_dirty(&self) -> bool {
        self.state.borrow().dirty
    }

    /// Stash entries currently held, oldest first.
    pub fn stashes(&self) -> Vec<StashId> {
        self.state.borrow().stashes.clone()
    }

    /// Configure a remote.
    pub fn add_remote(&self, name: impl Into<String>) {
        self.state.borrow_mut().remotes.push(name.into());
    }

    /// Queue result of next pull.
    pub fn script_pull(&self, output: GitOutput) {
        self.state.borrow_mut().pull_script.push_back(output);
    }

    /// Queue result of next push.
    pub fn script_push(&self, output: GitOutput) {
        self.state.borrow_mut().push_script.push_back(output);
    }

    /// Make next pull leave a conflicted merge behind.
    pub fn conflict_on_pull(&self) {
        self.state.borrow_mut().conflict_next_pull = true;
    }

    /// Check if a merge is in progress.
    pub fn is_merging(&self) -> bool {
        self.state.borrow().merging
    }

    /// Make every checkout of `target` fail.
    pub fn refuse_checkout(&self, target: impl Into<String>) {
        self.state.borrow_mut().refuse_checkout = Some(target.into());
    }

    /// Names of working tree and remote commands run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    /// Number of calls whose name starts with `prefix`.
    pub fn count_calls(&self, prefix: &str) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.state.borrow_mut().calls.push(call);
    }

    fn remote_output(&self, remote: &str, scripted: Option<GitOutput>, up_to_date: &str) -> GitOutput {
        if let Some(output) = scripted {
            return output;
        }

        if self.state.borrow().remotes.iter().any(|known| known == remote) {
            GitOutput::new(0, up_to_date, "")
        } else {
            GitOutput::new(
                128,
                "",
                format!(
                    "fatal: '{remote}' does not appear to be a git repository\n\
                     fatal: Could not read from remote repository.\n"
                ),
            )
        }
    }
}

impl Backend for MemoryBackend {
    fn init(location: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            location: location.as_ref().to_path_buf(),
            state: RefCell::new(MemoryState {
                head: DEFAULT_BRANCH.into(),
                ..MemoryState::default()
            }),
        })
    }

    fn location(&self) -> &Path {
        &self.location
    }

    fn has_branch(&self, name: &str) -> Result<bool> {
        Ok(self.state.borrow().branches.contains_key(name))
    }

    fn branches(&self) -> Result<Vec<String>> {
        Ok(self.state.borrow().branches.keys().cloned().collect())
    }

    fn create_root_commit(&self) -> Result<()> {
        self.record("root-commit".into());
        self.state
            .borrow_mut()
            .branches
            .insert(DEFAULT_BRANCH.into(), Tree::new());
        Ok(())
    }

    fn ensure_branch(&self, name: &str) -> Result<bool> {
        let mut state = self.state.borrow_mut();
        if state.branches.contains_key(name) {
            return Ok(false);
        }

        let base = state
            .branches
            .get(DEFAULT_BRANCH)
            .cloned()
            .ok_or_else(|| BackendError::BranchNotFound(DEFAULT_BRANCH.into()))?;
        state.branches.insert(name.into(), base);
        Ok(true)
    }

    fn delete_branch(&self, name: &str, force: bool) -> Result<()> {
        self.record(format!("delete-branch {name}"));
        let mut state = self.state.borrow_mut();
        if state.head == name {
            return Err(BackendError::Command {
                command: format!("git branch -D {name}"),
                stderr: format!("error: cannot delete branch '{name}' checked out\n"),
            });
        }

        let tree = state
            .branches
            .get(name)
            .ok_or_else(|| BackendError::BranchNotFound(name.into()))?;
        if !force && state.branches.get(&state.head) != Some(tree) {
            return Err(BackendError::Unmerged(name.into()));
        }

        state.branches.remove(name);
        Ok(())
    }

    fn head(&self) -> Result<String> {
        Ok(self.state.borrow().head.clone())
    }

    fn checkout(&self, target: &str) -> Result<()> {
        self.record(format!("checkout {target}"));
        let mut state = self.state.borrow_mut();
        let refused = state.refuse_checkout.as_deref() == Some(target);
        if refused || !state.branches.contains_key(target) {
            return Err(BackendError::Command {
                command: format!("git checkout {target}"),
                stderr: format!("error: pathspec '{target}' did not match any file(s) known to git\n"),
            });
        }

        if state.merging {
            return Err(BackendError::Command {
                command: format!("git checkout {target}"),
                stderr: "error: you need to resolve your current index first\n".into(),
            });
        }

        if state.dirty && state.head != target {
            return Err(BackendError::Command {
                command: format!("git checkout {target}"),
                stderr: "error: Your local changes to the following files would be overwritten by checkout\n"
                    .into(),
            });
        }

        state.head = target.into();
        Ok(())
    }

    fn reset_hard(&self) -> Result<()> {
        self.record("reset".into());
        self.state.borrow_mut().dirty = false;
        Ok(())
    }

    fn stash_save(&self) -> Result<Option<StashId>> {
        self.record("stash-save".into());
        let mut state = self.state.borrow_mut();
        if !state.dirty {
            return Ok(None);
        }

        state.stash_serial += 1;
        let id = StashId::new(format!("stash-{}", state.stash_serial));
        state.stashes.push(id.clone());
        state.dirty = false;
        Ok(Some(id))
    }

    fn stash_pop(&self, id: &StashId) -> Result<()> {
        self.record(format!("stash-pop {id}"));
        let mut state = self.state.borrow_mut();
        let position = state
            .stashes
            .iter()
            .position(|stash| stash == id)
            .ok_or_else(|| BackendError::UnknownStash(id.clone()))?;
        state.stashes.remove(position);
        state.dirty = true;
        Ok(())
    }

    fn pull(&self, remote: &str, refname: &str) -> Result<GitOutput> {
        self.record(format!("pull {remote} {refname}"));
        let mut state = self.state.borrow_mut();
        if std::mem::take(&mut state.conflict_next_pull) {
            state.merging = true;
            return Ok(GitOutput::new(
                1,
                "Auto-merging lists/todo.toml\n\
                 CONFLICT (content): Merge conflict in lists/todo.toml\n\
                 Automatic merge failed; fix conflicts and then commit the result.\n",
                "",
            ));
        }

        let scripted = state.pull_script.pop_front();
        drop(state);
        Ok(self.remote_output(remote, scripted, "Already up to date.\n"))
    }

    fn push(&self, remote: &str, refname: &str) -> Result<GitOutput> {
        self.record(format!("push {remote} {refname}"));
        let scripted = self.state.borrow_mut().push_script.pop_front();
        let output = self.remote_output(remote, scripted, "Everything up-to-date\n");
        if output.success() {
            self.state.borrow_mut().published.insert(refname.into());
        }

        Ok(output)
    }

    fn abort_merge(&self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.merging {
            state.calls.push("abort-merge".into());
            state.merging = false;
        }

        Ok(())
    }

    fn list_remotes(&self) -> Result<Vec<String>> {
        Ok(self.state.borrow().remotes.clone())
    }

    fn is_published(&self, branch: &str) -> Result<bool> {
        Ok(self.state.borrow().published.contains(branch))
    }

    fn read_file(&self, branch: &str, path: &str) -> Result<Option<String>> {
        Ok(self
            .state
            .borrow()
            .branches
            .get(branch)
            .and_then(|tree| tree.get(path))
            .cloned())
    }

    fn commit(&self, branch: &str, changes: &[Change], _message: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let tree = state
            .branches
            .get_mut(branch)
            .ok_or_else(|| BackendError::BranchNotFound(branch.into()))?;

        for change in changes {
            match change {
                Change::Write { path, contents } => {
                    tree.insert(path.clone(), contents.clone());
                }
                Change::Remove { path } => {
                    tree.remove(path);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn backend() -> MemoryBackend {
        let backend = MemoryBackend::init("/tmp/storage").unwrap();
        backend.create_root_commit().unwrap();
        backend
    }

    #[test]
    fn dirty_checkout_is_refused() {
        let backend = backend();
        backend.ensure_branch("foo").unwrap();
        backend.set_dirty(true);

        assert!(backend.checkout("foo").is_err());
        assert_eq!(backend.head().unwrap(), DEFAULT_BRANCH);

        let stash = backend.stash_save().unwrap().unwrap();
        backend.checkout("foo").unwrap();
        backend.checkout(DEFAULT_BRANCH).unwrap();
        backend.stash_pop(&stash).unwrap();
        assert!(backend.is_dirty());
        assert!(backend.stashes().is_empty());
    }

    #[test]
    fn clean_tree_stashes_nothing() {
        let backend = backend();
        assert_eq!(backend.stash_save().unwrap(), None);
        assert!(backend.stashes().is_empty());
    }

    #[test]
    fn unknown_remote_fails_like_git() {
        let backend = backend();
        backend.add_remote("origin");

        assert!(backend.pull("origin", "foo").unwrap().success());
        let output = backend.push("upstream", "foo").unwrap();
        assert_eq!(output.status, 128);
        assert!(output.stderr.contains("does not appear to be a git repository"));
        assert_eq!(backend.count_calls("p"), 2);
    }

    #[test]
    fn conflicted_pull_blocks_checkout_until_aborted() {
        let backend = backend();
        backend.ensure_branch("foo").unwrap();
        backend.add_remote("origin");
        backend.conflict_on_pull();

        let output = backend.pull("origin", "foo").unwrap();
        assert_eq!(output.status, 1);
        assert!(output.stdout.contains("CONFLICT"));
        assert!(backend.is_merging());
        assert!(backend.checkout("foo").is_err());

        backend.abort_merge().unwrap();
        assert!(!backend.is_merging());
        backend.checkout("foo").unwrap();
        assert!(backend.pull("origin", "foo").unwrap().success());
    }

    #[test]
    fn only_successful_push_publishes() {
        let backend = backend();
        backend.add_remote("origin");

        backend.push("upstream", "foo").unwrap();
        assert!(!backend.is_published("foo").unwrap());

        backend.push("origin", "foo").unwrap();
        assert!(backend.is_published("foo").unwrap());
        assert!(!backend.is_published("bar").unwrap());
    }
}
