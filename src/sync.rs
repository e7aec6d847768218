// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Remote synchronization of boards.
//!
//! Pulling and pushing a board needs its branch checked out in the storage
//! repository, and the storage repository may be a repository the user works
//! in. So every remote call runs behind a __guard__ that puts the working tree
//! back the way it was found:
//!
//! 1. Record the active HEAD.
//! 2. Stash local changes, untracked files included.
//! 3. Check out the board's branch.
//! 4. Run the remote call, aborting any merge a failed pull leaves behind.
//! 5. Check out the recorded HEAD.
//! 6. Pop the recorded stash.
//!
//! Steps 5 and 6 run no matter how steps 3 and 4 went, and before any error
//! is reported. If the recorded HEAD cannot be checked out again, the stash is
//! left alone and [`SyncError::GuardNotRestored`] names it, since popping it
//! onto the wrong branch would move the user's edits somewhere unexpected.
//!
//! A remote call that git itself rejects is not an error here. Its output is
//! returned as is, and [`classify`] tells what happened.

use crate::{
    board::Board,
    repo::{Backend, BackendError, GitOutput, StashId},
};

use std::fmt::{Display, Formatter, Result as FmtResult};
use tracing::{debug, info, instrument};

const UP_TO_DATE_MARKERS: [&str; 3] = [
    "Already up to date",
    "Already up-to-date",
    "Everything up-to-date",
];

const MISCONFIGURED_MARKERS: [&str; 2] = ["does not appear to be a git repository", "No such remote"];

/// Remote operation performed on a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    Pull,
    Push,
    Sync,
}

impl Display for SyncKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Pull => fmt.write_str("pull"),
            Self::Push => fmt.write_str("push"),
            Self::Sync => fmt.write_str("sync"),
        }
    }
}

/// Progress of a guarded remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    StashGuarded,
    BranchGuarded,
    BackendCallRunning,
    BranchRestored,
    StashRestored,
}

fn enter(phase: SyncPhase) {
    debug!("sync phase {phase:?}");
}

/// Single git transfer run behind the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transfer {
    Pull,
    Push,
}

/// Pull board's branch from remote.
///
/// # Errors
///
/// - Return [`SyncError::GuardNotRestored`] if the previous HEAD cannot be
///   checked out again.
/// - Return [`SyncError::StashNotRestored`] if local changes cannot be
///   popped back.
/// - Return [`SyncError::Backend`] if the working tree cannot be guarded or
///   git cannot be run at all.
#[instrument(skip(board), fields(board = board.id()), level = "debug")]
pub fn pull<B: Backend>(board: &Board<B>, remote: &str) -> Result<GitOutput> {
    guarded(board, Transfer::Pull, remote)
}

/// Push board's branch to remote.
///
/// # Errors
///
/// - Return [`SyncError::GuardNotRestored`] if the previous HEAD cannot be
///   checked out again.
/// - Return [`SyncError::StashNotRestored`] if local changes cannot be
///   popped back.
/// - Return [`SyncError::Backend`] if the working tree cannot be guarded or
///   git cannot be run at all.
#[instrument(skip(board), fields(board = board.id()), level = "debug")]
pub fn push<B: Backend>(board: &Board<B>, remote: &str) -> Result<GitOutput> {
    guarded(board, Transfer::Push, remote)
}

/// Pull board from remote, then push it back.
///
/// A pull that git rejects ends the sync right there. Its output is returned
/// and nothing is pushed.
///
/// # Errors
///
/// - Return [`SyncError`] under the same conditions as [`pull`] and [`push`].
#[instrument(skip(board), fields(board = board.id()), level = "debug")]
pub fn sync<B: Backend>(board: &Board<B>, remote: &str) -> Result<GitOutput> {
    let pulled = pull(board, remote)?;
    if !pulled.success() {
        info!("pull of {:?} failed, not pushing", board.id());
        return Ok(pulled);
    }

    push(board, remote)
}

fn guarded<B: Backend>(board: &Board<B>, transfer: Transfer, remote: &str) -> Result<GitOutput> {
    let backend = board.backend();
    enter(SyncPhase::Idle);

    let head = backend.head()?;
    let stash = backend.stash_save()?;
    enter(SyncPhase::StashGuarded);

    let output = backend.checkout(board.id()).and_then(|()| {
        enter(SyncPhase::BranchGuarded);
        enter(SyncPhase::BackendCallRunning);
        match transfer {
            Transfer::Pull => {
                let output = backend.pull(remote, board.id())?;
                if !output.success() {
                    backend.abort_merge()?;
                }
                Ok(output)
            }
            Transfer::Push => backend.push(remote, board.id()),
        }
    });

    // INVARIANT: Restoration always runs, and its failure outranks the call's.
    restore(backend, head, stash)?;
    enter(SyncPhase::Idle);

    Ok(output?)
}

fn restore<B: Backend>(backend: &B, head: String, stash: Option<StashId>) -> Result<()> {
    if let Err(source) = backend.checkout(&head) {
        return Err(SyncError::GuardNotRestored {
            branch: head,
            stash,
            source,
        });
    }
    enter(SyncPhase::BranchRestored);

    if let Some(stash) = stash {
        if let Err(source) = backend.stash_pop(&stash) {
            return Err(SyncError::StashNotRestored { stash, source });
        }
    }
    enter(SyncPhase::StashRestored);

    Ok(())
}

/// What a remote call did, judged from git's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing to transfer.
    UpToDate,

    /// Something was transferred.
    Updated,

    /// Remote does not exist or cannot be reached as a repository.
    RemoteMisconfigured,

    /// Git failed for any other reason, with its diagnostic.
    UnexpectedBackendError(String),
}

/// Successful outcome of a remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Synced {
    UpToDate,
    Updated,
}

impl SyncOutcome {
    /// Turn outcome into a result for target board and remote.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::RemoteMisconfigured`] listing the remotes that
    ///   are configured.
    /// - Return [`SyncError::UnexpectedBackendError`] with git's diagnostic.
    pub fn into_result<B: Backend>(self, board: &Board<B>, remote: &str) -> Result<Synced> {
        match self {
            Self::UpToDate => Ok(Synced::UpToDate),
            Self::Updated => Ok(Synced::Updated),
            Self::RemoteMisconfigured => Err(SyncError::RemoteMisconfigured {
                remote: remote.into(),
                known: board.backend().list_remotes()?,
            }),
            Self::UnexpectedBackendError(diagnostic) => {
                Err(SyncError::UnexpectedBackendError(diagnostic))
            }
        }
    }
}

/// Classify output of a remote call.
pub fn classify(kind: SyncKind, output: &GitOutput) -> SyncOutcome {
    let outcome = if output.success() {
        let up_to_date = UP_TO_DATE_MARKERS
            .iter()
            .any(|marker| output.stdout.contains(marker) || output.stderr.contains(marker));
        if up_to_date {
            SyncOutcome::UpToDate
        } else {
            SyncOutcome::Updated
        }
    } else if MISCONFIGURED_MARKERS
        .iter()
        .any(|marker| output.stderr.contains(marker))
    {
        SyncOutcome::RemoteMisconfigured
    } else {
        let stderr = output.stderr.replace("fatal: ", "");
        let diagnostic = match stderr.trim() {
            "" => output.stdout.trim(),
            stderr => stderr,
        };
        SyncOutcome::UnexpectedBackendError(diagnostic.to_string())
    };
    debug!("{kind} exited with {} as {outcome:?}", output.status);

    outcome
}

fn retained(stash: &Option<StashId>) -> String {
    match stash {
        Some(stash) => format!(", local changes kept in stash {stash}"),
        None => String::new(),
    }
}

/// Error types for remote synchronization.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Remote is unknown or not a repository.
    #[error("remote {remote:?} is not set up, known remotes: {known:?}")]
    RemoteMisconfigured { remote: String, known: Vec<String> },

    /// Git failed for a reason kood does not recognize.
    #[error("git failed: {0}")]
    UnexpectedBackendError(String),

    /// Previous HEAD could not be checked out again.
    #[error("failed to return to {branch:?}{}", retained(.stash))]
    GuardNotRestored {
        branch: String,
        stash: Option<StashId>,
        #[source]
        source: BackendError,
    },

    /// Stashed local changes could not be popped back.
    #[error("failed to restore local changes from stash {stash}")]
    StashNotRestored {
        stash: StashId,
        #[source]
        source: BackendError,
    },

    /// Storage repository interaction fails.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Friendly result alias :3
pub type Result<T, E = SyncError> = std::result::Result<T, E>;
