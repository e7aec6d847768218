// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Task boards kept in git.
//!
//! Kood is a small kanban tool. Every __board__ is a branch of a git
//! repository, with its __lists__ and __cards__ stored as tracked files on
//! that branch. Boards travel between machines the same way code does,
//! through plain `git pull` and `git push`.
//!
//! # Layout
//!
//! - [`repo`]: storage backend trait, with a libgit2 backed implementation
//!   and an in-memory one.
//! - [`registry`]: where each board lives, and one backend per location.
//! - [`store`]: creating, finding, selecting, and deleting boards.
//! - [`board`]: lists and cards of a single board.
//! - [`sync`]: guarded pull and push of a board.
//! - [`config`]: persisted user configuration.
//! - [`path`]: default file system locations.

pub mod board;
pub mod config;
pub mod path;
pub mod registry;
pub mod repo;
pub mod store;
pub mod sync;

pub use board::{Board, Card, List};
pub use repo::{git::Git2Backend, Backend, GitOutput};
pub use store::{BoardStore, EntityKind, StoreError};
pub use sync::{classify, SyncError, SyncKind, SyncOutcome, Synced};
