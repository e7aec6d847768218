// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Storage repository registry.
//!
//! Boards live in the shared storage repository unless the configuration
//! routes them to a custom repository. The registry answers where a board
//! lives, and hands out one backend handle per location for the lifetime of
//! the registry, initializing the repository the first time it is opened.
//!
//! Handles are reference counted rather than locked. Kood is single-threaded,
//! so a location is never used by two callers at once.

use crate::{
    config::ConfigFile,
    repo::{Backend, Result, DEFAULT_BRANCH},
};

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    rc::Rc,
};
use tracing::{debug, instrument};

/// Cache of opened storage repositories keyed by location.
pub struct Registry<B>
where
    B: Backend,
{
    default_root: PathBuf,
    repos: HashMap<PathBuf, Rc<B>>,
}

impl<B> Registry<B>
where
    B: Backend,
{
    /// Construct new registry whose shared storage lives at `default_root`.
    pub fn new(default_root: impl Into<PathBuf>) -> Self {
        Self {
            default_root: default_root.into(),
            repos: HashMap::new(),
        }
    }

    /// Location of shared storage repository.
    pub fn default_root(&self) -> &Path {
        &self.default_root
    }

    /// Resolve location of the repository backing target board.
    pub fn resolve(&self, config: &ConfigFile, board_id: &str) -> PathBuf {
        config
            .custom_repo(board_id)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.default_root.clone())
    }

    /// Every location known through configuration, shared storage first.
    pub fn locations(&self, config: &ConfigFile) -> Vec<PathBuf> {
        let mut locations = vec![self.default_root.clone()];
        for (_, location) in config.custom_repos() {
            if !locations.iter().any(|known| known == location) {
                locations.push(location.to_path_buf());
            }
        }

        locations
    }

    /// Open storage repository at target location.
    ///
    /// Idempotent per location. On first open, the repository is initialized
    /// if missing, and given a [`DEFAULT_BRANCH`] with an empty root commit if
    /// it lacks one.
    ///
    /// # Errors
    ///
    /// - Return [`BackendError`](crate::repo::BackendError) if the repository
    ///   cannot be opened or initialized.
    #[instrument(skip(self, location), level = "debug")]
    pub fn open(&mut self, location: impl AsRef<Path>) -> Result<Rc<B>> {
        let location = location.as_ref();
        if let Some(backend) = self.repos.get(location) {
            return Ok(Rc::clone(backend));
        }

        let backend = B::init(location)?;
        if !backend.has_branch(DEFAULT_BRANCH)? {
            backend.create_root_commit()?;
        }
        debug!("registered storage repository {:?}", location.display());

        let backend = Rc::new(backend);
        self.repos.insert(location.to_path_buf(), Rc::clone(&backend));

        Ok(backend)
    }

    /// Resolve and open the repository backing target board.
    ///
    /// # Errors
    ///
    /// - Return [`BackendError`](crate::repo::BackendError) if the repository
    ///   cannot be opened or initialized.
    pub fn attach(&mut self, config: &ConfigFile, board_id: &str) -> Result<Rc<B>> {
        let location = self.resolve(config, board_id);
        self.open(location)
    }
}
