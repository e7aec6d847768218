// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Board store management and manipulation.
//!
//! Kood groups boards together into one place called the __board store__.
//! The board store knows every storage repository through its
//! [`Registry`], and the user's [`ConfigFile`] through which it tracks the
//! __current board__ and the boards kept in custom repositories.
//!
//! # Board Store Layout
//!
//! Boards are kept in the shared storage repository at
//! `<kood root>/storage` by default, each board being a branch named after
//! the board itself. A board can also be created in a custom repository
//! anywhere on the file system. Its location is recorded in the configuration
//! so later lookups know where to find it.
//!
//! # Current Board
//!
//! The configuration names one board as current. It is only a pointer: the
//! board may have been deleted behind kood's back, in which case resolving it
//! simply finds nothing. Only the top-level entry point resolves the current
//! board. Everything else takes the board to operate on explicitly.

use crate::{
    board::{is_valid_id, Board, BoardRecord, BOARD_FILE},
    config::ConfigFile,
    path::{default_config_path, default_storage_dir},
    registry::Registry,
    repo::{git::Git2Backend, Backend, Change, DEFAULT_BRANCH},
};

use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Collection of every board reachable through the configuration.
pub struct BoardStore<B = Git2Backend>
where
    B: Backend,
{
    config: ConfigFile,
    registry: Registry<B>,
}

impl BoardStore<Git2Backend> {
    /// Open board store at default locations.
    ///
    /// Loads configuration from `<kood root>/config.toml` and uses
    /// `<kood root>/storage` as shared storage repository.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Path`] if the kood root cannot be determined.
    /// - Return [`StoreError::Config`] if configuration cannot be loaded.
    pub fn open_default() -> Result<Self> {
        let config = ConfigFile::load(default_config_path()?)?;
        Ok(Self::new(config, Registry::new(default_storage_dir()?)))
    }
}

impl<B> BoardStore<B>
where
    B: Backend,
{
    /// Construct new board store.
    pub fn new(config: ConfigFile, registry: Registry<B>) -> Self {
        Self { config, registry }
    }

    /// Configuration used by board store.
    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Create new board.
    ///
    /// If `custom_repo` is given, the board lives there instead of in the
    /// shared storage repository. A relative path is taken relative to the
    /// current directory and recorded as absolute. The override is persisted before the
    /// board's branch is created. Should branch creation fail afterwards, the
    /// override is left behind and reported through a warning.
    ///
    /// An existing board branch in a custom repository is adopted as is.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::InvalidId`] if `id` cannot name a board.
    /// - Return [`StoreError::DuplicateId`] if a board with that id exists.
    /// - Return [`StoreError::Location`] if `custom_repo` cannot be made
    ///   absolute.
    /// - Return [`StoreError::Config`] if the override cannot be persisted.
    /// - Return [`StoreError::Backend`] if the branch cannot be created.
    #[instrument(skip(self, custom_repo), level = "debug")]
    pub fn create(&mut self, id: &str, custom_repo: Option<&Path>) -> Result<Board<B>> {
        if !is_valid_id(id) || id == DEFAULT_BRANCH {
            return Err(StoreError::InvalidId {
                kind: EntityKind::Board,
                id: id.into(),
            });
        }

        if self.get(id)?.is_some() {
            return Err(StoreError::DuplicateId {
                kind: EntityKind::Board,
                id: id.into(),
            });
        }

        let custom_repo = custom_repo
            .map(|path| {
                std::path::absolute(path).map_err(|source| StoreError::Location {
                    source,
                    path: path.to_path_buf(),
                })
            })
            .transpose()?;
        if let Some(location) = &custom_repo {
            self.config.set_custom_repo(id, location);
            self.config.save()?;
        }

        let board = self.attach_new(id);
        if board.is_err() {
            if let Some(location) = &custom_repo {
                warn!(
                    "board {id:?} was not created, but its repository override {:?} remains",
                    location.display()
                );
            }
        }

        let board = board?;
        info!("created board {id:?} in {:?}", board.location().display());

        Ok(board)
    }

    fn attach_new(&mut self, id: &str) -> Result<Board<B>> {
        let backend = self.registry.attach(&self.config, id)?;
        backend.ensure_branch(id)?;

        if let Some(board) = Board::load(id, backend.clone())? {
            debug!("adopting existing board {id:?}");
            return Ok(board);
        }

        let record = BoardRecord::new(id);
        backend.commit(
            id,
            &[Change::write(BOARD_FILE, crate::board::encode(&record)?)],
            &format!("create board {id}"),
        )?;

        Ok(Board::new(backend, record))
    }

    /// Lookup board by id.
    ///
    /// Attaches the storage repository the board resolves to before reading
    /// it. Returns [`None`] if there is no such board.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Backend`] if the storage repository cannot be
    ///   opened or read.
    #[instrument(skip(self), level = "debug")]
    pub fn get(&mut self, id: &str) -> Result<Option<Board<B>>> {
        if !is_valid_id(id) {
            return Ok(None);
        }

        let backend = self.registry.attach(&self.config, id)?;
        Board::load(id, backend)
    }

    /// Lookup board by id, failing if it does not exist.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NotFound`] if there is no such board.
    pub fn get_required(&mut self, id: &str) -> Result<Board<B>> {
        self.get(id)?.ok_or_else(|| StoreError::NotFound {
            kind: EntityKind::Board,
            id: id.into(),
        })
    }

    /// Delete board along with its entire history.
    ///
    /// If the board's branch is checked out, the storage repository's working
    /// tree is first hard reset and parked on [`DEFAULT_BRANCH`]. Otherwise
    /// the working tree is left alone. If the board is current, the current
    /// board is cleared. The branch is force deleted regardless of merge
    /// state.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Backend`] if the working tree cannot be parked
    ///   or the branch cannot be deleted.
    /// - Return [`StoreError::Config`] if configuration cannot be persisted.
    #[instrument(skip(self, board), fields(board = board.id()), level = "debug")]
    pub fn delete(&mut self, board: Board<B>) -> Result<()> {
        let backend = board.backend();
        if backend.head()? == board.id() {
            debug!("parking working tree of {:?} on {DEFAULT_BRANCH:?}", board.id());
            backend.reset_hard()?;
            backend.checkout(DEFAULT_BRANCH)?;
        }

        if self.is_current(&board) {
            self.config.unselect_board()?;
        }

        backend.delete_branch(board.id(), true)?;
        if self.config.remove_custom_repo(board.id()) {
            self.config.save()?;
        }
        info!("deleted board {:?}", board.id());

        Ok(())
    }

    /// Ids of every board, sorted.
    ///
    /// Covers boards in the shared storage repository and every board routed
    /// to a custom repository.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Backend`] if a storage repository cannot be
    ///   read.
    pub fn boards(&mut self) -> Result<Vec<String>> {
        let mut ids = BTreeSet::new();
        for location in self.registry.locations(&self.config) {
            let backend = self.registry.open(&location)?;
            for branch in backend.branches()? {
                // INVARIANT: A branch is only a board where its id resolves to.
                if branch == DEFAULT_BRANCH || self.registry.resolve(&self.config, &branch) != location {
                    continue;
                }

                if backend.read_file(&branch, BOARD_FILE)?.is_some() {
                    ids.insert(branch);
                }
            }
        }

        Ok(ids.into_iter().collect())
    }

    /// Check if target board is the current board.
    pub fn is_current(&self, board: &Board<B>) -> bool {
        self.config.current_board_id() == Some(board.id())
    }

    /// Select board as current by id.
    ///
    /// Does not check that the board exists. Returns `true` if the
    /// configuration had to be written.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Config`] if configuration cannot be persisted.
    pub fn select(&mut self, id: &str) -> Result<bool> {
        Ok(self.config.select_board(id)?)
    }

    /// Clear current board selection.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Config`] if configuration cannot be persisted.
    pub fn unselect(&mut self) -> Result<bool> {
        Ok(self.config.unselect_board()?)
    }

    /// Select existing board as current.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NotFound`] if there is no such board.
    /// - Return [`StoreError::Config`] if configuration cannot be persisted.
    pub fn switch(&mut self, id: &str) -> Result<Board<B>> {
        let board = self.get_required(id)?;
        self.select(id)?;
        Ok(board)
    }

    /// Resolve current board.
    ///
    /// Returns [`None`] if no board is selected, or if the selected board
    /// cannot be resolved anymore.
    pub fn current(&mut self) -> Option<Board<B>> {
        let id = self.config.current_board_id()?.to_string();
        match self.get(&id) {
            Ok(Some(board)) => Some(board),
            Ok(None) => {
                warn!("current board {id:?} no longer exists");
                None
            }
            Err(err) => {
                warn!("cannot resolve current board {id:?}: {err}");
                None
            }
        }
    }

    /// Resolve current board, failing if nothing resolves.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NoBoardSelected`] if no board is selected or
    ///   the selected board cannot be resolved.
    pub fn current_required(&mut self) -> Result<Board<B>> {
        self.current().ok_or(StoreError::NoBoardSelected)
    }
}

/// Kind of entity an identity error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Board,
    List,
    Card,
}

impl Display for EntityKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Board => fmt.write_str("board"),
            Self::List => fmt.write_str("list"),
            Self::Card => fmt.write_str("card"),
        }
    }
}

/// All possible error types for board store interaction.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Entity with same id already exists.
    #[error("a {kind} with id {id:?} already exists")]
    DuplicateId { kind: EntityKind, id: String },

    /// Referenced entity does not exist.
    #[error("the specified {kind} {id:?} does not exist")]
    NotFound { kind: EntityKind, id: String },

    /// Id cannot be used to name an entity.
    #[error("{id:?} is not a valid {kind} id")]
    InvalidId { kind: EntityKind, id: String },

    /// Card query matches several cards.
    #[error("{query:?} matches {matches} cards, be more specific")]
    Ambiguous { query: String, matches: usize },

    /// No board is selected, or the selected board is gone.
    #[error("no board has been selected yet")]
    NoBoardSelected,

    /// Tracked content cannot be deserialized.
    #[error("invalid record at {path}")]
    Deserialize {
        #[source]
        source: toml::de::Error,
        path: String,
    },

    /// Card draft has no title.
    #[error("card title cannot be empty")]
    EmptyTitle,

    /// Repository location cannot be resolved.
    #[error("failed to resolve repository location {path:?}")]
    Location {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Tracked content cannot be serialized.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Storage repository interaction fails.
    #[error(transparent)]
    Backend(#[from] crate::repo::BackendError),

    /// Configuration cannot be loaded or persisted.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    /// Default locations cannot be determined.
    #[error(transparent)]
    Path(#[from] crate::path::PathError),
}

/// Friendly result alias :3
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::memory::MemoryBackend;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn store() -> anyhow::Result<(TempDir, BoardStore<MemoryBackend>)> {
        let dir = tempfile::tempdir()?;
        let config = ConfigFile::load(dir.path().join("config.toml"))?;
        let store = BoardStore::new(config, Registry::new(dir.path().join("storage")));
        Ok((dir, store))
    }

    #[test]
    fn create_then_get() -> anyhow::Result<()> {
        let (_dir, mut store) = store()?;

        let board = store.create("foo", None)?;
        assert_eq!(board.id(), "foo");
        assert!(board.list_ids().is_empty());

        let found = store.get("foo")?.expect("board exists");
        assert_eq!(found.id(), "foo");
        assert!(store.get("bar")?.is_none());

        Ok(())
    }

    #[test]
    fn create_rejects_duplicate_and_invalid_ids() -> anyhow::Result<()> {
        let (_dir, mut store) = store()?;
        store.create("foo", None)?;

        assert!(matches!(
            store.create("foo", None),
            Err(StoreError::DuplicateId { kind: EntityKind::Board, .. })
        ));
        assert!(matches!(
            store.create(DEFAULT_BRANCH, None),
            Err(StoreError::InvalidId { .. })
        ));
        assert!(matches!(
            store.create("two words", None),
            Err(StoreError::InvalidId { .. })
        ));

        Ok(())
    }

    #[test]
    fn get_required_reports_missing_board() -> anyhow::Result<()> {
        let (_dir, mut store) = store()?;
        let err = store.get_required("ghost").unwrap_err();

        assert!(matches!(err, StoreError::NotFound { kind: EntityKind::Board, .. }));
        assert_eq!(err.to_string(), "the specified board \"ghost\" does not exist");

        Ok(())
    }

    #[test]
    fn create_in_custom_repo_persists_override_first() -> anyhow::Result<()> {
        let (dir, mut store) = store()?;
        let custom = dir.path().join("work");

        let board = store.create("work", Some(&custom))?;
        assert_eq!(board.location(), custom.as_path());

        let reloaded = ConfigFile::load(dir.path().join("config.toml"))?;
        assert_eq!(reloaded.custom_repo("work"), Some(custom.as_path()));
        assert_eq!(store.get("work")?.expect("board exists").location(), custom);

        Ok(())
    }

    #[test]
    fn create_records_relative_custom_repo_as_absolute() -> anyhow::Result<()> {
        let (dir, mut store) = store()?;
        let expected = std::env::current_dir()?.join("boards");

        let board = store.create("work", Some(Path::new("boards")))?;
        assert_eq!(board.location(), expected.as_path());

        let reloaded = ConfigFile::load(dir.path().join("config.toml"))?;
        assert_eq!(reloaded.custom_repo("work"), Some(expected.as_path()));
        assert!(reloaded.custom_repo("work").is_some_and(Path::is_absolute));

        Ok(())
    }

    #[test]
    fn boards_spans_shared_and_custom_repos() -> anyhow::Result<()> {
        let (dir, mut store) = store()?;
        store.create("foo", None)?;
        store.create("bar", None)?;
        store.create("work", Some(&dir.path().join("work")))?;

        assert_eq!(store.boards()?, vec!["bar", "foo", "work"]);

        Ok(())
    }

    #[test]
    fn deleting_current_board_clears_pointer() -> anyhow::Result<()> {
        let (_dir, mut store) = store()?;
        store.create("foo", None)?;
        let board = store.switch("foo")?;
        board.backend().checkout("foo")?;
        board.backend().set_dirty(true);

        store.delete(board)?;

        let root = store.registry.default_root().to_path_buf();
        let backend = store.registry.open(root)?;
        assert_eq!(store.config().current_board_id(), None);
        assert_eq!(backend.head()?, DEFAULT_BRANCH);
        assert!(!backend.is_dirty());
        assert!(store.get("foo")?.is_none());
        assert!(store.current().is_none());

        Ok(())
    }

    #[test]
    fn deleting_current_board_not_checked_out_keeps_tree() -> anyhow::Result<()> {
        let (_dir, mut store) = store()?;
        store.create("foo", None)?;
        let board = store.switch("foo")?;
        board.backend().set_dirty(true);

        store.delete(board)?;

        let root = store.registry.default_root().to_path_buf();
        let backend = store.registry.open(root)?;
        assert_eq!(store.config().current_board_id(), None);
        assert_eq!(backend.head()?, DEFAULT_BRANCH);
        assert!(backend.is_dirty());
        assert_eq!(backend.count_calls("reset"), 0);
        assert_eq!(backend.count_calls("checkout"), 0);
        assert!(store.get("foo")?.is_none());

        Ok(())
    }

    #[test]
    fn deleting_checked_out_board_parks_even_when_not_current() -> anyhow::Result<()> {
        let (_dir, mut store) = store()?;
        store.create("foo", None)?;
        let bar = store.create("bar", None)?;
        store.select("foo")?;
        bar.backend().checkout("bar")?;

        store.delete(bar)?;

        let root = store.registry.default_root().to_path_buf();
        let backend = store.registry.open(root)?;
        assert_eq!(store.config().current_board_id(), Some("foo"));
        assert_eq!(backend.head()?, DEFAULT_BRANCH);
        assert_eq!(backend.count_calls("reset"), 1);
        assert!(store.get("bar")?.is_none());

        Ok(())
    }

    #[test]
    fn deleting_other_board_keeps_pointer_and_tree() -> anyhow::Result<()> {
        let (_dir, mut store) = store()?;
        store.create("foo", None)?;
        let bar = store.create("bar", None)?;
        store.select("foo")?;
        bar.backend().set_dirty(true);

        store.delete(bar)?;

        let foo = store.current_required()?;
        assert_eq!(foo.id(), "foo");
        assert!(foo.backend().is_dirty());
        assert_eq!(foo.backend().count_calls("reset"), 0);
        assert!(store.get("bar")?.is_none());

        Ok(())
    }

    #[test]
    fn dangling_pointer_resolves_to_nothing() -> anyhow::Result<()> {
        let (_dir, mut store) = store()?;
        assert!(matches!(store.current_required(), Err(StoreError::NoBoardSelected)));

        store.select("ghost")?;
        assert!(store.current().is_none());
        assert!(matches!(store.current_required(), Err(StoreError::NoBoardSelected)));
        assert!(matches!(
            store.switch("ghost"),
            Err(StoreError::NotFound { kind: EntityKind::Board, .. })
        ));

        Ok(())
    }

    #[test]
    fn select_writes_once_per_change() -> anyhow::Result<()> {
        let (_dir, mut store) = store()?;
        store.create("foo", None)?;

        assert!(store.select("foo")?);
        assert!(!store.select("foo")?);
        assert!(store.unselect()?);

        Ok(())
    }

    #[test]
    fn board_list_card_scenario() -> anyhow::Result<()> {
        let (_dir, mut store) = store()?;
        let mut foo = store.create("foo", None)?;
        foo.create_list("todo")?;
        foo.create_card("todo", "Buy milk")?;

        let cards = store.get_required("foo")?.cards()?;
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].title(), "Buy milk");
        assert_eq!(cards[0].content(), "");

        store.delete(foo)?;
        assert!(store.get("foo")?.is_none());

        Ok(())
    }

    #[test]
    fn list_ids_are_scoped_per_board() -> anyhow::Result<()> {
        let (_dir, mut store) = store()?;
        let mut foo = store.create("foo", None)?;
        let mut bar = store.create("bar", None)?;

        foo.create_list("todo")?;
        bar.create_list("todo")?;
        assert!(matches!(
            foo.create_list("todo"),
            Err(StoreError::DuplicateId { kind: EntityKind::List, .. })
        ));

        assert_eq!(store.get_required("foo")?.list_ids(), ["todo"]);
        assert_eq!(store.get_required("bar")?.list_ids(), ["todo"]);

        Ok(())
    }

    #[test]
    fn stale_handles_do_not_drop_each_others_lists() -> anyhow::Result<()> {
        let (_dir, mut store) = store()?;
        let mut first = store.create("foo", None)?;
        let mut second = store.get_required("foo")?;

        first.create_list("todo")?;
        second.create_list("done")?;
        assert!(matches!(
            first.create_list("done"),
            Err(StoreError::DuplicateId { kind: EntityKind::List, .. })
        ));
        assert_eq!(store.get_required("foo")?.list_ids(), ["todo", "done"]);

        first.delete_list("done")?;
        second.create_list("doing")?;
        assert_eq!(store.get_required("foo")?.list_ids(), ["todo", "doing"]);

        Ok(())
    }

    #[test]
    fn lists_keep_creation_order_and_delete_their_cards() -> anyhow::Result<()> {
        let (_dir, mut store) = store()?;
        let mut board = store.create("foo", None)?;
        board.create_list("hello")?;
        board.create_list("world")?;
        board.create_card("world", "Water plants")?;
        board.create_card("hello", "Buy milk")?;

        let titles = board.cards()?.iter().map(|card| card.title().to_string()).collect::<Vec<_>>();
        assert_eq!(titles, vec!["Buy milk", "Water plants"]);

        board.delete_list("world")?;
        assert_eq!(board.list_ids(), ["hello"]);
        assert!(matches!(board.find_card("Water"), Err(StoreError::NotFound { .. })));
        assert!(matches!(
            board.delete_list("world"),
            Err(StoreError::NotFound { kind: EntityKind::List, .. })
        ));
        assert!(matches!(
            board.create_card("world", "Orphan"),
            Err(StoreError::NotFound { kind: EntityKind::List, .. })
        ));

        Ok(())
    }

    #[test]
    fn card_lookup_by_title_prefix() -> anyhow::Result<()> {
        let (_dir, mut store) = store()?;
        let mut board = store.create("foo", None)?;
        board.create_list("hello")?;
        board.create_card("hello", "fo")?;
        board.create_card("hello", "foo")?;
        board.create_card("hello", "Sample card")?;

        assert_eq!(board.find_card("Sam")?.title(), "Sample card");
        assert_eq!(board.find_card("fo")?.title(), "fo");
        assert!(matches!(
            board.find_card("f"),
            Err(StoreError::Ambiguous { matches: 2, .. })
        ));
        assert!(matches!(
            board.find_card("none"),
            Err(StoreError::NotFound { kind: EntityKind::Card, .. })
        ));

        Ok(())
    }

    #[test]
    fn cards_can_be_updated_and_deleted() -> anyhow::Result<()> {
        let (_dir, mut store) = store()?;
        let mut board = store.create("foo", None)?;
        board.create_list("hello")?;
        let mut card = board.create_card("hello", "Sample card")?;

        card.set_content("with details");
        board.update_card(&card)?;
        let stored = store.get_required("foo")?.find_card(card.id())?;
        assert_eq!(stored.content(), "with details");
        assert_eq!(stored.created_at(), card.created_at());

        let deleted = board.delete_card("Sample card")?;
        assert_eq!(deleted.id(), card.id());
        assert!(board.cards()?.is_empty());
        assert!(matches!(board.update_card(&card), Err(StoreError::NotFound { .. })));

        Ok(())
    }
}
