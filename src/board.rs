// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Boards, lists, and cards.
//!
//! A __board__ is one branch of a storage repository. Its lists and cards are
//! tracked TOML files on that branch:
//!
//! ```text
//! board.toml            board id and list ids in display order
//! lists/<list-id>.toml  list id and card ids in display order
//! cards/<card-id>.toml  card title, content, and creation time
//! ```
//!
//! Every mutation is committed as a single commit on the board's branch, so
//! the history of a board doubles as its audit log. Lists are identified by a
//! user chosen id that is only unique within its board. Cards are identified
//! by a generated id, and carry a human title that need not be unique.

use crate::{
    repo::{Backend, Change},
    store::{EntityKind, Result, StoreError},
};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    path::Path,
    rc::Rc,
};
use tracing::{info, instrument};
use uuid::Uuid;

pub(crate) const BOARD_FILE: &str = "board.toml";

fn list_path(id: &str) -> String {
    format!("lists/{id}.toml")
}

fn card_path(id: &str) -> String {
    format!("cards/{id}.toml")
}

/// Check if `id` can name a board or a list.
///
/// Board ids become branch names and list ids become file names, so both must
/// be valid branch names without path separators.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && !id.contains('/')
        && !id.starts_with('-')
        && git2::Reference::is_valid_name(&format!("refs/heads/{id}"))
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub(crate) struct BoardRecord {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) lists: Vec<String>,
}

impl BoardRecord {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            lists: Vec::new(),
        }
    }
}

/// Task board bound to the storage repository holding it.
pub struct Board<B>
where
    B: Backend,
{
    backend: Rc<B>,
    record: BoardRecord,
}

impl<B> Board<B>
where
    B: Backend,
{
    /// Load board from tip of its branch.
    ///
    /// Returns [`None`] if the branch, or its board record, does not exist.
    pub(crate) fn load(id: &str, backend: Rc<B>) -> Result<Option<Self>> {
        let Some(record) = read_record::<B, BoardRecord>(&*backend, id, BOARD_FILE)? else {
            return Ok(None);
        };

        Ok(Some(Self { backend, record }))
    }

    pub(crate) fn new(backend: Rc<B>, record: BoardRecord) -> Self {
        Self { backend, record }
    }

    /// Board id, which is also its branch name.
    pub fn id(&self) -> &str {
        self.record.id.as_str()
    }

    /// Location of storage repository holding board.
    pub fn location(&self) -> &Path {
        self.backend.location()
    }

    /// Backend of storage repository holding board.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Check if board's branch was ever published to a remote.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Backend`] if remote branches cannot be read.
    pub fn is_published(&self) -> Result<bool> {
        Ok(self.backend.is_published(self.id())?)
    }

    /// Re-read board record from tip of its branch.
    ///
    /// Picks up lists created or deleted through other handles to the same
    /// board since this one was loaded.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NotFound`] if the board no longer exists.
    /// - Return [`StoreError::Deserialize`] if the board record is invalid.
    pub fn reload(&mut self) -> Result<()> {
        self.record = self
            .read(BOARD_FILE)?
            .ok_or_else(|| StoreError::NotFound {
                kind: EntityKind::Board,
                id: self.id().into(),
            })?;

        Ok(())
    }

    /// List ids in display order.
    pub fn list_ids(&self) -> &[String] {
        &self.record.lists
    }

    /// Lists in display order.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Backend`] if tracked content cannot be read.
    /// - Return [`StoreError::Deserialize`] if a list record is invalid.
    pub fn lists(&self) -> Result<Vec<List>> {
        self.record
            .lists
            .iter()
            .map(|id| self.list_required(id))
            .collect()
    }

    /// Lookup list by id.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Backend`] if tracked content cannot be read.
    pub fn list(&self, id: &str) -> Result<Option<List>> {
        if !self.record.lists.iter().any(|list| list == id) {
            return Ok(None);
        }

        self.read(&list_path(id))
    }

    /// Lookup list by id, failing if it does not exist.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NotFound`] if there is no such list.
    pub fn list_required(&self, id: &str) -> Result<List> {
        self.list(id)?.ok_or_else(|| StoreError::NotFound {
            kind: EntityKind::List,
            id: id.into(),
        })
    }

    /// Create new empty list at the end of the board.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::InvalidId`] if `id` cannot name a list.
    /// - Return [`StoreError::DuplicateId`] if the board already has a list
    ///   with that id.
    #[instrument(skip(self), fields(board = self.id()), level = "debug")]
    pub fn create_list(&mut self, id: &str) -> Result<List> {
        if !is_valid_id(id) {
            return Err(StoreError::InvalidId {
                kind: EntityKind::List,
                id: id.into(),
            });
        }

        self.reload()?;
        if self.record.lists.iter().any(|list| list == id) {
            return Err(StoreError::DuplicateId {
                kind: EntityKind::List,
                id: id.into(),
            });
        }

        let list = List::new(id);
        let mut record = self.record.clone();
        record.lists.push(id.into());
        self.commit(
            &[
                Change::write(list_path(id), encode(&list)?),
                Change::write(BOARD_FILE, encode(&record)?),
            ],
            &format!("create list {id}"),
        )?;
        self.record = record;
        info!("created list {id:?}");

        Ok(list)
    }

    /// Delete list along with all of its cards.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NotFound`] if there is no such list.
    #[instrument(skip(self), fields(board = self.id()), level = "debug")]
    pub fn delete_list(&mut self, id: &str) -> Result<()> {
        self.reload()?;
        let list = self.list_required(id)?;

        let mut record = self.record.clone();
        record.lists.retain(|list| list != id);
        let mut changes = list
            .card_ids()
            .iter()
            .map(|card| Change::remove(card_path(card)))
            .collect::<Vec<_>>();
        changes.push(Change::remove(list_path(id)));
        changes.push(Change::write(BOARD_FILE, encode(&record)?));

        self.commit(&changes, &format!("delete list {id}"))?;
        self.record = record;
        info!("deleted list {id:?}");

        Ok(())
    }

    /// Every card of the board, in list order then card order.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Backend`] if tracked content cannot be read.
    pub fn cards(&self) -> Result<Vec<Card>> {
        let mut cards = Vec::new();
        for list in self.lists()? {
            cards.extend(self.list_cards(&list)?);
        }

        Ok(cards)
    }

    /// Cards of target list in display order.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Backend`] if tracked content cannot be read.
    /// - Return [`StoreError::NotFound`] if a card record went missing.
    pub fn list_cards(&self, list: &List) -> Result<Vec<Card>> {
        list.card_ids()
            .iter()
            .map(|id| {
                self.read(&card_path(id))?.ok_or_else(|| StoreError::NotFound {
                    kind: EntityKind::Card,
                    id: id.clone(),
                })
            })
            .collect()
    }

    /// Create new card at the end of target list.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NotFound`] if there is no such list.
    #[instrument(skip(self), fields(board = self.id()), level = "debug")]
    pub fn create_card(&mut self, list_id: &str, title: &str) -> Result<Card> {
        let mut list = self.list_required(list_id)?;
        let card = Card::new(title);
        list.cards.push(card.id.clone());

        self.commit(
            &[
                Change::write(card_path(card.id()), encode(&card)?),
                Change::write(list_path(list_id), encode(&list)?),
            ],
            &format!("create card {} in {list_id}", card.short_id()),
        )?;
        info!("created card {:?} in list {list_id:?}", card.title());

        Ok(card)
    }

    /// Lookup card by id or title.
    ///
    /// An exact id wins, then an exact title, then any card whose id or title
    /// starts with `query`. A title or prefix shared by several cards is
    /// rejected rather than guessed.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NotFound`] if nothing matches.
    /// - Return [`StoreError::Ambiguous`] if several cards match.
    pub fn find_card(&self, query: &str) -> Result<Card> {
        let cards = self.cards()?;
        match lookup_card(&cards, query) {
            CardMatch::Found(card) => Ok(card.clone()),
            CardMatch::Ambiguous(matches) => Err(StoreError::Ambiguous {
                query: query.into(),
                matches,
            }),
            CardMatch::Missing => Err(StoreError::NotFound {
                kind: EntityKind::Card,
                id: query.into(),
            }),
        }
    }

    /// Delete card matching query, see [`Board::find_card`].
    ///
    /// Returns the deleted card.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NotFound`] if nothing matches.
    /// - Return [`StoreError::Ambiguous`] if several cards match.
    #[instrument(skip(self), fields(board = self.id()), level = "debug")]
    pub fn delete_card(&mut self, query: &str) -> Result<Card> {
        let card = self.find_card(query)?;
        let mut list = self.owning_list(&card)?;
        list.cards.retain(|id| id != card.id());

        self.commit(
            &[
                Change::remove(card_path(card.id())),
                Change::write(list_path(list.id()), encode(&list)?),
            ],
            &format!("delete card {}", card.short_id()),
        )?;
        info!("deleted card {:?}", card.title());

        Ok(card)
    }

    /// Persist edited title and content of a card.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NotFound`] if the card no longer exists.
    #[instrument(skip(self, card), fields(board = self.id(), card = card.id()), level = "debug")]
    pub fn update_card(&mut self, card: &Card) -> Result<()> {
        // INVARIANT: Only cards that are still owned by a list can be updated.
        self.owning_list(card)?;
        self.commit(
            &[Change::write(card_path(card.id()), encode(card)?)],
            &format!("update card {}", card.short_id()),
        )?;

        Ok(())
    }

    fn owning_list(&self, card: &Card) -> Result<List> {
        self.lists()?
            .into_iter()
            .find(|list| list.card_ids().iter().any(|id| id == card.id()))
            .ok_or_else(|| StoreError::NotFound {
                kind: EntityKind::Card,
                id: card.id().into(),
            })
    }

    fn read<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        read_record(&*self.backend, self.id(), path)
    }

    fn commit(&self, changes: &[Change], message: &str) -> Result<()> {
        Ok(self.backend.commit(self.id(), changes, message)?)
    }
}

impl<B> Clone for Board<B>
where
    B: Backend,
{
    fn clone(&self) -> Self {
        Self {
            backend: Rc::clone(&self.backend),
            record: self.record.clone(),
        }
    }
}

impl<B> Debug for Board<B>
where
    B: Backend,
{
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.debug_struct("Board")
            .field("id", &self.record.id)
            .field("location", &self.location())
            .field("lists", &self.record.lists)
            .finish()
    }
}

/// Named, ordered grouping of cards.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct List {
    id: String,
    #[serde(default)]
    cards: Vec<String>,
}

impl List {
    fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cards: Vec::new(),
        }
    }

    /// List id, unique within its board.
    pub fn id(&self) -> &str {
        self.id.as_str()
    }

    /// Card ids in display order.
    pub fn card_ids(&self) -> &[String] {
        &self.cards
    }
}

/// Single task item.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Card {
    id: String,
    title: String,
    #[serde(default)]
    content: String,
    created_at: DateTime<Utc>,
}

impl Card {
    fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            content: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        self.id.as_str()
    }

    /// First eight characters of the id, enough to tell cards apart.
    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(self.id.as_str())
    }

    pub fn title(&self) -> &str {
        self.title.as_str()
    }

    pub fn content(&self) -> &str {
        self.content.as_str()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
    }

    /// Render card as an editable draft: title, blank line, content.
    pub fn to_draft(&self) -> String {
        format!("{}\n\n{}", self.title, self.content)
    }

    /// Take title and content from an edited draft.
    ///
    /// The first line is the title, everything after it the content, both
    /// trimmed. Returns whether anything changed.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::EmptyTitle`] if the first line is blank.
    pub fn apply_draft(&mut self, draft: &str) -> Result<bool> {
        let (title, content) = draft.split_once('\n').unwrap_or((draft, ""));
        let (title, content) = (title.trim(), content.trim());
        if title.is_empty() {
            return Err(StoreError::EmptyTitle);
        }

        if title == self.title && content == self.content {
            return Ok(false);
        }

        self.set_title(title);
        self.set_content(content);
        Ok(true)
    }
}

/// Result of matching a card query against a set of cards.
#[derive(Debug, PartialEq, Eq)]
pub enum CardMatch<'a> {
    /// Exactly one card matches.
    Found(&'a Card),

    /// Several cards match.
    Ambiguous(usize),

    /// No card matches.
    Missing,
}

/// Match query against cards by id, then title, then id or title prefix.
pub fn lookup_card<'a>(cards: &'a [Card], query: &str) -> CardMatch<'a> {
    if let Some(card) = cards.iter().find(|card| card.id() == query) {
        return CardMatch::Found(card);
    }

    let exact = cards
        .iter()
        .filter(|card| card.title() == query)
        .collect::<Vec<_>>();
    if !exact.is_empty() {
        return single(exact);
    }

    let partial = cards
        .iter()
        .filter(|card| card.id().starts_with(query) || card.title().starts_with(query))
        .collect::<Vec<_>>();
    single(partial)
}

fn single(matches: Vec<&Card>) -> CardMatch<'_> {
    match matches.len() {
        0 => CardMatch::Missing,
        1 => CardMatch::Found(matches[0]),
        count => CardMatch::Ambiguous(count),
    }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<String> {
    Ok(toml::ser::to_string_pretty(value)?)
}

fn read_record<B, T>(backend: &B, branch: &str, path: &str) -> Result<Option<T>>
where
    B: Backend,
    T: DeserializeOwned,
{
    let Some(data) = backend.read_file(branch, path)? else {
        return Ok(None);
    };

    toml::de::from_str(&data)
        .map(Some)
        .map_err(|source| StoreError::Deserialize {
            path: format!("{branch}:{path}"),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    fn card(id: &str, title: &str) -> Card {
        Card {
            id: id.into(),
            title: title.into(),
            content: String::new(),
            created_at: Utc::now(),
        }
    }

    fn deck() -> Vec<Card> {
        vec![
            card("0a1b2c3d-0000", "fo"),
            card("1b2c3d4e-0000", "foo"),
            card("2c3d4e5f-0000", "Buy milk"),
            card("3d4e5f60-0000", "Buy bread"),
            card("4e5f6071-0000", "chores"),
            card("5f607182-0000", "chores"),
        ]
    }

    #[test_case("1b2c3d4e-0000", "foo"; "exact id")]
    #[test_case("fo", "fo"; "exact title beats longer prefix match")]
    #[test_case("foo", "foo"; "exact title")]
    #[test_case("Buy m", "Buy milk"; "unique title prefix")]
    #[test_case("2c3d", "Buy milk"; "unique id prefix")]
    #[test]
    fn lookup_card_finds_single_match(query: &str, title: &str) {
        let cards = deck();
        match lookup_card(&cards, query) {
            CardMatch::Found(card) => pretty_assertions::assert_eq!(card.title(), title),
            other => panic!("expected {title:?}, got {other:?}"),
        }
    }

    #[test_case("f", 2; "shared title prefix")]
    #[test_case("Buy", 2; "shared word")]
    #[test_case("chores", 2; "duplicate titles")]
    #[test]
    fn lookup_card_rejects_ambiguity(query: &str, matches: usize) {
        let cards = deck();
        pretty_assertions::assert_eq!(lookup_card(&cards, query), CardMatch::Ambiguous(matches));
    }

    #[test]
    fn lookup_card_reports_missing() {
        let cards = deck();
        assert_eq!(lookup_card(&cards, "Sell"), CardMatch::Missing);
        assert_eq!(lookup_card(&[], "anything"), CardMatch::Missing);
    }

    #[test]
    fn unedited_draft_changes_nothing() -> anyhow::Result<()> {
        let mut card = card("0a1b2c3d-0000", "Buy milk");
        card.set_content("two liters");

        let draft = card.to_draft();
        assert_eq!(draft, "Buy milk\n\ntwo liters");
        assert!(!card.apply_draft(&draft)?);
        assert!(!card.apply_draft(&format!("{draft}\n"))?);

        Ok(())
    }

    #[test_case("Buy bread\n\ntwo loaves\n", "Buy bread", "two loaves"; "title and content")]
    #[test_case("Buy milk\n", "Buy milk", ""; "content cleared")]
    #[test_case("  Buy oat milk  ", "Buy oat milk", ""; "title only")]
    #[test]
    fn edited_draft_is_applied(draft: &str, title: &str, content: &str) -> anyhow::Result<()> {
        let mut card = card("0a1b2c3d-0000", "Buy milk");
        card.set_content("two liters");

        assert!(card.apply_draft(draft)?);
        pretty_assertions::assert_eq!(card.title(), title);
        pretty_assertions::assert_eq!(card.content(), content);

        Ok(())
    }

    #[test_case(""; "empty")]
    #[test_case("\n\nsome content"; "blank first line")]
    #[test]
    fn draft_without_title_is_rejected(draft: &str) {
        let mut card = card("0a1b2c3d-0000", "Buy milk");
        assert!(matches!(card.apply_draft(draft), Err(StoreError::EmptyTitle)));
        pretty_assertions::assert_eq!(card.title(), "Buy milk");
    }

    #[test_case("todo", true; "plain")]
    #[test_case("in-progress", true; "dashed")]
    #[test_case("", false; "empty")]
    #[test_case("a/b", false; "nested")]
    #[test_case("-d", false; "option like")]
    #[test_case("two words", false; "whitespace")]
    #[test_case("dots..dots", false; "double dot")]
    #[test]
    fn id_validation(id: &str, valid: bool) {
        pretty_assertions::assert_eq!(is_valid_id(id), valid);
    }
}
