// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout and persistence.
//!
//! Kood keeps a single small configuration record per user. It names the
//! __current board__, i.e., the board targeted when no board id is given, and
//! the __custom repositories__ that some boards live in instead of the shared
//! storage repository.
//!
//! # General Layout
//!
//! ```toml
//! current_board_id = "groceries"
//!
//! [custom_repos]
//! work = "~/projects/work-boards"
//! ```
//!
//! # Lifecycle
//!
//! The record is loaded once through [`ConfigFile::load`] and handed to
//! whoever needs it. Mutations only touch the in-memory copy. Calling
//! [`ConfigFile::save`] writes the record back if and only if it differs from
//! what was last loaded or saved.
//!
//! # Editor
//!
//! The editor used to edit cards is not part of the record. It comes from the
//! environment, see [`editor`].

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    env,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::{read_to_string, write},
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, instrument};

/// Persisted configuration record.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Board implicitly targeted when no board id is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_board_id: Option<String>,

    /// Boards stored outside of the shared storage repository.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_repos: BTreeMap<String, String>,
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: Config = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on custom repository locations.
        for location in config.custom_repos.values_mut() {
            *location = shellexpand::full(location.as_str())
                .map_err(ConfigError::ShellExpansion)?
                .into_owned();
        }

        Ok(config)
    }
}

impl Display for Config {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Configuration record bound to the file it was loaded from.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
    config: Config,
    saved: Config,
}

impl ConfigFile {
    /// Load configuration from target path.
    ///
    /// A missing file is not an error. It yields the default record, which
    /// will only be written out once something changes.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if the file exists but cannot be read.
    /// - Return [`ConfigError::Deserialize`] if the file is not valid.
    #[instrument(skip(path), level = "debug")]
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = match read_to_string(&path) {
            Ok(data) => data.parse()?,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no configuration at {:?}, using defaults", path.display());
                Config::default()
            }
            Err(source) => return Err(ConfigError::Read { source, path }),
        };

        Ok(Self {
            path,
            saved: config.clone(),
            config,
        })
    }

    /// Path configuration is persisted to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current in-memory record.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Check if in-memory record differs from last persisted one.
    pub fn is_changed(&self) -> bool {
        self.config != self.saved
    }

    /// Persist in-memory record if it changed.
    ///
    /// Returns `true` if the file was written.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Write`] if the file or its parent directories
    ///   cannot be written.
    #[instrument(skip(self), level = "debug")]
    pub fn save(&mut self) -> Result<bool> {
        if !self.is_changed() {
            return Ok(false);
        }

        if let Some(parent) = self.path.parent() {
            mkdirp::mkdirp(parent).map_err(|source| ConfigError::Write {
                source,
                path: parent.to_path_buf(),
            })?;
        }

        write(&self.path, self.config.to_string()).map_err(|source| ConfigError::Write {
            source,
            path: self.path.clone(),
        })?;
        debug!("saved configuration to {:?}", self.path.display());
        self.saved = self.config.clone();

        Ok(true)
    }

    /// Id of currently selected board, if any.
    pub fn current_board_id(&self) -> Option<&str> {
        self.config.current_board_id.as_deref()
    }

    /// Select board as the current board.
    ///
    /// Persists only when the selection actually changed. Returns `true` if
    /// the file was written.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Write`] if the record cannot be persisted.
    pub fn select_board(&mut self, board_id: impl Into<String>) -> Result<bool> {
        self.config.current_board_id = Some(board_id.into());
        self.save()
    }

    /// Clear current board selection.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Write`] if the record cannot be persisted.
    pub fn unselect_board(&mut self) -> Result<bool> {
        self.config.current_board_id = None;
        self.save()
    }

    /// Custom repository location of target board, if any.
    pub fn custom_repo(&self, board_id: &str) -> Option<&Path> {
        self.config.custom_repos.get(board_id).map(Path::new)
    }

    /// Record custom repository location for target board.
    ///
    /// Does not persist. Call [`ConfigFile::save`] afterwards.
    pub fn set_custom_repo(&mut self, board_id: impl Into<String>, location: impl AsRef<Path>) {
        self.config.custom_repos.insert(
            board_id.into(),
            location.as_ref().to_string_lossy().into_owned(),
        );
    }

    /// Forget custom repository location of target board.
    ///
    /// Does not persist. Returns `true` if there was a location to forget.
    pub fn remove_custom_repo(&mut self, board_id: &str) -> bool {
        self.config.custom_repos.remove(board_id).is_some()
    }

    /// Locations of every custom repository, paired with their board.
    pub fn custom_repos(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.config
            .custom_repos
            .iter()
            .map(|(id, location)| (id.as_str(), Path::new(location)))
    }
}

/// Environment variables naming the card editor, in order of preference.
pub const EDITOR_VARS: [&str; 2] = ["KOOD_EDITOR", "EDITOR"];

/// Command line of the editor to edit cards with.
///
/// Takes the first of [`EDITOR_VARS`] that is set and not blank.
///
/// # Errors
///
/// - Return [`ConfigError::NoEditor`] if none of them is.
pub fn editor() -> Result<String> {
    EDITOR_VARS
        .iter()
        .filter_map(|var| env::var(var).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .ok_or(ConfigError::NoEditor)
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Configuration file exists but cannot be read.
    #[error("failed to read configuration at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// No editor is configured.
    #[error("no editor configured, set KOOD_EDITOR or EDITOR")]
    NoEditor,

    /// Configuration file cannot be written.
    #[error("failed to write configuration at {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
pub type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [("BLAH", "/home/blah/blah")])]
    fn deserialize_config() -> anyhow::Result<()> {
        let result: Config = r#"
            current_board_id = "groceries"

            [custom_repos]
            work = "$BLAH/boards"
        "#
        .parse()?;

        let expect = Config {
            current_board_id: Some("groceries".into()),
            custom_repos: BTreeMap::from([("work".into(), "/home/blah/blah/boards".into())]),
        };

        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn serialize_config() {
        let result = Config {
            current_board_id: Some("groceries".into()),
            custom_repos: BTreeMap::from([("work".into(), "/srv/boards".into())]),
        }
        .to_string();

        let expect = indoc! {r#"
            current_board_id = "groceries"

            [custom_repos]
            work = "/srv/boards"
        "#};

        assert_eq!(result, expect);
    }

    #[test]
    fn load_missing_file_yields_defaults() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = ConfigFile::load(dir.path().join("config.toml"))?;

        assert_eq!(config.config(), &Config::default());
        assert!(!config.is_changed());
        assert!(!dir.path().join("config.toml").exists());

        Ok(())
    }

    #[test]
    fn select_board_persists_only_on_change() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("config.toml");
        let mut config = ConfigFile::load(&path)?;

        assert!(config.select_board("foo")?);
        assert!(!config.select_board("foo")?);
        assert!(config.select_board("bar")?);

        let reloaded = ConfigFile::load(&path)?;
        assert_eq!(reloaded.current_board_id(), Some("bar"));

        assert!(config.unselect_board()?);
        assert!(!config.unselect_board()?);
        assert_eq!(ConfigFile::load(&path)?.current_board_id(), None);

        Ok(())
    }

    #[test]
    fn custom_repo_requires_explicit_save() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        let mut config = ConfigFile::load(&path)?;

        config.set_custom_repo("work", "/srv/boards");
        assert!(config.is_changed());
        assert!(!path.exists());

        assert!(config.save()?);
        let reloaded = ConfigFile::load(&path)?;
        assert_eq!(reloaded.custom_repo("work"), Some(Path::new("/srv/boards")));
        assert_eq!(reloaded.custom_repo("home"), None);

        Ok(())
    }

    #[sealed_test(env = [("KOOD_EDITOR", "nano -w"), ("EDITOR", "vim")])]
    fn editor_prefers_kood_editor() -> anyhow::Result<()> {
        assert_eq!(editor()?, "nano -w");

        Ok(())
    }

    #[sealed_test(env = [("KOOD_EDITOR", ""), ("EDITOR", "vim")])]
    fn editor_skips_blank_kood_editor() -> anyhow::Result<()> {
        assert_eq!(editor()?, "vim");

        Ok(())
    }

    #[sealed_test(env = [("KOOD_EDITOR", "  "), ("EDITOR", "")])]
    fn editor_missing_is_reported() {
        assert!(matches!(editor(), Err(ConfigError::NoEditor)));
    }
}
