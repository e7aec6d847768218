// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine where kood keeps its data. Everything lives under a single
//! __kood root__, which defaults to `~/.kood` but can be moved with the
//! `KOOD_ROOT` environment variable:
//!
//! ```text
//! <kood root>/
//! ├── config.toml   current board and custom repository overrides
//! └── storage/      shared repository holding one branch per board
//! ```

use std::{env, path::PathBuf};

/// Environment variable that overrides the kood root.
pub const KOOD_ROOT_VAR: &str = "KOOD_ROOT";

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`PathError::NoWayHome`] if home directory path cannot be
///   determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(PathError::NoWayHome)
}

/// Determine absolute path to the kood root directory.
///
/// Uses `$KOOD_ROOT` when set and non-empty, performing shell expansion on it,
/// otherwise `~/.kood`.
///
/// # Errors
///
/// - Return [`PathError::NoWayHome`] if home directory path cannot be
///   determined.
/// - Return [`PathError::ShellExpansion`] if `$KOOD_ROOT` references an
///   undefined variable.
pub fn kood_root() -> Result<PathBuf> {
    match env::var(KOOD_ROOT_VAR) {
        Ok(root) if !root.is_empty() => Ok(PathBuf::from(shellexpand::full(&root)?.into_owned())),
        _ => Ok(home_dir()?.join(".kood")),
    }
}

/// Determine default absolute path to the shared board storage repository.
///
/// # Errors
///
/// - Return [`PathError`] if the kood root cannot be determined.
pub fn default_storage_dir() -> Result<PathBuf> {
    Ok(kood_root()?.join("storage"))
}

/// Determine default absolute path to the configuration file.
///
/// # Errors
///
/// - Return [`PathError`] if the kood root cannot be determined.
pub fn default_config_path() -> Result<PathBuf> {
    Ok(kood_root()?.join("config.toml"))
}

/// Path resolution error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum PathError {
    /// No way to determine user's home directory.
    #[error("cannot determine absolute path to user's home directory")]
    NoWayHome,

    /// Shell expansion of `$KOOD_ROOT` failed.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<env::VarError>),
}

/// Friendly result alias :3
pub type Result<T, E = PathError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [("KOOD_ROOT", "/tmp/kood-root")])]
    fn kood_root_from_env() -> anyhow::Result<()> {
        assert_eq!(kood_root()?, PathBuf::from("/tmp/kood-root"));
        assert_eq!(default_storage_dir()?, PathBuf::from("/tmp/kood-root/storage"));
        assert_eq!(default_config_path()?, PathBuf::from("/tmp/kood-root/config.toml"));

        Ok(())
    }

    #[sealed_test(env = [("BOARDS", "/srv/boards"), ("KOOD_ROOT", "$BOARDS/kood")])]
    fn kood_root_is_shell_expanded() -> anyhow::Result<()> {
        assert_eq!(kood_root()?, PathBuf::from("/srv/boards/kood"));

        Ok(())
    }

    #[sealed_test(env = [("KOOD_ROOT", ""), ("HOME", "/home/blah")])]
    fn kood_root_defaults_to_home() -> anyhow::Result<()> {
        assert_eq!(kood_root()?, PathBuf::from("/home/blah/.kood"));

        Ok(())
    }
}
