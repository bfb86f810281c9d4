//! Shared domain models.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ServiceError, ServiceResult};

/// Maximum length of a derived game identifier.
pub const MAX_GAME_ID_LEN: usize = 50;

/// Number of characters shown for shortened checkpoint ids.
pub const SHORT_ID_LEN: usize = 8;

/// A registered game and the directory holding its save files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    /// Stable slug derived from the name (e.g. `the_witcher_3`).
    pub id: String,
    /// Human-readable name, unique ignoring case.
    pub name: String,
    /// Directory snapshotted by checkpoints.
    pub save_path: PathBuf,
}

impl Game {
    /// Build a game record, deriving its identifier from `name`.
    pub fn new(name: impl Into<String>, save_path: impl Into<PathBuf>) -> Self {
        let name = name.into();
        Self {
            id: slugify(&name),
            name,
            save_path: save_path.into(),
        }
    }

    /// Reject records with a blank name or save path.
    pub fn validate(&self) -> ServiceResult<()> {
        if self.name.trim().is_empty() {
            return Err(ServiceError::EmptyGameName);
        }
        if self.save_path.as_os_str().is_empty() {
            return Err(ServiceError::EmptySavePath);
        }
        Ok(())
    }
}

/// An immutable snapshot of a game's save directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Random UUID.
    pub id: String,
    /// Owning [`Game::id`].
    pub game_id: String,
    /// Display name.
    pub name: String,
    /// Free-form note, possibly empty.
    #[serde(default)]
    pub note: String,
    /// Archive location relative to the vault root.
    #[serde(rename = "vault_file")]
    pub archive_ref: String,
    /// Hex SHA-256 of the archive bytes.
    #[serde(rename = "hash")]
    pub content_hash: String,
    /// Creation time (UTC).
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Reject records missing their owner or name.
    pub fn validate(&self) -> ServiceResult<()> {
        if self.game_id.is_empty() {
            return Err(ServiceError::EmptyGameId);
        }
        if self.name.trim().is_empty() {
            return Err(ServiceError::EmptyCheckpointName);
        }
        Ok(())
    }

    /// Leading characters of the id, enough for prefix lookup in practice.
    pub fn short_id(&self) -> &str {
        match self.id.char_indices().nth(SHORT_ID_LEN) {
            Some((idx, _)) => &self.id[..idx],
            None => &self.id,
        }
    }
}

/// Derive a stable identifier from a game name.
///
/// Lower-cases the name, folds every run of characters outside `[a-z0-9]`
/// into a single `_`, trims underscores from both ends and caps the result
/// at [`MAX_GAME_ID_LEN`] characters. Names with no usable characters map to
/// `game`.
pub fn slugify(name: &str) -> String {
    static NON_SLUG_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("invalid slug regex"));

    let lowered = name.to_lowercase();
    let replaced = NON_SLUG_RE.replace_all(&lowered, "_");
    let mut id = replaced.trim_matches('_').to_string();
    id.truncate(MAX_GAME_ID_LEN);
    if id.is_empty() {
        "game".to_string()
    } else {
        id
    }
}
