//! Durable JSON persistence for the game and checkpoint tables.

use std::{
    fs,
    io::{self, ErrorKind, Write},
    path::{Path, PathBuf},
};

use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::{
    error::{StoreError, StoreResult},
    models::{Checkpoint, Game},
};

/// File name of the games table inside the metadata directory.
pub const GAMES_FILE: &str = "games.json";

/// File name of the checkpoints table inside the metadata directory.
pub const CHECKPOINTS_FILE: &str = "checkpoints.json";

/// Storage for the two metadata tables.
///
/// Loads of a table that was never written return an empty collection.
/// Saves replace the whole table.
pub trait MetadataStore: Send + Sync {
    /// All registered games in insertion order.
    fn load_games(&self) -> StoreResult<Vec<Game>>;
    /// Replace the games table.
    fn save_games(&self, games: &[Game]) -> StoreResult<()>;
    /// All checkpoints in insertion order.
    fn load_checkpoints(&self) -> StoreResult<Vec<Checkpoint>>;
    /// Replace the checkpoints table.
    fn save_checkpoints(&self, checkpoints: &[Checkpoint]) -> StoreResult<()>;
    /// Load the checkpoints table, apply `update` and save it back.
    ///
    /// No other load or save of the table may interleave with the three steps.
    fn update_checkpoints(
        &self,
        update: &mut dyn FnMut(&mut Vec<Checkpoint>),
    ) -> StoreResult<()>;
}

/// [`MetadataStore`] backed by pretty-printed JSON files.
///
/// Each table has its own lock so a save can never be observed half-applied
/// by a load in the same process, and an update holds it across its load
/// and save. Writes go to a sibling temp file that is
/// renamed over the table, which keeps the previous version intact if the
/// process dies mid-write.
pub struct JsonStore {
    root: PathBuf,
    games: RwLock<()>,
    checkpoints: RwLock<()>,
}

impl JsonStore {
    /// Create a store writing into `root`. The directory is created on first save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            games: RwLock::new(()),
            checkpoints: RwLock::new(()),
        }
    }

    /// Directory holding the table files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the games table.
    pub fn games_path(&self) -> PathBuf {
        self.root.join(GAMES_FILE)
    }

    /// Path of the checkpoints table.
    pub fn checkpoints_path(&self) -> PathBuf {
        self.root.join(CHECKPOINTS_FILE)
    }

    fn write_table<T: Serialize>(&self, path: &Path, records: &[T]) -> StoreResult<()> {
        let io_err = |source: io::Error| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        let serialized = serde_json::to_vec_pretty(records).map_err(StoreError::Serialize)?;

        fs::create_dir_all(&self.root).map_err(io_err)?;
        let mut temp = NamedTempFile::new_in(&self.root).map_err(io_err)?;
        temp.write_all(&serialized).map_err(io_err)?;
        temp.as_file().sync_all().map_err(io_err)?;
        temp.persist(path).map_err(|err| io_err(err.error))?;

        debug!(path = %path.display(), records = records.len(), "Metadata table written");
        Ok(())
    }
}

impl MetadataStore for JsonStore {
    fn load_games(&self) -> StoreResult<Vec<Game>> {
        let _guard = self.games.read();
        read_table(&self.games_path())
    }

    fn save_games(&self, games: &[Game]) -> StoreResult<()> {
        let _guard = self.games.write();
        self.write_table(&self.games_path(), games)
    }

    fn load_checkpoints(&self) -> StoreResult<Vec<Checkpoint>> {
        let _guard = self.checkpoints.read();
        read_table(&self.checkpoints_path())
    }

    fn save_checkpoints(&self, checkpoints: &[Checkpoint]) -> StoreResult<()> {
        let _guard = self.checkpoints.write();
        self.write_table(&self.checkpoints_path(), checkpoints)
    }

    fn update_checkpoints(
        &self,
        update: &mut dyn FnMut(&mut Vec<Checkpoint>),
    ) -> StoreResult<()> {
        let _guard = self.checkpoints.write();
        let path = self.checkpoints_path();
        let mut checkpoints = read_table(&path)?;
        update(&mut checkpoints);
        self.write_table(&path, &checkpoints)
    }
}

fn read_table<T: DeserializeOwned>(path: &Path) -> StoreResult<Vec<T>> {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_slice(&content).map_err(|source| StoreError::CorruptMetadata {
        path: path.to_path_buf(),
        source,
    })
}
