//! Game and checkpoint orchestration on top of the vault and metadata store.

use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    error::{ServiceError, ServiceResult},
    models::{Checkpoint, Game},
    store::{JsonStore, MetadataStore},
    vault::Vault,
};

/// Entry point used by front-ends to manage games and their checkpoints.
///
/// The service keeps the metadata tables and the vault consistent: a failed
/// checkpoint never leaves an archive without a record behind. Changes to the
/// checkpoint table are applied atomically by the store, so checkpoints may be
/// created from several threads at once. Operations are not serialised per
/// game; callers must avoid racing a checkpoint against a restore or delete
/// for the same game.
pub struct CheckpointService<S = JsonStore> {
    store: S,
    vault: Vault,
}

impl CheckpointService<JsonStore> {
    /// Wire a JSON-backed service from configuration.
    pub fn open(config: &AppConfig) -> Self {
        Self::new(
            JsonStore::new(&config.metadata_dir),
            Vault::new(&config.vault_dir).with_compression_level(config.compression_level),
        )
    }
}

impl<S: MetadataStore> CheckpointService<S> {
    /// Compose a service from an explicit store and vault.
    pub fn new(store: S, vault: Vault) -> Self {
        Self { store, vault }
    }

    /// Underlying archive vault.
    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    /// Register a game whose saves live in `save_path`.
    pub fn add_game(&self, name: &str, save_path: &str) -> ServiceResult<Game> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ServiceError::EmptyGameName);
        }
        if save_path.trim().is_empty() {
            return Err(ServiceError::EmptySavePath);
        }

        let mut games = self
            .store
            .load_games()
            .map_err(ServiceError::store("load games"))?;

        let game = Game::new(name, clean_path(save_path.trim()));
        game.validate()?;

        let lowered = name.to_lowercase();
        if games
            .iter()
            .any(|existing| existing.name.to_lowercase() == lowered || existing.id == game.id)
        {
            return Err(ServiceError::GameAlreadyExists(name.to_string()));
        }

        games.push(game.clone());
        self.store
            .save_games(&games)
            .map_err(ServiceError::store("save games"))?;

        info!(game_id = %game.id, name = %game.name, path = %game.save_path.display(), "Game registered");
        Ok(game)
    }

    /// Find a game by exact id, then exact name ignoring case, then id substring.
    ///
    /// A substring hit picks the first match in table order.
    pub fn resolve_game(&self, identifier: &str) -> ServiceResult<Game> {
        let mut games = self
            .store
            .load_games()
            .map_err(ServiceError::store("load games"))?;

        let needle = identifier.trim().to_lowercase();
        if needle.is_empty() {
            return Err(ServiceError::GameNotFound(identifier.to_string()));
        }

        let found = games
            .iter()
            .position(|game| game.id == identifier)
            .or_else(|| {
                games
                    .iter()
                    .position(|game| game.name.to_lowercase() == needle)
            })
            .or_else(|| {
                games
                    .iter()
                    .position(|game| game.id.to_lowercase().contains(&needle))
            });

        match found {
            Some(index) => Ok(games.swap_remove(index)),
            None => Err(ServiceError::GameNotFound(identifier.to_string())),
        }
    }

    /// All registered games in registration order.
    pub fn list_games(&self) -> ServiceResult<Vec<Game>> {
        self.store
            .load_games()
            .map_err(ServiceError::store("load games"))
    }

    /// Snapshot the save directory of a game.
    pub fn create_checkpoint(
        &self,
        game_identifier: &str,
        name: &str,
        note: &str,
    ) -> ServiceResult<Checkpoint> {
        let game = self.resolve_game(game_identifier)?;
        let checkpoint_id = Uuid::new_v4().to_string();

        let stored = self
            .vault
            .create_archive(&game.save_path, &format!("{}/{}", game.id, checkpoint_id))
            .map_err(ServiceError::archive("create checkpoint archive"))?;

        let checkpoint = Checkpoint {
            id: checkpoint_id,
            game_id: game.id.clone(),
            name: name.trim().to_string(),
            note: note.to_string(),
            archive_ref: stored.archive_ref,
            content_hash: stored.content_hash,
            created_at: Utc::now(),
        };

        if let Err(err) = self.append_checkpoint(&checkpoint) {
            self.discard_archive(&checkpoint.archive_ref);
            return Err(err);
        }

        info!(
            game_id = %game.id,
            checkpoint_id = %checkpoint.id,
            name = %checkpoint.name,
            "Checkpoint created"
        );
        Ok(checkpoint)
    }

    /// Checkpoints belonging to a game, in creation order.
    pub fn list_checkpoints(&self, game_identifier: &str) -> ServiceResult<Vec<Checkpoint>> {
        let game = self.resolve_game(game_identifier)?;
        let checkpoints = self
            .store
            .load_checkpoints()
            .map_err(ServiceError::store("load checkpoints"))?;

        Ok(checkpoints
            .into_iter()
            .filter(|checkpoint| checkpoint.game_id == game.id)
            .collect())
    }

    /// Look up a checkpoint by full id, falling back to the first id with that prefix.
    pub fn get_checkpoint(&self, id_or_prefix: &str) -> ServiceResult<Checkpoint> {
        let mut checkpoints = self
            .store
            .load_checkpoints()
            .map_err(ServiceError::store("load checkpoints"))?;

        let needle = id_or_prefix.trim();
        if needle.is_empty() {
            return Err(ServiceError::CheckpointNotFound(id_or_prefix.to_string()));
        }

        let found = checkpoints
            .iter()
            .position(|checkpoint| checkpoint.id == needle)
            .or_else(|| {
                checkpoints
                    .iter()
                    .position(|checkpoint| checkpoint.id.starts_with(needle))
            });

        match found {
            Some(index) => Ok(checkpoints.swap_remove(index)),
            None => Err(ServiceError::CheckpointNotFound(id_or_prefix.to_string())),
        }
    }

    /// Verify a checkpoint's archive and extract it over the game's save directory.
    ///
    /// The save directory is replaced wholesale. A corrupted archive is never
    /// extracted.
    pub fn restore_checkpoint(&self, id_or_prefix: &str) -> ServiceResult<Checkpoint> {
        let checkpoint = self.get_checkpoint(id_or_prefix)?;
        let game = self.owning_game(&checkpoint)?;

        self.vault
            .verify_archive(&checkpoint.archive_ref, &checkpoint.content_hash)
            .map_err(|source| ServiceError::VerificationFailed {
                checkpoint_id: checkpoint.id.clone(),
                source,
            })?;

        self.vault
            .restore_archive(&checkpoint.archive_ref, &game.save_path)
            .map_err(ServiceError::archive("restore checkpoint"))?;

        info!(
            game_id = %game.id,
            checkpoint_id = %checkpoint.id,
            target = %game.save_path.display(),
            "Checkpoint restored"
        );
        Ok(checkpoint)
    }

    /// Remove a checkpoint record and then its archive.
    ///
    /// The record removal is authoritative. If the archive cannot be deleted
    /// afterwards the warning-level [`ServiceError::ArchiveCleanup`] is returned
    /// and the record stays removed.
    pub fn delete_checkpoint(&self, id_or_prefix: &str) -> ServiceResult<Checkpoint> {
        let checkpoint = self.get_checkpoint(id_or_prefix)?;

        self.store
            .update_checkpoints(&mut |table| {
                table.retain(|existing| existing.id != checkpoint.id)
            })
            .map_err(ServiceError::store("remove checkpoint"))?;

        if let Err(source) = self.vault.delete_archive(&checkpoint.archive_ref) {
            warn!(checkpoint_id = %checkpoint.id, error = %source, "Checkpoint archive not deleted");
            return Err(ServiceError::ArchiveCleanup {
                checkpoint_id: checkpoint.id,
                source,
            });
        }

        info!(game_id = %checkpoint.game_id, checkpoint_id = %checkpoint.id, "Checkpoint deleted");
        Ok(checkpoint)
    }

    fn append_checkpoint(&self, checkpoint: &Checkpoint) -> ServiceResult<()> {
        checkpoint.validate()?;
        self.store
            .update_checkpoints(&mut |table| table.push(checkpoint.clone()))
            .map_err(ServiceError::store("append checkpoint"))
    }

    /// The owning game by exact id; fuzzy matching could pick the wrong save directory.
    fn owning_game(&self, checkpoint: &Checkpoint) -> ServiceResult<Game> {
        self.store
            .load_games()
            .map_err(ServiceError::store("load games"))?
            .into_iter()
            .find(|game| game.id == checkpoint.game_id)
            .ok_or_else(|| ServiceError::GameNotFound(checkpoint.game_id.clone()))
    }

    fn discard_archive(&self, archive_ref: &str) {
        match self.vault.delete_archive(archive_ref) {
            Ok(()) => info!(archive = %archive_ref, "Rolled back checkpoint archive"),
            Err(err) => warn!(archive = %archive_ref, error = %err, "Failed to roll back checkpoint archive"),
        }
    }
}

/// Lexically tidy a user-supplied path: drop `.` segments and fold `..` where possible.
fn clean_path(raw: &str) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in Path::new(raw).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let can_pop = matches!(
                    cleaned.components().next_back(),
                    Some(Component::Normal(_))
                );
                if can_pop {
                    cleaned.pop();
                } else if !cleaned.has_root() {
                    cleaned.push(component);
                }
            }
            other => cleaned.push(other),
        }
    }
    if cleaned.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        cleaned
    }
}
