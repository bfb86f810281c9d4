#![warn(clippy::all, missing_docs)]

//! Core domain logic for GameKeep.
//!
//! This crate hosts the data models, configuration handling, the archive
//! vault, the metadata store and the checkpoint service used by the CLI and
//! any future frontends.

pub mod config;
pub mod error;
pub mod models;
pub mod service;
pub mod store;
pub mod vault;

pub use crate::config::AppConfig;
pub use crate::error::{ArchiveError, ServiceError, StoreError};
pub use crate::models::{Checkpoint, Game};
pub use crate::service::CheckpointService;
pub use crate::store::{JsonStore, MetadataStore};
pub use crate::vault::{StoredArchive, Vault};
