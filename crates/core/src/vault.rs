//! Archive engine: compressed, hash-verified snapshots of directory trees.
//!
//! Archives are zstd-compressed tar streams stored beneath a vault root. The
//! engine knows nothing about games or checkpoints; callers hand it a source
//! directory and a relative key and get back an archive reference plus the
//! SHA-256 of the finished archive file.

use std::{
    cmp::Reverse,
    fs::{self, File},
    io::{self, BufReader, BufWriter, ErrorKind, Write},
    path::{Component, Path, PathBuf},
};

use sha2::{Digest, Sha256};
use tar::{Archive, Builder, EntryType, Header};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{ArchiveError, ArchiveResult};

/// File extension appended to every archive key.
pub const ARCHIVE_EXTENSION: &str = "tar.zst";

/// Default zstd compression level.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Location and digest of a freshly written archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArchive {
    /// Forward-slash path relative to the vault root.
    pub archive_ref: String,
    /// Lowercase hex SHA-256 of the archive bytes.
    pub content_hash: String,
}

/// Manages archive files beneath a single root directory.
#[derive(Debug, Clone)]
pub struct Vault {
    root: PathBuf,
    compression_level: i32,
}

impl Vault {
    /// Create a vault rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }

    /// Override the zstd compression level.
    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    /// Root directory holding all archives.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of the archive behind `archive_ref`.
    pub fn archive_path(&self, archive_ref: &str) -> ArchiveResult<PathBuf> {
        let relative = normalize_relative(Path::new(archive_ref)).ok_or_else(|| {
            ArchiveError::PathTraversal {
                entry: archive_ref.to_string(),
            }
        })?;
        Ok(self.root.join(relative))
    }

    /// Archive the contents of `source` under `key` (e.g. `game/checkpoint`).
    ///
    /// The root directory itself is not stored, only what it contains. On any
    /// failure the partially written archive is removed before returning.
    pub fn create_archive(&self, source: &Path, key: &str) -> ArchiveResult<StoredArchive> {
        if !source.is_dir() {
            return Err(ArchiveError::SourceNotFound(source.to_path_buf()));
        }

        let archive_ref = format!("{}.{ARCHIVE_EXTENSION}", key.trim_matches('/'));
        let path = self.archive_path(&archive_ref)?;

        let written = path
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|_| write_archive(source, &path, self.compression_level));
        if let Err(source) = written {
            discard_partial(&path);
            return Err(ArchiveError::Write { path, source });
        }

        let content_hash = match hash_file(&path) {
            Ok(hash) => hash,
            Err(source) => {
                discard_partial(&path);
                return Err(ArchiveError::Write { path, source });
            }
        };

        info!(
            archive = %archive_ref,
            source = %source.display(),
            hash = %content_hash,
            "Archive created"
        );
        Ok(StoredArchive {
            archive_ref,
            content_hash,
        })
    }

    /// Recompute the archive digest and compare it with `expected_hash`.
    pub fn verify_archive(&self, archive_ref: &str, expected_hash: &str) -> ArchiveResult<()> {
        let path = self.archive_path(archive_ref)?;
        let actual = hash_file(&path).map_err(|source| ArchiveError::Read {
            path: path.clone(),
            source,
        })?;
        let expected = expected_hash.trim().to_ascii_lowercase();

        if !digests_match(&expected, &actual) {
            return Err(ArchiveError::HashMismatch { expected, actual });
        }
        Ok(())
    }

    /// Replace the contents of `target` with the archive behind `archive_ref`.
    ///
    /// Anything already at `target` is removed first. Extraction is not
    /// transactional: a failure part-way leaves `target` partially restored.
    pub fn restore_archive(&self, archive_ref: &str, target: &Path) -> ArchiveResult<()> {
        let path = self.archive_path(archive_ref)?;
        if !path.is_file() {
            return Err(ArchiveError::NotFound(path));
        }

        reset_directory(target).map_err(|source| ArchiveError::Write {
            path: target.to_path_buf(),
            source,
        })?;

        let file = File::open(&path).map_err(|source| ArchiveError::Read {
            path: path.clone(),
            source,
        })?;
        let read_err = |source: io::Error| ArchiveError::Read {
            path: path.clone(),
            source,
        };
        let decoder = zstd::Decoder::new(BufReader::new(file)).map_err(read_err)?;
        let mut archive = Archive::new(decoder);

        let mut directories = Vec::new();
        let mut restored = 0usize;
        for entry in archive.entries().map_err(read_err)? {
            let mut entry = entry.map_err(read_err)?;
            let name = entry.path().map_err(read_err)?.into_owned();
            let relative = normalize_relative(&name).ok_or_else(|| ArchiveError::PathTraversal {
                entry: name.to_string_lossy().into_owned(),
            })?;
            let destination = target.join(&relative);

            let entry_type = entry.header().entry_type();
            if !matches!(entry_type, EntryType::Regular | EntryType::Directory) {
                warn!(entry = %name.display(), ?entry_type, "Skipping unsupported archive entry");
                continue;
            }

            let write_err = |source: io::Error| ArchiveError::Write {
                path: destination.clone(),
                source,
            };
            if entry_type == EntryType::Directory {
                fs::create_dir_all(&destination).map_err(write_err)?;
                let mode = entry.header().mode().map_err(read_err)?;
                directories.push((destination, mode));
            } else {
                if let Some(parent) = destination.parent() {
                    fs::create_dir_all(parent).map_err(write_err)?;
                }
                entry.unpack(&destination).map_err(write_err)?;
            }
            restored += 1;
        }

        // Directory modes go on last and deepest first, so a read-only
        // directory never blocks writing its own contents.
        directories.sort_by_key(|(dir, _)| Reverse(dir.components().count()));
        for (dir, mode) in &directories {
            set_directory_mode(dir, *mode).map_err(|source| ArchiveError::Write {
                path: dir.clone(),
                source,
            })?;
        }

        info!(
            archive = %archive_ref,
            target = %target.display(),
            entries = restored,
            "Archive restored"
        );
        Ok(())
    }

    /// Remove the archive file behind `archive_ref`.
    pub fn delete_archive(&self, archive_ref: &str) -> ArchiveResult<()> {
        let path = self.archive_path(archive_ref)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(archive = %archive_ref, "Archive deleted");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Err(ArchiveError::NotFound(path)),
            Err(source) => Err(ArchiveError::Delete { path, source }),
        }
    }
}

fn write_archive(source: &Path, destination: &Path, level: i32) -> io::Result<()> {
    let file = File::create(destination)?;
    let encoder = zstd::Encoder::new(BufWriter::new(file), level)?;
    let mut builder = Builder::new(encoder);
    builder.follow_symlinks(false);

    for entry in WalkDir::new(source)
        .min_depth(1)
        .sort_by_file_name()
        .follow_links(false)
    {
        let entry = entry?;
        let path = entry.path();
        let relative = path
            .strip_prefix(source)
            .map_err(|err| io::Error::new(ErrorKind::InvalidInput, err))?;
        let name = portable_name(relative)?;
        let metadata = entry.metadata()?;

        let mut header = Header::new_gnu();
        header.set_metadata(&metadata);
        if metadata.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            builder.append_data(&mut header, &name, io::empty())?;
        } else if metadata.is_file() {
            header.set_entry_type(EntryType::Regular);
            let file = File::open(path)?;
            builder.append_data(&mut header, &name, file)?;
        } else {
            debug!(path = %path.display(), "Skipping non-regular file during archive");
        }
    }

    let encoder = builder.into_inner()?;
    let mut writer = encoder.finish()?;
    writer.flush()?;
    writer.get_ref().sync_all()
}

/// Relative path with `/` separators regardless of platform.
fn portable_name(relative: &Path) -> io::Result<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str().ok_or_else(|| {
                io::Error::new(
                    ErrorKind::InvalidData,
                    format!("non UTF-8 path {}", relative.display()),
                )
            })?),
            other => {
                return Err(io::Error::new(
                    ErrorKind::InvalidInput,
                    format!("unexpected path component {other:?}"),
                ))
            }
        }
    }
    Ok(parts.join("/"))
}

/// Lexically normalise a relative path, refusing anything that leaves its root.
///
/// Returns `None` for absolute paths, paths climbing above the root and paths
/// that resolve to the root itself.
fn normalize_relative(path: &Path) -> Option<PathBuf> {
    let mut normalized = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Normal(part) => {
                normalized.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                normalized.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (depth > 0).then_some(normalized)
}

fn reset_directory(target: &Path) -> io::Result<()> {
    match fs::symlink_metadata(target) {
        Ok(meta) if meta.is_dir() => {
            unlock_directories(target)?;
            fs::remove_dir_all(target)?
        }
        Ok(_) => fs::remove_file(target)?,
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    fs::create_dir_all(target)
}

/// Give the owner full access to every directory under `root` so it can be removed.
#[cfg(unix)]
fn unlock_directories(root: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mode = fs::symlink_metadata(&dir)?.permissions().mode();
        if mode & 0o700 != 0o700 {
            fs::set_permissions(&dir, fs::Permissions::from_mode(mode | 0o700))?;
        }
        for child in fs::read_dir(&dir)? {
            let child = child?;
            if child.file_type()?.is_dir() {
                pending.push(child.path());
            }
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn unlock_directories(_root: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn set_directory_mode(dir: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(dir, fs::Permissions::from_mode(mode & 0o777))
}

#[cfg(not(unix))]
fn set_directory_mode(_dir: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

fn hash_file(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Compare every byte rather than stopping at the first difference.
fn digests_match(expected: &str, actual: &str) -> bool {
    if expected.len() != actual.len() {
        return false;
    }
    expected
        .bytes()
        .zip(actual.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

fn discard_partial(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), %err, "Failed to remove partial archive");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    fn populate(root: &Path) -> Result<()> {
        fs::create_dir_all(root.join("profiles/slot1"))?;
        fs::create_dir_all(root.join("empty"))?;
        fs::write(root.join("settings.ini"), b"difficulty=hard\n")?;
        fs::write(root.join("profiles/slot1/save.dat"), vec![7u8; 4096])?;
        Ok(())
    }

    /// Build an archive from raw `(name, type, payload)` entries, bypassing
    /// the name checks in `tar::Builder`. For symlinks the payload is the
    /// link target.
    fn write_raw_archive(path: &Path, entries: &[(&str, EntryType, &str)]) -> Result<()> {
        let file = File::create(path)?;
        let encoder = zstd::Encoder::new(file, DEFAULT_COMPRESSION_LEVEL)?;
        let mut builder = Builder::new(encoder);
        for &(name, entry_type, payload) in entries {
            let mut header = Header::new_gnu();
            header.as_old_mut().name[..name.len()].copy_from_slice(name.as_bytes());
            header.set_entry_type(entry_type);
            header.set_mode(0o644);
            let body = if entry_type == EntryType::Symlink {
                header.as_old_mut().linkname[..payload.len()].copy_from_slice(payload.as_bytes());
                ""
            } else {
                payload
            };
            header.set_size(body.len() as u64);
            header.set_cksum();
            builder.append(&header, body.as_bytes())?;
        }
        builder.into_inner()?.finish()?;
        Ok(())
    }

    #[test]
    fn archive_round_trip_restores_tree() -> Result<()> {
        let temp = tempdir()?;
        let source = temp.path().join("saves");
        populate(&source)?;
        let vault = Vault::new(temp.path().join("vault"));

        let stored = vault.create_archive(&source, "sample/first")?;
        assert_eq!(stored.archive_ref, "sample/first.tar.zst");
        assert_eq!(stored.content_hash.len(), 64);
        assert!(vault.archive_path(&stored.archive_ref)?.is_file());

        let target = temp.path().join("restored");
        vault.restore_archive(&stored.archive_ref, &target)?;
        assert_eq!(
            fs::read(target.join("settings.ini"))?,
            fs::read(source.join("settings.ini"))?
        );
        assert_eq!(
            fs::read(target.join("profiles/slot1/save.dat"))?,
            vec![7u8; 4096]
        );
        assert!(target.join("empty").is_dir());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn restore_preserves_permissions() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempdir()?;
        let source = temp.path().join("saves");
        fs::create_dir_all(&source)?;
        let script = source.join("launch.sh");
        fs::write(&script, b"#!/bin/sh\n")?;
        fs::set_permissions(&script, fs::Permissions::from_mode(0o750))?;
        let vault = Vault::new(temp.path().join("vault"));

        let stored = vault.create_archive(&source, "sample/perm")?;
        let target = temp.path().join("restored");
        vault.restore_archive(&stored.archive_ref, &target)?;

        let mode = fs::metadata(target.join("launch.sh"))?.permissions().mode();
        assert_eq!(mode & 0o777, 0o750);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn restore_handles_read_only_directories() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempdir()?;
        let source = temp.path().join("saves");
        fs::create_dir_all(source.join("locked/inner"))?;
        fs::write(source.join("locked/slot.sav"), b"chapter 3")?;
        fs::write(source.join("locked/inner/deep.sav"), b"chapter 4")?;
        fs::set_permissions(source.join("locked/inner"), fs::Permissions::from_mode(0o555))?;
        fs::set_permissions(source.join("locked"), fs::Permissions::from_mode(0o555))?;
        let vault = Vault::new(temp.path().join("vault"));
        let stored = vault.create_archive(&source, "sample/locked")?;

        let target = temp.path().join("restored");
        vault.restore_archive(&stored.archive_ref, &target)?;
        // A second restore has to clear the read-only tree left by the first.
        vault.restore_archive(&stored.archive_ref, &target)?;

        assert_eq!(fs::read(target.join("locked/slot.sav"))?, b"chapter 3");
        assert_eq!(fs::read(target.join("locked/inner/deep.sav"))?, b"chapter 4");
        for dir in ["locked", "locked/inner"] {
            let mode = fs::metadata(target.join(dir))?.permissions().mode();
            assert_eq!(mode & 0o777, 0o555, "{dir}");
        }

        for root in [&source, &target] {
            fs::set_permissions(root.join("locked"), fs::Permissions::from_mode(0o755))?;
            fs::set_permissions(root.join("locked/inner"), fs::Permissions::from_mode(0o755))?;
        }
        Ok(())
    }

    #[test]
    fn restore_replaces_existing_contents() -> Result<()> {
        let temp = tempdir()?;
        let source = temp.path().join("saves");
        populate(&source)?;
        let vault = Vault::new(temp.path().join("vault"));
        let stored = vault.create_archive(&source, "sample/replace")?;

        fs::write(source.join("stale.tmp"), b"later")?;
        fs::remove_file(source.join("settings.ini"))?;
        vault.restore_archive(&stored.archive_ref, &source)?;

        assert!(!source.join("stale.tmp").exists());
        assert!(source.join("settings.ini").is_file());
        Ok(())
    }

    #[test]
    fn verify_detects_single_byte_corruption() -> Result<()> {
        let temp = tempdir()?;
        let source = temp.path().join("saves");
        populate(&source)?;
        let vault = Vault::new(temp.path().join("vault"));
        let stored = vault.create_archive(&source, "sample/verify")?;

        vault.verify_archive(&stored.archive_ref, &stored.content_hash)?;
        vault.verify_archive(&stored.archive_ref, &stored.content_hash.to_uppercase())?;

        let path = vault.archive_path(&stored.archive_ref)?;
        let mut bytes = fs::read(&path)?;
        let middle = bytes.len() / 2;
        bytes[middle] ^= 0x01;
        fs::write(&path, bytes)?;

        let err = vault
            .verify_archive(&stored.archive_ref, &stored.content_hash)
            .unwrap_err();
        assert!(matches!(err, ArchiveError::HashMismatch { .. }));
        Ok(())
    }

    #[test]
    fn verify_missing_archive_is_read_error() -> Result<()> {
        let temp = tempdir()?;
        let vault = Vault::new(temp.path());
        let err = vault.verify_archive("nope/missing.tar.zst", "00").unwrap_err();
        assert!(matches!(err, ArchiveError::Read { .. }));
        Ok(())
    }

    #[test]
    fn create_requires_existing_source() -> Result<()> {
        let temp = tempdir()?;
        let vault = Vault::new(temp.path().join("vault"));
        let err = vault
            .create_archive(&temp.path().join("missing"), "sample/none")
            .unwrap_err();
        assert!(matches!(err, ArchiveError::SourceNotFound(_)));
        assert!(!temp.path().join("vault/sample/none.tar.zst").exists());
        Ok(())
    }

    #[test]
    fn create_rejects_escaping_keys() -> Result<()> {
        let temp = tempdir()?;
        let source = temp.path().join("saves");
        populate(&source)?;
        let vault = Vault::new(temp.path().join("vault"));
        let err = vault.create_archive(&source, "../outside").unwrap_err();
        assert!(matches!(err, ArchiveError::PathTraversal { .. }));
        assert!(!temp.path().join("outside.tar.zst").exists());
        Ok(())
    }

    #[test]
    fn restore_rejects_parent_traversal_entries() -> Result<()> {
        let temp = tempdir()?;
        let vault = Vault::new(temp.path().join("vault"));
        fs::create_dir_all(vault.root().join("evil"))?;
        write_raw_archive(
            &vault.root().join("evil/slip.tar.zst"),
            &[("../escaped.txt", EntryType::Regular, "owned")],
        )?;

        let target = temp.path().join("target");
        let err = vault
            .restore_archive("evil/slip.tar.zst", &target)
            .unwrap_err();
        assert!(matches!(err, ArchiveError::PathTraversal { .. }));
        assert!(!temp.path().join("escaped.txt").exists());
        assert!(target.is_dir());
        Ok(())
    }

    #[test]
    fn restore_skips_symlink_entries() -> Result<()> {
        let temp = tempdir()?;
        let vault = Vault::new(temp.path().join("vault"));
        fs::create_dir_all(vault.root().join("odd"))?;
        write_raw_archive(
            &vault.root().join("odd/links.tar.zst"),
            &[
                ("shortcut", EntryType::Symlink, "/etc/passwd"),
                ("slot.sav", EntryType::Regular, "kept"),
            ],
        )?;

        let target = temp.path().join("target");
        vault.restore_archive("odd/links.tar.zst", &target)?;
        assert!(fs::symlink_metadata(target.join("shortcut")).is_err());
        assert_eq!(fs::read(target.join("slot.sav"))?, b"kept");
        Ok(())
    }

    #[test]
    fn restore_missing_archive_is_not_found() -> Result<()> {
        let temp = tempdir()?;
        let vault = Vault::new(temp.path().join("vault"));
        let target = temp.path().join("target");
        fs::create_dir_all(&target)?;
        fs::write(target.join("keep.txt"), b"untouched")?;

        let err = vault
            .restore_archive("sample/missing.tar.zst", &target)
            .unwrap_err();
        assert!(matches!(err, ArchiveError::NotFound(_)));
        assert!(target.join("keep.txt").is_file());
        Ok(())
    }

    #[test]
    fn delete_removes_archive_once() -> Result<()> {
        let temp = tempdir()?;
        let source = temp.path().join("saves");
        populate(&source)?;
        let vault = Vault::new(temp.path().join("vault"));
        let stored = vault.create_archive(&source, "sample/gone")?;

        vault.delete_archive(&stored.archive_ref)?;
        assert!(!vault.archive_path(&stored.archive_ref)?.exists());
        assert!(matches!(
            vault.delete_archive(&stored.archive_ref),
            Err(ArchiveError::NotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn normalize_relative_keeps_paths_inside_root() {
        assert_eq!(
            normalize_relative(Path::new("a/./b/../c")),
            Some(PathBuf::from("a/c"))
        );
        assert_eq!(normalize_relative(Path::new("../x")), None);
        assert_eq!(normalize_relative(Path::new("a/../../x")), None);
        assert_eq!(normalize_relative(Path::new("/etc/passwd")), None);
        assert_eq!(normalize_relative(Path::new("a/..")), None);
    }
}
