//! Physical storage of cached file attachments.
//!
//! Files live under one of three roots (Persistent, Temporary, External)
//! in numbered directories allocated from a shared persisted sequence,
//! which keeps per-directory fan-out bounded. Replacing a file is atomic
//! with rollback: at no observable point does the destination hold a
//! half-written file, and on failure the original is restored.

use crate::error::{invalid_state, CacheError, CacheResult};
use crate::info::FileInfo;
use crate::internal::SEQ_FILE_DIR;
use chrono::Utc;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use syncline_store::ObjectStore;
use syncline_types::FileLocation;
use tracing::{debug, warn};

const BACKUP_SUFFIX: &str = ".syncline-backup";
const MAX_FILE_NAME_LEN: usize = 120;

/// Maps logical file attachments to physical paths and moves bytes around.
#[derive(Clone)]
pub struct FileStorage {
    store: Arc<ObjectStore>,
    persistent_root: PathBuf,
    temporary_root: PathBuf,
    external_root: Option<PathBuf>,
}

impl FileStorage {
    pub(crate) fn new(
        store: Arc<ObjectStore>,
        persistent_root: PathBuf,
        temporary_root: PathBuf,
        external_root: Option<PathBuf>,
    ) -> Self {
        Self {
            store,
            persistent_root,
            temporary_root,
            external_root,
        }
    }

    fn root_for(&self, location: FileLocation) -> CacheResult<&Path> {
        match location {
            FileLocation::Persistent => Ok(&self.persistent_root),
            FileLocation::Temporary => Ok(&self.temporary_root),
            FileLocation::External => self
                .external_root
                .as_deref()
                .ok_or_else(|| CacheError::InvalidState("no external root configured".into())),
            FileLocation::Auto => invalid_state("Auto is not a physical location"),
        }
    }

    /// Resolves `Auto` against the info's current location.
    fn resolve_location(info: &FileInfo, requested: FileLocation) -> FileLocation {
        match requested {
            FileLocation::Auto => info.location.unwrap_or(FileLocation::Temporary),
            other => other,
        }
    }

    /// Full path of the info's stored file, if one is recorded.
    pub fn file_path(&self, info: &FileInfo) -> Option<PathBuf> {
        let location = info.location?;
        let dir = info.relative_dir.as_ref()?;
        let name = info.file_name.as_ref()?;
        let root = self.root_for(location).ok()?;
        Some(root.join(dir).join(name))
    }

    /// Stores `source` for `info`, updating its path, tag and dates.
    pub fn cache_file(
        &self,
        info: &mut FileInfo,
        source: &Path,
        cache_tag: Option<&str>,
        location: FileLocation,
        copy: bool,
    ) -> CacheResult<()> {
        let location = Self::resolve_location(info, location);
        self.store_file(info, source, location, copy)?;
        info.cache_tag = cache_tag.map(str::to_owned);
        let now = Utc::now();
        info.cache_date = Some(now);
        info.updated_at = Some(now);
        Ok(())
    }

    /// Core placement algorithm: pick the destination, then perform an
    /// atomic replace with rollback.
    pub fn store_file(
        &self,
        info: &mut FileInfo,
        source: &Path,
        location: FileLocation,
        copy: bool,
    ) -> CacheResult<()> {
        if location == FileLocation::External {
            // External files are referenced in place; record, never move.
            return self.record_external(info, source);
        }

        let old_path = self.file_path(info);
        let same_class = info.location == Some(location);
        let relative_dir = match (&info.relative_dir, same_class) {
            (Some(dir), true) => dir.clone(),
            _ => self.store.next_sequence(SEQ_FILE_DIR)?.to_string(),
        };
        let file_name = sanitize_file_name(
            source
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("file"),
        );
        let root = self.root_for(location)?;
        let dest_dir = root.join(&relative_dir);
        let dest = dest_dir.join(&file_name);

        if dest == source {
            // Storing a file onto itself is a no-op success.
            info.location = Some(location);
            info.relative_dir = Some(relative_dir);
            info.file_name = Some(file_name);
            return Ok(());
        }

        fs::create_dir_all(&dest_dir)?;

        // 1. Move any prior file out of the way so it can be restored.
        let backup = old_path.as_ref().and_then(|old| {
            if old.is_file() && old != source {
                Some(sibling_backup_path(old))
            } else {
                None
            }
        });
        if let (Some(old), Some(backup)) = (&old_path, &backup) {
            if backup.is_file() {
                fs::remove_file(backup)?;
            }
            fs::rename(old, backup)?;
        }

        let placed = self.place(source, &dest, copy);
        match placed {
            Ok(()) => {
                // 5. The prior file is no longer needed.
                if let Some(backup) = &backup {
                    if let Err(err) = fs::remove_file(backup) {
                        warn!(backup = %backup.display(), %err, "failed to drop replace backup");
                    }
                }
                // 6. Clean up the vacated location.
                if let Some(old) = &old_path {
                    if *old != dest {
                        if old.is_file() {
                            fs::remove_file(old)?;
                        }
                        if let Some(old_location) = info.location {
                            if let Ok(old_root) = self.root_for(old_location) {
                                prune_empty_dirs(old.parent(), old_root);
                            }
                        }
                    }
                }
                info.location = Some(location);
                info.relative_dir = Some(relative_dir);
                info.file_name = Some(file_name);
                debug!(dest = %dest.display(), "stored cached file");
                Ok(())
            }
            Err(err) => {
                // 4. Restore the original before surfacing the failure.
                if let (Some(old), Some(backup)) = (&old_path, &backup) {
                    if let Err(restore_err) = fs::rename(backup, old) {
                        warn!(
                            old = %old.display(),
                            %restore_err,
                            "failed to restore file after aborted replace"
                        );
                    }
                }
                Err(err)
            }
        }
    }

    /// Steps 2–3: clear the destination, then move (or copy) the source in,
    /// falling back to copy-then-delete when a plain move is refused.
    fn place(&self, source: &Path, dest: &Path, copy: bool) -> CacheResult<()> {
        if dest.is_file() {
            fs::remove_file(dest)?;
        }
        if copy {
            fs::copy(source, dest).map_err(|err| {
                remove_partial(dest);
                CacheError::Io(err)
            })?;
            return Ok(());
        }
        match fs::rename(source, dest) {
            Ok(()) => Ok(()),
            Err(rename_err) if rename_err.kind() != ErrorKind::NotFound => {
                // Cross-device or permission refusal: copy, then drop source.
                fs::copy(source, dest).map_err(|err| {
                    remove_partial(dest);
                    CacheError::Io(err)
                })?;
                fs::remove_file(source)?;
                Ok(())
            }
            Err(rename_err) => Err(CacheError::Io(rename_err)),
        }
    }

    fn record_external(&self, info: &mut FileInfo, source: &Path) -> CacheResult<()> {
        let root = self.root_for(FileLocation::External)?;
        let relative = source.strip_prefix(root).map_err(|_| {
            CacheError::InvalidState(format!(
                "external file {} is outside the external root",
                source.display()
            ))
        })?;
        let dir = relative
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = relative
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_owned();
        info.location = Some(FileLocation::External);
        info.relative_dir = Some(dir);
        info.file_name = Some(name);
        Ok(())
    }

    /// Renames the stored copy in place (same directory).
    pub fn rename_stored_file(&self, info: &mut FileInfo, new_name: &str) -> CacheResult<()> {
        let Some(old) = self.file_path(info) else {
            return invalid_state("no stored file to rename");
        };
        let new_name = sanitize_file_name(new_name);
        if info.file_name.as_deref() == Some(new_name.as_str()) {
            return Ok(());
        }
        let new_path = old.with_file_name(&new_name);
        fs::rename(&old, &new_path)?;
        info.file_name = Some(new_name);
        Ok(())
    }

    /// Relocates the stored file to a different storage class.
    pub fn set_location(&self, info: &mut FileInfo, location: FileLocation) -> CacheResult<()> {
        let location = Self::resolve_location(info, location);
        if info.location == Some(location) {
            return Ok(());
        }
        let Some(current) = self.file_path(info) else {
            return invalid_state("no stored file to relocate");
        };
        self.store_file(info, &current, location, false)?;
        info.updated_at = Some(Utc::now());
        Ok(())
    }

    /// Deletes the stored file if present; "already absent" is success,
    /// a held-open file is the distinct locked status.
    pub fn remove_stored_file(&self, info: &FileInfo) -> CacheResult<()> {
        let Some(path) = self.file_path(info) else {
            return Ok(());
        };
        if info.location == Some(FileLocation::External) {
            // Externally managed; never ours to delete.
            return Ok(());
        }
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) if err.kind() == ErrorKind::PermissionDenied => {
                return Err(CacheError::FileLocked(path));
            }
            Err(err) => return Err(CacheError::Io(err)),
        }
        if let Some(location) = info.location {
            if let Ok(root) = self.root_for(location) {
                prune_empty_dirs(path.parent(), root);
            }
        }
        Ok(())
    }
}

fn sibling_backup_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(BACKUP_SUFFIX);
    path.with_file_name(name)
}

fn remove_partial(dest: &Path) {
    if dest.is_file() {
        let _ = fs::remove_file(dest);
    }
}

/// Removes now-empty ancestor directories, stopping at the storage root.
fn prune_empty_dirs(mut dir: Option<&Path>, root: &Path) {
    while let Some(current) = dir {
        if current == root || !current.starts_with(root) {
            break;
        }
        match fs::remove_dir(current) {
            Ok(()) => dir = current.parent(),
            // Not empty, or already gone: stop climbing.
            Err(_) => break,
        }
    }
}

/// Makes a file name safe across platforms and bounds its length,
/// preserving the extension.
pub(crate) fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') {
                '_'
            } else {
                c
            }
        })
        .collect();
    let cleaned = cleaned.trim().trim_matches('.').to_owned();
    let cleaned = if cleaned.is_empty() {
        "file".to_owned()
    } else {
        cleaned
    };
    if cleaned.chars().count() <= MAX_FILE_NAME_LEN {
        return cleaned;
    }
    let (stem, ext) = match cleaned.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_owned(), format!(".{ext}")),
        _ => (cleaned.clone(), String::new()),
    };
    let keep = MAX_FILE_NAME_LEN.saturating_sub(ext.chars().count());
    let stem: String = stem.chars().take(keep).collect();
    format!("{stem}{ext}")
}

#[cfg(test)]
mod tests {
    use super::sanitize_file_name;

    #[test]
    fn sanitize_replaces_reserved_characters() {
        assert_eq!(sanitize_file_name("a/b\\c:d*e?f\"g<h>i|j"), "a_b_c_d_e_f_g_h_i_j");
    }

    #[test]
    fn sanitize_keeps_ordinary_names() {
        assert_eq!(sanitize_file_name("design v2.dgn"), "design v2.dgn");
    }

    #[test]
    fn sanitize_bounds_length_and_keeps_extension() {
        let long = format!("{}.dgn", "x".repeat(300));
        let out = sanitize_file_name(&long);
        assert!(out.chars().count() <= 120);
        assert!(out.ends_with(".dgn"));
    }

    #[test]
    fn sanitize_empty_falls_back() {
        assert_eq!(sanitize_file_name(""), "file");
        assert_eq!(sanitize_file_name("..."), "file");
    }
}
