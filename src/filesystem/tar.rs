use crate::errors::ImageError;
use std::{
    fs,
    fs::{DirBuilder, File, OpenOptions, Permissions},
    io,
    io::{BufRead, BufReader, Read},
    os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt},
    path::{Component, Path, PathBuf},
};
use tar::{Archive, Entry, EntryType};

const MODE_MASK: u32 = 0o7777;
const DEFAULT_DIR_MODE: u32 = 0o755;
const OWNER_RWX: u32 = 0o700;

/// Extract an uncompressed tar file into an existing directory
pub fn extract_file(archive: &Path, target: &Path) -> Result<(), ImageError> {
    let file = File::open(archive).map_err(|e| ImageError::Extract(archive.to_path_buf(), e))?;
    log::debug!("extracting {:?} into {:?}", archive, target);
    extract(file, target)
}

/// Extract an uncompressed tar stream into an existing directory
///
/// Entries are written in stream order, and each file's content is fully
/// copied before the next entry is read. Parent directories are created as
/// needed even if the archive never mentions them. Directory permissions are
/// applied last, so read-only directories don't block their own contents.
///
/// Nothing is ever written outside `target`. Entries are refused with
/// [ImageError::UnsafeEntryPath] if they would reach through a symlink that
/// leads out of it, and an entry replaces whatever non-directory was already
/// at its path instead of following it.
///
/// There's no rollback: on the first failing entry, everything written so far
/// stays on disk.
pub fn extract<R: Read>(archive: R, target: &Path) -> Result<(), ImageError> {
    match fs::metadata(target) {
        Ok(metadata) if metadata.is_dir() => (),
        _ => return Err(ImageError::TargetMissing(target.to_path_buf())),
    }
    let root = fs::canonicalize(target).map_err(|e| ImageError::Extract(target.to_path_buf(), e))?;

    let mut reader = BufReader::new(archive);
    let magic = reader
        .fill_buf()
        .map_err(|e| ImageError::Extract(target.to_path_buf(), e))?;
    if let Some(format) = compressed_format(magic) {
        return Err(ImageError::UnsupportedFormat(format));
    }

    let mut archive = Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| ImageError::Extract(target.to_path_buf(), e))?;

    let mut directories = Vec::new();
    let mut count: usize = 0;
    for entry in entries {
        let entry = entry.map_err(|e| ImageError::Extract(target.to_path_buf(), e))?;
        if let Some(dir) = extract_entry(entry, target, &root)? {
            directories.push(dir);
        }
        count += 1;
    }

    // deepest first, in case a parent drops its own write permission
    for (path, mode) in directories.iter().rev() {
        fs::set_permissions(path, Permissions::from_mode(*mode))
            .map_err(|e| ImageError::Extract(path.clone(), e))?;
    }

    log::info!("extracted {} entries into {:?}", count, target);
    Ok(())
}

fn compressed_format(magic: &[u8]) -> Option<&'static str> {
    if magic.starts_with(&[0x1f, 0x8b]) {
        Some("gzip")
    } else if magic.starts_with(b"BZh") {
        Some("bzip2")
    } else if magic.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
        Some("xz")
    } else if magic.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
        Some("zstd")
    } else {
        None
    }
}

/// Map an entry name onto a path relative to the extraction target
///
/// Leading `/` and `.` components are dropped; `..` is refused outright.
fn relative_entry_path(name: &Path) -> Result<PathBuf, ImageError> {
    let mut result = PathBuf::new();
    for component in name.components() {
        match component {
            Component::Normal(part) => result.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => (),
            Component::ParentDir => return Err(ImageError::UnsafeEntryPath(name.to_path_buf())),
        }
    }
    Ok(result)
}

/// Make sure the nearest existing ancestor of `path` resolves to somewhere
/// under `root`
///
/// Anything below that ancestor doesn't exist yet, so it can't be a symlink.
fn check_contained(root: &Path, path: &Path, name: &Path) -> Result<(), ImageError> {
    let mut ancestor = path.parent();
    while let Some(dir) = ancestor {
        match fs::canonicalize(dir) {
            Ok(resolved) if resolved.starts_with(root) => return Ok(()),
            Ok(resolved) => {
                log::warn!("archive entry {:?} resolves to {:?}", name, resolved);
                return Err(ImageError::UnsafeEntryPath(name.to_path_buf()));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => ancestor = dir.parent(),
            Err(e) => return Err(ImageError::Extract(name.to_path_buf(), e)),
        }
    }
    Err(ImageError::UnsafeEntryPath(name.to_path_buf()))
}

fn create_parent_dirs(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) => DirBuilder::new()
            .recursive(true)
            .mode(DEFAULT_DIR_MODE)
            .create(parent),
        None => Ok(()),
    }
}

fn remove_existing(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if !metadata.is_dir() => fs::remove_file(path),
        _ => Ok(()),
    }
}

/// Write one entry, returning a directory whose mode still needs applying
fn extract_entry<R: Read>(
    mut entry: Entry<'_, R>,
    target: &Path,
    root: &Path,
) -> Result<Option<(PathBuf, u32)>, ImageError> {
    let name = entry
        .path()
        .map_err(|e| ImageError::Extract(target.to_path_buf(), e))?
        .into_owned();
    let relative = relative_entry_path(&name)?;
    if relative.as_os_str().is_empty() {
        log::trace!("skipping archive entry for the root itself, {:?}", name);
        return Ok(None);
    }

    let path = target.join(&relative);
    check_contained(root, &path, &name)?;
    let kind = entry.header().entry_type();
    let mode = entry
        .header()
        .mode()
        .map_err(|e| ImageError::Extract(name.clone(), e))?
        & MODE_MASK;
    let fail = |e: io::Error| ImageError::Extract(name.clone(), e);
    log::trace!("{:?} {:?} mode {:o}", kind, name, mode);

    match kind {
        EntryType::Directory => {
            remove_existing(&path).map_err(fail)?;
            // writable until the final mode is applied at the end
            DirBuilder::new()
                .recursive(true)
                .mode(mode | OWNER_RWX)
                .create(&path)
                .map_err(fail)?;
            Ok(Some((path, mode)))
        }
        EntryType::Regular | EntryType::Continuous => {
            create_parent_dirs(&path).map_err(fail)?;
            remove_existing(&path).map_err(fail)?;
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(mode)
                .open(&path)
                .map_err(fail)?;
            io::copy(&mut entry, &mut file).map_err(fail)?;
            file.set_permissions(Permissions::from_mode(mode))
                .map_err(fail)?;
            Ok(None)
        }
        EntryType::Symlink => {
            let link_name = entry
                .link_name()
                .map_err(fail)?
                .ok_or_else(|| fail(io::ErrorKind::InvalidData.into()))?;
            create_parent_dirs(&path).map_err(fail)?;
            remove_existing(&path).map_err(fail)?;
            std::os::unix::fs::symlink(&link_name, &path).map_err(fail)?;
            Ok(None)
        }
        EntryType::Link => {
            let link_name = entry
                .link_name()
                .map_err(fail)?
                .ok_or_else(|| fail(io::ErrorKind::InvalidData.into()))?;
            let original = target.join(relative_entry_path(&link_name)?);
            check_contained(root, &original, &link_name)?;
            create_parent_dirs(&path).map_err(fail)?;
            remove_existing(&path).map_err(fail)?;
            fs::hard_link(&original, &path).map_err(fail)?;
            Ok(None)
        }
        EntryType::XGlobalHeader => Ok(None),
        _ => {
            log::warn!(
                "skipping unsupported tar file entry type {:?}, {:?}",
                kind,
                name
            );
            Ok(None)
        }
    }
}
