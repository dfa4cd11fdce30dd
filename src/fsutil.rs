//! Filesystem primitives shared by the deployer, merger and image assembler.
//!
//! Everything that lands inside a JDK tree goes through the
//! write-to-temp-then-rename idiom so a concurrent reader of the target path
//! sees either the fully-old or fully-new content, never a partial write.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use walkdir::WalkDir;

/// Permission mask applied to directories inside an assembled JDK.
pub const JDK_DIR_MODE: u32 = 0o755;
/// Permission mask applied to regular files installed into a JDK.
pub const JDK_FILE_MODE: u32 = 0o644;

/// Recursively copy a directory, preserving symlinks.
///
/// Unlike `fs::copy`, this properly handles:
/// - Nested directories
/// - Symbolic links (preserved, not followed)
///
/// Used to clone a bootstrap JDK: following links there would duplicate
/// `jre/` payloads and break relative launcher links.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    if !dst.exists() {
        fs::create_dir_all(dst)
            .with_context(|| format!("Failed to create directory: {}", dst.display()))?;
    }

    for entry in fs::read_dir(src)
        .with_context(|| format!("Failed to read directory: {}", src.display()))?
    {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            let target = fs::read_link(&src_path)?;
            if dst_path.exists() || dst_path.is_symlink() {
                fs::remove_file(&dst_path)?;
            }
            #[cfg(unix)]
            std::os::unix::fs::symlink(&target, &dst_path)
                .with_context(|| format!("Failed to create symlink: {}", dst_path.display()))?;
            #[cfg(not(unix))]
            {
                let _ = target;
                fs::copy(&src_path, &dst_path)
                    .with_context(|| format!("Failed to copy link: {}", src_path.display()))?;
            }
        } else if file_type.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)
                .with_context(|| format!("Failed to copy file: {}", src_path.display()))?;
        }
    }

    Ok(())
}

/// Unique temp-file name within the destination directory.
pub fn tmp_name(prefix: &str) -> String {
    let n = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!(".{prefix}.tmp-{n}")
}

/// Atomically move a file by renaming, with fallback to copy+delete.
///
/// The fallback only triggers across filesystems (EXDEV); callers that need
/// true atomicity must place `src` in the same directory as `dst`.
pub fn atomic_move(src: &Path, dst: &Path) -> Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(src, dst)
                .with_context(|| format!("Failed to copy {} to {}", src.display(), dst.display()))?;
            fs::remove_file(src)
                .with_context(|| format!("Failed to remove {}", src.display()))?;
            Ok(())
        }
    }
}

/// Write `contents` to `path` through a temp file in the same directory,
/// then rename over the final name.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    let tmp = dir.join(tmp_name(name));
    {
        let mut f = fs::File::create(&tmp)
            .with_context(|| format!("Failed to create {}", tmp.display()))?;
        f.write_all(contents)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
    }
    atomic_move(&tmp, path)
}

/// Write `contents` to `path` only if it differs from what is already there.
///
/// Returns `true` when the file was created or changed. Repeated generation
/// of identical output leaves the file untouched, so mtime-based consumers
/// and version-control diffs stay quiet.
pub fn update_file(path: &Path, contents: &str) -> Result<bool> {
    if let Ok(existing) = fs::read(path) {
        if existing == contents.as_bytes() {
            return Ok(false);
        }
    }
    atomic_write(path, contents.as_bytes())?;
    Ok(true)
}

/// Set the permission bits of a single path. No-op on non-POSIX targets.
#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = fs::Permissions::from_mode(mode);
    fs::set_permissions(path, perms)
        .with_context(|| format!("Failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
pub fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// Normalize directory permissions under `root` to [`JDK_DIR_MODE`].
/// No-op on non-POSIX targets.
///
/// Files are left alone: launchers and shared libraries must keep their
/// execute bits, and installed artifacts get [`JDK_FILE_MODE`] at install
/// time.
pub fn normalize_permissions(root: &Path) -> Result<()> {
    if cfg!(not(unix)) {
        return Ok(());
    }
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if entry.path_is_symlink() {
            continue;
        }
        if entry.file_type().is_dir() {
            set_mode(entry.path(), JDK_DIR_MODE)?;
        }
    }
    Ok(())
}
