//! Archiving assembled JDK images, split by build type and VM flavor.
//!
//! For every build type whose image exists, two kinds of archive are
//! produced: a base-JDK archive excluding the per-VM subdirectories, and
//! one archive per VM flavor subtree. Each archive embeds an
//! `export-info.json` manifest and gets a `.sha256` sidecar. Archive
//! entries are sorted and carry zeroed timestamps so re-exporting an
//! unchanged image produces identical bytes.

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use walkdir::WalkDir;

use crate::variant::{VmBuild, VM_CHOICES};

/// Manifest embedded into every export archive.
#[derive(Debug, Serialize)]
pub struct ExportInfo {
    pub timestamp: i64,
    pub platform: &'static str,
    pub architecture: &'static str,
    pub revision: String,
    pub vmbuild: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm: Option<String>,
}

/// Archive every existing image under `images_root` into `out_dir`.
///
/// Returns the paths of the archives written. Build types without an image
/// are skipped with a log line.
pub fn export_images(images_root: &Path, out_dir: &Path, revision: &str) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;
    let mut written = vec![];

    for build in VmBuild::ALL {
        let jdk_dir = images_root.join(build.as_str());
        if !jdk_dir.is_dir() {
            println!("skipping {build}: no image");
            continue;
        }

        let vm_dirs = find_vm_dirs(&jdk_dir)?;

        let base_name = format!("jvmcijdk_basejdk_{os}_{arch}_{build}.tar.zst");
        let base_path = out_dir.join(&base_name);
        println!("creating basejdk {}", base_path.display());
        let info = ExportInfo {
            timestamp: OffsetDateTime::now_utc().unix_timestamp(),
            platform: os,
            architecture: arch,
            revision: revision.to_string(),
            vmbuild: build.to_string(),
            vm: None,
        };
        archive_tree(&jdk_dir, &base_path, &vm_dirs, &info)?;
        write_checksum(&base_path)?;
        written.push(base_path);

        for vm_dir in &vm_dirs {
            let vm = vm_dir
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("vm")
                .to_string();
            let vm_name = format!("jvmcijdk_vm_{os}_{arch}_{build}_{vm}.tar.zst");
            let vm_path = out_dir.join(&vm_name);
            println!("creating vm {}", vm_path.display());
            let info = ExportInfo {
                timestamp: OffsetDateTime::now_utc().unix_timestamp(),
                platform: os,
                architecture: arch,
                revision: revision.to_string(),
                vmbuild: build.to_string(),
                vm: Some(vm.clone()),
            };
            archive_tree(vm_dir, &vm_path, &BTreeSet::new(), &info)?;
            write_checksum(&vm_path)?;
            written.push(vm_path);
        }
    }

    Ok(written)
}

/// Directories within the image holding a single VM flavor's artifacts
/// (their basename is a known VM choice).
fn find_vm_dirs(jdk_dir: &Path) -> Result<BTreeSet<PathBuf>> {
    let mut out = BTreeSet::new();
    for entry in WalkDir::new(jdk_dir).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {}", jdk_dir.display()))?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if VM_CHOICES.contains(&name.as_ref()) {
            out.insert(entry.path().to_path_buf());
        }
    }
    Ok(out)
}

/// Create a deterministic `.tar.zst` of `src_dir`, skipping anything under
/// `exclude_dirs`, with `info` embedded as `export-info.json`.
fn archive_tree(
    src_dir: &Path,
    out_path: &Path,
    exclude_dirs: &BTreeSet<PathBuf>,
    info: &ExportInfo,
) -> Result<()> {
    let out = File::create(out_path)
        .with_context(|| format!("Failed to create {}", out_path.display()))?;
    let encoder = zstd::stream::Encoder::new(out, 3)?;
    let mut builder = tar::Builder::new(encoder);

    let mut entries: Vec<PathBuf> = vec![];
    for entry in WalkDir::new(src_dir).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {}", src_dir.display()))?;
        let path = entry.path();
        if path == src_dir {
            continue;
        }
        if exclude_dirs
            .iter()
            .any(|excluded| path.starts_with(excluded))
        {
            continue;
        }
        entries.push(path.to_path_buf());
    }
    entries.sort_by(|a, b| {
        let ra = a.strip_prefix(src_dir).unwrap_or(a).to_string_lossy().into_owned();
        let rb = b.strip_prefix(src_dir).unwrap_or(b).to_string_lossy().into_owned();
        ra.cmp(&rb)
    });

    let manifest = serde_json::to_vec_pretty(info)?;
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(manifest.len() as u64);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, "export-info.json", manifest.as_slice())?;

    for path in entries {
        let rel = path
            .strip_prefix(src_dir)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");
        let md = fs::symlink_metadata(&path)?;

        let mut header = tar::Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);

        if md.is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            header.set_mode(entry_mode(&md, 0o755));
            header.set_cksum();
            builder.append_data(&mut header, rel, std::io::empty())?;
        } else if md.file_type().is_symlink() {
            let target = fs::read_link(&path)?;
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            header.set_mode(entry_mode(&md, 0o777));
            header.set_link_name(target.to_string_lossy().as_ref())?;
            header.set_cksum();
            builder.append_data(&mut header, rel, std::io::empty())?;
        } else if md.is_file() {
            let mut f = File::open(&path)?;
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(md.len());
            header.set_mode(entry_mode(&md, 0o644));
            header.set_cksum();
            builder.append_data(&mut header, rel, &mut f)?;
        }
    }

    let encoder = builder
        .into_inner()
        .with_context(|| "Failed to finalize tar builder")?;
    encoder.finish()?;
    Ok(())
}

#[cfg(unix)]
fn entry_mode(md: &fs::Metadata, _default: u32) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    md.permissions().mode()
}

#[cfg(not(unix))]
fn entry_mode(_md: &fs::Metadata, default: u32) -> u32 {
    default
}

/// Write `<archive>.sha256` next to the archive.
fn write_checksum(archive: &Path) -> Result<PathBuf> {
    let (sha, _size) = sha256_file(archive)?;
    let name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("archive");
    let sidecar = archive.with_extension("zst.sha256");
    fs::write(&sidecar, format!("{sha}  {name}\n"))
        .with_context(|| format!("Failed to write {}", sidecar.display()))?;
    Ok(sidecar)
}

fn sha256_file(path: &Path) -> Result<(String, u64)> {
    let f = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut reader = BufReader::new(f);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 1024 * 1024];
    let mut size = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn archive_entry_names(path: &Path) -> Vec<String> {
        let f = File::open(path).unwrap();
        let decoder = zstd::stream::Decoder::new(f).unwrap();
        let mut archive = tar::Archive::new(decoder);
        archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    fn write_image(images: &Path) {
        let jdk = images.join("product");
        fs::create_dir_all(jdk.join("bin")).unwrap();
        fs::write(jdk.join("bin/java"), "launcher").unwrap();
        fs::create_dir_all(jdk.join("jre/lib/amd64/server")).unwrap();
        fs::write(jdk.join("jre/lib/amd64/server/libjvm.so"), "jvm").unwrap();
        fs::write(jdk.join("jre/lib/rt.jar"), "rt").unwrap();
    }

    #[test]
    fn test_export_splits_base_and_vm() {
        let temp = TempDir::new().unwrap();
        let images = temp.path().join("jdks");
        let out = temp.path().join("export");
        write_image(&images);

        let written = export_images(&images, &out, "0123abcd").unwrap();
        assert_eq!(written.len(), 2);

        let base = written
            .iter()
            .find(|p| p.file_name().unwrap().to_string_lossy().contains("basejdk"))
            .unwrap();
        let names = archive_entry_names(base);
        assert!(names.contains(&"export-info.json".to_string()));
        assert!(names.contains(&"bin/java".to_string()));
        assert!(names.contains(&"jre/lib/rt.jar".to_string()));
        // The VM subtree is excluded from the base archive.
        assert!(!names.iter().any(|n| n.contains("libjvm.so")));

        let vm = written
            .iter()
            .find(|p| p.file_name().unwrap().to_string_lossy().contains("_vm_"))
            .unwrap();
        let names = archive_entry_names(vm);
        assert!(names.contains(&"libjvm.so".to_string()));

        // Checksums written alongside.
        assert!(base.with_extension("zst.sha256").exists());
        assert!(vm.with_extension("zst.sha256").exists());
    }

    #[test]
    fn test_missing_builds_are_skipped() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("export");
        let written = export_images(&temp.path().join("jdks"), &out, "rev").unwrap();
        assert!(written.is_empty());
    }

    #[test]
    fn test_export_is_deterministic_apart_from_manifest_timestamp() {
        let temp = TempDir::new().unwrap();
        let images = temp.path().join("jdks");
        write_image(&images);

        let out_a = temp.path().join("a");
        let out_b = temp.path().join("b");
        let a = export_images(&images, &out_a, "rev").unwrap();
        let b = export_images(&images, &out_b, "rev").unwrap();

        // Entry lists (names and order) are identical between runs.
        assert_eq!(archive_entry_names(&a[0]), archive_entry_names(&b[0]));
        assert_eq!(archive_entry_names(&a[1]), archive_entry_names(&b[1]));
    }
}
