//! Installing built artifacts into a JDK tree.
//!
//! The three deploy strategies (plain jar copy, service-merging jar copy,
//! selective native-archive extraction) are cases of [`DeploySpec`] and are
//! dispatched here by a single match. Every file that reaches its final
//! path inside the JDK goes through write-to-temp-then-rename, so a VM
//! process reading the previous artifact never observes a partial write.
//! Re-deploying the same artifact is always safe: the rename fully
//! supersedes whatever was installed before.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::fsutil::{atomic_move, set_mode, tmp_name, JDK_FILE_MODE};
use crate::suite::{DeploySpec, ResolvedDistribution, Suite};
use crate::variant::VmBuild;

/// What happened to one distribution during deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployOutcome {
    /// Artifact (and paired sources archive, if any) installed.
    Deployed,
    /// The distribution declares no deploy target.
    NotDeployable,
    /// The built artifact does not exist yet; nothing was installed.
    SkippedMissingArtifact,
    /// A native archive bound to a different build variant than the target
    /// tree; installing it would corrupt the image, so it is skipped.
    SkippedVariantMismatch,
}

/// Installs distribution artifacts into JDK trees.
pub struct Deployer<'a> {
    suite: &'a Suite,
    /// Symlink instead of copying. Faster for developer iteration but may
    /// corrupt a running VM's mapped pages, so it is never the default.
    link_instead_of_copy: bool,
}

impl<'a> Deployer<'a> {
    pub fn new(suite: &'a Suite) -> Deployer<'a> {
        Deployer {
            suite,
            link_instead_of_copy: false,
        }
    }

    pub fn with_links(mut self, link: bool) -> Deployer<'a> {
        self.link_instead_of_copy = link;
        self
    }

    /// Install one resolved distribution into the JDK rooted at `jdk_root`,
    /// which was assembled for `jdk_build`.
    pub fn deploy(
        &self,
        resolved: &ResolvedDistribution,
        jdk_root: &Path,
        jdk_build: VmBuild,
    ) -> Result<DeployOutcome> {
        let dist = &resolved.dist;
        match &dist.deploy {
            None => Ok(DeployOutcome::NotDeployable),
            Some(DeploySpec::Jar { target }) | Some(DeploySpec::ServiceJar { target }) => {
                let artifact = resolved.artifact_path(self.suite);
                if !artifact.is_file() {
                    println!(
                        "Skipping {}: artifact {} not built",
                        dist.name,
                        artifact.display()
                    );
                    return Ok(DeployOutcome::SkippedMissingArtifact);
                }
                let target_dir = jdk_root.join(target);
                println!("Deploying {} to {}", dist.name, target_dir.display());
                self.install_file(&artifact, &target_dir)?;
                if let Some(sources) = resolved.sources_artifact_path(self.suite) {
                    if sources.is_file() {
                        self.install_file(&sources, &target_dir)?;
                    }
                }
                Ok(DeployOutcome::Deployed)
            }
            Some(DeploySpec::NativeArchive { members }) => {
                if let Some(binding) = &resolved.binding {
                    if binding.build != jdk_build {
                        println!(
                            "Skipping {}: archive is for {} but target tree is {}",
                            dist.name, binding.build, jdk_build
                        );
                        return Ok(DeployOutcome::SkippedVariantMismatch);
                    }
                }
                let artifact = resolved.artifact_path(self.suite);
                if !artifact.is_file() {
                    println!(
                        "Skipping {}: archive {} not built",
                        dist.name,
                        artifact.display()
                    );
                    return Ok(DeployOutcome::SkippedMissingArtifact);
                }
                extract_members(&artifact, members, jdk_root)
                    .with_context(|| format!("deploying native archive '{}'", dist.name))?;
                Ok(DeployOutcome::Deployed)
            }
        }
    }

    /// Install a single file into `target_dir` under its own name.
    fn install_file(&self, src: &Path, target_dir: &Path) -> Result<()> {
        fs::create_dir_all(target_dir)
            .with_context(|| format!("Failed to create {}", target_dir.display()))?;
        let name = src
            .file_name()
            .with_context(|| format!("artifact path has no file name: {}", src.display()))?;
        let dst = target_dir.join(name);

        if self.link_instead_of_copy {
            #[cfg(unix)]
            {
                if dst.exists() || dst.is_symlink() {
                    fs::remove_file(&dst)
                        .with_context(|| format!("Failed to remove {}", dst.display()))?;
                }
                return std::os::unix::fs::symlink(src, &dst)
                    .with_context(|| format!("Failed to link {}", dst.display()));
            }
        }

        let tmp = target_dir.join(tmp_name(&name.to_string_lossy()));
        fs::copy(src, &tmp)
            .with_context(|| format!("Failed to copy {} to {}", src.display(), tmp.display()))?;
        atomic_move(&tmp, &dst)?;
        set_mode(&dst, JDK_FILE_MODE)?;
        Ok(())
    }
}

/// Extract the archive members named in `members` into their mapped install
/// directories under `jdk_root`. Members absent from the map are ignored;
/// mapped members missing from the archive are not an error (a debug-only
/// library may not exist in a product archive).
fn extract_members(
    archive: &Path,
    members: &std::collections::BTreeMap<String, String>,
    jdk_root: &Path,
) -> Result<()> {
    let file = fs::File::open(archive)
        .with_context(|| format!("Failed to open archive {}", archive.display()))?;
    let mut tar = tar::Archive::new(file);
    for entry in tar
        .entries()
        .with_context(|| format!("Failed to read archive {}", archive.display()))?
    {
        let mut entry =
            entry.with_context(|| format!("Failed to read entry in {}", archive.display()))?;
        let member_name = {
            let path = entry.path()?;
            path.to_string_lossy().into_owned()
        };
        let Some(target) = members.get(&member_name) else {
            continue;
        };
        let target_dir = jdk_root.join(target);
        fs::create_dir_all(&target_dir)
            .with_context(|| format!("Failed to create {}", target_dir.display()))?;
        println!(
            "Deploying {} from {} to {}",
            member_name,
            archive.display(),
            target_dir.display()
        );
        let dst = target_dir.join(
            Path::new(&member_name)
                .file_name()
                .with_context(|| format!("archive member has no file name: {member_name}"))?,
        );
        let tmp = target_dir.join(tmp_name(&member_name));
        entry
            .unpack(&tmp)
            .with_context(|| format!("Failed to extract {member_name}"))?;
        atomic_move(&tmp, &dst)?;
        set_mode(&dst, JDK_FILE_MODE)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::testutil::sample_suite;
    use crate::variant::BuildVariant;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_artifact(path: &Path, contents: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn write_tar(path: &Path, members: &[(&str, &[u8])]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let file = fs::File::create(path).unwrap();
        let mut builder = tar::Builder::new(file);
        for (name, data) in members {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().flush().unwrap();
    }

    #[test]
    fn test_deploy_jar_with_sources() {
        let temp = TempDir::new().unwrap();
        let suite_root = temp.path().join("suite");
        let jdk = temp.path().join("jdk");
        let suite = sample_suite(&suite_root);
        write_artifact(&suite_root.join("build/dists/jvmci-api.jar"), b"api jar");

        let variant = BuildVariant::new(VmBuild::Product, "server");
        let resolved = suite.resolve_distributions(&variant);
        let outcome = Deployer::new(&suite)
            .deploy(&resolved["JVMCI_API"], &jdk, VmBuild::Product)
            .unwrap();

        assert_eq!(outcome, DeployOutcome::Deployed);
        assert_eq!(
            fs::read(jdk.join("jre/lib/jvmci/jvmci-api.jar")).unwrap(),
            b"api jar"
        );
    }

    #[test]
    fn test_redeploy_is_idempotent_and_supersedes() {
        let temp = TempDir::new().unwrap();
        let suite_root = temp.path().join("suite");
        let jdk = temp.path().join("jdk");
        let suite = sample_suite(&suite_root);
        let artifact = suite_root.join("build/dists/jvmci-api.jar");
        write_artifact(&artifact, b"v1");

        let variant = BuildVariant::new(VmBuild::Product, "server");
        let resolved = suite.resolve_distributions(&variant);
        let deployer = Deployer::new(&suite);
        let installed = jdk.join("jre/lib/jvmci/jvmci-api.jar");

        deployer.deploy(&resolved["JVMCI_API"], &jdk, VmBuild::Product).unwrap();
        deployer.deploy(&resolved["JVMCI_API"], &jdk, VmBuild::Product).unwrap();
        assert_eq!(fs::read(&installed).unwrap(), b"v1");

        // A newer artifact fully supersedes the old one.
        write_artifact(&artifact, b"v2 with more bytes");
        deployer.deploy(&resolved["JVMCI_API"], &jdk, VmBuild::Product).unwrap();
        assert_eq!(fs::read(&installed).unwrap(), b"v2 with more bytes");

        // No temp litter in the install directory.
        let stray: Vec<_> = fs::read_dir(installed.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(stray.is_empty());
    }

    #[test]
    fn test_missing_artifact_is_skipped() {
        let temp = TempDir::new().unwrap();
        let suite = sample_suite(&temp.path().join("suite"));
        let variant = BuildVariant::new(VmBuild::Product, "server");
        let resolved = suite.resolve_distributions(&variant);

        let outcome = Deployer::new(&suite)
            .deploy(&resolved["JVMCI_API"], &temp.path().join("jdk"), VmBuild::Product)
            .unwrap();
        assert_eq!(outcome, DeployOutcome::SkippedMissingArtifact);
    }

    #[test]
    fn test_native_archive_extracts_only_mapped_members() {
        let temp = TempDir::new().unwrap();
        let suite_root = temp.path().join("suite");
        let jdk = temp.path().join("jdk");
        let suite = sample_suite(&suite_root);

        write_tar(
            &suite_root.join("build/fastdebug/hotspot-server.tar"),
            &[
                ("libjvm.so", b"jvm library".as_slice()),
                ("jvmti.h", b"header".as_slice()),
                ("unmapped.txt", b"ignored".as_slice()),
            ],
        );

        let variant = BuildVariant::new(VmBuild::FastDebug, "server");
        let resolved = suite.resolve_distributions(&variant);
        let outcome = Deployer::new(&suite)
            .deploy(&resolved["JVM_<vmbuild>_<vm>"], &jdk, VmBuild::FastDebug)
            .unwrap();

        assert_eq!(outcome, DeployOutcome::Deployed);
        assert_eq!(
            fs::read(jdk.join("jre/lib/amd64/server/libjvm.so")).unwrap(),
            b"jvm library"
        );
        assert_eq!(fs::read(jdk.join("include/jvmti.h")).unwrap(), b"header");
        assert!(!jdk.join("unmapped.txt").exists());
    }

    #[test]
    fn test_native_archive_variant_mismatch_is_skipped() {
        let temp = TempDir::new().unwrap();
        let suite_root = temp.path().join("suite");
        let jdk = temp.path().join("jdk");
        let suite = sample_suite(&suite_root);

        write_tar(
            &suite_root.join("build/fastdebug/hotspot-server.tar"),
            &[("libjvm.so", b"jvm".as_slice())],
        );

        let variant = BuildVariant::new(VmBuild::FastDebug, "server");
        let resolved = suite.resolve_distributions(&variant);
        // Target tree is a product image; the fastdebug archive must not land.
        let outcome = Deployer::new(&suite)
            .deploy(&resolved["JVM_<vmbuild>_<vm>"], &jdk, VmBuild::Product)
            .unwrap();

        assert_eq!(outcome, DeployOutcome::SkippedVariantMismatch);
        assert!(!jdk.join("jre/lib/amd64/server/libjvm.so").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_link_mode_creates_symlink() {
        let temp = TempDir::new().unwrap();
        let suite_root = temp.path().join("suite");
        let jdk = temp.path().join("jdk");
        let suite = sample_suite(&suite_root);
        write_artifact(&suite_root.join("build/dists/jvmci-api.jar"), b"api jar");

        let variant = BuildVariant::new(VmBuild::Product, "server");
        let resolved = suite.resolve_distributions(&variant);
        Deployer::new(&suite)
            .with_links(true)
            .deploy(&resolved["JVMCI_API"], &jdk, VmBuild::Product)
            .unwrap();

        assert!(jdk.join("jre/lib/jvmci/jvmci-api.jar").is_symlink());
    }
}
