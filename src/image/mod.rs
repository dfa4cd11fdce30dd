//! Assembling a private JDK image from a bootstrap JDK plus freshly built
//! artifacts.
//!
//! Image directories live under one root, keyed by VM build type
//! (`<images>/product`, `<images>/fastdebug`, ...). Assembly is designed so
//! every step is independently safe to re-run: cloning only happens when
//! the directory is absent, registration and metadata patches are
//! idempotent, and deployment/merging rebuild their outputs from scratch.

pub mod release;
pub mod vmcfg;

use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::deploy::Deployer;
use crate::fsutil::{copy_dir_recursive, normalize_permissions};
use crate::prompt::{Decide, NonInteractive};
use crate::services::{merge_into, MergeReport};
use crate::suite::{DeploySpec, Suite};
use crate::variant::{BuildVariant, VmBuild};

/// Result of [`ImageAssembler::ensure_image`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageStatus {
    /// The image exists (possibly just created) and is fully deployed.
    Ready(PathBuf),
    /// No image exists for this build and creation was not requested.
    /// Recovery (offering to build) is the caller's business.
    Missing { build: VmBuild },
}

/// Clones, patches and populates JDK images for build variants.
pub struct ImageAssembler<'a> {
    suite: &'a Suite,
    bootstrap_jdk: PathBuf,
    images_root: PathBuf,
    /// Revision recorded as `jvmci:<revision>` in the release metadata.
    revision: String,
    link_instead_of_copy: bool,
}

impl<'a> ImageAssembler<'a> {
    pub fn new(
        suite: &'a Suite,
        bootstrap_jdk: &Path,
        images_root: &Path,
        revision: &str,
    ) -> ImageAssembler<'a> {
        ImageAssembler {
            suite,
            bootstrap_jdk: bootstrap_jdk.to_path_buf(),
            images_root: images_root.to_path_buf(),
            revision: revision.to_string(),
            link_instead_of_copy: false,
        }
    }

    /// Deploy by symlinking instead of copying (developer iteration only).
    pub fn with_links(mut self, link: bool) -> ImageAssembler<'a> {
        self.link_instead_of_copy = link;
        self
    }

    /// Directory of the image for a build type.
    pub fn image_dir(&self, build: VmBuild) -> PathBuf {
        self.images_root.join(build.as_str())
    }

    /// The build type an existing image directory corresponds to.
    pub fn build_of_image_dir(path: &Path) -> Option<VmBuild> {
        let name = path.file_name()?.to_str()?;
        VmBuild::parse(name).ok()
    }

    /// Ensure the image for `variant` exists and is fully deployed.
    ///
    /// When `create` is false and the image is absent, reports
    /// [`ImageStatus::Missing`] instead of silently creating one.
    pub fn ensure_image(&self, variant: &BuildVariant, create: bool) -> Result<ImageStatus> {
        let jdk = self.image_dir(variant.build);
        let fresh = !jdk.is_dir();
        if fresh {
            if !create {
                println!(
                    "The {} {} VM has not been created under {}",
                    variant.build,
                    variant.vm,
                    self.images_root.display()
                );
                return Ok(ImageStatus::Missing {
                    build: variant.build,
                });
            }
            println!(
                "Creating {} from {}",
                jdk.display(),
                self.bootstrap_jdk.display()
            );
            copy_dir_recursive(&self.bootstrap_jdk, &jdk).with_context(|| {
                format!("cloning bootstrap JDK into {}", jdk.display())
            })?;
        }

        // A JDK without a registration file cannot host our VM at all.
        let Some(cfg) = vmcfg::locate(&jdk) else {
            bail!(
                "no VM registration file found under {} (searched {})",
                jdk.display(),
                vmcfg::candidate_paths()
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        };
        vmcfg::register_vm(&cfg, &variant.vm)?;

        // Best-effort: a malformed release file never blocks assembly.
        let release_file = jdk.join("release");
        if release_file.is_file() {
            if let Err(err) = release::patch_source_revision(&release_file, &self.revision) {
                eprintln!(
                    "Warning: could not update {}: {err:#}",
                    release_file.display()
                );
            }
        }

        if fresh {
            normalize_permissions(&jdk)?;
        }

        self.deploy_built_distributions(variant, &jdk, variant.build)?;
        self.merge_installed(&jdk)?;
        Ok(ImageStatus::Ready(jdk))
    }

    /// Whether `-<vm> KNOWN` is registered in an existing image.
    pub fn vm_registered(&self, build: VmBuild, vm: &str) -> Result<bool> {
        let jdk = self.image_dir(build);
        let Some(cfg) = vmcfg::locate(&jdk) else {
            return Ok(false);
        };
        vmcfg::vm_registered(&cfg, vm)
    }

    /// Install the current artifacts of `variant` into every image that
    /// already exists, then refresh the merged registries. Native archives
    /// bound to a different build than an image are skipped per image.
    pub fn deploy_to_existing_images(&self, variant: &BuildVariant) -> Result<()> {
        if !self.images_root.is_dir() {
            return Ok(());
        }
        let mut dirs: Vec<PathBuf> = fs::read_dir(&self.images_root)
            .with_context(|| format!("listing {}", self.images_root.display()))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();
        for dir in dirs {
            let Some(build) = Self::build_of_image_dir(&dir) else {
                continue;
            };
            self.deploy_built_distributions(variant, &dir, build)?;
            self.merge_installed(&dir)?;
        }
        Ok(())
    }

    /// Report (and optionally delete, per `decide`) registry files no jar
    /// regenerates anymore. Never rewrites live registries.
    pub fn check_obsolete(&self, build: VmBuild, decide: &dyn Decide) -> Result<MergeReport> {
        check_obsolete_in(self.suite, &self.image_dir(build), decide)
    }

    fn deploy_built_distributions(
        &self,
        variant: &BuildVariant,
        jdk: &Path,
        jdk_build: VmBuild,
    ) -> Result<()> {
        let deployer = Deployer::new(self.suite).with_links(self.link_instead_of_copy);
        let resolved = self.suite.resolve_distributions(variant);
        for dist in resolved.values() {
            deployer.deploy(dist, jdk, jdk_build)?;
        }
        Ok(())
    }

    fn merge_installed(&self, jdk: &Path) -> Result<()> {
        for target in service_jar_targets(self.suite) {
            run_merge(jdk, &target, false, &NonInteractive)?;
        }
        Ok(())
    }
}

/// Report (without rewriting) registry files under `jdk_root` that no
/// installed jar regenerates anymore, offering each for deletion through
/// `decide`.
pub fn check_obsolete_in(
    suite: &Suite,
    jdk_root: &Path,
    decide: &dyn Decide,
) -> Result<MergeReport> {
    let mut combined = MergeReport::default();
    for target in service_jar_targets(suite) {
        let report = run_merge(jdk_root, &target, true, decide)?;
        combined.services.extend(report.services);
        combined.options.extend(report.options);
        combined.obsolete.extend(report.obsolete);
        combined.skipped_jars.extend(report.skipped_jars);
    }
    Ok(combined)
}

/// Distinct install directories of service-merging distributions.
fn service_jar_targets(suite: &Suite) -> BTreeSet<String> {
    suite
        .distributions()
        .filter_map(|d| match &d.deploy {
            Some(DeploySpec::ServiceJar { target }) => Some(target.clone()),
            _ => None,
        })
        .collect()
}

fn run_merge(
    jdk: &Path,
    target: &str,
    obsolete_check: bool,
    decide: &dyn Decide,
) -> Result<MergeReport> {
    let dir = jdk.join(target);
    let jars = installed_jars(&dir)?;
    merge_into(
        &jars,
        &dir.join("services"),
        &dir.join("options"),
        obsolete_check,
        decide,
    )
    .with_context(|| format!("merging service registries under {}", dir.display()))
}

/// The jar files installed in a deploy target directory, sorted.
fn installed_jars(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(vec![]);
    }
    let mut jars: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("listing {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("jar"))
        .collect();
    jars.sort();
    Ok(jars)
}
