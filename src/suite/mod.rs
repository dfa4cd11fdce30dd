//! Dependency graph model: the read-only view of distributions and the
//! projects/libraries they aggregate.
//!
//! A [`Suite`] is loaded from a declarative `suite.toml` (see [`config`])
//! and never mutated afterwards. Distribution names and output paths may be
//! templates over the build-variant axes; [`Suite::resolve_distributions`]
//! produces a fresh per-variant binding each time it is called, so there is
//! no process-wide "current variant" state to invalidate.

pub mod config;
pub mod walk;

use crate::variant::{is_template, BuildVariant};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A compilable source unit.
#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,
    /// Project directory, relative to the suite root.
    pub dir: String,
    /// Source roots relative to `dir`, in declaration order.
    pub source_dirs: Vec<String>,
    /// Names of projects, libraries or distributions this project needs.
    pub dependencies: Vec<String>,
    /// Distributions whose jars must be on the annotation processor path
    /// when compiling this project.
    pub annotation_processors: Vec<String>,
}

/// An externally supplied artifact with a resolved path; a graph leaf.
#[derive(Debug, Clone)]
pub struct Library {
    pub name: String,
    /// Artifact path relative to the suite root.
    pub path: String,
}

/// How a distribution's artifact is installed into a JDK tree.
///
/// One case per deploy strategy; the deployer dispatches over this with a
/// single match instead of a class hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploySpec {
    /// Copy the jar (and paired sources archive) into `target`.
    Jar { target: String },
    /// Like [`DeploySpec::Jar`], and the installed jar additionally feeds
    /// the service/options merge over `target`.
    ServiceJar { target: String },
    /// Extract selected members of a tar archive. Keys are archive member
    /// names, values are install directories relative to the JDK root
    /// (may contain `<vm>`/`<vmbuild>` placeholders).
    NativeArchive { members: BTreeMap<String, String> },
}

/// A named, packaged build output aggregating projects and libraries.
#[derive(Debug, Clone)]
pub struct Distribution {
    /// Declared name; may contain variant placeholders.
    pub name: String,
    /// Output path relative to the suite root; may contain placeholders.
    pub path: String,
    /// Paired sources archive, if the build produces one.
    pub sources_path: Option<String>,
    /// Aggregated projects and libraries.
    pub dependencies: Vec<String>,
    /// Distribution-level dependencies.
    pub dist_dependencies: Vec<String>,
    /// Dependency names excluded from this distribution's closure. The
    /// walk skips these edges; the build-rule generator still puts their
    /// artifacts on the compile classpath.
    pub excluded_dependencies: Vec<String>,
    /// Present when the distribution is part of the deployed JDK.
    pub deploy: Option<DeploySpec>,
}

impl Distribution {
    /// Whether name or output path is parameterized by the variant axes.
    pub fn is_parameterized(&self) -> bool {
        is_template(&self.name) || is_template(&self.path)
    }
}

/// A distribution with all variant placeholders substituted.
///
/// `binding` records which variant produced it; `None` for distributions
/// that were never parameterized. Two bindings of the same template are
/// independent values that deploy independently.
#[derive(Debug, Clone)]
pub struct ResolvedDistribution {
    /// The declared (template) name this instance was resolved from.
    pub template: String,
    pub dist: Distribution,
    pub binding: Option<BuildVariant>,
}

impl ResolvedDistribution {
    /// Absolute path of the built artifact.
    pub fn artifact_path(&self, suite: &Suite) -> PathBuf {
        suite.root.join(&self.dist.path)
    }

    /// Absolute path of the paired sources archive, if declared.
    pub fn sources_artifact_path(&self, suite: &Suite) -> Option<PathBuf> {
        self.dist.sources_path.as_ref().map(|p| suite.root.join(p))
    }
}

/// Any node of the graph, for name lookups that cross namespaces.
#[derive(Debug, Clone, Copy)]
pub enum Node<'a> {
    Project(&'a Project),
    Library(&'a Library),
    Distribution(&'a Distribution),
}

/// The read-only project/library/distribution graph.
#[derive(Debug, Clone)]
pub struct Suite {
    pub name: String,
    /// Directory containing the suite config; artifact paths resolve
    /// against it.
    pub root: PathBuf,
    projects: BTreeMap<String, Project>,
    libraries: BTreeMap<String, Library>,
    distributions: BTreeMap<String, Distribution>,
}

impl Suite {
    pub(crate) fn from_parts(
        name: String,
        root: PathBuf,
        projects: BTreeMap<String, Project>,
        libraries: BTreeMap<String, Library>,
        distributions: BTreeMap<String, Distribution>,
    ) -> Suite {
        Suite {
            name,
            root,
            projects,
            libraries,
            distributions,
        }
    }

    pub fn project(&self, name: &str) -> Option<&Project> {
        self.projects.get(name)
    }

    pub fn library(&self, name: &str) -> Option<&Library> {
        self.libraries.get(name)
    }

    /// Look up a distribution by its declared (template) name.
    pub fn distribution(&self, name: &str) -> Option<&Distribution> {
        self.distributions.get(name)
    }

    pub fn find(&self, name: &str) -> Option<Node<'_>> {
        if let Some(p) = self.projects.get(name) {
            return Some(Node::Project(p));
        }
        if let Some(l) = self.libraries.get(name) {
            return Some(Node::Library(l));
        }
        self.distributions.get(name).map(Node::Distribution)
    }

    pub fn projects(&self) -> impl Iterator<Item = &Project> {
        self.projects.values()
    }

    pub fn distributions(&self) -> impl Iterator<Item = &Distribution> {
        self.distributions.values()
    }

    /// Absolute artifact path of a library.
    pub fn library_path(&self, lib: &Library) -> PathBuf {
        self.root.join(&lib.path)
    }

    /// Absolute directory of a project source root.
    pub fn source_root(&self, project: &Project, src: &str) -> PathBuf {
        self.root.join(&project.dir).join(src)
    }

    /// Bind every distribution to `variant`, substituting name and path
    /// templates (and native member targets), keyed by declared name.
    ///
    /// The map is rebuilt from scratch on every call: switching variants
    /// never mutates previously resolved instances, so an old binding and
    /// a new one can both be deployed in one run.
    pub fn resolve_distributions(
        &self,
        variant: &BuildVariant,
    ) -> BTreeMap<String, ResolvedDistribution> {
        let mut out = BTreeMap::new();
        for (template, dist) in &self.distributions {
            out.insert(template.clone(), self.resolve_distribution(dist, variant));
        }
        out
    }

    /// Bind one distribution to `variant`.
    pub fn resolve_distribution(
        &self,
        dist: &Distribution,
        variant: &BuildVariant,
    ) -> ResolvedDistribution {
        let parameterized = dist.is_parameterized()
            || matches!(
                &dist.deploy,
                Some(DeploySpec::NativeArchive { members })
                    if members.values().any(|t| is_template(t))
            );
        let mut resolved = dist.clone();
        resolved.name = variant.substitute(&dist.name);
        resolved.path = variant.substitute(&dist.path);
        resolved.sources_path = dist.sources_path.as_ref().map(|p| variant.substitute(p));
        if let Some(DeploySpec::NativeArchive { members }) = &dist.deploy {
            let members = members
                .iter()
                .map(|(member, target)| (member.clone(), variant.substitute(target)))
                .collect();
            resolved.deploy = Some(DeploySpec::NativeArchive { members });
        }
        ResolvedDistribution {
            template: dist.name.clone(),
            dist: resolved,
            binding: parameterized.then(|| variant.clone()),
        }
    }

    /// Relative install path of a deployed jar distribution, or `None` for
    /// native and non-deployable distributions.
    pub fn installed_jar_path(&self, dist: &Distribution) -> Option<PathBuf> {
        let target = match &dist.deploy {
            Some(DeploySpec::Jar { target }) | Some(DeploySpec::ServiceJar { target }) => target,
            _ => return None,
        };
        let jar_name = Path::new(&dist.path).file_name()?;
        Some(Path::new(target).join(jar_name))
    }
}
