//! Loading and validation of the declarative suite description.
//!
//! The on-disk format is TOML: one document declaring projects, libraries
//! and distributions by name. Raw serde structs are converted into the
//! validated [`Suite`] domain type; every reference is resolved at load
//! time so the rest of the crate can treat lookups as infallible-by-
//! construction and all "unknown name" reporting happens in one place.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use super::{DeploySpec, Distribution, Library, Project, Suite};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SuiteToml {
    name: String,
    #[serde(default)]
    projects: Vec<ProjectToml>,
    #[serde(default)]
    libraries: Vec<LibraryToml>,
    #[serde(default)]
    distributions: Vec<DistributionToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectToml {
    name: String,
    dir: String,
    source_dirs: Vec<String>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    annotation_processors: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LibraryToml {
    name: String,
    path: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DistributionToml {
    name: String,
    path: String,
    sources_path: Option<String>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    distribution_dependencies: Vec<String>,
    #[serde(default)]
    excluded_dependencies: Vec<String>,
    deploy: Option<DeployToml>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
enum DeployToml {
    Jar { target: String },
    ServiceJar { target: String },
    NativeArchive { members: BTreeMap<String, String> },
}

/// Load and validate a suite description from `path`.
pub fn load_suite(path: &Path) -> Result<Suite> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading suite config '{}'", path.display()))?;
    let parsed: SuiteToml = toml::from_str(&text)
        .with_context(|| format!("parsing suite config '{}'", path.display()))?;
    let root = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| Path::new(".").to_path_buf());

    let mut projects = BTreeMap::new();
    let mut libraries = BTreeMap::new();
    let mut distributions = BTreeMap::new();
    let mut seen = BTreeSet::new();

    for lib in parsed.libraries {
        require_unique(&mut seen, &lib.name, path)?;
        require_relative(&lib.path, &lib.name, path)?;
        libraries.insert(
            lib.name.clone(),
            Library {
                name: lib.name,
                path: lib.path,
            },
        );
    }

    for p in parsed.projects {
        require_unique(&mut seen, &p.name, path)?;
        if p.source_dirs.is_empty() {
            bail!(
                "invalid suite config '{}': project '{}' declares no source_dirs",
                path.display(),
                p.name
            );
        }
        projects.insert(
            p.name.clone(),
            Project {
                name: p.name,
                dir: p.dir,
                source_dirs: p.source_dirs,
                dependencies: p.dependencies,
                annotation_processors: p.annotation_processors,
            },
        );
    }

    for d in parsed.distributions {
        require_unique(&mut seen, &d.name, path)?;
        require_relative(&d.path, &d.name, path)?;
        let deploy = match d.deploy {
            None => None,
            Some(DeployToml::Jar { target }) => {
                require_relative(&target, &d.name, path)?;
                Some(DeploySpec::Jar { target })
            }
            Some(DeployToml::ServiceJar { target }) => {
                require_relative(&target, &d.name, path)?;
                Some(DeploySpec::ServiceJar { target })
            }
            Some(DeployToml::NativeArchive { members }) => {
                if members.is_empty() {
                    bail!(
                        "invalid suite config '{}': native-archive distribution '{}' has an empty member table",
                        path.display(),
                        d.name
                    );
                }
                for target in members.values() {
                    require_relative(target, &d.name, path)?;
                }
                Some(DeploySpec::NativeArchive { members })
            }
        };
        distributions.insert(
            d.name.clone(),
            Distribution {
                name: d.name,
                path: d.path,
                sources_path: d.sources_path,
                dependencies: d.dependencies,
                dist_dependencies: d.distribution_dependencies,
                excluded_dependencies: d.excluded_dependencies,
                deploy,
            },
        );
    }

    let suite = Suite::from_parts(parsed.name, root, projects, libraries, distributions);
    validate_references(&suite, path)?;
    validate_acyclic(&suite, path)?;
    Ok(suite)
}

fn require_unique(seen: &mut BTreeSet<String>, name: &str, path: &Path) -> Result<()> {
    if !seen.insert(name.to_string()) {
        bail!(
            "invalid suite config '{}': name '{}' is declared more than once",
            path.display(),
            name
        );
    }
    Ok(())
}

fn require_relative(value: &str, owner: &str, path: &Path) -> Result<()> {
    if value.starts_with('/') || value.split('/').any(|c| c == "..") {
        bail!(
            "invalid suite config '{}': path '{}' of '{}' must be relative and must not contain '..'",
            path.display(),
            value,
            owner
        );
    }
    Ok(())
}

fn validate_references(suite: &Suite, path: &Path) -> Result<()> {
    let check = |owner: &str, name: &str| -> Result<()> {
        if suite.find(name).is_none() {
            bail!(
                "invalid suite config '{}': '{}' references unknown dependency '{}'",
                path.display(),
                owner,
                name
            );
        }
        Ok(())
    };

    for p in suite.projects() {
        for dep in &p.dependencies {
            check(&p.name, dep)?;
        }
        for ap in &p.annotation_processors {
            if suite.distribution(ap).is_none() {
                bail!(
                    "invalid suite config '{}': annotation processor '{}' of project '{}' is not a distribution",
                    path.display(),
                    ap,
                    p.name
                );
            }
        }
    }

    for d in suite.distributions() {
        for dep in &d.dependencies {
            if suite.project(dep).is_none() && suite.library(dep).is_none() {
                bail!(
                    "invalid suite config '{}': distribution '{}' aggregates '{}', which is not a project or library",
                    path.display(),
                    d.name,
                    dep
                );
            }
        }
        for dep in &d.dist_dependencies {
            if suite.distribution(dep).is_none() {
                bail!(
                    "invalid suite config '{}': distribution dependency '{}' of '{}' is not a distribution",
                    path.display(),
                    dep,
                    d.name
                );
            }
        }
        for dep in &d.excluded_dependencies {
            check(&d.name, dep)?;
        }
    }
    Ok(())
}

/// The dependency relation restricted to projects and distributions must be
/// acyclic; libraries are leaves and cannot participate in a cycle.
fn validate_acyclic(suite: &Suite, path: &Path) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn edges<'a>(suite: &'a Suite, name: &str) -> Vec<&'a String> {
        match suite.find(name) {
            Some(super::Node::Project(p)) => {
                p.dependencies.iter().chain(p.annotation_processors.iter()).collect()
            }
            Some(super::Node::Distribution(d)) => {
                d.dependencies.iter().chain(d.dist_dependencies.iter()).collect()
            }
            _ => vec![],
        }
    }

    fn visit(
        suite: &Suite,
        name: &str,
        marks: &mut BTreeMap<String, Mark>,
        stack: &mut Vec<String>,
    ) -> Result<()> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let mut cycle: Vec<&str> = stack
                    .iter()
                    .skip_while(|n| n.as_str() != name)
                    .map(String::as_str)
                    .collect();
                cycle.push(name);
                bail!("dependency cycle: {}", cycle.join(" -> "));
            }
            None => {}
        }
        marks.insert(name.to_string(), Mark::Visiting);
        stack.push(name.to_string());
        for dep in edges(suite, name) {
            visit(suite, dep, marks, stack)?;
        }
        stack.pop();
        marks.insert(name.to_string(), Mark::Done);
        Ok(())
    }

    let mut marks = BTreeMap::new();
    let roots: Vec<String> = suite
        .projects()
        .map(|p| p.name.clone())
        .chain(suite.distributions().map(|d| d.name.clone()))
        .collect();
    for name in roots {
        let mut stack = vec![];
        visit(suite, &name, &mut marks, &mut stack)
            .with_context(|| format!("invalid suite config '{}'", path.display()))?;
    }
    Ok(())
}
