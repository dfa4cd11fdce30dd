//! Transitive closure and ordering over the distribution graph.
//!
//! The traversal emits dependencies strictly before dependents (post-order),
//! so consumers may treat emission order as a valid build order. Excluded
//! dependency edges are skipped without cutting off the rest of the graph,
//! and unknown root names are collected for reporting instead of aborting
//! the traversal of the remaining roots.

use std::collections::BTreeSet;

use super::{Library, Project, Suite};

/// Result of walking a set of root distributions.
#[derive(Debug, Clone, Default)]
pub struct Closure {
    /// Every distribution needed to build the roots, in post-order. The
    /// closures of required annotation-processor distributions come first,
    /// so a consumer emitting one unit of work per entry never references
    /// a later entry.
    pub distributions: Vec<String>,
    /// The distinct annotation-processor distributions required by any
    /// reachable project, in first-required order.
    pub processor_distributions: Vec<String>,
    /// Projects reachable through the root distributions, in first-visited
    /// order.
    pub projects: Vec<String>,
    /// Requested root names that are not known distributions.
    pub unresolved: Vec<String>,
}

/// Compute the closure of `roots` over distribution dependencies.
pub fn distribution_closure(suite: &Suite, roots: &[String]) -> Closure {
    let mut valid_roots = vec![];
    let mut unresolved = vec![];
    for name in roots {
        if suite.distribution(name).is_some() {
            valid_roots.push(name.clone());
        } else {
            unresolved.push(name.clone());
        }
    }

    let root_order = post_order(suite, &valid_roots);

    let mut projects = vec![];
    let mut seen_projects = BTreeSet::new();
    for dist_name in &root_order {
        let dist = suite.distribution(dist_name).expect("walked dist exists");
        for p in dist_projects(suite, dist) {
            if seen_projects.insert(p.name.clone()) {
                projects.push(p.name.clone());
            }
        }
    }

    let mut processor_distributions = vec![];
    let mut seen_processors = BTreeSet::new();
    for project_name in &projects {
        let project = suite.project(project_name).expect("walked project exists");
        for ap in &project.annotation_processors {
            if seen_processors.insert(ap.clone()) {
                processor_distributions.push(ap.clone());
            }
        }
    }

    // One combined post-order pass seeded with the processor distributions
    // first: their closures are emitted before anything that needs them.
    let mut seeds = processor_distributions.clone();
    seeds.extend(valid_roots);
    let distributions = post_order(suite, &seeds);

    Closure {
        distributions,
        processor_distributions,
        projects,
        unresolved,
    }
}

/// Post-order walk over distribution-level dependency edges.
fn post_order(suite: &Suite, seeds: &[String]) -> Vec<String> {
    let mut visited = BTreeSet::new();
    let mut order = vec![];
    for seed in seeds {
        visit(suite, seed, &mut visited, &mut order);
    }
    order
}

fn visit(suite: &Suite, name: &str, visited: &mut BTreeSet<String>, order: &mut Vec<String>) {
    if !visited.insert(name.to_string()) {
        return;
    }
    let Some(dist) = suite.distribution(name) else {
        return;
    };
    for dep in &dist.dist_dependencies {
        if dist.excluded_dependencies.iter().any(|e| e == dep) {
            continue;
        }
        visit(suite, dep, visited, order);
    }
    order.push(name.to_string());
}

/// The projects a distribution aggregates: its direct project dependencies
/// plus their transitive project-to-project closure. Excluded edges are
/// honored; libraries and distribution references are not entered.
pub fn dist_projects<'a>(suite: &'a Suite, dist: &super::Distribution) -> Vec<&'a Project> {
    let mut out = vec![];
    let mut seen = BTreeSet::new();
    for dep in &dist.dependencies {
        if dist.excluded_dependencies.iter().any(|e| e == dep) {
            continue;
        }
        collect_projects(suite, dep, &mut seen, &mut out);
    }
    out
}

fn collect_projects<'a>(
    suite: &'a Suite,
    name: &str,
    seen: &mut BTreeSet<String>,
    out: &mut Vec<&'a Project>,
) {
    let Some(project) = suite.project(name) else {
        return;
    };
    if !seen.insert(name.to_string()) {
        return;
    }
    for dep in &project.dependencies {
        collect_projects(suite, dep, seen, out);
    }
    out.push(project);
}

/// The libraries a distribution's compilation sees: libraries it aggregates
/// directly plus any reached through its projects' dependencies.
pub fn dist_libraries<'a>(suite: &'a Suite, dist: &super::Distribution) -> Vec<&'a Library> {
    let mut out = vec![];
    let mut seen = BTreeSet::new();
    for dep in &dist.dependencies {
        if dist.excluded_dependencies.iter().any(|e| e == dep) {
            continue;
        }
        if let Some(lib) = suite.library(dep) {
            if seen.insert(lib.name.clone()) {
                out.push(lib);
            }
        }
    }
    for project in dist_projects(suite, dist) {
        for dep in &project.dependencies {
            if let Some(lib) = suite.library(dep) {
                if seen.insert(lib.name.clone()) {
                    out.push(lib);
                }
            }
        }
    }
    out
}
