//! Generation of a standalone, orchestrator-independent build description.
//!
//! The generator walks the same dependency graph the deployer consumes and
//! emits one make rule per distribution, dependencies strictly before
//! dependents, so the resulting file builds the selected distributions
//! without this tool present. Each recipe reproduces what the orchestrated
//! build does for one distribution: compile against a boot classpath
//! placeholder, copy `META-INF` resource trees, apply the provider/options
//! merge to the compiled tree, and package the jar. Output is deterministic
//! for a given graph and root set so repeated generation is byte-identical
//! and diffs cleanly in version control.

use anyhow::{bail, Result};
use std::collections::BTreeSet;
use std::path::Path;

use crate::fsutil::update_file;
use crate::suite::walk::{dist_libraries, dist_projects, distribution_closure};
use crate::suite::{DeploySpec, Distribution, Suite};
use crate::variant::BuildVariant;

/// A build description under construction: variable definitions first,
/// then rules, rendered in insertion order.
#[derive(Debug, Default)]
pub struct Makefile {
    definitions: Vec<String>,
    rules: Vec<String>,
}

impl Makefile {
    pub fn new() -> Makefile {
        Makefile::default()
    }

    pub fn add_definition(&mut self, s: impl Into<String>) {
        self.definitions.push(s.into());
    }

    pub fn add_rule(&mut self, s: impl Into<String>) {
        self.rules.push(s.into());
    }

    /// Render the final text.
    pub fn generate(&self) -> String {
        let mut blocks: Vec<&str> = vec![];
        blocks.extend(self.definitions.iter().map(String::as_str));
        blocks.extend(self.rules.iter().map(String::as_str));
        let mut out = blocks.join("\n\n");
        out.push('\n');
        out
    }
}

/// A generated build description plus the root names that did not resolve.
#[derive(Debug)]
pub struct GeneratedRules {
    pub contents: String,
    pub unresolved: Vec<String>,
}

/// Generate build rules for `roots` (or, when empty, for every
/// service-merging distribution).
///
/// Unknown root names are reported and skipped; rules are still generated
/// for every root that resolved. Only when nothing resolves at all does
/// generation fail.
pub fn build_rules(
    suite: &Suite,
    variant: &BuildVariant,
    roots: &[String],
) -> Result<GeneratedRules> {
    let selected: Vec<String> = if roots.is_empty() {
        suite
            .distributions()
            .filter(|d| matches!(d.deploy, Some(DeploySpec::ServiceJar { .. })))
            .map(|d| d.name.clone())
            .collect()
    } else {
        roots.to_vec()
    };

    let closure = distribution_closure(suite, &selected);
    if !closure.unresolved.is_empty() {
        eprintln!(
            "Distribution(s) '{}' do not exist.",
            closure.unresolved.join("', '")
        );
    }
    let resolved_roots: Vec<String> = selected
        .iter()
        .filter(|r| !closure.unresolved.contains(r))
        .cloned()
        .collect();
    if resolved_roots.is_empty() {
        bail!("no known distributions among the requested roots");
    }

    let mut mf = Makefile::new();
    mf.add_definition(header());
    mf.add_definition("JDK_BOOTCLASSPATH = $(ABS_BOOTDIR)/jre/lib/rt.jar");

    let mut jar_dists = vec![];
    for name in &closure.distributions {
        let dist = suite.distribution(name).expect("closure dist exists");
        if matches!(dist.deploy, Some(DeploySpec::NativeArchive { .. })) {
            println!("Skipping {}: native archives are built by the VM makefiles", name);
            continue;
        }
        dist_rule(suite, variant, dist, &mut mf);
        jar_dists.push(name.clone());
    }

    mf.add_definition(format!("DISTRIBUTIONS = {}", jar_dists.join(" ")));
    let default_deps = resolved_roots
        .iter()
        .map(|name| format!("$({name}_JAR)"))
        .collect::<Vec<_>>()
        .join(" ");
    mf.add_rule(format!("default: {default_deps}\n.PHONY: default\n"));

    Ok(GeneratedRules {
        contents: mf.generate(),
        unresolved: closure.unresolved,
    })
}

/// Generate rules and write them to `output`, or to standard output when
/// none is given. Returns the number of files that changed (0 or 1), the
/// generator's change-detection contract.
pub fn write_rules(
    suite: &Suite,
    variant: &BuildVariant,
    roots: &[String],
    output: Option<&Path>,
) -> Result<usize> {
    let generated = build_rules(suite, variant, roots)?;
    match output {
        None => {
            print!("{}", generated.contents);
            Ok(0)
        }
        Some(path) => {
            if update_file(path, &generated.contents)? {
                println!("Updated {}", path.display());
                Ok(1)
            } else {
                Ok(0)
            }
        }
    }
}

/// Emit the definitions and the rule for one jar distribution.
fn dist_rule(suite: &Suite, variant: &BuildVariant, dist: &Distribution, mf: &mut Makefile) {
    let name = &dist.name;
    let jar_path = variant.substitute(&dist.path);
    let sources_var = format!("{name}_SRC");
    let dep_jars_var = format!("{name}_DEP_JARS");

    // Projects owned by dependency distributions are compiled by their own
    // rules; projects owned by required annotation-processor distributions
    // likewise. Only the remainder contributes sources here.
    let dep_closure = distribution_closure(suite, &dist.dist_dependencies);
    let mut foreign_projects: BTreeSet<String> = dep_closure.projects.iter().cloned().collect();

    let mut processor_dists = vec![];
    let mut seen_processors = BTreeSet::new();
    for project in dist_projects(suite, dist) {
        for ap in &project.annotation_processors {
            if seen_processors.insert(ap.clone()) {
                processor_dists.push(ap.clone());
            }
        }
    }
    for ap in &processor_dists {
        if let Some(ap_dist) = suite.distribution(ap) {
            for p in dist_projects(suite, ap_dist) {
                foreign_projects.insert(p.name.clone());
            }
        }
    }

    let mut source_lines = vec![];
    let mut resources = vec![];
    for project in dist_projects(suite, dist) {
        if foreign_projects.contains(&project.name) {
            continue;
        }
        for src in &project.source_dirs {
            let rel = format!("{}/{}", project.dir, src);
            let op = if source_lines.is_empty() { "=" } else { "+=" };
            source_lines.push(format!(
                "{sources_var} {op} $(shell find {rel} -type f 2> /dev/null)"
            ));
            let meta_inf = suite.source_root(project, src).join("META-INF");
            if meta_inf.is_dir() {
                resources.push(format!("{rel}/META-INF"));
            }
        }
    }

    // Compile classpath: dependency distribution jars (built into the
    // target tree), aggregated libraries, and excluded dependencies, which
    // stay off the packaged jar but on the classpath.
    let mut classpath = vec![];
    for dep in &dep_closure.distributions {
        let dep_dist = suite.distribution(dep).expect("closure dist exists");
        classpath.push(format!("$(TARGET)/{}", variant.substitute(&dep_dist.path)));
    }
    for lib in dist_libraries(suite, dist) {
        classpath.push(lib.path.clone());
    }
    for excluded in &dist.excluded_dependencies {
        if let Some(lib) = suite.library(excluded) {
            classpath.push(lib.path.clone());
        } else if let Some(d) = suite.distribution(excluded) {
            classpath.push(variant.substitute(&d.path));
        }
    }

    let ap_jar_vars: Vec<String> = processor_dists
        .iter()
        .map(|ap| format!("$({ap}_JAR)"))
        .collect();

    if !source_lines.is_empty() {
        mf.add_definition(source_lines.join("\n"));
    }
    mf.add_definition(format!("{name}_JAR = $(TARGET)/{jar_path}"));
    if !classpath.is_empty() {
        mf.add_definition(format!("{dep_jars_var} = {}", classpath.join(" ")));
    }
    if dist.deploy.is_some() {
        mf.add_definition(format!("EXPORTED_FILES += $({name}_JAR)"));
    }

    let dep_jars_access = if classpath.is_empty() {
        String::new()
    } else {
        format!("$({dep_jars_var})")
    };
    mf.add_rule(format!(
        "$({name}_JAR): $({sources_var}) {ap_vars} {dep_jars_access}\n\
         \t$(call build_and_jar,{cp_aps},$(subst  $(space),:,{dep_jars_access}),{copy_resources},$({name}_JAR))\n",
        ap_vars = ap_jar_vars.join(" "),
        cp_aps = ap_jar_vars.join(":"),
        copy_resources = resources.join(" "),
    ));
}

/// The fixed preamble: tool variables, registry namespaces and the shell
/// functions every rule calls.
fn header() -> &'static str {
    r#"# This file is generated automatically, do not edit

TARGET=.
# Bootstrap JDK to be used (for javac and jar)
ABS_BOOTDIR=

JAVAC=$(ABS_BOOTDIR)/bin/javac -g
JAR=$(ABS_BOOTDIR)/bin/jar

# Directories, where the generated property-files reside within the JAR files
PROVIDERS_INF=/META-INF/jvmci.providers
SERVICES_INF=/META-INF/jvmci.services
OPTIONS_INF=/META-INF/jvmci.options

JARS = $(foreach dist,$(DISTRIBUTIONS),$($(dist)_JAR))

ifeq ($(ABS_BOOTDIR),)
    $(error Variable ABS_BOOTDIR must be set to a JDK installation.)
endif
ifeq ($(MAKE_VERBOSE),)
    QUIETLY=@
endif

# Required to construct a whitespace for use with subst
space :=
space +=

# Takes the provider files created by the service-provider annotation
# processor and merges them into the consolidated service registry files.
# Arguments:
#  1: directory with contents of the JAR file
define process_providers
    $(eval providers := $(1)$(PROVIDERS_INF))
    $(eval services := $(1)$(SERVICES_INF))
    $(QUIETLY) test -d $(services) || mkdir -p $(services)
    $(QUIETLY) test ! -d $(providers) || (cd $(providers) && for i in $$(ls); do c=$$(cat $$i); echo $$i >> $(abspath $(services))/$$c; rm $$i; done)
endef

# Folds the generated option descriptors into the consolidated Options
# service and keeps the descriptor files for the options registry.
# Arguments:
#  1: directory with contents of the JAR file
define process_options
    $(eval services := $(1)$(SERVICES_INF))
    $(eval options := $(1)$(OPTIONS_INF))
    $(QUIETLY) test -d $(services) || mkdir -p $(services)
    $(QUIETLY) test ! -d $(options) || (cd $(options) && for i in $$(ls); do echo $${i}_Options >> $(abspath $(services))/jdk.internal.jvmci.options.Options; done)
endef

# Extracts the consolidated registries of a JAR file into a given directory
# Arguments:
#  1: JAR file to extract
#  2: target directory
define extract
    $(eval TMP := $(shell mktemp -d $(TARGET)/tmp_XXXXX))
    $(QUIETLY) mkdir -p $(2);
    $(QUIETLY) cd $(TMP) && $(JAR) xf $(abspath $(1)) && \
        ((test ! -d .$(SERVICES_INF) || cp -r .$(SERVICES_INF) $(abspath $(2))) && (test ! -d .$(OPTIONS_INF) || cp -r .$(OPTIONS_INF) $(abspath $(2))));
    $(QUIETLY) rm -r $(TMP);
    $(QUIETLY) cp $(1) $(2);
endef

# Calls $(JAVAC) with the boot class path $(JDK_BOOTCLASSPATH) and sources taken from the automatic variable $^
# Arguments:
#  1: processorpath
#  2: classpath
#  3: resources to copy
#  4: target JAR file
define build_and_jar
    $(info Building $(4))
    $(eval TMP := $(shell mkdir -p $(TARGET) && mktemp -d $(TARGET)/tmp_XXXXX))
    $(QUIETLY) $(JAVAC) -d $(TMP) -processorpath :$(1) -bootclasspath $(JDK_BOOTCLASSPATH) -cp :$(2) $(filter %.java,$^)
    $(QUIETLY) test "$(3)" = "" || cp -r $(3) $(TMP)
    $(QUIETLY) $(call process_providers,$(TMP))
    $(QUIETLY) $(call process_options,$(TMP))
    $(QUIETLY) mkdir -p $(shell dirname $(4))
    $(QUIETLY) $(JAR) -0cf $(4) -C $(TMP) .
    $(QUIETLY) rm -r $(TMP)
endef

all: default
	$(info Put $(EXPORTED_FILES) into SHARED_DIR $(SHARED_DIR))
	$(QUIETLY) mkdir -p $(SHARED_DIR)
	$(foreach export,$(EXPORTED_FILES),$(call extract,$(export),$(SHARED_DIR)))

export: all
.PHONY: export

clean:
	$(QUIETLY) rm $(JARS) 2> /dev/null || true
	$(QUIETLY) rmdir -p $(dir $(JARS)) 2> /dev/null || true
.PHONY: clean"#
}
