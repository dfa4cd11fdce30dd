//! Build-variant selection: which VM build type and VM flavor a JDK image
//! (and the native artifacts inside it) belongs to.
//!
//! An image directory is keyed by build type alone; native artifact
//! sub-trees within it are keyed additionally by VM flavor. Distribution
//! names and output paths may be templates over both axes
//! (`JVM_<vmbuild>_<vm>`); a template is instantiated by substituting a
//! concrete [`BuildVariant`].

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// VM flavors that can be registered in a JDK image.
pub const VM_CHOICES: &[&str] = &["server", "client"];

/// Legacy VM names accepted on input and resolved before any lookup.
const VM_ALIASES: &[(&str, &str)] = &[("jvmci", "server"), ("graal", "server")];

/// Placeholder for the build-type axis in distribution templates.
pub const VMBUILD_PLACEHOLDER: &str = "<vmbuild>";
/// Placeholder for the VM-flavor axis in distribution templates.
pub const VM_PLACEHOLDER: &str = "<vm>";

/// The VM build types an image directory can be assembled for.
///
/// The first entry is the default build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmBuild {
    Product,
    FastDebug,
    Debug,
    Optimized,
}

impl VmBuild {
    pub const ALL: &'static [VmBuild] = &[
        VmBuild::Product,
        VmBuild::FastDebug,
        VmBuild::Debug,
        VmBuild::Optimized,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VmBuild::Product => "product",
            VmBuild::FastDebug => "fastdebug",
            VmBuild::Debug => "debug",
            VmBuild::Optimized => "optimized",
        }
    }

    pub fn parse(value: &str) -> Result<VmBuild> {
        match value {
            "product" => Ok(VmBuild::Product),
            "fastdebug" => Ok(VmBuild::FastDebug),
            "debug" => Ok(VmBuild::Debug),
            "optimized" => Ok(VmBuild::Optimized),
            other => bail!(
                "unknown VM build '{}'; expected one of: {}",
                other,
                VmBuild::ALL
                    .iter()
                    .map(|b| b.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

impl fmt::Display for VmBuild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve a legacy VM alias to its canonical name.
///
/// Unknown names pass through unchanged; the registration-file patcher and
/// the config loader decide whether they are acceptable.
pub fn dealias_vm(vm: &str) -> &str {
    for (alias, canonical) in VM_ALIASES {
        if *alias == vm {
            eprintln!("VM name '{}' is deprecated, using '{}'", alias, canonical);
            return canonical;
        }
    }
    vm
}

/// The (build type, VM flavor) pair selecting which JDK image and which
/// native artifacts apply.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BuildVariant {
    pub build: VmBuild,
    pub vm: String,
}

impl BuildVariant {
    /// Create a variant, resolving legacy VM aliases.
    pub fn new(build: VmBuild, vm: &str) -> BuildVariant {
        BuildVariant {
            build,
            vm: dealias_vm(vm).to_string(),
        }
    }

    /// Substitute this variant's axes into a name or path template.
    pub fn substitute(&self, template: &str) -> String {
        template
            .replace(VMBUILD_PLACEHOLDER, self.build.as_str())
            .replace(VM_PLACEHOLDER, &self.vm)
    }
}

impl fmt::Display for BuildVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.build, self.vm)
    }
}

/// Whether a name or path still carries unresolved variant placeholders.
pub fn is_template(value: &str) -> bool {
    value.contains(VMBUILD_PLACEHOLDER) || value.contains(VM_PLACEHOLDER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vmbuild_roundtrip() {
        for build in VmBuild::ALL {
            assert_eq!(VmBuild::parse(build.as_str()).unwrap(), *build);
        }
        assert!(VmBuild::parse("release").is_err());
    }

    #[test]
    fn test_dealias() {
        assert_eq!(dealias_vm("jvmci"), "server");
        assert_eq!(dealias_vm("graal"), "server");
        assert_eq!(dealias_vm("server"), "server");
        assert_eq!(dealias_vm("client"), "client");
    }

    #[test]
    fn test_substitute_template() {
        let variant = BuildVariant::new(VmBuild::FastDebug, "server");
        assert_eq!(
            variant.substitute("JVM_<vmbuild>_<vm>"),
            "JVM_fastdebug_server"
        );
        assert_eq!(
            variant.substitute("build/<vmbuild>/hotspot-<vm>.tar"),
            "build/fastdebug/hotspot-server.tar"
        );
        assert!(is_template("jre/lib/<vm>"));
        assert!(!is_template("jre/lib/jvmci"));
    }

    #[test]
    fn test_distinct_bindings_are_distinct_variants() {
        let a = BuildVariant::new(VmBuild::Product, "server");
        let b = BuildVariant::new(VmBuild::FastDebug, "server");
        assert_ne!(a, b);
        assert_eq!(a, BuildVariant::new(VmBuild::Product, "jvmci"));
    }
}
