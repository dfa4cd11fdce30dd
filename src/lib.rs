//! Infrastructure for assembling JVMCI-enabled JDK images and generating
//! standalone build makefiles.
//!
//! This crate covers the two halves of materializing a build graph:
//!
//! - **Image assembly** - clone a bootstrap JDK, patch its VM registration
//!   and release metadata, install freshly built jar/native artifacts, and
//!   consolidate service-provider registries scattered across the jars
//! - **Build-rule generation** - walk the same dependency graph and emit a
//!   dependency-ordered makefile that reproduces the build without this
//!   tool present
//!
//! # Architecture
//!
//! ```text
//! suite (dependency graph model)
//!     │
//!     ├── image ──> deploy ──> services     (runtime path: JDK trees)
//!     └── makefile                          (offline path: generated rules)
//!
//! export archives existing images; prompt routes the few interactive
//! decisions; fsutil carries the atomic-rename and permission primitives
//! everything else relies on.
//! ```
//!
//! All installation goes through write-to-temp-then-rename: a process
//! reading an artifact that is being replaced sees either the old or the
//! new bytes, never a truncated file. Every operation is safe to re-run;
//! registries and rules are rebuilt from scratch rather than updated
//! incrementally.

pub mod deploy;
pub mod export;
pub mod fsutil;
pub mod image;
pub mod makefile;
pub mod prompt;
pub mod services;
pub mod suite;
pub mod variant;

pub use deploy::{DeployOutcome, Deployer};
pub use image::{ImageAssembler, ImageStatus};
pub use makefile::{build_rules, write_rules, Makefile};
pub use prompt::{Decide, NonInteractive};
pub use services::{merge_into, MergeReport};
pub use suite::config::load_suite;
pub use suite::{DeploySpec, Distribution, Library, Project, Suite};
pub use variant::{BuildVariant, VmBuild};
