use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use jvmci_builder::image::check_obsolete_in;
use jvmci_builder::prompt::Decide;
use jvmci_builder::{
    export, load_suite, write_rules, BuildVariant, ImageAssembler, ImageStatus, VmBuild,
};

fn usage() -> &'static str {
    "Usage:\n  \
     jvmci-builder image ensure <suite.toml> <bootstrap-jdk> <images-dir> <vmbuild> <vm>\n  \
     jvmci-builder image check <suite.toml> <bootstrap-jdk> <images-dir> <vmbuild> <vm>\n  \
     jvmci-builder makefile <suite.toml> <vmbuild> <vm> [-o <file>] [dist...]\n  \
     jvmci-builder export <images-dir> <out-dir> <revision>\n  \
     jvmci-builder obsolete <suite.toml> <jdk-root>"
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.as_slice() {
        [image, action, suite, bootstrap, images, vmbuild, vm] if image == "image" => {
            let create = match action.as_str() {
                "ensure" => true,
                "check" => false,
                _ => bail!(usage()),
            };
            ensure_image(
                Path::new(suite),
                Path::new(bootstrap),
                Path::new(images),
                vmbuild,
                vm,
                create,
            )
        }
        [makefile, suite, vmbuild, vm, rest @ ..] if makefile == "makefile" => {
            generate_makefile(Path::new(suite), vmbuild, vm, rest)
        }
        [cmd, images, out, revision] if cmd == "export" => {
            let written = export::export_images(Path::new(images), Path::new(out), revision)?;
            println!("{} archive(s) written", written.len());
            Ok(())
        }
        [cmd, suite, jdk_root] if cmd == "obsolete" => {
            check_obsolete(Path::new(suite), Path::new(jdk_root))
        }
        _ => bail!(usage()),
    }
}

fn ensure_image(
    suite_path: &Path,
    bootstrap: &Path,
    images: &Path,
    vmbuild: &str,
    vm: &str,
    create: bool,
) -> Result<()> {
    let suite = load_suite(suite_path)?;
    let variant = BuildVariant::new(VmBuild::parse(vmbuild)?, vm);
    let assembler = ImageAssembler::new(&suite, bootstrap, images, &revision_from_env());
    match assembler.ensure_image(&variant, create)? {
        ImageStatus::Ready(jdk) => {
            println!("{}", jdk.display());
            Ok(())
        }
        ImageStatus::Missing { build } => bail!(
            "the {} {} VM has not been created; run 'jvmci-builder image ensure {} {} {} {} {}' to build it",
            build,
            variant.vm,
            suite_path.display(),
            bootstrap.display(),
            images.display(),
            build,
            variant.vm
        ),
    }
}

fn generate_makefile(suite_path: &Path, vmbuild: &str, vm: &str, rest: &[String]) -> Result<()> {
    let suite = load_suite(suite_path)?;
    let variant = BuildVariant::new(VmBuild::parse(vmbuild)?, vm);

    let mut output: Option<PathBuf> = None;
    let mut roots = vec![];
    let mut iter = rest.iter();
    while let Some(arg) = iter.next() {
        if arg == "-o" {
            let path = iter
                .next()
                .with_context(|| "-o requires a file argument")?;
            output = Some(PathBuf::from(path));
        } else {
            roots.push(arg.clone());
        }
    }

    let changed = write_rules(&suite, &variant, &roots, output.as_deref())?;
    if changed != 0 {
        println!("{changed} file(s) changed");
    }
    Ok(())
}

fn check_obsolete(suite_path: &Path, jdk_root: &Path) -> Result<()> {
    let suite = load_suite(suite_path)?;
    let report = check_obsolete_in(&suite, jdk_root, &TerminalPrompt)?;
    if report.obsolete.is_empty() {
        println!("no obsolete registry files");
    }
    Ok(())
}

/// Revision recorded in the release metadata; the build driver exports it.
fn revision_from_env() -> String {
    std::env::var("JVMCI_REVISION").unwrap_or_else(|_| "unknown".to_string())
}

/// Terminal-backed confirmation for the obsolete-file deletion offer.
struct TerminalPrompt;

impl Decide for TerminalPrompt {
    fn confirm(&self, question: &str, subject: &str) -> bool {
        print!("{question} {subject}? [y/N] ");
        if io::stdout().flush().is_err() {
            return false;
        }
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim(), "y" | "Y" | "yes")
    }
}
