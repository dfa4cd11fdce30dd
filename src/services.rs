//! Consolidation of provider-registration metadata scattered across
//! deployed jars.
//!
//! Three namespaces inside each jar contribute:
//!
//! - `META-INF/jvmci.services/<service>` — pre-merged style: one provider
//!   class name per line.
//! - `META-INF/jvmci.providers/<provider>` — provider-list style: each line
//!   names a service the provider registers for.
//! - `META-INF/jvmci.options/<owner>` — option descriptors: the member is
//!   copied into the options directory and contributes the derived provider
//!   `<owner>_Options` to the consolidated `Options` service.
//!
//! Registries are rebuilt from scratch on every pass; there is no
//! incremental state. Staleness is detected by diffing on-disk file names
//! against the freshly computed set after the whole pass completes, and
//! files are only ever deleted when the caller's [`Decide`] confirms each
//! one.

use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::fsutil::atomic_write;
use crate::prompt::Decide;

/// Jar namespace holding pre-merged service registrations.
pub const SERVICES_PREFIX: &str = "META-INF/jvmci.services/";
/// Jar namespace holding per-provider registration files.
pub const PROVIDERS_PREFIX: &str = "META-INF/jvmci.providers/";
/// Jar namespace holding generated option descriptors.
pub const OPTIONS_PREFIX: &str = "META-INF/jvmci.options/";
/// The consolidated service fed by option descriptors.
pub const OPTIONS_SERVICE: &str = "jdk.internal.jvmci.options.Options";

/// Outcome of one merge pass.
#[derive(Debug, Clone, Default)]
pub struct MergeReport {
    /// Service registry file names regenerated by this pass (sorted).
    pub services: Vec<String>,
    /// Option descriptor file names regenerated by this pass (sorted).
    pub options: Vec<String>,
    /// Files present on disk that no jar regenerated. Only populated in
    /// `obsolete_check` mode.
    pub obsolete: Vec<PathBuf>,
    /// Jars that could not be read and contributed nothing.
    pub skipped_jars: Vec<PathBuf>,
}

/// Merge the registration metadata of `jar_paths` into `services_dir` and
/// `options_dir`.
///
/// With `obsolete_check` set, nothing is written: the pass computes the
/// full regenerated set, reports file names that would no longer be
/// produced, and offers each one for deletion through `decide` (the
/// default implementation refuses, making the mode read-only).
pub fn merge_into(
    jar_paths: &[PathBuf],
    services_dir: &Path,
    options_dir: &Path,
    obsolete_check: bool,
    decide: &dyn Decide,
) -> Result<MergeReport> {
    let mut registry: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut option_payloads: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    let mut skipped_jars = vec![];

    for jar in jar_paths {
        if let Err(err) = scan_jar(jar, &mut registry, &mut option_payloads) {
            eprintln!("Skipping unreadable jar {}: {err:#}", jar.display());
            skipped_jars.push(jar.clone());
        }
    }

    let services: Vec<String> = registry.keys().cloned().collect();
    let options: Vec<String> = option_payloads.keys().cloned().collect();

    if obsolete_check {
        let mut obsolete = vec![];
        collect_obsolete(services_dir, &services, &mut obsolete)?;
        collect_obsolete(options_dir, &options, &mut obsolete)?;
        for path in &obsolete {
            println!("{} looks obsolete", path.display());
            if decide.confirm("Delete file", &path.display().to_string()) {
                fs::remove_file(path)
                    .with_context(|| format!("Failed to delete {}", path.display()))?;
            }
        }
        return Ok(MergeReport {
            services,
            options,
            obsolete,
            skipped_jars,
        });
    }

    for (service, providers) in &registry {
        let mut contents = String::new();
        for provider in providers {
            contents.push_str(provider);
            contents.push('\n');
        }
        atomic_write(&services_dir.join(service), contents.as_bytes())
            .with_context(|| format!("writing service registry '{service}'"))?;
    }
    for (name, payload) in &option_payloads {
        atomic_write(&options_dir.join(name), payload)
            .with_context(|| format!("writing option descriptor '{name}'"))?;
    }

    Ok(MergeReport {
        services,
        options,
        obsolete: vec![],
        skipped_jars,
    })
}

/// Accumulate one jar's contributions. Any error aborts only this jar.
fn scan_jar(
    jar: &Path,
    registry: &mut BTreeMap<String, BTreeSet<String>>,
    option_payloads: &mut BTreeMap<String, Vec<u8>>,
) -> Result<()> {
    let file = fs::File::open(jar).with_context(|| format!("opening {}", jar.display()))?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))
        .with_context(|| format!("reading jar {}", jar.display()))?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .with_context(|| format!("reading entry {index} of {}", jar.display()))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();

        if let Some(service) = entry_basename(&name, SERVICES_PREFIX) {
            let mut text = String::new();
            entry
                .read_to_string(&mut text)
                .with_context(|| format!("reading {name}"))?;
            let providers = registry.entry(service).or_default();
            for line in text.lines() {
                let line = line.trim();
                if !line.is_empty() {
                    providers.insert(line.to_string());
                }
            }
        } else if let Some(provider) = entry_basename(&name, PROVIDERS_PREFIX) {
            let mut text = String::new();
            entry
                .read_to_string(&mut text)
                .with_context(|| format!("reading {name}"))?;
            for line in text.lines() {
                let service = line.trim();
                if !service.is_empty() {
                    registry
                        .entry(service.to_string())
                        .or_default()
                        .insert(provider.clone());
                }
            }
        } else if let Some(owner) = entry_basename(&name, OPTIONS_PREFIX) {
            let mut payload = vec![];
            entry
                .read_to_end(&mut payload)
                .with_context(|| format!("reading {name}"))?;
            option_payloads.insert(owner.clone(), payload);
            registry
                .entry(OPTIONS_SERVICE.to_string())
                .or_default()
                .insert(format!("{owner}_Options"));
        }
    }
    Ok(())
}

/// The member's file name if it sits directly under `prefix`.
fn entry_basename(entry_name: &str, prefix: &str) -> Option<String> {
    let rest = entry_name.strip_prefix(prefix)?;
    if rest.is_empty() || rest.contains('/') {
        return None;
    }
    Some(rest.to_string())
}

/// File names in `dir` that this pass did not regenerate.
fn collect_obsolete(dir: &Path, regenerated: &[String], out: &mut Vec<PathBuf>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    let mut stale = vec![];
    for entry in fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !regenerated.iter().any(|r| *r == name) {
            stale.push(entry.path());
        }
    }
    stale.sort();
    out.extend(stale);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::{AnswerSheet, NonInteractive};
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn write_jar(path: &Path, entries: &[(&str, &str)]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, contents) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    const SERVICE: &str = "jdk.internal.jvmci.service.Demo";

    #[test]
    fn test_union_across_jars_is_order_independent() {
        let temp = TempDir::new().unwrap();
        let jars = [
            temp.path().join("a.jar"),
            temp.path().join("b.jar"),
            temp.path().join("c.jar"),
        ];
        write_jar(
            &jars[0],
            &[(&format!("{SERVICES_PREFIX}{SERVICE}"), "A\nB\n")],
        );
        write_jar(
            &jars[1],
            &[(&format!("{SERVICES_PREFIX}{SERVICE}"), "B\nC\n")],
        );
        write_jar(&jars[2], &[(&format!("{SERVICES_PREFIX}{SERVICE}"), "\n")]);

        let services = temp.path().join("services");
        let options = temp.path().join("options");

        let mut orders = vec![
            vec![jars[0].clone(), jars[1].clone(), jars[2].clone()],
            vec![jars[2].clone(), jars[1].clone(), jars[0].clone()],
        ];
        for order in orders.drain(..) {
            merge_into(&order, &services, &options, false, &NonInteractive).unwrap();
            assert_eq!(
                fs::read_to_string(services.join(SERVICE)).unwrap(),
                "A\nB\nC\n"
            );
        }
    }

    #[test]
    fn test_provider_list_style_contributes() {
        let temp = TempDir::new().unwrap();
        let jar = temp.path().join("providers.jar");
        write_jar(
            &jar,
            &[(
                &format!("{PROVIDERS_PREFIX}com.example.DemoProvider"),
                &format!("{SERVICE}\n"),
            )],
        );

        let services = temp.path().join("services");
        let options = temp.path().join("options");
        merge_into(&[jar], &services, &options, false, &NonInteractive).unwrap();

        assert_eq!(
            fs::read_to_string(services.join(SERVICE)).unwrap(),
            "com.example.DemoProvider\n"
        );
    }

    #[test]
    fn test_option_descriptors_fold_into_options_service() {
        let temp = TempDir::new().unwrap();
        let jar = temp.path().join("opts.jar");
        write_jar(
            &jar,
            &[(
                &format!("{OPTIONS_PREFIX}com.example.Compiler"),
                "PrintGraphs\n",
            )],
        );

        let services = temp.path().join("services");
        let options = temp.path().join("options");
        merge_into(&[jar], &services, &options, false, &NonInteractive).unwrap();

        assert_eq!(
            fs::read_to_string(options.join("com.example.Compiler")).unwrap(),
            "PrintGraphs\n"
        );
        assert_eq!(
            fs::read_to_string(services.join(OPTIONS_SERVICE)).unwrap(),
            "com.example.Compiler_Options\n"
        );
    }

    #[test]
    fn test_obsolete_check_reports_without_deleting() {
        let temp = TempDir::new().unwrap();
        let jar = temp.path().join("a.jar");
        write_jar(&jar, &[(&format!("{SERVICES_PREFIX}{SERVICE}"), "A\n")]);

        let services = temp.path().join("services");
        let options = temp.path().join("options");
        fs::create_dir_all(&services).unwrap();
        fs::write(services.join("stale.Service"), "Old\n").unwrap();
        fs::write(services.join(SERVICE), "A\n").unwrap();

        let report = merge_into(
            &[jar.clone()],
            &services,
            &options,
            true,
            &NonInteractive,
        )
        .unwrap();

        assert_eq!(report.obsolete, vec![services.join("stale.Service")]);
        // Refused: still present, and the live registry was not rewritten.
        assert!(services.join("stale.Service").exists());

        // Confirmed: deleted.
        merge_into(&[jar], &services, &options, true, &AnswerSheet(true)).unwrap();
        assert!(!services.join("stale.Service").exists());
        assert!(services.join(SERVICE).exists());
    }

    #[test]
    fn test_unreadable_jar_is_skipped_not_fatal() {
        let temp = TempDir::new().unwrap();
        let good = temp.path().join("good.jar");
        write_jar(&good, &[(&format!("{SERVICES_PREFIX}{SERVICE}"), "A\n")]);
        let garbage = temp.path().join("garbage.jar");
        fs::write(&garbage, "not a zip").unwrap();
        let missing = temp.path().join("missing.jar");

        let services = temp.path().join("services");
        let options = temp.path().join("options");
        let report = merge_into(
            &[garbage.clone(), missing.clone(), good],
            &services,
            &options,
            false,
            &NonInteractive,
        )
        .unwrap();

        assert_eq!(report.skipped_jars, vec![garbage, missing]);
        assert_eq!(
            fs::read_to_string(services.join(SERVICE)).unwrap(),
            "A\n"
        );
    }
}
