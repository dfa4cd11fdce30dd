//! Best-effort patching of the JDK release-metadata file.
//!
//! The `release` file holds `KEY="value"` lines. Only the `SOURCE` key is
//! touched: its value is a space-separated list of `component:revision`
//! tokens. The `hotspot` token is superseded by the deployed VM and is
//! dropped; a `jvmci:<revision>` token is upserted. Relative token order
//! is otherwise preserved. Metadata patching must never abort image
//! assembly, so any line that does not parse is written back unchanged.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::fsutil::atomic_write;

/// Patch the `SOURCE` line of `release_path`, recording `revision` for the
/// `jvmci` component. Returns `true` when the file content changed.
pub fn patch_source_revision(release_path: &Path, revision: &str) -> Result<bool> {
    let text = fs::read_to_string(release_path)
        .with_context(|| format!("reading {}", release_path.display()))?;

    let mut out = String::new();
    let mut changed = false;
    for line in text.lines() {
        match rewrite_source_line(line, revision) {
            Some(rewritten) => {
                if rewritten != line {
                    changed = true;
                }
                out.push_str(&rewritten);
            }
            None => out.push_str(line),
        }
        out.push('\n');
    }

    if changed {
        atomic_write(release_path, out.as_bytes())
            .with_context(|| format!("patching {}", release_path.display()))?;
        println!("Updating {}", release_path.display());
    }
    Ok(changed)
}

/// Rewrite one line if it is a well-formed `SOURCE="..."` entry.
///
/// `None` means "not the SOURCE line or not parseable — keep verbatim".
fn rewrite_source_line(line: &str, revision: &str) -> Option<String> {
    let trimmed = line.trim();
    let value = trimmed
        .strip_prefix("SOURCE=\"")
        .and_then(|rest| rest.strip_suffix('"'))?;

    let mut tokens: Vec<(String, String)> = vec![];
    for token in value.split(' ') {
        if token.is_empty() {
            continue;
        }
        let idx = token.find(':')?;
        tokens.push((token[..idx].to_string(), token[idx + 1..].to_string()));
    }

    tokens.retain(|(component, _)| component != "hotspot");
    match tokens.iter_mut().find(|(component, _)| component == "jvmci") {
        Some(entry) => entry.1 = revision.to_string(),
        None => tokens.push(("jvmci".to_string(), revision.to_string())),
    }

    let joined = tokens
        .iter()
        .map(|(component, rev)| format!("{component}:{rev}"))
        .collect::<Vec<_>>()
        .join(" ");
    Some(format!("SOURCE=\"{joined}\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_release(contents: &str) -> (TempDir, std::path::PathBuf) {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("release");
        fs::write(&path, contents).unwrap();
        (temp, path)
    }

    #[test]
    fn test_hotspot_dropped_and_jvmci_appended() {
        let (_temp, path) = write_release(
            "JAVA_VERSION=\"1.8.0\"\nSOURCE=\"corba:ab12 hotspot:cd34 jdk:ef56\"\n",
        );
        assert!(patch_source_revision(&path, "0123abcd").unwrap());
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "JAVA_VERSION=\"1.8.0\"\nSOURCE=\"corba:ab12 jdk:ef56 jvmci:0123abcd\"\n"
        );
    }

    #[test]
    fn test_existing_jvmci_token_replaced_in_place() {
        let (_temp, path) =
            write_release("SOURCE=\"jvmci:old corba:ab12\"\n");
        assert!(patch_source_revision(&path, "new").unwrap());
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "SOURCE=\"jvmci:new corba:ab12\"\n"
        );
        // Second pass with the same revision changes nothing.
        assert!(!patch_source_revision(&path, "new").unwrap());
    }

    #[test]
    fn test_malformed_source_line_is_preserved() {
        let original = "SOURCE=\"no-colon-token another\"\nOS_NAME=\"Linux\"\n";
        let (_temp, path) = write_release(original);
        assert!(!patch_source_revision(&path, "rev").unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), original);
    }

    #[test]
    fn test_other_keys_untouched() {
        let (_temp, path) = write_release("OS_NAME=\"Linux\"\nOS_ARCH=\"amd64\"\n");
        assert!(!patch_source_revision(&path, "rev").unwrap());
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "OS_NAME=\"Linux\"\nOS_ARCH=\"amd64\"\n"
        );
    }
}
