//! Patching the launcher's VM registration file (`jvm.cfg`).
//!
//! The file must stay parseable by the stock JDK launcher: each line is a
//! `#` comment, a `-<name> KNOWN` declaration, or a legacy
//! `-<alias> ALIASED_TO -<name>` declaration. Ordering is load-bearing —
//! launchers pick the first listed entry as the default VM — so new
//! registrations are inserted directly after the leading comment block,
//! ahead of every existing entry.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::fsutil::atomic_write;

/// Candidate locations of the registration file relative to a JDK root,
/// searched in order.
pub fn candidate_paths() -> Vec<PathBuf> {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        other => other,
    };
    vec![
        PathBuf::from("jre/lib/jvm.cfg"),
        Path::new("jre/lib").join(arch).join("jvm.cfg"),
        PathBuf::from("lib/jvm.cfg"),
    ]
}

/// Locate the registration file within a JDK tree.
pub fn locate(jdk_root: &Path) -> Option<PathBuf> {
    candidate_paths()
        .into_iter()
        .map(|rel| jdk_root.join(rel))
        .find(|p| p.is_file())
}

/// One parsed registration-file line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CfgLine {
    /// `#`-prefixed comment, or a blank line.
    Comment,
    /// `-<name> KNOWN`
    Known(String),
    /// `-<alias> ALIASED_TO -<name>`
    Aliased { alias: String, target: String },
    /// Anything else; preserved verbatim, never reordered.
    Other,
}

pub fn parse_line(line: &str) -> CfgLine {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return CfgLine::Comment;
    }
    let mut words = trimmed.split_whitespace();
    match (words.next(), words.next(), words.next(), words.next()) {
        (Some(name), Some("KNOWN"), None, _) if name.starts_with('-') => {
            CfgLine::Known(name[1..].to_string())
        }
        (Some(alias), Some("ALIASED_TO"), Some(target), None)
            if alias.starts_with('-') && target.starts_with('-') =>
        {
            CfgLine::Aliased {
                alias: alias[1..].to_string(),
                target: target[1..].to_string(),
            }
        }
        _ => CfgLine::Other,
    }
}

/// Whether `-<vm> KNOWN` is already present.
pub fn vm_registered(cfg_path: &Path, vm: &str) -> Result<bool> {
    let text = fs::read_to_string(cfg_path)
        .with_context(|| format!("reading {}", cfg_path.display()))?;
    Ok(text
        .lines()
        .any(|line| parse_line(line) == CfgLine::Known(vm.to_string())))
}

/// Register `vm` idempotently.
///
/// Returns `true` when a line was added. If the entry already exists the
/// file is left byte-identical (it is not rewritten at all).
pub fn register_vm(cfg_path: &Path, vm: &str) -> Result<bool> {
    let text = fs::read_to_string(cfg_path)
        .with_context(|| format!("reading {}", cfg_path.display()))?;
    if text
        .lines()
        .any(|line| parse_line(line) == CfgLine::Known(vm.to_string()))
    {
        return Ok(false);
    }

    let lines: Vec<&str> = text.lines().collect();
    let insert_at = lines
        .iter()
        .position(|line| parse_line(line) != CfgLine::Comment)
        .unwrap_or(lines.len());

    let mut out = String::new();
    for (index, line) in lines.iter().enumerate() {
        if index == insert_at {
            out.push('-');
            out.push_str(vm);
            out.push_str(" KNOWN\n");
        }
        out.push_str(line);
        out.push('\n');
    }
    if insert_at == lines.len() {
        out.push('-');
        out.push_str(vm);
        out.push_str(" KNOWN\n");
    }

    atomic_write(cfg_path, out.as_bytes())
        .with_context(|| format!("patching {}", cfg_path.display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const FIXTURE: &str = "\
# List of JVMs that can be used as an option to java.
# The first VM in this file is the default VM.
-server KNOWN
-client ALIASED_TO -server
";

    fn write_cfg(contents: &str) -> (TempDir, PathBuf) {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("jvm.cfg");
        fs::write(&path, contents).unwrap();
        (temp, path)
    }

    #[test]
    fn test_parse_lines() {
        assert_eq!(parse_line("# comment"), CfgLine::Comment);
        assert_eq!(parse_line(""), CfgLine::Comment);
        assert_eq!(parse_line("-server KNOWN"), CfgLine::Known("server".into()));
        assert_eq!(
            parse_line("-client ALIASED_TO -server"),
            CfgLine::Aliased {
                alias: "client".into(),
                target: "server".into()
            }
        );
        assert_eq!(parse_line("-hotspot WARN"), CfgLine::Other);
    }

    #[test]
    fn test_register_existing_vm_is_byte_identical() {
        let (_temp, path) = write_cfg(FIXTURE);
        let before = fs::read(&path).unwrap();
        assert!(!register_vm(&path, "server").unwrap());
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_register_new_vm_inserts_after_comment_block() {
        let (_temp, path) = write_cfg(FIXTURE);
        assert!(register_vm(&path, "jvmci").unwrap());

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# List of JVMs that can be used as an option to java.");
        assert_eq!(lines[1], "# The first VM in this file is the default VM.");
        assert_eq!(lines[2], "-jvmci KNOWN");
        assert_eq!(lines[3], "-server KNOWN");
        assert_eq!(lines[4], "-client ALIASED_TO -server");

        // Exactly one line was added.
        assert_eq!(lines.len(), FIXTURE.lines().count() + 1);
        // And the patch is idempotent.
        let after_first = fs::read(&path).unwrap();
        assert!(!register_vm(&path, "jvmci").unwrap());
        assert_eq!(fs::read(&path).unwrap(), after_first);
    }

    #[test]
    fn test_register_into_comment_only_file() {
        let (_temp, path) = write_cfg("# only comments\n");
        assert!(register_vm(&path, "server").unwrap());
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "# only comments\n-server KNOWN\n");
    }

    #[test]
    fn test_vm_registered_probe() {
        let (_temp, path) = write_cfg(FIXTURE);
        assert!(vm_registered(&path, "server").unwrap());
        assert!(!vm_registered(&path, "jvmci").unwrap());
    }

    #[test]
    fn test_locate_searches_candidates() {
        let temp = TempDir::new().unwrap();
        assert!(locate(temp.path()).is_none());
        let cfg = temp.path().join("jre/lib/jvm.cfg");
        fs::create_dir_all(cfg.parent().unwrap()).unwrap();
        fs::write(&cfg, FIXTURE).unwrap();
        assert_eq!(locate(temp.path()).unwrap(), cfg);
    }
}
