//! Derived gateway startup configs for non-default ports.
//!
//! The vendor config is YAML, but only the `listenPort:` field is ever
//! touched, by textual substitution, so the rest of the file survives
//! byte-for-byte whatever the vendor puts in it.

use std::path::{Path, PathBuf};

use {regex::Regex, tracing::warn};

use crate::error::SupervisorError;

const LISTEN_PORT_PATTERN: &str = r"(?m)^(?P<prefix>\s*listenPort\s*:\s*)\d+\s*$";

/// Path of the derived config for `port`: `conf.yaml` -> `conf-5002.yaml`.
#[must_use]
pub fn temp_config_path(original: &Path, port: u16) -> PathBuf {
    let stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "conf".into());
    let ext = original
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "yaml".into());
    original.with_file_name(format!("{stem}-{port}.{ext}"))
}

/// Write a sibling of `original` with `listenPort` substituted to `port`.
///
/// Idempotent per port: an existing derived file is overwritten. Errors
/// if the original has no `listenPort` field, since spawning with an
/// unmodified port would silently collide with the occupant.
pub fn with_port(original: &Path, port: u16) -> Result<PathBuf, SupervisorError> {
    let raw = std::fs::read_to_string(original)?;

    let re = Regex::new(LISTEN_PORT_PATTERN)
        .map_err(|e| anyhow::anyhow!("invalid listenPort pattern: {e}"))?;
    if !re.is_match(&raw) {
        return Err(anyhow::anyhow!(
            "no listenPort field in {}",
            original.display()
        )
        .into());
    }

    let rewritten = re.replace(&raw, format!("${{prefix}}{port}"));
    let path = temp_config_path(original, port);
    std::fs::write(&path, rewritten.as_bytes())?;
    Ok(path)
}

/// Delete every derived config next to `original`.
///
/// Runs on every shutdown path; failures are logged, never propagated,
/// so cleanup cannot mask the error that triggered it.
pub fn remove_temp_configs(original: &Path) {
    let Some(dir) = original.parent() else {
        return;
    };
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if is_temp_config(original, &path)
            && let Err(e) = std::fs::remove_file(&path)
        {
            warn!(path = %path.display(), error = %e, "failed to remove derived config");
        }
    }
}

/// Whether `candidate` matches the derived-config naming pattern of
/// `original` (`<stem>-<port>.<ext>`).
fn is_temp_config(original: &Path, candidate: &Path) -> bool {
    let (Some(orig_stem), Some(cand_stem)) = (
        original.file_stem().and_then(|s| s.to_str()),
        candidate.file_stem().and_then(|s| s.to_str()),
    ) else {
        return false;
    };
    if candidate.extension() != original.extension() {
        return false;
    }
    let Some(suffix) = cand_stem.strip_prefix(orig_stem).and_then(|s| s.strip_prefix('-')) else {
        return false;
    };
    !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONF: &str = "ip2loc: \"US\"\nlistenPort: 5000\nlistenSsl: true\nsvcEnvironment: v1\n";

    fn write_conf(dir: &Path) -> PathBuf {
        let path = dir.join("conf.yaml");
        std::fs::write(&path, CONF).unwrap();
        path
    }

    #[test]
    fn rewrites_only_the_listen_port() {
        let dir = tempfile::tempdir().unwrap();
        let original = write_conf(dir.path());

        let derived = with_port(&original, 5002).unwrap();
        assert_eq!(derived, dir.path().join("conf-5002.yaml"));

        let out = std::fs::read_to_string(&derived).unwrap();
        assert!(out.contains("listenPort: 5002"));
        assert!(!out.contains("listenPort: 5000"));
        // Every other line is untouched.
        assert!(out.contains("ip2loc: \"US\""));
        assert!(out.contains("listenSsl: true"));
        assert!(out.contains("svcEnvironment: v1"));
    }

    #[test]
    fn rewrite_is_idempotent_per_port() {
        let dir = tempfile::tempdir().unwrap();
        let original = write_conf(dir.path());

        let first = with_port(&original, 5002).unwrap();
        let second = with_port(&original, 5002).unwrap();
        assert_eq!(first, second);
        let out = std::fs::read_to_string(&second).unwrap();
        assert!(out.contains("listenPort: 5002"));
    }

    #[test]
    fn missing_listen_port_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf.yaml");
        std::fs::write(&path, "listenSsl: true\n").unwrap();
        assert!(with_port(&path, 5002).is_err());
    }

    #[test]
    fn cleanup_removes_all_derived_configs() {
        let dir = tempfile::tempdir().unwrap();
        let original = write_conf(dir.path());

        with_port(&original, 5001).unwrap();
        with_port(&original, 5002).unwrap();
        remove_temp_configs(&original);

        assert!(original.exists());
        assert!(!dir.path().join("conf-5001.yaml").exists());
        assert!(!dir.path().join("conf-5002.yaml").exists());
    }

    #[test]
    fn cleanup_spares_unrelated_files() {
        let dir = tempfile::tempdir().unwrap();
        let original = write_conf(dir.path());
        let unrelated = dir.path().join("conf-backup.yaml");
        std::fs::write(&unrelated, "x").unwrap();
        let other_ext = dir.path().join("conf-5002.bak");
        std::fs::write(&other_ext, "x").unwrap();

        remove_temp_configs(&original);
        assert!(unrelated.exists());
        assert!(other_ext.exists());
    }

    #[test]
    fn indented_listen_port_is_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf.yaml");
        std::fs::write(&path, "server:\n  listenPort: 5000\n").unwrap();

        let derived = with_port(&path, 5007).unwrap();
        let out = std::fs::read_to_string(&derived).unwrap();
        assert!(out.contains("  listenPort: 5007"));
    }
}
