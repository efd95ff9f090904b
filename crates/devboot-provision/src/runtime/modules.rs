//! Environment-modules integration for cluster hosts.
//!
//! `module` is a shell function, so each call runs in a login shell. A load is
//! captured by dumping the resulting environment and diffing it against ours;
//! the diff becomes the [`EnvOverlay`] for every later subprocess.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::process::Command;

use super::EnvOverlay;

pub trait ModuleSystem {
    /// Load `module` on top of `base` and return the combined overlay.
    fn load(&self, module: &str, base: &EnvOverlay) -> Result<EnvOverlay>;

    /// Available modules whose name starts with `prefix`.
    fn available(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Drives `module` through `bash -lc`.
#[derive(Debug, Clone)]
pub struct ShellModules {
    shell: String,
}

impl Default for ShellModules {
    fn default() -> Self {
        Self {
            shell: "bash".to_string(),
        }
    }
}

impl ShellModules {
    fn script(&self, script: &str, arg: &str, base: &EnvOverlay) -> Command {
        let mut cmd = Command::new(&self.shell);
        // "$1" keeps module names out of shell parsing.
        cmd.args(["-lc", script, "devboot-module", arg]);
        base.apply_to(&mut cmd);
        cmd
    }
}

impl ModuleSystem for ShellModules {
    fn load(&self, module: &str, base: &EnvOverlay) -> Result<EnvOverlay> {
        let out = self
            .script(r#"module load "$1" 1>&2 && env -0"#, module, base)
            .output()
            .context("Failed to start login shell for `module load`")?;
        let stderr = String::from_utf8_lossy(&out.stderr);
        // Tcl environment-modules exits 0 even when a load fails.
        if !out.status.success() || load_reported_error(&stderr) {
            anyhow::bail!("module load {} failed: {}", module, stderr.trim());
        }
        let after = parse_env_dump(&out.stdout);
        let before: BTreeMap<String, String> = std::env::vars().collect();
        Ok(EnvOverlay::diff(&before, &after))
    }

    fn available(&self, prefix: &str) -> Result<Vec<String>> {
        let out = self
            .script(r#"module -t avail "$1" 2>&1"#, prefix, &EnvOverlay::new())
            .output()
            .context("Failed to start login shell for `module avail`")?;
        Ok(parse_avail(&String::from_utf8_lossy(&out.stdout), prefix))
    }
}

fn load_reported_error(stderr: &str) -> bool {
    stderr.lines().any(|l| {
        let l = l.trim_start();
        l.starts_with("ERROR") || l.contains("Unable to locate a modulefile") || l.starts_with("Lmod has detected the following error")
    })
}

/// Parse NUL-separated `env -0` output.
pub fn parse_env_dump(raw: &[u8]) -> BTreeMap<String, String> {
    raw.split(|b| *b == 0)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let entry = String::from_utf8_lossy(entry);
            let (key, value) = entry.split_once('=')?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Parse terse (`-t`) avail output into module names starting with `prefix`.
/// Directory headers (`/path:`) are skipped and `(default)`-style tags stripped.
pub fn parse_avail(output: &str, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.ends_with(':'))
        .map(|l| match l.find('(') {
            Some(idx) => l[..idx].trim_end(),
            None => l,
        })
        .filter(|l| l.starts_with(prefix) && !l.ends_with('/'))
        .map(String::from)
        .collect();
    names.sort();
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_avail_terse_output() {
        let output = "/arm/tools/modulefiles:\n\
                      python/python/3.13.0\n\
                      python/python/3.13.10(default)\n\
                      python/python/3.13.2\n\
                      python/python/2.7.18\n\
                      python/python/\n\
                      gcc/13.2.0\n";
        assert_eq!(
            parse_avail(output, "python/python/3"),
            vec![
                "python/python/3.13.0".to_string(),
                "python/python/3.13.10".to_string(),
                "python/python/3.13.2".to_string(),
            ]
        );
    }

    #[test]
    fn test_parse_env_dump() {
        let raw = b"PATH=/opt/py/bin:/usr/bin\0MODULE_OPT=a=b\0\0";
        let env = parse_env_dump(raw);
        assert_eq!(env.get("PATH").map(String::as_str), Some("/opt/py/bin:/usr/bin"));
        assert_eq!(env.get("MODULE_OPT").map(String::as_str), Some("a=b"));
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn test_load_reported_error() {
        assert!(load_reported_error(
            "ERROR: Unable to locate a modulefile for 'python/python/3.13.1'"
        ));
        assert!(!load_reported_error("Loading python/python/3.13.1\n"));
    }
}
