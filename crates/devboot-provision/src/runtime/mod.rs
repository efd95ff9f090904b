//! Interpreter identity and the seams used to drive it.
//!
//! - `gateway`: [`RuntimeGateway`], every interpreter / pip subprocess
//! - `modules`: [`ModuleSystem`], cluster `module load` / `module avail`
//! - `validator`: selects and checks the interpreter for the detected host

pub mod gateway;
pub mod modules;
pub mod validator;

pub use gateway::{InstallOptions, ProcessGateway, RuntimeGateway};
pub use modules::{ModuleSystem, ShellModules};
pub use validator::validate_runtime;

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use devboot_core::config::env_keys::exported;

/// Environment changes layered on top of the process environment for every
/// interpreter subprocess (module loads, venv activation).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverlay {
    vars: BTreeMap<String, String>,
    removed: BTreeSet<String>,
}

impl EnvOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.removed.remove(&key);
        self.vars.insert(key, value.into());
    }

    pub fn unset(&mut self, key: impl Into<String>) {
        let key = key.into();
        self.vars.remove(&key);
        self.removed.insert(key);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty() && self.removed.is_empty()
    }

    /// PATH as children will see it.
    pub fn search_path(&self) -> Option<OsString> {
        match self.vars.get(exported::PATH) {
            Some(p) => Some(OsString::from(p)),
            None => std::env::var_os(exported::PATH),
        }
    }

    pub fn apply_to(&self, cmd: &mut Command) {
        for key in &self.removed {
            cmd.env_remove(key);
        }
        cmd.envs(&self.vars);
    }

    /// Overlay that turns `before` into `after`. Shell bookkeeping variables are ignored.
    pub fn diff(before: &BTreeMap<String, String>, after: &BTreeMap<String, String>) -> Self {
        let mut overlay = Self::new();
        for (key, value) in after {
            if is_shell_noise(key) {
                continue;
            }
            if before.get(key) != Some(value) {
                overlay.set(key.clone(), value.clone());
            }
        }
        for key in before.keys() {
            if !after.contains_key(key) && !is_shell_noise(key) {
                overlay.unset(key.clone());
            }
        }
        overlay
    }
}

fn is_shell_noise(key: &str) -> bool {
    matches!(key, "_" | "SHLVL" | "PWD" | "OLDPWD") || key.starts_with("BASH_FUNC_")
}

/// The interpreter selected for this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeHandle {
    /// Reported version string, e.g. "Python 3.13.1".
    pub version: String,
    /// Invocation name or absolute path.
    pub interpreter: PathBuf,
    pub overlay: EnvOverlay,
    /// Set when the handle is bound to a virtual environment.
    pub venv: Option<PathBuf>,
}

impl RuntimeHandle {
    pub fn new(interpreter: impl Into<PathBuf>, overlay: EnvOverlay) -> Self {
        Self {
            version: String::new(),
            interpreter: interpreter.into(),
            overlay,
            venv: None,
        }
    }

    /// The same runtime rebound to the environment rooted at `venv_dir`:
    /// its interpreter, `VIRTUAL_ENV`, and its `bin` directory first on `PATH`.
    pub fn activated(&self, venv_dir: &Path) -> Self {
        let bin = venv_bin_dir(venv_dir);
        let mut overlay = self.overlay.clone();
        let mut path = vec![bin.clone()];
        if let Some(current) = self.overlay.search_path() {
            path.extend(std::env::split_paths(&current));
        }
        if let Ok(joined) = std::env::join_paths(path) {
            overlay.set(exported::PATH, joined.to_string_lossy().to_string());
        }
        overlay.set(exported::VIRTUAL_ENV, venv_dir.to_string_lossy().to_string());
        overlay.unset("PYTHONHOME");
        Self {
            version: self.version.clone(),
            interpreter: venv_python(venv_dir),
            overlay,
            venv: Some(venv_dir.to_path_buf()),
        }
    }

    pub fn in_venv(&self) -> bool {
        self.venv.is_some()
    }
}

/// `bin` on Unix, `Scripts` on Windows.
pub fn venv_bin_dir(venv_dir: &Path) -> PathBuf {
    if cfg!(windows) {
        venv_dir.join("Scripts")
    } else {
        venv_dir.join("bin")
    }
}

pub fn venv_python(venv_dir: &Path) -> PathBuf {
    if cfg!(windows) {
        venv_bin_dir(venv_dir).join("python.exe")
    } else {
        venv_bin_dir(venv_dir).join("python")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_diff_ignores_shell_noise() {
        let before = map(&[("PATH", "/usr/bin"), ("HOME", "/home/u"), ("OLD", "1")]);
        let after = map(&[
            ("PATH", "/opt/python/3.13.1/bin:/usr/bin"),
            ("HOME", "/home/u"),
            ("LOADEDMODULES", "python/python/3.13.1"),
            ("SHLVL", "2"),
            ("BASH_FUNC_module%%", "() { ... }"),
        ]);
        let overlay = EnvOverlay::diff(&before, &after);
        assert_eq!(overlay.get("PATH"), Some("/opt/python/3.13.1/bin:/usr/bin"));
        assert_eq!(overlay.get("LOADEDMODULES"), Some("python/python/3.13.1"));
        assert_eq!(overlay.get("HOME"), None);
        assert_eq!(overlay.get("SHLVL"), None);
        assert!(overlay.removed.contains("OLD"));
    }

    #[cfg(unix)]
    #[test]
    fn test_activated_rebinds_interpreter_and_path() {
        let mut overlay = EnvOverlay::new();
        overlay.set("PATH", "/opt/py/bin:/usr/bin");
        let mut base = RuntimeHandle::new("python3.13", overlay);
        base.version = "Python 3.13.1".to_string();

        let venv = base.activated(Path::new("/work/repo/.venv"));
        assert_eq!(venv.interpreter, PathBuf::from("/work/repo/.venv/bin/python"));
        assert_eq!(venv.overlay.get("PATH"), Some("/work/repo/.venv/bin:/opt/py/bin:/usr/bin"));
        assert_eq!(venv.overlay.get("VIRTUAL_ENV"), Some("/work/repo/.venv"));
        assert_eq!(venv.version, "Python 3.13.1");
        assert!(venv.in_venv());
        assert!(!base.in_venv());
    }
}
