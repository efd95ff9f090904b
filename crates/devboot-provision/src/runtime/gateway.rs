//! RuntimeGateway: every interaction with the interpreter and its package tool.
//!
//! The provisioner, validator and venv manager only talk to the runtime through
//! this trait, so they can be driven by a fake in tests.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use super::{EnvOverlay, RuntimeHandle};

/// Flags for a single `pip install`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallOptions {
    /// Install into the user site (`--user`); ignored inside a venv.
    pub user: bool,
    pub upgrade: bool,
    pub force_reinstall: bool,
}

pub trait RuntimeGateway {
    /// Resolve an interpreter name against the overlay's PATH.
    fn locate_interpreter(&self, name: &str, overlay: &EnvOverlay) -> Option<PathBuf>;

    /// Version string reported by the interpreter, e.g. "Python 3.13.1".
    fn resolve_version(&self, runtime: &RuntimeHandle) -> Result<String>;

    fn package_importable(&self, runtime: &RuntimeHandle, package: &str) -> bool;

    fn install_package(&self, runtime: &RuntimeHandle, package: &str, opts: InstallOptions) -> Result<()>;

    /// Path of the CA bundle the trust package hands to TLS clients.
    fn query_trust_bundle_path(&self, runtime: &RuntimeHandle, package: &str) -> Result<PathBuf>;

    fn create_venv(&self, runtime: &RuntimeHandle, path: &Path) -> Result<()>;

    fn install_requirements(&self, runtime: &RuntimeHandle, manifest: &Path) -> Result<()>;
}

/// Runs real subprocesses.
#[derive(Debug, Default, Clone)]
pub struct ProcessGateway;

impl ProcessGateway {
    fn command(&self, runtime: &RuntimeHandle) -> Command {
        let mut cmd = Command::new(&runtime.interpreter);
        runtime.overlay.apply_to(&mut cmd);
        cmd
    }

    fn output(&self, runtime: &RuntimeHandle, args: &[&str]) -> Result<Output> {
        let mut cmd = self.command(runtime);
        cmd.args(args);
        tracing::debug!(interpreter = %runtime.interpreter.display(), ?args, "running");
        cmd.output()
            .with_context(|| format!("Failed to run {}", runtime.interpreter.display()))
    }
}

impl RuntimeGateway for ProcessGateway {
    fn locate_interpreter(&self, name: &str, overlay: &EnvOverlay) -> Option<PathBuf> {
        let cwd = std::env::current_dir().ok()?;
        which::which_in(name, overlay.search_path(), cwd).ok()
    }

    fn resolve_version(&self, runtime: &RuntimeHandle) -> Result<String> {
        let out = self.output(runtime, &["--version"])?;
        if !out.status.success() {
            anyhow::bail!(
                "{} --version failed: {}",
                runtime.interpreter.display(),
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        // Python 2 printed the version on stderr.
        let text = if out.stdout.is_empty() {
            String::from_utf8_lossy(&out.stderr).to_string()
        } else {
            String::from_utf8_lossy(&out.stdout).to_string()
        };
        Ok(text.trim().to_string())
    }

    fn package_importable(&self, runtime: &RuntimeHandle, package: &str) -> bool {
        let code = format!("import {}", package);
        self.output(runtime, &["-c", code.as_str()])
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    fn install_package(&self, runtime: &RuntimeHandle, package: &str, opts: InstallOptions) -> Result<()> {
        let mut args = vec!["-m", "pip", "install", "--disable-pip-version-check"];
        if opts.user && !runtime.in_venv() {
            args.push("--user");
        }
        if opts.upgrade {
            args.push("--upgrade");
        }
        if opts.force_reinstall {
            args.push("--force-reinstall");
        }
        args.push(package);
        let out = self.output(runtime, &args).context("pip install")?;
        if !out.status.success() {
            anyhow::bail!(
                "pip install {} failed: {}",
                package,
                last_lines(&String::from_utf8_lossy(&out.stderr), 3)
            );
        }
        Ok(())
    }

    fn query_trust_bundle_path(&self, runtime: &RuntimeHandle, package: &str) -> Result<PathBuf> {
        let code = format!("import {p}; print({p}.where())", p = package);
        let out = self.output(runtime, &["-c", code.as_str()])?;
        if !out.status.success() {
            anyhow::bail!(
                "{}.where() failed: {}",
                package,
                last_lines(&String::from_utf8_lossy(&out.stderr), 1)
            );
        }
        let reported = String::from_utf8_lossy(&out.stdout).trim().to_string();
        if reported.is_empty() {
            anyhow::bail!("{}.where() printed nothing", package);
        }
        let path = PathBuf::from(reported);
        if !path.is_file() {
            anyhow::bail!("{}.where() points at missing file {}", package, path.display());
        }
        Ok(path)
    }

    fn create_venv(&self, runtime: &RuntimeHandle, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Create venv parent dir")?;
        }
        let target = path.to_string_lossy().to_string();
        let out = self
            .output(runtime, &["-m", "venv", target.as_str()])
            .context("Create venv")?;
        if !out.status.success() {
            anyhow::bail!("venv failed: {}", last_lines(&String::from_utf8_lossy(&out.stderr), 3));
        }
        Ok(())
    }

    fn install_requirements(&self, runtime: &RuntimeHandle, manifest: &Path) -> Result<()> {
        // Long-running: let pip's progress reach the terminal.
        let status = self
            .command(runtime)
            .args(["-m", "pip", "install", "--disable-pip-version-check", "-r"])
            .arg(manifest)
            .stdin(Stdio::null())
            .status()
            .context("pip install -r")?;
        if !status.success() {
            anyhow::bail!("pip exited with {}", status);
        }
        Ok(())
    }
}

fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join(" | ")
}
