//! Select, create and activate the project environment.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use devboot_core::config::env_keys::exported;
use devboot_core::config::schema::expand_home;
use devboot_core::config::BootstrapConfig;
use devboot_core::{BootstrapError, Environment};

use super::{environment_name, Backing, VirtualEnvironment};
use crate::effects::{ActionLog, EnvironmentEffects};
use crate::prompt::Prompter;
use crate::runtime::{RuntimeGateway, RuntimeHandle};

pub struct VenvManager<'a> {
    cfg: &'a BootstrapConfig,
    gateway: &'a dyn RuntimeGateway,
    prompter: &'a dyn Prompter,
}

impl<'a> VenvManager<'a> {
    pub fn new(
        cfg: &'a BootstrapConfig,
        gateway: &'a dyn RuntimeGateway,
        prompter: &'a dyn Prompter,
    ) -> Self {
        Self {
            cfg,
            gateway,
            prompter,
        }
    }

    /// Select, create if needed, and activate the project environment.
    pub fn provision(
        &self,
        environment: Environment,
        runtime: &RuntimeHandle,
        actions: &mut ActionLog,
    ) -> Result<(VirtualEnvironment, RuntimeHandle, EnvironmentEffects)> {
        let venv = self.select(environment)?;
        self.ensure(runtime, &venv, actions)?;
        let (active, effects) = activate(runtime, &venv);
        Ok((venv, active, effects))
    }

    /// Local hosts always use the repository-local path. Cluster hosts are
    /// asked for scratch storage, falling back to a confirmed local install.
    pub fn select(&self, environment: Environment) -> Result<VirtualEnvironment> {
        let local = self.cfg.local_venv_path();
        if !environment.is_cluster() {
            tracing::debug!(path = %local.display(), "local host: repository-local environment");
            return Ok(VirtualEnvironment::local(local));
        }

        let name = environment_name(&self.cfg.repo_root);
        let answer = self.prompter.ask(&format!(
            "Scratch directory to host virtual environment '{}' (empty for a local install): ",
            name
        ))?;
        if !answer.is_empty() {
            let target = absolute(expand_home(&answer))?.join(&name);
            tracing::debug!(target = %target.display(), "scratch-backed environment");
            return Ok(VirtualEnvironment::scratch(local, target));
        }

        let confirmed = self.prompter.confirm(&format!(
            "Install the virtual environment locally at {}? [y/N] ",
            local.display()
        ))?;
        if !confirmed {
            return Err(BootstrapError::LocalInstallDeclined.into());
        }
        Ok(VirtualEnvironment::local(local))
    }

    /// Create the environment unless its activation entry point exists, and
    /// for scratch-backed environments point the repository path at it.
    pub fn ensure(&self, runtime: &RuntimeHandle, venv: &VirtualEnvironment, actions: &mut ActionLog) -> Result<()> {
        match &venv.backing {
            Backing::Local => self.create_if_missing(runtime, &venv.path, venv, actions),
            Backing::ScratchLink { target } => {
                let link = inspect_link(&venv.path)?;
                if matches!(link, LinkState::RealPath) {
                    return Err(BootstrapError::ScratchConflict {
                        path: venv.path.clone(),
                    }
                    .into());
                }
                self.create_if_missing(runtime, target, venv, actions)?;
                match link {
                    LinkState::PointsTo(current) if &current == target => {
                        tracing::debug!(link = %venv.path.display(), "scratch symlink already in place");
                    }
                    LinkState::PointsTo(current) => {
                        actions.perform(
                            format!(
                                "relink {} -> {} (was {})",
                                venv.path.display(),
                                target.display(),
                                current.display()
                            ),
                            || {
                                fs::remove_file(&venv.path).context("Remove stale venv symlink")?;
                                symlink_dir(target, &venv.path)
                            },
                        )?;
                    }
                    LinkState::Missing => {
                        actions.perform(
                            format!("link {} -> {}", venv.path.display(), target.display()),
                            || symlink_dir(target, &venv.path),
                        )?;
                    }
                    LinkState::RealPath => unreachable!("rejected above"),
                }
                Ok(())
            }
        }
    }

    fn create_if_missing(
        &self,
        runtime: &RuntimeHandle,
        storage: &Path,
        venv: &VirtualEnvironment,
        actions: &mut ActionLog,
    ) -> Result<()> {
        if venv.is_provisioned() {
            eprintln!("✓ Reusing virtual environment at {}", storage.display());
            return Ok(());
        }
        let created = actions.perform(
            format!("create virtual environment at {}", storage.display()),
            || {
                self.gateway.create_venv(runtime, storage).map_err(|e| {
                    BootstrapError::VenvCreation {
                        path: storage.to_path_buf(),
                        reason: format!("{:#}", e),
                    }
                    .into()
                })
            },
        )?;
        if created.is_some() {
            eprintln!("✓ Created virtual environment at {}", storage.display());
        }
        Ok(())
    }
}

/// Rebind `runtime` to `venv` and describe the exported variables.
pub fn activate(runtime: &RuntimeHandle, venv: &VirtualEnvironment) -> (RuntimeHandle, EnvironmentEffects) {
    let active = runtime.activated(&venv.path);
    let mut effects = EnvironmentEffects::new();
    effects.set(exported::VIRTUAL_ENV, venv.path.to_string_lossy().to_string());
    if let Some(path) = active.overlay.get(exported::PATH) {
        effects.set(exported::PATH, path);
    }
    tracing::debug!(venv = %venv.path.display(), interpreter = %active.interpreter.display(), "activated");
    (active, effects)
}

enum LinkState {
    Missing,
    PointsTo(PathBuf),
    RealPath,
}

fn inspect_link(path: &Path) -> Result<LinkState> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => {
            let current = fs::read_link(path)
                .with_context(|| format!("Failed to read symlink {}", path.display()))?;
            Ok(LinkState::PointsTo(current))
        }
        Ok(_) => Ok(LinkState::RealPath),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LinkState::Missing),
        Err(e) => Err(e).with_context(|| format!("Failed to inspect {}", path.display())),
    }
}

fn absolute(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

#[cfg(unix)]
fn symlink_dir(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link)
        .with_context(|| format!("Failed to link {} -> {}", link.display(), target.display()))
}

#[cfg(windows)]
fn symlink_dir(target: &Path, link: &Path) -> Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
        .with_context(|| format!("Failed to link {} -> {}", link.display(), target.display()))
}
