//! Runs the bootstrap stages in order: detect, validate the runtime, provision
//! the root CA, then (unless `--cert`) the project environment and its
//! dependencies. Environment effects are applied before pip runs, and again
//! if the dependency install moves the trust bundle.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use devboot_core::config::env_keys::exported;
use devboot_core::config::BootstrapConfig;
use devboot_core::{BootstrapError, Environment, RunConfig};

use crate::certs::{bundle, trust_effects, CertSource, CertificateBundle, CertificateProvisioner};
use crate::effects::{ActionLog, EffectSink, EnvironmentEffects};
use crate::prompt::Prompter;
use crate::runtime::{validate_runtime, InstallOptions, ModuleSystem, RuntimeGateway, RuntimeHandle};
use crate::venv::manager::activate;
use crate::venv::{VenvManager, VirtualEnvironment};

/// External collaborators of a run.
pub struct Services<'a> {
    pub gateway: &'a dyn RuntimeGateway,
    pub modules: &'a dyn ModuleSystem,
    pub certs: &'a dyn CertSource,
    pub prompter: &'a dyn Prompter,
    pub sink: &'a dyn EffectSink,
    /// Decides whether a system trust bundle may be appended to.
    pub writable: fn(&Path) -> bool,
}

impl<'a> Services<'a> {
    pub fn new(
        gateway: &'a dyn RuntimeGateway,
        modules: &'a dyn ModuleSystem,
        certs: &'a dyn CertSource,
        prompter: &'a dyn Prompter,
        sink: &'a dyn EffectSink,
    ) -> Self {
        Self {
            gateway,
            modules,
            certs,
            prompter,
            sink,
            writable: bundle::is_writable,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Outcome {
    pub environment: Environment,
    pub runtime: RuntimeHandle,
    /// Bundles holding (or under dry-run, planned to hold) the root CA.
    pub bundles: Vec<CertificateBundle>,
    /// `None` for `--cert` runs that did not need a local environment.
    pub venv: Option<VirtualEnvironment>,
    pub effects: EnvironmentEffects,
    /// Actions skipped under dry-run.
    pub planned: Vec<String>,
}

pub struct Bootstrap<'a> {
    run: RunConfig,
    cfg: &'a BootstrapConfig,
    services: Services<'a>,
}

impl<'a> Bootstrap<'a> {
    pub fn new(run: RunConfig, cfg: &'a BootstrapConfig, services: Services<'a>) -> Self {
        Self { run, cfg, services }
    }

    pub fn run(&self) -> Result<Outcome> {
        let s = &self.services;
        let mut actions = ActionLog::new(self.run.dry_run);
        if self.run.dry_run {
            eprintln!("[dry-run] No changes will be made");
        }

        let environment = Environment::detect(&self.cfg.cluster_marker);
        eprintln!("Detected {} environment", environment);
        tracing::info!(
            %environment,
            repo = %self.cfg.repo_root.display(),
            dry_run = self.run.dry_run,
            cert_only = self.run.cert_only,
            "bootstrap starting"
        );

        let runtime = validate_runtime(environment, self.cfg, s.gateway, s.modules)?;

        let venvs = VenvManager::new(self.cfg, s.gateway, s.prompter);
        let provisioner =
            CertificateProvisioner::new(self.cfg, environment, s.gateway, s.certs, &venvs, s.writable);
        let trust = provisioner.provision(&runtime, &mut actions)?;
        let mut effects = trust.effects.clone();
        let mut bundles = trust.bundles.clone();

        if self.run.cert_only {
            // A local fallback environment created for the CA stays active.
            if let Some(venv) = &trust.activated_venv {
                let (_, venv_effects) = activate(&runtime, venv);
                effects.merge(venv_effects);
            }
            self.export(&effects, &mut actions)?;
            eprintln!("✓ Certificate setup complete (--cert: skipping virtual environment)");
            self.summarize(environment, &effects, &actions);
            return Ok(Outcome {
                environment,
                runtime: trust.runtime,
                bundles,
                venv: trust.activated_venv,
                effects,
                planned: actions.planned().to_vec(),
            });
        }

        let (venv, active, venv_effects) = match trust.activated_venv {
            Some(venv) => {
                tracing::debug!(venv = %venv.path.display(), "reusing environment activated for the CA");
                let (active, venv_effects) = activate(&runtime, &venv);
                (venv, active, venv_effects)
            }
            None => venvs.provision(environment, &runtime, &mut actions)?,
        };
        effects.merge(venv_effects);

        // TLS clients inside the activated environment read its own bundle.
        let pem = trust.pem.as_deref();
        if let Some(b) = provisioner.secure_environment(&active, &venv, pem, &mut actions)? {
            effects.merge(trust_effects(&b.path));
            push_unique(&mut bundles, b);
        }

        self.export(&effects, &mut actions)?;
        self.install_dependencies(&active, &mut actions)?;

        // pip may have installed or replaced the environment's trust bundle.
        if !actions.is_dry_run() {
            if let Some(b) = provisioner.secure_environment(&active, &venv, pem, &mut actions)? {
                if repoints(&effects, &b.path) {
                    tracing::debug!(bundle = %b.path.display(), "dependency install provided a trust bundle");
                    effects.merge(trust_effects(&b.path));
                    self.export(&effects, &mut actions)?;
                }
                push_unique(&mut bundles, b);
            }
        }

        self.summarize(environment, &effects, &actions);
        Ok(Outcome {
            environment,
            runtime: active,
            bundles,
            venv: Some(venv),
            effects,
            planned: actions.planned().to_vec(),
        })
    }

    /// Apply the accumulated variables to the process, and to the optional
    /// sourceable exports file.
    fn export(&self, effects: &EnvironmentEffects, actions: &mut ActionLog) -> Result<()> {
        if actions.is_dry_run() {
            for (key, value) in effects.iter() {
                actions.perform(format!("export {}={}", key, value), || Ok(()))?;
            }
        } else {
            effects.apply(self.services.sink);
        }

        if let Some(path) = &self.cfg.env_file {
            let rendered = effects.render_exports();
            let written = actions.perform(format!("write exports to {}", path.display()), || {
                fs::write(path, rendered).with_context(|| format!("Failed to write {}", path.display()))
            })?;
            if written.is_some() {
                eprintln!("✓ Wrote exports to {} (source it to reuse them)", path.display());
            }
        }
        Ok(())
    }

    fn install_dependencies(&self, active: &RuntimeHandle, actions: &mut ActionLog) -> Result<()> {
        let gateway = self.services.gateway;
        let manifest = &self.cfg.requirements;
        if !manifest.is_file() {
            eprintln!("⚠ {} not found; skipping dependency install", manifest.display());
            return Ok(());
        }

        let upgrade = actions.perform("upgrade pip", || {
            gateway.install_package(
                active,
                "pip",
                InstallOptions {
                    upgrade: true,
                    ..Default::default()
                },
            )
        });
        if let Err(e) = upgrade {
            eprintln!("⚠ Could not upgrade pip: {:#}", e);
        }

        eprintln!("Installing dependencies from {}", manifest.display());
        let installed = actions.perform(
            format!("install dependencies from {}", manifest.display()),
            || {
                gateway.install_requirements(active, manifest).map_err(|e| {
                    BootstrapError::DependencyInstall {
                        manifest: manifest.clone(),
                        reason: format!("{:#}", e),
                    }
                    .into()
                })
            },
        )?;
        if installed.is_some() {
            eprintln!("✓ Dependencies installed");
        }
        Ok(())
    }

    fn summarize(&self, environment: Environment, effects: &EnvironmentEffects, actions: &ActionLog) {
        eprintln!();
        eprintln!("Bootstrap finished ({} environment)", environment);
        for (key, value) in effects.iter() {
            eprintln!("  {}={}", key, value);
        }
        if actions.is_dry_run() {
            eprintln!("[dry-run] {} action(s) would have run", actions.planned().len());
        }
    }
}

fn repoints(effects: &EnvironmentEffects, bundle: &Path) -> bool {
    effects.get(exported::REQUESTS_CA_BUNDLE) != Some(bundle.to_string_lossy().as_ref())
}

fn push_unique(bundles: &mut Vec<CertificateBundle>, bundle: CertificateBundle) {
    if !bundles.iter().any(|b| b.path == bundle.path) {
        bundles.push(bundle);
    }
}
