//! Makes the organization root CA trusted by every bundle the runtime reads.
//!
//! Every step is idempotent: the PEM is reused once downloaded, the trust
//! package is only installed when missing, and bundles are appended to only
//! when the containment check fails. Mutations go through [`ActionLog`] so a
//! dry run reports them instead.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use devboot_core::config::BootstrapConfig;
use devboot_core::{BootstrapError, Environment};

use super::bundle::{self, BundleOwner, CertificateBundle};
use super::fetch::CertSource;
use super::trust_effects;
use crate::effects::{ActionLog, EnvironmentEffects};
use crate::runtime::{InstallOptions, RuntimeGateway, RuntimeHandle};
use crate::venv::{VenvManager, VirtualEnvironment};

/// Result of certificate provisioning.
#[derive(Debug, Clone)]
pub struct TrustOutcome {
    pub ca_path: PathBuf,
    /// `None` only under dry-run when the PEM was never downloaded.
    pub pem: Option<Vec<u8>>,
    /// Bundles confirmed (or under dry-run, planned) to hold the CA, in order.
    pub bundles: Vec<CertificateBundle>,
    /// Trust-bundle variables for the last confirmed bundle.
    pub effects: EnvironmentEffects,
    /// Runtime to continue with; rebound when a local venv had to be activated.
    pub runtime: RuntimeHandle,
    pub activated_venv: Option<VirtualEnvironment>,
}

/// Where the CA goes. On a local host whose reported bundle is not writable
/// this is the repository `.venv`, created even under `--cert`, which then
/// stays active as the environment that trusts the CA.
struct Target {
    bundle: Option<CertificateBundle>,
    /// Dry-run description when the bundle cannot be resolved yet.
    pending: String,
    runtime: RuntimeHandle,
    venv: Option<VirtualEnvironment>,
}

pub struct CertificateProvisioner<'a> {
    cfg: &'a BootstrapConfig,
    environment: Environment,
    gateway: &'a dyn RuntimeGateway,
    source: &'a dyn CertSource,
    venvs: &'a VenvManager<'a>,
    writable: fn(&Path) -> bool,
}

impl<'a> CertificateProvisioner<'a> {
    pub fn new(
        cfg: &'a BootstrapConfig,
        environment: Environment,
        gateway: &'a dyn RuntimeGateway,
        source: &'a dyn CertSource,
        venvs: &'a VenvManager<'a>,
        writable: fn(&Path) -> bool,
    ) -> Self {
        Self {
            cfg,
            environment,
            gateway,
            source,
            venvs,
            writable,
        }
    }

    pub fn provision(&self, runtime: &RuntimeHandle, actions: &mut ActionLog) -> Result<TrustOutcome> {
        let pem = self.fetch_root_ca(actions)?;
        let host = self.ensure_trust_package(runtime, actions)?;
        let reported = self.resolve_bundle_path(&host, actions)?;
        let target = self.select_target(runtime, &host, reported, actions)?;

        let mut bundles = Vec::new();
        let mut last_confirmed: Option<PathBuf> = None;
        match &target.bundle {
            Some(bundle) => {
                if self.ensure_ca_in(bundle, pem.as_deref(), actions)? {
                    last_confirmed = Some(bundle.path.clone());
                }
                bundles.push(bundle.clone());
            }
            None => {
                actions.perform(target.pending.clone(), || Ok(()))?;
            }
        }

        if let Some(primary) = self.primary_bundle(runtime, target.bundle.as_ref()) {
            if self.ensure_ca_in(&primary, pem.as_deref(), actions)? {
                last_confirmed = Some(primary.path.clone());
            }
            bundles.push(primary);
        }

        // Nothing is confirmed under dry-run; report what would have been.
        let exported = last_confirmed.or_else(|| bundles.last().map(|b| b.path.clone()));
        let effects = exported
            .as_deref()
            .map(trust_effects)
            .unwrap_or_default();

        Ok(TrustOutcome {
            ca_path: self.cfg.ca_path.clone(),
            pem,
            bundles,
            effects,
            runtime: target.runtime,
            activated_venv: target.venv,
        })
    }

    /// Add the CA to an activated environment's bundle, if the environment
    /// already has the trust package. Used after activation and again after
    /// dependency installation, which may have replaced the bundle.
    pub fn secure_environment(
        &self,
        active: &RuntimeHandle,
        venv: &VirtualEnvironment,
        pem: Option<&[u8]>,
        actions: &mut ActionLog,
    ) -> Result<Option<CertificateBundle>> {
        let package = &self.cfg.trust_package;
        if !active.interpreter.exists() || !self.gateway.package_importable(active, package) {
            tracing::debug!(venv = %venv.path.display(), package = %package, "environment has no trust package yet");
            return Ok(None);
        }
        let Some(path) = self.resolve_bundle_path(active, actions)? else {
            return Ok(None);
        };
        let owner = if venv.is_scratch() {
            BundleOwner::ScratchVenv
        } else {
            BundleOwner::ProjectVenv
        };
        let bundle = CertificateBundle::new(path, owner);
        self.ensure_ca_in(&bundle, pem, actions)?;
        Ok(Some(bundle))
    }

    /// The PEM in the repository cert dir, downloading it when absent.
    fn fetch_root_ca(&self, actions: &mut ActionLog) -> Result<Option<Vec<u8>>> {
        let path = &self.cfg.ca_path;
        if let Ok(existing) = fs::read(path) {
            if bundle::is_pem_certificate(&existing) {
                eprintln!("✓ Root CA present at {}", path.display());
                return Ok(Some(existing));
            }
            tracing::debug!(path = %path.display(), "existing root CA file is not a PEM certificate; downloading again");
        }

        let dir = self.cfg.cert_dir();
        if !dir.is_dir() {
            actions.perform(format!("create directory {}", dir.display()), || {
                fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))
            })?;
        }
        let fetched = actions.perform(
            format!("download {} to {}", self.cfg.ca_url, path.display()),
            || {
                let bytes = self.source.fetch(&self.cfg.ca_url)?;
                write_atomic(path, &bytes)?;
                Ok(bytes)
            },
        )?;
        if fetched.is_some() {
            eprintln!("✓ Downloaded root CA to {}", path.display());
        }
        Ok(fetched)
    }

    /// Make the trust package importable. Returns the runtime that hosts
    /// it: `runtime` itself, or the dedicated trust-package environment when a
    /// user-site install is refused.
    fn ensure_trust_package(&self, runtime: &RuntimeHandle, actions: &mut ActionLog) -> Result<RuntimeHandle> {
        let package = &self.cfg.trust_package;
        if self.gateway.package_importable(runtime, package) {
            tracing::debug!(package = %package, "trust package importable");
            return Ok(runtime.clone());
        }

        let user_install = actions.perform(format!("install {} into the user site", package), || {
            self.gateway.install_package(
                runtime,
                package,
                InstallOptions {
                    user: true,
                    ..Default::default()
                },
            )
        });
        let err = match user_install {
            Ok(_) => return Ok(runtime.clone()),
            Err(e) => e,
        };

        eprintln!(
            "⚠ User install of {} failed; using a dedicated environment at {}",
            package,
            self.cfg.trust_venv_path().display()
        );
        tracing::debug!(error = %format!("{:#}", err), "user-site install failed");

        let trust = VirtualEnvironment::local(self.cfg.trust_venv_path());
        self.venvs
            .ensure(runtime, &trust, actions)
            .map_err(|e| trust_install_error(package, e))?;
        let host = runtime.activated(&trust.path);
        if !self.gateway.package_importable(&host, package) {
            actions.perform(
                format!("install {} into {}", package, trust.path.display()),
                || {
                    self.gateway
                        .install_package(&host, package, InstallOptions::default())
                        .map_err(|e| trust_install_error(package, e))
                },
            )?;
        }
        Ok(host)
    }

    /// Ask the trust package for its bundle, force-reinstalling and
    /// retrying once on failure. `None` only under dry-run.
    fn resolve_bundle_path(&self, host: &RuntimeHandle, actions: &mut ActionLog) -> Result<Option<PathBuf>> {
        let package = &self.cfg.trust_package;
        let first = match self.gateway.query_trust_bundle_path(host, package) {
            Ok(path) => {
                tracing::debug!(bundle = %path.display(), "trust bundle resolved");
                return Ok(Some(path));
            }
            Err(e) => e,
        };
        if actions.is_dry_run() && !self.gateway.package_importable(host, package) {
            // Would have been installed by the previous step.
            return Ok(None);
        }

        eprintln!("⚠ {}.where() failed ({:#}); forcing a reinstall", package, first);
        let opts = InstallOptions {
            user: !host.in_venv(),
            force_reinstall: true,
            ..Default::default()
        };
        let reinstalled = actions
            .perform(format!("force-reinstall {}", package), || {
                self.gateway.install_package(host, package, opts)
            })
            .map_err(|e| query_error(package, e))?;
        if reinstalled.is_none() {
            return Ok(None);
        }
        self.gateway
            .query_trust_bundle_path(host, package)
            .map(Some)
            .map_err(|e| query_error(package, e))
    }

    /// Which bundle receives the CA.
    fn select_target(
        &self,
        runtime: &RuntimeHandle,
        host: &RuntimeHandle,
        reported: Option<PathBuf>,
        actions: &mut ActionLog,
    ) -> Result<Target> {
        let package = &self.cfg.trust_package;
        match self.environment {
            Environment::Cluster => {
                // Shared system bundles on cluster nodes are never mutated.
                let project = self.project_venv();
                if project.is_provisioned() {
                    tracing::debug!(venv = %project.path.display(), "cluster: targeting existing project environment");
                    let active = runtime.activated(&project.path);
                    let owner = if project.is_scratch() {
                        BundleOwner::ScratchVenv
                    } else {
                        BundleOwner::ProjectVenv
                    };
                    let path = self.venv_bundle_path(&active, &project.path, actions)?;
                    return Ok(Target {
                        bundle: path.map(|p| CertificateBundle::new(p, owner)),
                        pending: format!("append root CA to the {} bundle in {}", package, project.path.display()),
                        runtime: runtime.clone(),
                        venv: None,
                    });
                }

                let trust = VirtualEnvironment::local(self.cfg.trust_venv_path());
                tracing::debug!(venv = %trust.path.display(), "cluster: targeting trust-package environment");
                let trust_host = if host.venv.as_deref() == Some(trust.path.as_path()) {
                    host.clone()
                } else {
                    self.venvs.ensure(runtime, &trust, actions)?;
                    runtime.activated(&trust.path)
                };
                let path = self.venv_bundle_path(&trust_host, &trust.path, actions)?;
                Ok(Target {
                    bundle: path.map(|p| CertificateBundle::new(p, BundleOwner::TrustVenv)),
                    pending: format!("append root CA to the {} bundle in {}", package, trust.path.display()),
                    runtime: runtime.clone(),
                    venv: None,
                })
            }
            Environment::Local => {
                match reported {
                    Some(path) if (self.writable)(&path) => {
                        let owner = if host.in_venv() {
                            BundleOwner::TrustVenv
                        } else {
                            BundleOwner::System
                        };
                        tracing::debug!(bundle = %path.display(), %owner, "local: bundle is writable");
                        return Ok(Target {
                            bundle: Some(CertificateBundle::new(path, owner)),
                            pending: String::new(),
                            runtime: runtime.clone(),
                            venv: None,
                        });
                    }
                    Some(path) => {
                        eprintln!(
                            "⚠ {} is not writable; using the project virtual environment instead",
                            path.display()
                        );
                    }
                    None => {
                        return Ok(Target {
                            bundle: None,
                            pending: format!("append root CA to the bundle reported by {}", package),
                            runtime: runtime.clone(),
                            venv: None,
                        });
                    }
                }

                let venv = VirtualEnvironment::local(self.cfg.local_venv_path());
                self.venvs.ensure(runtime, &venv, actions)?;
                let active = runtime.activated(&venv.path);
                let path = self.venv_bundle_path(&active, &venv.path, actions)?;
                Ok(Target {
                    bundle: path.map(|p| CertificateBundle::new(p, BundleOwner::ProjectVenv)),
                    pending: format!("append root CA to the {} bundle in {}", package, venv.path.display()),
                    runtime: active,
                    venv: Some(venv),
                })
            }
        }
    }

    /// Trust bundle of an activated environment, installing the package first if needed.
    fn venv_bundle_path(
        &self,
        active: &RuntimeHandle,
        venv_dir: &Path,
        actions: &mut ActionLog,
    ) -> Result<Option<PathBuf>> {
        let package = &self.cfg.trust_package;
        let description = format!("install {} into {}", package, venv_dir.display());
        if actions.is_dry_run() && !active.interpreter.exists() {
            actions.perform(description, || Ok(()))?;
            return Ok(None);
        }
        if !self.gateway.package_importable(active, package) {
            let installed = actions.perform(description, || {
                self.gateway
                    .install_package(active, package, InstallOptions::default())
                    .map_err(|e| trust_install_error(package, e))
            })?;
            if installed.is_none() {
                return Ok(None);
            }
        }
        self.resolve_bundle_path(active, actions)
    }

    /// The externally designated primary environment's bundle, unless
    /// it is the bundle already handled.
    fn primary_bundle(
        &self,
        runtime: &RuntimeHandle,
        handled: Option<&CertificateBundle>,
    ) -> Option<CertificateBundle> {
        let dir = self.cfg.primary_venv.as_ref()?;
        if !dir.is_dir() {
            eprintln!("⚠ Primary virtual environment {} does not exist; skipping", dir.display());
            return None;
        }
        let host = runtime.activated(dir);
        let queried = if host.interpreter.exists() {
            self.gateway
                .query_trust_bundle_path(&host, &self.cfg.trust_package)
                .map_err(|e| {
                    tracing::debug!(error = %e, "primary venv trust query failed");
                })
                .ok()
        } else {
            None
        };
        let Some(path) = queried.or_else(|| find_site_packages_bundle(dir, &self.cfg.trust_package)) else {
            eprintln!(
                "⚠ No {} bundle found in primary virtual environment {}; skipping",
                self.cfg.trust_package,
                dir.display()
            );
            return None;
        };
        if handled.is_some_and(|b| same_file(&b.path, &path)) {
            tracing::debug!(bundle = %path.display(), "primary venv bundle already handled");
            return None;
        }
        Some(CertificateBundle::new(path, BundleOwner::PrimaryVenv))
    }

    /// Append the PEM unless the bundle already trusts the CA.
    /// Returns whether the CA is (now) present.
    fn ensure_ca_in(
        &self,
        bundle: &CertificateBundle,
        pem: Option<&[u8]>,
        actions: &mut ActionLog,
    ) -> Result<bool> {
        let marker = &self.cfg.ca_marker;
        if bundle::contains_ca(&bundle.path, marker, pem)? {
            eprintln!("✓ Root CA already in {} bundle {}", bundle.owner, bundle.path.display());
            return Ok(true);
        }
        let appended = actions.perform(
            format!("append root CA to {} bundle {}", bundle.owner, bundle.path.display()),
            || {
                let pem = pem.context("root CA PEM is not available")?;
                bundle::append_ca(&bundle.path, marker, pem)
            },
        )?;
        if appended.is_some() {
            eprintln!("✓ Added root CA to {} bundle {}", bundle.owner, bundle.path.display());
        }
        Ok(appended.is_some())
    }

    /// The repository-local environment path, scratch-backed when it is a symlink.
    fn project_venv(&self) -> VirtualEnvironment {
        let path = self.cfg.local_venv_path();
        match fs::read_link(&path) {
            Ok(target) => {
                let target = if target.is_absolute() {
                    target
                } else {
                    self.cfg.repo_root.join(target)
                };
                VirtualEnvironment::scratch(path, target)
            }
            Err(_) => VirtualEnvironment::local(path),
        }
    }
}

/// Write through a temp file in the same directory so concurrent runs never
/// observe a partial PEM.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    tmp.write_all(bytes).context("Failed to write root CA")?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to save {}", path.display()))?;
    Ok(())
}

fn find_site_packages_bundle(venv_dir: &Path, package: &str) -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(entries) = fs::read_dir(venv_dir.join("lib")) {
        for entry in entries.flatten() {
            if entry.file_name().to_string_lossy().starts_with("python") {
                candidates.push(entry.path().join("site-packages").join(package).join("cacert.pem"));
            }
        }
    }
    candidates.sort();
    candidates.push(venv_dir.join("Lib").join("site-packages").join(package).join("cacert.pem"));
    candidates.into_iter().find(|p| p.is_file())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

fn trust_install_error(package: &str, e: anyhow::Error) -> anyhow::Error {
    if e.downcast_ref::<BootstrapError>().is_some() {
        return e;
    }
    BootstrapError::TrustPackageInstall {
        package: package.to_string(),
        reason: format!("{:#}", e),
    }
    .into()
}

fn query_error(package: &str, e: anyhow::Error) -> anyhow::Error {
    BootstrapError::TrustBundleQuery {
        package: package.to_string(),
        reason: format!("{:#}", e),
    }
    .into()
}
