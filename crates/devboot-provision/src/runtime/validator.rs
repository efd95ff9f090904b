//! Interpreter selection for the detected host.
//!
//! Local hosts must already have the exact `pythonX.Y` on PATH. Cluster hosts
//! load the pinned modules, falling back to the highest available module of
//! the same major version.

use anyhow::Result;
use devboot_core::config::BootstrapConfig;
use devboot_core::version::{select_highest, version_key, version_matches};
use devboot_core::{BootstrapError, Environment};

use super::{EnvOverlay, ModuleSystem, RuntimeGateway, RuntimeHandle};

pub fn validate_runtime(
    environment: Environment,
    cfg: &BootstrapConfig,
    gateway: &dyn RuntimeGateway,
    modules: &dyn ModuleSystem,
) -> Result<RuntimeHandle> {
    let overlay = match environment {
        Environment::Local => EnvOverlay::new(),
        Environment::Cluster => load_cluster_modules(cfg, modules)?,
    };

    let name = cfg.interpreter_name();
    let interpreter = gateway
        .locate_interpreter(&name, &overlay)
        .ok_or_else(|| BootstrapError::RuntimeMissing {
            interpreter: name.clone(),
        })?;
    let mut runtime = RuntimeHandle::new(interpreter, overlay);

    let reported = gateway.resolve_version(&runtime)?;
    if !version_matches(&reported, &cfg.python_version) {
        return Err(BootstrapError::VersionMismatch {
            expected: cfg.python_version.clone(),
            reported,
        }
        .into());
    }
    eprintln!("✓ Using {} ({})", reported, runtime.interpreter.display());
    runtime.version = reported;
    Ok(runtime)
}

fn load_cluster_modules(cfg: &BootstrapConfig, modules: &dyn ModuleSystem) -> Result<EnvOverlay> {
    let mut overlay = EnvOverlay::new();
    let mut pinned_failed = false;
    for module in &cfg.cluster_modules {
        match modules.load(module, &overlay) {
            Ok(loaded) => {
                tracing::debug!(module = %module, "module loaded");
                overlay = loaded;
            }
            Err(e) => {
                tracing::debug!(module = %module, error = %e, "pinned module failed to load");
                eprintln!("⚠ Could not load module {}; searching for a compatible version", module);
                pinned_failed = true;
                break;
            }
        }
    }
    if !pinned_failed {
        return Ok(overlay);
    }

    let unavailable = || BootstrapError::ModuleUnavailable {
        version: cfg.python_version.clone(),
        prefix: cfg.module_prefix.clone(),
        tried: cfg.cluster_modules.join(", "),
    };
    let candidates: Vec<String> = modules
        .available(&cfg.module_prefix)
        .unwrap_or_else(|e| {
            tracing::debug!(error = %e, "module avail failed");
            Vec::new()
        })
        .into_iter()
        .filter(|m| m.starts_with(&cfg.module_prefix) && same_major(m, cfg.python_major()))
        .collect();
    tracing::debug!(?candidates, "fallback module candidates");
    let chosen = select_highest(&candidates).ok_or_else(unavailable)?;
    let loaded = modules.load(chosen, &overlay).map_err(|e| {
        tracing::debug!(module = %chosen, error = %e, "fallback module failed to load");
        unavailable()
    })?;
    eprintln!("✓ Loaded fallback module {}", chosen);
    Ok(loaded)
}

fn same_major(module: &str, major: &str) -> bool {
    version_key(module)
        .first()
        .is_some_and(|m| m.to_string() == major)
}
