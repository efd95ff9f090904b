//! Fatal bootstrap conditions.
//!
//! Operations return `anyhow::Result`; anything that must end the run with a
//! remediation hint is raised as a [`BootstrapError`] so `main` can find it in
//! the error chain.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("required interpreter '{interpreter}' was not found on PATH")]
    RuntimeMissing { interpreter: String },

    #[error("interpreter reports '{reported}', expected Python {expected}")]
    VersionMismatch { expected: String, reported: String },

    #[error("no loadable module provides Python {version} (tried {tried}; no '{prefix}*' fallback)")]
    ModuleUnavailable {
        version: String,
        prefix: String,
        tried: String,
    },

    #[error("failed to download root CA from {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("could not install '{package}' for the user site or a dedicated environment: {reason}")]
    TrustPackageInstall { package: String, reason: String },

    #[error("could not resolve the trust bundle path via '{package}' after a forced reinstall: {reason}")]
    TrustBundleQuery { package: String, reason: String },

    #[error("local virtual environment installation was declined")]
    LocalInstallDeclined,

    #[error("{path} is a real directory; refusing to replace it with a scratch symlink")]
    ScratchConflict { path: PathBuf },

    #[error("creating virtual environment at {path} failed: {reason}")]
    VenvCreation { path: PathBuf, reason: String },

    #[error("installing dependencies from {manifest} failed: {reason}")]
    DependencyInstall { manifest: PathBuf, reason: String },
}

impl BootstrapError {
    /// Suggested command or action for the user, if one applies.
    pub fn remedy(&self) -> Option<String> {
        match self {
            Self::RuntimeMissing { interpreter } => Some(format!(
                "install {} (e.g. `pyenv install {}` or your OS package manager) and re-run",
                interpreter,
                interpreter.trim_start_matches("python")
            )),
            Self::VersionMismatch { expected, .. } => Some(format!(
                "make sure `python{}` on PATH is a Python {} build",
                expected, expected
            )),
            Self::ModuleUnavailable { prefix, .. } => Some(format!(
                "run `module avail {}` to list installed versions, then set DEVBOOT_CLUSTER_MODULES",
                prefix
            )),
            Self::Download { url, .. } => Some(format!(
                "check network/VPN access to {} or place the PEM at the cert path manually",
                url
            )),
            Self::TrustPackageInstall { package, .. } => Some(format!(
                "run `python3 -m pip install --user {}` manually and inspect its output",
                package
            )),
            Self::TrustBundleQuery { package, .. } => Some(format!(
                "run `python3 -c \"import {}; print({}.where())\"` to diagnose",
                package, package
            )),
            Self::LocalInstallDeclined => {
                Some("re-run and provide a scratch directory, or accept the local install".to_string())
            }
            Self::ScratchConflict { path } => Some(format!(
                "move or remove {} and re-run to link it to scratch storage",
                path.display()
            )),
            Self::VenvCreation { .. } => {
                Some("check that the interpreter's `venv` module is installed".to_string())
            }
            Self::DependencyInstall { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remedy_for_missing_runtime() {
        let err = BootstrapError::RuntimeMissing {
            interpreter: "python3.13".to_string(),
        };
        assert!(err.to_string().contains("python3.13"));
        assert!(err.remedy().unwrap().contains("pyenv install 3.13"));
    }

    #[test]
    fn test_found_through_anyhow_chain() {
        let err = anyhow::Error::new(BootstrapError::LocalInstallDeclined).context("venv setup");
        let found = err.chain().find_map(|e| e.downcast_ref::<BootstrapError>());
        assert!(matches!(found, Some(BootstrapError::LocalInstallDeclined)));
    }
}
