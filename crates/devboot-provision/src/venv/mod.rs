//! Project virtual environment: naming, location, creation and activation.

pub mod manager;

pub use manager::VenvManager;

use std::path::{Path, PathBuf};

use crate::runtime::venv_bin_dir;

/// Where an environment's files actually live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backing {
    Local,
    /// Stored at `target`; the environment path is a symlink to it.
    ScratchLink { target: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualEnvironment {
    /// Path the rest of the run uses (a symlink for scratch-backed envs).
    pub path: PathBuf,
    pub backing: Backing,
}

impl VirtualEnvironment {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            backing: Backing::Local,
        }
    }

    pub fn scratch(path: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            backing: Backing::ScratchLink {
                target: target.into(),
            },
        }
    }

    pub fn storage(&self) -> &Path {
        match &self.backing {
            Backing::Local => &self.path,
            Backing::ScratchLink { target } => target,
        }
    }

    pub fn is_scratch(&self) -> bool {
        matches!(self.backing, Backing::ScratchLink { .. })
    }

    /// `bin/activate` inside the storage directory.
    pub fn activation_entry_point(&self) -> PathBuf {
        let bin = venv_bin_dir(self.storage());
        if cfg!(windows) {
            bin.join("activate.bat")
        } else {
            bin.join("activate")
        }
    }

    /// Created already (the activation entry point exists).
    pub fn is_provisioned(&self) -> bool {
        self.activation_entry_point().exists()
    }
}

/// Deterministic environment name from the checkout's directory name:
/// every non-alphanumeric character becomes `_`, then `_venv` is appended.
pub fn environment_name(repo_root: &Path) -> String {
    let resolved = repo_root
        .canonicalize()
        .unwrap_or_else(|_| repo_root.to_path_buf());
    let base = resolved
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "repo".to_string());
    let normalized: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{}_venv", normalized)
}
