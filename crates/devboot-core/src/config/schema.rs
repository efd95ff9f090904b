//! Structured configuration loaded from environment variables.

use super::env_keys::{certs, observability as obv_keys, paths, runtime};
use super::loader::{env_bool, env_list, env_optional, env_or};
use std::path::{Path, PathBuf};

pub const DEFAULT_CLUSTER_MARKER: &str = "/arm/tools/setup/init/bash";
pub const DEFAULT_PYTHON_VERSION: &str = "3.13";
pub const DEFAULT_CLUSTER_MODULES: &[&str] = &["python/python/3.13.1"];
pub const DEFAULT_MODULE_PREFIX: &str = "python/python/3";
pub const DEFAULT_CA_URL: &str =
    "http://pki.arm.com/certificates/Arm_Enterprise_PKI_Root_CA.pem";
pub const DEFAULT_CA_FILE_NAME: &str = "Arm_Enterprise_PKI_Root_CA.pem";
pub const DEFAULT_CA_MARKER: &str = "Arm Enterprise PKI Root CA";
pub const DEFAULT_TRUST_PACKAGE: &str = "certifi";
pub const CERT_DIR: &str = "cert";
pub const LOCAL_VENV_DIR: &str = ".venv";
pub const TRUST_VENV_DIR: &str = ".certifi-venv";
pub const REQUIREMENTS_FILE: &str = "requirements.txt";

/// Everything a bootstrap run needs to know besides the invocation flags.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub repo_root: PathBuf,
    pub cluster_marker: PathBuf,
    /// Required `major.minor`, e.g. "3.13".
    pub python_version: String,
    /// Pinned cluster modules, tried in order.
    pub cluster_modules: Vec<String>,
    /// Prefix used to enumerate fallback modules of the same major version.
    pub module_prefix: String,
    pub ca_url: String,
    pub ca_path: PathBuf,
    pub ca_marker: String,
    pub trust_package: String,
    pub requirements: PathBuf,
    pub primary_venv: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

impl BootstrapConfig {
    /// Defaults for a checkout rooted at `repo_root`, ignoring the environment.
    pub fn for_repo(repo_root: impl Into<PathBuf>) -> Self {
        let repo_root = repo_root.into();
        Self {
            cluster_marker: PathBuf::from(DEFAULT_CLUSTER_MARKER),
            python_version: DEFAULT_PYTHON_VERSION.to_string(),
            cluster_modules: DEFAULT_CLUSTER_MODULES.iter().map(|s| s.to_string()).collect(),
            module_prefix: DEFAULT_MODULE_PREFIX.to_string(),
            ca_url: DEFAULT_CA_URL.to_string(),
            ca_path: repo_root.join(CERT_DIR).join(DEFAULT_CA_FILE_NAME),
            ca_marker: DEFAULT_CA_MARKER.to_string(),
            trust_package: DEFAULT_TRUST_PACKAGE.to_string(),
            requirements: repo_root.join(REQUIREMENTS_FILE),
            primary_venv: None,
            env_file: None,
            repo_root,
        }
    }

    /// Load from the environment (and `.env`), falling back to the defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        super::loader::load_dotenv();
        let repo_root = match env_optional(paths::DEVBOOT_REPO_ROOT, &[]) {
            Some(root) => expand_home(&root),
            None => std::env::current_dir()?,
        };
        let mut cfg = Self::for_repo(repo_root);

        if let Some(marker) = env_optional(runtime::DEVBOOT_CLUSTER_MARKER, &[]) {
            cfg.cluster_marker = PathBuf::from(marker);
        }
        cfg.python_version = env_or(runtime::DEVBOOT_PYTHON_VERSION, &[], || {
            DEFAULT_PYTHON_VERSION.to_string()
        });
        cfg.cluster_modules = env_list(runtime::DEVBOOT_CLUSTER_MODULES, DEFAULT_CLUSTER_MODULES);
        cfg.module_prefix = env_or(runtime::DEVBOOT_MODULE_PREFIX, &[], || {
            DEFAULT_MODULE_PREFIX.to_string()
        });
        cfg.ca_url = env_or(certs::DEVBOOT_CA_URL, &[], || DEFAULT_CA_URL.to_string());
        if let Some(file) = env_optional(certs::DEVBOOT_CA_FILE, &[]) {
            cfg.ca_path = cfg.resolve(&file);
        }
        cfg.ca_marker = env_or(certs::DEVBOOT_CA_MARKER, &[], || DEFAULT_CA_MARKER.to_string());
        cfg.trust_package = env_or(certs::DEVBOOT_TRUST_PACKAGE, &[], || {
            DEFAULT_TRUST_PACKAGE.to_string()
        });
        if let Some(req) = env_optional(paths::DEVBOOT_REQUIREMENTS, &[]) {
            cfg.requirements = cfg.resolve(&req);
        }
        cfg.primary_venv =
            env_optional(paths::DEVBOOT_PRIMARY_VENV, paths::PRIMARY_VENV_ALIASES)
                .map(|p| expand_home(&p));
        cfg.env_file = env_optional(paths::DEVBOOT_ENV_FILE, &[]).map(|p| cfg.resolve(&p));
        Ok(cfg)
    }

    /// Interpreter invocation name, e.g. `python3.13`.
    pub fn interpreter_name(&self) -> String {
        format!("python{}", self.python_version)
    }

    /// Required major version, e.g. "3" for "3.13".
    pub fn python_major(&self) -> &str {
        self.python_version
            .split('.')
            .next()
            .unwrap_or(&self.python_version)
    }

    pub fn cert_dir(&self) -> PathBuf {
        self.ca_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.repo_root.join(CERT_DIR))
    }

    /// Fixed repository-local environment path (a real dir, or a symlink to scratch).
    pub fn local_venv_path(&self) -> PathBuf {
        self.repo_root.join(LOCAL_VENV_DIR)
    }

    /// Dedicated environment hosting only the trust package.
    pub fn trust_venv_path(&self) -> PathBuf {
        self.cert_dir().join(TRUST_VENV_DIR)
    }

    fn resolve(&self, value: &str) -> PathBuf {
        let p = expand_home(value);
        if p.is_absolute() {
            p
        } else {
            self.repo_root.join(p)
        }
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(value: &str) -> PathBuf {
    if value == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(value));
    }
    if let Some(rest) = value.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(value)
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub quiet: bool,
    pub log_level: String,
    pub log_json: bool,
}

impl ObservabilityConfig {
    pub fn from_env() -> &'static Self {
        use std::sync::OnceLock;
        static CACHE: OnceLock<ObservabilityConfig> = OnceLock::new();
        CACHE.get_or_init(|| {
            super::loader::load_dotenv();
            Self {
                quiet: env_bool(obv_keys::DEVBOOT_QUIET, &[], false),
                log_level: env_or(obv_keys::DEVBOOT_LOG_LEVEL, &[], || "devboot=info".to_string()),
                log_json: env_bool(obv_keys::DEVBOOT_LOG_JSON, &[], false),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_repo_defaults() {
        let cfg = BootstrapConfig::for_repo("/work/ocr-tool");
        assert_eq!(
            cfg.ca_path,
            PathBuf::from("/work/ocr-tool/cert/Arm_Enterprise_PKI_Root_CA.pem")
        );
        assert_eq!(cfg.cert_dir(), PathBuf::from("/work/ocr-tool/cert"));
        assert_eq!(cfg.local_venv_path(), PathBuf::from("/work/ocr-tool/.venv"));
        assert_eq!(
            cfg.trust_venv_path(),
            PathBuf::from("/work/ocr-tool/cert/.certifi-venv")
        );
        assert_eq!(cfg.interpreter_name(), "python3.13");
        assert_eq!(cfg.python_major(), "3");
    }

    #[test]
    fn test_resolve_relative_against_repo() {
        let cfg = BootstrapConfig::for_repo("/work/repo");
        assert_eq!(cfg.resolve("reqs/dev.txt"), PathBuf::from("/work/repo/reqs/dev.txt"));
        assert_eq!(cfg.resolve("/abs/file"), PathBuf::from("/abs/file"));
    }
}
