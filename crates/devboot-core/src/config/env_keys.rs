//! Environment variable key constants.
//!
//! Primary variables use the `DEVBOOT_*` prefix. The `exported` group lists the
//! variables devboot itself sets for child processes and the calling shell.

/// Repository and manifest locations
pub mod paths {
    pub const DEVBOOT_REPO_ROOT: &str = "DEVBOOT_REPO_ROOT";
    pub const DEVBOOT_REQUIREMENTS: &str = "DEVBOOT_REQUIREMENTS";
    pub const DEVBOOT_ENV_FILE: &str = "DEVBOOT_ENV_FILE";

    /// Externally designated primary virtual environment.
    pub const DEVBOOT_PRIMARY_VENV: &str = "DEVBOOT_PRIMARY_VENV";
    pub const PRIMARY_VENV_ALIASES: &[&str] = &["VIRTUAL_ENV"];
}

/// Host classification and interpreter selection
pub mod runtime {
    pub const DEVBOOT_CLUSTER_MARKER: &str = "DEVBOOT_CLUSTER_MARKER";
    pub const DEVBOOT_PYTHON_VERSION: &str = "DEVBOOT_PYTHON_VERSION";
    /// Comma-separated, tried in order.
    pub const DEVBOOT_CLUSTER_MODULES: &str = "DEVBOOT_CLUSTER_MODULES";
    pub const DEVBOOT_MODULE_PREFIX: &str = "DEVBOOT_MODULE_PREFIX";
}

/// Root CA and trust package
pub mod certs {
    pub const DEVBOOT_CA_URL: &str = "DEVBOOT_CA_URL";
    pub const DEVBOOT_CA_FILE: &str = "DEVBOOT_CA_FILE";
    pub const DEVBOOT_CA_MARKER: &str = "DEVBOOT_CA_MARKER";
    pub const DEVBOOT_TRUST_PACKAGE: &str = "DEVBOOT_TRUST_PACKAGE";
}

/// Observability and logging
pub mod observability {
    pub const DEVBOOT_QUIET: &str = "DEVBOOT_QUIET";
    pub const DEVBOOT_LOG_LEVEL: &str = "DEVBOOT_LOG_LEVEL";
    pub const DEVBOOT_LOG_JSON: &str = "DEVBOOT_LOG_JSON";
}

/// Variables written by devboot (never read as configuration)
pub mod exported {
    /// Trust bundle honored by python-requests and pip.
    pub const REQUESTS_CA_BUNDLE: &str = "REQUESTS_CA_BUNDLE";
    /// Generic "extra CA" variable honored by node-based tooling.
    pub const NODE_EXTRA_CA_CERTS: &str = "NODE_EXTRA_CA_CERTS";
    pub const VIRTUAL_ENV: &str = "VIRTUAL_ENV";
    pub const PATH: &str = "PATH";
}
