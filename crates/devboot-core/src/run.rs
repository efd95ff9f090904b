//! Per-run invocation state shared by every stage.

use std::fmt;
use std::path::Path;

/// Invocation flags. Immutable once parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunConfig {
    /// Log intended mutations instead of performing them.
    pub dry_run: bool,
    /// Stop after certificate provisioning.
    pub cert_only: bool,
    pub verbose: bool,
}

/// Host classification, decided once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Cluster,
    Local,
}

impl Environment {
    /// `Cluster` iff the marker path exists.
    pub fn detect(marker: &Path) -> Self {
        if marker.exists() {
            Self::Cluster
        } else {
            Self::Local
        }
    }

    pub fn is_cluster(self) -> bool {
        matches!(self, Self::Cluster)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cluster => f.write_str("cluster"),
            Self::Local => f.write_str("local"),
        }
    }
}
