//! Dry-run action ledger and process-environment effects.
//!
//! Stages never touch the process environment directly: they return an
//! [`EnvironmentEffects`] value and the orchestrator applies it once through an
//! [`EffectSink`]. Every filesystem mutation goes through [`ActionLog::perform`],
//! which turns into a "would ..." line under `--dryrun`.

use std::collections::BTreeMap;

use anyhow::Result;
use devboot_core::config::set_env_var;

/// Records (and under dry-run, replaces) mutating actions.
#[derive(Debug, Default)]
pub struct ActionLog {
    dry_run: bool,
    planned: Vec<String>,
}

impl ActionLog {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            planned: Vec::new(),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Run `action` and return its value, or under dry-run print
    /// `would <description>` and return `None` without running it.
    pub fn perform<T, F>(&mut self, description: impl Into<String>, action: F) -> Result<Option<T>>
    where
        F: FnOnce() -> Result<T>,
    {
        let description = description.into();
        if self.dry_run {
            eprintln!("[dry-run] would {}", description);
            self.planned.push(description);
            return Ok(None);
        }
        tracing::debug!(action = %description, "performing");
        action().map(Some)
    }

    /// Actions skipped under dry-run, in order.
    pub fn planned(&self) -> &[String] {
        &self.planned
    }
}

/// Variables to export for the rest of the run and for child processes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentEffects {
    vars: BTreeMap<String, String>,
}

impl EnvironmentEffects {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`, replacing any earlier value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Fold `other` in; its values win.
    pub fn merge(&mut self, other: EnvironmentEffects) {
        self.vars.extend(other.vars);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn apply(&self, sink: &dyn EffectSink) {
        for (key, value) in self.iter() {
            sink.set(key, value);
        }
    }

    /// `export KEY='value'` lines suitable for `source`.
    pub fn render_exports(&self) -> String {
        let mut out = String::new();
        for (key, value) in self.iter() {
            out.push_str(&format!("export {}='{}'\n", key, value.replace('\'', r"'\''")));
        }
        out
    }
}

/// Destination for exported variables.
pub trait EffectSink {
    fn set(&self, key: &str, value: &str);
}

/// Writes into the current process environment, inherited by every child process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnvSink;

impl EffectSink for ProcessEnvSink {
    fn set(&self, key: &str, value: &str) {
        set_env_var(key, value);
    }
}
