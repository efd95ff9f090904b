//! In-memory fakes for the runtime, module, download and prompt seams.

use anyhow::{bail, Result};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use devboot_core::config::schema::DEFAULT_TRUST_PACKAGE;
use devboot_core::BootstrapError;

use crate::certs::CertSource;
use crate::effects::EffectSink;
use crate::prompt::Prompter;
use crate::runtime::{venv_python, EnvOverlay, InstallOptions, ModuleSystem, RuntimeGateway, RuntimeHandle};
use crate::venv::VirtualEnvironment;

pub const SYSTEM_PYTHON: &str = "/usr/bin/python3.13";

pub const TEST_PEM: &str = "-----BEGIN CERTIFICATE-----\n\
MIIBszCCAVmgAwIBAgIUDEVBT09UVEVTVFJPT1RDQQ\n\
ZXhhbXBsZSByb290IGNhIGJvZHk=\n\
-----END CERTIFICATE-----\n";

const PUBLIC_BUNDLE: &str = "# Issuer: Public Root\n\
-----BEGIN CERTIFICATE-----\n\
UFVCTElDUk9PVA==\n\
-----END CERTIFICATE-----\n";

/// Occurrences of `marker` in the file at `path` (0 when missing).
pub fn count_marker(path: &Path, marker: &str) -> usize {
    fs::read_to_string(path)
        .map(|c| c.matches(marker).count())
        .unwrap_or(0)
}

/// Interpreters are keyed by their resolved path so a venv reached through a
/// scratch symlink and through its storage directory is the same runtime.
fn key(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[derive(Default)]
struct GatewayState {
    interpreters: BTreeMap<String, PathBuf>,
    versions: BTreeMap<PathBuf, String>,
    bundles: BTreeMap<PathBuf, PathBuf>,
    importable: BTreeSet<PathBuf>,
    refuse_user: bool,
    failing_queries: usize,
    failing_requirements: bool,
    calls: Vec<String>,
}

#[derive(Default)]
pub struct FakeGateway {
    state: RefCell<GatewayState>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interpreter(self, name: &str, path: &str, version: &str) -> Self {
        {
            let mut state = self.state.borrow_mut();
            state.interpreters.insert(name.to_string(), PathBuf::from(path));
            state.versions.insert(key(Path::new(path)), version.to_string());
        }
        self
    }

    /// Register `python3.13` at [`SYSTEM_PYTHON`] reporting `bundle`.
    pub fn with_system_bundle(self, bundle: &Path, importable: bool) -> Self {
        let gateway = self.with_interpreter("python3.13", SYSTEM_PYTHON, "Python 3.13.1");
        {
            let mut state = gateway.state.borrow_mut();
            let system = key(Path::new(SYSTEM_PYTHON));
            state.bundles.insert(system.clone(), bundle.to_path_buf());
            if importable {
                state.importable.insert(system);
            }
        }
        gateway
    }

    /// `pip install --user` fails as on an externally managed interpreter.
    pub fn refuse_user_installs(&self) {
        self.state.borrow_mut().refuse_user = true;
    }

    /// The next `n` bundle queries fail.
    pub fn fail_queries(&self, n: usize) {
        self.state.borrow_mut().failing_queries = n;
    }

    pub fn fail_requirements(&self) {
        self.state.borrow_mut().failing_requirements = true;
    }

    pub fn calls_matching(&self, needle: &str) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|c| c.contains(needle))
            .count()
    }

    fn record(&self, call: String) {
        self.state.borrow_mut().calls.push(call);
    }
}

impl RuntimeGateway for FakeGateway {
    fn locate_interpreter(&self, name: &str, _overlay: &EnvOverlay) -> Option<PathBuf> {
        self.state.borrow().interpreters.get(name).cloned()
    }

    fn resolve_version(&self, runtime: &RuntimeHandle) -> Result<String> {
        match self.state.borrow().versions.get(&key(&runtime.interpreter)) {
            Some(v) => Ok(v.clone()),
            None => bail!("{}: not found", runtime.interpreter.display()),
        }
    }

    fn package_importable(&self, runtime: &RuntimeHandle, package: &str) -> bool {
        package == DEFAULT_TRUST_PACKAGE
            && self
                .state
                .borrow()
                .importable
                .contains(&key(&runtime.interpreter))
    }

    fn install_package(&self, runtime: &RuntimeHandle, package: &str, opts: InstallOptions) -> Result<()> {
        self.record(format!(
            "install_package {} {} user={} upgrade={} force_reinstall={}",
            runtime.interpreter.display(),
            package,
            opts.user,
            opts.upgrade,
            opts.force_reinstall
        ));
        let mut state = self.state.borrow_mut();
        if opts.user && !runtime.in_venv() && state.refuse_user {
            bail!("error: externally-managed-environment");
        }
        if package != DEFAULT_TRUST_PACKAGE {
            return Ok(());
        }
        install_trust_bundle(&mut state, runtime, opts.force_reinstall)
    }

    fn query_trust_bundle_path(&self, runtime: &RuntimeHandle, package: &str) -> Result<PathBuf> {
        self.record(format!("query {} {}", runtime.interpreter.display(), package));
        let interpreter = key(&runtime.interpreter);
        let mut state = self.state.borrow_mut();
        if state.failing_queries > 0 {
            state.failing_queries -= 1;
            bail!("{}.where() raised", package);
        }
        if !state.importable.contains(&interpreter) {
            bail!("No module named '{}'", package);
        }
        match state.bundles.get(&interpreter) {
            Some(b) => Ok(b.clone()),
            None => bail!("{}.where() printed nothing", package),
        }
    }

    fn create_venv(&self, runtime: &RuntimeHandle, path: &Path) -> Result<()> {
        self.record(format!("create_venv {}", path.display()));
        let entry = VirtualEnvironment::local(path).activation_entry_point();
        let python = venv_python(path);
        for file in [&entry, &python] {
            if let Some(parent) = file.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(file, "")?;
        }
        let version = if runtime.version.is_empty() {
            "Python 3.13.1".to_string()
        } else {
            runtime.version.clone()
        };
        self.state.borrow_mut().versions.insert(key(&python), version);
        Ok(())
    }

    fn install_requirements(&self, runtime: &RuntimeHandle, manifest: &Path) -> Result<()> {
        self.record(format!(
            "install_requirements {} {}",
            runtime.interpreter.display(),
            manifest.display()
        ));
        let mut state = self.state.borrow_mut();
        if state.failing_requirements {
            bail!("pip exited with exit status: 1");
        }
        let lists_trust_package = fs::read_to_string(manifest)
            .map(|m| m.lines().any(|l| l.trim() == DEFAULT_TRUST_PACKAGE))
            .unwrap_or(false);
        if lists_trust_package {
            install_trust_bundle(&mut state, runtime, true)?;
        }
        Ok(())
    }
}

/// Lays down the trust package's public bundle for `runtime`; a forced
/// reinstall overwrites whatever the bundle held before.
fn install_trust_bundle(state: &mut GatewayState, runtime: &RuntimeHandle, force: bool) -> Result<()> {
    let interpreter = key(&runtime.interpreter);
    let bundle = match (state.bundles.get(&interpreter), &runtime.venv) {
        (Some(b), _) => b.clone(),
        (None, Some(venv)) => venv
            .join("lib")
            .join("python3.13")
            .join("site-packages")
            .join(DEFAULT_TRUST_PACKAGE)
            .join("cacert.pem"),
        (None, None) => bail!("no site-packages for {}", interpreter.display()),
    };
    if !bundle.exists() || force {
        if let Some(parent) = bundle.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&bundle, PUBLIC_BUNDLE)?;
    }
    state.bundles.insert(interpreter.clone(), bundle);
    state.importable.insert(interpreter);
    Ok(())
}

#[derive(Default)]
pub struct FakeModules {
    available: Vec<String>,
    loaded: RefCell<Vec<String>>,
    avail_calls: Cell<usize>,
}

impl FakeModules {
    pub fn with_available(modules: &[&str]) -> Self {
        Self {
            available: modules.iter().map(|m| m.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn loaded(&self) -> Vec<String> {
        self.loaded.borrow().clone()
    }

    pub fn avail_calls(&self) -> usize {
        self.avail_calls.get()
    }
}

impl ModuleSystem for FakeModules {
    fn load(&self, module: &str, base: &EnvOverlay) -> Result<EnvOverlay> {
        if !self.available.iter().any(|m| m == module) {
            bail!("ERROR: Unable to locate a modulefile for '{}'", module);
        }
        self.loaded.borrow_mut().push(module.to_string());
        let mut overlay = base.clone();
        overlay.set("LOADEDMODULES", module);
        Ok(overlay)
    }

    fn available(&self, prefix: &str) -> Result<Vec<String>> {
        self.avail_calls.set(self.avail_calls.get() + 1);
        Ok(self
            .available
            .iter()
            .filter(|m| m.starts_with(prefix))
            .cloned()
            .collect())
    }
}

pub struct FakeCertSource {
    pem: Option<Vec<u8>>,
    fetches: Cell<usize>,
}

impl FakeCertSource {
    pub fn new(pem: &str) -> Self {
        Self {
            pem: Some(pem.as_bytes().to_vec()),
            fetches: Cell::new(0),
        }
    }

    /// Every fetch fails as if all attempts were exhausted.
    pub fn failing() -> Self {
        Self {
            pem: None,
            fetches: Cell::new(0),
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.get()
    }
}

impl CertSource for FakeCertSource {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.fetches.set(self.fetches.get() + 1);
        match &self.pem {
            Some(pem) => Ok(pem.clone()),
            None => Err(BootstrapError::Download {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            }
            .into()),
        }
    }
}

/// Answers questions from a script; an exhausted script reads as end of input.
pub struct ScriptedPrompter {
    answers: RefCell<VecDeque<String>>,
    asked: RefCell<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new(answers: &[&str]) -> Self {
        Self {
            answers: RefCell::new(answers.iter().map(|a| a.to_string()).collect()),
            asked: RefCell::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.borrow().clone()
    }
}

impl Prompter for ScriptedPrompter {
    fn ask(&self, question: &str) -> Result<String> {
        self.asked.borrow_mut().push(question.to_string());
        Ok(self.answers.borrow_mut().pop_front().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    applied: RefCell<Vec<(String, String)>>,
}

impl RecordingSink {
    pub fn applied(&self) -> Vec<(String, String)> {
        self.applied.borrow().clone()
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.applied
            .borrow()
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }
}

impl EffectSink for RecordingSink {
    fn set(&self, key: &str, value: &str) {
        self.applied
            .borrow_mut()
            .push((key.to_string(), value.to_string()));
    }
}
