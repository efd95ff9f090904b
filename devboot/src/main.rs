mod cli;
mod observability;

use anyhow::Result;
use std::process::ExitCode;

use devboot_core::config::{load_dotenv, BootstrapConfig};
use devboot_core::{BootstrapError, RunConfig};
use devboot_provision::certs::HttpCertSource;
use devboot_provision::runtime::{ProcessGateway, ShellModules};
use devboot_provision::{Bootstrap, ProcessEnvSink, Services, TerminalPrompter};

fn main() -> ExitCode {
    let (cli, ignored) = cli::parse_flags(std::env::args_os()).unwrap_or_else(|e| e.exit());
    let run = cli.run_config();

    load_dotenv();
    observability::init_tracing(run.verbose);
    for arg in &ignored {
        tracing::warn!(argument = %arg, "ignoring unrecognized argument");
    }

    match bootstrap(run) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e, run.verbose);
            ExitCode::FAILURE
        }
    }
}

fn bootstrap(run: RunConfig) -> Result<()> {
    let cfg = BootstrapConfig::from_env()?;
    tracing::debug!(?cfg, "configuration");

    let gateway = ProcessGateway;
    let modules = ShellModules::default();
    let certs = HttpCertSource::default();
    let prompter = TerminalPrompter;
    let sink = ProcessEnvSink;
    let services = Services::new(&gateway, &modules, &certs, &prompter, &sink);

    Bootstrap::new(run, &cfg, services).run()?;
    Ok(())
}

/// One-line cause plus a remedy; the full chain only with `--verbose`.
fn report(err: &anyhow::Error, verbose: bool) {
    eprintln!("error: {}", err);
    if verbose {
        for cause in err.chain().skip(1) {
            eprintln!("  caused by: {}", cause);
        }
    }
    let remedy = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<BootstrapError>())
        .and_then(BootstrapError::remedy);
    if let Some(remedy) = remedy {
        eprintln!("hint: {}", remedy);
    }
}
