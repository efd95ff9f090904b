use clap::Parser;
use devboot_core::RunConfig;
use std::ffi::OsString;

/// devboot - prepare this checkout for development: Python runtime, root CA
/// trust, virtual environment and dependencies
#[derive(Parser, Debug, Default, PartialEq, Eq)]
#[command(name = "devboot")]
#[command(author, version, about, long_about = None)]
#[command(args_override_self = true)]
pub struct Cli {
    /// Print every change that would be made without making it
    #[arg(long = "dryrun", visible_alias = "dry-run")]
    pub dry_run: bool,

    /// Only set up the root CA, then exit
    #[arg(long)]
    pub cert: bool,

    /// Debug diagnostics and full error chains
    #[arg(long)]
    pub verbose: bool,
}

impl Cli {
    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            dry_run: self.dry_run,
            cert_only: self.cert,
            verbose: self.verbose,
        }
    }
}

const KNOWN_ARGS: &[&str] = &[
    "--dryrun",
    "--dry-run",
    "--cert",
    "--verbose",
    "-h",
    "--help",
    "-V",
    "--version",
];

/// Parse `args` (program name first). Unrecognized arguments never fail the
/// run; they are returned so the caller can report them.
pub fn parse_flags<I, T>(args: I) -> Result<(Cli, Vec<String>), clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut args = args.into_iter().map(Into::into);
    let program = args.next().unwrap_or_else(|| OsString::from("devboot"));
    let mut kept = vec![program];
    let mut ignored = Vec::new();
    for arg in args {
        let known = arg.to_str().is_some_and(|s| KNOWN_ARGS.contains(&s));
        if known {
            kept.push(arg);
        } else {
            ignored.push(arg.to_string_lossy().to_string());
        }
    }
    let cli = Cli::try_parse_from(kept)?;
    Ok((cli, ignored))
}
