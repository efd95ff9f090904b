pub mod certs;
pub mod effects;
pub mod orchestrator;
pub mod prompt;
pub mod runtime;
pub mod venv;

#[cfg(test)]
pub(crate) mod testing;

pub use effects::{ActionLog, EffectSink, EnvironmentEffects, ProcessEnvSink};
pub use orchestrator::{Bootstrap, Outcome, Services};
pub use prompt::{Prompter, TerminalPrompter};
