//! Interactive questions, injectable so runs can be scripted.

use anyhow::Result;
use std::io::{self, BufRead, Write};

pub trait Prompter {
    /// Ask a free-form question. An empty answer means "no answer".
    fn ask(&self, question: &str) -> Result<String>;

    /// Yes/no question; only `y`/`yes` (any case) count as yes.
    fn confirm(&self, question: &str) -> Result<bool> {
        let answer = self.ask(question)?;
        Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
    }
}

/// Reads answers from stdin, printing the question to stderr.
/// End of input is treated as an empty answer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn ask(&self, question: &str) -> Result<String> {
        eprint!("{}", question);
        io::stderr().flush()?;
        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(answer.trim().to_string())
    }
}
