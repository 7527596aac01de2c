//! Translation engines.
//!
//! The engine itself is a black box to the scheduler: text in, text out, or
//! an error. Workers hold one [`Translator`] for their whole lifetime.

use crate::error::{Result, TranspoolError};
use std::io::Write;
use std::process::{Command, Stdio};

/// A synchronous text-to-text translation function.
pub trait Translator: Send + Sync {
    fn translate(&self, text: &str) -> Result<String>;
}

/// Returns its input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoTranslator;

impl Translator for EchoTranslator {
    fn translate(&self, text: &str) -> Result<String> {
        Ok(text.to_string())
    }
}

/// Runs an external program per job: text on stdin, translation on stdout.
///
/// Works with any filter-style engine, e.g.
/// `argos-translate --from de --to en`.
#[derive(Debug, Clone)]
pub struct CommandTranslator {
    program: String,
    args: Vec<String>,
}

impl CommandTranslator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl Translator for CommandTranslator {
    fn translate(&self, text: &str) -> Result<String> {
        // Blank input has nothing to translate
        if text.trim().is_empty() {
            return Ok(text.to_string());
        }

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                TranspoolError::Translation(format!("failed to start {}: {}", self.program, e))
            })?;

        if let Some(mut stdin) = child.stdin.take()
            && let Err(e) = stdin.write_all(text.as_bytes())
            && e.kind() != std::io::ErrorKind::BrokenPipe
        {
            return Err(e.into());
        }
        // stdin is dropped by now so the engine sees EOF

        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TranspoolError::Translation(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let translated = String::from_utf8(output.stdout).map_err(|e| {
            TranspoolError::Translation(format!(
                "{} produced non-UTF-8 output: {}",
                self.program, e
            ))
        })?;
        Ok(translated.trim_end_matches(['\n', '\r']).to_string())
    }
}

/// Which translator a worker should build.
///
/// Worker processes receive this on their command line, see
/// [`TranslatorSpec::to_args`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TranslatorSpec {
    #[default]
    Echo,
    Command { program: String, args: Vec<String> },
}

impl TranslatorSpec {
    /// Build the translator.
    pub fn build(&self) -> Box<dyn Translator> {
        match self {
            Self::Echo => Box::new(EchoTranslator),
            Self::Command { program, args } => {
                Box::new(CommandTranslator::new(program.clone(), args.clone()))
            }
        }
    }

    /// Command-line arguments understood by the hidden `worker` subcommand.
    pub fn to_args(&self) -> Vec<String> {
        match self {
            Self::Echo => vec!["--translator".into(), "echo".into()],
            Self::Command { program, args } => {
                let mut out = vec![
                    "--translator".into(),
                    "command".into(),
                    "--translator-program".into(),
                    program.clone(),
                ];
                for arg in args {
                    // `=` form keeps leading dashes from being read as flags
                    out.push(format!("--translator-arg={}", arg));
                }
                out
            }
        }
    }

    /// Short label for logs.
    pub fn label(&self) -> String {
        match self {
            Self::Echo => "echo".to_string(),
            Self::Command { program, .. } => program.clone(),
        }
    }
}
