//! Error kinds raised while turning a line into running processes.

use nix::unistd::Pid;
use thiserror::Error;

/// A malformed line. Always aborts only the current line; no process is created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unclosed quote in command '{text}'")]
    UnclosedQuote { text: String },

    #[error("too many arguments in command '{text}' (maximum {max})")]
    TooManyArgs { text: String, max: usize },

    #[error("too many commands in pipeline (maximum {max})")]
    TooManyStages { max: usize },

    #[error("empty command at position {index} of pipeline")]
    EmptyStage { index: usize },

    #[error("nul byte in command '{text}'")]
    InteriorNul { text: String },

    #[error("invalid exit status '{arg}'")]
    InvalidExitStatus { arg: String },
}

/// Failure to create the pipes or processes of a pipeline.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("cannot create pipe: {0}")]
    Pipe(#[source] nix::Error),

    #[error("cannot create process for command {index}: {source}")]
    Fork {
        index: usize,
        #[source]
        source: nix::Error,
    },

    #[error("refusing to launch empty command {index}")]
    EmptyStage { index: usize },
}

/// The coordinator could not collect a stage's termination status.
#[derive(Debug, Error)]
#[error("waiting for process {pid} failed: {source}")]
pub struct WaitError {
    pub pid: Pid,
    #[source]
    pub source: nix::Error,
}

/// Anything that stops a line before its stages are waited on.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Launch(#[from] LaunchError),
}
