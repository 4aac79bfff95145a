//! Core of a small line-oriented shell.
//!
//! A line is split into commands at unquoted `|`, each command is tokenized
//! into an argument vector, and every command runs as its own process with
//! its standard streams chained through pipes. See [`Coordinator`] for the
//! entry point and [`Shell`] for the interactive loop around it.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod helper;
pub mod launcher;
pub mod shell;
pub mod splitter;
pub mod tokenizer;
pub mod topology;

pub use config::Config;
pub use coordinator::{Control, Coordinator, PipelineOutcome};
pub use shell::Shell;
