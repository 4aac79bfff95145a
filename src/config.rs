//! Limits and toggles shared by the parser, the coordinator and the REPL.

use std::env;
use std::path::PathBuf;

/// Maximum number of arguments in one command.
pub const MAX_ARGS: usize = 64;

/// Maximum number of commands in one pipeline.
pub const MAX_STAGES: usize = 200;

/// Built-in that stops the shell when it is the whole line.
pub const TERMINATOR: &str = "exit";

/// Environment variable that switches on the per-stage trace.
pub const DEBUG_ENV: &str = "SHELL_DEBUG";

const HISTORY_FILE: &str = ".pipesh_history";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub max_args: usize,
    pub max_stages: usize,
    /// Echo every parsed stage and its tokens to stderr.
    pub debug: bool,
    pub terminator: String,
    /// Where the interactive loop keeps its history. `None` disables it.
    pub history: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_args: MAX_ARGS,
            max_stages: MAX_STAGES,
            debug: false,
            terminator: TERMINATOR.to_string(),
            history: dirs::home_dir().map(|home| home.join(HISTORY_FILE)),
        }
    }
}

impl Config {
    /// Defaults plus toggles read from the process environment.
    pub fn from_env() -> Self {
        Config {
            debug: env::var_os(DEBUG_ENV).is_some(),
            ..Config::default()
        }
    }

    pub fn with_max_args(mut self, max_args: usize) -> Self {
        self.max_args = max_args;
        self
    }

    pub fn with_max_stages(mut self, max_stages: usize) -> Self {
        self.max_stages = max_stages;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_history(mut self, history: Option<PathBuf>) -> Self {
        self.history = history;
        self
    }
}
