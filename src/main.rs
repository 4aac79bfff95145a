use argh::FromArgs;
use pipesh::{Config, Shell};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(FromArgs)]
/// Run commands connected by pipes.
struct Args {
    /// run a single line and exit with its status
    #[argh(option, short = 'c')]
    command: Option<String>,

    /// echo every parsed command and its arguments to stderr
    #[argh(switch)]
    debug: bool,

    /// maximum number of arguments per command
    #[argh(option)]
    max_args: Option<usize>,

    /// maximum number of commands per line
    #[argh(option)]
    max_stages: Option<usize>,

    /// history file for interactive sessions
    #[argh(option)]
    history: Option<PathBuf>,
}

impl Args {
    fn config(&self) -> Config {
        let mut config = Config::from_env();
        if self.debug {
            config = config.with_debug(true);
        }
        if let Some(n) = self.max_args {
            config = config.with_max_args(n);
        }
        if let Some(n) = self.max_stages {
            config = config.with_max_stages(n);
        }
        if let Some(path) = &self.history {
            config = config.with_history(Some(path.clone()));
        }
        config
    }
}

fn main() -> ExitCode {
    // Logs go to stderr so they never mix with pipeline output (RUST_LOG).
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let args: Args = argh::from_env();
    let mut shell = Shell::new(args.config());

    let status = match &args.command {
        Some(line) => shell.run_line(line).unwrap_or(shell.last_status()),
        None => match shell.run() {
            Ok(status) => status,
            Err(e) => {
                eprintln!("pipesh: {e}");
                1
            }
        },
    };
    ExitCode::from(status as u8)
}
