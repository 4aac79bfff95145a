//! The read loop around the coordinator: prompt, history and signals.

use crate::{
    config::Config,
    coordinator::{Control, Coordinator},
    helper::DynError,
};
use nix::{libc, unistd::isatty};
use rustyline::{Editor, error::ReadlineError};
use signal_hook::{consts::*, iterator::Signals};
use std::{
    io::{self, BufRead},
    sync::mpsc::{Receiver, Sender, channel},
    thread,
};
use tracing::{debug, info};

/// Messages from the signal thread to the read loop.
#[derive(Debug, PartialEq, Eq)]
enum ShellMsg {
    /// Stop once the current line has resolved.
    Stop(i32),
}

#[derive(Debug)]
pub struct Shell {
    coordinator: Coordinator,
    last: i32, // status of the previous pipeline
}

impl Shell {
    pub fn new(config: Config) -> Self {
        Shell {
            coordinator: Coordinator::new(config),
            last: 0,
        }
    }

    /// Status of the most recent pipeline.
    pub fn last_status(&self) -> i32 {
        self.last
    }

    /// Run one line. Returns the shell's exit status if the line asked it to stop.
    pub fn run_line(&mut self, line: &str) -> Option<i32> {
        match self.coordinator.run(line) {
            Control::Idle => None,
            Control::Continue(outcome) => {
                self.last = outcome.exit_code();
                None
            }
            Control::Terminate(code) => Some(code.unwrap_or(self.last)),
        }
    }

    /// Read lines until EOF, `exit` or a termination signal. Returns the exit status.
    pub fn run(&mut self) -> Result<i32, DynError> {
        let (tx, rx) = channel();
        spawn_sig_handler(tx)?;

        if isatty(libc::STDIN_FILENO).unwrap_or(false) {
            self.interactive(&rx)
        } else {
            self.batch(&rx)
        }
    }

    fn interactive(&mut self, stop: &Receiver<ShellMsg>) -> Result<i32, DynError> {
        let history = self.coordinator.config().history.clone();
        let mut rl = Editor::<()>::new()?;
        if let Some(path) = &history {
            if let Err(e) = rl.load_history(path) {
                debug!("no history loaded from {}: {e}", path.display());
            }
        }

        println!("pipesh started. Type 'exit' to quit.");
        let exit_val = loop {
            let face = if self.last == 0 { '\u{1F642}' } else { '\u{1F480}' };
            match rl.readline(&format!("pipesh {} %> ", face)) {
                Ok(line) => {
                    let line_trimmed = line.trim();
                    if line_trimmed.is_empty() {
                        continue;
                    }
                    rl.add_history_entry(line_trimmed);

                    if let Some(code) = self.run_line(&line) {
                        break code;
                    }
                    if let Ok(ShellMsg::Stop(sig)) = stop.try_recv() {
                        info!(signal = sig, "stopping on signal");
                        break self.last;
                    }
                }
                Err(ReadlineError::Interrupted) => eprintln!("pipesh: type 'exit' or Ctrl+d to quit"),
                Err(ReadlineError::Eof) => break self.last,
                Err(ReadlineError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
                    eprintln!("pipesh: {e}");
                    self.last = 1;
                }
                Err(e) => {
                    eprintln!("pipesh: read error\n{e}");
                    break 1;
                }
            }
        };

        if let Some(path) = &history {
            if let Err(e) = rl.save_history(path) {
                eprintln!("pipesh: cannot write history file {}: {e}", path.display());
            }
        }
        println!("Goodbye!");
        Ok(exit_val)
    }

    /// Non-interactive input: no prompt, every line runs, EOF stops.
    /// Bytes that are not UTF-8 are replaced, never fatal.
    fn batch(&mut self, stop: &Receiver<ShellMsg>) -> Result<i32, DynError> {
        let mut input = io::stdin().lock();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match input.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => (),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            let line = String::from_utf8_lossy(&buf);
            if let Some(code) = self.run_line(&line) {
                return Ok(code);
            }
            if let Ok(ShellMsg::Stop(sig)) = stop.try_recv() {
                info!(signal = sig, "stopping on signal");
                break;
            }
        }
        Ok(self.last)
    }
}

/// Forward SIGINT and SIGTERM to the read loop instead of dying with the children.
fn spawn_sig_handler(tx: Sender<ShellMsg>) -> Result<(), DynError> {
    let mut signals = Signals::new(&[SIGINT, SIGTERM])?;
    thread::spawn(move || {
        for sig in signals.forever() {
            if tx.send(ShellMsg::Stop(sig)).is_err() {
                break;
            }
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_the_last_pipeline() {
        let mut shell = Shell::new(Config::default());
        assert_eq!(shell.run_line("false"), None);
        assert_eq!(shell.last_status(), 1);
        assert_eq!(shell.run_line("true"), None);
        assert_eq!(shell.last_status(), 0);
    }

    #[test]
    fn blank_line_keeps_status() {
        let mut shell = Shell::new(Config::default());
        shell.run_line("false");
        assert_eq!(shell.run_line("   "), None);
        assert_eq!(shell.last_status(), 1);
    }

    #[test]
    fn exit_uses_last_status_or_argument() {
        let mut shell = Shell::new(Config::default());
        shell.run_line("false");
        assert_eq!(shell.run_line("exit"), Some(1));
        assert_eq!(shell.run_line("exit 7"), Some(7));
    }

    #[test]
    fn bad_exit_argument_does_not_stop() {
        let mut shell = Shell::new(Config::default());
        assert_eq!(shell.run_line("exit soon"), None);
        assert_eq!(shell.last_status(), 1);
    }
}
