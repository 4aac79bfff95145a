//! Drives one line from text to a single pipeline verdict.
//!
//! The order is fixed: split, tokenize every stage, build the pipes, launch
//! every stage, close the parent's pipe ends, and only then wait. Waiting
//! earlier could leave a reader blocked on a write end the parent still holds.

use crate::config::Config;
use crate::error::{LaunchError, ParseError, PipelineError, WaitError};
use crate::helper::syscall;
use crate::launcher::{Launch, Launcher, ProcessHandle, terminate_all};
use crate::splitter::split_with_limit;
use crate::tokenizer::Stage;
use crate::topology::Topology;
use nix::sys::{
    signal::Signal,
    wait::{WaitStatus, waitpid},
};
use nix::unistd::Pid;
use std::os::fd::{AsRawFd, OwnedFd};
use tracing::{debug, warn};

/// How one stage ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Exited(i32),
    Signaled(Signal),
    /// The stage could not be waited on.
    Lost,
}

impl StageStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, StageStatus::Exited(0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageReport {
    pub index: usize,
    pub pid: Pid,
    pub status: StageStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Success,
    Failure,
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        *self == PipelineOutcome::Success
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineOutcome::Success => 0,
            PipelineOutcome::Failure => 1,
        }
    }
}

/// Per-stage detail of a completed pipeline.
#[derive(Debug, Default)]
pub struct Report {
    pub stages: Vec<StageReport>,
    pub wait_errors: Vec<WaitError>,
}

impl Report {
    /// Success only if every stage exited normally with status zero.
    pub fn outcome(&self) -> PipelineOutcome {
        if self.wait_errors.is_empty() && self.stages.iter().all(|s| s.status.is_success()) {
            PipelineOutcome::Success
        } else {
            PipelineOutcome::Failure
        }
    }

    /// Stages that spoiled the outcome.
    pub fn failed(&self) -> impl Iterator<Item = &StageReport> {
        self.stages.iter().filter(|s| !s.status.is_success())
    }
}

#[derive(Debug)]
pub enum Execution {
    /// Blank line, nothing to do.
    Idle,
    /// The line asked the shell to stop.
    Terminate(Option<i32>),
    Completed(Report),
}

/// What the caller should do after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Idle,
    Continue(PipelineOutcome),
    Terminate(Option<i32>),
}

#[derive(Debug)]
pub struct Coordinator {
    config: Config,
    source: Option<OwnedFd>,
    sink: Option<OwnedFd>,
}

impl Coordinator {
    pub fn new(config: Config) -> Self {
        Coordinator {
            config,
            source: None,
            sink: None,
        }
    }

    /// Connect the first stage's stdin to `source` and the last stage's
    /// stdout to `sink` instead of the shell's own streams.
    pub fn with_stdio(mut self, source: Option<OwnedFd>, sink: Option<OwnedFd>) -> Self {
        self.source = source;
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Split and tokenize `line` without creating anything.
    pub fn parse(&self, line: &str) -> Result<Vec<Stage>, ParseError> {
        let texts = split_with_limit(line, self.config.max_stages)?;
        let stages = texts
            .iter()
            .enumerate()
            .map(|(i, text)| Stage::parse(i, text, self.config.max_args))
            .collect::<Result<Vec<_>, _>>()?;

        if self.config.debug {
            for stage in &stages {
                eprintln!("Command {}: {} {:?}", stage.index, stage.text, stage.args);
            }
        }

        if let [stage] = stages.as_slice() {
            if stage.is_terminator(&self.config.terminator) {
                stage.exit_status()?;
            }
        }
        Ok(stages)
    }

    /// Run `line` to completion and return per-stage detail.
    pub fn execute(&self, line: &str) -> Result<Execution, PipelineError> {
        let stages = self.parse(line)?;
        if stages.is_empty() {
            return Ok(Execution::Idle);
        }
        debug!(stages = stages.len(), "running pipeline");

        let topology = Topology::build(stages.len())?;
        let launcher = Launcher::new(&self.config.terminator).with_endpoints(
            self.source.as_ref().map(AsRawFd::as_raw_fd),
            self.sink.as_ref().map(AsRawFd::as_raw_fd),
        );

        match launch_all(&stages, topology, |stage, topology| launcher.launch(stage, topology))? {
            Launched::All(handles) => Ok(Execution::Completed(wait_all(&handles))),
            Launched::Terminate(code) => Ok(Execution::Terminate(code)),
        }
    }

    /// Run `line`, reporting any error on stderr. Never fails: a bad line
    /// only fails that line.
    pub fn run(&self, line: &str) -> Control {
        match self.execute(line) {
            Ok(Execution::Idle) => Control::Idle,
            Ok(Execution::Terminate(code)) => Control::Terminate(code),
            Ok(Execution::Completed(report)) => {
                for e in &report.wait_errors {
                    eprintln!("pipesh: {e}");
                }
                Control::Continue(report.outcome())
            }
            Err(e) => {
                eprintln!("pipesh: {e}");
                Control::Continue(PipelineOutcome::Failure)
            }
        }
    }
}

enum Launched {
    All(Vec<ProcessHandle>),
    Terminate(Option<i32>),
}

/// Launch every stage, then close the parent's pipe ends. If one stage fails
/// to launch, the ends are closed and the stages already running are killed
/// and reaped before the error is returned.
fn launch_all<F>(stages: &[Stage], topology: Topology, mut launch: F) -> Result<Launched, LaunchError>
where
    F: FnMut(&Stage, &Topology) -> Result<Launch, LaunchError>,
{
    let mut handles = Vec::with_capacity(stages.len());
    for stage in stages {
        match launch(stage, &topology) {
            Ok(Launch::Spawned(handle)) => handles.push(handle),
            Ok(Launch::Terminate(code)) => return Ok(Launched::Terminate(code)),
            Err(e) => {
                topology.close_parent_ends();
                warn!(launched = handles.len(), "launch failed, killing started stages");
                terminate_all(&handles);
                return Err(e);
            }
        }
    }

    topology.close_parent_ends();
    Ok(Launched::All(handles))
}

fn wait_all(handles: &[ProcessHandle]) -> Report {
    let mut report = Report::default();
    for handle in handles {
        let status = match wait_one(handle.pid) {
            Ok(status) => status,
            Err(e) => {
                warn!("{e}");
                report.wait_errors.push(e);
                StageStatus::Lost
            }
        };
        debug!(index = handle.index, pid = handle.pid.as_raw(), ?status, "stage finished");
        report.stages.push(StageReport {
            index: handle.index,
            pid: handle.pid,
            status,
        });
    }
    report
}

fn wait_one(pid: Pid) -> Result<StageStatus, WaitError> {
    loop {
        match syscall(|| waitpid(pid, None)) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(StageStatus::Exited(code)),
            Ok(WaitStatus::Signaled(_, sig, _)) => return Ok(StageStatus::Signaled(sig)),
            Ok(_) => (),
            Err(source) => return Err(WaitError { pid, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::{Read, Seek, SeekFrom};

    fn captured(config: Config) -> (Coordinator, File) {
        let out = tempfile::tempfile().unwrap();
        let source = File::open("/dev/null").unwrap();
        let coordinator = Coordinator::new(config).with_stdio(
            Some(OwnedFd::from(source)),
            Some(OwnedFd::from(out.try_clone().unwrap())),
        );
        (coordinator, out)
    }

    fn read_all(mut file: &File) -> String {
        let mut s = String::new();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.read_to_string(&mut s).unwrap();
        s
    }

    fn completed(execution: Execution) -> Report {
        match execution {
            Execution::Completed(report) => report,
            other => panic!("expected a completed pipeline, got {other:?}"),
        }
    }

    #[test]
    fn blank_lines_are_idle() {
        let coordinator = Coordinator::new(Config::default());
        assert_eq!(coordinator.run(""), Control::Idle);
        assert_eq!(coordinator.run("  |  | "), Control::Idle);
    }

    #[test]
    fn parse_errors_fail_the_line_only() {
        let coordinator = Coordinator::new(Config::default());
        for line in ["echo \"oops", "echo a |", "| cat", "exit now"] {
            assert_eq!(
                coordinator.run(line),
                Control::Continue(PipelineOutcome::Failure),
                "line {line:?}"
            );
        }
    }

    #[test]
    fn parse_reports_the_empty_stage() {
        let coordinator = Coordinator::new(Config::default());
        assert_eq!(
            coordinator.parse("echo a || cat").unwrap_err(),
            ParseError::EmptyStage { index: 1 }
        );
    }

    #[test]
    fn limits_come_from_config() {
        let coordinator = Coordinator::new(Config::default().with_max_args(2).with_max_stages(2));
        assert!(matches!(
            coordinator.parse("echo a b").unwrap_err(),
            ParseError::TooManyArgs { max: 2, .. }
        ));
        assert_eq!(
            coordinator.parse("a | b | c").unwrap_err(),
            ParseError::TooManyStages { max: 2 }
        );
    }

    #[test]
    fn terminator_alone_stops_the_shell() {
        let coordinator = Coordinator::new(Config::default());
        assert_eq!(coordinator.run("exit"), Control::Terminate(None));
        assert_eq!(coordinator.run("  exit 2  "), Control::Terminate(Some(2)));
    }

    #[test]
    fn two_stage_pipeline_passes_data() {
        let (coordinator, out) = captured(Config::default());
        let report = completed(coordinator.execute("echo hello | cat").unwrap());
        assert_eq!(report.outcome(), PipelineOutcome::Success);
        assert_eq!(report.stages.len(), 2);
        assert_eq!(read_all(&out), "hello\n");
    }

    #[test]
    fn any_failing_stage_fails_the_pipeline() {
        let (coordinator, out) = captured(Config::default());
        let report = completed(coordinator.execute("false | echo still_works").unwrap());
        assert_eq!(report.outcome(), PipelineOutcome::Failure);
        assert_eq!(read_all(&out), "still_works\n");

        let failed: Vec<_> = report.failed().map(|s| s.index).collect();
        assert_eq!(failed, vec![0]);
        assert_eq!(report.stages[0].status, StageStatus::Exited(1));
    }

    #[test]
    fn terminator_mid_pipeline_is_not_special() {
        let (coordinator, out) = captured(Config::default());
        let report = completed(coordinator.execute("exit | echo after").unwrap());
        assert_eq!(report.outcome(), PipelineOutcome::Success);
        assert_eq!(read_all(&out), "after\n");
    }

    #[test]
    fn failed_launch_reaps_started_stages() {
        let coordinator = Coordinator::new(Config::default());
        let stages = coordinator.parse("sleep 30 | sleep 30 | cat").unwrap();
        let topology = Topology::build(stages.len()).unwrap();
        let launcher = Launcher::new("exit");

        let mut started = Vec::new();
        let result = launch_all(&stages, topology, |stage, topology| {
            if stage.index == 2 {
                return Err(LaunchError::Fork {
                    index: 2,
                    source: nix::Error::EAGAIN,
                });
            }
            let launch = launcher.launch(stage, topology)?;
            if let Launch::Spawned(handle) = &launch {
                started.push(handle.pid);
            }
            Ok(launch)
        });

        assert!(matches!(result, Err(LaunchError::Fork { index: 2, .. })));
        assert_eq!(started.len(), 2);
        for pid in started {
            assert_eq!(waitpid(pid, None).unwrap_err(), nix::Error::ECHILD);
        }
    }

    #[test]
    fn outcome_folds_statuses() {
        let pid = Pid::from_raw(1);
        let report = Report {
            stages: vec![
                StageReport {
                    index: 0,
                    pid,
                    status: StageStatus::Exited(0),
                },
                StageReport {
                    index: 1,
                    pid,
                    status: StageStatus::Signaled(Signal::SIGPIPE),
                },
            ],
            wait_errors: Vec::new(),
        };
        assert_eq!(report.outcome(), PipelineOutcome::Failure);
        assert_eq!(PipelineOutcome::Failure.exit_code(), 1);
        assert!(PipelineOutcome::Success.is_success());
    }
}
