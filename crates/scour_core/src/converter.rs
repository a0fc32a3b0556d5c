//! Bounded execution of external conversion programs.
//!
//! Commands are spawned directly, never through a shell; `{input}` and `{output}`
//! placeholders are substituted per argument.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(25);
const STDERR_EXCERPT: usize = 512;

#[derive(Debug, Error)]
pub enum ConverterError {
    #[error("Cannot start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} timed out after {}s", .after.as_secs())]
    Timeout { program: String, after: Duration },

    #[error("{program} exited with {code:?}: {stderr}")]
    NonZeroExit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("I/O error talking to {program}: {source}")]
    Io {
        program: String,
        source: std::io::Error,
    },

    #[error("Output reader for {0} panicked")]
    ReaderPanicked(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    fn resolve_args(&self, input: &Path, output: Option<&Path>) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = output.map(|p| p.to_string_lossy());
        self.args
            .iter()
            .map(|arg| {
                let arg = arg.replace("{input}", &input);
                match &output {
                    Some(out) => arg.replace("{output}", out),
                    None => arg,
                }
            })
            .collect()
    }
}

/// Captured result of a successful run.
#[derive(Debug, Clone)]
pub struct ConverterOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ConverterOutput {
    #[must_use]
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

#[derive(Debug, Clone)]
pub struct ExternalConverter {
    spec: CommandSpec,
    timeout: Duration,
}

impl ExternalConverter {
    #[must_use]
    pub fn new(spec: CommandSpec, timeout: Duration) -> Self {
        Self { spec, timeout }
    }

    /// Runs the command to completion.
    ///
    /// The timeout covers the whole run, including draining the pipes. On unix the
    /// child leads its own process group, and the group is killed once the child is
    /// gone, so forked helpers holding the pipes open cannot outlive the call.
    pub fn run(
        &self,
        input: &Path,
        output: Option<&Path>,
    ) -> Result<ConverterOutput, ConverterError> {
        let program = &self.spec.program;
        let args = self.spec.resolve_args(input, output);
        tracing::debug!(%program, ?args, "running converter");

        let mut command = Command::new(program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let mut child = command.spawn().map_err(|source| ConverterError::Spawn {
            program: program.clone(),
            source,
        })?;

        let deadline = Instant::now() + self.timeout;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = self.wait(&mut child, deadline)?;
        kill_group(&child);

        let stdout = self.collect(stdout, deadline)?;
        let stderr = self.collect(stderr, deadline)?;

        if !status.success() {
            let text = String::from_utf8_lossy(&stderr);
            let excerpt: String = text.trim().chars().take(STDERR_EXCERPT).collect();
            return Err(ConverterError::NonZeroExit {
                program: program.clone(),
                code: status.code(),
                stderr: excerpt,
            });
        }

        Ok(ConverterOutput { stdout, stderr })
    }

    fn wait(&self, child: &mut Child, deadline: Instant) -> Result<ExitStatus, ConverterError> {
        let io_err = |source| ConverterError::Io {
            program: self.spec.program.clone(),
            source,
        };
        loop {
            if let Some(status) = child.try_wait().map_err(io_err)? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                tracing::warn!(program = %self.spec.program, "converter timed out, killing");
                kill_group(child);
                let _ = child.kill();
                let _ = child.wait();
                return Err(self.timed_out());
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Joins a pipe reader, giving up at `deadline`. A reader left behind finishes
    /// on its own once the last holder of the pipe exits.
    fn collect(&self, reader: Reader, deadline: Instant) -> Result<Vec<u8>, ConverterError> {
        let program = &self.spec.program;
        let Some(handle) = reader else {
            return Ok(Vec::new());
        };
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                tracing::warn!(%program, "converter output still open after exit, giving up");
                return Err(self.timed_out());
            }
            thread::sleep(POLL_INTERVAL);
        }
        handle
            .join()
            .map_err(|_| ConverterError::ReaderPanicked(program.clone()))?
            .map_err(|source| ConverterError::Io {
                program: program.clone(),
                source,
            })
    }

    fn timed_out(&self) -> ConverterError {
        ConverterError::Timeout {
            program: self.spec.program.clone(),
            after: self.timeout,
        }
    }
}

type Reader = Option<JoinHandle<std::io::Result<Vec<u8>>>>;

/// Pipes are read on their own threads so a chatty child cannot block on a full pipe.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Reader {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            pipe.read_to_end(&mut buf)?;
            Ok(buf)
        })
    })
}

/// Kills whatever is left of the child's process group.
#[cfg(unix)]
fn kill_group(child: &Child) {
    use rustix::process::{Pid, Signal, kill_process_group};
    // ESRCH just means the group is already empty.
    let _ = kill_process_group(Pid::from_child(child), Signal::KILL);
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn converter(program: &str, args: &[&str], timeout: Duration) -> ExternalConverter {
        ExternalConverter::new(CommandSpec::new(program, args.iter().copied()), timeout)
    }

    #[test]
    fn placeholders_substituted() {
        let spec = CommandSpec::new("tool", ["-i", "{input}", "{output}/page"]);
        let args = spec.resolve_args(Path::new("/tmp/a b.doc"), Some(Path::new("/out")));
        assert_eq!(args, vec!["-i", "/tmp/a b.doc", "/out/page"]);

        let args = spec.resolve_args(Path::new("x"), None);
        assert_eq!(args, vec!["-i", "x", "{output}/page"]);
    }

    #[test]
    fn captures_stdout() {
        let out = converter("echo", &["hello", "{input}"], Duration::from_secs(10))
            .run(Path::new("world"), None)
            .unwrap();
        assert_eq!(out.stdout_lossy(), "hello world\n");
    }

    #[test]
    fn nonzero_exit_is_error() {
        let err = converter("sh", &["-c", "echo broken >&2; exit 3"], Duration::from_secs(10))
            .run(Path::new("unused"), None)
            .unwrap_err();
        match err {
            ConverterError::NonZeroExit { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn timeout_kills_child() {
        let started = Instant::now();
        let err = converter("sleep", &["10"], Duration::from_millis(200))
            .run(Path::new("unused"), None)
            .unwrap_err();
        assert!(matches!(err, ConverterError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn forked_helper_cannot_hold_the_run() {
        let started = Instant::now();
        let out = converter("sh", &["-c", "sleep 6 & echo hi"], Duration::from_secs(1))
            .run(Path::new("/dev/null"), None)
            .unwrap();
        assert_eq!(out.stdout_lossy(), "hi\n");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn output_held_past_deadline_times_out() {
        // setsid moves the helper out of the group, so only the drain deadline applies.
        let has_setsid = ["/usr/bin/setsid", "/bin/setsid"]
            .iter()
            .any(|p| Path::new(p).exists());
        if !has_setsid {
            return;
        }
        let started = Instant::now();
        let err = converter("sh", &["-c", "setsid sleep 6 & echo hi"], Duration::from_millis(500))
            .run(Path::new("/dev/null"), None)
            .unwrap_err();
        assert!(matches!(err, ConverterError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn missing_program() {
        let err = converter("scour-no-such-converter", &[], Duration::from_secs(1))
            .run(Path::new("x"), None)
            .unwrap_err();
        assert!(matches!(err, ConverterError::Spawn { .. }));
    }
}
