//! Bounded child processes shared by the model CLI and the sandbox.
//!
//! Both pipes are drained on reader threads while the parent waits, so a
//! chatty child can never block on a full pipe. Bytes past the limit are read
//! and dropped. Input is fed from its own thread, so a child that never reads
//! stdin still hits the timeout.
//!
//! On unix the child leads its own process group. The whole group is killed
//! on timeout and once the child exits, so descendants cannot hold the pipes
//! open past the limit.

use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

const READ_CHUNK: usize = 8 * 1024;
/// How long readers may lag behind the child's exit.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Wall-clock and memory bounds for one child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub timeout: Duration,
    /// Kept per stream.
    pub output_bytes: usize,
}

/// One drained output stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    pub bytes: Vec<u8>,
    /// Bytes read past the limit.
    pub dropped: usize,
}

impl Captured {
    /// Lossy UTF-8, surrounding whitespace removed.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).trim().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Finished(ExitStatus),
    /// Killed after the timeout elapsed.
    TimedOut,
}

impl Exit {
    pub fn success(&self) -> bool {
        matches!(self, Exit::Finished(status) if status.success())
    }
}

#[derive(Debug)]
pub struct ProcessOutput {
    pub exit: Exit,
    pub stdout: Captured,
    pub stderr: Captured,
}

/// Spawn `cmd`, feed it `stdin`, and collect its output within `limits`.
///
/// Only spawning and waiting can fail; a timeout is reported through
/// [`Exit::TimedOut`].
#[instrument(skip_all, fields(timeout_secs = limits.timeout.as_secs()))]
pub fn run_bounded(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    limits: Limits,
) -> Result<ProcessOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = cmd.spawn().context("spawn command")?;
    debug!(pid = child.id(), "child spawned");
    let out_pipe = child.stdout.take().ok_or_else(|| anyhow!("stdout not piped"))?;
    let err_pipe = child.stderr.take().ok_or_else(|| anyhow!("stderr not piped"))?;
    let stdout = spawn_drain(out_pipe, limits.output_bytes);
    let stderr = spawn_drain(err_pipe, limits.output_bytes);
    if let (Some(pipe), Some(input)) = (child.stdin.take(), stdin) {
        spawn_feed(pipe, input.to_vec());
    }

    let exit = wait(&mut child, limits.timeout)?;
    if exit != Exit::TimedOut {
        // Leftover background jobs would keep the pipes open.
        if let Err(err) = kill_tree(&mut child) {
            debug!(err = format!("{err:#}"), "could not clear process group");
        }
    }
    let stdout = collect(stdout, "stdout")?;
    let stderr = collect(stderr, "stderr")?;
    if stdout.dropped + stderr.dropped > 0 {
        warn!(
            stdout_dropped = stdout.dropped,
            stderr_dropped = stderr.dropped,
            "child output over limit"
        );
    }
    debug!(?exit, "child finished");
    Ok(ProcessOutput {
        exit,
        stdout,
        stderr,
    })
}

fn wait(child: &mut Child, timeout: Duration) -> Result<Exit> {
    if let Some(status) = child.wait_timeout(timeout).context("wait for command")? {
        return Ok(Exit::Finished(status));
    }
    warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
    kill_tree(child)?;
    child.wait().context("reap killed command")?;
    Ok(Exit::TimedOut)
}

/// Kill the child's process group.
#[cfg(unix)]
fn kill_tree(child: &mut Child) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = i32::try_from(child.id()).context("pid out of range")?;
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(err) => Err(err).context("kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) -> Result<()> {
    child.kill().context("kill command")
}

/// Write `input` and close the pipe. Never joined: a child that ignores its
/// input must not stall the caller.
fn spawn_feed(mut pipe: ChildStdin, input: Vec<u8>) {
    thread::spawn(move || {
        if let Err(err) = pipe.write_all(&input) {
            debug!(%err, "child closed stdin early");
        }
    });
}

fn spawn_drain(
    reader: impl Read + Send + 'static,
    limit: usize,
) -> Receiver<std::io::Result<Captured>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(drain(reader, limit));
    });
    rx
}

/// Wait briefly for a reader; a stream still held open by an escaped
/// descendant is given up as empty.
fn collect(rx: Receiver<std::io::Result<Captured>>, stream: &str) -> Result<Captured> {
    match rx.recv_timeout(DRAIN_GRACE) {
        Ok(captured) => captured.with_context(|| format!("read {stream}")),
        Err(RecvTimeoutError::Timeout) => {
            warn!(stream, "pipe still held open after exit, abandoning reader");
            Ok(Captured::default())
        }
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("{stream} reader panicked")),
    }
}

fn drain(mut reader: impl Read, limit: usize) -> std::io::Result<Captured> {
    let mut captured = Captured::default();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            return Ok(captured);
        }
        let keep = n.min(limit.saturating_sub(captured.bytes.len()));
        captured.bytes.extend_from_slice(&chunk[..keep]);
        captured.dropped += n - keep;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", script]);
        cmd
    }

    fn limits(timeout: Duration, output_bytes: usize) -> Limits {
        Limits {
            timeout,
            output_bytes,
        }
    }

    #[test]
    fn separates_streams() {
        let output = run_bounded(
            sh("echo answer; echo trace >&2; exit 2"),
            None,
            limits(Duration::from_secs(5), 1000),
        )
        .expect("run");

        assert!(!output.exit.success());
        assert_eq!(output.stdout.text(), "answer");
        assert_eq!(output.stderr.text(), "trace");
    }

    #[test]
    fn prompt_goes_to_stdin() {
        let output = run_bounded(
            sh("tr a-z A-Z"),
            Some(b"solve day one"),
            limits(Duration::from_secs(5), 1000),
        )
        .expect("run");

        assert!(output.exit.success());
        assert_eq!(output.stdout.text(), "SOLVE DAY ONE");
    }

    #[test]
    fn slow_child_is_killed() {
        let output = run_bounded(
            sh("exec sleep 5"),
            None,
            limits(Duration::from_millis(200), 1000),
        )
        .expect("run");

        assert_eq!(output.exit, Exit::TimedOut);
        assert!(!output.exit.success());
    }

    #[test]
    fn timeout_holds_when_a_descendant_keeps_the_pipes() {
        let started = Instant::now();
        let output = run_bounded(
            sh("sleep 6; echo late"),
            None,
            limits(Duration::from_millis(300), 1000),
        )
        .expect("run");

        assert_eq!(output.exit, Exit::TimedOut);
        assert!(!output.stdout.text().contains("late"));
        assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
    }

    #[test]
    fn child_ignoring_large_input_still_times_out() {
        let prompt = vec![b'x'; 1 << 20];
        let started = Instant::now();
        let output = run_bounded(
            sh("exec sleep 6"),
            Some(&prompt),
            limits(Duration::from_millis(300), 1000),
        )
        .expect("run");

        assert_eq!(output.exit, Exit::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
    }

    #[test]
    fn background_job_does_not_outlive_the_child() {
        let started = Instant::now();
        let output = run_bounded(
            sh("sleep 6 & echo done"),
            None,
            limits(Duration::from_secs(5), 1000),
        )
        .expect("run");

        assert!(output.exit.success());
        assert_eq!(output.stdout.text(), "done");
        assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
    }

    #[test]
    fn output_past_limit_is_dropped() {
        let output = run_bounded(
            sh("printf 'abcdefghij'; printf 'xyz' >&2"),
            None,
            limits(Duration::from_secs(5), 4),
        )
        .expect("run");

        assert_eq!(output.stdout.bytes, b"abcd");
        assert_eq!(output.stdout.dropped, 6);
        assert_eq!(output.stderr.dropped, 0);
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let err = run_bounded(
            Command::new("no-such-interpreter-for-puzzles"),
            None,
            limits(Duration::from_secs(1), 100),
        )
        .unwrap_err();

        assert!(err.to_string().contains("spawn command"));
    }
}
