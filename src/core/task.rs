//! Task - one host's child process and its three pipes
//!
//! A task never blocks. The manager calls [`Task::handle_ready`] only for
//! descriptors the multiplexer reported ready, every pipe is non-blocking, and
//! each read or write moves at most [`BUFFER_SIZE`] bytes so one busy host
//! cannot starve the rest.

use super::environ::Environment;
use super::iomap::IoMap;
use super::sink::{close_channel, OutputSink, SinkChannel};
use crate::config::TaskConfig;
use crate::host::HostSpec;
use crate::report::TaskResult;
use chrono::{DateTime, Utc};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::{setsid, Pid};
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Largest chunk moved per readiness event
pub const BUFFER_SIZE: usize = 1 << 16;

/// Signal used for timeouts and interrupts
pub const KILL_SIGNAL: Signal = Signal::SIGKILL;

/// Exit status recorded when the child could not be reaped
const REAP_FAILED_STATUS: i32 = 255;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("Task for {0} was already started")]
    AlreadyStarted(String),
}

/// Outcome of one non-blocking read
enum Chunk {
    Data(Vec<u8>),
    Eof,
    Retry,
    Failed(io::Error),
}

/// Runs one command for one host and records how it went
pub struct Task {
    pub host: String,
    pub port: Option<String>,
    pub user: Option<String>,
    pub name: String,
    /// `user@host:port`, with the parts matching the defaults left out
    pub pretty_host: String,
    cmd: Vec<String>,
    display_cmd: Option<String>,
    config: TaskConfig,

    key: usize,
    proc: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    outfile: Option<SinkChannel>,
    errfile: Option<SinkChannel>,

    inputbuffer: Vec<u8>,
    byteswritten: usize,
    outputbuffer: Vec<u8>,
    errorbuffer: Vec<u8>,

    failures: Vec<String>,
    killed: bool,
    exitstatus: Option<i32>,
    started: Option<Instant>,
    started_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a task that will run `cmd` for `host`. Nothing is spawned yet.
    pub fn new(host: &HostSpec, cmd: Vec<String>, config: TaskConfig) -> Self {
        let mut pretty_host = host.host.clone();
        if let Some(user) = &host.user {
            if config.user.as_ref() != Some(user) {
                pretty_host = format!("{}@{}", user, pretty_host);
            }
        }
        if let Some(port) = &host.port {
            pretty_host = format!("{}:{}", pretty_host, port);
        }

        Self {
            host: host.host.clone(),
            port: host.port.clone(),
            user: host.user.clone(),
            name: host.name.clone(),
            pretty_host,
            cmd,
            display_cmd: None,
            config,
            key: 0,
            proc: None,
            stdin: None,
            stdout: None,
            stderr: None,
            outfile: None,
            errfile: None,
            inputbuffer: Vec::new(),
            byteswritten: 0,
            outputbuffer: Vec::new(),
            errorbuffer: Vec::new(),
            failures: Vec::new(),
            killed: false,
            exitstatus: None,
            started: None,
            started_at: None,
        }
    }

    /// Bytes to feed to the child's stdin
    pub fn with_input(mut self, input: Vec<u8>) -> Self {
        self.inputbuffer = input;
        self
    }

    /// Command text to show in reports instead of the full argv
    pub fn with_display_command(mut self, command: impl Into<String>) -> Self {
        self.display_cmd = Some(command.into());
        self
    }

    /// Spawn the child and register its pipes under key `nodenum`.
    ///
    /// `nodenum` is also exported to the child as `PSSH_NODENUM`.
    pub fn start(
        &mut self,
        nodenum: usize,
        iomap: &mut dyn IoMap,
        sink: Option<&mut dyn OutputSink>,
        env: &Environment,
        askpass_socket: Option<&str>,
    ) -> Result<(), TaskError> {
        if self.started.is_some() {
            return Err(TaskError::AlreadyStarted(self.pretty_host.clone()));
        }

        if let Some(sink) = sink {
            match sink.open(&self.pretty_host) {
                Ok(channels) => {
                    self.outfile = channels.out;
                    self.errfile = channels.err;
                }
                Err(e) => {
                    log::warn!("Could not open output files for {}: {}", self.pretty_host, e);
                    self.failures.push(format!("Could not open output files: {}", e));
                }
            }
        }

        let Some((program, args)) = self.cmd.split_first() else {
            return Err(TaskError::Spawn {
                command: String::new(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "empty command"),
            });
        };
        let mut command = Command::new(program);
        command
            .args(args)
            .env_clear()
            .envs(env.for_task(nodenum, &self.host, askpass_socket, self.config.verbose))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // SAFETY: setsid is async-signal-safe. The child leads a new session
        // and process group, so one killpg reaches everything it forks, and
        // without a controlling terminal ssh falls back to SSH_ASKPASS.
        unsafe {
            command.pre_exec(|| setsid().map(drop).map_err(io::Error::from));
        }

        let mut child = command.spawn().map_err(|source| TaskError::Spawn {
            command: self.cmd.join(" "),
            source,
        })?;
        self.started = Some(Instant::now());
        self.started_at = Some(Utc::now());
        self.key = nodenum;
        log::debug!("Started {} (pid {}): {:?}", self.pretty_host, child.id(), self.cmd);

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        self.proc = Some(child);

        // A remote shell that never reads stdin must still see EOF, so an
        // unused stdin is closed right away.
        if let Some(stdin) = stdin.filter(|_| !self.inputbuffer.is_empty()) {
            set_nonblocking(&stdin, &self.pretty_host);
            iomap.register_write(stdin.as_raw_fd(), nodenum);
            self.stdin = Some(stdin);
        }
        if let Some(stdout) = stdout {
            set_nonblocking(&stdout, &self.pretty_host);
            iomap.register_read(stdout.as_raw_fd(), nodenum);
            self.stdout = Some(stdout);
        }
        if let Some(stderr) = stderr {
            set_nonblocking(&stderr, &self.pretty_host);
            iomap.register_read(stderr.as_raw_fd(), nodenum);
            self.stderr = Some(stderr);
        }
        Ok(())
    }

    /// Service a descriptor the multiplexer reported ready.
    ///
    /// Reports for a pipe this task already closed are ignored.
    pub fn handle_ready(&mut self, fd: RawFd, iomap: &mut dyn IoMap) {
        if raw_fd(&self.stdin) == Some(fd) {
            self.handle_stdin(iomap);
        } else if raw_fd(&self.stdout) == Some(fd) {
            self.handle_stdout(iomap);
        } else if raw_fd(&self.stderr) == Some(fd) {
            self.handle_stderr(iomap);
        } else {
            log::trace!("{}: ignoring readiness for stale fd {}", self.pretty_host, fd);
        }
    }

    fn handle_stdin(&mut self, iomap: &mut dyn IoMap) {
        let Some(stdin) = self.stdin.as_mut() else {
            return;
        };
        let start = self.byteswritten;
        let end = self.inputbuffer.len().min(start + BUFFER_SIZE);
        if start < end {
            match stdin.write(&self.inputbuffer[start..end]) {
                Ok(n) => self.byteswritten = start + n,
                Err(e) if is_retryable(&e) => return,
                Err(e) => {
                    self.close_stdin(iomap);
                    self.log_exception(&e);
                    return;
                }
            }
        }
        if self.byteswritten >= self.inputbuffer.len() {
            self.close_stdin(iomap);
        }
    }

    fn handle_stdout(&mut self, iomap: &mut dyn IoMap) {
        let Some(stdout) = self.stdout.as_mut() else {
            return;
        };
        match read_chunk(stdout) {
            Chunk::Data(buf) => {
                if self.config.inline {
                    self.outputbuffer.extend_from_slice(&buf);
                }
                forward(&mut self.outfile, &buf, &self.pretty_host, &mut self.failures);
                if self.config.print_out {
                    self.echo(&buf);
                }
            }
            Chunk::Eof => self.close_stdout(iomap),
            Chunk::Retry => {}
            Chunk::Failed(e) => {
                self.close_stdout(iomap);
                self.log_exception(&e);
            }
        }
    }

    fn handle_stderr(&mut self, iomap: &mut dyn IoMap) {
        let Some(stderr) = self.stderr.as_mut() else {
            return;
        };
        match read_chunk(stderr) {
            Chunk::Data(buf) => {
                if self.config.inline {
                    self.errorbuffer.extend_from_slice(&buf);
                }
                forward(&mut self.errfile, &buf, &self.pretty_host, &mut self.failures);
            }
            Chunk::Eof => self.close_stderr(iomap),
            Chunk::Retry => {}
            Chunk::Failed(e) => {
                self.close_stderr(iomap);
                self.log_exception(&e);
            }
        }
    }

    fn close_stdin(&mut self, iomap: &mut dyn IoMap) {
        if let Some(stdin) = self.stdin.take() {
            iomap.unregister(stdin.as_raw_fd());
        }
    }

    fn close_stdout(&mut self, iomap: &mut dyn IoMap) {
        if let Some(stdout) = self.stdout.take() {
            iomap.unregister(stdout.as_raw_fd());
        }
        self.close_sink(SinkSide::Out);
    }

    fn close_stderr(&mut self, iomap: &mut dyn IoMap) {
        if let Some(stderr) = self.stderr.take() {
            iomap.unregister(stderr.as_raw_fd());
        }
        self.close_sink(SinkSide::Err);
    }

    fn close_sink(&mut self, side: SinkSide) {
        let channel = match side {
            SinkSide::Out => self.outfile.take(),
            SinkSide::Err => self.errfile.take(),
        };
        if let Some(channel) = channel {
            if let Err(e) = close_channel(channel) {
                log::warn!("{}: could not close output file: {}", self.pretty_host, e);
                self.failures.push(format!("Could not write output file: {}", e));
            }
        }
    }

    /// Print a stdout chunk as it arrives, under a host banner
    fn echo(&self, buf: &[u8]) {
        if let Err(e) = write_echo(&mut io::stdout().lock(), &self.name, buf) {
            log::debug!("Could not echo output of {}: {}", self.pretty_host, e);
        }
    }

    fn log_exception(&mut self, e: &io::Error) {
        log::warn!("{}: {}", self.pretty_host, e);
        if self.config.verbose {
            self.failures.push(format!("Exception: {:?}", e));
        } else {
            self.failures.push(e.to_string());
        }
    }

    /// Whether the task still needs attention from the manager.
    ///
    /// Open pipes win over the exit status: a child that already exited may
    /// still have output buffered in them.
    pub fn running(&mut self) -> bool {
        if self.has_open_pipes() {
            return true;
        }
        let Some(child) = self.proc.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) if self.killed => {
                // SIGKILL is on its way; don't wait on a child that may be
                // stuck in uninterruptible sleep.
                self.exitstatus = Some(-(KILL_SIGNAL as i32));
                self.proc = None;
                false
            }
            Ok(None) => true,
            Ok(Some(status)) => {
                let code = exit_code(status);
                self.exitstatus = Some(code);
                // A timeout or interrupt already explains the signal.
                if !self.killed {
                    if code < 0 {
                        self.failures.push(format!("Killed by signal {}", -code));
                    } else if code > 0 {
                        self.failures.push(format!("Exited with error code {}", code));
                    }
                }
                self.proc = None;
                false
            }
            Err(e) => {
                log::error!("Could not reap {}: {}", self.pretty_host, e);
                self.failures.push(format!("Failed to reap process: {}", e));
                self.exitstatus = Some(REAP_FAILED_STATUS);
                self.proc = None;
                false
            }
        }
    }

    /// Kill the process group and record a timeout
    pub fn timedout(&mut self) {
        if !self.killed {
            self.kill();
            self.failures.push("Timed out".to_string());
        }
    }

    /// Kill the process group and record an operator interrupt
    pub fn interrupted(&mut self) {
        if !self.killed {
            self.kill();
            self.failures.push("Interrupted".to_string());
        }
    }

    /// Mark a task that never started as cancelled
    pub fn cancel(&mut self) {
        self.failures.push("Cancelled".to_string());
    }

    /// Record a failure found outside the task, such as a spawn error
    pub fn fail(&mut self, message: impl Into<String>) {
        self.failures.push(message.into());
    }

    fn kill(&mut self) {
        if let Some(child) = &self.proc {
            let pgid = Pid::from_raw(child.id() as i32);
            if let Err(e) = killpg(pgid, KILL_SIGNAL) {
                // Most likely the group is already gone.
                log::debug!("killpg({}) for {} failed: {}", pgid, self.pretty_host, e);
            }
            self.killed = true;
        }
    }

    /// Kill the group, close every pipe and block until the child is reaped
    pub fn abort(&mut self, iomap: &mut dyn IoMap) {
        if !self.killed {
            self.kill();
        }
        self.close_stdin(iomap);
        self.close_stdout(iomap);
        self.close_stderr(iomap);
        if let Some(mut child) = self.proc.take() {
            match child.wait() {
                Ok(status) => self.exitstatus = Some(exit_code(status)),
                Err(e) => {
                    log::error!("Could not reap {}: {}", self.pretty_host, e);
                    self.failures.push(format!("Failed to reap process: {}", e));
                    self.exitstatus = Some(REAP_FAILED_STATUS);
                }
            }
        }
    }

    /// Time since the child was spawned
    pub fn elapsed(&self) -> Option<Duration> {
        self.started.map(|started| started.elapsed())
    }

    pub fn key(&self) -> usize {
        self.key
    }

    pub fn is_started(&self) -> bool {
        self.started.is_some()
    }

    pub fn killed(&self) -> bool {
        self.killed
    }

    pub fn exitstatus(&self) -> Option<i32> {
        self.exitstatus
    }

    pub fn failures(&self) -> &[String] {
        &self.failures
    }

    pub fn bytes_written(&self) -> usize {
        self.byteswritten
    }

    pub fn output(&self) -> &[u8] {
        &self.outputbuffer
    }

    pub fn errors(&self) -> &[u8] {
        &self.errorbuffer
    }

    pub fn stdin_fd(&self) -> Option<RawFd> {
        raw_fd(&self.stdin)
    }

    pub fn has_open_pipes(&self) -> bool {
        self.stdin.is_some() || self.stdout.is_some() || self.stderr.is_some()
    }

    /// Command text for reports
    pub fn command_line(&self) -> String {
        self.display_cmd
            .clone()
            .unwrap_or_else(|| self.cmd.join(" "))
    }

    /// Consume a finished task into its result record
    pub fn into_result(self) -> TaskResult {
        TaskResult {
            started: self.started_at,
            command: self.command_line(),
            host: self.host,
            name: self.name,
            pretty_host: self.pretty_host,
            stdout: self.outputbuffer,
            stderr: self.errorbuffer,
            exitcode: self.exitstatus,
            failures: self.failures,
        }
    }
}

#[derive(Clone, Copy)]
enum SinkSide {
    Out,
    Err,
}

fn raw_fd<T: AsRawFd>(pipe: &Option<T>) -> Option<RawFd> {
    pipe.as_ref().map(AsRawFd::as_raw_fd)
}

fn is_retryable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

fn read_chunk(pipe: &mut impl Read) -> Chunk {
    let mut buf = vec![0u8; BUFFER_SIZE];
    match pipe.read(&mut buf) {
        Ok(0) => Chunk::Eof,
        Ok(n) => {
            buf.truncate(n);
            Chunk::Data(buf)
        }
        Err(e) if is_retryable(&e) => Chunk::Retry,
        Err(e) => Chunk::Failed(e),
    }
}

/// Append to a sink channel; a channel that fails once is dropped
fn forward(channel: &mut Option<SinkChannel>, buf: &[u8], host: &str, failures: &mut Vec<String>) {
    let Some(writer) = channel.as_mut() else {
        return;
    };
    if let Err(e) = writer.write_all(buf) {
        log::warn!("{}: could not write output file: {}", host, e);
        failures.push(format!("Could not write output file: {}", e));
        *channel = None;
    }
}

fn set_nonblocking(pipe: &impl AsFd, host: &str) {
    let fd = pipe.as_fd();
    let result = fcntl(fd, FcntlArg::F_GETFL).and_then(|flags| {
        let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
        fcntl(fd, FcntlArg::F_SETFL(flags))
    });
    if let Err(e) = result {
        log::warn!("{}: could not make pipe non-blocking: {}", host, e);
    }
}

/// Write `buf` under a banner naming `name`, ending on a newline
fn write_echo(out: &mut impl Write, name: &str, buf: &[u8]) -> io::Result<()> {
    writeln!(out, "=================================  [{}]  ========================", name)?;
    out.write_all(buf)?;
    if buf.last() != Some(&b'\n') {
        out.write_all(b"\n")?;
    }
    out.flush()
}

/// Exit code, or `-N` for death by signal `N`
fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| -status.signal().unwrap_or(0))
}
