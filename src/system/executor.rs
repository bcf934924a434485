// src/system/executor.rs

use crate::system::{pty, signals::SignalFlags, terminal};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::env;
use std::ffi::OsString;
use std::fmt;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Mutex;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const CANCEL_GRACE: Duration = Duration::from_secs(3);
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(500);
const READ_CHUNK_SIZE: usize = 8192;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("No command specified to run.")]
    EmptyCommand,
    #[error("Executable '{0}' was not found.")]
    ExecutableNotFound(String),
    #[error("Command '{command}' could not be started: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("Command '{command}' exited with code {code}.")]
    ProcessFailed { command: String, code: i32 },
    #[error("Operation was cancelled by the user.")]
    Cancelled,
    #[error("I/O error while running '{command}': {source}")]
    Io {
        command: String,
        #[source]
        source: io::Error,
    },
}

pub type ExecResult<T> = Result<T, ExecutionError>;

/// How the child's output side is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminalMode {
    /// Use a pseudo-terminal when the operation streams to the user and the
    /// parent is interactive.
    #[default]
    Auto,
    /// Never allocate a pseudo-terminal.
    Pipes,
    /// Ask for a pseudo-terminal. Still ignored on non-interactive parents.
    Pty,
}

/// What the child reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputSource {
    #[default]
    Null,
    /// The real terminal's stdin. The child then stays in the foreground
    /// process group.
    Inherit,
}

/// An immutable description of one process to run.
///
/// Built with consuming setters:
///
/// ```
/// use devx::system::executor::{ExecutionRequest, TerminalMode};
///
/// let request = ExecutionRequest::new(["git", "status"])
///     .cwd("/tmp")
///     .env("GIT_PAGER", "cat")
///     .terminal(TerminalMode::Pipes);
/// assert_eq!(request.program(), Some("git"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    argv: Vec<String>,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
    terminal: TerminalMode,
    input: InputSource,
}

impl ExecutionRequest {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            cwd: None,
            env: BTreeMap::new(),
            terminal: TerminalMode::Auto,
            input: InputSource::Null,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.argv.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    #[must_use]
    pub fn terminal(mut self, mode: TerminalMode) -> Self {
        self.terminal = mode;
        self
    }

    #[must_use]
    pub fn input(mut self, input: InputSource) -> Self {
        self.input = input;
        self
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn env_overlay(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn terminal_mode(&self) -> TerminalMode {
        self.terminal
    }

    /// Shell-quoted rendering, for logs and error messages.
    pub fn display(&self) -> String {
        shlex::try_join(self.argv.iter().map(String::as_str))
            .unwrap_or_else(|_| self.argv.join(" "))
    }
}

/// Options for [`ProcessRunner::capture`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureOptions {
    /// Merge stderr into stdout.
    pub cross_streams: bool,
    /// Stream output to the terminal while capturing it.
    pub show: bool,
    /// Turn a non-zero exit into [`ExecutionError::ProcessFailed`].
    pub check: bool,
}

/// Outcome of a finished process. Owned by the caller.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    /// Whether output went through a pseudo-terminal.
    pub used_pty: bool,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A detached process. The runner keeps no claim on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
}

/// Callback run with the final exit code right before the process exits.
pub type ExitHook = Box<dyn FnOnce(i32) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamKind {
    Out,
    Err,
}

/// Where a child's output goes while it runs.
enum OutputTarget<'a> {
    /// Straight to the user's terminal.
    Terminal,
    Capture { show: bool, cross_streams: bool },
    Writer {
        sink: &'a mut dyn Write,
        cross_streams: bool,
    },
}

/// Spawns and supervises child processes for one invocation.
pub struct ProcessRunner {
    interactive: bool,
    pty_enabled: bool,
    signals: SignalFlags,
    exit_hooks: Mutex<Vec<ExitHook>>,
}

impl fmt::Debug for ProcessRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessRunner")
            .field("interactive", &self.interactive)
            .field("pty_enabled", &self.pty_enabled)
            .finish_non_exhaustive()
    }
}

impl ProcessRunner {
    pub fn new(interactive: bool, pty_enabled: bool, signals: SignalFlags) -> Self {
        Self {
            interactive,
            pty_enabled,
            signals,
            exit_hooks: Mutex::new(Vec::new()),
        }
    }

    /// A runner for background work: no terminal, no PTY, private signal flags.
    pub fn non_interactive() -> Self {
        Self::new(false, false, SignalFlags::detached())
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn signals(&self) -> &SignalFlags {
        &self.signals
    }

    /// Registers a callback for [`Self::exit_with`] and [`Self::run_exit_hooks`].
    pub fn add_exit_hook(&self, hook: ExitHook) {
        if let Ok(mut hooks) = self.exit_hooks.lock() {
            hooks.push(hook);
        }
    }

    /// Runs (and consumes) every registered exit hook.
    pub fn run_exit_hooks(&self, exit_code: i32) {
        let hooks = self
            .exit_hooks
            .lock()
            .map(|mut guard| std::mem::take(&mut *guard))
            .unwrap_or_default();
        for hook in hooks {
            hook(exit_code);
        }
    }

    /// Runs to completion and returns the exit code. Output streams live to
    /// the terminal, through a PTY when the parent is interactive.
    pub fn run(&self, request: &ExecutionRequest) -> ExecResult<i32> {
        self.execute(request, OutputTarget::Terminal)
            .map(|result| result.exit_code)
    }

    /// Runs to completion and returns the captured output.
    pub fn capture(
        &self,
        request: &ExecutionRequest,
        options: CaptureOptions,
    ) -> ExecResult<ExecutionResult> {
        let result = self.execute(
            request,
            OutputTarget::Capture {
                show: options.show,
                cross_streams: options.cross_streams,
            },
        )?;
        if options.check && !result.success() {
            return Err(ExecutionError::ProcessFailed {
                command: request.display(),
                code: result.exit_code,
            });
        }
        Ok(result)
    }

    /// Streams stdout (and stderr with `cross_streams`) into `sink`.
    /// Without `cross_streams`, stderr still goes to the terminal.
    pub fn redirect(
        &self,
        request: &ExecutionRequest,
        sink: &mut dyn Write,
        cross_streams: bool,
    ) -> ExecResult<i32> {
        self.execute(
            request,
            OutputTarget::Writer {
                sink,
                cross_streams,
            },
        )
        .map(|result| result.exit_code)
    }

    /// Hands the real terminal to the child. Nothing is captured and the
    /// child stays in the foreground process group, so terminal-generated
    /// signals reach it directly.
    pub fn attach(&self, request: &ExecutionRequest) -> ExecResult<i32> {
        let program = resolve_program(request)?;
        self.ensure_not_cancelled()?;

        let mut command = base_command(&program, request);
        command
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        log::debug!("Attaching to: {}", request.display());
        let mut child = command.spawn().map_err(|e| spawn_error(request, e))?;

        loop {
            if let Some(status) = child.try_wait().map_err(|e| io_error(request, e))? {
                // The terminal already delivered any interrupt to the child.
                self.signals.clear_interrupt();
                return Ok(exit_code_of(status));
            }
            if self.signals.is_interrupted() && !self.interactive {
                terminate(&mut child, false);
                return Err(ExecutionError::Cancelled);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Runs the command, fires the exit hooks and terminates this process
    /// with the child's exit code.
    pub fn exit_with(&self, request: &ExecutionRequest) -> ExecResult<Infallible> {
        let code = self.run(request)?;
        self.exit(code)
    }

    /// Fires the exit hooks and terminates this process.
    pub fn exit(&self, code: i32) -> ! {
        self.run_exit_hooks(code);
        let _ = io::stdout().flush();
        std::process::exit(code)
    }

    /// Runs quietly unless `verbose`; on failure, the captured output is
    /// replayed to stderr.
    pub fn run_quietly(&self, request: &ExecutionRequest, verbose: bool) -> ExecResult<()> {
        let code = if verbose {
            self.run(request)?
        } else {
            let result = self.capture(
                request,
                CaptureOptions {
                    cross_streams: true,
                    ..CaptureOptions::default()
                },
            )?;
            if !result.success() {
                eprint!("{}", result.stdout);
            }
            result.exit_code
        };
        if code == 0 {
            Ok(())
        } else {
            Err(ExecutionError::ProcessFailed {
                command: request.display(),
                code,
            })
        }
    }

    /// Starts `request` in its own session with null stdio and forgets it.
    pub fn spawn_daemon(&self, request: &ExecutionRequest) -> ExecResult<ProcessHandle> {
        let program = resolve_program(request)?;
        let mut command = base_command(&program, request);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        detach_session(&mut command);

        let child = command.spawn().map_err(|e| spawn_error(request, e))?;
        let handle = ProcessHandle { pid: child.id() };
        log::debug!("Spawned detached process {} for: {}", handle.pid, request.display());
        Ok(handle)
    }

    fn ensure_not_cancelled(&self) -> ExecResult<()> {
        if self.signals.is_interrupted() {
            Err(ExecutionError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn wants_pty(&self, mode: TerminalMode, target: &OutputTarget<'_>) -> bool {
        let eligible = self.interactive
            && self.pty_enabled
            && pty::is_supported()
            && mode != TerminalMode::Pipes;
        match target {
            OutputTarget::Terminal => eligible,
            OutputTarget::Capture { show, .. } => eligible && *show,
            OutputTarget::Writer { .. } => false,
        }
    }

    fn execute(
        &self,
        request: &ExecutionRequest,
        mut target: OutputTarget<'_>,
    ) -> ExecResult<ExecutionResult> {
        let program = resolve_program(request)?;
        self.ensure_not_cancelled()?;

        let started = Instant::now();
        let own_group = request.input == InputSource::Null;
        let use_pty = self.wants_pty(request.terminal, &target);
        log::debug!(
            "Running (pty={use_pty}): {}",
            request.display()
        );

        let (tx, rx) = mpsc::channel::<(StreamKind, Vec<u8>)>();
        let mut pty_master = None;

        let mut child = {
            let mut command = base_command(&program, request);
            command.stdin(match request.input {
                InputSource::Null => Stdio::null(),
                InputSource::Inherit => Stdio::inherit(),
            });
            if own_group {
                new_process_group(&mut command);
            }

            if use_pty {
                let pair = pty::open(terminal::terminal_size()).map_err(|e| io_error(request, e))?;
                let slave_err = pair.slave.try_clone().map_err(|e| io_error(request, e))?;
                command
                    .stdout(Stdio::from(pair.slave))
                    .stderr(Stdio::from(slave_err));
                let child = command.spawn().map_err(|e| spawn_error(request, e))?;
                let reader = pair.master.try_clone().map_err(|e| io_error(request, e))?;
                pump(reader, StreamKind::Out, tx.clone());
                pty_master = Some(pair.master);
                child
            } else {
                match &target {
                    OutputTarget::Terminal => {
                        command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
                        command.spawn().map_err(|e| spawn_error(request, e))?
                    }
                    OutputTarget::Capture { cross_streams, .. }
                    | OutputTarget::Writer { cross_streams, .. }
                        if *cross_streams =>
                    {
                        let (reader, writer) = io::pipe().map_err(|e| io_error(request, e))?;
                        let writer_err = writer.try_clone().map_err(|e| io_error(request, e))?;
                        command
                            .stdout(Stdio::from(writer))
                            .stderr(Stdio::from(writer_err));
                        let child = command.spawn().map_err(|e| spawn_error(request, e))?;
                        pump(reader, StreamKind::Out, tx.clone());
                        child
                    }
                    OutputTarget::Capture { .. } => {
                        command.stdout(Stdio::piped()).stderr(Stdio::piped());
                        let mut child = command.spawn().map_err(|e| spawn_error(request, e))?;
                        if let Some(out) = child.stdout.take() {
                            pump(out, StreamKind::Out, tx.clone());
                        }
                        if let Some(err) = child.stderr.take() {
                            pump(err, StreamKind::Err, tx.clone());
                        }
                        child
                    }
                    OutputTarget::Writer { .. } => {
                        command.stdout(Stdio::piped()).stderr(Stdio::inherit());
                        let mut child = command.spawn().map_err(|e| spawn_error(request, e))?;
                        if let Some(out) = child.stdout.take() {
                            pump(out, StreamKind::Out, tx.clone());
                        }
                        child
                    }
                }
            }
            // `command` drops here, closing the parent's copies of the child ends.
        };
        drop(tx);

        let mut collected = Collected::default();
        let status = loop {
            if self.signals.is_interrupted() {
                log::debug!("Cancellation requested, stopping process {}", child.id());
                terminate(&mut child, own_group);
                return Err(ExecutionError::Cancelled);
            }
            if let Some(master) = &pty_master
                && self.signals.take_resize()
                && let Err(e) = pty::resize(master, terminal::terminal_size())
            {
                log::debug!("Failed to resize PTY: {e}");
            }
            if let Some(status) = child.try_wait().map_err(|e| io_error(request, e))? {
                break status;
            }
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok((kind, chunk)) => collected
                    .deliver(&mut target, kind, &chunk)
                    .map_err(|e| io_error(request, e))?,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => thread::sleep(POLL_INTERVAL),
            }
        };

        // Anything a grandchild keeps writing after the grace period is dropped.
        while let Ok((kind, chunk)) = rx.recv_timeout(OUTPUT_DRAIN_GRACE) {
            collected
                .deliver(&mut target, kind, &chunk)
                .map_err(|e| io_error(request, e))?;
        }

        let (stdout, stderr) = collected.into_text(use_pty);
        Ok(ExecutionResult {
            exit_code: exit_code_of(status),
            stdout,
            stderr,
            duration: started.elapsed(),
            used_pty: use_pty,
        })
    }
}

#[derive(Default)]
struct Collected {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl Collected {
    fn deliver(
        &mut self,
        target: &mut OutputTarget<'_>,
        kind: StreamKind,
        chunk: &[u8],
    ) -> io::Result<()> {
        match target {
            OutputTarget::Terminal => write_to_terminal(StreamKind::Out, chunk),
            OutputTarget::Capture {
                show,
                cross_streams,
            } => {
                if *show {
                    write_to_terminal(kind, chunk)?;
                }
                if *cross_streams || kind == StreamKind::Out {
                    self.stdout.extend_from_slice(chunk);
                } else {
                    self.stderr.extend_from_slice(chunk);
                }
                Ok(())
            }
            OutputTarget::Writer { sink, .. } => {
                sink.write_all(chunk)?;
                sink.flush()
            }
        }
    }

    fn into_text(self, strip_escapes: bool) -> (String, String) {
        let convert = |bytes: Vec<u8>| {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            if strip_escapes {
                terminal::strip_ansi(&text)
            } else {
                text
            }
        };
        (convert(self.stdout), convert(self.stderr))
    }
}

fn write_to_terminal(kind: StreamKind, chunk: &[u8]) -> io::Result<()> {
    match kind {
        StreamKind::Out => {
            let mut out = io::stdout().lock();
            out.write_all(chunk)?;
            out.flush()
        }
        StreamKind::Err => {
            let mut err = io::stderr().lock();
            err.write_all(chunk)?;
            err.flush()
        }
    }
}

/// Forwards everything read from `source` to the collector channel.
fn pump<R: Read + Send + 'static>(mut source: R, kind: StreamKind, tx: Sender<(StreamKind, Vec<u8>)>) {
    thread::spawn(move || {
        let mut buf = [0u8; READ_CHUNK_SIZE];
        loop {
            match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = buf.get(..n).map(<[u8]>::to_vec).unwrap_or_default();
                    if tx.send((kind, chunk)).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // A PTY master reports EIO once the last slave descriptor closes.
                Err(e) => {
                    log::trace!("Output reader finished: {e}");
                    break;
                }
            }
        }
    });
}

fn resolve_program(request: &ExecutionRequest) -> ExecResult<PathBuf> {
    let program = request.program().ok_or(ExecutionError::EmptyCommand)?;
    let cwd = request
        .cwd
        .clone()
        .or_else(|| env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    let search_path: Option<OsString> = request
        .env
        .get("PATH")
        .map(OsString::from)
        .or_else(|| env::var_os("PATH"));

    which::which_in(program, search_path, &cwd)
        .map_err(|_| ExecutionError::ExecutableNotFound(program.to_string()))
}

fn base_command(program: &Path, request: &ExecutionRequest) -> Command {
    let mut command = Command::new(program);
    command.args(request.argv.iter().skip(1)).envs(&request.env);
    if let Some(cwd) = &request.cwd {
        command.current_dir(dunce::simplified(cwd));
    }
    command
}

fn spawn_error(request: &ExecutionRequest, source: io::Error) -> ExecutionError {
    ExecutionError::SpawnFailed {
        command: request.display(),
        source,
    }
}

fn io_error(request: &ExecutionRequest, source: io::Error) -> ExecutionError {
    ExecutionError::Io {
        command: request.display(),
        source,
    }
}

/// Exit code of a finished child; signals map to `128 + signo`.
fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

#[cfg(unix)]
fn new_process_group(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn new_process_group(_command: &mut Command) {}

#[cfg(unix)]
#[allow(unsafe_code)]
fn detach_session(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    // SAFETY: setsid(2) is async-signal-safe and touches no parent state.
    unsafe {
        command.pre_exec(|| {
            nix::unistd::setsid()
                .map(|_| ())
                .map_err(io::Error::from)
        });
    }
}

#[cfg(windows)]
fn detach_session(command: &mut Command) {
    use std::os::windows::process::CommandExt;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    command.creation_flags(CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);
}

#[cfg(not(any(unix, windows)))]
fn detach_session(_command: &mut Command) {}

/// Interrupts the child (its whole process group when it leads one), then
/// kills it if it has not exited after a grace period.
fn terminate(child: &mut Child, own_group: bool) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill, killpg};
        use nix::unistd::Pid;

        if let Ok(raw) = i32::try_from(child.id()) {
            let pid = Pid::from_raw(raw);
            let send = |signal: Signal| {
                if own_group {
                    killpg(pid, signal)
                } else {
                    kill(pid, signal)
                }
            };
            if let Err(e) = send(Signal::SIGINT) {
                log::debug!("Failed to interrupt process {raw}: {e}");
            }
            let deadline = Instant::now() + CANCEL_GRACE;
            while Instant::now() < deadline {
                if matches!(child.try_wait(), Ok(Some(_))) {
                    return;
                }
                thread::sleep(POLL_INTERVAL);
            }
            let _ = send(Signal::SIGKILL);
        }
    }

    if let Err(e) = child.kill() {
        log::warn!("Failed to kill child process {}: {}", child.id(), e);
    }
    let _ = child.wait();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::sync::{Arc, Mutex as StdMutex};

    fn sh(script: &str) -> ExecutionRequest {
        ExecutionRequest::new(["sh", "-c", script])
    }

    #[test]
    fn test_capture_reports_exact_exit_code() {
        // --- Setup ---
        let runner = ProcessRunner::non_interactive();

        // --- Execute ---
        let result = runner
            .capture(&sh("echo hello; exit 7"), CaptureOptions::default())
            .unwrap();

        // --- Assert ---
        assert_eq!(result.exit_code, 7);
        assert_eq!(result.stdout, "hello\n");
        assert!(!result.used_pty);
    }

    #[test]
    fn test_capture_separates_streams() {
        let runner = ProcessRunner::non_interactive();

        let result = runner
            .capture(&sh("echo out; echo err 1>&2"), CaptureOptions::default())
            .unwrap();

        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
    }

    #[test]
    fn test_capture_cross_streams_combines_output() {
        let runner = ProcessRunner::non_interactive();
        let options = CaptureOptions {
            cross_streams: true,
            ..CaptureOptions::default()
        };

        let result = runner
            .capture(&sh("echo out; echo err 1>&2"), options)
            .unwrap();

        assert_eq!(result.stdout, "out\nerr\n");
        assert!(result.stderr.is_empty());
    }

    #[test]
    fn test_capture_check_surfaces_process_failed() {
        let runner = ProcessRunner::non_interactive();
        let options = CaptureOptions {
            check: true,
            ..CaptureOptions::default()
        };

        let err = runner.capture(&sh("exit 3"), options).unwrap_err();

        assert!(matches!(err, ExecutionError::ProcessFailed { code: 3, .. }));
    }

    #[test]
    fn test_missing_executable_is_distinct_from_failure() {
        let runner = ProcessRunner::non_interactive();
        let request = ExecutionRequest::new(["devx-definitely-not-installed-binary"]);

        let err = runner.run(&request).unwrap_err();

        assert!(matches!(err, ExecutionError::ExecutableNotFound(name) if name == "devx-definitely-not-installed-binary"));
    }

    #[test]
    fn test_empty_command_is_rejected() {
        let runner = ProcessRunner::non_interactive();
        let request = ExecutionRequest::new(Vec::<String>::new());

        assert!(matches!(runner.run(&request), Err(ExecutionError::EmptyCommand)));
    }

    #[test]
    fn test_non_interactive_parent_never_allocates_pty() {
        // --- Setup ---
        // PTY explicitly requested, but the parent has no terminal.
        let runner = ProcessRunner::new(false, true, SignalFlags::detached());
        let request = sh("test -t 1").terminal(TerminalMode::Pty);
        let options = CaptureOptions {
            show: true,
            ..CaptureOptions::default()
        };

        // --- Execute ---
        let result = runner.capture(&request, options).unwrap();

        // --- Assert ---
        assert!(!result.used_pty);
        assert_eq!(result.exit_code, 1);
    }

    #[test]
    fn test_pty_capture_strips_escape_sequences() {
        // --- Setup ---
        let runner = ProcessRunner::new(true, true, SignalFlags::detached());
        let request = sh("test -t 1 && printf '\\033[31mred\\033[0m\\n'");
        let options = CaptureOptions {
            show: true,
            ..CaptureOptions::default()
        };

        // --- Execute ---
        let result = runner.capture(&request, options).unwrap();

        // --- Assert ---
        assert!(result.used_pty);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "red\n");
        assert!(!result.stdout.contains('\x1b'));
    }

    #[test]
    fn test_redirect_writes_into_sink() {
        let runner = ProcessRunner::non_interactive();
        let mut sink: Vec<u8> = Vec::new();

        let code = runner
            .redirect(&sh("echo one; echo two 1>&2"), &mut sink, true)
            .unwrap();

        assert_eq!(code, 0);
        assert_eq!(String::from_utf8(sink).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn test_env_overlay_and_cwd_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::non_interactive();
        let request = sh("printf '%s:' \"$DEVX_TEST_VALUE\"; pwd")
            .env("DEVX_TEST_VALUE", "42")
            .cwd(dir.path());

        let result = runner.capture(&request, CaptureOptions::default()).unwrap();

        let expected_dir = dir.path().canonicalize().unwrap();
        assert!(result.stdout.starts_with("42:"));
        assert!(result.stdout.trim_end().ends_with(expected_dir.file_name().unwrap().to_str().unwrap()));
    }

    #[test]
    fn test_cancellation_stops_process_group() {
        // --- Setup ---
        let signals = SignalFlags::detached();
        let runner = ProcessRunner::new(false, false, signals.clone());
        let flag = Arc::clone(&signals.interrupted);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            flag.store(true, Ordering::Relaxed);
        });

        // --- Execute ---
        let started = Instant::now();
        let result = runner.run(&sh("sleep 30"));

        // --- Assert ---
        assert!(matches!(result, Err(ExecutionError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_attach_returns_exit_code_unchanged() {
        let runner = ProcessRunner::non_interactive();

        let code = runner.attach(&sh("exit 7")).unwrap();

        assert_eq!(code, 7);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_attach_inherits_stdout_even_when_pty_is_allowed() {
        // --- Setup ---
        let runner = ProcessRunner::new(true, true, SignalFlags::detached());
        let dir = tempfile::tempdir().unwrap();
        let seen = dir.path().join("stdout");
        let script = format!("readlink /proc/$$/fd/1 > '{}'; exit 3", seen.display());

        // --- Execute ---
        let code = runner.attach(&sh(&script)).unwrap();

        // --- Assert ---
        let ours = std::fs::read_link("/proc/self/fd/1").unwrap();
        assert_eq!(code, 3);
        assert_eq!(std::fs::read_to_string(&seen).unwrap().trim_end(), ours.to_string_lossy());
    }

    #[test]
    fn test_spawn_daemon_returns_pid() {
        let runner = ProcessRunner::non_interactive();

        let handle = runner.spawn_daemon(&sh("exit 0")).unwrap();

        assert!(handle.pid > 0);
    }

    #[test]
    fn test_exit_hooks_run_once() {
        // --- Setup ---
        let runner = ProcessRunner::non_interactive();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        runner.add_exit_hook(Box::new(move |code| sink.lock().unwrap().push(code)));

        // --- Execute ---
        runner.run_exit_hooks(5);
        runner.run_exit_hooks(6);

        // --- Assert ---
        assert_eq!(*seen.lock().unwrap(), vec![5]);
    }

    #[test]
    fn test_run_quietly_reports_failure() {
        let runner = ProcessRunner::non_interactive();

        let err = runner.run_quietly(&sh("echo boom; exit 4"), false).unwrap_err();

        assert!(matches!(err, ExecutionError::ProcessFailed { code: 4, .. }));
    }
}
