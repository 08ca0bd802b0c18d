use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};

/// Errors from PTY operations.
#[derive(Debug)]
pub enum PtyError {
    SpawnFailed(String),
    Io(std::io::Error),
}

impl std::fmt::Display for PtyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PtyError::SpawnFailed(msg) => write!(f, "PTY spawn failed: {msg}"),
            PtyError::Io(err) => write!(f, "PTY I/O error: {err}"),
        }
    }
}

impl std::error::Error for PtyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PtyError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PtyError {
    fn from(err: std::io::Error) -> Self {
        PtyError::Io(err)
    }
}

/// Everything needed to launch one child process in a PTY.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Extra variables layered over the inherited parent environment.
    pub env: Vec<(String, String)>,
    pub cols: u16,
    pub rows: u16,
}

impl SpawnSpec {
    /// Create a spec with the current working directory, no extra
    /// environment, and an 80x24 terminal.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env: Vec::new(),
            cols: 80,
            rows: 24,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = dir.as_ref().to_path_buf();
        self
    }

    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = cols;
        self.rows = rows;
        self
    }
}

/// Owns a portable-pty master pair, the spawned child, and its I/O ends.
///
/// The reader and child can be taken out (for a dedicated blocking I/O
/// thread); the handle keeps the master and writer alive for the duration
/// of the session. A killer is cloned at spawn time so the child can be
/// terminated even after it has been moved out.
pub struct PtyHandle {
    /// Held (never read) so the child's terminal stays open for the
    /// handle's lifetime; dropping the master closes the read end.
    _master: Box<dyn MasterPty + Send>,
    reader: Option<Box<dyn Read + Send>>,
    writer: Box<dyn Write + Send>,
    child: Option<Box<dyn Child + Send + Sync>>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    pid: Option<u32>,
}

impl PtyHandle {
    /// Open a PTY at the spec's geometry and spawn the child in it.
    ///
    /// The child inherits the full parent environment, with `TERM` set and
    /// the spec's extra variables layered on top.
    pub fn spawn(spec: &SpawnSpec) -> Result<Self, PtyError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: spec.rows,
                cols: spec.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::SpawnFailed(format!("failed to open PTY: {e}")))?;

        let mut cmd = CommandBuilder::new(&spec.program);
        cmd.args(&spec.args);
        cmd.cwd(&spec.cwd);

        // Copy the parent environment explicitly, then overlay the spec's
        // variables so they win regardless of what the builder inherited.
        for (key, value) in std::env::vars() {
            cmd.env(key, value);
        }
        cmd.env("TERM", "xterm-color");
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            PtyError::SpawnFailed(format!(
                "failed to spawn {}: {e}",
                spec.program.display()
            ))
        })?;

        let killer = child.clone_killer();
        let pid = child.process_id();

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::SpawnFailed(format!("failed to clone reader: {e}")))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::SpawnFailed(format!("failed to take writer: {e}")))?;

        log::debug!(
            "spawned {} (pid {:?}) at {}x{}",
            spec.program.display(),
            pid,
            spec.cols,
            spec.rows
        );

        Ok(Self {
            _master: pair.master,
            reader: Some(reader),
            writer,
            child: Some(child),
            killer,
            pid,
        })
    }

    /// The OS process id of the child, if the platform reports one.
    pub fn process_id(&self) -> Option<u32> {
        self.pid
    }

    /// Write bytes to the PTY master (input to the child).
    pub fn write(&mut self, data: &[u8]) -> Result<(), PtyError> {
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Take the blocking output reader.
    ///
    /// Callers should move it to a dedicated I/O thread; the handle keeps
    /// the master alive so the read end stays valid. Returns `None` if the
    /// reader was already taken.
    pub fn take_reader(&mut self) -> Option<Box<dyn Read + Send>> {
        self.reader.take()
    }

    /// Take ownership of the child, typically to `wait()` on it from the
    /// I/O thread once the reader hits EOF. Returns `None` if already taken.
    pub fn take_child(&mut self) -> Option<Box<dyn Child + Send + Sync>> {
        self.child.take()
    }

    /// Clone a killer for the child. Valid even after `take_child`.
    pub fn clone_killer(&self) -> Box<dyn ChildKiller + Send + Sync> {
        self.killer.clone_killer()
    }
}
