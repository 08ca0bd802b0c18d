//! Resolution of the agent CLI launch target.
//!
//! Precedence: explicit config override, then the `AGENTDESK_CLI_PATH`
//! environment variable, then the bundled binary next to the running
//! executable. On Windows the bundled reference is a `.cmd` launcher that
//! cannot be exec'd directly, so it is re-wrapped through `%ComSpec%`.

use std::path::{Path, PathBuf};

use agentdesk_pty::SpawnSpec;

/// Fixed terminal geometry the agent is spawned with.
pub const PTY_COLS: u16 = 120;
pub const PTY_ROWS: u16 = 30;

/// Environment variable overriding the agent CLI path.
pub const CLI_PATH_ENV: &str = "AGENTDESK_CLI_PATH";

/// Default environment variable the credential is read from and injected
/// under when spawning the agent.
pub const DEFAULT_CREDENTIAL_ENV: &str = "OPENAI_API_KEY";

/// How the gateway launches the agent CLI.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Explicit program path; takes precedence over the environment
    /// override and the bundled binary.
    pub program: Option<PathBuf>,
    /// Arguments prepended to every invocation (primary and auth).
    pub base_args: Vec<String>,
    /// Name of the variable the credential travels under.
    pub credential_env: String,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            program: None,
            base_args: Vec::new(),
            credential_env: DEFAULT_CREDENTIAL_ENV.to_string(),
        }
    }
}

/// Resolve the program to launch, without platform wrapping.
pub fn resolve_program(config: &LaunchConfig) -> PathBuf {
    if let Some(program) = &config.program {
        return program.clone();
    }
    if let Ok(path) = std::env::var(CLI_PATH_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    bundled_program()
}

/// The platform-appropriate bundled agent reference, relative to the
/// running executable.
fn bundled_program() -> PathBuf {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    let name = if cfg!(windows) { "agent.cmd" } else { "agent" };
    exe_dir.join("bin").join(name)
}

/// Re-wrap script-style launchers through the platform command interpreter.
///
/// `.cmd`/`.bat` files cannot be exec'd directly on Windows; they must run
/// as `cmd.exe /c "<path>" <args…>`. Takes `windows` as a parameter so the
/// logic is testable on any host.
pub fn wrap_launcher(
    program: PathBuf,
    args: Vec<String>,
    windows: bool,
) -> (PathBuf, Vec<String>) {
    if !windows {
        return (program, args);
    }

    let is_script = program
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("cmd") || ext.eq_ignore_ascii_case("bat"))
        .unwrap_or(false);
    if !is_script {
        return (program, args);
    }

    let comspec = std::env::var("ComSpec").unwrap_or_else(|_| "cmd.exe".to_string());
    let mut wrapped = vec!["/c".to_string(), format!("\"{}\"", program.display())];
    wrapped.extend(args);
    (PathBuf::from(comspec), wrapped)
}

/// Assemble the spawn spec for one agent invocation.
///
/// The child gets the fixed geometry, the given working directory, and the
/// credential (when held) layered into its environment under the
/// configured variable name.
pub fn build_spawn_spec(
    config: &LaunchConfig,
    extra_args: &[&str],
    cwd: &Path,
    credential: Option<&str>,
) -> SpawnSpec {
    let mut args = config.base_args.clone();
    args.extend(extra_args.iter().map(|s| s.to_string()));

    let (program, args) = wrap_launcher(resolve_program(config), args, cfg!(windows));

    let mut spec = SpawnSpec::new(program)
        .args(args)
        .cwd(cwd)
        .size(PTY_COLS, PTY_ROWS);
    if let Some(secret) = credential {
        spec = spec.env_var(config.credential_env.clone(), secret);
    }
    spec
}
