//! Running external tools.
//!
//! Every external tool archlive drives (sfdisk, mkfs.*, cryptsetup, mkarchiso,
//! makechrootpkg, ...) goes through [`Cmd`], so all of them capture stderr,
//! report useful errors and show up in the debug log the same way.

use anyhow::{anyhow, bail, Context, Result};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};

/// Exit status and captured output of a finished command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Get the exit code, or -1 if terminated by signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// Builder for configuring command execution.
///
/// `Cmd` is plain data until `run`/`run_interactive` is called, which lets
/// pipelines hold commands as steps and print them in dry-run mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    envs: Vec<(String, String)>,
    stdin: Option<Vec<u8>>,
    /// If true, don't fail on non-zero exit.
    allow_fail: bool,
    /// Custom error message prefix.
    error_prefix: Option<String>,
}

impl Cmd {
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            current_dir: None,
            envs: Vec::new(),
            stdin: None,
            allow_fail: false,
            error_prefix: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    pub fn dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    /// Set an environment variable for the child.
    pub fn env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.envs
            .push((key.as_ref().to_string(), value.as_ref().to_string()));
        self
    }

    /// Feed `data` to the child's stdin.
    pub fn stdin(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    /// Allow non-zero exit codes without failing.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Set a custom error message prefix.
    pub fn error_msg(mut self, msg: impl AsRef<str>) -> Self {
        self.error_prefix = Some(msg.as_ref().to_string());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Data that will be written to stdin, if any.
    pub fn stdin_data(&self) -> Option<&[u8]> {
        self.stdin.as_deref()
    }

    /// Shell-like rendering of the command line, for logs and dry runs.
    pub fn display(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        for (key, value) in &self.envs {
            parts.push(format!("{}={}", key, shell_quote(value)));
        }
        parts.push(shell_quote(&self.program));
        parts.extend(self.args.iter().map(|a| shell_quote(a)));
        let mut line = parts.join(" ");
        if let Some(dir) = &self.current_dir {
            line = format!("(cd {} && {})", shell_quote(&dir.to_string_lossy()), line);
        }
        if self.stdin.is_some() {
            line.push_str(" <<< [stdin]");
        }
        line
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(ref dir) = self.current_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        cmd.stdin(if self.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::inherit()
        });
        cmd
    }

    /// Spawn `cmd`, write the stdin payload and close the pipe.
    fn spawn(&self, mut cmd: Command) -> Result<Child> {
        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                anyhow!("'{}' not found. Run 'archlive preflight' to see what is missing.", self.program)
            } else {
                anyhow::Error::new(e).context(format!("Failed to execute '{}'", self.program))
            }
        })?;
        if let (Some(data), Some(mut pipe)) = (&self.stdin, child.stdin.take()) {
            pipe.write_all(data)
                .with_context(|| format!("Failed to write stdin of '{}'", self.program))?;
        }
        Ok(child)
    }

    /// Error for a non-zero exit, unless failures are allowed.
    fn check_exit(&self, status: ExitStatus, stderr: &str) -> Result<()> {
        if self.allow_fail || status.success() {
            return Ok(());
        }
        let prefix = self
            .error_prefix
            .clone()
            .unwrap_or_else(|| format!("'{}' failed", self.program));
        let code = status.code().unwrap_or(-1);
        if stderr.is_empty() {
            bail!("{} (exit code {})", prefix, code);
        }
        bail!("{} (exit code {}):\n{}", prefix, code, stderr);
    }

    /// Run the command and capture output.
    pub fn run(self) -> Result<CommandResult> {
        tracing::debug!(command = %self.display(), "running");
        let mut cmd = self.command();
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        let output = self
            .spawn(cmd)?
            .wait_with_output()
            .with_context(|| format!("Failed to wait for '{}'", self.program))?;

        let result = CommandResult {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        tracing::trace!(code = result.code(), stderr = result.stderr_trimmed(), "finished");
        self.check_exit(result.status, result.stderr_trimmed())?;
        Ok(result)
    }

    /// Run attached to the terminal. Used for long builds (mkarchiso,
    /// makechrootpkg) and anything that prompts (cryptsetup).
    pub fn run_interactive(self) -> Result<ExitStatus> {
        tracing::debug!(command = %self.display(), "running interactively");
        let status = self
            .spawn(self.command())?
            .wait()
            .with_context(|| format!("Failed to wait for '{}'", self.program))?;
        self.check_exit(status, "")?;
        Ok(status)
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

/// Quote a word for display if it contains shell metacharacters.
fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

// =============================================================================
// Convenience functions
// =============================================================================

/// Check if a program exists in PATH.
///
/// Returns the full path if found, None otherwise.
pub fn which(program: &str) -> Option<String> {
    which::which(program)
        .ok()
        .map(|p| p.to_string_lossy().into_owned())
}

/// Check if a program exists in PATH (bool version).
pub fn exists(program: &str) -> bool {
    which(program).is_some()
}

/// Returns true when the current process runs as root.
pub fn is_root() -> bool {
    match Cmd::new("id").arg("-u").allow_fail().run() {
        Ok(result) if result.success() => result.stdout_trimmed() == "0",
        _ => false,
    }
}

// =============================================================================
// Tests
// =============================================================================
