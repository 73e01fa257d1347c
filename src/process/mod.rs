// src/process/mod.rs

//! External command execution
//!
//! Every tool the assembler drives (`file`, `dwz`, `objcopy`, `strip`,
//! `dpkg-gencontrol`, ...) goes through the [`CommandRunner`] trait. The
//! system implementation spawns real processes; [`fake::FakeRunner`] records
//! invocations and answers them from a closure so the pipeline can be
//! exercised without the Debian toolchain installed.

pub mod fake;

use std::path::Path;
use std::process::{Command, Stdio};

use nix::unistd::{SysconfVar, sysconf};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Fallback command-line budget when ARG_MAX cannot be resolved (debhelper's limit)
const FALLBACK_ARG_MAX: usize = 20_000;

/// Headroom for OS overhead on top of the environment size
const ARG_MAX_OVERHEAD: usize = 2 * 4096;

/// A fully described external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    env_remove: Vec<String>,
}

impl Invocation {
    /// Create a new invocation of `program`
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env_remove: Vec::new(),
        }
    }

    /// Build an invocation from a full argv
    pub fn from_argv(argv: &[String]) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::InvalidPath("empty command line".into()))?;
        Ok(Self::new(program.clone()).args(args))
    }

    /// Add a single argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.args.extend(args.into_iter().map(|a| a.as_ref().to_string()));
        self
    }

    /// Add a path as an argument
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Remove a variable from the child's environment
    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env_remove.push(key.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn removed_env(&self) -> &[String] {
        &self.env_remove
    }

    /// The command line rendered for humans, shell-escaped
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(escape_shell)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result of running an external command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code, or None if terminated by a signal
    pub code: Option<i32>,
    /// Raw stdout (may contain NUL bytes)
    pub stdout: Vec<u8>,
    /// Captured stderr
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code
    pub fn failed(code: i32) -> Self {
        Self {
            code: Some(code),
            ..Self::default()
        }
    }

    /// Returns true if the command exited successfully
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Stdout decoded lossily as UTF-8
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Narrow interface to subprocess execution
pub trait CommandRunner {
    /// Run the command and capture its output; a non-zero exit is not an error here
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;

    /// Run the command, failing with the full command line on non-zero exit
    fn run_checked(&self, invocation: &Invocation) -> Result<CommandOutput> {
        info!("{}", invocation.command_line());
        let output = self.run(invocation)?;
        if !output.success() {
            let status = match output.code {
                Some(code) => format!("exit code {}", code),
                None => "killed by signal".to_string(),
            };
            let stderr = output.stderr.trim();
            let message = if stderr.is_empty() {
                format!("The command {} failed ({})", invocation.program(), status)
            } else {
                format!(
                    "The command {} failed ({}):\n{}",
                    invocation.program(),
                    status,
                    stderr
                )
            };
            return Err(Error::command_failed(invocation.command_line(), message));
        }
        Ok(output)
    }
}

/// Runs commands as real child processes
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        let mut cmd = Command::new(invocation.program());
        cmd.args(invocation.get_args());
        cmd.stdin(Stdio::null());
        for key in invocation.removed_env() {
            cmd.env_remove(key);
        }

        let output = cmd.output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ToolNotFound(invocation.program().to_string())
            } else {
                Error::IoError(format!(
                    "Failed to execute {}: {}",
                    invocation.command_line(),
                    e
                ))
            }
        })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Fail early when one of `programs` is not on `PATH`
pub fn require_tools(programs: &[&str]) -> Result<()> {
    for program in programs {
        let path = which::which(program).map_err(|_| Error::ToolNotFound(program.to_string()))?;
        debug!("Using {} at {}", program, path.display());
    }
    Ok(())
}

/// Quote an argument for display in a POSIX shell
pub fn escape_shell(arg: &str) -> String {
    let is_safe = |c: char| c.is_ascii_alphanumeric() || "%+,-./:=@_^".contains(c);
    if !arg.is_empty() && arg.chars().all(is_safe) {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', "'\"'\"'"))
}

/// Resolve the system ARG_MAX
fn sc_arg_max() -> Option<usize> {
    match sysconf(SysconfVar::ARG_MAX) {
        Ok(Some(value)) if value > 0 => usize::try_from(value).ok(),
        _ => {
            debug!("Could not resolve SC_ARG_MAX, falling back to a hard-coded limit");
            None
        }
    }
}

/// Byte budget left for variable arguments after the static command and environment
pub fn xargs_budget(static_cmd: &[String], arg_max: Option<usize>) -> usize {
    let static_len =
        static_cmd.len().saturating_sub(1) + static_cmd.iter().map(String::len).sum::<usize>();
    match arg_max.or_else(sc_arg_max) {
        Some(max) => {
            let env_len: usize = std::env::vars_os()
                .map(|(k, v)| k.len() + v.len() + 2)
                .sum();
            max.saturating_sub(static_len + env_len + ARG_MAX_OVERHEAD)
        }
        None => FALLBACK_ARG_MAX.saturating_sub(static_len),
    }
}

/// Split `varargs` into command lines that each fit within `budget` bytes
///
/// Every returned command line starts with `static_cmd`. Fails if a single
/// argument cannot fit on its own.
pub fn xargs(static_cmd: &[String], varargs: &[String], budget: usize) -> Result<Vec<Vec<String>>> {
    let mut chunks = Vec::new();
    let mut pending: Vec<String> = static_cmd.to_vec();
    let mut remaining = budget;

    for arg in varargs {
        // +1 for the separating space
        let arg_len = arg.len() + 1;
        if arg_len > remaining {
            if pending.len() <= static_cmd.len() || arg_len > budget {
                return Err(Error::IoError(format!(
                    "Could not fit a single argument into the command line: {} (budget) < {} (argument length)",
                    budget, arg_len
                )));
            }
            chunks.push(std::mem::replace(&mut pending, static_cmd.to_vec()));
            remaining = budget;
        }
        remaining -= arg_len;
        pending.push(arg.clone());
    }

    if pending.len() > static_cmd.len() {
        chunks.push(pending);
    }
    Ok(chunks)
}
