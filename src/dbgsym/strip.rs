// src/dbgsym/strip.rs

//! `strip` invocations for archives, executables and libraries

use std::path::PathBuf;

use crate::error::Result;
use crate::process::{CommandRunner, Invocation, xargs, xargs_budget};

/// Flags for static libraries (matches dh_strip)
pub const STATIC_LIBRARY_FLAGS: [&str; 12] = [
    "--strip-debug",
    "--remove-section=.comment",
    "--remove-section=.note",
    "--enable-deterministic-archives",
    "-R",
    ".gnu.lto_*",
    "-R",
    ".gnu.debuglto_*",
    "-N",
    "__gnu_lto_slim",
    "-N",
    "__gnu_lto_v1",
];

/// Flags for executables (any execute bit set)
pub const EXECUTABLE_FLAGS: [&str; 2] = ["--remove-section=.comment", "--remove-section=.note"];

/// Flags for shared objects and other non-executable ELF files
pub const LIBRARY_FLAGS: [&str; 3] = [
    "--remove-section=.comment",
    "--remove-section=.note",
    "--strip-unneeded",
];

/// Run `strip` with `flags` over `paths`, chunked to fit the command line
pub fn strip_files(
    runner: &dyn CommandRunner,
    strip: &str,
    flags: &[&str],
    paths: &[PathBuf],
    arg_max: Option<usize>,
) -> Result<()> {
    if paths.is_empty() {
        return Ok(());
    }
    let mut static_cmd = vec![strip.to_string()];
    static_cmd.extend(flags.iter().map(|f| f.to_string()));

    let varargs: Vec<String> = paths
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    let budget = xargs_budget(&static_cmd, arg_max);
    for argv in xargs(&static_cmd, &varargs, budget)? {
        runner.run_checked(&Invocation::from_argv(&argv)?)?;
    }
    Ok(())
}

/// Strips debug sections from `ar` archives holding compiled objects
#[derive(Debug, Clone)]
pub struct StaticLibraryStripper {
    strip: String,
    arg_max: Option<usize>,
}

impl StaticLibraryStripper {
    pub fn new(strip: impl Into<String>) -> Self {
        Self {
            strip: strip.into(),
            arg_max: None,
        }
    }

    pub fn with_arg_max(mut self, arg_max: Option<usize>) -> Self {
        self.arg_max = arg_max;
        self
    }

    /// Strip every archive in `paths` (already detached)
    pub fn strip(&self, runner: &dyn CommandRunner, paths: &[PathBuf]) -> Result<()> {
        strip_files(runner, &self.strip, &STATIC_LIBRARY_FLAGS, paths, self.arg_max)
    }
}
