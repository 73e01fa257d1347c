// src/dbgsym/probe.rs

//! Strip status and build-id lookup via `file -00 -N`

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::bytes::Regex;

use crate::error::{Error, Result};
use crate::process::{CommandRunner, Invocation, xargs, xargs_budget};

static BUILD_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"BuildID(?:\[\S+\])?=([A-Fa-f0-9]+)").unwrap());

/// What `file` reported about one binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeVerdict {
    pub stripped: bool,
    pub build_id: Option<String>,
}

impl ProbeVerdict {
    /// Interpret a single `file` verdict
    pub fn from_verdict(verdict: &[u8]) -> Self {
        let stripped = !verdict
            .windows(b"not stripped".len())
            .any(|w| w == b"not stripped");
        let build_id = BUILD_ID_RE
            .captures(verdict)
            .and_then(|c| c.get(1))
            .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned());
        Self { stripped, build_id }
    }
}

/// Parse NUL-delimited `path\0verdict\0` pairs
pub fn parse_file_output(output: &[u8]) -> Result<Vec<(PathBuf, ProbeVerdict)>> {
    let end = output
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |i| i + 1);
    if end == 0 {
        return Ok(Vec::new());
    }
    let fields: Vec<&[u8]> = output[..end].split(|&b| b == 0).collect();
    if fields.len() % 2 != 0 {
        return Err(Error::ParseError(format!(
            "`file -00` produced an odd number of fields ({})",
            fields.len()
        )));
    }
    Ok(fields
        .chunks_exact(2)
        .map(|pair| {
            (
                PathBuf::from(String::from_utf8_lossy(pair[0]).into_owned()),
                ProbeVerdict::from_verdict(pair[1]),
            )
        })
        .collect())
}

/// Batched `file` invocations over many binaries
#[derive(Debug, Clone, Default)]
pub struct BuildIdProbe {
    no_sandbox: bool,
    arg_max: Option<usize>,
}

impl BuildIdProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pass `--no-sandbox` (needed under fakeroot)
    pub fn with_no_sandbox(mut self, no_sandbox: bool) -> Self {
        self.no_sandbox = no_sandbox;
        self
    }

    /// Override the ARG_MAX used for chunking
    pub fn with_arg_max(mut self, arg_max: Option<usize>) -> Self {
        self.arg_max = arg_max;
        self
    }

    fn static_cmd(&self) -> Vec<String> {
        let mut cmd = vec!["file".to_string(), "-00".to_string(), "-N".to_string()];
        if self.no_sandbox {
            cmd.push("--no-sandbox".to_string());
        }
        cmd
    }

    /// Probe every path; each one must appear in the output
    pub fn probe(
        &self,
        runner: &dyn CommandRunner,
        paths: &[PathBuf],
    ) -> Result<HashMap<PathBuf, ProbeVerdict>> {
        let static_cmd = self.static_cmd();
        let varargs: Vec<String> = paths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let budget = xargs_budget(&static_cmd, self.arg_max);

        let mut verdicts = HashMap::with_capacity(paths.len());
        for argv in xargs(&static_cmd, &varargs, budget)? {
            let output = runner.run_checked(&Invocation::from_argv(&argv)?)?;
            verdicts.extend(parse_file_output(&output.stdout)?);
        }

        if let Some(missing) = paths.iter().find(|p| !verdicts.contains_key(p.as_path())) {
            return Err(Error::ParseError(format!(
                "`file` did not report on {}",
                missing.display()
            )));
        }
        Ok(verdicts)
    }
}

/// Where the debug file for `build_id` is installed
pub fn build_id_debug_path(build_id: &str) -> Result<PathBuf> {
    if build_id.len() < 3 || hex::decode(pad_even(build_id)).is_err() {
        return Err(Error::ParseError(format!("invalid build-id: {}", build_id)));
    }
    Ok(Path::new("/usr/lib/debug/.build-id")
        .join(&build_id[..2])
        .join(format!("{}.debug", &build_id[2..])))
}

fn pad_even(s: &str) -> String {
    if s.len() % 2 == 0 {
        s.to_string()
    } else {
        format!("0{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::CommandOutput;
    use crate::process::fake::FakeRunner;

    const UNSTRIPPED: &[u8] = b"ELF 64-bit LSB pie executable, x86-64, version 1 (SYSV), dynamically linked, BuildID[sha1]=3f2ba1c7e1e0d2f4a5b6c7d8e9f0a1b2c3d4e5f6, for GNU/Linux 3.2.0, with debug_info, not stripped";
    const STRIPPED: &[u8] = b"ELF 64-bit LSB shared object, x86-64, BuildID[sha1]=aa11, stripped";

    #[test]
    fn test_verdict_parsing() {
        let v = ProbeVerdict::from_verdict(UNSTRIPPED);
        assert!(!v.stripped);
        assert_eq!(
            v.build_id.as_deref(),
            Some("3f2ba1c7e1e0d2f4a5b6c7d8e9f0a1b2c3d4e5f6")
        );

        let v = ProbeVerdict::from_verdict(STRIPPED);
        assert!(v.stripped);
        assert_eq!(v.build_id.as_deref(), Some("aa11"));

        let v = ProbeVerdict::from_verdict(b"ELF 32-bit LSB executable, not stripped");
        assert_eq!(v.build_id, None);
    }

    #[test]
    fn test_parse_file_output_pairs() {
        let mut out = b"/tmp/a\0".to_vec();
        out.extend_from_slice(UNSTRIPPED);
        out.extend_from_slice(b"\0/tmp/b\0");
        out.extend_from_slice(STRIPPED);
        out.push(0);

        let parsed = parse_file_output(&out).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].0, PathBuf::from("/tmp/a"));
        assert!(!parsed[0].1.stripped);
        assert!(parsed[1].1.stripped);

        assert!(parse_file_output(b"/tmp/a\0").is_err());
        assert!(parse_file_output(b"").unwrap().is_empty());
    }

    #[test]
    fn test_probe_chunks_invocations() {
        let runner = FakeRunner::new(|inv| {
            let mut out = Vec::new();
            for path in inv.get_args().iter().filter(|a| a.starts_with('/')) {
                out.extend_from_slice(path.as_bytes());
                out.push(0);
                out.extend_from_slice(STRIPPED);
                out.push(0);
            }
            Ok(CommandOutput::ok(out))
        });
        let paths: Vec<PathBuf> = (0..6).map(|i| PathBuf::from(format!("/w/bin{}", i))).collect();

        // No argument fits into a zero budget
        let probe = BuildIdProbe::new().with_no_sandbox(true).with_arg_max(Some(0));
        assert!(probe.probe(&runner, &paths).is_err());

        let probe = BuildIdProbe::new().with_arg_max(Some(usize::MAX / 2));
        let verdicts = probe.probe(&runner, &paths).unwrap();
        assert_eq!(verdicts.len(), 6);
        let calls = runner.calls_to("file");
        assert_eq!(calls.last().unwrap().get_args()[..2], ["-00", "-N"]);
    }

    #[test]
    fn test_build_id_debug_path() {
        assert_eq!(
            build_id_debug_path("3f2ba1c7").unwrap(),
            PathBuf::from("/usr/lib/debug/.build-id/3f/2ba1c7.debug")
        );
        assert!(build_id_debug_path("zz").is_err());
        assert!(build_id_debug_path("xyz123").is_err());
    }
}
