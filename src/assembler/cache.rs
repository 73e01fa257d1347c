// src/assembler/cache.rs

//! Tool queries answered once per build
//!
//! The answers never change during a build, so the cache is owned by the
//! build context and lives exactly as long as it.

use nix::unistd::getuid;
use tracing::debug;

use crate::deb822::parse_stanzas;
use crate::error::{Error, Result};
use crate::process::{CommandRunner, Invocation};

/// Perl one-liner printing dpkg's relationship fields, one per line
const FIELD_LIST_SCRIPT: &str = r#"print "$_\n" for field_list_pkg_dep"#;

/// Memoized answers from `perl`, `dpkg-buildflags` and `id`
#[derive(Debug, Default)]
pub struct ToolQueryCache {
    relationship_fields: Option<Vec<String>>,
    time64_enabled: Option<bool>,
    fakeroot: Option<bool>,
}

impl ToolQueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Relationship fields known to dpkg, in dpkg's order
    pub fn relationship_fields(&mut self, runner: &dyn CommandRunner) -> Result<&[String]> {
        if self.relationship_fields.is_none() {
            let invocation = Invocation::new("perl")
                .arg("-MDpkg::Control::Fields")
                .arg("-e")
                .arg(FIELD_LIST_SCRIPT);
            let output = runner.run_checked(&invocation)?;
            let fields: Vec<String> = output
                .stdout_str()
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
            if fields.is_empty() {
                return Err(Error::command_failed(
                    invocation.command_line(),
                    "dpkg did not list any relationship fields",
                ));
            }
            debug!("dpkg knows {} relationship fields", fields.len());
            self.relationship_fields = Some(fields);
        }
        Ok(self.relationship_fields.as_deref().unwrap_or_default())
    }

    /// Whether `dpkg-buildflags` reports the time64 ABI feature as enabled
    ///
    /// A failing query counts as disabled.
    pub fn time64_enabled(&mut self, runner: &dyn CommandRunner) -> bool {
        *self.time64_enabled.get_or_insert_with(|| {
            let invocation = Invocation::new("dpkg-buildflags")
                .arg("--query-features")
                .arg("abi");
            let output = match runner.run(&invocation) {
                Ok(output) if output.success() => output,
                _ => {
                    debug!("Could not query ABI features; assuming time64 is disabled");
                    return false;
                }
            };
            parse_stanzas(&output.stdout_str())
                .unwrap_or_default()
                .iter()
                .any(|s| s.get("Feature") == Some("time64") && s.get("Enabled") == Some("yes"))
        })
    }

    /// Whether the process runs under fakeroot
    ///
    /// Fakeroot reports uid 0 through `LD_PRELOAD`; asking `id -u` without
    /// the preload reveals the real uid.
    pub fn is_fakeroot(&mut self, runner: &dyn CommandRunner) -> bool {
        *self.fakeroot.get_or_insert_with(|| {
            if !getuid().is_root() || std::env::var_os("LD_PRELOAD").is_none() {
                return false;
            }
            probe_real_uid_is_nonzero(runner)
        })
    }
}

fn probe_real_uid_is_nonzero(runner: &dyn CommandRunner) -> bool {
    let invocation = Invocation::new("id").arg("-u").env_remove("LD_PRELOAD");
    match runner.run(&invocation) {
        Ok(output) if output.success() => output.stdout_str().trim() != "0",
        _ => {
            debug!("Could not run \"id -u\" with LD_PRELOAD unset; assuming no fakeroot");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::CommandOutput;
    use crate::process::fake::FakeRunner;

    #[test]
    fn test_relationship_fields_queried_once() {
        let runner = FakeRunner::new(|_| Ok(CommandOutput::ok(b"Pre-Depends\nDepends\n\nBreaks\n".to_vec())));
        let mut cache = ToolQueryCache::new();

        let fields = cache.relationship_fields(&runner).unwrap().to_vec();
        assert_eq!(fields, vec!["Pre-Depends", "Depends", "Breaks"]);
        cache.relationship_fields(&runner).unwrap();
        assert_eq!(runner.calls_to("perl").len(), 1);
        assert_eq!(
            runner.calls()[0].get_args(),
            ["-MDpkg::Control::Fields", "-e", FIELD_LIST_SCRIPT]
        );
    }

    #[test]
    fn test_relationship_fields_failure_is_fatal() {
        let runner = FakeRunner::new(|_| Ok(CommandOutput::failed(2)));
        let mut cache = ToolQueryCache::new();
        assert!(matches!(
            cache.relationship_fields(&runner),
            Err(Error::CommandFailed { .. })
        ));
    }

    #[test]
    fn test_time64_detection() {
        let enabled = FakeRunner::new(|_| {
            Ok(CommandOutput::ok(
                b"Feature: lfs\nEnabled: yes\n\nFeature: time64\nEnabled: yes\n".to_vec(),
            ))
        });
        let mut cache = ToolQueryCache::new();
        assert!(cache.time64_enabled(&enabled));
        assert!(cache.time64_enabled(&enabled));
        assert_eq!(enabled.calls().len(), 1);

        let disabled = FakeRunner::new(|_| {
            Ok(CommandOutput::ok(b"Feature: time64\nEnabled: no\n".to_vec()))
        });
        assert!(!ToolQueryCache::new().time64_enabled(&disabled));

        let failing = FakeRunner::new(|_| Ok(CommandOutput::failed(1)));
        assert!(!ToolQueryCache::new().time64_enabled(&failing));
    }

    #[test]
    fn test_real_uid_probe() {
        let fake = FakeRunner::new(|_| Ok(CommandOutput::ok(b"1000\n".to_vec())));
        assert!(probe_real_uid_is_nonzero(&fake));
        assert_eq!(fake.calls()[0].removed_env(), ["LD_PRELOAD"]);

        let root = FakeRunner::new(|_| Ok(CommandOutput::ok(b"0\n".to_vec())));
        assert!(!probe_real_uid_is_nonzero(&root));
    }
}
