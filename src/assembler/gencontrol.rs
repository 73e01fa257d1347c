// src/assembler/gencontrol.rs

//! `dpkg-gencontrol` invocations for packages and their dbgsym companions
//!
//! Field values are passed as `-D`/`-U` overrides where possible. The dbgsym
//! package reads no substvars at all (`-T/dev/null`), so nothing computed for
//! the main package leaks into it.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::package::BinaryPackage;
use crate::process::{CommandRunner, Invocation};

/// Fields a dbgsym package never inherits from its main package
const DBGSYM_UNSET_FIELDS: [&str; 7] = [
    "Pre-Depends",
    "Recommends",
    "Suggests",
    "Enhances",
    "Provides",
    "Essential",
    "Conflicts",
];

/// Parameters passed to both the package and its dbgsym companion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommonParams {
    args: Vec<String>,
}

impl CommonParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// `-D<field>=<value>`
    pub fn define(&mut self, field: &str, value: &str) {
        self.args.push(format!("-D{}={}", field, value));
    }

    /// `-U<field>`
    pub fn unset(&mut self, field: &str) {
        self.args.push(format!("-U{}", field));
    }

    /// `-v<version>`
    pub fn version(&mut self, version: &str) {
        self.args.push(format!("-v{}", version));
    }

    pub fn as_slice(&self) -> &[String] {
        &self.args
    }
}

/// What to generate for one package
#[derive(Debug, Clone)]
pub struct GencontrolRequest<'a> {
    pub package: &'a BinaryPackage,
    /// Control file to read (`debian/control` or a merged replacement)
    pub control_file: &'a Path,
    pub substvars_file: &'a Path,
    /// Package `DEBIAN` directory; `control` is written here
    pub control_dir: &'a Path,
    pub common: &'a CommonParams,
    /// Parameters only for the main package (such as `-VInstalled-Size`)
    pub specific: &'a [String],
}

/// What to generate for a dbgsym companion
#[derive(Debug, Clone)]
pub struct DbgsymGencontrolRequest<'a> {
    pub package: &'a BinaryPackage,
    pub control_file: &'a Path,
    /// Root of the dbgsym package; `DEBIAN/control` is written below it
    pub dbgsym_root: &'a Path,
    pub build_ids: &'a str,
    /// Multi-Arch value of the main package
    pub multi_arch: Option<&'a str>,
    pub installed_size: u64,
    pub common: &'a CommonParams,
}

/// Runs `dpkg-gencontrol`
pub struct ControlGenerator<'a> {
    runner: &'a dyn CommandRunner,
    changelog: PathBuf,
    /// The source package's own `debian/control`
    debian_control: PathBuf,
}

impl<'a> ControlGenerator<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        changelog: impl Into<PathBuf>,
        debian_control: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            changelog: changelog.into(),
            debian_control: debian_control.into(),
        }
    }

    fn changelog_arg(&self) -> String {
        format!("-l{}", self.changelog.display())
    }

    pub fn package_invocation(&self, request: &GencontrolRequest<'_>) -> Invocation {
        Invocation::new("dpkg-gencontrol")
            .arg(format!("-p{}", request.package.name()))
            .arg(self.changelog_arg())
            .arg(format!("-c{}", request.control_file.display()))
            .arg(format!("-T{}", request.substvars_file.display()))
            .arg(format!(
                "-O{}",
                request.control_dir.join("control").display()
            ))
            .arg(format!("-P{}", request.control_dir.display()))
            .args(request.common.as_slice())
            .args(request.specific)
    }

    pub fn dbgsym_invocation(&self, request: &DbgsymGencontrolRequest<'_>) -> Invocation {
        let name = request.package.name();
        // debian/control has no stanza for the dbgsym package
        let selector = if request.control_file == self.debian_control {
            name.to_string()
        } else {
            format!("{}-dbgsym", name)
        };
        let section = match request.package.archive_component() {
            "" => "debug".to_string(),
            component => format!("{}/debug", component),
        };

        let mut invocation = Invocation::new("dpkg-gencontrol")
            .arg(format!("-p{}", selector))
            .arg(self.changelog_arg())
            .arg("-T/dev/null")
            .arg(format!("-c{}", request.control_file.display()))
            .arg(format!("-P{}", request.dbgsym_root.display()))
            .arg(format!("-DPackage={}-dbgsym", name))
            .arg(format!("-DDepends={} (= ${{binary:Version}})", name))
            .arg(format!("-DDescription=debug symbols for {}", name))
            .arg(format!("-DSection={}", section))
            .arg(format!("-DBuild-Ids={}", request.build_ids))
            .args(DBGSYM_UNSET_FIELDS.iter().map(|f| format!("-U{}", f)))
            .arg("-DPriority=optional")
            .arg("-UHomepage")
            .arg("-UImportant")
            .arg("-UBuilt-Using")
            .arg("-UStatic-Built-Using")
            .arg("-DAuto-Built-Package=debug-symbols")
            .arg("-UProtected");
        if request.multi_arch != Some("same") {
            invocation = invocation.arg("-UMulti-Arch");
        }
        invocation
            .arg("-UReplaces")
            .arg("-UBreaks")
            .arg(format!("-VInstalled-Size={}", request.installed_size))
            .args(request.common.as_slice())
    }

    /// Generate `DEBIAN/control` for the package
    pub fn generate(&self, request: &GencontrolRequest<'_>) -> Result<PathBuf> {
        self.runner.run_checked(&self.package_invocation(request))?;
        let control = request.control_dir.join("control");
        finalize_control(&control)?;
        Ok(control)
    }

    /// Generate `DEBIAN/control` for the dbgsym companion
    pub fn generate_dbgsym(&self, request: &DbgsymGencontrolRequest<'_>) -> Result<PathBuf> {
        let control_dir = request.dbgsym_root.join("DEBIAN");
        fs::create_dir_all(&control_dir)?;
        self.runner.run_checked(&self.dbgsym_invocation(request))?;
        let control = control_dir.join("control");
        finalize_control(&control)?;
        Ok(control)
    }
}

fn finalize_control(control: &Path) -> Result<()> {
    if !control.is_file() {
        return Err(Error::NotFound(format!(
            "dpkg-gencontrol did not produce {}",
            control.display()
        )));
    }
    fs::set_permissions(control, fs::Permissions::from_mode(0o644))?;
    debug!("Generated {}", control.display());
    Ok(())
}

/// Fake `dpkg-gencontrol` writing the control file the real one would produce
#[cfg(test)]
pub(crate) fn gencontrol_writer(invocation: &Invocation) -> Result<crate::process::CommandOutput> {
    let args = invocation.get_args();
    let output = args
        .iter()
        .find_map(|a| a.strip_prefix("-O").map(PathBuf::from))
        .or_else(|| {
            args.iter()
                .find_map(|a| a.strip_prefix("-P"))
                .map(|root| Path::new(root).join("DEBIAN/control"))
        });
    if let Some(output) = output {
        fs::write(output, "Package: generated\n").unwrap();
    }
    Ok(crate::process::CommandOutput::ok(Vec::new()))
}
