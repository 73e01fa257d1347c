// src/config.rs

//! Assembly configuration and assembly plans
//!
//! [`AssemblyConfig`] holds the build-wide settings: input files, the
//! directories debasm writes to and the `DEB_BUILD_OPTIONS` flags.
//! [`AssemblyPlan`] lists the already-resolved binary packages to assemble.
//! Both are TOML files; every field has a default matching the usual
//! `debian/` layout.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::service::ServiceRule;

/// `DEB_BUILD_OPTIONS` flags that change the assembly
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    /// Leave binaries untouched; no debug extraction at all
    pub nostrip: bool,
    /// Do not build automatic dbgsym packages
    pub noautodbgsym: bool,
    /// Older spelling of `noautodbgsym`
    pub noddebs: bool,
}

impl BuildOptions {
    /// Parse a `DEB_BUILD_OPTIONS` value; unknown options are ignored
    pub fn parse(value: &str) -> Self {
        let mut options = Self::default();
        for option in value.split_whitespace() {
            let name = option.split_once('=').map_or(option, |(name, _)| name);
            match name {
                "nostrip" => options.nostrip = true,
                "noautodbgsym" => options.noautodbgsym = true,
                "noddebs" => options.noddebs = true,
                _ => {}
            }
        }
        options
    }

    /// Read `DEB_BUILD_OPTIONS` from the environment
    pub fn from_env() -> Self {
        std::env::var("DEB_BUILD_OPTIONS")
            .map(|v| Self::parse(&v))
            .unwrap_or_default()
    }

    /// Options set in either
    pub fn union(self, other: Self) -> Self {
        Self {
            nostrip: self.nostrip || other.nostrip,
            noautodbgsym: self.noautodbgsym || other.noautodbgsym,
            noddebs: self.noddebs || other.noddebs,
        }
    }

    /// Whether automatic dbgsym packages are disabled
    pub fn skip_dbgsym(&self) -> bool {
        self.noautodbgsym || self.noddebs
    }
}

/// Build-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyConfig {
    #[serde(default = "default_changelog")]
    pub changelog: PathBuf,

    #[serde(default = "default_control")]
    pub control: PathBuf,

    /// Package-private scratch space (detached binaries, merged control files)
    #[serde(default = "default_generated_dir")]
    pub generated_dir: PathBuf,

    /// Shared directory holding the physical debug files
    #[serde(default = "default_dbgsym_store")]
    pub dbgsym_store: PathBuf,

    /// Where package roots (`<pkg>/` and `<pkg>-dbgsym/`) are assembled
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Override for the system ARG_MAX
    #[serde(default)]
    pub arg_max: Option<usize>,

    #[serde(default)]
    pub build_options: BuildOptions,
}

fn default_changelog() -> PathBuf {
    PathBuf::from("debian/changelog")
}

fn default_control() -> PathBuf {
    PathBuf::from("debian/control")
}

fn default_generated_dir() -> PathBuf {
    PathBuf::from("debian/.debasm/generated")
}

fn default_dbgsym_store() -> PathBuf {
    PathBuf::from("debian/.debasm/dbgsym-store")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("debian/.debasm/output")
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            changelog: default_changelog(),
            control: default_control(),
            generated_dir: default_generated_dir(),
            dbgsym_store: default_dbgsym_store(),
            output_dir: default_output_dir(),
            arg_max: None,
            build_options: BuildOptions::default(),
        }
    }
}

impl AssemblyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: AssemblyConfig = toml::from_str(&content).map_err(|e| {
            Error::ConfigError(format!("Failed to parse config file {}: {}", path.display(), e))
        })?;
        config.validate()?;
        debug!("Loaded assembly config from {}", path.display());
        Ok(config)
    }

    /// Reject settings that cannot work
    pub fn validate(&self) -> Result<()> {
        if self.arg_max == Some(0) {
            return Err(Error::ConfigError("arg_max must be positive".into()));
        }
        if self.output_dir == self.generated_dir {
            return Err(Error::ConfigError(
                "output_dir and generated_dir must differ".into(),
            ));
        }
        Ok(())
    }

    /// Root every relative directory at `base`
    pub fn with_base_dir(mut self, base: &Path) -> Self {
        for path in [
            &mut self.changelog,
            &mut self.control,
            &mut self.generated_dir,
            &mut self.dbgsym_store,
            &mut self.output_dir,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        self
    }

    /// Add the flags from `DEB_BUILD_OPTIONS`
    pub fn with_env_build_options(mut self) -> Self {
        self.build_options = self.build_options.union(BuildOptions::from_env());
        self
    }

    pub fn with_build_options(mut self, options: BuildOptions) -> Self {
        self.build_options = options;
        self
    }

    /// Scratch directory of one package
    pub fn workdir(&self, package: &str) -> PathBuf {
        self.generated_dir.join(package)
    }

    /// Assembled root of a package
    pub fn package_root(&self, package: &str) -> PathBuf {
        self.output_dir.join(package)
    }

    /// Assembled root of a dbgsym companion
    pub fn dbgsym_root(&self, package: &str) -> PathBuf {
        self.output_dir.join(format!("{}-dbgsym", package))
    }
}

/// One binary package to assemble
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PackagePlan {
    pub name: String,

    /// Overrides the `Architecture` of the `debian/control` stanza
    #[serde(default)]
    pub architecture: Option<String>,

    /// Directory holding the staged payload
    pub staging_dir: PathBuf,

    /// Directory with packager-provided control files (`shlibs`, `postinst`, ...)
    #[serde(default)]
    pub control_dir: Option<PathBuf>,

    /// Extra or replaced binary stanza fields
    #[serde(default)]
    pub fields: BTreeMap<String, String>,

    /// Substvars file; the package starts with none when absent
    #[serde(default)]
    pub substvars: Option<PathBuf>,

    #[serde(default)]
    pub binary_version: Option<String>,

    /// Build as a udeb
    #[serde(default)]
    pub udeb: bool,

    #[serde(default)]
    pub services: Vec<ServiceRule>,
}

/// The packages of one assembly run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssemblyPlan {
    #[serde(default, rename = "package")]
    pub packages: Vec<PackagePlan>,
}

impl AssemblyPlan {
    pub fn parse(text: &str) -> Result<Self> {
        let plan: AssemblyPlan = toml::from_str(text)
            .map_err(|e| Error::ConfigError(format!("Failed to parse assembly plan: {}", e)))?;
        plan.validate()?;
        Ok(plan)
    }

    /// Load a plan from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read plan {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for package in &self.packages {
            if !seen.insert(package.name.as_str()) {
                return Err(Error::ConfigError(format!(
                    "package {} is listed twice in the assembly plan",
                    package.name
                )));
            }
        }
        Ok(())
    }
}
